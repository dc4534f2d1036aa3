//! End-to-end pipeline tests: Parquet fixtures on disk, through the
//! loader, into a real database.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::*;
use rusqlite::Connection;
use tempfile::TempDir;

use basefeed_core::cleanup::CleanupPolicy;
use basefeed_core::entity::{EntityKind, Phase};
use basefeed_core::loader::{self, LoadError};
use basefeed_core::store::Store;

// 2020-01-03T00:00:00Z, a Friday.
const FRIDAY_EPOCH: i64 = 1_578_009_600;

/// Source tree with every entity subdirectory present (the loader
/// visits all of them each phase).
fn source_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for kind in EntityKind::ALL {
        fs::create_dir(dir.path().join(kind.spec().source_dir)).unwrap();
    }
    dir
}

fn write_parquet(path: &Path, mut df: DataFrame) {
    let file = fs::File::create(path).unwrap();
    ParquetWriter::new(file).finish(&mut df).unwrap();
}

/// Tabular short-interest partition: one row per (epoch date, gvkey)
/// with only utilization set among the owned value columns.
fn short_interest_partition(rows: &[(i64, i64, f64)]) -> DataFrame {
    let dates: Vec<i64> = rows.iter().map(|r| r.0).collect();
    let gvkeys: Vec<i64> = rows.iter().map(|r| r.1).collect();
    let utilization: Vec<f64> = rows.iter().map(|r| r.2).collect();
    let blank: Vec<Option<f64>> = vec![None; rows.len()];

    let mut cols = vec![
        Column::new("datadate".into(), dates),
        Column::new("gvkey".into(), gvkeys),
        Column::new("utilization_pct".into(), utilization),
    ];
    for name in [
        "bar",
        "short_pct",
        "demand",
        "supply",
        "age",
        "tickets",
        "units",
        "market_value_usd",
        "loan_rate_avg",
        "loan_rate_max",
        "loan_rate_min",
        "loan_rate_stdev",
    ] {
        cols.push(Column::new(name.into(), blank.clone()));
    }
    DataFrame::new(cols).unwrap()
}

/// Wide matrix with a text date axis: one column per company.
fn text_matrix(dates: &[&str], companies: &[(&str, &[Option<f64>])]) -> DataFrame {
    let mut cols = vec![Column::new(
        "datadate".into(),
        dates.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
    )];
    for (gvkey, values) in companies {
        cols.push(Column::new((*gvkey).into(), values.to_vec()));
    }
    DataFrame::new(cols).unwrap()
}

/// Wide matrix with an epoch-seconds date axis.
fn epoch_matrix(dates: &[i64], companies: &[(&str, &[Option<f64>])]) -> DataFrame {
    let mut cols = vec![Column::new("datadate".into(), dates.to_vec())];
    for (gvkey, values) in companies {
        cols.push(Column::new((*gvkey).into(), values.to_vec()));
    }
    DataFrame::new(cols).unwrap()
}

/// Row/column-swapped matrix: gvkey axis down the first column, one
/// column per date. The shares_out layout.
fn transposed_matrix(gvkeys: &[i64], dates: &[(&str, &[Option<f64>])]) -> DataFrame {
    let mut cols = vec![Column::new("gvkey".into(), gvkeys.to_vec())];
    for (date, values) in dates {
        cols.push(Column::new((*date).into(), values.to_vec()));
    }
    DataFrame::new(cols).unwrap()
}

fn date_of(conn: &Connection, table: &str, gvkey: i64) -> String {
    conn.query_row(
        &format!("SELECT datadate FROM {table} WHERE gvkey = ?1"),
        [gvkey],
        |r| r.get(0),
    )
    .unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

#[test]
fn friday_short_interest_shifts_to_monday_in_daily_base_only() {
    let src = source_tree();
    write_parquet(
        &src.path().join("short_interest/2020.parquet"),
        short_interest_partition(&[(FRIDAY_EPOCH, 1001, 0.5)]),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();

    let stats = loader::load_phase(&mut store, src.path(), Phase::DailyBase).unwrap();
    assert_eq!(stats.records_written, 1);
    assert_eq!(stats.dropped_empty, 0);
    assert_eq!(stats.dropped_weekend, 0);

    let stats = loader::load_phase(&mut store, src.path(), Phase::TrueBase).unwrap();
    assert_eq!(stats.records_written, 1);

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(date_of(&conn, "daily_base", 1001), "2020-01-06");
    assert_eq!(date_of(&conn, "true_base", 1001), "2020-01-03");

    let utilization: f64 = conn
        .query_row(
            "SELECT utilization_pct FROM daily_base WHERE gvkey = 1001",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(utilization, 0.5);
}

#[test]
fn weekend_and_empty_cells_never_reach_the_table() {
    let src = source_tree();
    // 2020-01-04 is a Saturday; the NaN cell on 2020-01-06 builds an
    // empty record.
    write_parquet(
        &src.path().join("market_cap/caps.parquet"),
        text_matrix(
            &["2020-01-04", "2020-01-06"],
            &[("1001", &[Some(500.0), None])],
        ),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();
    let stats = loader::load_phase(&mut store, src.path(), Phase::DailyBase).unwrap();

    assert_eq!(stats.dropped_weekend, 1);
    assert_eq!(stats.dropped_empty, 1);
    assert_eq!(stats.records_written, 0);

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(count(&conn, "daily_base"), 0);
}

#[test]
fn loading_the_same_file_twice_is_idempotent() {
    let src = source_tree();
    write_parquet(
        &src.path().join("market_cap/caps.parquet"),
        text_matrix(&["2020-01-06"], &[("1001", &[Some(500.0)])]),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();
    loader::load_phase(&mut store, src.path(), Phase::TrueBase).unwrap();
    loader::load_phase(&mut store, src.path(), Phase::TrueBase).unwrap();

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(count(&conn, "true_base"), 1);
    let cap: f64 = conn
        .query_row(
            "SELECT market_cap FROM true_base WHERE gvkey = 1001",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(cap, 500.0);
}

#[test]
fn kinds_merge_into_one_row_per_key() {
    let src = source_tree();
    write_parquet(
        &src.path().join("market_cap/caps.parquet"),
        text_matrix(&["2020-01-06"], &[("1001", &[Some(500.0)])]),
    );
    write_parquet(
        &src.path().join("returns/rtn.parquet"),
        text_matrix(&["2020-01-06"], &[("1001", &[Some(0.02)])]),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();
    loader::load_phase(&mut store, src.path(), Phase::TrueBase).unwrap();

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(count(&conn, "true_base"), 1);
    let (cap, rtn): (Option<f64>, Option<f64>) = conn
        .query_row(
            "SELECT market_cap, rtn FROM true_base WHERE gvkey = 1001",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(cap, Some(500.0));
    assert_eq!(rtn, Some(0.02));
}

#[test]
fn full_run_loads_cleans_and_reloads() {
    let src = source_tree();

    // Friday source rows shift forward to Monday 2020-01-06 in
    // daily_base; the returns feed is dated Tuesday and shifts
    // backward onto the same Monday.
    write_parquet(
        &src.path().join("short_interest/si.parquet"),
        short_interest_partition(&[(FRIDAY_EPOCH, 1001, 0.5), (FRIDAY_EPOCH, 2002, 0.7)]),
    );
    write_parquet(
        &src.path().join("market_cap/caps.parquet"),
        text_matrix(
            &["2020-01-03"],
            &[("1001", &[Some(500.0)]), ("2002", &[Some(800.0)])],
        ),
    );
    write_parquet(
        &src.path().join("returns/rtn.parquet"),
        text_matrix(
            &["2020-01-07"],
            &[("1001", &[Some(0.01)]), ("2002", &[Some(-0.02)])],
        ),
    );
    write_parquet(
        &src.path().join("volume/vol.parquet"),
        epoch_matrix(
            &[FRIDAY_EPOCH],
            &[("1001", &[Some(5_000_000.0)]), ("2002", &[Some(9_000_000.0)])],
        ),
    );
    write_parquet(
        &src.path().join("shares_out/shares.parquet"),
        transposed_matrix(&[1001, 2002], &[("2020-01-03", &[Some(120.0), Some(340.0)])]),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();
    // 2002 has no jurisdiction entry and falls to the universe
    // restriction.
    store.set_country(1001, "USA").unwrap();

    let summary = loader::run(&mut store, src.path(), &CleanupPolicy::default()).unwrap();
    assert_eq!(summary.daily_base.records_written, 10);
    assert_eq!(summary.cleanup.outside_universe, 1);
    assert_eq!(summary.true_base.records_written, 10);

    let conn = Connection::open(&db_path).unwrap();

    // daily_base: one fully merged row, restricted to the universe.
    assert_eq!(count(&conn, "daily_base"), 1);
    let row: (String, f64, f64, f64, f64, f64) = conn
        .query_row(
            "SELECT datadate, utilization_pct, market_cap, rtn, volume, shares_out \
             FROM daily_base WHERE gvkey = 1001",
            [],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .unwrap();
    assert_eq!(row.0, "2020-01-06");
    assert_eq!(row.1, 0.5);
    assert_eq!(row.2, 500.0);
    assert_eq!(row.3, 0.01);
    assert_eq!(row.4, 5_000_000.0);
    assert_eq!(row.5, 120.0);

    // true_base: unshifted dates, no cleanup, both keys present.
    let si_date: String = conn
        .query_row(
            "SELECT datadate FROM true_base WHERE gvkey = 2002 AND utilization_pct IS NOT NULL",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(si_date, "2020-01-03");
    let true_dates: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT datadate) FROM true_base",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(true_dates, 2, "source dates 2020-01-03 and 2020-01-07");
}

#[test]
fn cleanup_removes_rows_below_thresholds_in_full_run() {
    let src = source_tree();

    write_parquet(
        &src.path().join("short_interest/si.parquet"),
        short_interest_partition(&[(FRIDAY_EPOCH, 1001, 0.5), (FRIDAY_EPOCH, 2002, 0.7)]),
    );
    // 2002's cap of 50 is below the default threshold of 100.
    write_parquet(
        &src.path().join("market_cap/caps.parquet"),
        text_matrix(
            &["2020-01-03"],
            &[("1001", &[Some(500.0)]), ("2002", &[Some(50.0)])],
        ),
    );
    write_parquet(
        &src.path().join("returns/rtn.parquet"),
        text_matrix(
            &["2020-01-07"],
            &[("1001", &[Some(0.01)]), ("2002", &[Some(0.03)])],
        ),
    );
    write_parquet(
        &src.path().join("volume/vol.parquet"),
        epoch_matrix(
            &[FRIDAY_EPOCH],
            &[("1001", &[Some(5_000_000.0)]), ("2002", &[Some(9_000_000.0)])],
        ),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();
    store.set_country(1001, "USA").unwrap();
    store.set_country(2002, "USA").unwrap();

    let summary = loader::run(&mut store, src.path(), &CleanupPolicy::default()).unwrap();
    assert_eq!(summary.cleanup.below_thresholds, 1);

    let conn = Connection::open(&db_path).unwrap();
    let keys: Vec<i64> = conn
        .prepare("SELECT DISTINCT gvkey FROM daily_base ORDER BY gvkey")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(keys, vec![1001]);
}

#[test]
fn unparseable_company_header_skips_only_its_rows() {
    let src = source_tree();
    write_parquet(
        &src.path().join("market_cap/caps.parquet"),
        text_matrix(
            &["2020-01-06"],
            &[("1001", &[Some(500.0)]), ("TOTAL", &[Some(9.9)])],
        ),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();
    let stats = loader::load_phase(&mut store, src.path(), Phase::TrueBase).unwrap();

    assert_eq!(stats.skipped_unparseable, 1);
    assert_eq!(stats.records_written, 1);

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(count(&conn, "true_base"), 1);
}

#[test]
fn unreadable_partition_aborts_the_run() {
    let src = source_tree();
    fs::write(src.path().join("market_cap/broken.parquet"), b"not parquet").unwrap();

    let mut store = Store::open_in_memory().unwrap();
    let err = loader::load_phase(&mut store, src.path(), Phase::DailyBase).unwrap_err();
    assert!(matches!(err, LoadError::Source(_)));
}

#[test]
fn axis_only_matrix_is_a_layout_error() {
    let src = source_tree();
    let df = DataFrame::new(vec![Column::new(
        "datadate".into(),
        vec!["2020-01-06".to_string()],
    )])
    .unwrap();
    write_parquet(&src.path().join("returns/rtn.parquet"), df);

    let mut store = Store::open_in_memory().unwrap();
    let err = loader::load_phase(&mut store, src.path(), Phase::DailyBase).unwrap_err();
    assert!(matches!(err, LoadError::Source(_)));
}

#[test]
fn returns_shift_backward_over_a_weekend() {
    let src = source_tree();
    // Monday-dated returns attribute to the preceding Friday.
    write_parquet(
        &src.path().join("returns/rtn.parquet"),
        text_matrix(&["2020-01-06"], &[("1001", &[Some(0.015)])]),
    );

    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("base.db");
    let mut store = Store::open(&db_path).unwrap();
    loader::load_phase(&mut store, src.path(), Phase::DailyBase).unwrap();

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(date_of(&conn, "daily_base", 1001), "2020-01-03");
}

#[test]
fn dates_survive_the_round_trip_as_calendar_days() {
    // Pin the epoch constant used across the fixtures to the intended
    // calendar day.
    let date = chrono::DateTime::from_timestamp(FRIDAY_EPOCH, 0)
        .unwrap()
        .date_naive();
    assert_eq!(date, NaiveDate::from_ymd_opt(2020, 1, 3).unwrap());
}
