//! SQLite-backed target store: schema, file-scoped transactions, and
//! the per-kind partial-column upserts.
//!
//! The store owns the single connection the pipeline uses. Loading
//! writes through a [`FileTx`], an explicit unit of work covering all
//! of one source file's batches; dropping it without committing rolls
//! the whole file back. Cleanup runs in autocommit, one statement (or
//! one key chunk) per commit.

use std::path::Path;

use rusqlite::{params_from_iter, Connection, ToSql, Transaction};
use thiserror::Error;

use crate::entity::{EntityKind, Phase};
use crate::record::Record;

/// Schema DDL, applied idempotently on open.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors from the target store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// The target database: `daily_base`, `true_base`, and the consumed
/// `country` reference table.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Begin the unit of work covering one source file's batches.
    pub fn file_transaction(&mut self) -> Result<FileTx<'_>, StoreError> {
        Ok(FileTx {
            tx: self.conn.transaction()?,
        })
    }

    /// Register a company key in the jurisdiction reference table.
    pub fn set_country(&self, gvkey: i64, country: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO country (gvkey, country) VALUES (?1, ?2)",
            rusqlite::params![gvkey, country],
        )?;
        Ok(())
    }

    /// Distinct company keys currently present in `daily_base`.
    pub fn daily_base_keys(&self) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT gvkey FROM daily_base")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(keys)
    }

    /// Distinct company keys belonging to a jurisdiction.
    pub fn jurisdiction_keys(&self, jurisdiction: &str) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT gvkey FROM country WHERE country = ?1")?;
        let keys = stmt
            .query_map([jurisdiction], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(keys)
    }

    /// Delete `daily_base` rows failing the market-cap/volume/return
    /// policy. Autocommit; one statement, one commit.
    pub fn delete_below_thresholds(
        &self,
        min_market_cap: f64,
        min_volume: f64,
    ) -> Result<usize, StoreError> {
        let n = self.conn.execute(
            "DELETE FROM daily_base \
             WHERE market_cap < ?1 \
             OR volume < ?2 \
             OR market_cap IS NULL \
             OR volume IS NULL \
             OR rtn IS NULL",
            rusqlite::params![min_market_cap, min_volume],
        )?;
        Ok(n)
    }

    /// Delete `daily_base` rows with no short-interest coverage: every
    /// short-interest attribute unset.
    pub fn delete_without_short_interest(&self) -> Result<usize, StoreError> {
        let n = self.conn.execute(
            "DELETE FROM daily_base \
             WHERE utilization_pct IS NULL \
             AND bar IS NULL \
             AND age IS NULL \
             AND tickets IS NULL \
             AND units IS NULL \
             AND market_value_usd IS NULL \
             AND loan_rate_avg IS NULL \
             AND loan_rate_max IS NULL \
             AND loan_rate_min IS NULL \
             AND loan_rate_range IS NULL \
             AND loan_rate_stdev IS NULL",
            [],
        )?;
        Ok(n)
    }

    /// Delete one chunk of company keys from `daily_base`. Autocommit,
    /// so every chunk is its own commit and partial progress survives
    /// a failure.
    pub fn delete_keys(&self, keys: &[i64]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!("DELETE FROM daily_base WHERE gvkey IN ({placeholders})");
        let n = self.conn.execute(&sql, params_from_iter(keys.iter()))?;
        Ok(n)
    }
}

/// Unit of work for one source file. Commit after the file's last
/// batch; dropping without commit rolls every batch back.
pub struct FileTx<'c> {
    tx: Transaction<'c>,
}

impl FileTx<'_> {
    /// Upsert one write batch for `kind` into `phase`'s table.
    ///
    /// Inserts (datadate, gvkey) plus the kind's owned columns; on an
    /// existing key, updates only the owned columns.
    pub fn write_batch(
        &self,
        phase: Phase,
        kind: EntityKind,
        batch: &[Record],
    ) -> Result<usize, StoreError> {
        let mut stmt = self.tx.prepare_cached(&kind.upsert_sql(phase.table()))?;
        for rec in batch {
            let owned = owned_values(rec, kind);
            let mut row: Vec<&dyn ToSql> = Vec::with_capacity(owned.len() + 2);
            row.push(&rec.datadate);
            row.push(&rec.gvkey);
            row.extend(owned);
            stmt.execute(params_from_iter(row))?;
        }
        Ok(batch.len())
    }

    /// Commit the file's writes.
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }
}

/// Project a record onto the owned-column values of `kind`, in the
/// registry's column order. This is the write tuple: the only fields a
/// batch for `kind` ever touches.
fn owned_values(rec: &Record, kind: EntityKind) -> Vec<&dyn ToSql> {
    match kind {
        EntityKind::ShortInterest => vec![
            &rec.utilization_pct,
            &rec.bar,
            &rec.age,
            &rec.tickets,
            &rec.units,
            &rec.market_value_usd,
            &rec.loan_rate_avg,
            &rec.loan_rate_max,
            &rec.loan_rate_min,
            &rec.loan_rate_range,
            &rec.loan_rate_stdev,
        ],
        EntityKind::MarketCap => vec![&rec.market_cap],
        EntityKind::Returns => vec![&rec.rtn],
        EntityKind::SharesOut => vec![&rec.shares_out],
        EntityKind::Volume => vec![&rec.volume],
    }
}
