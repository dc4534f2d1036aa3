//! Entity kinds, load phases, and the per-kind source/upsert registry.
//!
//! Each feed that contributes to the base tables is one [`EntityKind`].
//! A kind fixes where its partitions live, how they are laid out
//! (tabular vs wide matrix, transposed or not), and which target
//! columns it owns. Everything the pipeline needs to know about a kind
//! is data in [`EntitySpec`] — there is no per-kind control flow
//! outside the record builders.

use std::fmt;

/// Which target table a load writes to.
///
/// `DailyBase` applies the business-day realignment and is followed by
/// the cleanup pass; `TrueBase` writes source dates untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    DailyBase,
    TrueBase,
}

impl Phase {
    /// Name of the table this phase writes to.
    pub fn table(self) -> &'static str {
        match self {
            Phase::DailyBase => "daily_base",
            Phase::TrueBase => "true_base",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// The closed set of source feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    ShortInterest,
    MarketCap,
    Returns,
    SharesOut,
    Volume,
}

/// Static description of one entity kind: where its partitions live,
/// how they are shaped, and which columns it owns in the base tables.
#[derive(Debug)]
pub struct EntitySpec {
    /// Subdirectory under the source root holding this kind's partitions.
    pub source_dir: &'static str,
    /// Partition is stored row/column-swapped and must be transposed
    /// before the date axis reads down the first column.
    pub transpose: bool,
    /// Partition is a wide (date × company) matrix and must be
    /// unflattened to one raw row per cell. When false, each source row
    /// already carries every owned attribute for one (date, company).
    pub unflatten: bool,
    /// Columns this kind owns in `daily_base`/`true_base`. An upsert
    /// from this kind updates exactly these, leaving the rest of the
    /// row untouched.
    pub owned_columns: &'static [&'static str],
}

const SHORT_INTEREST: EntitySpec = EntitySpec {
    source_dir: "short_interest",
    transpose: false,
    unflatten: false,
    owned_columns: &[
        "utilization_pct",
        "bar",
        "age",
        "tickets",
        "units",
        "market_value_usd",
        "loan_rate_avg",
        "loan_rate_max",
        "loan_rate_min",
        "loan_rate_range",
        "loan_rate_stdev",
    ],
};

const MARKET_CAP: EntitySpec = EntitySpec {
    source_dir: "market_cap",
    transpose: false,
    unflatten: true,
    owned_columns: &["market_cap"],
};

const RETURNS: EntitySpec = EntitySpec {
    source_dir: "returns",
    transpose: false,
    unflatten: true,
    owned_columns: &["rtn"],
};

const SHARES_OUT: EntitySpec = EntitySpec {
    source_dir: "shares_out",
    transpose: true,
    unflatten: true,
    owned_columns: &["shares_out"],
};

const VOLUME: EntitySpec = EntitySpec {
    source_dir: "volume",
    transpose: false,
    unflatten: true,
    owned_columns: &["volume"],
};

impl EntityKind {
    /// All kinds, in load order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::ShortInterest,
        EntityKind::MarketCap,
        EntityKind::Returns,
        EntityKind::SharesOut,
        EntityKind::Volume,
    ];

    /// The registry entry for this kind.
    pub fn spec(self) -> &'static EntitySpec {
        match self {
            EntityKind::ShortInterest => &SHORT_INTEREST,
            EntityKind::MarketCap => &MARKET_CAP,
            EntityKind::Returns => &RETURNS,
            EntityKind::SharesOut => &SHARES_OUT,
            EntityKind::Volume => &VOLUME,
        }
    }

    /// Partial-column upsert statement for this kind against `table`.
    ///
    /// Inserts (datadate, gvkey) plus the owned columns; on key
    /// conflict updates only the owned columns, preserving whatever
    /// other kinds have already written to that row.
    pub fn upsert_sql(self, table: &str) -> String {
        let cols = self.spec().owned_columns;

        let mut insert_cols = String::from("datadate, gvkey");
        let mut placeholders = String::from("?1, ?2");
        let mut updates = String::new();

        for (i, col) in cols.iter().enumerate() {
            insert_cols.push_str(", ");
            insert_cols.push_str(col);
            placeholders.push_str(&format!(", ?{}", i + 3));
            if i > 0 {
                updates.push_str(", ");
            }
            updates.push_str(&format!("{col} = excluded.{col}"));
        }

        format!(
            "INSERT INTO {table} ({insert_cols}) VALUES ({placeholders}) \
             ON CONFLICT(datadate, gvkey) DO UPDATE SET {updates}"
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::ShortInterest => "short_interest",
            EntityKind::MarketCap => "market_cap",
            EntityKind::Returns => "returns",
            EntityKind::SharesOut => "shares_out",
            EntityKind::Volume => "volume",
        };
        f.write_str(name)
    }
}
