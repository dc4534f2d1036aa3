//! Post-load cleanup of `daily_base`: threshold deletes, coverage
//! deletes, and the jurisdiction universe restriction.
//!
//! Runs once, after the daily_base load and before the true_base load.
//! Three ordered steps, each committed independently: the threshold
//! and coverage deletes are single statements, and the universe
//! restriction deletes keys in small chunks with one commit per chunk,
//! so a crash mid-restriction leaves partial progress that a re-run
//! converges from.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::chunk;
use crate::store::{Store, StoreError};

/// Keys deleted per statement during the universe restriction.
const KEY_CHUNK: usize = 100;

/// Tunable cleanup thresholds and the target jurisdiction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupPolicy {
    /// Rows with market cap below this are deleted.
    pub min_market_cap: f64,
    /// Rows with volume below this are deleted.
    pub min_volume: f64,
    /// Jurisdiction whose universe `daily_base` is restricted to.
    pub jurisdiction: String,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            min_market_cap: 100.0,
            min_volume: 1_000_000.0,
            jurisdiction: "USA".into(),
        }
    }
}

/// Errors loading a cleanup policy file.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("read policy file: {0}")]
    Read(#[from] std::io::Error),

    #[error("parse policy TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CleanupPolicy {
    /// Load a policy from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml(&content)?)
    }

    /// Parse a policy from a TOML string. Omitted fields keep their
    /// defaults.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Row counts removed by each cleanup step.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanupStats {
    /// Rows failing the market-cap/volume/return policy.
    pub below_thresholds: usize,
    /// Rows with no short-interest coverage.
    pub without_short_interest: usize,
    /// Rows whose key fell outside the jurisdiction universe.
    pub outside_universe: usize,
}

/// Run the three cleanup steps against `daily_base`.
pub fn run(store: &Store, policy: &CleanupPolicy) -> Result<CleanupStats, StoreError> {
    let mut stats = CleanupStats::default();

    info!("cleaning daily_base");
    stats.below_thresholds =
        store.delete_below_thresholds(policy.min_market_cap, policy.min_volume)?;
    info!(
        deleted = stats.below_thresholds,
        "removed rows below market-cap/volume thresholds or missing market_cap/volume/rtn"
    );

    stats.without_short_interest = store.delete_without_short_interest()?;
    info!(
        deleted = stats.without_short_interest,
        "removed rows with no short-interest coverage"
    );

    stats.outside_universe = restrict_universe(store, &policy.jurisdiction)?;
    info!(
        deleted = stats.outside_universe,
        jurisdiction = %policy.jurisdiction,
        "universe restriction complete"
    );

    Ok(stats)
}

/// Delete every key present in `daily_base` but absent from the
/// jurisdiction's reference set, in chunks of [`KEY_CHUNK`] keys with
/// one commit per chunk. Idempotent: re-running converges to the same
/// end state.
fn restrict_universe(store: &Store, jurisdiction: &str) -> Result<usize, StoreError> {
    let member_keys: std::collections::HashSet<i64> =
        store.jurisdiction_keys(jurisdiction)?.into_iter().collect();
    let invalid: Vec<i64> = store
        .daily_base_keys()?
        .into_iter()
        .filter(|k| !member_keys.contains(k))
        .collect();

    let total = invalid.len();
    let mut deleted = 0;
    for keys in chunk::slice(&invalid, KEY_CHUNK) {
        deleted += store.delete_keys(keys)?;
        debug!(keys = deleted, of = total, "deleted out-of-universe keys");
    }
    Ok(deleted)
}
