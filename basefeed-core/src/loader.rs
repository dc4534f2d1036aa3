//! Load orchestration: per-entity, per-file, per-phase control flow.
//!
//! A run is a single pass: load every entity kind into `daily_base`
//! with date realignment, clean `daily_base` up, then load every kind
//! again into `true_base` with source dates untouched. Each source
//! file's writes happen inside one transaction, committed after the
//! file's last batch; raw rows are processed in bounded chunks so peak
//! memory stays independent of partition size.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::align;
use crate::build;
use crate::chunk;
use crate::cleanup::{self, CleanupPolicy, CleanupStats};
use crate::entity::{EntityKind, Phase};
use crate::record::Record;
use crate::source::{self, SourceError};
use crate::store::{Store, StoreError};

/// Raw rows parsed per chunk; bounds peak parse memory.
const RAW_ROW_CHUNK: usize = 1_000_000;

/// Records per upsert batch; bounds peak transaction payload.
const WRITE_BATCH: usize = 250_000;

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("list partitions in {}: {source}", .dir.display())]
    ListPartitions {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters for one load phase.
#[derive(Debug, Default, Clone, Serialize)]
pub struct LoadStats {
    pub files_loaded: usize,
    pub records_written: usize,
    pub dropped_empty: usize,
    pub dropped_weekend: usize,
    pub skipped_unparseable: usize,
}

impl LoadStats {
    fn absorb(&mut self, other: &LoadStats) {
        self.files_loaded += other.files_loaded;
        self.records_written += other.records_written;
        self.dropped_empty += other.dropped_empty;
        self.dropped_weekend += other.dropped_weekend;
        self.skipped_unparseable += other.skipped_unparseable;
    }
}

/// Outcome of a full run: both load phases plus the cleanup pass.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub daily_base: LoadStats,
    pub cleanup: CleanupStats,
    pub true_base: LoadStats,
}

/// Execute a full run: daily_base load, cleanup, true_base load.
pub fn run(
    store: &mut Store,
    source_root: &Path,
    policy: &CleanupPolicy,
) -> Result<RunSummary, LoadError> {
    let daily_base = load_phase(store, source_root, Phase::DailyBase)?;
    let cleanup = cleanup::run(store, policy)?;
    let true_base = load_phase(store, source_root, Phase::TrueBase)?;
    info!("run finished");
    Ok(RunSummary {
        daily_base,
        cleanup,
        true_base,
    })
}

/// Load every entity kind into `phase`'s table.
pub fn load_phase(
    store: &mut Store,
    source_root: &Path,
    phase: Phase,
) -> Result<LoadStats, LoadError> {
    let mut stats = LoadStats::default();
    for kind in EntityKind::ALL {
        info!(entity = %kind, table = %phase, "starting entity");
        let entity_stats = load_entity(store, source_root, kind, phase)?;
        info!(
            entity = %kind,
            files = entity_stats.files_loaded,
            records = entity_stats.records_written,
            "entity persisted"
        );
        stats.absorb(&entity_stats);
    }
    Ok(stats)
}

/// Load every partition file of one entity kind.
fn load_entity(
    store: &mut Store,
    source_root: &Path,
    kind: EntityKind,
    phase: Phase,
) -> Result<LoadStats, LoadError> {
    let dir = source_root.join(kind.spec().source_dir);
    let files = list_partitions(&dir)?;
    let total = files.len();

    let mut stats = LoadStats::default();
    for (i, file) in files.iter().enumerate() {
        info!(entity = %kind, file = %file.display(), "{i}/{total} files persisted");
        load_file(store, file, kind, phase, &mut stats)?;
        stats.files_loaded += 1;
    }
    Ok(stats)
}

/// Parquet partitions in one entity directory, in listing order. The
/// order is whatever the filesystem yields; nothing downstream depends
/// on it.
fn list_partitions(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries = std::fs::read_dir(dir).map_err(|e| LoadError::ListPartitions {
        dir: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LoadError::ListPartitions {
            dir: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "parquet") {
            files.push(path);
        }
    }
    Ok(files)
}

/// Load one partition file inside one transaction. Any failure drops
/// the transaction and rolls the whole file back; earlier files stay
/// committed.
fn load_file(
    store: &mut Store,
    path: &Path,
    kind: EntityKind,
    phase: Phase,
    stats: &mut LoadStats,
) -> Result<(), LoadError> {
    let raw_rows = source::read_partition(path, kind.spec())?;
    let n_chunks = raw_rows.len().div_ceil(RAW_ROW_CHUNK);

    let tx = store.file_transaction()?;
    for (c, raw_chunk) in chunk::slice(&raw_rows, RAW_ROW_CHUNK).enumerate() {
        debug!(chunk = c + 1, of = n_chunks, rows = raw_chunk.len(), "modeling");

        let mut records: Vec<Record> = Vec::with_capacity(raw_chunk.len());
        for raw in raw_chunk {
            let mut rec = match build::build_record(kind, raw) {
                Ok(rec) => rec,
                Err(e) => {
                    warn!(entity = %kind, file = %path.display(), "skipping row: {e}");
                    stats.skipped_unparseable += 1;
                    continue;
                }
            };
            if rec.is_empty() {
                stats.dropped_empty += 1;
                continue;
            }
            if rec.is_weekend() {
                stats.dropped_weekend += 1;
                continue;
            }
            rec.datadate = align::align(rec.datadate, kind, phase);
            records.push(rec);
        }

        for batch in chunk::slice(&records, WRITE_BATCH) {
            stats.records_written += tx.write_batch(phase, kind, batch)?;
            debug!(written = stats.records_written, "records executed");
        }
    }
    tx.commit()?;
    Ok(())
}
