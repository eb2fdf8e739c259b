//! Snapshot store with atomic reload.
//!
//! A [`DatasetStore`] owns the current [`Snapshot`] behind an [`ArcSwap`].
//! Readers pin a snapshot with [`DatasetStore::snapshot`] and keep it as long
//! as they like; [`DatasetStore::reload`] builds a complete replacement before
//! swapping it in, so nobody ever observes a half-loaded table. A failed
//! reload leaves the previous snapshot current. Reloads are serialised, so
//! the current generation never goes backwards.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use immistat_core::error::Result;
use immistat_core::models::{CleanedTable, LoadReport, TidyRecord};
use immistat_core::schema::DatasetSchema;
use immistat_data::aggregator::TableAggregator;
use immistat_data::analysis::{dataset_metadata, DatasetMetadata};
use immistat_data::reader::{load_with_schema, LoadedDataset};

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// One immutable loaded version of the dataset.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub table: CleanedTable,
    /// The table melted over every bureau column, kept so queries don't
    /// re-melt.
    pub tidy: Vec<TidyRecord>,
    pub report: LoadReport,
    pub metadata: DatasetMetadata,
    /// Status labels the estimator looks for come from here.
    pub schema: DatasetSchema,
    /// Source file, or `None` for a snapshot built in memory.
    pub source: Option<PathBuf>,
    pub loaded_at: DateTime<Utc>,
    /// Starts at 1 and increases by one per successful reload.
    pub generation: u64,
}

impl Snapshot {
    /// Build a snapshot around an already-cleaned table.
    pub fn build(
        dataset: LoadedDataset,
        schema: DatasetSchema,
        source: Option<PathBuf>,
        generation: u64,
    ) -> Self {
        let tidy = TableAggregator::melt(&dataset.table, &[]);
        let metadata = dataset_metadata(&dataset.table);
        Self {
            table: dataset.table,
            tidy,
            report: dataset.report,
            metadata,
            schema,
            source,
            loaded_at: Utc::now(),
            generation,
        }
    }
}

// ── DatasetStore ──────────────────────────────────────────────────────────────

/// Holds the current snapshot of one source file.
///
/// # Example
/// ```no_run
/// use immistat_core::schema::DatasetSchema;
/// use immistat_runtime::store::DatasetStore;
///
/// let store = DatasetStore::open("FEH_00250011.csv", DatasetSchema::default())?;
/// let snap = store.snapshot();
/// println!("{} rows, generation {}", snap.table.len(), snap.generation);
/// # Ok::<(), immistat_core::StatError>(())
/// ```
pub struct DatasetStore {
    source: Option<PathBuf>,
    schema: DatasetSchema,
    current: ArcSwap<Snapshot>,
    generation: AtomicU64,
    /// Held from reading the file until the new snapshot is stored.
    reload_lock: Mutex<()>,
}

impl DatasetStore {
    /// Load `path` and make it the first snapshot.
    pub fn open(path: impl AsRef<Path>, schema: DatasetSchema) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dataset = load_with_schema(&path, &schema)?;
        let snapshot = Snapshot::build(dataset, schema.clone(), Some(path.clone()), 1);
        Ok(Self {
            source: Some(path),
            schema,
            current: ArcSwap::from_pointee(snapshot),
            generation: AtomicU64::new(1),
            reload_lock: Mutex::new(()),
        })
    }

    /// A store over an in-memory dataset; [`reload`](Self::reload) just
    /// returns the current snapshot.
    pub fn from_dataset(dataset: LoadedDataset, schema: DatasetSchema) -> Self {
        let snapshot = Snapshot::build(dataset, schema.clone(), None, 1);
        Self {
            source: None,
            schema,
            current: ArcSwap::from_pointee(snapshot),
            generation: AtomicU64::new(1),
            reload_lock: Mutex::new(()),
        }
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Pin the current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Re-read the source file and swap the result in.
    ///
    /// On error the previous snapshot stays current and the error is
    /// returned; there is no retry.
    pub fn reload(&self) -> Result<Arc<Snapshot>> {
        let Some(path) = self.source.as_ref() else {
            tracing::debug!("in-memory store; reload is a no-op");
            return Ok(self.snapshot());
        };

        // A panicked reload never stored anything, so a poisoned lock is safe
        // to reuse.
        let _guard = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match load_with_schema(path, &self.schema) {
            Ok(dataset) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let snapshot = Arc::new(Snapshot::build(
                    dataset,
                    self.schema.clone(),
                    Some(path.clone()),
                    generation,
                ));
                self.current.store(Arc::clone(&snapshot));
                tracing::info!(
                    path = %path.display(),
                    generation,
                    rows = snapshot.table.len(),
                    "snapshot reloaded"
                );
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    generation = self.current.load().generation,
                    "reload failed; keeping previous snapshot"
                );
                Err(e)
            }
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    /// Time since the current snapshot was built.
    pub fn snapshot_age(&self) -> chrono::Duration {
        Utc::now() - self.current.load().loaded_at
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
