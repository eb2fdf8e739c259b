//! Background reload on source-file change.
//!
//! [`ReloadWatcher`] polls the store's source file in a tokio task and calls
//! [`DatasetStore::reload`] whenever its modification time or length changes,
//! reporting each attempt as a [`ReloadEvent`] on an `mpsc` channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time;

use crate::store::DatasetStore;

// ── Public types ──────────────────────────────────────────────────────────────

/// Outcome of one reload attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReloadEvent {
    Reloaded { generation: u64, rows: usize },
    /// The previous snapshot is still current.
    Failed { error: String },
}

/// What the watcher compares between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

// ── ReloadWatcher ─────────────────────────────────────────────────────────────

pub struct ReloadWatcher {
    store: Arc<DatasetStore>,
    poll_interval: Duration,
}

impl ReloadWatcher {
    pub fn new(store: Arc<DatasetStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Spawn the polling loop.
    ///
    /// The loop ends when the returned receiver is dropped or the handle is
    /// aborted. A store without a source file produces no events.
    pub fn start(self) -> (mpsc::Receiver<ReloadEvent>, WatcherHandle) {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            self.watch_loop(tx).await;
        });
        (rx, WatcherHandle { handle })
    }

    async fn watch_loop(self, tx: mpsc::Sender<ReloadEvent>) {
        let Some(path) = self.store.source().map(Path::to_path_buf) else {
            tracing::debug!("store has no source file; watcher idle");
            return;
        };
        let mut last = FileStamp::read(&path);

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            if tx.is_closed() {
                tracing::debug!("reload channel closed; exiting watcher");
                break;
            }

            let current = FileStamp::read(&path);
            if current == last {
                continue;
            }
            last = current;
            tracing::debug!(path = %path.display(), "source file changed");

            let event = self.reload(path.clone()).await;
            if tx.send(event).await.is_err() {
                tracing::debug!("reload receiver dropped; exiting watcher");
                break;
            }
        }
    }

    /// Run the blocking reload off the async workers.
    async fn reload(&self, path: PathBuf) -> ReloadEvent {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.reload()).await {
            Ok(Ok(snapshot)) => ReloadEvent::Reloaded {
                generation: snapshot.generation,
                rows: snapshot.table.len(),
            },
            Ok(Err(e)) => ReloadEvent::Failed {
                error: e.to_string(),
            },
            Err(join) => {
                tracing::warn!(path = %path.display(), error = %join, "reload task failed");
                ReloadEvent::Failed {
                    error: join.to_string(),
                }
            }
        }
    }
}

// ── WatcherHandle ─────────────────────────────────────────────────────────────

/// Handle to the background watcher task.
pub struct WatcherHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use immistat_core::models::{CleanedTable, LoadReport};
    use immistat_core::schema::DatasetSchema;
    use immistat_data::reader::LoadedDataset;

    const HEADER: &str = "表章項目,時間軸（月次）,在留資格審査,在留資格審査の受理・処理,東京";

    fn write_rows(path: &Path, rows: &[&str]) {
        let mut content = format!("{}\n", HEADER);
        for r in rows {
            content.push_str(r);
            content.push('\n');
        }
        std::fs::write(path, content).unwrap();
    }

    async fn next_event(rx: &mut mpsc::Receiver<ReloadEvent>) -> ReloadEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for reload event")
            .expect("channel closed before an event arrived")
    }

    #[tokio::test]
    async fn test_watcher_reloads_on_change() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        write_rows(&path, &["在留資格審査,2024年1月,在留期間更新,未済,1"]);
        let store = Arc::new(DatasetStore::open(&path, DatasetSchema::default()).unwrap());

        let watcher = ReloadWatcher::new(Arc::clone(&store), Duration::from_millis(20));
        let (mut rx, handle) = watcher.start();
        tokio::time::sleep(Duration::from_millis(60)).await;

        write_rows(
            &path,
            &[
                "在留資格審査,2024年1月,在留期間更新,未済,1",
                "在留資格審査,2024年2月,在留期間更新,未済,2",
            ],
        );

        let event = next_event(&mut rx).await;
        assert_eq!(event, ReloadEvent::Reloaded { generation: 2, rows: 2 });
        assert_eq!(store.snapshot().generation, 2);
        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_reports_failed_reload() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        write_rows(&path, &["在留資格審査,2024年1月,在留期間更新,未済,1"]);
        let store = Arc::new(DatasetStore::open(&path, DatasetSchema::default()).unwrap());

        let (mut rx, handle) =
            ReloadWatcher::new(Arc::clone(&store), Duration::from_millis(20)).start();
        tokio::time::sleep(Duration::from_millis(60)).await;

        std::fs::write(&path, "broken,header\n1,2\n").unwrap();

        match next_event(&mut rx).await {
            ReloadEvent::Failed { error } => assert!(error.contains("表章項目")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(store.snapshot().generation, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_watcher_exits_when_receiver_dropped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        write_rows(&path, &["在留資格審査,2024年1月,在留期間更新,未済,1"]);
        let store = Arc::new(DatasetStore::open(&path, DatasetSchema::default()).unwrap());

        let (rx, handle) = ReloadWatcher::new(store, Duration::from_millis(10)).start();
        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watcher did not exit");
    }

    #[tokio::test]
    async fn test_in_memory_store_watcher_is_idle() {
        let dataset = LoadedDataset {
            table: CleanedTable::default(),
            report: LoadReport::default(),
        };
        let store = Arc::new(DatasetStore::from_dataset(dataset, DatasetSchema::default()));
        let (mut rx, _handle) = ReloadWatcher::new(store, Duration::from_millis(10)).start();
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_reload_event_serialises_with_tag() {
        let json = serde_json::to_string(&ReloadEvent::Reloaded {
            generation: 3,
            rows: 10,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"reloaded","generation":3,"rows":10}"#);
    }
}
