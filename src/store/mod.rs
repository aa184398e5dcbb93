//! Record store gateway for the JSON collections.
//!
//! Each collection is one JSON file read fully into memory, mutated and
//! rewritten wholesale. Writers serialise on a per-collection advisory lock held
//! for the whole read-mutate-write cycle; the new document replaces the old one
//! with an atomic rename, so lock-free readers see either the old or the new
//! state and never a torn file.

pub mod collection;
mod lock;

use anyhow::Context;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::task;
use tracing::{debug, info};

pub use collection::{Collection, CollectionKey};
use lock::CollectionLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to lock collection {collection}: {source}")]
    Lock {
        collection: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on collection {collection}: {source}")]
    Io {
        collection: String,
        #[source]
        source: io::Error,
    },

    #[error("Collection {collection} is not valid JSON: {source}")]
    Corrupt {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    fn io(collection: &str, source: io::Error) -> Self {
        Self::Io {
            collection: collection.to_string(),
            source,
        }
    }
}

/// Handle to the data directory. Cheap to clone; holds no open files between
/// calls.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: Arc<PathBuf>,
}

impl RecordStore {
    /// Creates the data directory and the drawings image directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(DRAWINGS_DIR))
            .with_context(|| format!("Failed to create data directory {}", root.display()))?;
        info!(path = %root.display(), "Record store opened");
        Ok(Self {
            root: Arc::new(root),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn drawings_dir(&self) -> PathBuf {
        self.root.join(DRAWINGS_DIR)
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.lock"))
    }

    /// Runs `f` against the collection under its exclusive lock.
    ///
    /// The document is written back only when `f` returns `Ok`; on `Err` the
    /// file is untouched. The lock is released on every path. `f` must not call
    /// back into the store for the same collection, or it will wait on itself.
    pub async fn with_exclusive_lock<C, R, E, F>(&self, key: &CollectionKey<C>, f: F) -> Result<R, E>
    where
        C: Collection,
        R: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut C) -> Result<R, E> + Send + 'static,
    {
        let store = self.clone();
        let name = key.name().to_string();

        task::spawn_blocking(move || store.locked_update(&name, f))
            .await
            .map_err(|e| E::from(StoreError::Task(e.to_string())))?
    }

    /// Like [`Self::with_exclusive_lock`], but awaits `prepare` after the lock
    /// is taken and before the collection is loaded, then hands its output to
    /// `f`. Whatever `prepare` reads is read while no other writer of this
    /// collection can interleave. `prepare` must not touch this collection.
    pub async fn with_exclusive_lock_after<C, P, R, E, Fut, F>(
        &self,
        key: &CollectionKey<C>,
        prepare: Fut,
        f: F,
    ) -> Result<R, E>
    where
        C: Collection,
        P: Send + 'static,
        R: Send + 'static,
        E: From<StoreError> + Send + 'static,
        Fut: Future<Output = Result<P, E>>,
        F: FnOnce(&mut C, P) -> Result<R, E> + Send + 'static,
    {
        let store = self.clone();
        let name = key.name().to_string();

        let guard = {
            let lock_path = self.lock_path(&name);
            let name = name.clone();
            task::spawn_blocking(move || CollectionLock::acquire(&lock_path, &name))
                .await
                .map_err(|e| E::from(StoreError::Task(e.to_string())))?
                .map_err(E::from)?
        };

        let prepared = prepare.await?;

        task::spawn_blocking(move || {
            let _guard = guard;
            store.update_held(&name, |document: &mut C| f(document, prepared))
        })
        .await
        .map_err(|e| E::from(StoreError::Task(e.to_string())))?
    }

    /// Lock-free read. May be stale against a concurrent writer, never torn.
    pub async fn snapshot<C: Collection>(&self, key: &CollectionKey<C>) -> Result<C, StoreError> {
        let store = self.clone();
        let name = key.name().to_string();

        task::spawn_blocking(move || store.load(&name))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn locked_update<C, R, E, F>(&self, name: &str, f: F) -> Result<R, E>
    where
        C: Collection,
        E: From<StoreError>,
        F: FnOnce(&mut C) -> Result<R, E>,
    {
        let _guard = CollectionLock::acquire(&self.lock_path(name), name)?;
        self.update_held(name, f)
    }

    /// The read-mutate-write cycle. The caller holds the collection lock.
    fn update_held<C, R, E, F>(&self, name: &str, f: F) -> Result<R, E>
    where
        C: Collection,
        E: From<StoreError>,
        F: FnOnce(&mut C) -> Result<R, E>,
    {
        let mut document: C = self.load(name)?;
        let result = f(&mut document)?;
        self.persist(name, &document)?;

        debug!(collection = name, "Collection written");
        Ok(result)
    }

    fn load<C: Collection>(&self, name: &str) -> Result<C, StoreError> {
        let path = self.document_path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(C::default()),
            Err(e) => return Err(StoreError::io(name, e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(C::default());
        }

        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            collection: name.to_string(),
            source,
        })
    }

    /// Write-then-rename in the same directory.
    fn persist<C: Collection>(&self, name: &str, document: &C) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|source| StoreError::Corrupt {
            collection: name.to_string(),
            source,
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(".tmp")
            .tempfile_in(self.root.as_path())
            .map_err(|e| StoreError::io(name, e))?;
        tmp.write_all(&bytes).map_err(|e| StoreError::io(name, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(name, e))?;
        tmp.persist(self.document_path(name))
            .map_err(|e| StoreError::io(name, e.error))?;

        Ok(())
    }
}

const DRAWINGS_DIR: &str = "drawings";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Counters = BTreeMap<String, u64>;

    fn counters() -> CollectionKey<Counters> {
        CollectionKey::new("counters")
    }

    #[derive(Debug, Error)]
    enum TestError {
        #[error("store: {0}")]
        Store(#[from] StoreError),
        #[error("refused")]
        Refused,
    }

    #[tokio::test]
    async fn missing_collection_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let snapshot = store.snapshot(&counters()).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn update_persists_and_returns_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        let value = store
            .with_exclusive_lock(&counters(), |c: &mut Counters| {
                *c.entry("hits".to_string()).or_default() += 1;
                Ok::<_, StoreError>(c["hits"])
            })
            .await
            .unwrap();
        assert_eq!(value, 1);

        let snapshot = store.snapshot(&counters()).await.unwrap();
        assert_eq!(snapshot["hits"], 1);
        assert!(dir.path().join("counters.json").exists());
    }

    #[tokio::test]
    async fn failed_mutation_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        store
            .with_exclusive_lock(&counters(), |c: &mut Counters| {
                c.insert("kept".to_string(), 1);
                Ok::<_, TestError>(())
            })
            .await
            .unwrap();

        let result = store
            .with_exclusive_lock(&counters(), |c: &mut Counters| {
                c.insert("dropped".to_string(), 2);
                Err::<(), _>(TestError::Refused)
            })
            .await;
        assert!(matches!(result, Err(TestError::Refused)));

        let snapshot = store.snapshot(&counters()).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains_key("dropped"));

        // The lock was released despite the error.
        store
            .with_exclusive_lock(&counters(), |_: &mut Counters| Ok::<_, TestError>(()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .with_exclusive_lock(&counters(), |c: &mut Counters| {
                        *c.entry("hits".to_string()).or_default() += 1;
                        Ok::<_, StoreError>(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = store.snapshot(&counters()).await.unwrap();
        assert_eq!(snapshot["hits"], 32);
    }

    #[tokio::test]
    async fn prepare_holds_off_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        let (release, released) = tokio::sync::oneshot::channel::<()>();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .with_exclusive_lock_after(
                        &counters(),
                        async move {
                            released.await.ok();
                            Ok::<_, StoreError>(10)
                        },
                        |c: &mut Counters, base| {
                            c.insert("hits".to_string(), base);
                            Ok::<_, StoreError>(())
                        },
                    )
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let bumper = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .with_exclusive_lock(&counters(), |c: &mut Counters| {
                        *c.entry("hits".to_string()).or_default() += 1;
                        Ok::<_, StoreError>(())
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!bumper.is_finished());

        release.send(()).unwrap();
        writer.await.unwrap().unwrap();
        bumper.await.unwrap().unwrap();

        let snapshot = store.snapshot(&counters()).await.unwrap();
        assert_eq!(snapshot["hits"], 11);
    }

    #[tokio::test]
    async fn failed_prepare_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();

        let result = store
            .with_exclusive_lock_after(
                &counters(),
                async { Err::<u64, _>(TestError::Refused) },
                |c: &mut Counters, n| {
                    c.insert("never".to_string(), n);
                    Ok(())
                },
            )
            .await;
        assert!(matches!(result, Err(TestError::Refused)));

        store
            .with_exclusive_lock(&counters(), |c: &mut Counters| {
                assert!(c.is_empty());
                Ok::<_, TestError>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("counters.json"), b"{not json").unwrap();

        let err = store.snapshot(&counters()).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn no_temp_files_are_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path()).unwrap();
        store
            .with_exclusive_lock(&counters(), |c: &mut Counters| {
                c.insert("a".to_string(), 1);
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
