//! On-disk persistence for identity registries.
//!
//! Each registry is written to its own JSON file, replaced atomically (write
//! to a temporary sibling, then rename). At startup the file is read into a
//! [`PersistedSnapshot`] that is handed to resync; it is never merged into
//! the live registry directly.

use log::{debug, info, warn};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::idx::{IdxEntry, NameToIdx};
use crate::task::{ConfigError, ConfigResult};

/// Current persisted file format version.
pub const FORMAT_VERSION: u32 = 1;

/// One persisted registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEntry<M> {
    pub name: String,
    pub index: u32,
    pub metadata: M,
}

/// File layout of a persisted registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedFile<M> {
    /// Format version for forward compatibility
    pub version: u32,
    /// Unix seconds at which the file was written
    pub saved_at: u64,
    /// Title of the registry the entries belong to
    pub registry: String,
    pub entries: Vec<PersistedEntry<M>>,
}

impl<M: Clone> PersistedFile<M> {
    fn from_entries(registry: &str, entries: Vec<IdxEntry<M>>) -> Self {
        Self {
            version: FORMAT_VERSION,
            saved_at: chrono::Utc::now().timestamp().max(0) as u64,
            registry: registry.to_string(),
            entries: entries
                .into_iter()
                .map(|e| PersistedEntry {
                    name: e.name,
                    index: e.index,
                    metadata: e.metadata,
                })
                .collect(),
        }
    }
}

/// Name to last-known index mapping loaded at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSnapshot<M> {
    entries: HashMap<String, (u32, M)>,
}

impl<M> Default for PersistedSnapshot<M> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<M> PersistedSnapshot<M> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, u32, M)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, index, metadata)| (name, (index, metadata)))
                .collect(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&(u32, M)> {
        self.entries.get(name)
    }

    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|(index, _)| *index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Returns the file path of the registry called `title` under `dir`.
pub fn snapshot_path(dir: &Path, title: &str) -> PathBuf {
    dir.join(format!("{}.json", title))
}

/// Serializes the registry and atomically replaces the file at `path`.
pub fn write_snapshot<M>(path: &Path, registry: &str, entries: Vec<IdxEntry<M>>) -> ConfigResult<()>
where
    M: Clone + Serialize,
{
    let persistence = |reason: String| ConfigError::Persistence {
        path: path.display().to_string(),
        reason,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| persistence(format!("failed to create {}: {}", parent.display(), e)))?;
    }

    let file = PersistedFile::from_entries(registry, entries);
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| persistence(format!("failed to serialize: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| persistence(format!("failed to write: {}", e)))?;
    fs::rename(&tmp, path).map_err(|e| persistence(format!("failed to rename: {}", e)))?;
    Ok(())
}

/// Reads a persisted registry file.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_snapshot<M: DeserializeOwned>(path: &Path) -> ConfigResult<Option<PersistedFile<M>>> {
    let json = match fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ConfigError::Persistence {
                path: path.display().to_string(),
                reason: format!("failed to read: {}", e),
            })
        }
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(|e| ConfigError::Persistence {
            path: path.display().to_string(),
            reason: format!("malformed: {}", e),
        })
}

/// Loads the snapshot at `path`.
///
/// A missing, unreadable or malformed file yields an empty snapshot, which
/// resync treats as a cold start.
pub fn load_snapshot<M: DeserializeOwned>(path: &Path) -> PersistedSnapshot<M> {
    match read_snapshot::<M>(path) {
        Ok(Some(file)) => {
            if file.version > FORMAT_VERSION {
                warn!(
                    "{} has format version {}, newer than {}; ignoring",
                    path.display(),
                    file.version,
                    FORMAT_VERSION
                );
                return PersistedSnapshot::empty();
            }
            info!(
                "loaded {} persisted entries for {}",
                file.entries.len(),
                file.registry
            );
            PersistedSnapshot::from_entries(
                file.entries
                    .into_iter()
                    .map(|e| (e.name, e.index, e.metadata)),
            )
        }
        Ok(None) => PersistedSnapshot::empty(),
        Err(e) => {
            warn!("{}; starting without persisted state", e);
            PersistedSnapshot::empty()
        }
    }
}

/// Timing of the persistence loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistConfig {
    pub interval: Duration,
    /// Upper bound of the random delay before the first write
    pub max_jitter: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            max_jitter: Duration::from_secs(3),
        }
    }
}

/// Handle of a running persistence loop.
#[derive(Debug)]
pub struct PersistHandle {
    path: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PersistHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops the loop after a final flush.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!("persistence loop for {} ended abnormally: {}", self.path.display(), e);
        }
    }
}

struct Flusher<M> {
    registry: Arc<NameToIdx<M>>,
    path: PathBuf,
    written: Option<u64>,
}

impl<M> Flusher<M>
where
    M: Clone + Serialize + Send + Sync + 'static,
{
    async fn flush(&mut self) {
        let version = self.registry.version();
        if self.written == Some(version) {
            return;
        }
        // Copy under the lock, write outside it.
        let entries = self.registry.snapshot();
        let title = self.registry.title().to_string();
        let path = self.path.clone();
        let result =
            tokio::task::spawn_blocking(move || write_snapshot(&path, &title, entries)).await;
        match result {
            Ok(Ok(())) => {
                debug!("persisted {} at version {}", self.registry.title(), version);
                self.written = Some(version);
            }
            Ok(Err(e)) => warn!("{}", e),
            Err(e) => warn!("persistence write task failed: {}", e),
        }
    }
}

/// Spawns the background loop persisting `registry` to `path`.
///
/// The first write is delayed by a random jitter up to
/// `config.max_jitter`; afterwards the registry is written every
/// `config.interval` whenever its version changed since the last write.
pub fn spawn_persist_loop<M>(
    registry: Arc<NameToIdx<M>>,
    path: PathBuf,
    config: PersistConfig,
) -> PersistHandle
where
    M: Clone + Serialize + Send + Sync + 'static,
{
    let jitter = {
        let max = config.max_jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    };
    spawn_with_jitter(registry, path, config.interval, jitter)
}

fn spawn_with_jitter<M>(
    registry: Arc<NameToIdx<M>>,
    path: PathBuf,
    interval: Duration,
    jitter: Duration,
) -> PersistHandle
where
    M: Clone + Serialize + Send + Sync + 'static,
{
    let (tx, mut rx) = oneshot::channel();
    let mut flusher = Flusher {
        registry,
        path: path.clone(),
        written: None,
    };

    let task = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(jitter) => {}
            _ = &mut rx => {
                flusher.flush().await;
                return;
            }
        }
        loop {
            flusher.flush().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut rx => {
                    flusher.flush().await;
                    return;
                }
            }
        }
    });

    PersistHandle {
        path,
        shutdown: Some(tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path(), "interfaces");
        let registry: NameToIdx<String> = NameToIdx::new("interfaces");
        registry.register_name("eth0", 3, "loopback".to_string());
        registry.register_name("memif1", 7, "memif".to_string());

        write_snapshot(&path, registry.title(), registry.snapshot()).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let snapshot: PersistedSnapshot<String> = load_snapshot(&path);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.index_of("eth0"), Some(3));
        assert_eq!(snapshot.lookup("memif1"), Some(&(7, "memif".to_string())));
    }

    #[test]
    fn test_missing_and_malformed_files_are_empty() {
        let dir = TempDir::new().unwrap();
        let missing: PersistedSnapshot<()> = load_snapshot(&dir.path().join("nope.json"));
        assert!(missing.is_empty());

        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let malformed: PersistedSnapshot<()> = load_snapshot(&path);
        assert!(malformed.is_empty());
        assert!(matches!(
            read_snapshot::<()>(&path),
            Err(ConfigError::Persistence { .. })
        ));
    }

    #[test]
    fn test_newer_format_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.json");
        fs::write(
            &path,
            r#"{"version":99,"saved_at":0,"registry":"x","entries":[{"name":"a","index":1,"metadata":null}]}"#,
        )
        .unwrap();
        let snapshot: PersistedSnapshot<()> = load_snapshot(&path);
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path(), "stn");
        let registry = Arc::new(NameToIdx::<u32>::new("stn"));
        let handle = spawn_persist_loop(
            registry.clone(),
            path.clone(),
            PersistConfig {
                interval: Duration::from_secs(3600),
                max_jitter: Duration::from_secs(3600),
            },
        );
        registry.register_name("stn-iface-loop1", 0, 4);
        handle.shutdown().await;

        let snapshot: PersistedSnapshot<u32> = load_snapshot(&path);
        assert_eq!(snapshot.lookup("stn-iface-loop1"), Some(&(0, 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_written_before_jitter() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path(), "interfaces");
        let registry = Arc::new(NameToIdx::<u32>::new("interfaces"));
        registry.register_name("loop1", 1, 0);
        let handle = spawn_with_jitter(
            registry.clone(),
            path.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(2),
        );
        // Let the loop arm its first timer at the current instant.
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(1999)).await;
        tokio::task::yield_now().await;
        assert!(!path.exists());

        tokio::time::advance(Duration::from_millis(1)).await;
        for _ in 0..1000 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(path.exists());
        handle.shutdown().await;

        let snapshot: PersistedSnapshot<u32> = load_snapshot(&path);
        assert_eq!(snapshot.index_of("loop1"), Some(1));
    }

    #[tokio::test]
    async fn test_loop_picks_up_changes() {
        let dir = TempDir::new().unwrap();
        let path = snapshot_path(dir.path(), "bfd");
        let registry = Arc::new(NameToIdx::<()>::new("bfd"));
        let handle = spawn_persist_loop(
            registry.clone(),
            path.clone(),
            PersistConfig {
                interval: Duration::from_millis(10),
                max_jitter: Duration::ZERO,
            },
        );

        registry.register_name("session-1", 1, ());
        let mut found = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let snapshot: PersistedSnapshot<()> = load_snapshot(&path);
            if snapshot.index_of("session-1") == Some(1) {
                found = true;
                break;
            }
        }
        handle.shutdown().await;
        assert!(found);
    }
}
