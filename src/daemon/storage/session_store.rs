use std::{
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::{Path, PathBuf},
};

use fs4::tokio::AsyncFileExt;
use serde_json::{Map, Value};
use tokio::fs::File;
use tracing::{debug, instrument, warn};

use crate::{
    daemon::error::{RecorderError, RecorderResult},
    fs::atomic::write_atomic,
};

use super::entities::Session;

/// Interface for abstracting durable storage of sessions.
pub trait SessionStore: Send + Sync + 'static {
    /// Persists the sessions, replacing records with the same id. Either all of them are written
    /// or the store is left untouched.
    fn append_or_update(
        &self,
        sessions: &[Session],
    ) -> impl Future<Output = RecorderResult<()>> + Send;

    /// Returns every readable session in the order they were first written. Malformed entries are
    /// skipped with a warning.
    fn snapshot(&self) -> impl Future<Output = RecorderResult<Vec<Session>>> + Send;
}

impl<T> SessionStore for T
where
    T: Deref + Send + Sync + 'static,
    T::Target: SessionStore,
{
    fn append_or_update(
        &self,
        sessions: &[Session],
    ) -> impl Future<Output = RecorderResult<()>> + Send {
        self.deref().append_or_update(sessions)
    }

    fn snapshot(&self) -> impl Future<Output = RecorderResult<Vec<Session>>> + Send {
        self.deref().snapshot()
    }
}

/// Stores all sessions in one JSON object keyed by session id. Every write replaces the file
/// atomically, and writers from different processes are serialized through a sidecar lock file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        Ok(Self { path, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> RecorderResult<Option<Map<String, Value>>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Some(Map::new())),
            Err(e) => return Err(RecorderError::persistence(&self.path, e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(Map::new()));
        }
        match serde_json::from_slice::<Map<String, Value>>(&bytes) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                warn!("Store file {:?} is not a JSON object: {e}", self.path);
                Ok(None)
            }
        }
    }

    /// Moves an unreadable store file aside so that recording can continue without destroying it.
    async fn quarantine(&self) -> RecorderResult<()> {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".corrupt-{}", chrono::Utc::now().timestamp()));
        let target = PathBuf::from(name);
        warn!("Moving unreadable store {:?} to {:?}", self.path, target);
        tokio::fs::rename(&self.path, &target)
            .await
            .map_err(|e| RecorderError::persistence(&self.path, e))
    }

    async fn upsert_locked(&self, sessions: &[Session]) -> RecorderResult<()> {
        let mut entries = match self.read_entries().await? {
            Some(entries) => entries,
            None => {
                self.quarantine().await?;
                Map::new()
            }
        };

        for session in sessions {
            let value = serde_json::to_value(session.to_entity()).map_err(|e| {
                RecorderError::persistence(&self.path, std::io::Error::other(e))
            })?;
            entries.insert(session.id().storage_key(), value);
        }

        let bytes = serde_json::to_vec(&entries)
            .map_err(|e| RecorderError::persistence(&self.path, std::io::Error::other(e)))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| RecorderError::persistence(&self.path, std::io::Error::other(e)))?
            .map_err(|e| RecorderError::persistence(&self.path, e))
    }
}

impl SessionStore for JsonFileStore {
    #[instrument(skip(self, sessions), fields(count = sessions.len()))]
    async fn append_or_update(&self, sessions: &[Session]) -> RecorderResult<()> {
        if sessions.is_empty() {
            return Ok(());
        }

        let lock = File::options()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .await
            .map_err(|e| RecorderError::persistence(&self.lock_path, e))?;

        // Semi-safe acquire-release for the lock file
        lock.lock_exclusive()
            .map_err(|e| RecorderError::persistence(&self.lock_path, e))?;
        let result = self.upsert_locked(sessions).await;
        lock.unlock_async()
            .await
            .map_err(|e| RecorderError::persistence(&self.lock_path, e))?;

        debug!("Persisted {} sessions into {:?}", sessions.len(), self.path);
        result
    }

    async fn snapshot(&self) -> RecorderResult<Vec<Session>> {
        let Some(entries) = self.read_entries().await? else {
            return Err(RecorderError::malformed(
                self.path.to_string_lossy(),
                "store file is not a JSON object",
            ));
        };

        let sessions = entries
            .iter()
            .filter_map(|(key, value)| match Session::from_entry(key, value) {
                Ok(session) => Some(session),
                Err(e) => {
                    // Foreign or hand-edited entries must not hide the rest of the data.
                    warn!("Skipping record in {:?}: {e}", self.path);
                    None
                }
            })
            .collect();
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use chrono::{DateTime, Duration};
    use tempfile::tempdir;

    use crate::daemon::{
        error::RecorderError,
        storage::{
            entities::Session,
            session_store::{JsonFileStore, SessionStore},
        },
    };

    fn session(app: &str, task: &str, start: i64, duration: i64) -> Session {
        Session::open(app.into(), task.into(), DateTime::from_timestamp(start, 0).unwrap())
            .with_duration(Duration::seconds(duration))
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_file_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonFileStore::new(dir.path().join("sessions.json"))?;

        assert!(store.snapshot().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_round_trip() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonFileStore::new(dir.path().join("sessions.json"))?;
        let sessions = vec![
            session("doc.txt", "write", 0, 10),
            session("news.com", "browse", 10, 5),
            session("my-app", "a-b-c", 15, 0),
        ];

        store.append_or_update(&sessions).await?;

        let reopened = JsonFileStore::new(dir.path().join("sessions.json"))?;
        let mut stored = reopened.snapshot().await?;
        let mut expected = sessions.clone();
        stored.sort_by_key(|s| s.start_time);
        expected.sort_by_key(|s| s.start_time);
        assert_eq!(stored, expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_replaces_in_place() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonFileStore::new(dir.path().join("sessions.json"))?;

        store
            .append_or_update(&[session("first", "a", 0, 1)])
            .await?;
        store
            .append_or_update(&[session("second", "b", 1, 1)])
            .await?;
        store
            .append_or_update(&[session("first", "a", 0, 9)])
            .await?;

        let stored = store.snapshot().await?;
        assert_eq!(
            stored,
            vec![session("first", "a", 0, 9), session("second", "b", 1, 1)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped_and_kept() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.json");
        fs::write(
            &path,
            r#"{"write-doc.txt":{"start_time":"100","duration":"20"},"bad-app":{"start_time":"x","duration":"1"}}"#,
        )?;
        let store = JsonFileStore::new(path.clone())?;

        assert_eq!(store.snapshot().await?, vec![session("doc.txt", "write", 100, 20)]);

        store
            .append_or_update(&[session("news.com", "browse", 200, 3)])
            .await?;

        let raw: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert!(raw.contains_key("bad-app"));
        assert_eq!(store.snapshot().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_range_duration_is_skipped() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.json");
        fs::write(
            &path,
            r#"{"ok-app":{"start_time":1,"duration":5},"big-app":{"start_time":1,"duration":"9223372036854775807"}}"#,
        )?;
        let store = JsonFileStore::new(path)?;

        assert_eq!(store.snapshot().await?, vec![session("app", "ok", 1, 5)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside_on_write() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.json");
        fs::write(&path, "{\"truncated\": {\"start_ti")?;
        let store = JsonFileStore::new(path.clone())?;

        assert!(matches!(
            store.snapshot().await,
            Err(RecorderError::MalformedRecord { .. })
        ));

        store
            .append_or_update(&[session("doc.txt", "write", 0, 1)])
            .await?;

        assert_eq!(store.snapshot().await?, vec![session("doc.txt", "write", 0, 1)]);
        let quarantined = fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(quarantined, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unwritable_store_reports_persistence_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sessions.json");
        fs::create_dir(&path)?;
        let store = JsonFileStore::new(path)?;

        let result = store
            .append_or_update(&[session("doc.txt", "write", 0, 1)])
            .await;

        assert!(matches!(result, Err(RecorderError::Persistence { .. })));
        Ok(())
    }
}
