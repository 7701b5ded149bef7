use std::path::Path;

use anyhow::{Context, Result};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::content::ContentStore;
use super::types::{Document, DocumentStatus};

// The snapshot lives in its own substore.
const SESSION_PREFIX: &str = "session";
const SNAPSHOT_KEY: &str = "session/snapshot";

/// Snapshots older than this are discarded on load.
pub const SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Message given to documents that were mid-stream when the session was saved.
pub const INTERRUPTED_MESSAGE: &str = "Session interrupted, please analyze again";

/// Everything needed to redraw a finished session after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub documents: Vec<Document>,
    pub content: ContentStore,
    /// Epoch millis.
    pub saved_at: i64,
}

impl SessionSnapshot {
    /// Decode a stored record as of `now`.
    ///
    /// `None` if it does not parse or has outlived [`SESSION_TTL_MS`].
    /// Documents that were still in flight come back as failed: an
    /// interrupted stream can only be reported, never resumed.
    pub fn restore(raw: &[u8], now: i64) -> Option<Self> {
        let mut snapshot: SessionSnapshot = match serde_json::from_slice(raw) {
            Ok(s) => s,
            Err(e) => {
                warn!("Discarding unreadable session snapshot: {}", e);
                return None;
            }
        };
        if now - snapshot.saved_at > SESSION_TTL_MS {
            debug!(saved_at = snapshot.saved_at, "session snapshot expired");
            return None;
        }
        for doc in snapshot.documents.iter_mut() {
            if matches!(doc.status, DocumentStatus::Analyzing | DocumentStatus::Pending) {
                doc.fail(INTERRUPTED_MESSAGE, snapshot.saved_at);
            }
        }
        Some(snapshot)
    }
}

/// Durable single-record store for the session snapshot.
pub struct SessionStore {
    storage: Storage,
}

impl SessionStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let storage = Storage::load(data_dir.to_path_buf(), vec![SESSION_PREFIX.to_string()])
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self { storage })
    }

    /// Persist the session. Failures are logged and otherwise ignored.
    pub async fn save(&self, documents: &[Document], content: &ContentStore) {
        let now = chrono::Utc::now().timestamp_millis();
        if let Err(e) = self.try_save(documents, content, now).await {
            warn!("Failed to save session snapshot: {:#}", e);
        }
    }

    async fn try_save(
        &self,
        documents: &[Document],
        content: &ContentStore,
        saved_at: i64,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            documents: &'a [Document],
            content: &'a ContentStore,
            saved_at: i64,
        }
        let bytes = serde_json::to_vec(&SnapshotRef {
            documents,
            content,
            saved_at,
        })
        .context("serialize session snapshot")?;
        self.put(bytes).await?;
        debug!(
            documents = documents.len(),
            channels = content.channel_count(),
            "session snapshot saved"
        );
        Ok(())
    }

    /// Load the last snapshot, if there is a usable one.
    pub async fn load(&self) -> Option<SessionSnapshot> {
        self.load_at(chrono::Utc::now().timestamp_millis()).await
    }

    pub async fn load_at(&self, now: i64) -> Option<SessionSnapshot> {
        let snapshot = self.storage.latest_snapshot();
        let raw = match snapshot.get_raw(SNAPSHOT_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read session snapshot: {}", e);
                return None;
            }
        };
        let restored = SessionSnapshot::restore(&raw, now)?;
        info!(documents = restored.documents.len(), "session snapshot restored");
        Some(restored)
    }

    /// Drop the stored snapshot.
    pub async fn clear(&self) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.delete(SNAPSHOT_KEY.to_string());
        self.storage.commit(delta).await?;
        debug!("session snapshot cleared");
        Ok(())
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(SNAPSHOT_KEY.to_string(), bytes);
        self.storage.commit(delta).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{AngleStatus, Channel};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn finished_and_interrupted() -> (Vec<Document>, ContentStore) {
        let mut done = Document::new("d1".into(), "one.pdf", &["A"]);
        done.angles[0].status = AngleStatus::Done;
        done.status = DocumentStatus::Done;
        let mut running = Document::new("d2".into(), "two.pdf", &["A", "B"]);
        running.status = DocumentStatus::Analyzing;
        running.angles[0].status = AngleStatus::Streaming;
        running.angles[0].started_at = Some(1);

        let mut content = ContentStore::new();
        content.append("d1", &Channel::angle("A"), "finished text");
        content.append("d2", &Channel::angle("A"), "half");
        (vec![done, running], content)
    }

    fn encode(documents: Vec<Document>, content: ContentStore, saved_at: i64) -> Vec<u8> {
        serde_json::to_vec(&SessionSnapshot {
            documents,
            content,
            saved_at,
        })
        .unwrap()
    }

    #[test]
    fn test_expired_snapshot_is_discarded() {
        let (docs, content) = finished_and_interrupted();
        let now = 1_000 * HOUR_MS;
        let raw = encode(docs, content, now - 25 * HOUR_MS);
        assert!(SessionSnapshot::restore(&raw, now).is_none());
    }

    #[test]
    fn test_fresh_snapshot_normalizes_in_flight_documents() {
        let (docs, content) = finished_and_interrupted();
        let now = 1_000 * HOUR_MS;
        let raw = encode(docs, content, now - 23 * HOUR_MS);
        let restored = SessionSnapshot::restore(&raw, now).unwrap();

        assert_eq!(restored.documents[0].status, DocumentStatus::Done);
        let d2 = &restored.documents[1];
        assert_eq!(d2.status, DocumentStatus::Error);
        assert_eq!(d2.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(d2.angles.iter().all(|a| a.status == AngleStatus::Error));
        assert_eq!(restored.content.get("d2", &Channel::angle("A")), "half");
    }

    #[test]
    fn test_garbage_is_discarded() {
        assert!(SessionSnapshot::restore(b"{not json", 0).is_none());
        assert!(SessionSnapshot::restore(b"{}", 0).is_none());
    }

    #[tokio::test]
    async fn test_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();
        assert!(store.load().await.is_none());

        let (docs, content) = finished_and_interrupted();
        store.save(&docs, &content).await;
        let restored = store.load().await.unwrap();
        assert_eq!(restored.documents.len(), 2);
        assert_eq!(restored.documents[1].status, DocumentStatus::Error);
        assert_eq!(
            restored.content.get("d1", &Channel::angle("A")),
            "finished text"
        );

        let later = restored.saved_at + 25 * HOUR_MS;
        assert!(store.load_at(later).await.is_none());

        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }
}
