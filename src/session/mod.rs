pub mod content;
pub mod persist;
pub mod render;
pub mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::stream::events::StreamEvent;
use crate::stream::reducer::{reduce, Reduction};

use content::ContentStore;
use render::RenderScheduler;
use types::{Channel, Document};

/// Latest user-facing status message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub message: String,
    pub is_error: bool,
}

/// Batch-wide completion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub documents_done: usize,
    pub documents_total: usize,
    pub angles_done: usize,
    pub angles_total: usize,
}

impl Progress {
    pub fn describe(&self) -> String {
        format!(
            "{}/{} documents finished, {}/{} angles",
            self.documents_done, self.documents_total, self.angles_done, self.angles_total
        )
    }
}

/// All in-memory state of one analysis session.
///
/// Structural state and streamed text sit behind separate locks: a content
/// delta takes the document lock only long enough for the reducer's
/// lookup, and never forces a re-read of structure on its own. Every task
/// writes only to its own document and that document's channels.
pub struct Session {
    documents: RwLock<Vec<Document>>,
    content: RwLock<ContentStore>,
    render: RenderScheduler,
    analyzing: AtomicBool,
    status: RwLock<StatusLine>,
}

impl Session {
    pub fn new(frame: Duration) -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            content: RwLock::new(ContentStore::new()),
            render: RenderScheduler::new(frame),
            analyzing: AtomicBool::new(false),
            status: RwLock::new(StatusLine::default()),
        }
    }

    pub fn render(&self) -> &RenderScheduler {
        &self.render
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing.load(Ordering::Acquire)
    }

    /// Set the analyzing flag, returning its previous value.
    pub fn set_analyzing(&self, analyzing: bool) -> bool {
        self.analyzing.swap(analyzing, Ordering::AcqRel)
    }

    /// Replace every document and drop all accumulated content.
    pub async fn reset(&self, documents: Vec<Document>) {
        *self.documents.write().await = documents;
        self.content.write().await.clear();
        self.render.schedule();
    }

    /// Install a restored snapshot.
    pub async fn restore(&self, documents: Vec<Document>, content: ContentStore) {
        *self.documents.write().await = documents;
        *self.content.write().await = content;
        self.render.schedule();
    }

    /// Reduce one event into `doc_id` and route its content.
    pub async fn apply(&self, doc_id: &str, event: StreamEvent, now: i64) -> Reduction {
        let kind = event.kind();
        let reduction = {
            let mut documents = self.documents.write().await;
            match documents.iter_mut().find(|d| d.id == doc_id) {
                Some(doc) => reduce(doc, event, now),
                None => {
                    debug!(doc_id, kind, "event for unknown document ignored");
                    return Reduction::default();
                }
            }
        };

        if !reduction.appends.is_empty() {
            let mut content = self.content.write().await;
            for (channel, text) in &reduction.appends {
                content.append(doc_id, channel, text);
            }
        }
        if reduction.changed || !reduction.appends.is_empty() {
            self.render.schedule();
        }
        if let Some(message) = &reduction.status {
            self.set_status(message.clone(), false).await;
        }
        reduction
    }

    /// Run `f` on one document. Returns `None` if it does not exist.
    pub async fn update_document<R>(
        &self,
        doc_id: &str,
        f: impl FnOnce(&mut Document) -> R,
    ) -> Option<R> {
        let result = {
            let mut documents = self.documents.write().await;
            documents.iter_mut().find(|d| d.id == doc_id).map(f)
        };
        if result.is_some() {
            self.render.schedule();
        }
        result
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.documents.read().await.clone()
    }

    pub async fn document(&self, doc_id: &str) -> Option<Document> {
        self.documents
            .read()
            .await
            .iter()
            .find(|d| d.id == doc_id)
            .cloned()
    }

    /// Latest full text of one channel.
    pub async fn content(&self, doc_id: &str, channel: &Channel) -> String {
        self.content.read().await.get(doc_id, channel).to_string()
    }

    pub async fn snapshot(&self) -> (Vec<Document>, ContentStore) {
        let documents = self.documents.read().await.clone();
        let content = self.content.read().await.clone();
        (documents, content)
    }

    pub async fn clear(&self) {
        self.documents.write().await.clear();
        self.content.write().await.clear();
        self.render.schedule();
    }

    pub async fn set_status(&self, message: impl Into<String>, is_error: bool) {
        *self.status.write().await = StatusLine {
            message: message.into(),
            is_error,
        };
        self.render.schedule();
    }

    pub async fn status(&self) -> StatusLine {
        self.status.read().await.clone()
    }

    pub async fn progress(&self) -> Progress {
        let documents = self.documents.read().await;
        Progress {
            documents_done: documents.iter().filter(|d| d.is_terminal()).count(),
            documents_total: documents.len(),
            angles_done: documents.iter().map(Document::finished_angles).sum(),
            angles_total: documents.iter().map(|d| d.angles.len()).sum(),
        }
    }

    /// Whether a snapshot is worth saving now.
    pub async fn should_persist(&self) -> bool {
        !self.is_analyzing() && self.documents.read().await.iter().any(Document::is_terminal)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(render::DEFAULT_FRAME)
    }
}
