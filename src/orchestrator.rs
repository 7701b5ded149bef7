use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, CANCELLED_MESSAGE};
use crate::options::{AnalysisSettings, AnalyzeOptions, Connection};
use crate::session::persist::SessionStore;
use crate::session::types::{document_id, DocId, Document, DocumentStatus};
use crate::session::Session;
use crate::stream::decoder::{DecoderStats, FrameDecoder};

/// Raw body chunks of one analysis stream.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, AnalysisError>>;

const STREAM_ENDED_EARLY: &str = "Stream ended before the report completed";

/// One document as submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub content: Vec<u8>,
}

impl UploadFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, content })
    }
}

/// Opens the event stream for one document.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Fails with [`AnalysisError::Status`] when the server refuses the
    /// request, [`AnalysisError::Transport`] when it cannot be reached.
    async fn open_stream(
        &self,
        file: &UploadFile,
        options: &AnalyzeOptions,
    ) -> Result<ByteStream, AnalysisError>;
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub message: String,
}

/// Owns the stream tasks of a session, their cancellation and persistence.
pub struct Orchestrator {
    session: Arc<Session>,
    transport: Arc<dyn AnalysisTransport>,
    store: Option<Arc<SessionStore>>,
    connection: Connection,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        session: Arc<Session>,
        transport: Arc<dyn AnalysisTransport>,
        connection: Connection,
    ) -> Self {
        Self {
            session,
            transport,
            store: None,
            connection,
            cancel: Mutex::new(None),
        }
    }

    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Restore the persisted session, if any. Must run before [`start`](Self::start).
    pub async fn restore(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let Some(snapshot) = store.load().await else {
            return false;
        };
        let count = snapshot.documents.len();
        if count == 0 {
            return false;
        }
        self.session
            .restore(snapshot.documents, snapshot.content)
            .await;
        self.session
            .set_status(format!("Restored previous session ({} documents)", count), false)
            .await;
        true
    }

    /// Analyze `files`, one stream per document, and wait for all of them.
    ///
    /// Precondition failures return before any request is made. Failures of
    /// single documents do not fail the run: they end up on the document.
    pub async fn start(
        &self,
        files: Vec<UploadFile>,
        settings: &AnalysisSettings,
    ) -> Result<RunSummary, AnalysisError> {
        if let Err(e) = self.connection.validate() {
            self.session.set_status(e.to_string(), true).await;
            return Err(e);
        }
        if files.is_empty() {
            let e = AnalysisError::precondition("Select at least one document to analyze");
            self.session.set_status(e.to_string(), true).await;
            return Err(e);
        }
        let options = match settings.build_options(&self.connection) {
            Ok(options) => options,
            Err(e) => {
                self.session.set_status(e.to_string(), true).await;
                return Err(e);
            }
        };
        if self.session.set_analyzing(true) {
            return Err(AnalysisError::AlreadyRunning);
        }
        // Cancellable from the moment the session reports analyzing.
        let token = CancellationToken::new();
        *self.cancel_slot() = Some(token.clone());

        let submitted_at = now_ms();
        let angle_titles = options.angle_titles();
        let documents: Vec<Document> = files
            .iter()
            .enumerate()
            .map(|(i, f)| {
                Document::new(document_id(&f.content, i, submitted_at), &f.name, &angle_titles)
            })
            .collect();
        let doc_ids: Vec<DocId> = documents.iter().map(|d| d.id.clone()).collect();

        self.session.reset(documents).await;
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                warn!("Failed to clear persisted session: {:#}", e);
            }
        }

        info!(
            documents = files.len(),
            angles = angle_titles.len(),
            stream_mode = ?options.stream_mode,
            parallel_limit = options.parallel_limit,
            "analysis started"
        );
        self.session
            .set_status(format!("Analyzing {} document(s)...", files.len()), false)
            .await;

        let outcomes: Vec<Result<(), AnalysisError>> = if files.len() == 1 {
            vec![self.run_document(&doc_ids[0], &files[0], &options, &token).await]
        } else {
            join_all(
                doc_ids
                    .iter()
                    .zip(files.iter())
                    .map(|(id, file)| self.run_document(id, file, &options, &token)),
            )
            .await
        };

        let summary = self.summarize(&outcomes, token.is_cancelled()).await;
        *self.cancel_slot() = None;
        self.session.set_analyzing(false);

        let is_error = !summary.cancelled && summary.succeeded == 0;
        self.session.set_status(summary.message.clone(), is_error).await;
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "analysis finished"
        );
        self.persist().await;
        Ok(summary)
    }

    /// Cancel every in-flight stream at once. Never fails; a no-op when idle.
    pub fn cancel(&self) {
        if let Some(token) = self.cancel_slot().as_ref() {
            if !token.is_cancelled() {
                info!("cancelling analysis");
                token.cancel();
            }
        }
    }

    /// Forget every document, all content and the persisted snapshot.
    pub async fn clear(&self) {
        self.cancel();
        self.session.clear().await;
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                warn!("Failed to clear persisted session: {:#}", e);
            }
        }
        self.session.set_status("Output cleared", false).await;
    }

    /// Snapshot the session when nothing is running and something finished.
    pub async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if !self.session.should_persist().await {
            return;
        }
        let (documents, content) = self.session.snapshot().await;
        store.save(&documents, &content).await;
    }

    async fn run_document(
        &self,
        doc_id: &str,
        file: &UploadFile,
        options: &AnalyzeOptions,
        token: &CancellationToken,
    ) -> Result<(), AnalysisError> {
        match self.stream_one_document(doc_id, file, options, token).await {
            Ok(stats) => {
                let title = self
                    .session
                    .document(doc_id)
                    .await
                    .map(|d| d.title)
                    .unwrap_or_default();
                info!(
                    doc_id,
                    %title,
                    frames = stats.frames,
                    events = stats.events,
                    skipped = stats.skipped,
                    dropped = stats.dropped,
                    "document analysis finished"
                );
                Ok(())
            }
            Err(e) => {
                if e.is_cancelled() {
                    info!(doc_id, "document analysis cancelled");
                } else {
                    warn!(doc_id, error = %e, "document analysis failed");
                }
                let message = e.document_message();
                let now = now_ms();
                self.session
                    .update_document(doc_id, |doc| {
                        if !doc.is_terminal() {
                            doc.fail(message, now);
                        }
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Open one document's stream and pump it through the decoder and
    /// reducer until it ends. Every read races the cancellation token.
    async fn stream_one_document(
        &self,
        doc_id: &str,
        file: &UploadFile,
        options: &AnalyzeOptions,
        token: &CancellationToken,
    ) -> Result<DecoderStats, AnalysisError> {
        let started = now_ms();
        self.session
            .update_document(doc_id, |doc| {
                doc.status = DocumentStatus::Analyzing;
                doc.started_at = Some(started);
            })
            .await;

        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(AnalysisError::Cancelled),
            opened = self.transport.open_stream(file, options) => opened?,
        };
        debug!(doc_id, file = %file.name, "pumping analysis stream");

        let mut decoder = FrameDecoder::new();
        let mut finished = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(AnalysisError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            for event in decoder.push(&chunk?) {
                finished |= self.session.apply(doc_id, event, now_ms()).await.finished;
            }
        }
        if let Some(event) = decoder.finish() {
            finished |= self.session.apply(doc_id, event, now_ms()).await.finished;
        }

        if !finished {
            return Err(AnalysisError::Transport(STREAM_ENDED_EARLY.to_string()));
        }
        Ok(decoder.stats())
    }

    async fn summarize(
        &self,
        outcomes: &[Result<(), AnalysisError>],
        cancelled: bool,
    ) -> RunSummary {
        let total = outcomes.len();
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        let succeeded = total - failed;
        let message = if cancelled {
            "Analysis cancelled".to_string()
        } else if total == 1 {
            match &outcomes[0] {
                Ok(()) => {
                    let status = self.session.status().await;
                    if status.message.is_empty() {
                        "Analysis complete".to_string()
                    } else {
                        status.message
                    }
                }
                Err(e) => e.document_message(),
            }
        } else if failed == 0 {
            format!("{} documents analyzed", total)
        } else {
            format!("{}/{} documents analyzed, {} failed", succeeded, total, failed)
        };
        RunSummary {
            total,
            succeeded,
            failed,
            cancelled,
            message,
        }
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Message a cancelled document carries.
pub fn is_cancellation_message(message: Option<&str>) -> bool {
    message == Some(CANCELLED_MESSAGE)
}
