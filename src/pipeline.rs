//! One download interaction, from button press to cleanup.
//!
//! ```text
//! Locked -> Searching -> NotFound | NoLink
//!                     -> Downloading -> Failed
//!                     -> Uploading   -> Failed
//!                     -> Delivered   -> auto-delete, audit log
//! ```
//!
//! Every path releases the user lock and removes the temp file.

use crate::bot::transport::ChatTransport;
use crate::bot::views::{
    self, QueryRef, BOOK_NOT_FOUND, DOWNLOAD_STARTED, NO_DIRECT_LINK, PREPARING, UPLOAD_STARTED,
};
use crate::catalog::{CatalogError, CatalogService, QueryRegistry, SearchResult};
use crate::config::{Settings, FAILURE_PAUSE_SECS};
use crate::lifecycle::{AuditLogger, AutoDeleteScheduler, Requester, TempFile};
use crate::session::SessionCoordinator;
use crate::transfer::{
    upload_document, Downloader, ProgressGate, ProgressReporter, ThrottlePolicy, TransferError,
    TransferPhase,
};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{ChatId, MessageId};
use tracing::{error, info, warn};

/// A button press to serve
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Chat the file goes to
    pub chat: ChatId,
    /// Message the progress message replies to
    pub reply_to: Option<MessageId>,
    /// User who pressed the button
    pub requester: Requester,
    /// Query the button belongs to
    pub query: QueryRef,
    /// Index into the query's results
    pub index: usize,
}

/// How an interaction ended
#[derive(Debug)]
pub enum Outcome {
    /// The query is unknown or the index is out of range
    NotFound,
    /// The entry has no direct download
    NoLink,
    /// The catalog could not be queried
    CatalogFailed(CatalogError),
    /// Download or upload failed
    Failed(TransferError),
    /// The file reached the chat
    Delivered(MessageId),
}

/// Tunables of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Progress throttle for both phases
    pub throttle: ThrottlePolicy,
    /// Root of the temp files
    pub download_dir: PathBuf,
    /// How long a failure message stays before cleanup
    pub failure_pause: Duration,
}

impl PipelineConfig {
    /// Values taken from the settings
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            throttle: settings.throttle_policy(),
            download_dir: settings.download_dir.clone(),
            failure_pause: Duration::from_secs(FAILURE_PAUSE_SECS),
        }
    }
}

/// Edits the progress message of one interaction
struct MessageProgress<'a, T> {
    transport: &'a T,
    chat: ChatId,
    message: MessageId,
}

#[async_trait]
impl<'a, T: ChatTransport> ProgressReporter for MessageProgress<'a, T> {
    async fn report(&self, phase: TransferPhase, percent: u8) -> Result<()> {
        let text = match phase {
            TransferPhase::Download => views::download_progress(percent),
            TransferPhase::Upload => views::upload_progress(percent),
        };
        self.transport.edit_text(self.chat, self.message, &text).await
    }
}

struct Job<'a> {
    chat: ChatId,
    user_id: i64,
    progress: MessageId,
    book: &'a SearchResult,
}

/// Serves download button presses
pub struct DownloadPipeline<T: ChatTransport> {
    catalog: Arc<CatalogService>,
    registry: QueryRegistry,
    session: Arc<SessionCoordinator>,
    transport: Arc<T>,
    downloader: Downloader,
    scheduler: Arc<AutoDeleteScheduler<T>>,
    audit: AuditLogger<T>,
    config: PipelineConfig,
}

impl<T: ChatTransport> DownloadPipeline<T> {
    /// Assemble a pipeline from its collaborators
    #[must_use]
    pub fn new(
        catalog: Arc<CatalogService>,
        registry: QueryRegistry,
        session: Arc<SessionCoordinator>,
        transport: Arc<T>,
        scheduler: Arc<AutoDeleteScheduler<T>>,
        audit: AuditLogger<T>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog,
            registry,
            session,
            transport,
            downloader: Downloader::new(),
            scheduler,
            audit,
            config,
        }
    }

    /// Per-user coordination shared with the handlers
    #[must_use]
    pub fn session(&self) -> &SessionCoordinator {
        &self.session
    }

    /// Chat transport the pipeline reports through
    #[must_use]
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Serve one button press while holding the user's lock.
    ///
    /// # Errors
    ///
    /// Returns an error only if the first progress message cannot be sent.
    pub async fn run(&self, request: DownloadRequest) -> Result<Outcome> {
        let user_id = request.requester.user_id;
        self.session
            .with_user_lock(user_id, self.run_locked(&request))
            .await
    }

    async fn run_locked(&self, request: &DownloadRequest) -> Result<Outcome> {
        let chat = request.chat;
        let user_id = request.requester.user_id;
        let progress = self
            .transport
            .send_text(chat, PREPARING, request.reply_to)
            .await?;

        let query = match &request.query {
            QueryRef::Inline(query) => Some(query.clone()),
            QueryRef::Registered(key) => self.registry.resolve(key).await,
        };
        let Some(query) = query else {
            self.show(chat, progress, BOOK_NOT_FOUND).await;
            return Ok(Outcome::NotFound);
        };

        let results = match self.catalog.lookup(user_id, &query).await {
            Ok(results) => results,
            Err(e) => return Ok(self.catalog_failed(chat, progress, e).await),
        };
        let Some(book) = results.get(request.index) else {
            info!(user_id, index = request.index, count = results.len(), "Button index out of range");
            self.show(chat, progress, BOOK_NOT_FOUND).await;
            return Ok(Outcome::NotFound);
        };

        let link = match self.catalog.resolve_direct_link(book).await {
            Ok(Some(link)) => link,
            Ok(None) => {
                info!(user_id, title = %book.title, "No direct download link");
                self.show(chat, progress, NO_DIRECT_LINK).await;
                return Ok(Outcome::NoLink);
            }
            Err(e) => return Ok(self.catalog_failed(chat, progress, e).await),
        };

        let job = Job {
            chat,
            user_id,
            progress,
            book,
        };
        // Removed on every path below, including panics and cancellation
        let temp = TempFile::for_book(&self.config.download_dir, user_id, book);

        match self.transfer(&job, &link, &temp).await {
            Ok(delivered) => {
                info!(user_id, title = %book.title, "Book delivered");
                self.after_delivery(&job, delivered, &request.requester).await;
                Ok(Outcome::Delivered(delivered))
            }
            Err(e) => {
                error!(user_id, title = %book.title, error = %e, "Download error");
                self.show(chat, progress, &views::download_failed(e.user_message()))
                    .await;
                tokio::time::sleep(self.config.failure_pause).await;
                Ok(Outcome::Failed(e))
            }
        }
    }

    async fn transfer(
        &self,
        job: &Job<'_>,
        link: &str,
        temp: &TempFile,
    ) -> Result<MessageId, TransferError> {
        let reporter = MessageProgress {
            transport: self.transport.as_ref(),
            chat: job.chat,
            message: job.progress,
        };

        self.show(job.chat, job.progress, DOWNLOAD_STARTED).await;
        let mut gate = ProgressGate::new(
            self.config.throttle,
            &self.session,
            job.user_id,
            TransferPhase::Download,
        );
        self.downloader
            .download(link, temp.path(), &mut gate, &reporter)
            .await?;

        self.show(job.chat, job.progress, UPLOAD_STARTED).await;
        let mut gate = ProgressGate::new(
            self.config.throttle,
            &self.session,
            job.user_id,
            TransferPhase::Upload,
        );
        upload_document(
            self.transport.as_ref(),
            job.chat,
            temp.path(),
            temp.file_name(),
            &views::document_caption(job.book),
            &mut gate,
            &reporter,
        )
        .await
    }

    async fn after_delivery(&self, job: &Job<'_>, delivered: MessageId, requester: &Requester) {
        if let Err(e) = self.scheduler.schedule(job.chat, delivered).await {
            error!(user_id = job.user_id, error = %e, "Failed to schedule auto-delete");
        }
        self.audit
            .log_download(job.chat, delivered, job.book, requester)
            .await;
        if let Err(e) = self.transport.delete(job.chat, job.progress).await {
            warn!(user_id = job.user_id, error = %e, "Failed to remove progress message");
        }
    }

    async fn catalog_failed(&self, chat: ChatId, progress: MessageId, e: CatalogError) -> Outcome {
        error!(chat_id = chat.0, error = %e, "Catalog error during download");
        self.show(chat, progress, &views::search_failed(e.user_message()))
            .await;
        Outcome::CatalogFailed(e)
    }

    async fn show(&self, chat: ChatId, message: MessageId, text: &str) {
        if let Err(e) = self.transport.edit_text(chat, message, text).await {
            warn!(chat_id = chat.0, error = %e, "Progress message update failed");
        }
    }
}
