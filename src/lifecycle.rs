//! Post-delivery housekeeping
//!
//! Delayed deletion of delivered files, the audit copy sent to the log
//! channel and the temp file guard.

use crate::bot::transport::ChatTransport;
use crate::bot::views::audit_caption;
use crate::catalog::SearchResult;
use crate::config::{Settings, DEFAULT_EXTENSION, FILE_NAME_MAX_CHARS};
use crate::utils::{sanitize_extension, sanitize_file_stem};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{ChatId, MessageId};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Who asked for a download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    /// Telegram user id
    pub user_id: i64,
    /// Display name
    pub name: String,
}

/// Deletes delivered files after a delay.
///
/// Pending deletions are tracked; [`AutoDeleteScheduler::shutdown`] cancels
/// them and waits until every task has finished.
pub struct AutoDeleteScheduler<T: ChatTransport> {
    transport: Arc<T>,
    delay: Option<Duration>,
    notice: String,
    deleted_text: String,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl<T: ChatTransport> AutoDeleteScheduler<T> {
    /// Scheduler that waits `delay` (`None` disables deletion)
    #[must_use]
    pub fn new(transport: Arc<T>, delay: Option<Duration>, notice: String, deleted_text: String) -> Self {
        Self {
            transport,
            delay,
            notice,
            deleted_text,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Scheduler configured from the auto-delete settings
    #[must_use]
    pub fn from_settings(transport: Arc<T>, settings: &Settings) -> Self {
        Self::new(
            transport,
            settings.auto_delete_delay(),
            settings.render_auto_delete_notice(),
            settings.file_deleted_msg.clone(),
        )
    }

    /// Announce and schedule the deletion of `document`.
    ///
    /// Returns `false` when auto-delete is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the notice cannot be sent; nothing is scheduled then.
    pub async fn schedule(&self, chat: ChatId, document: MessageId) -> Result<bool> {
        let Some(delay) = self.delay else {
            return Ok(false);
        };

        let notice = self
            .transport
            .send_text(chat, &self.notice, Some(document))
            .await?;

        let transport = self.transport.clone();
        let cancel = self.cancel.clone();
        let deleted_text = self.deleted_text.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    warn!(
                        chat_id = chat.0,
                        message_id = document.0,
                        "Shutting down, delivered file will not be auto-deleted"
                    );
                    return;
                }
            }

            if let Err(e) = transport.delete(chat, document).await {
                error!(chat_id = chat.0, error = %e, "Auto-delete failed");
                return;
            }
            if let Err(e) = transport.edit_text(chat, notice, &deleted_text).await {
                error!(chat_id = chat.0, error = %e, "Failed to update auto-delete notice");
                return;
            }
            debug!(chat_id = chat.0, message_id = document.0, "Delivered file auto-deleted");
        });

        info!(
            chat_id = chat.0,
            delay_secs = delay.as_secs(),
            "Auto-delete scheduled"
        );
        Ok(true)
    }

    /// Number of deletions still waiting
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel pending deletions and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        let pending = self.tracker.len();
        if pending > 0 {
            info!(pending, "Cancelling pending auto-deletions");
        }
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Sends a copy of every delivered file to the log channel
pub struct AuditLogger<T: ChatTransport> {
    transport: Arc<T>,
    channel: ChatId,
    bot_name: String,
}

impl<T: ChatTransport> AuditLogger<T> {
    /// Logger posting to `channel` and signing with `bot_name`
    #[must_use]
    pub const fn new(transport: Arc<T>, channel: ChatId, bot_name: String) -> Self {
        Self {
            transport,
            channel,
            bot_name,
        }
    }

    /// Copy the delivered message to the log channel. Failures are only logged.
    pub async fn log_download(
        &self,
        chat: ChatId,
        delivered: MessageId,
        book: &SearchResult,
        requester: &Requester,
    ) {
        let caption = audit_caption(book, requester.user_id, &requester.name, &self.bot_name);
        match self
            .transport
            .copy_document(self.channel, chat, delivered, &caption)
            .await
        {
            Ok(_) => debug!(user_id = requester.user_id, "Download logged"),
            Err(e) => error!(
                user_id = requester.user_id,
                channel = self.channel.0,
                error = %e,
                "Failed to send log"
            ),
        }
    }
}

/// A temp file that is removed when the guard goes out of scope
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    owns_parent: bool,
}

impl TempFile {
    /// Guard for an arbitrary path
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path,
            owns_parent: false,
        }
    }

    /// `<dir>/<user_id>/<sanitized title>.<extension>`
    ///
    /// The per-user directory is removed with the file once it is empty.
    #[must_use]
    pub fn for_book(dir: &Path, user_id: i64, book: &SearchResult) -> Self {
        let stem = sanitize_file_stem(&book.title, FILE_NAME_MAX_CHARS);
        let extension = sanitize_extension(&book.extension, DEFAULT_EXTENSION);
        Self {
            path: dir.join(user_id.to_string()).join(format!("{stem}.{extension}")),
            owns_parent: true,
        }
    }

    /// Location of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name part of the path
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Temp file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temp file"),
        }

        let Some(parent) = self.path.parent().filter(|_| self.owns_parent) else {
            return;
        };
        match std::fs::remove_dir(parent) {
            Ok(()) => debug!(dir = %parent.display(), "User directory removed"),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::DirectoryNotEmpty
                ) => {}
            Err(e) => warn!(dir = %parent.display(), error = %e, "Failed to remove user directory"),
        }
    }
}
