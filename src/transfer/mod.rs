//! Transfer engine: HTTP download to a temp file, then re-upload to the chat.
//!
//! Both phases report a completion percentage through a [`ProgressReporter`],
//! filtered by a [`ThrottlePolicy`] and the user's last UI update stamp kept
//! by the [`SessionCoordinator`].

mod download;
mod throttle;
mod upload;

pub use download::Downloader;
pub use throttle::{percent_of, ThrottlePolicy};
pub use upload::{upload_document, ProgressReader};

use crate::session::SessionCoordinator;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that abort a transfer
#[derive(Debug, Error)]
pub enum TransferError {
    /// The file server answered with a non-success status
    #[error("Download failed with status {0}")]
    Status(reqwest::StatusCode),
    /// Network error while fetching the file
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The file server stopped sending data
    #[error("No data from the file server for {0:?}")]
    Stalled(Duration),
    /// Local file error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The chat platform rejected the upload
    #[error("Upload failed: {0}")]
    Upload(String),
}

impl TransferError {
    /// Short text that is safe to show to a chat user
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Status(status) if status.as_u16() == 404 => {
                "The file is no longer available on the server."
            }
            Self::Status(_) | Self::Http(_) => "The file server did not deliver the file.",
            Self::Stalled(_) => "The file server stopped responding.",
            Self::Io(_) => "The file could not be stored temporarily.",
            Self::Upload(_) => "Telegram did not accept the file.",
        }
    }
}

/// Which half of the transfer a progress value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Fetching the file from the catalog mirror
    Download,
    /// Sending the file to the chat
    Upload,
}

/// Receives throttled progress values
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Show `percent` for the given phase
    async fn report(&self, phase: TransferPhase, percent: u8) -> anyhow::Result<()>;
}

/// Applies the throttle policy for one phase of one user's transfer
pub struct ProgressGate<'a> {
    policy: ThrottlePolicy,
    session: &'a SessionCoordinator,
    user_id: i64,
    phase: TransferPhase,
    last_percent: Option<u8>,
}

impl<'a> ProgressGate<'a> {
    /// New gate; nothing has been reported yet for this phase
    #[must_use]
    pub const fn new(
        policy: ThrottlePolicy,
        session: &'a SessionCoordinator,
        user_id: i64,
        phase: TransferPhase,
    ) -> Self {
        Self {
            policy,
            session,
            user_id,
            phase,
            last_percent: None,
        }
    }

    /// Last percentage successfully shown
    #[must_use]
    pub const fn last_percent(&self) -> Option<u8> {
        self.last_percent
    }

    /// Offer a new value; reporter failures are logged and swallowed.
    pub async fn offer(&mut self, percent: u8, reporter: &dyn ProgressReporter) {
        let since = self
            .session
            .last_update(self.user_id)
            .await
            .map_or(Duration::MAX, |stamp| stamp.at.elapsed());

        if !self.policy.should_report(percent, self.last_percent, since) {
            return;
        }

        match reporter.report(self.phase, percent).await {
            Ok(()) => {
                debug!(user_id = self.user_id, phase = ?self.phase, percent, "Progress reported");
                self.last_percent = Some(percent);
                self.session.record_update(self.user_id, percent).await;
            }
            Err(e) => {
                warn!(
                    user_id = self.user_id,
                    phase = ?self.phase,
                    error = %e,
                    "Progress update failed"
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{ProgressReporter, TransferPhase};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// Reporter that records every value it is asked to show
    #[derive(Default)]
    pub struct RecordingReporter {
        pub reports: Mutex<Vec<(TransferPhase, u8)>>,
        pub fail: AtomicBool,
    }

    impl RecordingReporter {
        pub async fn percents(&self, phase: TransferPhase) -> Vec<u8> {
            self.reports
                .lock()
                .await
                .iter()
                .filter(|(p, _)| *p == phase)
                .map(|(_, v)| *v)
                .collect()
        }
    }

    #[async_trait]
    impl ProgressReporter for RecordingReporter {
        async fn report(&self, phase: TransferPhase, percent: u8) -> anyhow::Result<()> {
            self.reports.lock().await.push((phase, percent));
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("message is not modified");
            }
            Ok(())
        }
    }
}
