use super::{percent_of, ProgressGate, ProgressReporter, TransferError};
use crate::config::{DOWNLOAD_CHUNK_SIZE, DOWNLOAD_CONNECT_TIMEOUT_SECS, DOWNLOAD_IDLE_TIMEOUT_SECS};
use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::Client as HttpClient;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{info, instrument};

/// Streams files from a URL to local disk
#[derive(Clone)]
pub struct Downloader {
    http: HttpClient,
    chunk_size: usize,
    idle_timeout: Duration,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    /// Downloader with the default timeouts and 1 MiB chunks
    #[must_use]
    pub fn new() -> Self {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(DOWNLOAD_CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            http,
            chunk_size: DOWNLOAD_CHUNK_SIZE,
            idle_timeout: Duration::from_secs(DOWNLOAD_IDLE_TIMEOUT_SECS),
        }
    }

    /// Give up when the server sends nothing for `idle_timeout`
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Write the body of `url` to `dest`, returning the number of bytes written.
    ///
    /// Progress is offered after every chunk written to disk. Nothing is
    /// reported when the server does not announce the content length.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Status` for a non-success response,
    /// `TransferError::Stalled` when the server goes quiet for longer than
    /// the idle timeout and network or file errors as they occur.
    #[instrument(skip(self, dest, progress, reporter), fields(dest = %dest.display()))]
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: &mut ProgressGate<'_>,
        reporter: &dyn ProgressReporter,
    ) -> Result<u64, TransferError> {
        let idle = self.idle_timeout;
        let response = timeout(idle, self.http.get(url).send())
            .await
            .map_err(|_| TransferError::Stalled(idle))??;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status));
        }
        let total = response.content_length().filter(|t| *t > 0);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::with_capacity(self.chunk_size);
        let mut written: u64 = 0;

        while let Some(piece) = timeout(idle, stream.next())
            .await
            .map_err(|_| TransferError::Stalled(idle))?
        {
            buffer.extend_from_slice(&piece?);
            while buffer.len() >= self.chunk_size {
                let chunk = buffer.split_to(self.chunk_size);
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
                if let Some(percent) = percent_of(written, total) {
                    progress.offer(percent, reporter).await;
                }
            }
        }

        if !buffer.is_empty() {
            file.write_all(&buffer).await?;
            written += buffer.len() as u64;
            if let Some(percent) = percent_of(written, total) {
                progress.offer(percent, reporter).await;
            }
        }
        file.flush().await?;

        info!(bytes = written, "Download finished");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCoordinator;
    use crate::transfer::testing::RecordingReporter;
    use crate::transfer::{ThrottlePolicy, TransferPhase};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gate(session: &SessionCoordinator) -> ProgressGate<'_> {
        ProgressGate::new(ThrottlePolicy::default(), session, 1, TransferPhase::Download)
    }

    #[tokio::test]
    async fn streams_body_and_reports_each_chunk() {
        let server = MockServer::start().await;
        let body = vec![7u8; 4 * DOWNLOAD_CHUNK_SIZE + DOWNLOAD_CHUNK_SIZE / 2];
        Mock::given(method("GET"))
            .and(path("/get.php"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let dest = dir.path().join("nested").join("book.epub");
        let session = SessionCoordinator::default();
        let reporter = RecordingReporter::default();
        let mut gate = gate(&session);

        let written = Downloader::new()
            .download(&format!("{}/get.php", server.uri()), &dest, &mut gate, &reporter)
            .await
            .expect("download");

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).expect("read back"), body);
        let percents = reporter.percents(TransferPhase::Download).await;
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(percents.len(), 5);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let session = SessionCoordinator::default();
        let reporter = RecordingReporter::default();
        let mut gate = gate(&session);

        let result = Downloader::new()
            .download(&server.uri(), &dir.path().join("x.pdf"), &mut gate, &reporter)
            .await;

        assert!(matches!(result, Err(TransferError::Status(s)) if s.as_u16() == 404));
        assert!(!dir.path().join("x.pdf").exists());
        assert!(reporter.reports.lock().await.is_empty());
    }

    #[tokio::test]
    async fn silent_server_is_abandoned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1u8; 1024])
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let session = SessionCoordinator::default();
        let reporter = RecordingReporter::default();
        let mut gate = gate(&session);
        let started = std::time::Instant::now();

        let result = Downloader::new()
            .with_idle_timeout(Duration::from_millis(300))
            .download(&server.uri(), &dir.path().join("x.pdf"), &mut gate, &reporter)
            .await;

        assert!(matches!(result, Err(TransferError::Stalled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!dir.path().join("x.pdf").exists());
    }
}
