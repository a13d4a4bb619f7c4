use super::{percent_of, ProgressGate, ProgressReporter, TransferError};
use crate::bot::transport::{ChatTransport, DocumentUpload};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use teloxide::types::{ChatId, MessageId};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::{info, instrument};

/// Reader that publishes the cumulative number of bytes read
pub struct ProgressReader<R> {
    inner: R,
    read: u64,
    tx: mpsc::UnboundedSender<u64>,
}

impl<R> ProgressReader<R> {
    /// Wrap `inner`; byte counts go to `tx`
    pub const fn new(inner: R, tx: mpsc::UnboundedSender<u64>) -> Self {
        Self { inner, read: 0, tx }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(poll, Poll::Ready(Ok(()))) {
            let n = buf.filled().len() - before;
            if n > 0 {
                self.read += n as u64;
                // Receiver gone means nobody watches progress any more
                let _ = self.tx.send(self.read);
            }
        }
        poll
    }
}

/// Send the file at `path` as a document, offering upload progress as the
/// transport consumes it.
///
/// # Errors
///
/// Returns `TransferError::Io` if the file cannot be opened and
/// `TransferError::Upload` if the transport rejects the document.
#[instrument(skip(transport, path, caption, progress, reporter), fields(path = %path.display()))]
pub async fn upload_document(
    transport: &dyn ChatTransport,
    chat: ChatId,
    path: &Path,
    file_name: String,
    caption: &str,
    progress: &mut ProgressGate<'_>,
    reporter: &dyn ProgressReporter,
) -> Result<MessageId, TransferError> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let document = DocumentUpload {
        file_name,
        reader: Box::new(ProgressReader::new(file, tx)),
        size,
    };

    let send = transport.send_document(chat, document, caption);
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            Some(read) = rx.recv() => {
                if let Some(percent) = percent_of(read, Some(size)) {
                    progress.offer(percent, reporter).await;
                }
            }
        }
    };

    // Values read right before the send finished
    let mut last = None;
    while let Ok(read) = rx.try_recv() {
        last = Some(read);
    }
    if let Some(percent) = last.and_then(|read| percent_of(read, Some(size))) {
        progress.offer(percent, reporter).await;
    }

    let message = result.map_err(|e| TransferError::Upload(e.to_string()))?;
    info!(bytes = size, "Upload finished");
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::transport::testing::RecordingTransport;
    use crate::session::SessionCoordinator;
    use crate::transfer::testing::RecordingReporter;
    use crate::transfer::{ThrottlePolicy, TransferPhase};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reader_counts_bytes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reader = ProgressReader::new(&b"hello world"[..], tx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.expect("read");
        drop(reader);

        let mut seen = Vec::new();
        while let Some(v) = rx.recv().await {
            seen.push(v);
        }
        assert_eq!(out, b"hello world");
        assert_eq!(seen.last(), Some(&11));
    }

    #[tokio::test]
    async fn upload_reports_until_complete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, vec![1u8; 256 * 1024]).expect("write");

        let transport = RecordingTransport::default();
        let session = SessionCoordinator::default();
        let reporter = RecordingReporter::default();
        let mut gate =
            ProgressGate::new(ThrottlePolicy::default(), &session, 3, TransferPhase::Upload);

        let sent = upload_document(
            &transport,
            ChatId(3),
            &path,
            "book.pdf".to_string(),
            "caption",
            &mut gate,
            &reporter,
        )
        .await;

        assert!(sent.is_ok());
        let docs = transport.documents.lock().await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].bytes, 256 * 1024);
        assert_eq!(docs[0].file_name, "book.pdf");
        let percents = reporter.percents(TransferPhase::Upload).await;
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn rejected_upload_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, b"data").expect("write");

        let transport = RecordingTransport::failing_documents();
        let session = SessionCoordinator::default();
        let reporter = RecordingReporter::default();
        let mut gate =
            ProgressGate::new(ThrottlePolicy::default(), &session, 3, TransferPhase::Upload);

        let sent = upload_document(
            &transport,
            ChatId(3),
            &path,
            "book.pdf".to_string(),
            "caption",
            &mut gate,
            &reporter,
        )
        .await;

        assert!(matches!(sent, Err(TransferError::Upload(_))));
    }
}
