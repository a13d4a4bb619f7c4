//! Fakes shared by the integration tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use libgen_relay::bot::{ChatTransport, DocumentUpload};
use libgen_relay::catalog::{Catalog, CatalogError, CatalogService, QueryRegistry, SearchCache, SearchResult};
use libgen_relay::lifecycle::{AuditLogger, AutoDeleteScheduler, Requester};
use libgen_relay::pipeline::{DownloadPipeline, DownloadRequest, PipelineConfig};
use libgen_relay::session::SessionCoordinator;
use libgen_relay::transfer::ThrottlePolicy;
use libgen_relay::bot::views::QueryRef;
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

pub const LOG_CHANNEL: ChatId = ChatId(-100_200);

/// Catalog answering every query with the same results
pub struct StaticCatalog {
    results: Vec<SearchResult>,
    pub searches: AtomicUsize,
}

impl StaticCatalog {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            searches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn search_title(&self, _query: &str) -> Result<Vec<SearchResult>, CatalogError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.clone())
    }
}

/// Everything the pipeline did to the chat, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Text { chat: ChatId, id: MessageId, text: String },
    Edit { id: MessageId, text: String },
    Keyboard { id: MessageId, text: String, buttons: usize },
    Answer { callback_id: String, text: String },
    Delete { id: MessageId },
    Document { chat: ChatId, id: MessageId, file_name: String, bytes: u64, caption: String },
    Copy { to: ChatId, message: MessageId, caption: String },
}

/// Transport recording events; documents are read in 64 KiB steps
pub struct FakeTransport {
    next_id: AtomicI32,
    reject_documents: bool,
    pub events: Mutex<Vec<Event>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1000),
            reject_documents: false,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting_documents() -> Self {
        Self {
            reject_documents: true,
            ..Self::new()
        }
    }

    fn next(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Percentages of edits starting with `prefix`, e.g. `⬇️ Downloading file... (`
    pub async fn percents(&self, prefix: &str) -> Vec<u8> {
        self.events()
            .await
            .into_iter()
            .filter_map(|event| match event {
                Event::Edit { text, .. } => text
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix("%)"))
                    .and_then(|n| n.parse().ok()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send_text(&self, chat: ChatId, text: &str, _reply_to: Option<MessageId>) -> Result<MessageId> {
        let id = self.next();
        self.events.lock().await.push(Event::Text { chat, id, text: text.to_string() });
        Ok(id)
    }

    async fn edit_text(&self, _chat: ChatId, message: MessageId, text: &str) -> Result<()> {
        self.events.lock().await.push(Event::Edit { id: message, text: text.to_string() });
        Ok(())
    }

    async fn edit_text_with_keyboard(
        &self,
        _chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<()> {
        let buttons = keyboard.inline_keyboard.iter().map(Vec::len).sum();
        self.events.lock().await.push(Event::Keyboard { id: message, text: text.to_string(), buttons });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        self.events.lock().await.push(Event::Answer {
            callback_id: callback_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, _chat: ChatId, message: MessageId) -> Result<()> {
        self.events.lock().await.push(Event::Delete { id: message });
        Ok(())
    }

    async fn send_document(&self, chat: ChatId, mut document: DocumentUpload, caption: &str) -> Result<MessageId> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut bytes = 0u64;
        loop {
            let n = document.reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            bytes += n as u64;
        }
        if self.reject_documents {
            anyhow::bail!("Bad Request: file is too big");
        }
        let id = self.next();
        self.events.lock().await.push(Event::Document {
            chat,
            id,
            file_name: document.file_name,
            bytes,
            caption: caption.to_string(),
        });
        Ok(id)
    }

    async fn copy_document(&self, to: ChatId, _from: ChatId, message: MessageId, caption: &str) -> Result<MessageId> {
        self.events.lock().await.push(Event::Copy { to, message, caption: caption.to_string() });
        Ok(self.next())
    }
}

pub fn book(title: &str, link: Option<String>) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        author: "Frank Herbert".to_string(),
        size: "10 MB".to_string(),
        extension: "epub".to_string(),
        direct_download_link: link,
        ..SearchResult::default()
    }
}

pub fn pipeline(
    catalog: Arc<StaticCatalog>,
    transport: &Arc<FakeTransport>,
    download_dir: &Path,
    auto_delete: Option<Duration>,
) -> DownloadPipeline<FakeTransport> {
    let service = Arc::new(CatalogService::new(
        catalog,
        SearchCache::new(Duration::from_secs(600), 100),
    ));
    let scheduler = Arc::new(AutoDeleteScheduler::new(
        transport.clone(),
        auto_delete,
        "This file will be deleted in 5 minutes".to_string(),
        "The file has been deleted".to_string(),
    ));
    let audit = AuditLogger::new(transport.clone(), LOG_CHANNEL, "Relay".to_string());
    DownloadPipeline::new(
        service,
        QueryRegistry::default(),
        Arc::new(SessionCoordinator::default()),
        transport.clone(),
        scheduler,
        audit,
        PipelineConfig {
            throttle: ThrottlePolicy::default(),
            download_dir: download_dir.to_path_buf(),
            failure_pause: Duration::from_millis(10),
        },
    )
}

pub fn request(user_id: i64, query: &str, index: usize) -> DownloadRequest {
    DownloadRequest {
        chat: ChatId(user_id),
        reply_to: None,
        requester: Requester {
            user_id,
            name: "Ann".to_string(),
        },
        query: QueryRef::Inline(query.to_string()),
        index,
    }
}

/// Files left anywhere below `dir`
pub fn files_below(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found
}
