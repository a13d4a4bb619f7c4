//! Chat transport seam
//!
//! Everything the download pipeline sends to the chat goes through
//! [`ChatTransport`], so the pipeline can be driven without Telegram.
//! All texts are HTML formatted.

use super::resilient::{
    delete_message_resilient, edit_message_safe_resilient, edit_message_with_keyboard_resilient,
    send_message_resilient,
};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, ChatId, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
};
use tokio::io::AsyncRead;

/// Bot handle whose requests may take up to `request_timeout`.
///
/// Documents are streamed inside a single request, so the client default
/// of 17 seconds would cut off most book uploads.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub fn build_bot(token: impl Into<String>, request_timeout: Duration) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(request_timeout)
        .build()?;
    Ok(Bot::with_client(token, client))
}

/// A file to send as a document
pub struct DocumentUpload {
    /// File name shown in the chat
    pub file_name: String,
    /// Source of the file bytes
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Size in bytes
    pub size: u64,
}

/// Outbound chat operations used by the pipeline
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Send a text message, optionally as a reply
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId>;

    /// Replace the text of a message
    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> Result<()>;

    /// Replace the text of a message and attach an inline keyboard
    async fn edit_text_with_keyboard(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<()>;

    /// Answer a button press with a short notification
    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()>;

    /// Delete a message
    async fn delete(&self, chat: ChatId, message: MessageId) -> Result<()>;

    /// Send a document with a caption
    async fn send_document(
        &self,
        chat: ChatId,
        document: DocumentUpload,
        caption: &str,
    ) -> Result<MessageId>;

    /// Copy an already delivered message to another chat with a new caption
    async fn copy_document(
        &self,
        to: ChatId,
        from: ChatId,
        message: MessageId,
        caption: &str,
    ) -> Result<MessageId>;
}

/// [`ChatTransport`] backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Wrap a bot handle
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let message = send_message_resilient(&self.bot, chat, text, reply_to).await?;
        Ok(message.id)
    }

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> Result<()> {
        edit_message_safe_resilient(&self.bot, chat, message, text).await
    }

    async fn edit_text_with_keyboard(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<()> {
        edit_message_with_keyboard_resilient(&self.bot, chat, message, text, &keyboard).await
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<()> {
        self.bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .text(text)
            .await?;
        Ok(())
    }

    async fn delete(&self, chat: ChatId, message: MessageId) -> Result<()> {
        delete_message_resilient(&self.bot, chat, message).await
    }

    async fn send_document(
        &self,
        chat: ChatId,
        document: DocumentUpload,
        caption: &str,
    ) -> Result<MessageId> {
        // The reader can only be consumed once, so no retry here
        let file = InputFile::read(document.reader).file_name(document.file_name);
        let message = self
            .bot
            .send_document(chat, file)
            .caption(caption)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(message.id)
    }

    async fn copy_document(
        &self,
        to: ChatId,
        from: ChatId,
        message: MessageId,
        caption: &str,
    ) -> Result<MessageId> {
        crate::utils::retry_telegram_operation(|| async {
            self.bot
                .copy_message(to, from, message)
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .await
                .map_err(|e| anyhow::anyhow!("Telegram copy error: {e}"))
        })
        .await
    }
}
