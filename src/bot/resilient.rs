//! Telegram calls wrapped in the retry policy of [`crate::utils::retry_telegram_operation`].
//!
//! All texts are sent with HTML parse mode.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardMarkup, Message, MessageId, ParseMode, ReplyParameters};
use tracing::debug;

/// Telegram limit is 4096, we keep some room for the suffix
const MAX_TEXT_CHARS: usize = 4000;

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_NOT_FOUND: &str = "message to edit not found";
const ERROR_DELETE_NOT_FOUND: &str = "message to delete not found";

fn fit_text(text: &str) -> String {
    if text.chars().count() > MAX_TEXT_CHARS {
        format!("{}...", crate::utils::truncate_str(text, MAX_TEXT_CHARS))
    } else {
        text.to_string()
    }
}

/// Send an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    reply_to: Option<MessageId>,
) -> Result<Message> {
    let text = fit_text(text);
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot
            .send_message(chat_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(id) = reply_to {
            req = req.reply_parameters(ReplyParameters::new(id).allow_sending_without_reply());
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message with automatic retry.
///
/// "Not modified" and "not found" answers count as success.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn edit_message_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> Result<()> {
    edit_message(bot, chat_id, msg_id, text, None).await
}

/// Like [`edit_message_safe_resilient`], also replacing the inline keyboard.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn edit_message_with_keyboard_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
    keyboard: &InlineKeyboardMarkup,
) -> Result<()> {
    edit_message(bot, chat_id, msg_id, text, Some(keyboard)).await
}

async fn edit_message(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
    keyboard: Option<&InlineKeyboardMarkup>,
) -> Result<()> {
    let text = fit_text(text);
    let result = crate::utils::retry_telegram_operation(|| async {
        let mut req = bot
            .edit_message_text(chat_id, msg_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            req = req.reply_markup(keyboard.clone());
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_benign(&e.to_string(), &[ERROR_NOT_MODIFIED, ERROR_NOT_FOUND]) => {
            debug!("Message update skipped: {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete a message with automatic retry; an already deleted message is fine.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn delete_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
) -> Result<()> {
    let result = crate::utils::retry_telegram_operation(|| async {
        bot.delete_message(chat_id, msg_id)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram delete error: {e}"))
    })
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_benign(&e.to_string(), &[ERROR_DELETE_NOT_FOUND]) => {
            debug!("Message already gone: {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn is_benign(error: &str, markers: &[&str]) -> bool {
    let error = error.to_lowercase();
    markers.iter().any(|m| error.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_text_is_cut() {
        let text = "x".repeat(5000);
        let fitted = fit_text(&text);
        assert_eq!(fitted.chars().count(), MAX_TEXT_CHARS + 3);
        assert!(fitted.ends_with("..."));
        assert_eq!(fit_text("short"), "short");
    }

    #[test]
    fn benign_errors_are_recognized() {
        assert!(is_benign(
            "Telegram edit error: Bad Request: message is not modified",
            &[ERROR_NOT_MODIFIED, ERROR_NOT_FOUND]
        ));
        assert!(!is_benign("Telegram edit error: Forbidden", &[ERROR_NOT_MODIFIED]));
    }
}
