use super::resilient::send_message_resilient;
use super::transport::{ChatTransport, TelegramTransport};
use super::views::{
    self, decode_payload, results_keyboard, results_message, CALLBACK_ERROR, CALLBACK_QUEUED,
    CALLBACK_STARTING, HELP_MESSAGE, NO_RESULTS, SEARCHING, START_MESSAGE, USAGE_HINT,
};
use crate::catalog::{CatalogService, QueryRegistry};
use crate::lifecycle::Requester;
use crate::pipeline::{DownloadPipeline, DownloadRequest, Outcome};
use anyhow::Result;
use std::sync::Arc;
use teloxide::types::{CallbackQuery, ChatId, Message, MessageId, User};
use teloxide::utils::command::BotCommands;
use teloxide::Bot;
use tracing::{debug, error, info, warn};

/// Pipeline wired to the Telegram transport
pub type TelegramPipeline = DownloadPipeline<TelegramTransport>;

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Command overview
    #[command(description = "Show help.")]
    Help,
    /// Search by exact title
    #[command(description = "Search books by title.")]
    Search(String),
}

/// Sender of a message or button press; user 0 when Telegram omits it
fn requester_of(user: Option<&User>) -> Requester {
    user.map_or_else(
        || Requester {
            user_id: 0,
            name: "Unknown".to_string(),
        },
        |u| Requester {
            user_id: u.id.0.cast_signed(),
            name: u.full_name(),
        },
    )
}

/// Reply to /start
///
/// # Errors
///
/// Returns an error if the message cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, START_MESSAGE, None).await?;
    Ok(())
}

/// Reply to /help
///
/// # Errors
///
/// Returns an error if the message cannot be sent.
pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, HELP_MESSAGE, None).await?;
    Ok(())
}

/// Handle `/search <title>` sent to the bot.
///
/// # Errors
///
/// Returns an error if Telegram API calls fail.
pub async fn search(
    bot: Bot,
    msg: Message,
    query: String,
    catalog: Arc<CatalogService>,
    registry: QueryRegistry,
) -> Result<()> {
    let transport = TelegramTransport::new(bot);
    let requester = requester_of(msg.from.as_ref());
    run_search(
        &transport,
        msg.chat.id,
        msg.id,
        &requester,
        &query,
        &catalog,
        &registry,
    )
    .await
}

/// Query the catalog and turn the placeholder reply into the result list.
///
/// An empty query gets the usage hint; no results and catalog failures end
/// as plain texts without buttons.
///
/// # Errors
///
/// Returns an error if the transport fails.
pub async fn run_search<T: ChatTransport + ?Sized>(
    transport: &T,
    chat: ChatId,
    reply_to: MessageId,
    requester: &Requester,
    query: &str,
    catalog: &CatalogService,
    registry: &QueryRegistry,
) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        transport.send_text(chat, USAGE_HINT, Some(reply_to)).await?;
        return Ok(());
    }

    let user_id = requester.user_id;
    info!(user_id = user_id, query = %query, "Search requested");
    let placeholder = transport.send_text(chat, SEARCHING, Some(reply_to)).await?;

    let results = match catalog.search_for_user(user_id, query).await {
        Ok(results) => results,
        Err(e) => {
            error!(user_id = user_id, error = %e, "Search error");
            let text = views::search_failed(e.user_message());
            transport.edit_text(chat, placeholder, &text).await?;
            return Ok(());
        }
    };

    if results.is_empty() {
        transport.edit_text(chat, placeholder, NO_RESULTS).await?;
        return Ok(());
    }

    let keyboard = results_keyboard(&results, query, registry).await;
    let text = results_message(query, results.len(), Some((user_id, &requester.name)));
    transport
        .edit_text_with_keyboard(chat, placeholder, &text, keyboard)
        .await
}

/// A result button press, detached from the Telegram update
#[derive(Debug, Clone)]
pub struct ButtonPress {
    /// Callback query id to answer
    pub callback_id: String,
    /// Who pressed the button
    pub requester: Requester,
    /// Chat and message carrying the button, if Telegram still has it
    pub origin: Option<(ChatId, MessageId)>,
    /// Raw callback data
    pub data: String,
}

impl ButtonPress {
    /// `None` for callbacks without data
    #[must_use]
    pub fn from_query(q: &CallbackQuery) -> Option<Self> {
        let data = q.data.clone()?;
        Some(Self {
            callback_id: q.id.0.clone(),
            requester: requester_of(Some(&q.from)),
            origin: q.message.as_ref().map(|m| (m.chat().id, m.id())),
            data,
        })
    }
}

/// Handle a press on a result button.
///
/// The callback is answered right away; the download runs in the background
/// and waits for any earlier download of the same user. If the press cannot
/// be served at all, it is still answered with a generic error.
///
/// # Errors
///
/// Returns an error if the press has no message to reply to or the
/// callback cannot be answered.
pub async fn download_callback<T: ChatTransport>(
    press: ButtonPress,
    pipeline: Arc<DownloadPipeline<T>>,
) -> Result<()> {
    let callback_id = press.callback_id.clone();
    let transport = pipeline.transport().clone();
    if let Err(e) = start_download(press, pipeline).await {
        if let Err(answer_err) = transport.answer_callback(&callback_id, CALLBACK_ERROR).await {
            warn!(error = %answer_err, "Failed to answer callback");
        }
        return Err(e);
    }
    Ok(())
}

async fn start_download<T: ChatTransport>(
    press: ButtonPress,
    pipeline: Arc<DownloadPipeline<T>>,
) -> Result<()> {
    let user_id = press.requester.user_id;
    let (chat_id, message_id) = press
        .origin
        .ok_or_else(|| anyhow::anyhow!("Callback message missing chat id"))?;
    let transport = pipeline.transport().clone();

    let button = match decode_payload(&press.data) {
        Ok(button) => button,
        Err(e) => {
            warn!(user_id = user_id, data = %press.data, error = %e, "Undecodable button payload");
            transport
                .answer_callback(&press.callback_id, CALLBACK_ERROR)
                .await?;
            return Ok(());
        }
    };

    let answer = if pipeline.session().is_busy(user_id).await {
        CALLBACK_QUEUED
    } else {
        CALLBACK_STARTING
    };
    if let Err(e) = transport.answer_callback(&press.callback_id, answer).await {
        warn!(user_id = user_id, error = %e, "Failed to answer callback");
    }

    let request = DownloadRequest {
        chat: chat_id,
        reply_to: Some(message_id),
        requester: press.requester,
        query: button.query,
        index: button.index,
    };

    tokio::spawn(async move {
        match pipeline.run(request).await {
            Ok(Outcome::Delivered(id)) => debug!(user_id = user_id, message_id = id.0, "Download finished"),
            Ok(outcome) => debug!(user_id = user_id, outcome = ?outcome, "Download ended early"),
            Err(e) => {
                error!(user_id = user_id, error = %e, "Callback error");
                if let Err(e) = transport.send_text(chat_id, CALLBACK_ERROR, None).await {
                    error!(user_id = user_id, error = %e, "Failed to report callback error");
                }
            }
        }
    });

    Ok(())
}
