//! Message texts and the search result keyboard.
//!
//! Buttons carry `lgdl_<escaped query>_<index>`. Queries whose escaped form
//! would not fit into Telegram's 64 byte callback data are registered in a
//! [`QueryRegistry`] and travel as `lgdk_<key>_<index>` instead.

use crate::catalog::{QueryRegistry, SearchResult};
use crate::config::{
    BUTTON_TITLE_MAX_CHARS, CALLBACK_DATA_LIMIT, CALLBACK_PREFIX_KEY, CALLBACK_PREFIX_QUERY,
    RESULTS_PAGE_SIZE,
};
use crate::utils::{html_user_mention, truncate_with_ellipsis};
use html_escape::encode_text;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use thiserror::Error;

/// Characters left as-is in escaped queries
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Reasons a callback payload cannot be decoded
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Not one of our button prefixes
    #[error("unknown callback prefix")]
    UnknownPrefix,
    /// Prefix matched but the rest is not `<query>_<index>`
    #[error("malformed callback payload")]
    Malformed,
    /// Escaped query is not valid UTF-8
    #[error("query is not valid UTF-8")]
    BadEncoding,
}

/// Which query a button refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryRef {
    /// The query itself
    Inline(String),
    /// Key of a query kept in the [`QueryRegistry`]
    Registered(String),
}

/// Decoded button: a query and an index into its result list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonRef {
    /// Query the results came from
    pub query: QueryRef,
    /// Zero based index into the full result list
    pub index: usize,
}

/// Whether callback data belongs to a download button
#[must_use]
pub fn is_download_payload(data: &str) -> bool {
    [CALLBACK_PREFIX_QUERY, CALLBACK_PREFIX_KEY]
        .iter()
        .any(|prefix| data.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('_')))
}

/// Build the callback data for result `index` of `query`.
pub async fn encode_payload(query: &str, index: usize, registry: &QueryRegistry) -> String {
    let escaped = utf8_percent_encode(query, QUERY_ESCAPE).to_string();
    let inline = format!("{CALLBACK_PREFIX_QUERY}_{escaped}_{index}");
    if inline.len() <= CALLBACK_DATA_LIMIT {
        return inline;
    }
    let key = registry.register(query).await;
    format!("{CALLBACK_PREFIX_KEY}_{key}_{index}")
}

/// Parse callback data produced by [`encode_payload`].
///
/// # Errors
///
/// Returns a [`PayloadError`] when the data was not produced by us.
pub fn decode_payload(data: &str) -> Result<ButtonRef, PayloadError> {
    let (prefix, rest) = data.split_once('_').ok_or(PayloadError::UnknownPrefix)?;
    // Queries may contain '_', the index never does
    let (body, index) = rest.rsplit_once('_').ok_or(PayloadError::Malformed)?;
    let index = index.parse::<usize>().map_err(|_| PayloadError::Malformed)?;

    let query = match prefix {
        CALLBACK_PREFIX_QUERY => {
            let query = percent_decode_str(body)
                .decode_utf8()
                .map_err(|_| PayloadError::BadEncoding)?;
            QueryRef::Inline(query.into_owned())
        }
        CALLBACK_PREFIX_KEY if !body.is_empty() => QueryRef::Registered(body.to_string()),
        CALLBACK_PREFIX_KEY => return Err(PayloadError::Malformed),
        _ => return Err(PayloadError::UnknownPrefix),
    };
    Ok(ButtonRef { query, index })
}

/// Label of a result button: `EPUB ~2 MB - Title...`
#[must_use]
pub fn result_button_label(result: &SearchResult) -> String {
    format!(
        "{} ~{} - {}",
        result.extension.to_uppercase(),
        result.size,
        truncate_with_ellipsis(&result.title, BUTTON_TITLE_MAX_CHARS)
    )
}

/// One button per row for the first results of a search.
pub async fn results_keyboard(
    results: &[SearchResult],
    query: &str,
    registry: &QueryRegistry,
) -> InlineKeyboardMarkup {
    let mut rows = Vec::with_capacity(results.len().min(RESULTS_PAGE_SIZE));
    for (index, result) in results.iter().take(RESULTS_PAGE_SIZE).enumerate() {
        let data = encode_payload(query, index, registry).await;
        rows.push(vec![InlineKeyboardButton::callback(
            result_button_label(result),
            data,
        )]);
    }
    InlineKeyboardMarkup::new(rows)
}

/// Header of the results message
#[must_use]
pub fn results_message(query: &str, total: usize, requester: Option<(i64, &str)>) -> String {
    let mut lines = vec![format!(
        "📚 Found {total} results for <b>{}</b>:",
        encode_text(query)
    )];
    if total > RESULTS_PAGE_SIZE {
        lines.push(format!("<i>Showing the first {RESULTS_PAGE_SIZE}.</i>"));
    }
    let mention = requester.map_or_else(
        || "Unknown user".to_string(),
        |(id, name)| html_user_mention(id, name),
    );
    lines.push(format!("Requested by ☞ {mention}"));
    lines.join("\n")
}

/// Caption of the delivered document
#[must_use]
pub fn document_caption(book: &SearchResult) -> String {
    format!(
        "📚 {}\n👤 Author: {}\n📦 Size: {}",
        encode_text(or_unknown(&book.title, "Unknown")),
        encode_text(or_unknown(&book.author, "Unknown")),
        encode_text(or_unknown(&book.size, "N/A")),
    )
}

/// Caption of the audit log copy
#[must_use]
pub fn audit_caption(book: &SearchResult, user_id: i64, user_name: &str, bot_name: &str) -> String {
    format!(
        "📥 User {} downloaded:\n📖 Title: {}\n👤 Author: {}\n📦 Size: {}\n👤 User ID: {user_id}\n🤖 Via: {}",
        html_user_mention(user_id, user_name),
        encode_text(or_unknown(&book.title, "Unknown")),
        encode_text(or_unknown(&book.author, "Unknown")),
        encode_text(or_unknown(&book.size, "N/A")),
        encode_text(bot_name),
    )
}

fn or_unknown<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}

/// Download progress line
#[must_use]
pub fn download_progress(percent: u8) -> String {
    format!("⬇️ Downloading file... ({percent}%)")
}

/// Upload progress line
#[must_use]
pub fn upload_progress(percent: u8) -> String {
    format!("📤 Uploading... ({percent}%)")
}

/// Failed transfer, with a user-safe reason
#[must_use]
pub fn download_failed(reason: &str) -> String {
    format!("❌ Download failed: {}", encode_text(reason))
}

/// Failed search, with a user-safe reason
#[must_use]
pub fn search_failed(reason: &str) -> String {
    format!("❌ Search failed: {}", encode_text(reason))
}

/// Reply to /start
pub const START_MESSAGE: &str = "👋 Send <code>/search &lt;title&gt;</code> to look up a book in Library Genesis.\nPick a result and the file is delivered right here.";
/// Reply to /help
pub const HELP_MESSAGE: &str = "<b>Commands</b>\n/search &lt;title&gt; - search books by exact title\n/help - this message\n\nOne download per user runs at a time, further presses wait their turn.";
/// /search without a query
pub const USAGE_HINT: &str = "⚠️ Please provide a search query!\nExample: <code>/search The Great Gatsby</code>";
/// Placeholder while the catalog is queried
pub const SEARCHING: &str = "🔍 Searching the library...";
/// Search matched nothing
pub const NO_RESULTS: &str = "❌ No results found for your query.";
/// First progress message of a download
pub const PREPARING: &str = "⏳ Downloading book from server...";
/// Shown once the download request is made
pub const DOWNLOAD_STARTED: &str = "⬇️ Downloading file... (0%)";
/// Shown between download and upload
pub const UPLOAD_STARTED: &str = "📤 Uploading to Telegram...";
/// Button index no longer points at a result
pub const BOOK_NOT_FOUND: &str = "❌ Book details not found.";
/// Entry cannot be downloaded directly
pub const NO_DIRECT_LINK: &str = "❌ No direct download available for this book.";
/// Callback answer for an accepted press
pub const CALLBACK_STARTING: &str = "📥 Starting download...";
/// Callback answer while another job of the user runs
pub const CALLBACK_QUEUED: &str = "⏳ Your previous download is still running, this one is queued.";
/// Callback answer for anything that went wrong
pub const CALLBACK_ERROR: &str = "❌ Error processing request";
/// Commands used outside a private chat
pub const PRIVATE_ONLY: &str = "🔒 Searches work in private chat with the bot only.";
