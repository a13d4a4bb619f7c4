//! Text helpers for labels and file names, plus the Telegram retry wrapper.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use libgen_relay::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Truncates to `max_chars` and appends `...` when something was cut off.
///
/// # Examples
///
/// ```
/// use libgen_relay::utils::truncate_with_ellipsis;
/// assert_eq!(truncate_with_ellipsis("Dune", 35), "Dune");
/// assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
/// ```
#[must_use]
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", truncate_str(s, max_chars))
    } else {
        s.to_string()
    }
}

/// Replaces every non-alphanumeric character with `_` and caps the length.
///
/// # Examples
///
/// ```
/// use libgen_relay::utils::sanitize_file_stem;
/// assert_eq!(sanitize_file_stem("Dune: Messiah", 50), "Dune__Messiah");
/// ```
#[must_use]
pub fn sanitize_file_stem(title: &str, max_chars: usize) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    truncate_str(cleaned, max_chars)
}

/// Keeps only ASCII alphanumerics of a catalog extension, lowercased.
///
/// Falls back to `default` when nothing usable remains.
#[must_use]
pub fn sanitize_extension(extension: &str, default: &str) -> String {
    let cleaned: String = extension
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_lowercase();
    if cleaned.is_empty() {
        default.to_string()
    } else {
        cleaned
    }
}

/// HTML link mentioning a Telegram user by id.
#[must_use]
pub fn html_user_mention(user_id: i64, display_name: &str) -> String {
    format!(
        "<a href=\"tg://user?id={user_id}\">{}</a>",
        html_escape::encode_text(display_name)
    )
}

/// Retry a Telegram API operation with exponential backoff.
///
/// The retry strategy uses exponential backoff with jitter:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Attempts: 1 + `TELEGRAM_API_MAX_RETRIES` = 4 (see constants in `config.rs`)
///
/// # Errors
///
/// Returns the last error if all attempts fail.
///
/// # Examples
///
/// ```no_run
/// use libgen_relay::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn edit() -> Result<()> {
///     Ok(())
/// }
///
/// # async fn example() -> Result<()> {
/// retry_telegram_operation(|| async { edit().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
    }

    #[test]
    fn ellipsis_only_when_cut() {
        let exact = "a".repeat(35);
        assert_eq!(truncate_with_ellipsis(&exact, 35), exact);

        let long = "b".repeat(36);
        assert_eq!(truncate_with_ellipsis(&long, 35), format!("{}...", "b".repeat(35)));
    }

    #[test]
    fn file_stem_is_alnum_and_capped() {
        let stem = sanitize_file_stem(&"../etc/passwd ".repeat(10), 50);
        assert_eq!(stem.chars().count(), 50);
        assert!(stem.chars().all(|c| c.is_alphanumeric() || c == '_'));
        assert!(!stem.contains('/'));
    }

    #[test]
    fn file_stem_keeps_unicode_letters() {
        assert_eq!(sanitize_file_stem("Война и мир", 50), "Война_и_мир");
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(sanitize_extension("EPUB", "pdf"), "epub");
        assert_eq!(sanitize_extension("../sh", "pdf"), "sh");
        assert_eq!(sanitize_extension("", "pdf"), "pdf");
        assert_eq!(sanitize_extension("./", "pdf"), "pdf");
    }

    #[test]
    fn mention_escapes_name() {
        assert_eq!(
            html_user_mention(42, "<Bob>"),
            "<a href=\"tg://user?id=42\">&lt;Bob&gt;</a>"
        );
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = retry_telegram_operation(|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("boom"))
        })
        .await;

        assert!(result.is_err());
        // One initial attempt plus one per backoff step
        assert_eq!(
            calls.load(Ordering::SeqCst),
            crate::config::TELEGRAM_API_MAX_RETRIES + 1
        );
    }
}
