//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the constants shared by the search, transfer and lifecycle modules.

use crate::transfer::ThrottlePolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// Chat that receives a copy of every delivered file
    pub log_channel: i64,

    /// Seconds before a delivered file is removed from the chat (0 disables)
    #[serde(default)]
    pub auto_delete_time: u64,

    /// Notice sent next to a delivered file, `{minutes}` is substituted
    #[serde(default = "default_auto_delete_msg")]
    pub auto_delete_msg: String,

    /// Text the notice is edited to once the file is gone
    #[serde(default = "default_file_deleted_msg")]
    pub file_deleted_msg: String,

    /// Directory for in-flight downloads
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Base URL of the catalog mirror
    #[serde(default = "default_libgen_mirror")]
    pub libgen_mirror: String,

    /// Minimum percent advance between two progress edits
    #[serde(default = "default_progress_min_percent_delta")]
    pub progress_min_percent_delta: u8,

    /// Time after which a changed percent is always shown
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// How long search results stay reusable for button presses
    #[serde(default = "default_search_cache_ttl_secs")]
    pub search_cache_ttl_secs: u64,

    /// Upper bound of users tracked for progress throttling
    #[serde(default = "default_progress_cache_max_users")]
    pub progress_cache_max_users: u64,
}

fn default_auto_delete_msg() -> String {
    "⚠️ This file will be deleted in <b>{minutes} minutes</b>. Forward it somewhere before it disappears.".to_string()
}

fn default_file_deleted_msg() -> String {
    "🗑 The file has been deleted. Search again if you still need it.".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(DOWNLOAD_DIR)
}

fn default_libgen_mirror() -> String {
    LIBGEN_MIRROR.to_string()
}

const fn default_progress_min_percent_delta() -> u8 {
    1
}

const fn default_progress_interval_ms() -> u64 {
    PROGRESS_INTERVAL_MS
}

const fn default_search_cache_ttl_secs() -> u64 {
    SEARCH_CACHE_TTL_SECS
}

const fn default_progress_cache_max_users() -> u64 {
    PROGRESS_CACHE_MAX_USERS
}

/// Build the layered configuration source.
///
/// # Errors
///
/// Returns a `ConfigError` if any present source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // This file shouldn't be checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE to snake_case keys
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use libgen_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or a required key is missing.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Delay before a delivered file is deleted, `None` when disabled
    #[must_use]
    pub const fn auto_delete_delay(&self) -> Option<Duration> {
        if self.auto_delete_time == 0 {
            None
        } else {
            Some(Duration::from_secs(self.auto_delete_time))
        }
    }

    /// Notice text announcing the upcoming deletion
    #[must_use]
    pub fn render_auto_delete_notice(&self) -> String {
        let minutes = self.auto_delete_time.div_ceil(60);
        self.auto_delete_msg
            .replace("{minutes}", &minutes.to_string())
    }

    /// Throttle applied to progress edits in both transfer phases
    #[must_use]
    pub const fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            min_percent_delta: self.progress_min_percent_delta,
            min_interval: Duration::from_millis(self.progress_interval_ms),
        }
    }

    /// Time-to-live of cached search results
    #[must_use]
    pub const fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }
}

/// Callback prefix for buttons that carry the escaped query
pub const CALLBACK_PREFIX_QUERY: &str = "lgdl";
/// Callback prefix for buttons that carry a registered query key
pub const CALLBACK_PREFIX_KEY: &str = "lgdk";
/// Telegram limit for inline button callback data, in bytes
pub const CALLBACK_DATA_LIMIT: usize = 64;
/// Number of results turned into buttons
pub const RESULTS_PAGE_SIZE: usize = 10;
/// Title width in button labels
pub const BUTTON_TITLE_MAX_CHARS: usize = 35;
/// Maximum characters kept from a title in temp file names
pub const FILE_NAME_MAX_CHARS: usize = 50;
/// Extension used when the catalog reports none
pub const DEFAULT_EXTENSION: &str = "pdf";

/// Default download directory (relative to the working directory)
pub const DOWNLOAD_DIR: &str = "downloads";
/// Default catalog mirror
pub const LIBGEN_MIRROR: &str = "https://libgen.li";
/// Streaming chunk size for downloads
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;
/// Default minimum time between progress edits
pub const PROGRESS_INTERVAL_MS: u64 = 2000;
/// Default number of users tracked for progress throttling
pub const PROGRESS_CACHE_MAX_USERS: u64 = 10_000;
/// Idle time after which a user's progress stamp is dropped
pub const PROGRESS_CACHE_IDLE_SECS: u64 = 3600;

/// Default lifetime of cached search results
pub const SEARCH_CACHE_TTL_SECS: u64 = 600;
/// Maximum cached searches
pub const SEARCH_CACHE_MAX_SIZE: u64 = 5_000;
/// Lifetime of registered long queries
pub const QUERY_REGISTRY_TTL_SECS: u64 = 86_400;
/// Maximum registered long queries
pub const QUERY_REGISTRY_MAX_SIZE: u64 = 50_000;

/// Extra wait added to the catalog's rate-limit hint
pub const FLOOD_WAIT_PADDING_SECS: u64 = 2;
/// Pause after a failed transfer before cleanup
pub const FAILURE_PAUSE_SECS: u64 = 5;

/// Timeout for catalog page requests
pub const CATALOG_HTTP_TIMEOUT_SECS: u64 = 30;
/// Connect timeout for file downloads
pub const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Longest wait for the response head or the next body piece of a download
pub const DOWNLOAD_IDLE_TIMEOUT_SECS: u64 = 60;
/// Total timeout of one Bot API request, document uploads included
pub const TELEGRAM_REQUEST_TIMEOUT_SECS: u64 = 600;

// Telegram API retry configuration
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum Telegram API retry attempts
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
