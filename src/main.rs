use dotenvy::dotenv;
use libgen_relay::bot::handlers::{self, ButtonPress, Command, TelegramPipeline};
use libgen_relay::bot::resilient::send_message_resilient;
use libgen_relay::bot::views::{is_download_payload, PRIVATE_ONLY};
use libgen_relay::bot::{build_bot, TelegramTransport};
use libgen_relay::catalog::{CatalogService, LibgenCatalog, QueryRegistry, SearchCache};
use libgen_relay::config::{Settings, TELEGRAM_REQUEST_TIMEOUT_SECS};
use libgen_relay::lifecycle::{AuditLogger, AutoDeleteScheduler};
use libgen_relay::pipeline::{DownloadPipeline, PipelineConfig};
use libgen_relay::session::SessionCoordinator;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting the bot token from logs
struct RedactionPatterns {
    token1: Regex,
    token2: Regex,
    token3: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token1: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token2: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token3: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self.token1.replace_all(input, "$1[TELEGRAM_TOKEN]$3");
        let output = self.token2.replace_all(&output, "[TELEGRAM_TOKEN]");
        self.token3
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer counts as written even if redaction changed its length
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting Library Genesis relay bot...");

    let settings = init_settings();
    if let Err(e) = tokio::fs::create_dir_all(&settings.download_dir).await {
        warn!(
            dir = %settings.download_dir.display(),
            error = %e,
            "Could not create download directory"
        );
    }

    let bot = match build_bot(
        settings.telegram_token.clone(),
        Duration::from_secs(TELEGRAM_REQUEST_TIMEOUT_SECS),
    ) {
        Ok(bot) => bot,
        Err(e) => {
            error!("Failed to build Telegram client: {}", e);
            std::process::exit(1);
        }
    };
    let bot_name = match bot.get_me().await {
        Ok(me) => me.first_name.clone(),
        Err(e) => {
            error!("Failed to fetch bot profile: {}", e);
            std::process::exit(1);
        }
    };

    let catalog = init_catalog(&settings);
    let registry = QueryRegistry::default();
    let session = Arc::new(SessionCoordinator::new(settings.progress_cache_max_users));
    let transport = Arc::new(TelegramTransport::new(bot.clone()));
    let scheduler = Arc::new(AutoDeleteScheduler::from_settings(
        transport.clone(),
        &settings,
    ));
    let audit = AuditLogger::new(transport.clone(), ChatId(settings.log_channel), bot_name);
    let pipeline: Arc<TelegramPipeline> = Arc::new(DownloadPipeline::new(
        catalog.clone(),
        registry.clone(),
        session,
        transport,
        scheduler.clone(),
        audit,
        PipelineConfig::from_settings(&settings),
    ));

    info!(
        auto_delete_secs = settings.auto_delete_time,
        mirror = %settings.libgen_mirror,
        "Bot is running..."
    );

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![catalog, registry, pipeline])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    scheduler.shutdown().await;
    info!("Bot stopped.");
    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_catalog(settings: &Settings) -> Arc<CatalogService> {
    match LibgenCatalog::new(&settings.libgen_mirror) {
        Ok(client) => {
            info!(
                "Catalog client initialized (mirror: {}, cache ttl: {}s)",
                settings.libgen_mirror, settings.search_cache_ttl_secs
            );
            Arc::new(CatalogService::new(
                Arc::new(client),
                SearchCache::with_ttl(settings.search_cache_ttl()),
            ))
        }
        Err(e) => {
            error!("Failed to initialize catalog client: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery| q.data.as_deref().is_some_and(is_download_payload))
                .endpoint(handle_download_callback),
        )
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .branch(
                    dptree::filter(|msg: Message| msg.chat.is_private()).endpoint(handle_command),
                )
                .branch(dptree::endpoint(handle_group_command)),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    catalog: Arc<CatalogService>,
    registry: QueryRegistry,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg).await,
        Command::Help => handlers::help(bot, msg).await,
        Command::Search(query) => handlers::search(bot, msg, query, catalog, registry).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_group_command(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = send_message_resilient(&bot, msg.chat.id, PRIVATE_ONLY, Some(msg.id)).await {
        error!("Failed to answer group command: {}", e);
    }
    respond(())
}

async fn handle_download_callback(
    q: CallbackQuery,
    pipeline: Arc<TelegramPipeline>,
) -> Result<(), teloxide::RequestError> {
    let Some(press) = ButtonPress::from_query(&q) else {
        return respond(());
    };
    if let Err(e) = handlers::download_callback(press, pipeline).await {
        error!("Callback error: {}", e);
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_token_is_redacted() {
        let patterns = RedactionPatterns::new().expect("patterns");
        let line = "POST https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsawQ/sendMessage";
        let redacted = patterns.redact(line);
        assert!(!redacted.contains("AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsawQ"));
        assert!(redacted.contains("[TELEGRAM_TOKEN]"));
    }
}
