/// Command and callback handlers
pub mod handlers;
/// Telegram calls with retry
pub mod resilient;
/// Outbound chat seam used by the download pipeline
pub mod transport;
/// Message texts, keyboards and button payloads
pub mod views;

pub use transport::{build_bot, ChatTransport, DocumentUpload, TelegramTransport};
