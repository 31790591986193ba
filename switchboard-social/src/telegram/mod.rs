//! Telegram Bot API source.
//!
//! Polling uses `getUpdates` with an offset cursor; webhook mode registers
//! the configured URL via `setWebhook` and accepts pushed updates guarded by
//! the `x-telegram-bot-api-secret-token` header.
pub mod client;
pub mod connector;
pub mod types;

pub const PLATFORM: &str = "telegram";

pub use client::TelegramApi;
pub use connector::{TelegramConnector, TelegramOptions, normalize_message};
