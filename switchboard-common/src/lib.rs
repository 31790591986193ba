//! Common types and utilities shared across Switchboard crates.
//!
//! This crate defines the canonical [`Message`] every connector produces, the
//! shared error type, and observability helpers. It stays dependency-light so
//! every other crate in the workspace can depend on it.
//!
//! # Overview
//!
//! - [`Message`]: normalized event record, one per ingested upstream event
//! - [`observability`]: centralised tracing/logging initialisation
//! - [`SwitchboardError`] and [`Result`]: shared error handling
//! - [`iso_timestamp`] / [`now_iso`]: the timestamp rendering used on the wire
//!
//! # Examples
//!
//! ```rust
//! use switchboard_common::Message;
//!
//! let msg = Message {
//!     id: "42".into(),
//!     platform: "telegram".into(),
//!     source_id: "telegram-1".into(),
//!     channel_id: "-100".into(),
//!     author_id: "7".into(),
//!     content: "hello".into(),
//!     created_at: "2024-05-01T10:00:00.000Z".into(),
//!     raw: serde_json::Value::Null,
//! };
//! assert_eq!(msg.dedup_key(), "telegram:telegram-1:42");
//! ```
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub mod observability;

/// Placeholder used when an upstream payload carries no author or channel.
pub const UNKNOWN: &str = "unknown";

/// Canonical event record emitted by every connector.
///
/// `(platform, source_id, id)` identifies the logical event; two messages with
/// the same triple are treated as the same event by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform-native event identifier, stringified.
    pub id: String,
    /// Source platform tag, e.g. `telegram` or `mastodon`.
    pub platform: String,
    /// Id of the configured connector instance that produced the message.
    pub source_id: String,
    /// Conversation, timeline or visibility scope.
    pub channel_id: String,
    /// Stringified author id, [`UNKNOWN`] when absent.
    pub author_id: String,
    /// Plain-text body.
    pub content: String,
    /// ISO-8601 timestamp; ingestion time when the source omits it.
    pub created_at: String,
    /// Original payload kept for downstream inspection.
    pub raw: serde_json::Value,
}

impl Message {
    /// Key used for deduplication: `platform:source_id:id`.
    pub fn dedup_key(&self) -> String {
        format!("{}:{}:{}", self.platform, self.source_id, self.id)
    }
}

/// Render a timestamp the way messages and statuses carry it
/// (RFC 3339, millisecond precision, `Z` suffix).
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use switchboard_common::iso_timestamp;
///
/// let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
/// assert_eq!(iso_timestamp(ts), "2023-11-14T22:13:20.000Z");
/// ```
pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time rendered with [`iso_timestamp`].
pub fn now_iso() -> String {
    iso_timestamp(Utc::now())
}

/// Error types used across the Switchboard workspace.
#[derive(thiserror::Error, Debug)]
pub enum SwitchboardError {
    /// Configuration was incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No connector constructor is registered for the platform tag.
    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    /// Platform-specific connector options failed to decode.
    #[error("Invalid options for connector {id}: {source}")]
    ConnectorOptions {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenient alias for results that use [`SwitchboardError`].
pub type Result<T> = std::result::Result<T, SwitchboardError>;
