//! Mastodon source: polls a timeline on a fixed interval with a `since_id`
//! cursor, or accepts pushed statuses guarded by `x-webhook-secret`.
pub mod client;
pub mod connector;
pub mod types;

pub const PLATFORM: &str = "mastodon";

pub use client::MastodonApi;
pub use connector::{MastodonConnector, MastodonOptions, max_id_value, normalize_status, strip_tags};
pub use types::Timeline;
