use crate::mastodon::PLATFORM;
use crate::mastodon::client::MastodonApi;
use crate::mastodon::types::{Status, Timeline};
use futures::FutureExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use switchboard_common::{Message, SwitchboardError, UNKNOWN, now_iso};
use switchboard_config::ConnectorConfig;
use switchboard_core::ingest::{EmitFn, PollFn};
use switchboard_core::{
    Capability, Connector, ConnectorState, ConnectorStatus, MessageCallback, PollingIngest,
    WebhookHandler, WebhookHeaders,
};

pub const SECRET_HEADER: &str = "x-webhook-secret";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 7000;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MastodonOptions {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub timeline: Timeline,
}

pub struct MastodonConnector {
    state: Arc<ConnectorState>,
    timeline: Timeline,
    webhook_enabled: bool,
    webhook_secret: Option<String>,
    since_id: Arc<Mutex<Option<String>>>,
    /// `None` when credentials are missing.
    poller: Option<PollingIngest>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl MastodonConnector {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, SwitchboardError> {
        let options: MastodonOptions =
            config
                .options()
                .map_err(|source| SwitchboardError::ConnectorOptions {
                    id: config.id.clone(),
                    source,
                })?;

        let state = Arc::new(ConnectorState::new(config.id.clone(), PLATFORM));
        let since_id = Arc::new(Mutex::new(None));
        let interval =
            Duration::from_millis(config.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));

        let poller = match (
            options.base_url.as_deref().filter(|s| !s.is_empty()),
            options.access_token.as_deref().filter(|s| !s.is_empty()),
        ) {
            (Some(base), Some(token)) => {
                let api = MastodonApi::new(base, token)
                    .map_err(|e| SwitchboardError::Config(format!("{}: {e}", config.id)))?;
                let round = Round {
                    api,
                    source_id: config.id.clone(),
                    timeline: options.timeline,
                    since_id: since_id.clone(),
                };
                let poll: PollFn = Arc::new(move || {
                    let round = round.clone();
                    async move { round.run().await }.boxed()
                });
                let emitter = state.clone();
                let emit: EmitFn = Arc::new(move |msg: Message| emitter.emit(msg));
                Some(PollingIngest::new(config.id.clone(), interval, poll, emit))
            }
            _ => None,
        };

        Ok(Self {
            state,
            timeline: options.timeline,
            webhook_enabled: config.webhook_enabled,
            webhook_secret: config.webhook_secret.clone(),
            since_id,
            poller,
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Current cursor: the largest id seen so far.
    pub fn since_id(&self) -> Option<String> {
        self.since_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Connector for MastodonConnector {
    fn id(&self) -> &str {
        self.state.id()
    }

    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn start(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.state.set_running(true) {
            return;
        }
        let Some(poller) = &self.poller else {
            tracing::warn!(
                connector = %self.state.id(),
                "base_url or access_token missing; connector idle"
            );
            return;
        };
        if self.webhook_enabled {
            tracing::info!(connector = %self.state.id(), "webhook mode; waiting for pushes");
            return;
        }
        poller.start().await;
        tracing::info!(
            connector = %self.state.id(),
            timeline = self.timeline.as_str(),
            "timeline polling started"
        );
    }

    async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        if !self.state.set_running(false) {
            return;
        }
        if let Some(poller) = &self.poller {
            poller.stop().await;
        }
        tracing::info!(connector = %self.state.id(), "stopped");
    }

    fn on_message(&self, callback: MessageCallback) {
        self.state.set_callback(callback);
    }

    fn status(&self) -> ConnectorStatus {
        self.state.status()
    }

    fn capability(&self) -> Capability<'_> {
        Capability::Webhook(self)
    }
}

impl WebhookHandler for MastodonConnector {
    fn handle_webhook(&self, payload: Option<&Value>, headers: &WebhookHeaders) -> Vec<Message> {
        if let Some(expected) = self.webhook_secret.as_deref() {
            if headers.get(SECRET_HEADER) != Some(expected) {
                tracing::debug!(connector = %self.state.id(), "webhook secret mismatch");
                return Vec::new();
            }
        }
        match payload.filter(|p| id_string(p.get("id")).is_some()) {
            Some(status) => vec![normalize_status(self.state.id(), self.timeline, status)],
            None => {
                tracing::debug!(connector = %self.state.id(), "webhook payload has no status id");
                Vec::new()
            }
        }
    }
}

/// One polling round, cloned into every tick.
#[derive(Clone)]
struct Round {
    api: MastodonApi,
    source_id: String,
    timeline: Timeline,
    since_id: Arc<Mutex<Option<String>>>,
}

impl Round {
    async fn run(&self) -> anyhow::Result<Vec<Message>> {
        let cursor = self
            .since_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let items = self.api.fetch(self.timeline, cursor.as_deref()).await?;

        let mut messages = Vec::with_capacity(items.len());
        let mut max_id: Option<String> = None;
        for item in &items {
            let status = match self.timeline {
                Timeline::Mentions => {
                    if item.get("type").and_then(Value::as_str) != Some("mention") {
                        continue;
                    }
                    match item.get("status").filter(|s| s.is_object()) {
                        Some(status) => status,
                        None => continue,
                    }
                }
                _ => item,
            };
            if id_string(status.get("id")).is_none() {
                continue;
            }
            messages.push(normalize_status(&self.source_id, self.timeline, status));
            // the cursor follows the feed's own ids (notification ids for mentions)
            max_id = max_id_value(max_id, id_string(item.get("id")));
        }

        if let Some(next) = max_id {
            tracing::debug!(
                connector = %self.source_id,
                since_id = %next,
                count = messages.len(),
                "timeline advanced"
            );
            *self.since_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(next);
        }
        Ok(messages)
    }
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Larger of two ids: numerically when both are digit strings, lexically
/// otherwise.
///
/// ```
/// use switchboard_social::mastodon::max_id_value;
///
/// let max = max_id_value(Some("9".into()), Some("11".into()));
/// assert_eq!(max.as_deref(), Some("11"));
/// ```
pub fn max_id_value(current: Option<String>, next: Option<String>) -> Option<String> {
    match (current, next) {
        (current, None) => current,
        (None, next) => next,
        (Some(current), Some(next)) => {
            if compare_ids(&next, &current) == Ordering::Greater {
                Some(next)
            } else {
                Some(current)
            }
        }
    }
}

fn compare_ids(a: &str, b: &str) -> Ordering {
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|c| c.is_ascii_digit());
    if numeric(a) && numeric(b) {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}

/// Drop HTML tags and surrounding whitespace.
pub fn strip_tags(html: &str) -> String {
    TAG_RE.replace_all(html, "").trim().to_string()
}

/// Map a Mastodon status object onto the canonical [`Message`].
pub fn normalize_status(source_id: &str, timeline: Timeline, raw: &Value) -> Message {
    let status = Status::deserialize(raw).unwrap_or_default();
    Message {
        id: status.id.map(|id| id.to_string()).unwrap_or_default(),
        platform: PLATFORM.to_string(),
        source_id: source_id.to_string(),
        channel_id: status
            .visibility
            .unwrap_or_else(|| timeline.as_str().to_string()),
        author_id: status
            .account
            .and_then(|a| a.id)
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        content: strip_tags(status.content.as_deref().unwrap_or_default()),
        created_at: status.created_at.unwrap_or_else(now_iso),
        raw: raw.clone(),
    }
}
