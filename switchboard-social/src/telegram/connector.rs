use crate::telegram::PLATFORM;
use crate::telegram::client::{DEFAULT_API_BASE, TelegramApi};
use crate::telegram::types::{TgMessage, Update};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use switchboard_common::{Message, SwitchboardError, UNKNOWN, iso_timestamp, now_iso};
use switchboard_config::ConnectorConfig;
use switchboard_core::{
    CancellableTask, Capability, Connector, ConnectorState, ConnectorStatus, MessageCallback,
    WebhookHandler, WebhookHeaders,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Platform options read from the connector's config entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramOptions {
    pub bot_token: Option<String>,
    pub webhook_url: Option<String>,
    pub allowed_updates: Option<Vec<String>>,
    pub poll_timeout_sec: u64,
    pub api_base: String,
}

impl Default for TelegramOptions {
    fn default() -> Self {
        Self {
            bot_token: None,
            webhook_url: None,
            allowed_updates: None,
            poll_timeout_sec: 25,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Telegram bot source: long-polls `getUpdates`, or receives pushed updates
/// when webhook mode is enabled.
pub struct TelegramConnector {
    state: Arc<ConnectorState>,
    options: TelegramOptions,
    retry_delay: Duration,
    webhook_enabled: bool,
    webhook_secret: Option<String>,
    api: Option<TelegramApi>,
    offset: Arc<AtomicI64>,
    task: Mutex<Option<CancellableTask>>,
}

impl TelegramConnector {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, SwitchboardError> {
        let options: TelegramOptions =
            config
                .options()
                .map_err(|source| SwitchboardError::ConnectorOptions {
                    id: config.id.clone(),
                    source,
                })?;

        let api = match options.bot_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Some(
                TelegramApi::new(&options.api_base, token)
                    .map_err(|e| SwitchboardError::Config(format!("{}: {e}", config.id)))?,
            ),
            None => None,
        };

        Ok(Self {
            state: Arc::new(ConnectorState::new(config.id.clone(), PLATFORM)),
            retry_delay: Duration::from_millis(
                config.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            webhook_enabled: config.webhook_enabled,
            webhook_secret: config.webhook_secret.clone(),
            options,
            api,
            offset: Arc::new(AtomicI64::new(0)),
            task: Mutex::new(None),
        })
    }

    /// Next `getUpdates` offset.
    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    async fn register_webhook(&self, api: &TelegramApi) {
        let Some(url) = self.options.webhook_url.as_deref() else {
            tracing::info!(
                connector = %self.state.id(),
                "webhook mode without webhook_url; expecting external registration"
            );
            return;
        };
        match api
            .set_webhook(
                url,
                self.webhook_secret.as_deref(),
                self.options.allowed_updates.as_deref(),
            )
            .await
        {
            Ok(()) => tracing::info!(connector = %self.state.id(), "webhook registered"),
            Err(err) => {
                tracing::warn!(connector = %self.state.id(), error = %err, "setWebhook failed")
            }
        }
    }
}

#[async_trait::async_trait]
impl Connector for TelegramConnector {
    fn id(&self) -> &str {
        self.state.id()
    }

    fn platform(&self) -> &str {
        PLATFORM
    }

    async fn start(&self) {
        let mut task = self.task.lock().await;
        if self.state.set_running(true) {
            return;
        }
        let Some(api) = &self.api else {
            tracing::warn!(connector = %self.state.id(), "bot_token missing; connector idle");
            return;
        };

        if self.webhook_enabled {
            self.register_webhook(api).await;
            return;
        }

        let poller = LongPoll {
            api: api.clone(),
            state: self.state.clone(),
            offset: self.offset.clone(),
            timeout_sec: self.options.poll_timeout_sec,
            allowed_updates: self.options.allowed_updates.clone(),
            retry_delay: self.retry_delay,
        };
        *task = Some(CancellableTask::spawn(move |cancel| poller.run(cancel)));
        tracing::info!(connector = %self.state.id(), "long-polling started");
    }

    async fn stop(&self) {
        let mut task = self.task.lock().await;
        if !self.state.set_running(false) {
            return;
        }
        if let Some(task) = task.take() {
            task.shutdown().await;
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

impl WebhookHandler for TelegramConnector {
    fn handle_webhook(&self, payload: Option<&Value>, headers: &WebhookHeaders) -> Vec<Message> {
        if let Some(expected) = self.webhook_secret.as_deref() {
            if headers.get(SECRET_HEADER) != Some(expected) {
                tracing::debug!(connector = %self.state.id(), "webhook secret mismatch");
                return Vec::new();
            }
        }
        let Some(update) = payload.filter(|p| p.is_object()) else {
            tracing::debug!(connector = %self.state.id(), "webhook payload is not an object");
            return Vec::new();
        };
        match update.get("message").or_else(|| update.get("channel_post")) {
            Some(msg) => vec![normalize_message(self.state.id(), msg)],
            None => {
                tracing::debug!(connector = %self.state.id(), "webhook update carries no message");
                Vec::new()
            }
        }
    }
}

/// Everything the long-poll task needs, detached from the connector.
struct LongPoll {
    api: TelegramApi,
    state: Arc<ConnectorState>,
    offset: Arc<AtomicI64>,
    timeout_sec: u64,
    allowed_updates: Option<Vec<String>>,
    retry_delay: Duration,
}

impl LongPoll {
    async fn run(self, cancel: CancellationToken) {
        loop {
            let offset = self.offset.load(Ordering::SeqCst);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.api.get_updates(
                    offset,
                    self.timeout_sec,
                    self.allowed_updates.as_deref(),
                ) => res,
            };

            match fetched {
                Ok(updates) => {
                    if !self.deliver(updates, &cancel) {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        connector = %self.state.id(),
                        offset,
                        error = %err,
                        "getUpdates failed; retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
        tracing::debug!(connector = %self.state.id(), "long-poll loop exited");
    }

    /// Emit each update, then move the offset past it. Returns `false` once
    /// cancelled; updates not yet emitted stay unacknowledged and are fetched
    /// again on restart.
    fn deliver(&self, updates: Vec<Update>, cancel: &CancellationToken) -> bool {
        for update in updates {
            if cancel.is_cancelled() {
                return false;
            }
            if let Some(raw) = update.message_like() {
                self.state.emit(normalize_message(self.state.id(), raw));
            }
            if let Some(id) = update.update_id {
                self.offset.store(id + 1, Ordering::SeqCst);
            }
        }
        true
    }
}

/// Map a Telegram message object onto the canonical [`Message`].
pub fn normalize_message(source_id: &str, raw: &Value) -> Message {
    let msg = TgMessage::deserialize(raw).unwrap_or_default();

    let id = msg
        .message_id
        .or(msg.message_thread_id)
        .map(|n| n.to_string())
        .unwrap_or_else(|| Utc::now().timestamp_millis().to_string());
    let channel_id = msg
        .chat
        .and_then(|c| c.id)
        .map(|id| id.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let author_id = msg
        .from
        .and_then(|p| p.id)
        .or_else(|| msg.sender_chat.and_then(|p| p.id))
        .map(|id| id.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let created_at = msg
        .date
        .filter(|d| *d > 0)
        .and_then(|d| DateTime::<Utc>::from_timestamp(d, 0))
        .map(iso_timestamp)
        .unwrap_or_else(now_iso);

    Message {
        id,
        platform: PLATFORM.to_string(),
        source_id: source_id.to_string(),
        channel_id,
        author_id,
        content: msg.text.or(msg.caption).unwrap_or_default(),
        created_at,
        raw: raw.clone(),
    }
}
