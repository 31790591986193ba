//! Connector abstraction shared by every platform source.
//!
//! A connector owns its ingestion strategy (polling or inbound webhook), its
//! cursor and its cancellation token. It reports normalized [`Message`]s
//! through a single callback installed with [`Connector::on_message`].
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use switchboard_common::{now_iso, Message};

/// Emission callback installed by the runner.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Point-in-time view of a connector, derived on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    pub platform: String,
    pub id: String,
}

/// Inbound request headers, keyed by lowercased name.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders(BTreeMap<String, String>);

impl WebhookHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for WebhookHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k.as_ref(), v);
        }
        headers
    }
}

/// Push-based ingestion for platforms that can call us.
///
/// Implementations verify the shared secret, parse the payload and return
/// the resulting messages. An empty vector means "ignore"; the callback is
/// never invoked from here, the caller routes the result.
pub trait WebhookHandler: Send + Sync {
    fn handle_webhook(&self, payload: Option<&Value>, headers: &WebhookHeaders) -> Vec<Message>;
}

/// Optional capabilities a connector exposes beyond the lifecycle.
pub enum Capability<'a> {
    Webhook(&'a dyn WebhookHandler),
    PollOnly,
}

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    fn id(&self) -> &str;
    fn platform(&self) -> &str;

    /// Begin ingesting. Idempotent; never fails on missing credentials.
    async fn start(&self);

    /// Stop ingesting and wait until no further emission can happen.
    async fn stop(&self);

    /// Install the emission callback, replacing any previous one.
    fn on_message(&self, callback: MessageCallback);

    fn status(&self) -> ConnectorStatus;

    fn capability(&self) -> Capability<'_> {
        Capability::PollOnly
    }
}

/// Bookkeeping shared by connector implementations: running flag, last
/// emission time and the installed callback.
pub struct ConnectorState {
    id: String,
    platform: String,
    running: AtomicBool,
    last_message_at: Mutex<Option<String>>,
    callback: RwLock<Option<MessageCallback>>,
}

impl ConnectorState {
    pub fn new(id: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            running: AtomicBool::new(false),
            last_message_at: Mutex::new(None),
            callback: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Set the running flag, returning the previous value.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::SeqCst)
    }

    pub fn set_callback(&self, callback: MessageCallback) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    /// Stamp `last_message_at` and hand the message to the callback, if any.
    pub fn emit(&self, msg: Message) {
        *self
            .last_message_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(now_iso());
        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(cb) => cb(msg),
            None => tracing::trace!(connector = %self.id, id = %msg.id, "no callback installed"),
        }
    }

    pub fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            running: self.is_running(),
            last_message_at: self
                .last_message_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            platform: self.platform.clone(),
            id: self.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::msg;

    #[test]
    fn headers_are_case_insensitive() {
        let headers: WebhookHeaders = [("X-Webhook-Secret", "s3")].into_iter().collect();
        assert_eq!(headers.get("x-webhook-secret"), Some("s3"));
        assert_eq!(headers.get("X-WEBHOOK-SECRET"), Some("s3"));
        assert_eq!(headers.get("other"), None);
    }

    #[test]
    fn status_omits_last_message_until_first_emit() {
        let state = ConnectorState::new("m1", "mastodon");
        let before = serde_json::to_value(state.status()).unwrap();
        assert!(before.get("last_message_at").is_none());
        assert_eq!(before["running"], false);

        state.emit(msg("mastodon", "m1", "1"));
        let after = state.status();
        assert!(after.last_message_at.is_some());
    }

    #[test]
    fn latest_callback_wins() {
        let state = ConnectorState::new("t1", "telegram");
        let first = Arc::new(Mutex::new(0));
        let second = Arc::new(Mutex::new(0));
        let f = first.clone();
        state.set_callback(Arc::new(move |_| *f.lock().unwrap() += 1));
        let s = second.clone();
        state.set_callback(Arc::new(move |_| *s.lock().unwrap() += 1));

        state.emit(msg("telegram", "t1", "1"));
        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[test]
    fn set_running_reports_previous() {
        let state = ConnectorState::new("t1", "telegram");
        assert!(!state.set_running(true));
        assert!(state.set_running(true));
        assert!(state.is_running());
    }
}
