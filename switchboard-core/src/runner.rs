//! Orchestration: owns the connectors and the pipeline and wires one into the
//! other.
//!
//! Connector emissions and webhook results are pushed onto a dispatch queue
//! drained by a single worker, so submission never blocks the caller. A
//! failing (or panicking) pipeline run is logged and the worker moves on to
//! the next message.
use crate::connector::{Capability, Connector, ConnectorStatus, WebhookHeaders};
use crate::pipeline::{MessageHandler, Pipeline, PipelineOptions};
use crate::registry::ConnectorRegistry;
use crate::sink::LogSink;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use switchboard_common::Message;
use switchboard_config::SwitchboardConfig;
use tokio::sync::{mpsc, oneshot};

enum Job {
    Process(Message),
    Flush(oneshot::Sender<()>),
}

/// Why a webhook delivery could not be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookRejection {
    NotFound,
    NotSupported,
}

impl WebhookRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::NotSupported => "not_supported",
        }
    }
}

pub struct Runner {
    pipeline: Arc<Pipeline>,
    connectors: Vec<Arc<dyn Connector>>,
    queue: mpsc::UnboundedSender<Job>,
}

impl Runner {
    /// Wire every connector's output into the dispatch queue.
    ///
    /// Spawns the dispatch worker, so this must run inside a tokio runtime.
    pub fn new(pipeline: Arc<Pipeline>, connectors: Vec<Arc<dyn Connector>>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(pipeline.clone(), rx));

        for connector in &connectors {
            let tx = queue.clone();
            let source = connector.id().to_string();
            connector.on_message(Arc::new(move |msg: Message| {
                if tx.send(Job::Process(msg)).is_err() {
                    tracing::warn!(connector = %source, "dispatch queue closed; message dropped");
                }
            }));
        }

        Self {
            pipeline,
            connectors,
            queue,
        }
    }

    /// Build a runner from configuration. Entries whose platform is unknown
    /// or whose options do not decode are logged and skipped.
    pub fn from_config(config: &SwitchboardConfig, registry: &ConnectorRegistry) -> Self {
        let pipeline = Arc::new(Pipeline::new(PipelineOptions {
            dedup_limit: config.pipeline.dedup_limit,
        }));
        pipeline.add_handler(Arc::new(LogSink));

        let mut connectors = Vec::with_capacity(config.connectors.len());
        for entry in &config.connectors {
            match registry.build(entry) {
                Ok(connector) => connectors.push(connector),
                Err(err) => tracing::warn!(
                    connector = %entry.id,
                    platform = %entry.platform,
                    error = %err,
                    "skipping connector"
                ),
            }
        }
        tracing::info!(count = connectors.len(), "connectors configured");

        Self::new(pipeline, connectors)
    }

    pub async fn start(&self) {
        join_all(self.connectors.iter().map(|c| c.start())).await;
        tracing::info!(count = self.connectors.len(), "connectors started");
    }

    pub async fn stop(&self) {
        join_all(self.connectors.iter().map(|c| c.stop())).await;
        tracing::info!(count = self.connectors.len(), "connectors stopped");
    }

    /// Statuses in configuration order.
    pub fn status(&self) -> Vec<ConnectorStatus> {
        self.connectors.iter().map(|c| c.status()).collect()
    }

    pub fn get_connector(&self, id: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.id() == id).cloned()
    }

    /// Queue a message for processing without waiting for the outcome.
    pub fn process_message(&self, msg: Message) {
        if self.queue.send(Job::Process(msg)).is_err() {
            tracing::warn!("dispatch queue closed; message dropped");
        }
    }

    /// Wait until everything queued before this call has been processed.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(Job::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Hand an inbound webhook to connector `id` and queue what it returns.
    ///
    /// Returns the number of messages queued; a rejected secret or malformed
    /// payload yields zero, not an error.
    pub fn route_webhook(
        &self,
        id: &str,
        payload: Option<&Value>,
        headers: &WebhookHeaders,
    ) -> Result<usize, WebhookRejection> {
        let connector = self.get_connector(id).ok_or(WebhookRejection::NotFound)?;
        let messages = match connector.capability() {
            Capability::Webhook(handler) => handler.handle_webhook(payload, headers),
            Capability::PollOnly => return Err(WebhookRejection::NotSupported),
        };
        let count = messages.len();
        for msg in messages {
            self.process_message(msg);
        }
        Ok(count)
    }

    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.pipeline.add_handler(handler);
    }

    pub fn add_filter<F>(&self, filter: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.pipeline.add_filter(filter);
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

async fn dispatch_loop(pipeline: Arc<Pipeline>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        let msg = match job {
            Job::Process(msg) => msg,
            Job::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        match AssertUnwindSafe(pipeline.process(&msg)).catch_unwind().await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::warn!(
                key = %msg.dedup_key(),
                error = %err,
                "message processing failed"
            ),
            Err(_) => tracing::error!(key = %msg.dedup_key(), "handler panicked"),
        }
    }
    tracing::debug!("dispatch queue drained");
}
