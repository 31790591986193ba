//! Ingestion core: connector abstraction, dedup/filter pipeline and the
//! runner that ties them together.
//!
//! Data flows connector → [`Runner`] dispatch queue → [`Pipeline::process`]
//! → handlers ([`LogSink`], [`BroadcastHub`], ...).
pub mod broadcast;
pub mod connector;
pub mod ingest;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod sink;

pub use broadcast::BroadcastHub;
pub use connector::{
    Capability, Connector, ConnectorState, ConnectorStatus, MessageCallback, WebhookHandler,
    WebhookHeaders,
};
pub use ingest::{CancellableTask, PollingIngest};
pub use pipeline::{
    handler_fn, Disposition, MessageFilter, MessageHandler, Pipeline, PipelineOptions,
};
pub use registry::{ConnectorFactory, ConnectorRegistry};
pub use runner::{Runner, WebhookRejection};
pub use sink::LogSink;
