//! Background ingestion tasks.
//!
//! [`CancellableTask`] pairs a spawned task with the token that stops it;
//! [`PollingIngest`] builds a fixed-interval poll loop on top of it.
use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use switchboard_common::Message;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A spawned task and the token that asks it to stop.
pub struct CancellableTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CancellableTask {
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f(cancel.clone()));
        Self { cancel, handle }
    }

    /// Cancel and wait for the task to return.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            if err.is_panic() {
                tracing::error!(error = %err, "ingest task panicked");
            }
        }
    }
}

pub type PollFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<Message>>> + Send + Sync>;
pub type EmitFn = Arc<dyn Fn(Message) + Send + Sync>;

/// Calls `poll` every `interval` (first call immediately) and forwards each
/// returned message to `emit`, in order.
///
/// Poll errors are logged and the loop keeps going. [`stop`](Self::stop)
/// interrupts both the wait and an in-flight poll, and once it returns no
/// further message is emitted.
pub struct PollingIngest {
    label: String,
    interval: Duration,
    poll: PollFn,
    emit: EmitFn,
    task: Mutex<Option<CancellableTask>>,
}

impl PollingIngest {
    pub fn new(label: impl Into<String>, interval: Duration, poll: PollFn, emit: EmitFn) -> Self {
        Self {
            label: label.into(),
            // tokio intervals panic on zero
            interval: interval.max(Duration::from_millis(1)),
            poll,
            emit,
            task: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    pub async fn start(&self) {
        let mut slot = self.task.lock().await;
        if slot.is_some() {
            return;
        }
        let label = self.label.clone();
        let interval = self.interval;
        let poll = self.poll.clone();
        let emit = self.emit.clone();
        *slot = Some(CancellableTask::spawn(move |cancel| {
            poll_loop(label, interval, poll, emit, cancel)
        }));
        tracing::debug!(
            connector = %self.label,
            interval_ms = interval.as_millis() as u64,
            "polling started"
        );
    }

    pub async fn stop(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.shutdown().await;
            tracing::debug!(connector = %self.label, "polling stopped");
        }
    }
}

async fn poll_loop(
    label: String,
    interval: Duration,
    poll: PollFn,
    emit: EmitFn,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = poll() => res,
        };

        match outcome {
            Ok(batch) => {
                for msg in batch {
                    if cancel.is_cancelled() {
                        return;
                    }
                    emit(msg);
                }
            }
            Err(err) => {
                tracing::warn!(connector = %label, error = %err, "poll failed; retrying next tick");
            }
        }
    }
}
