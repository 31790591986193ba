//! Dedup, filter and handler fan-out for normalized messages.
//!
//! [`Pipeline::process`] drops messages whose `platform:source_id:id` key was
//! already seen, runs filters in registration order, then awaits every handler
//! in registration order. Handler errors are not caught: the first failure
//! aborts the remaining handlers for that message and is returned to the
//! caller.
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use switchboard_common::Message;

pub const DEFAULT_DEDUP_LIMIT: usize = 10_000;

/// Downstream consumer of processed messages (storage, broadcast, ...).
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: &Message) -> Result<()>;
}

/// Predicate deciding whether a message reaches the handlers.
pub type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, msg: &Message) -> Result<()> {
        (self.0)(msg.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```
/// use switchboard_core::pipeline::handler_fn;
///
/// let handler = handler_fn(|msg| async move {
///     println!("{}", msg.content);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// What [`Pipeline::process`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Duplicate,
    Filtered,
    Delivered,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub dedup_limit: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dedup_limit: DEFAULT_DEDUP_LIMIT,
        }
    }
}

/// Bounded set of seen keys, evicted in insertion order.
#[derive(Debug)]
struct DedupCache {
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<String>,
    limit: usize,
}

impl DedupCache {
    fn new(limit: usize) -> Self {
        Self {
            seen: HashMap::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    /// Record `key`; returns `false` if it was already present.
    fn insert(&mut self, key: String) -> bool {
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key.clone(), Utc::now());
        self.order.push_back(key);

        if self.seen.len() > self.limit {
            // the key just recorded always survives
            let target = (self.limit / 2).max(1);
            while self.seen.len() > target {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.seen.remove(&oldest);
            }
            tracing::debug!(
                limit = self.limit,
                remaining = self.seen.len(),
                "dedup cache pruned"
            );
        }
        true
    }

    fn len(&self) -> usize {
        self.seen.len()
    }
}

pub struct Pipeline {
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
    filters: RwLock<Vec<MessageFilter>>,
    dedup: Mutex<DedupCache>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineOptions::default())
    }
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            filters: RwLock::new(Vec::new()),
            dedup: Mutex::new(DedupCache::new(options.dedup_limit)),
        }
    }

    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn add_filter<F>(&self, filter: F)
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(filter));
    }

    /// Number of keys currently held by the dedup cache.
    pub fn dedup_len(&self) -> usize {
        self.dedup.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Dedup, filter, then hand the message to every handler in order.
    pub async fn process(&self, msg: &Message) -> Result<Disposition> {
        let fresh = self
            .dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(msg.dedup_key());
        if !fresh {
            tracing::trace!(key = %msg.dedup_key(), "duplicate dropped");
            return Ok(Disposition::Duplicate);
        }

        let filters = self
            .filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if !filters.iter().all(|f| f(msg)) {
            return Ok(Disposition::Filtered);
        }

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler.handle(msg).await?;
        }
        Ok(Disposition::Delivered)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn msg(platform: &str, source: &str, id: &str) -> Message {
        Message {
            id: id.into(),
            platform: platform.into(),
            source_id: source.into(),
            channel_id: "c".into(),
            author_id: "a".into(),
            content: format!("body {id}"),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            raw: Value::Null,
        }
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, msg: &Message) -> Result<()> {
            self.seen.lock().unwrap().push(msg.id.clone());
            Ok(())
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn duplicates_reach_handlers_once() {
        let pipeline = Pipeline::default();
        let rec = recorder();
        pipeline.add_handler(rec.clone());

        let first = pipeline.process(&msg("telegram", "t1", "5")).await.unwrap();
        let second = pipeline.process(&msg("telegram", "t1", "5")).await.unwrap();

        assert_eq!(first, Disposition::Delivered);
        assert_eq!(second, Disposition::Duplicate);
        assert_eq!(*rec.seen.lock().unwrap(), vec!["5"]);
    }

    #[tokio::test]
    async fn same_id_on_other_source_is_distinct() {
        let pipeline = Pipeline::default();
        let rec = recorder();
        pipeline.add_handler(rec.clone());

        pipeline.process(&msg("telegram", "t1", "5")).await.unwrap();
        pipeline.process(&msg("telegram", "t2", "5")).await.unwrap();
        pipeline.process(&msg("mastodon", "t1", "5")).await.unwrap();

        assert_eq!(rec.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn cache_is_bounded_and_halved() {
        let limit = 10;
        let pipeline = Pipeline::new(PipelineOptions { dedup_limit: limit });

        for i in 0..limit {
            pipeline.process(&msg("p", "s", &i.to_string())).await.unwrap();
        }
        assert_eq!(pipeline.dedup_len(), limit);

        pipeline.process(&msg("p", "s", "overflow")).await.unwrap();
        assert!(pipeline.dedup_len() <= limit / 2);

        for i in 0..100 {
            pipeline.process(&msg("p", "s", &format!("x{i}"))).await.unwrap();
            assert!(pipeline.dedup_len() <= limit);
        }
    }

    #[tokio::test]
    async fn eviction_drops_oldest_first() {
        let pipeline = Pipeline::new(PipelineOptions { dedup_limit: 4 });
        for id in ["a", "b", "c", "d", "e"] {
            pipeline.process(&msg("p", "s", id)).await.unwrap();
        }
        // "a".."c" evicted, "d" and "e" kept.
        assert_eq!(pipeline.dedup_len(), 2);
        assert_eq!(
            pipeline.process(&msg("p", "s", "e")).await.unwrap(),
            Disposition::Duplicate
        );
        assert_eq!(
            pipeline.process(&msg("p", "s", "a")).await.unwrap(),
            Disposition::Delivered
        );
    }

    #[tokio::test]
    async fn limit_of_one_still_catches_repeats() {
        let pipeline = Pipeline::new(PipelineOptions { dedup_limit: 1 });
        assert_eq!(
            pipeline.process(&msg("p", "s", "a")).await.unwrap(),
            Disposition::Delivered
        );
        assert_eq!(
            pipeline.process(&msg("p", "s", "b")).await.unwrap(),
            Disposition::Delivered
        );
        assert_eq!(pipeline.dedup_len(), 1);
        assert_eq!(
            pipeline.process(&msg("p", "s", "b")).await.unwrap(),
            Disposition::Duplicate
        );
        assert_eq!(
            pipeline.process(&msg("p", "s", "a")).await.unwrap(),
            Disposition::Delivered
        );
    }

    #[tokio::test]
    async fn failing_filter_blocks_all_handlers() {
        let pipeline = Pipeline::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        pipeline.add_handler(handler_fn(move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        pipeline.add_filter(|_| true);
        pipeline.add_filter(|m| m.content.contains("keep"));

        let outcome = pipeline.process(&msg("p", "s", "1")).await.unwrap();
        assert_eq!(outcome, Disposition::Filtered);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let pipeline = Pipeline::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["storage", "broadcast"] {
            let order = order.clone();
            pipeline.add_handler(handler_fn(move |_| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(tag);
                    Ok(())
                }
            }));
        }
        pipeline.process(&msg("p", "s", "1")).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["storage", "broadcast"]);
    }

    #[tokio::test]
    async fn handler_error_aborts_later_handlers() {
        let pipeline = Pipeline::default();
        let rec = recorder();
        pipeline.add_handler(handler_fn(|_| async { Err(anyhow!("sink down")) }));
        pipeline.add_handler(rec.clone());

        let err = pipeline.process(&msg("p", "s", "1")).await.unwrap_err();
        assert!(err.to_string().contains("sink down"));
        assert!(rec.seen.lock().unwrap().is_empty());

        // The key was recorded before the failure, so a retry is a duplicate.
        assert_eq!(
            pipeline.process(&msg("p", "s", "1")).await.unwrap(),
            Disposition::Duplicate
        );
    }
}
