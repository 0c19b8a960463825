//! Bounded fan-out of layout inference over every bundled message.
//!
//! Pending bundles are drained in fixed-size groups. Members of a group run
//! concurrently; the next group starts once the slowest member of the current
//! one has resolved. Each call is bounded by an optional timeout and observes a
//! shared [`CancelToken`]. Failures are logged and isolated: a failing member
//! yields no layout but never affects its siblings.

use crate::bundle::ContextBundle;
use crate::error::{Error, Result};
use crate::infer::LayoutInference;
use crate::model::{LayoutAnalysis, LayoutIndex, MessageEntity};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Configuration for the batch controller
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Members per group (at least 1)
    pub concurrency: usize,
    /// Deadline per inference call; `None` disables it
    pub call_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            call_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl BatchConfig {
    /// Creates a new batch config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the group size; zero is treated as one
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the per-call deadline
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Cooperative cancellation shared by every in-flight call
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token that is not cancelled
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancels every clone of this token
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true once cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Progress after a group has been merged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Calls resolved so far
    pub completed: usize,
    /// Calls scheduled in total
    pub total: usize,
    /// 1-based index of the group just merged
    pub group: usize,
    /// Number of groups
    pub groups: usize,
}

type ProgressFn = Box<dyn Fn(Progress) + Send + Sync>;

/// Runs layout inference over all bundled messages
pub struct BatchController<I> {
    inference: I,
    config: BatchConfig,
    cancel: CancelToken,
    progress: Option<ProgressFn>,
}

impl<I: LayoutInference> BatchController<I> {
    /// Creates a controller with default configuration
    pub fn new(inference: I) -> Self {
        Self::with_config(inference, BatchConfig::default())
    }

    /// Creates a controller with custom configuration
    pub fn with_config(inference: I, config: BatchConfig) -> Self {
        Self {
            inference,
            config,
            cancel: CancelToken::new(),
            progress: None,
        }
    }

    /// Uses `cancel` instead of a private token
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Registers a callback invoked after each group
    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Infers the layout of one message; fails with [`Error::MissingBundle`]
    /// when it has no bundle.
    pub async fn infer_message(&self, message: &MessageEntity) -> Result<LayoutAnalysis> {
        let bundle = message.bundle.as_ref().ok_or_else(|| Error::MissingBundle {
            entity: message.id.name.clone(),
        })?;
        self.infer_one(&message.id.name, bundle).await
    }

    /// Infers every bundled message and returns the accepted layouts by name.
    pub async fn run<'a, M>(&self, messages: M) -> LayoutIndex
    where
        M: IntoIterator<Item = &'a MessageEntity>,
    {
        let pending: Vec<(&str, &ContextBundle)> = messages
            .into_iter()
            .filter_map(|m| m.bundle.as_ref().map(|b| (m.id.name.as_str(), b)))
            .collect();

        let total = pending.len();
        let size = self.config.concurrency.max(1);
        let groups = total.div_ceil(size);
        let mut index = LayoutIndex::new();
        let mut completed = 0;

        info!(
            "Inferring {} layout(s) in {} group(s) of up to {}",
            total, groups, size
        );

        for (group, chunk) in pending.chunks(size).enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    "Cancelled; {} layout(s) not attempted",
                    total - completed
                );
                break;
            }

            let calls = chunk.iter().map(|(name, bundle)| async move {
                (*name, self.infer_one(name, bundle).await)
            });
            for (name, result) in join_all(calls).await {
                completed += 1;
                match result {
                    Ok(analysis) => {
                        debug!("Accepted layout for {}", name);
                        index.insert(name.to_string(), analysis);
                    }
                    Err(e) => warn!("No layout for {}: {}", name, e),
                }
            }

            let progress = Progress {
                completed,
                total,
                group: group + 1,
                groups,
            };
            info!(
                "Group {}/{} done: {}/{} resolved, {} accepted",
                progress.group,
                groups,
                completed,
                total,
                index.len()
            );
            if let Some(callback) = &self.progress {
                callback(progress);
            }
        }

        index
    }

    async fn infer_one(&self, name: &str, bundle: &ContextBundle) -> Result<LayoutAnalysis> {
        let call = self.inference.infer(bundle);
        let bounded = async {
            match self.config.call_timeout {
                Some(after) => tokio::time::timeout(after, call).await.unwrap_or_else(|_| {
                    Err(Error::Timeout {
                        entity: name.to_string(),
                        after,
                    })
                }),
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled { entity: name.to_string() }),
            result = bounded => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityId, Field, PacketConstants};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Fake {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LayoutInference for Fake {
        async fn infer(&self, bundle: &ContextBundle) -> Result<LayoutAnalysis> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = if bundle.entity.starts_with("slow") { 60 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if bundle.entity.starts_with("hang") {
                std::future::pending::<()>().await;
            }
            if bundle.entity.starts_with("bad") {
                return Err(Error::malformed(&bundle.entity, "no tool output"));
            }
            Ok(LayoutAnalysis {
                entity: bundle.entity.clone(),
                fields: Vec::new(),
                total_fixed_size: 0,
                has_variable_section: false,
                variable_section_start: None,
                null_bits: BTreeMap::new(),
                notes: None,
            })
        }
    }

    fn message(name: &str, bundled: bool) -> MessageEntity {
        let id = EntityId {
            name: name.to_string(),
            namespace: "p".into(),
            category: "root".into(),
            source_path: format!("packets/{name}.java"),
        };
        let bundle = bundled.then(|| ContextBundle {
            entity: name.to_string(),
            namespace: "p".into(),
            constants: PacketConstants::default(),
            constant_decls: Vec::new(),
            fields: vec![Field::new("x", "int", false)],
            deserialize: String::new(),
            helpers: Vec::new(),
            helper_calls: BTreeSet::new(),
            nested_refs: BTreeSet::new(),
        });
        MessageEntity {
            id,
            constants: PacketConstants::default(),
            fields: Vec::new(),
            imports: Vec::new(),
            bundle,
        }
    }

    #[tokio::test]
    async fn test_groups_and_bounded_concurrency() {
        let messages: Vec<MessageEntity> = (0..12).map(|i| message(&format!("m{i}"), true)).collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let fake = Arc::new(Fake::default());
        let controller = BatchController::with_config(Arc::clone(&fake), BatchConfig::new().concurrency(5))
            .on_progress(move |p| sink.lock().unwrap().push(p));
        let index = controller.run(&messages).await;

        assert_eq!(index.len(), 12);
        assert!(fake.max_in_flight.load(Ordering::SeqCst) <= 5);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().unwrap().completed, 12);
        assert!(seen.iter().all(|p| p.groups == 3 && p.total == 12));
    }

    #[tokio::test]
    async fn test_unbundled_messages_are_filtered() {
        let messages = vec![message("a", true), message("b", false), message("c", true)];
        let fake = Arc::new(Fake::default());
        let index = BatchController::new(Arc::clone(&fake)).run(&messages).await;
        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["a", "c"]);

        let err = BatchController::new(Fake::default())
            .infer_message(&messages[1])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingBundle { .. }));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let messages = vec![message("ok1", true), message("bad", true), message("slow", true)];
        let index = BatchController::with_config(Fake::default(), BatchConfig::new().concurrency(3))
            .run(&messages)
            .await;
        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["ok1", "slow"]);
    }

    #[tokio::test]
    async fn test_timeout_bounds_a_hung_call() {
        let messages = vec![message("hang", true), message("fine", true)];
        let config = BatchConfig::new()
            .concurrency(2)
            .call_timeout(Some(Duration::from_millis(100)));
        let index = BatchController::with_config(Fake::default(), config)
            .run(&messages)
            .await;
        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["fine"]);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let messages: Vec<MessageEntity> =
            vec![message("hang1", true), message("hang2", true), message("later", true)];
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let config = BatchConfig::new().concurrency(2).call_timeout(None);
        let fake = Arc::new(Fake::default());
        let index = BatchController::with_config(Arc::clone(&fake), config)
            .cancel_token(cancel.clone())
            .run(&messages)
            .await;

        assert!(index.is_empty());
        assert!(cancel.is_cancelled());
        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
    }
}
