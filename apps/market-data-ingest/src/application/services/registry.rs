//! Subscription Registry
//!
//! One entry per (symbol, stream kind). Each entry owns the monitor task,
//! the capability to cancel it and the feed handle it reads. The registry
//! is owned by the orchestrator and mutated only through `&mut self`;
//! monitors never touch it.
//!
//! Stopping an entry always runs in the same order: signal the monitor,
//! wait for the task to finish, then release the feed handle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::monitors::{MonitorCounters, MonitorExit, MonitorStats};
use crate::application::ports::{FeedError, FeedHandle, FeedSession};
use crate::domain::subscription::{DepthMode, StreamKind, StreamParams, SubscriptionKey};
use crate::infrastructure::metrics;

// =============================================================================
// Subscription
// =============================================================================

/// A live subscription: monitor task plus the feed resource it reads.
#[derive(Debug)]
pub struct Subscription {
    info: SubscriptionInfo,
    cancel: CancellationToken,
    task: JoinHandle<MonitorExit>,
}

/// Read-only view of a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    /// Unique subscription id.
    pub id: Uuid,
    /// Registry key.
    pub key: SubscriptionKey,
    /// Parameters the subscription was opened with.
    pub params: StreamParams,
    /// Feed handle the monitor reads.
    pub feed_handle: FeedHandle,
    /// Capability actually serving a depth subscription.
    pub depth_mode: Option<DepthMode>,
    /// When the subscription was opened.
    pub created_at: DateTime<Utc>,
    /// Monitor counters.
    pub counters: MonitorCounters,
}

impl SubscriptionInfo {
    /// Current monitor counters.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.counters.stats()
    }
}

impl Subscription {
    /// Wrap a spawned monitor.
    #[must_use]
    pub fn new(
        key: SubscriptionKey,
        params: StreamParams,
        feed_handle: FeedHandle,
        depth_mode: Option<DepthMode>,
        counters: MonitorCounters,
        cancel: CancellationToken,
        task: JoinHandle<MonitorExit>,
    ) -> Self {
        Self {
            info: SubscriptionInfo {
                id: Uuid::new_v4(),
                key,
                params,
                feed_handle,
                depth_mode,
                created_at: Utc::now(),
                counters,
            },
            cancel,
            task,
        }
    }

    /// Read-only view.
    #[must_use]
    pub const fn info(&self) -> &SubscriptionInfo {
        &self.info
    }

    /// Whether the monitor task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the monitor and wait for it to finish.
    async fn stop_monitor(cancel: CancellationToken, task: JoinHandle<MonitorExit>, key: &SubscriptionKey) {
        cancel.cancel();
        match task.await {
            Ok(exit) => debug!(subscription = %key, ?exit, "Monitor stopped"),
            Err(e) => error!(subscription = %key, error = %e, "Monitor task failed"),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Outcome of cancelling every subscription.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Entries removed.
    pub cancelled: usize,
    /// Entries whose feed handle could not be released.
    pub failures: Vec<(SubscriptionKey, FeedError)>,
}

impl TeardownReport {
    /// Whether every feed handle was released.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Active subscriptions keyed by (symbol, stream kind).
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<SubscriptionKey, Subscription>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, key: &SubscriptionKey) -> Option<&Subscription> {
        self.entries.get(key)
    }

    /// Whether an entry exists.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries whose monitor is still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.entries.values().filter(|s| s.is_running()).count()
    }

    /// Views of every entry, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<_> = self.entries.values().map(|s| s.info.clone()).collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Insert a new entry. The caller must have cancelled any previous
    /// entry for the same key.
    pub fn insert(&mut self, subscription: Subscription) {
        let key = subscription.info.key.clone();
        if let Some(previous) = self.entries.insert(key.clone(), subscription) {
            // Never reached through the orchestrator; stop the orphan anyway.
            warn!(subscription = %key, "Replaced subscription without cancelling it");
            previous.cancel.cancel();
        }
        self.publish_gauge(key.kind);
    }

    /// Cancel one entry: stop its monitor, then release its feed handle.
    ///
    /// Returns `Ok(false)` for an unknown key. The entry is removed even if
    /// the feed refuses to release the handle.
    ///
    /// # Errors
    ///
    /// Returns the feed error raised while releasing the handle.
    pub async fn cancel(
        &mut self,
        key: &SubscriptionKey,
        session: &dyn FeedSession,
    ) -> Result<bool, FeedError> {
        let Some(subscription) = self.entries.remove(key) else {
            return Ok(false);
        };
        self.publish_gauge(key.kind);

        let Subscription { info, cancel, task } = subscription;
        Subscription::stop_monitor(cancel, task, key).await;
        session.cancel(info.feed_handle).await?;
        debug!(subscription = %key, handle = %info.feed_handle, "Subscription cancelled");
        Ok(true)
    }

    /// Cancel every entry. Never stops early: failures are logged and
    /// collected in the report.
    ///
    /// All monitors are signalled first and awaited together, so no
    /// monitor is still running when the first feed handle is released.
    pub async fn cancel_all(&mut self, session: &dyn FeedSession) -> TeardownReport {
        let mut entries: Vec<_> = self.entries.drain().map(|(_, s)| s).collect();
        entries.sort_by(|a, b| a.info.key.cmp(&b.info.key));

        for subscription in &entries {
            subscription.cancel.cancel();
        }
        let stops = join_all(entries.iter_mut().map(|s| &mut s.task)).await;
        for (subscription, stopped) in entries.iter().zip(stops) {
            if let Err(e) = stopped {
                error!(subscription = %subscription.info.key, error = %e, "Monitor task failed");
            }
        }

        let mut report = TeardownReport::default();
        for subscription in entries {
            let key = subscription.info.key;
            match session.cancel(subscription.info.feed_handle).await {
                Ok(()) => debug!(subscription = %key, "Subscription cancelled"),
                Err(e) => {
                    warn!(subscription = %key, error = %e, "Failed to release feed handle");
                    report.failures.push((key.clone(), e));
                }
            }
            report.cancelled += 1;
            self.publish_gauge(key.kind);
        }
        report
    }

    fn publish_gauge(&self, kind: StreamKind) {
        let count = self
            .entries
            .keys()
            .filter(|k| k.kind.label() == kind.label())
            .count();
        metrics::set_active_subscriptions(kind, count);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::application::ports::{ConnectionParams, FeedConnector};
    use crate::domain::instrument::ContractSpec;
    use crate::domain::streaming::TickKind;
    use crate::infrastructure::feed::{FeedCall, MockFeed};

    async fn open(feed: &MockFeed) -> Arc<dyn FeedSession> {
        feed.connect(&ConnectionParams::default()).await.unwrap()
    }

    /// A subscription whose "monitor" just waits for cancellation.
    async fn subscription(
        session: &Arc<dyn FeedSession>,
        symbol: &str,
        kind: StreamKind,
    ) -> Subscription {
        let contract = session
            .define_contract(&ContractSpec::stock(symbol, "SMART", "USD"))
            .await
            .unwrap();
        let source = session.request_market_data(&contract).await.unwrap();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            MonitorExit::Cancelled
        });
        Subscription::new(
            SubscriptionKey::new(symbol, kind),
            StreamParams::None,
            source.handle(),
            None,
            MonitorCounters::new(),
            cancel,
            task,
        )
    }

    #[tokio::test]
    async fn cancel_unknown_key_is_a_no_op() {
        let feed = MockFeed::new();
        let session = open(&feed).await;
        let mut registry = SubscriptionRegistry::new();

        let removed = registry
            .cancel(&SubscriptionKey::new("AAPL", StreamKind::Quotes), session.as_ref())
            .await
            .unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn cancel_stops_monitor_before_releasing_handle() {
        let feed = MockFeed::new();
        let session = open(&feed).await;
        let mut registry = SubscriptionRegistry::new();
        let key = SubscriptionKey::new("AAPL", StreamKind::Quotes);

        registry.insert(subscription(&session, "AAPL", StreamKind::Quotes).await);
        let handle = registry.get(&key).unwrap().info().feed_handle;
        assert_eq!(registry.running(), 1);

        assert!(registry.cancel(&key, session.as_ref()).await.unwrap());
        assert!(registry.is_empty());
        assert_eq!(feed.open_handles(), 0);
        assert_eq!(feed.calls().last(), Some(&FeedCall::Cancel(handle)));
    }

    #[tokio::test]
    async fn cancel_all_continues_past_failures() {
        let feed = MockFeed::new();
        feed.fail_cancels_for("MSFT");
        let session = open(&feed).await;
        let mut registry = SubscriptionRegistry::new();

        registry.insert(subscription(&session, "AAPL", StreamKind::Quotes).await);
        registry.insert(subscription(&session, "MSFT", StreamKind::Quotes).await);
        registry.insert(subscription(&session, "NVDA", StreamKind::Trades(TickKind::Last)).await);

        let report = tokio::time::timeout(Duration::from_secs(1), registry.cancel_all(session.as_ref()))
            .await
            .unwrap();

        assert_eq!(report.cancelled, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0.symbol, "MSFT");
        assert!(!report.is_clean());
        assert!(registry.is_empty());
        assert_eq!(feed.open_handles(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_ordered_by_key() {
        let feed = MockFeed::new();
        let session = open(&feed).await;
        let mut registry = SubscriptionRegistry::new();

        registry.insert(subscription(&session, "MSFT", StreamKind::Quotes).await);
        registry.insert(subscription(&session, "AAPL", StreamKind::Depth).await);
        registry.insert(subscription(&session, "AAPL", StreamKind::Quotes).await);

        let keys: Vec<String> = registry.snapshot().iter().map(|i| i.key.to_string()).collect();
        assert_eq!(keys, ["AAPL/quotes", "AAPL/depth", "MSFT/quotes"]);

        registry.cancel_all(session.as_ref()).await;
    }
}
