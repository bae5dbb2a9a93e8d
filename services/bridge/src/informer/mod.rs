//! Watch-driven informers.
//!
//! An [`Informer`] consumes one watch stream, keeps the last-known version of
//! every object, and turns raw watch events into [`Change`]s for a named
//! [`ChangeHandler`]. Handler outputs go to a bounded queue.
//!
//! ## Delivery
//!
//! All outputs of one change are enqueued as one step: capacity for the whole
//! group is reserved before anything is sent, so a consumer never observes half
//! of a change. A full queue blocks the informer (never drops) until capacity
//! frees up or shutdown is requested.
//!
//! ## Resync
//!
//! A (re)list replaces the cache. Objects missing from the new list produce
//! `Deleted`, objects present in both produce `Updated`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tether_cluster::{
    ClusterClient, ClusterEvent, ClusterObject, PodInfo, WatchEvent, WatchStream, WorkloadInfo,
};
use tether_reconcile::DEFAULT_REWATCH_DELAY;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub mod crash;
pub mod instance;
pub mod workload;

pub use crash::{CrashEventHandler, CrashReportGenerator, DefaultCrashReportGenerator};
pub use instance::InstanceChangeHandler;
pub use workload::{StatefulSetDeleteHandler, UriAnnotationUpdateHandler, WorkloadHandler};

/// A change to one object, relative to the informer's last-known state.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<K> {
    Added(K),
    Updated { old: K, new: K },
    Deleted(K),
}

/// Reacts to changes of one object kind.
#[async_trait]
pub trait ChangeHandler<K: Send + Sync + 'static>: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Returns the outputs for one change; errors are handled internally.
    async fn handle(&self, change: &Change<K>) -> Vec<Self::Output>;
}

// =============================================================================
// Cache
// =============================================================================

/// Last-known objects, keyed by name.
pub(crate) struct WatchCache<K> {
    known: BTreeMap<String, K>,
    relist: Option<BTreeMap<String, K>>,
}

impl<K> Default for WatchCache<K> {
    fn default() -> Self {
        Self {
            known: BTreeMap::new(),
            relist: None,
        }
    }
}

impl<K: ClusterObject> WatchCache<K> {
    /// Applies a watch event and returns the resulting changes.
    pub(crate) fn apply(&mut self, event: WatchEvent<K>) -> Vec<Change<K>> {
        match event {
            WatchEvent::Init => {
                self.relist = Some(BTreeMap::new());
                Vec::new()
            }
            WatchEvent::InitApply(obj) => match &mut self.relist {
                Some(listed) => {
                    listed.insert(obj.key().to_string(), obj);
                    Vec::new()
                }
                None => vec![self.upsert(obj)],
            },
            WatchEvent::InitDone => self.finish_relist(),
            WatchEvent::Apply(obj) => vec![self.upsert(obj)],
            WatchEvent::Delete(obj) => {
                let last_known = self.known.remove(obj.key()).unwrap_or(obj);
                vec![Change::Deleted(last_known)]
            }
        }
    }

    fn upsert(&mut self, obj: K) -> Change<K> {
        match self.known.insert(obj.key().to_string(), obj.clone()) {
            Some(old) => Change::Updated { old, new: obj },
            None => Change::Added(obj),
        }
    }

    fn finish_relist(&mut self) -> Vec<Change<K>> {
        let listed = self.relist.take().unwrap_or_default();
        let previous = std::mem::take(&mut self.known);

        let mut changes: Vec<_> = previous
            .iter()
            .filter(|(key, _)| !listed.contains_key(*key))
            .map(|(_, obj)| Change::Deleted(obj.clone()))
            .collect();

        for (key, obj) in &listed {
            changes.push(match previous.get(key) {
                Some(old) => Change::Updated {
                    old: old.clone(),
                    new: obj.clone(),
                },
                None => Change::Added(obj.clone()),
            });
        }

        self.known = listed;
        changes
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.known.len()
    }
}

// =============================================================================
// Driver
// =============================================================================

type WatchFactory<K> = Box<dyn Fn() -> WatchStream<K> + Send + Sync>;

enum Undelivered {
    Shutdown,
    Closed,
}

/// Drives one handler from one watch.
pub struct Informer<K, H>
where
    K: ClusterObject,
    H: ChangeHandler<K>,
{
    watch: WatchFactory<K>,
    handler: H,
    outbox: mpsc::Sender<H::Output>,
    rewatch_delay: Duration,
}

impl<K, H> Informer<K, H>
where
    K: ClusterObject,
    H: ChangeHandler<K>,
{
    /// Creates an informer that opens watches with `watch`.
    pub fn new<W>(watch: W, handler: H, outbox: mpsc::Sender<H::Output>) -> Self
    where
        W: Fn() -> WatchStream<K> + Send + Sync + 'static,
    {
        Self {
            watch: Box::new(watch),
            handler,
            outbox,
            rewatch_delay: DEFAULT_REWATCH_DELAY,
        }
    }

    /// Sets the delay before re-opening an ended watch.
    #[must_use]
    pub fn with_rewatch_delay(mut self, delay: Duration) -> Self {
        self.rewatch_delay = delay;
        self
    }

    /// Runs until shutdown is requested.
    ///
    /// A handler call in progress always completes; its outputs are abandoned
    /// if shutdown arrives while waiting for queue capacity.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.handler.name();
        info!(informer = name, "Starting informer");

        let mut cache = WatchCache::default();

        'watch: loop {
            if *shutdown.borrow() {
                break;
            }

            let mut stream = (self.watch)();
            debug!(informer = name, "Watch opened");

            loop {
                let next = tokio::select! {
                    biased;
                    _ = crate::shutdown_requested(&mut shutdown) => break 'watch,
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(event)) => {
                        for change in cache.apply(event) {
                            let outputs = self.handler.handle(&change).await;
                            match deliver(&self.outbox, outputs, &mut shutdown).await {
                                Ok(()) => {}
                                Err(Undelivered::Shutdown) => break 'watch,
                                Err(Undelivered::Closed) => {
                                    warn!(informer = name, "Output queue closed");
                                    break 'watch;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(informer = name, error = %e, "Watch error");
                    }
                    None => {
                        warn!(informer = name, "Watch ended; re-subscribing");
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = crate::shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(self.rewatch_delay) => {}
            }
        }

        info!(informer = name, "Informer stopped");
    }
}

impl<H> Informer<PodInfo, H>
where
    H: ChangeHandler<PodInfo>,
{
    /// Informer over managed pods.
    pub fn pods(client: Arc<dyn ClusterClient>, handler: H, outbox: mpsc::Sender<H::Output>) -> Self {
        Self::new(move || client.watch_pods(), handler, outbox)
    }
}

impl<H> Informer<WorkloadInfo, H>
where
    H: ChangeHandler<WorkloadInfo>,
{
    /// Informer over managed workloads.
    pub fn workloads(
        client: Arc<dyn ClusterClient>,
        handler: H,
        outbox: mpsc::Sender<H::Output>,
    ) -> Self {
        Self::new(move || client.watch_workloads(), handler, outbox)
    }
}

impl<H> Informer<ClusterEvent, H>
where
    H: ChangeHandler<ClusterEvent>,
{
    /// Informer over pod events.
    pub fn events(
        client: Arc<dyn ClusterClient>,
        handler: H,
        outbox: mpsc::Sender<H::Output>,
    ) -> Self {
        Self::new(move || client.watch_events(), handler, outbox)
    }
}

/// Enqueues `items` as one group.
async fn deliver<T: Send>(
    outbox: &mpsc::Sender<T>,
    items: Vec<T>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), Undelivered> {
    if items.is_empty() {
        return Ok(());
    }

    if items.len() <= outbox.max_capacity() {
        let permits = tokio::select! {
            biased;
            _ = crate::shutdown_requested(shutdown) => return Err(Undelivered::Shutdown),
            permits = outbox.reserve_many(items.len()) => permits.map_err(|_| Undelivered::Closed)?,
        };
        for (permit, item) in permits.zip(items) {
            permit.send(item);
        }
        return Ok(());
    }

    // Larger than the whole queue; send in order instead.
    for item in items {
        tokio::select! {
            biased;
            _ = crate::shutdown_requested(shutdown) => return Err(Undelivered::Shutdown),
            sent = outbox.send(item) => sent.map_err(|_| Undelivered::Closed)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Obj {
        name: String,
        value: u32,
    }

    impl ClusterObject for Obj {
        fn key(&self) -> &str {
            &self.name
        }
    }

    fn obj(name: &str, value: u32) -> Obj {
        Obj {
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_cache_added_updated_deleted() {
        let mut cache = WatchCache::default();

        assert_eq!(
            cache.apply(WatchEvent::Apply(obj("a", 1))),
            vec![Change::Added(obj("a", 1))]
        );
        assert_eq!(
            cache.apply(WatchEvent::Apply(obj("a", 2))),
            vec![Change::Updated {
                old: obj("a", 1),
                new: obj("a", 2)
            }]
        );
        // Deletes report the last-known version.
        assert_eq!(
            cache.apply(WatchEvent::Delete(obj("a", 9))),
            vec![Change::Deleted(obj("a", 2))]
        );
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cache_relist_synthesizes_deletes() {
        let mut cache = WatchCache::default();
        cache.apply(WatchEvent::Apply(obj("a", 1)));
        cache.apply(WatchEvent::Apply(obj("b", 1)));

        assert!(cache.apply(WatchEvent::Init).is_empty());
        assert!(cache.apply(WatchEvent::InitApply(obj("b", 2))).is_empty());
        assert!(cache.apply(WatchEvent::InitApply(obj("c", 1))).is_empty());

        let changes = cache.apply(WatchEvent::InitDone);
        assert_eq!(
            changes,
            vec![
                Change::Deleted(obj("a", 1)),
                Change::Updated {
                    old: obj("b", 1),
                    new: obj("b", 2)
                },
                Change::Added(obj("c", 1)),
            ]
        );
        assert_eq!(cache.len(), 2);
    }

    struct Echo {
        copies: usize,
    }

    #[async_trait]
    impl ChangeHandler<Obj> for Echo {
        type Output = String;

        fn name(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, change: &Change<Obj>) -> Vec<String> {
            let label = match change {
                Change::Added(o) => format!("added {}", o.name),
                Change::Updated { new, .. } => format!("updated {}", new.name),
                Change::Deleted(o) => format!("deleted {}", o.name),
            };
            vec![label; self.copies]
        }
    }

    fn scripted(watches: Vec<Vec<WatchEvent<Obj>>>) -> impl Fn() -> WatchStream<Obj> + Send + Sync {
        let watches = Mutex::new(VecDeque::from(watches));
        move || {
            let next = watches.lock().unwrap().pop_front();
            match next {
                Some(events) => stream::iter(events.into_iter().map(Ok)).boxed(),
                None => stream::pending().boxed(),
            }
        }
    }

    async fn recv_n(rx: &mut mpsc::Receiver<String>, n: usize) -> Vec<String> {
        let mut out = Vec::new();
        for _ in 0..n {
            let item = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out")
                .expect("closed");
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_informer_resubscribes_and_resyncs() {
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let watches = scripted(vec![
            vec![
                WatchEvent::Init,
                WatchEvent::InitApply(obj("a", 1)),
                WatchEvent::InitDone,
            ],
            vec![WatchEvent::Init, WatchEvent::InitDone],
        ]);
        let informer = Informer::new(watches, Echo { copies: 1 }, tx)
            .with_rewatch_delay(Duration::from_millis(1));
        let handle = tokio::spawn(informer.run(shutdown_rx));

        assert_eq!(recv_n(&mut rx, 2).await, vec!["added a", "deleted a"]);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_informer_delivers_change_outputs_together() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let watches = scripted(vec![vec![
            WatchEvent::Apply(obj("a", 1)),
            WatchEvent::Apply(obj("b", 1)),
        ]]);
        let informer = Informer::new(watches, Echo { copies: 3 }, tx);
        tokio::spawn(informer.run(shutdown_rx));

        assert_eq!(
            recv_n(&mut rx, 6).await,
            vec!["added a", "added a", "added a", "added b", "added b", "added b"]
        );
    }

    #[tokio::test]
    async fn test_informer_abandons_blocked_group_on_shutdown() {
        let (tx, mut rx) = mpsc::channel(2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send("queued 1".to_string()).await.unwrap();
        tx.send("queued 2".to_string()).await.unwrap();

        let watches = scripted(vec![vec![WatchEvent::Apply(obj("a", 1))]]);
        let informer = Informer::new(watches, Echo { copies: 2 }, tx);
        let handle = tokio::spawn(informer.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(recv_n(&mut rx, 2).await, vec!["queued 1", "queued 2"]);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_group_is_sent_in_order() {
        let (tx, mut rx) = mpsc::channel(1);
        let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let consumer = tokio::spawn(async move { recv_n(&mut rx, 3).await });
        let items = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        assert!(deliver(&tx, items, &mut shutdown_rx).await.is_ok());

        assert_eq!(consumer.await.unwrap(), vec!["x", "y", "z"]);
    }
}
