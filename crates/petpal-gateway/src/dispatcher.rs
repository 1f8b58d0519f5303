use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use petpal_db::{Database, DocPath};

/// Capacity of the change fan-out. A subscriber that falls this far behind
/// skips ahead with a fresh read.
const CHANGE_CAPACITY: usize = 1024;
/// Undelivered snapshots buffered per subscriber.
const SUBSCRIBER_BUFFER: usize = 64;

/// A committed write, numbered in publication order.
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub seq: u64,
    pub paths: Vec<DocPath>,
}

impl StoreChange {
    pub fn touches(&self, path: &DocPath) -> bool {
        self.paths.iter().any(|p| p.overlaps(path))
    }
}

/// Full contents of a subscribed path as of change `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocPath,
    pub seq: u64,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Snapshot(Snapshot),
    /// Reading the path failed. No further events follow.
    Failed { path: DocPath, message: String },
}

/// Turns committed writes into per-path snapshot streams.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    db: Arc<Database>,

    /// Every committed write is announced here; subscriptions filter by path
    change_tx: broadcast::Sender<StoreChange>,

    seq: Arc<AtomicU64>,

    /// Subscriptions not yet released
    live: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(db: Arc<Database>) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                db,
                change_tx,
                seq: Arc::new(AtomicU64::new(0)),
                live: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Announce a committed write. Returns its sequence number, or the current
    /// one if nothing was touched.
    pub fn publish(&self, paths: Vec<DocPath>) -> u64 {
        if paths.is_empty() {
            return self.current_seq();
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers just means nobody is subscribed right now
        let _ = self.inner.change_tx.send(StoreChange { seq, paths });
        seq
    }

    pub fn current_seq(&self) -> u64 {
        self.inner.seq.load(Ordering::SeqCst)
    }

    pub fn live_subscriptions(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Start delivering snapshots of `path`: one immediately, then one after
    /// every change that touches it. Delivery stops when the returned handle
    /// is unsubscribed or dropped.
    pub fn subscribe(&self, path: DocPath) -> Subscription {
        // Join the fan-out before the initial read so no change slips between them
        let changes = self.inner.change_tx.subscribe();
        let start_seq = self.current_seq();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let task = tokio::spawn(run_subscription(
            self.inner.db.clone(),
            path.clone(),
            changes,
            self.inner.seq.clone(),
            start_seq,
            tx,
        ));

        let live = self.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Subscribed to {} ({} live)", path, live);

        Subscription {
            path,
            rx,
            task,
            live: self.inner.live.clone(),
        }
    }
}

/// Handle to a live subscription. Must be released with [`Subscription::unsubscribe`];
/// dropping it releases it too.
pub struct Subscription {
    path: DocPath,
    rx: mpsc::Receiver<SubscriptionEvent>,
    task: JoinHandle<()>,
    live: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn path(&self) -> &DocPath {
        &self.path
    }

    /// Next event, or `None` once the subscription has stopped.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {
        debug!("Unsubscribed from {}", self.path);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_subscription(
    db: Arc<Database>,
    path: DocPath,
    mut changes: broadcast::Receiver<StoreChange>,
    seq: Arc<AtomicU64>,
    start_seq: u64,
    tx: mpsc::Sender<SubscriptionEvent>,
) {
    if !deliver(&db, &path, start_seq, &tx).await {
        return;
    }

    loop {
        let at = match changes.recv().await {
            Ok(change) if change.touches(&path) => change.seq,
            Ok(_) => continue,
            Err(RecvError::Lagged(n)) => {
                warn!("Subscription to {} lagged by {} changes, re-reading", path, n);
                seq.load(Ordering::SeqCst)
            }
            Err(RecvError::Closed) => break,
        };

        if !deliver(&db, &path, at, &tx).await {
            break;
        }
    }
}

/// Read `path` and hand the result to the subscriber. Returns false when the
/// subscription should stop.
async fn deliver(
    db: &Arc<Database>,
    path: &DocPath,
    seq: u64,
    tx: &mpsc::Sender<SubscriptionEvent>,
) -> bool {
    let read_db = db.clone();
    let read_path = path.clone();
    let result = tokio::task::spawn_blocking(move || read_db.read_once(&read_path)).await;

    let event = match result {
        Ok(Ok(value)) => SubscriptionEvent::Snapshot(Snapshot {
            path: path.clone(),
            seq,
            value,
        }),
        Ok(Err(e)) => SubscriptionEvent::Failed {
            path: path.clone(),
            message: e.to_string(),
        },
        Err(e) => SubscriptionEvent::Failed {
            path: path.clone(),
            message: format!("read task failed: {}", e),
        },
    };

    let failed = matches!(event, SubscriptionEvent::Failed { .. });
    if failed {
        warn!("Subscription to {} failed", path);
    }

    // A closed receiver means the consumer is gone
    tx.send(event).await.is_ok() && !failed
}
