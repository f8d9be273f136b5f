//! Non-blocking notification dispatch
//!
//! ```text
//! engine (sampling path)
//!     ↓ enqueue(): rate limit check, try_send (never waits)
//! bounded mpsc queue  ── full → item dropped
//!     ↓
//! single consumer task: recv with poll timeout → sink.deliver() with timeout
//! ```
//!
//! Delivery is at-most-once: dropped, failed or timed-out items are logged
//! and forgotten.

use super::config::ConfigError;
use super::sinks::{DeliveryError, DeliveryItem, DeliverySink};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Which sink an item is routed to and which rate limit applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientClass {
    Email,
    CloudUpload,
    Audible,
}

impl RecipientClass {
    pub fn of(item: &DeliveryItem) -> Self {
        match item {
            DeliveryItem::Email { .. } => RecipientClass::Email,
            DeliveryItem::CloudUpload { .. } => RecipientClass::CloudUpload,
            DeliveryItem::Beep { .. } => RecipientClass::Audible,
        }
    }
}

/// Key of the rate-limit map: one slot per recipient class and addressee
fn rate_key(item: &DeliveryItem) -> (RecipientClass, String) {
    let addressee = match item {
        DeliveryItem::Email { recipient, .. } => recipient,
        DeliveryItem::CloudUpload { subject_id, .. } => subject_id,
        DeliveryItem::Beep { subject_id, .. } => subject_id,
    };
    (RecipientClass::of(item), addressee.clone())
}

/// What happened to an enqueued item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Inside the rate-limit window; the queue was not touched
    RateLimited,
    /// Queue full; the item was discarded
    Dropped,
    /// Consumer gone; the item was discarded
    Closed,
}

/// Sinks by recipient class; a missing sink fails delivery for that class
#[derive(Clone, Default)]
pub struct SinkSet {
    pub email: Option<Arc<dyn DeliverySink>>,
    pub cloud_upload: Option<Arc<dyn DeliverySink>>,
    pub audible: Option<Arc<dyn DeliverySink>>,
}

impl SinkSet {
    fn route(&self, class: RecipientClass) -> Option<&Arc<dyn DeliverySink>> {
        match class {
            RecipientClass::Email => self.email.as_ref(),
            RecipientClass::CloudUpload => self.cloud_upload.as_ref(),
            RecipientClass::Audible => self.audible.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    pub poll_timeout: Duration,
    pub delivery_timeout: Duration,
    /// Minimum period between two items of a class to the same addressee
    pub rate_limits_ms: HashMap<RecipientClass, u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            poll_timeout: Duration::from_millis(500),
            delivery_timeout: Duration::from_secs(5),
            rate_limits_ms: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct DispatchCounters {
    queued: AtomicU64,
    rate_limited: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub queued: u64,
    pub rate_limited: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Rate-limited, bounded-queue delivery with a single consumer
pub struct NotificationDispatcher {
    tx: mpsc::Sender<DeliveryItem>,
    /// Taken by `start()`; only one consumer ever runs
    rx: Mutex<Option<mpsc::Receiver<DeliveryItem>>>,
    rate_limits_ms: Mutex<HashMap<RecipientClass, u64>>,
    last_sent: Mutex<HashMap<(RecipientClass, String), i64>>,
    counters: Arc<DispatchCounters>,
    shutdown_tx: watch::Sender<bool>,
    poll_timeout: Duration,
    delivery_timeout: Duration,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl NotificationDispatcher {
    /// Create a dispatcher using wall-clock milliseconds for rate limiting
    ///
    /// Fails when the queue capacity is zero.
    pub fn new(config: DispatcherConfig) -> Result<Self, ConfigError> {
        Self::new_with_timestamp_fn(config, Box::new(|| chrono::Utc::now().timestamp_millis()))
    }

    /// Create a dispatcher with a custom millisecond clock (for testing)
    pub fn new_with_timestamp_fn(
        config: DispatcherConfig,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Result<Self, ConfigError> {
        if config.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "dispatch queue capacity must be greater than zero".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            tx,
            rx: Mutex::new(Some(rx)),
            rate_limits_ms: Mutex::new(config.rate_limits_ms),
            last_sent: Mutex::new(HashMap::new()),
            counters: Arc::new(DispatchCounters::default()),
            shutdown_tx,
            poll_timeout: config.poll_timeout,
            delivery_timeout: config.delivery_timeout,
            now_fn,
        })
    }

    /// Submit an item from the sampling path; never waits
    pub fn enqueue(&self, item: DeliveryItem) -> EnqueueOutcome {
        let now = (self.now_fn)();
        self.enqueue_at(item, now)
    }

    /// `enqueue` with an explicit timestamp
    pub fn enqueue_at(&self, item: DeliveryItem, now_ms: i64) -> EnqueueOutcome {
        if !self.pass_rate_limit(&item, now_ms) {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            return EnqueueOutcome::RateLimited;
        }

        match self.tx.try_send(item) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(item)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("⚠️  Dispatch queue full, dropping {} item", item.kind());
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(item)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("⚠️  Dispatcher stopped, dropping {} item", item.kind());
                EnqueueOutcome::Closed
            }
        }
    }

    /// Check and stamp the last-sent map; false means inside the window
    fn pass_rate_limit(&self, item: &DeliveryItem, now_ms: i64) -> bool {
        let class = RecipientClass::of(item);
        let period = self
            .rate_limits_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .copied()
            .unwrap_or(0);
        if period == 0 {
            return true;
        }

        let mut last_sent = self.last_sent.lock().unwrap_or_else(PoisonError::into_inner);
        let key = rate_key(item);
        match last_sent.get(&key) {
            Some(&last) if now_ms.saturating_sub(last) < period as i64 => false,
            _ => {
                last_sent.insert(key, now_ms);
                true
            }
        }
    }

    /// Change (or with 0, remove) the rate limit of a class at runtime
    pub fn set_rate_limit(&self, class: RecipientClass, period_ms: u64) {
        self.rate_limits_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class, period_ms);
        log::info!("🚦 Rate limit for {:?} set to {}ms", class, period_ms);
    }

    /// Items currently waiting in the queue
    pub fn queued_len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Spawn the single consumer task
    ///
    /// Returns `None` if the consumer was already started.
    pub fn start(&self, sinks: SinkSet) -> Option<JoinHandle<()>> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        let shutdown = self.shutdown_tx.subscribe();
        let counters = self.counters.clone();
        let poll_timeout = self.poll_timeout;
        let delivery_timeout = self.delivery_timeout;

        Some(tokio::spawn(run_consumer(
            rx,
            sinks,
            shutdown,
            counters,
            poll_timeout,
            delivery_timeout,
        )))
    }

    /// Stop the consumer; queued items are discarded
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        log::info!("🛑 Notification dispatcher shutdown requested");
    }
}

async fn run_consumer(
    mut rx: mpsc::Receiver<DeliveryItem>,
    sinks: SinkSet,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<DispatchCounters>,
    poll_timeout: Duration,
    delivery_timeout: Duration,
) {
    log::info!("📨 Notification dispatcher started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            polled = timeout(poll_timeout, rx.recv()) => {
                let item = match polled {
                    Ok(Some(item)) => item,
                    // Idle poll, check shutdown and wait again
                    Err(_) => continue,
                    // Every sender dropped
                    Ok(None) => break,
                };

                match deliver_one(&sinks, &item, delivery_timeout).await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        log::error!("❌ Failed to deliver {} item: {}", item.kind(), e);
                    }
                }
            }
        }
    }

    let abandoned = rx.len();
    if abandoned > 0 {
        log::warn!("⚠️  Dispatcher stopped with {} undelivered items discarded", abandoned);
    }
    log::info!("✅ Notification dispatcher stopped");
}

async fn deliver_one(
    sinks: &SinkSet,
    item: &DeliveryItem,
    delivery_timeout: Duration,
) -> Result<(), DeliveryError> {
    let sink = sinks
        .route(RecipientClass::of(item))
        .ok_or(DeliveryError::NoSink(item.kind()))?;

    match timeout(delivery_timeout, sink.deliver(item)).await {
        Ok(result) => {
            if result.is_ok() {
                log::debug!("✅ Delivered {} item via {}", item.kind(), sink.sink_type());
            }
            result
        }
        Err(_) => Err(DeliveryError::Timeout(delivery_timeout)),
    }
}
