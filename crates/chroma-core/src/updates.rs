//! ---
//! chroma_section: "01-core-functionality"
//! chroma_subsection: "module"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Per-key conflating delivery of parameter updates."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
//! Conflating parameter-update channel.
//!
//! Every parameter key owns at most one single-slot worker. Submitting a value
//! either starts that worker or overwrites the slot it will read next, so a
//! key never has more than one request in flight and the newest value always
//! gets attempted. Intermediate values may never be sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chroma_logging::{chroma_debug, chroma_warn, LogContext};
use chroma_msg::{ControlMetricsExporter, SliderUpdate};
use chroma_net::ControlBackend;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Invoked after the backend accepted an update.
pub trait RefreshHook: Send + Sync + 'static {
    /// `update` has been applied by the backend.
    fn on_delivered(&self, update: &SliderUpdate);
}

impl<F> RefreshHook for F
where
    F: Fn(&SliderUpdate) + Send + Sync + 'static,
{
    fn on_delivered(&self, update: &SliderUpdate) {
        self(update)
    }
}

/// Observable state of one key's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Value waiting to be sent once the current request finishes.
    pub latest_value: Option<i64>,
    /// Whether a request for this key is on the wire.
    pub in_flight: bool,
}

struct Slot {
    pending: PendingUpdate,
    worker: Option<JoinHandle<()>>,
    /// Identifies the worker that owns this slot.
    generation: u64,
}

struct Shared {
    backend: Arc<dyn ControlBackend>,
    slots: Mutex<HashMap<String, Slot>>,
    generations: AtomicU64,
    idle: Notify,
    refresh: Option<Arc<dyn RefreshHook>>,
    metrics: Option<ControlMetricsExporter>,
}

impl Shared {
    /// Take the next value for `key`, or retire the slot when none is left.
    ///
    /// A worker whose slot was cancelled and replaced gets `None`.
    fn next_value(&self, key: &str, generation: u64) -> Option<i64> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(key).filter(|slot| slot.generation == generation)?;
        match slot.pending.latest_value.take() {
            Some(value) => {
                slot.pending.in_flight = true;
                Some(value)
            }
            None => {
                slots.remove(key);
                if slots.is_empty() {
                    self.idle.notify_waiters();
                }
                None
            }
        }
    }

    fn finish_request(&self, key: &str, generation: u64) {
        if let Some(slot) = self.slots.lock().get_mut(key) {
            if slot.generation == generation {
                slot.pending.in_flight = false;
            }
        }
    }
}

/// Builder for [`ConflatingUpdateChannel`].
pub struct UpdateChannelBuilder {
    backend: Arc<dyn ControlBackend>,
    refresh: Option<Arc<dyn RefreshHook>>,
    metrics: Option<ControlMetricsExporter>,
}

impl UpdateChannelBuilder {
    /// Run `hook` after every accepted update.
    pub fn refresh(mut self, hook: impl RefreshHook) -> Self {
        self.refresh = Some(Arc::new(hook));
        self
    }

    /// Count sent, failed and superseded updates.
    pub fn metrics(mut self, metrics: ControlMetricsExporter) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Finish the channel. Must be called inside a tokio runtime.
    pub fn build(self) -> ConflatingUpdateChannel {
        ConflatingUpdateChannel {
            shared: Arc::new(Shared {
                backend: self.backend,
                slots: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                idle: Notify::new(),
                refresh: self.refresh,
                metrics: self.metrics,
            }),
            runtime: Handle::current(),
            closed: AtomicBool::new(false),
        }
    }
}

/// Registry of per-key single-slot delivery workers.
pub struct ConflatingUpdateChannel {
    shared: Arc<Shared>,
    runtime: Handle,
    closed: AtomicBool,
}

impl ConflatingUpdateChannel {
    /// Start building a channel delivering through `backend`.
    pub fn builder(backend: Arc<dyn ControlBackend>) -> UpdateChannelBuilder {
        UpdateChannelBuilder {
            backend,
            refresh: None,
            metrics: None,
        }
    }

    /// Channel without refresh hook or metrics.
    pub fn new(backend: Arc<dyn ControlBackend>) -> Self {
        Self::builder(backend).build()
    }

    /// Record `value` as the newest intent for `key`. Never blocks.
    ///
    /// Submissions after [`ConflatingUpdateChannel::shutdown`] are dropped.
    pub fn submit(&self, key: &str, value: i64) {
        if self.closed.load(Ordering::Acquire) {
            chroma_debug!(
                context = LogContext::new().with_key(key),
                "update channel closed; dropping value {value}"
            );
            return;
        }

        let mut slots = self.shared.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            if let Some(previous) = slot.pending.latest_value.replace(value) {
                if let Some(metrics) = &self.shared.metrics {
                    metrics.observe_update_superseded();
                }
                chroma_debug!(
                    context = LogContext::new().with_key(key),
                    "value {previous} superseded by {value}"
                );
            }
            return;
        }

        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed);
        slots.insert(
            key.to_owned(),
            Slot {
                pending: PendingUpdate {
                    latest_value: Some(value),
                    in_flight: false,
                },
                worker: None,
                generation,
            },
        );
        let worker = self.runtime.spawn(deliver_loop(
            self.shared.clone(),
            key.to_owned(),
            generation,
        ));
        if let Some(slot) = slots.get_mut(key) {
            slot.worker = Some(worker);
        }
    }

    /// Slot state of `key`, `None` when the key is idle.
    pub fn pending(&self, key: &str) -> Option<PendingUpdate> {
        self.shared.slots.lock().get(key).map(|slot| slot.pending)
    }

    /// Keys with a live worker, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.slots.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop the pending value of `key` and abort its worker.
    ///
    /// Returns `false` when the key was idle.
    pub fn cancel(&self, key: &str) -> bool {
        let mut slots = self.shared.slots.lock();
        let Some(slot) = slots.remove(key) else {
            return false;
        };
        if let Some(worker) = slot.worker {
            worker.abort();
        }
        if slots.is_empty() {
            self.shared.idle.notify_waiters();
        }
        true
    }

    /// Abort every worker and refuse further submissions.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<Slot> = {
            let mut slots = self.shared.slots.lock();
            slots.drain().map(|(_, slot)| slot).collect()
        };
        for worker in drained.into_iter().filter_map(|slot| slot.worker) {
            worker.abort();
        }
        self.shared.idle.notify_waiters();
    }

    /// Resolve once no key has a pending or in-flight value.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.slots.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for ConflatingUpdateChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn deliver_loop(shared: Arc<Shared>, key: String, generation: u64) {
    while let Some(value) = shared.next_value(&key, generation) {
        let update = SliderUpdate::new(key.as_str(), value);
        let started = Instant::now();
        match shared.backend.update_parameter(&update).await {
            Ok(()) => {
                if let Some(metrics) = &shared.metrics {
                    metrics.observe_update_sent(started.elapsed());
                }
                chroma_debug!(
                    context = LogContext::new().with_key(&key),
                    "parameter set to {value}"
                );
                if let Some(hook) = &shared.refresh {
                    hook.on_delivered(&update);
                }
            }
            Err(err) => {
                if let Some(metrics) = &shared.metrics {
                    metrics.observe_update_failed();
                }
                chroma_warn!(
                    context = LogContext::new().with_key(&key),
                    "parameter update to {value} failed, not retried: {err}"
                );
            }
        }
        shared.finish_request(&key, generation);
    }
}
