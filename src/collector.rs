//! # Reference Collector
//!
//! Sits between a lifecycle-event feed and the whiteboards consuming it.
//!
//! ## Batching
//!
//! Events are buffered per service identity ("last write wins") for a fixed
//! window that opens with the first event after a quiet period. When the
//! window closes only the net change per identity is published:
//!
//! | known before window | last event in window | published |
//! |---|---|---|
//! | no | ADD / MODIFY | ADD |
//! | no | REMOVE | nothing |
//! | yes | ADD / MODIFY | MODIFY |
//! | yes | REMOVE | REMOVE |
//!
//! So ADD then REMOVE of a fresh identity inside one window never reaches a
//! whiteboard, and REMOVE then ADD of a known identity becomes one MODIFY.
//!
//! ## Fan-out
//!
//! Each connected [`EventSink`] gets a private `may::sync::mpsc` channel and a
//! pump thread that applies batches in order. [`ReferenceCollector::connect`]
//! replays every known service as one ADD batch before any live batch, under
//! the same lock that publishes batches, so a sink never misses or doubles an
//! event.

use crate::ids::ServiceId;
use crate::provider::{ProviderKind, ServiceReference};
use may::sync::mpsc;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default batching window.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Modify,
    Remove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Add => "ADD",
            EventKind::Modify => "MODIFY",
            EventKind::Remove => "REMOVE",
        })
    }
}

/// One lifecycle event.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub reference: ServiceReference,
}

impl LifecycleEvent {
    #[must_use]
    pub fn add(reference: ServiceReference) -> Self {
        Self {
            kind: EventKind::Add,
            reference,
        }
    }

    #[must_use]
    pub fn modify(reference: ServiceReference) -> Self {
        Self {
            kind: EventKind::Modify,
            reference,
        }
    }

    #[must_use]
    pub fn remove(reference: ServiceReference) -> Self {
        Self {
            kind: EventKind::Remove,
            reference,
        }
    }

    #[must_use]
    pub fn id(&self) -> ServiceId {
        self.reference.id
    }
}

/// Events of one batch partitioned by provider kind. An event registering
/// under several kinds appears in each partition.
#[derive(Debug, Default)]
pub struct ClassifiedBatch<'a> {
    pub applications: Vec<&'a LifecycleEvent>,
    pub resources: Vec<&'a LifecycleEvent>,
    pub extensions: Vec<&'a LifecycleEvent>,
}

impl<'a> ClassifiedBatch<'a> {
    #[must_use]
    pub fn classify(batch: &'a [LifecycleEvent]) -> Self {
        let mut out = Self::default();
        for event in batch {
            for kind in event.reference.kinds() {
                match kind {
                    ProviderKind::Application => out.applications.push(event),
                    ProviderKind::Resource => out.resources.push(event),
                    ProviderKind::Extension => out.extensions.push(event),
                }
            }
        }
        out
    }
}

/// A consumer of consolidated batches, typically a whiteboard dispatcher.
pub trait EventSink: Send + Sync {
    fn apply(&self, batch: Vec<LifecycleEvent>);
}

/// Handle returned by [`ReferenceCollector::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Vec<LifecycleEvent>>,
    pump: Option<JoinHandle<()>>,
}

struct Pending {
    last: EventKind,
    reference: ServiceReference,
}

#[derive(Default)]
struct CollectorState {
    known: BTreeMap<ServiceId, ServiceReference>,
    order: Vec<ServiceId>,
    pending: HashMap<ServiceId, Pending>,
    deadline: Option<Instant>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    stopped: bool,
}

struct Shared {
    state: Mutex<CollectorState>,
    wakeup: Condvar,
    window: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        // A panicking sink runs on its pump thread, never under this lock.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Debouncing, multi-consumer lifecycle event hub.
pub struct ReferenceCollector {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ReferenceCollector {
    /// Start a collector with the given batching window.
    ///
    /// A zero window publishes every event immediately.
    ///
    /// # Errors
    ///
    /// Fails if the window thread cannot be spawned.
    pub fn new(window: Duration) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(CollectorState::default()),
            wakeup: Condvar::new(),
            window,
        });
        let timer = if window.is_zero() {
            None
        } else {
            let thread_shared = Arc::clone(&shared);
            Some(
                std::thread::Builder::new()
                    .name("whiteboard-collector".to_string())
                    .spawn(move || window_loop(&thread_shared))?,
            )
        };
        info!(window_ms = window.as_millis() as u64, "Reference collector started");
        Ok(Self {
            shared,
            timer: Mutex::new(timer),
        })
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.shared.window
    }

    /// Feed one lifecycle event. Returns `false` once the collector is closed.
    pub fn publish(&self, event: LifecycleEvent) -> bool {
        let mut state = self.shared.lock();
        if state.stopped {
            warn!(service_id = %event.id(), kind = %event.kind, "Event after close ignored");
            return false;
        }
        debug!(service_id = %event.id(), kind = %event.kind, "Event collected");
        let id = event.id();
        if !state.pending.contains_key(&id) {
            state.order.push(id);
        }
        state.pending.insert(
            id,
            Pending {
                last: event.kind,
                reference: event.reference,
            },
        );
        if self.shared.window.is_zero() {
            flush_locked(&mut state);
        } else if state.deadline.is_none() {
            state.deadline = Some(Instant::now() + self.shared.window);
            self.shared.wakeup.notify_all();
        }
        true
    }

    /// Close the current window now.
    pub fn flush(&self) {
        let mut state = self.shared.lock();
        flush_locked(&mut state);
    }

    /// Attach a sink. It first receives every known service as one ADD batch,
    /// then every live batch.
    ///
    /// # Errors
    ///
    /// Fails if the pump thread cannot be spawned.
    pub fn connect(&self, sink: Arc<dyn EventSink>) -> std::io::Result<SubscriberId> {
        let mut state = self.shared.lock();
        let id = SubscriberId(state.next_subscriber);
        state.next_subscriber += 1;

        let (tx, rx) = mpsc::channel::<Vec<LifecycleEvent>>();
        let pump = std::thread::Builder::new()
            .name(format!("whiteboard-pump-{id}"))
            .spawn(move || {
                while let Ok(batch) = rx.recv() {
                    let size = batch.len();
                    let started = Instant::now();
                    sink.apply(batch);
                    debug!(
                        subscriber = %id,
                        events = size,
                        duration_us = started.elapsed().as_micros() as u64,
                        "Batch applied"
                    );
                }
                debug!(subscriber = %id, "Pump stopped");
            })?;

        if state.stopped {
            drop(tx);
            return Ok(id);
        }

        let replay: Vec<LifecycleEvent> = state
            .known
            .values()
            .cloned()
            .map(LifecycleEvent::add)
            .collect();
        if !replay.is_empty() && tx.send(replay).is_err() {
            error!(subscriber = %id, "Replay could not be delivered");
        }
        state.subscribers.push(Subscriber {
            id,
            tx,
            pump: Some(pump),
        });
        info!(subscriber = %id, known = state.known.len(), "Subscriber connected");
        Ok(id)
    }

    /// Detach one sink. Batches already handed to it are still applied.
    pub fn disconnect(&self, id: SubscriberId) {
        let subscriber = {
            let mut state = self.shared.lock();
            let Some(pos) = state.subscribers.iter().position(|s| s.id == id) else {
                return;
            };
            state.subscribers.remove(pos)
        };
        join_subscriber(subscriber);
        info!(subscriber = %id, "Subscriber disconnected");
    }

    /// Number of services currently known (as of the last published batch).
    #[must_use]
    pub fn known(&self) -> usize {
        self.shared.lock().known.len()
    }

    /// Stop batching, publish what is pending and disconnect every sink.
    /// Idempotent.
    pub fn close(&self) {
        let subscribers = {
            let mut state = self.shared.lock();
            if state.stopped {
                return;
            }
            flush_locked(&mut state);
            state.stopped = true;
            std::mem::take(&mut state.subscribers)
        };
        self.shared.wakeup.notify_all();

        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = timer {
            if handle.join().is_err() {
                error!("Collector window thread panicked");
            }
        }
        for subscriber in subscribers {
            join_subscriber(subscriber);
        }
        info!("Reference collector closed");
    }
}

impl Drop for ReferenceCollector {
    fn drop(&mut self) {
        self.close();
    }
}

fn join_subscriber(mut subscriber: Subscriber) {
    let pump = subscriber.pump.take();
    drop(subscriber);
    if let Some(handle) = pump {
        // A sink may disconnect itself from inside `apply`.
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("Subscriber pump panicked");
        }
    }
}

fn window_loop(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.stopped {
            break;
        }
        match state.deadline {
            None => {
                state = shared
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    flush_locked(&mut state);
                } else {
                    state = shared
                        .wakeup
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                }
            }
        }
    }
}

/// Reduce the pending buffer to net changes and send them to every sink.
fn flush_locked(state: &mut CollectorState) {
    state.deadline = None;
    if state.order.is_empty() {
        return;
    }
    let order = std::mem::take(&mut state.order);
    let mut pending = std::mem::take(&mut state.pending);

    let mut batch = Vec::with_capacity(order.len());
    for id in order {
        let Some(Pending { last, reference }) = pending.remove(&id) else {
            continue;
        };
        let was_known = state.known.contains_key(&id);
        match (was_known, last) {
            (false, EventKind::Remove) => {
                debug!(service_id = %id, "Transient service dropped from batch");
            }
            (true, EventKind::Remove) => {
                state.known.remove(&id);
                batch.push(LifecycleEvent::remove(reference));
            }
            (false, _) => {
                state.known.insert(id, reference.clone());
                batch.push(LifecycleEvent::add(reference));
            }
            (true, _) => {
                state.known.insert(id, reference.clone());
                batch.push(LifecycleEvent::modify(reference));
            }
        }
    }

    if batch.is_empty() {
        return;
    }
    debug!(events = batch.len(), subscribers = state.subscribers.len(), "Publishing batch");
    state.subscribers.retain(|s| {
        let delivered = s.tx.send(batch.clone()).is_ok();
        if !delivered {
            warn!(subscriber = %s.id, "Subscriber pump gone, dropping subscriber");
        }
        delivered
    });
}
