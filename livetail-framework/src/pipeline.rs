//! The pipeline: batch flusher plus the consumer-facing API.
//!
//! [`Pipeline::start_with_desc`] wires the pieces together: a supervisor
//! thread feeds normalized events through the SPSC ingestion buffer, and
//! a flusher thread drains that buffer on a fixed cadence into the
//! bounded display window, notifying subscribers once per mutating tick.
//! Consumers never see per-event updates, only per-tick ones, which is
//! what keeps a bursty stream from overwhelming whatever renders it.

use crate::event::LogEvent;
use crate::filter::{FilterCriteria, FilterEngine, QueryDebouncer};
use crate::supervisor::{Controls, RECONNECT_DELAY, spawn_supervisor_thread};
use crate::transport::StreamTransport;
use crate::window::{DisplayWindow, MAX_EVENTS};
use ringbuf::{
    HeapRb,
    traits::{Consumer, Split},
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// cadence at which the ingestion buffer is drained into the window
pub const FLUSH_INTERVAL_MS: u64 = 100;

const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
const DEFAULT_RING_CAPACITY: usize = 16384;
const DEFAULT_DEBOUNCE_MS: u64 = 150;

/// pipeline configuration
#[derive(Clone)]
pub struct PipelineDesc {
    /// how often the flusher drains the ingestion buffer
    pub flush_interval: Duration,
    /// how often the supervisor steps its state machine / polls the transport
    pub poll_interval: Duration,
    /// fixed delay before reconnecting a failed connection
    pub reconnect_delay: Duration,
    /// ingestion buffer capacity (events, not bytes)
    pub ring_capacity: usize,
    /// display window capacity
    pub window_capacity: usize,
    /// settle time for the debounced text criterion
    pub debounce: Duration,
    pub initial_criteria: FilterCriteria,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(FLUSH_INTERVAL_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reconnect_delay: RECONNECT_DELAY,
            ring_capacity: DEFAULT_RING_CAPACITY,
            window_capacity: MAX_EVENTS,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            initial_criteria: FilterCriteria::default(),
        }
    }
}

/// handle returned by [`Pipeline::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(Uuid);

type WindowCallback = Box<dyn Fn(&[LogEvent]) + Send + 'static>;

/// current filter state, mutated by the consumer, read by the flusher
struct FilterState {
    engine: FilterEngine,
    criteria: FilterCriteria,
    debouncer: QueryDebouncer,
}

/// state shared between the pipeline handle and the flusher thread
struct Shared {
    /// mutated by the flusher only, at tick boundaries; read-many otherwise
    window: RwLock<DisplayWindow>,
    filter: Mutex<FilterState>,
    subscribers: Mutex<Vec<(SubscriptionId, WindowCallback)>>,
}

impl Shared {
    fn new(desc: &PipelineDesc) -> Self {
        Self {
            window: RwLock::new(DisplayWindow::with_capacity(desc.window_capacity)),
            filter: Mutex::new(FilterState {
                engine: FilterEngine::new(),
                criteria: desc.initial_criteria.clone(),
                debouncer: QueryDebouncer::new(desc.debounce),
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// full filter pass over the current window
    fn visible_snapshot(&self) -> Vec<LogEvent> {
        if let Ok(window) = self.window.read()
            && let Ok(mut filter) = self.filter.lock()
        {
            let criteria = filter.criteria.clone();
            let indices = filter
                .engine
                .filter(window.events(), &criteria, window.generation());
            indices.iter().map(|&i| window.events()[i].clone()).collect()
        } else {
            Vec::new()
        }
    }

    /// incremental pass: only events past `old_count` are scanned unless
    /// the window generation moved or the criteria changed
    fn visible_snapshot_incremental(&self, old_count: usize) -> Vec<LogEvent> {
        if let Ok(window) = self.window.read()
            && let Ok(mut filter) = self.filter.lock()
        {
            let criteria = filter.criteria.clone();
            let indices = filter.engine.filter_new_events(
                window.events(),
                old_count,
                window.generation(),
                &criteria,
            );
            indices.iter().map(|&i| window.events()[i].clone()).collect()
        } else {
            Vec::new()
        }
    }

    fn notify(&self, visible: &[LogEvent]) {
        if let Ok(subscribers) = self.subscribers.lock() {
            for (_, callback) in subscribers.iter() {
                callback(visible);
            }
        }
    }
}

/// drains the ingestion buffer into the display window, one batch per tick
struct Flusher<C> {
    consumer: C,
    shared: Arc<Shared>,
}

impl<C> Flusher<C>
where
    C: Consumer<Item = LogEvent>,
{
    /// One flush tick. Returns whether subscribers were notified.
    ///
    /// N events buffered between two ticks become exactly one window
    /// update and one notification.
    fn tick(&mut self, now: Instant) -> bool {
        let mut batch = Vec::new();
        while let Some(event) = self.consumer.try_pop() {
            batch.push(event);
        }

        // a settled text query forces a pass even without new events
        let query_settled = if let Ok(mut filter) = self.shared.filter.lock() {
            match filter.debouncer.settle_at(now) {
                Some(text) => {
                    filter.criteria.text = text;
                    true
                }
                None => false,
            }
        } else {
            false
        };

        if batch.is_empty() && !query_settled {
            return false;
        }

        let mut old_count = 0;
        if !batch.is_empty() {
            if let Ok(mut window) = self.shared.window.write() {
                old_count = window.len();
                log::debug!("flushing {} events into the window", batch.len());
                window.merge_batch(batch);
            }
        } else if let Ok(window) = self.shared.window.read() {
            old_count = window.len();
        }

        let visible = self.shared.visible_snapshot_incremental(old_count);
        self.shared.notify(&visible);
        true
    }
}

fn spawn_flusher_thread<C>(
    consumer: C,
    shared: Arc<Shared>,
    controls: Controls,
    flush_interval: Duration,
) -> thread::JoinHandle<()>
where
    C: Consumer<Item = LogEvent> + Send + 'static,
{
    thread::spawn(move || {
        let mut flusher = Flusher { consumer, shared };

        log::debug!("flusher thread started");

        while !controls.stop.load(Ordering::Relaxed) {
            flusher.tick(Instant::now());
            thread::sleep(flush_interval);
        }

        log::debug!("flusher thread stopped");
    })
}

/// A running log stream pipeline.
///
/// Owns the supervisor and flusher threads; dropping the pipeline shuts
/// both down and closes the connection.
pub struct Pipeline {
    shared: Arc<Shared>,
    controls: Controls,
    supervisor: Option<thread::JoinHandle<()>>,
    flusher: Option<thread::JoinHandle<()>>,
}

impl Pipeline {
    /// start with default configuration
    pub fn start<T>(transport: T) -> Self
    where
        T: StreamTransport + 'static,
    {
        Self::start_with_desc(transport, PipelineDesc::default())
    }

    /// start with custom configuration
    pub fn start_with_desc<T>(transport: T, desc: PipelineDesc) -> Self
    where
        T: StreamTransport + 'static,
    {
        let controls = Controls::new();
        let shared = Arc::new(Shared::new(&desc));

        let ring_buffer = HeapRb::<LogEvent>::new(desc.ring_capacity);
        let (producer, consumer) = ring_buffer.split();

        let supervisor = spawn_supervisor_thread(
            transport,
            producer,
            controls.clone(),
            desc.poll_interval,
            desc.reconnect_delay,
        );
        let flusher = spawn_flusher_thread(
            consumer,
            shared.clone(),
            controls.clone(),
            desc.flush_interval,
        );

        Self {
            shared,
            controls,
            supervisor: Some(supervisor),
            flusher: Some(flusher),
        }
    }

    /// register a callback invoked with the visible snapshot after each
    /// mutating flush tick
    pub fn subscribe(&self, callback: impl Fn(&[LogEvent]) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            subscribers.push((id, Box::new(callback)));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subscribers) = self.shared.subscribers.lock() {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// while paused, inbound events are dropped, not buffered; resuming
    /// continues live-only, with no backfill
    pub fn set_paused(&self, paused: bool) {
        self.controls.suspended.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.controls.suspended.load(Ordering::Relaxed)
    }

    /// hosting surface visibility gate: while inactive, inbound events
    /// are silently discarded
    pub fn set_active(&self, active: bool) {
        self.controls.active.store(active, Ordering::Relaxed);
    }

    /// replace level/source/text criteria at once (not debounced)
    pub fn set_filter(&self, criteria: FilterCriteria) {
        if let Ok(mut filter) = self.shared.filter.lock() {
            filter.criteria = criteria;
            // an in-flight debounced edit would clobber the text we just set
            filter.debouncer.cancel();
        }
    }

    /// debounced text criterion: rapid calls collapse to the latest value
    pub fn set_filter_text(&self, text: impl Into<String>) {
        if let Ok(mut filter) = self.shared.filter.lock() {
            filter.debouncer.submit(text);
        }
    }

    pub fn filter_criteria(&self) -> FilterCriteria {
        self.shared
            .filter
            .lock()
            .map(|f| f.criteria.clone())
            .unwrap_or_default()
    }

    /// the currently visible subset of the window
    pub fn visible_events(&self) -> Vec<LogEvent> {
        self.shared.visible_snapshot()
    }

    /// the whole window, unfiltered
    pub fn window_snapshot(&self) -> Vec<LogEvent> {
        self.shared
            .window
            .read()
            .map(|w| w.events().to_vec())
            .unwrap_or_default()
    }

    /// irreversibly forget all retained history
    pub fn clear(&self) {
        if let Ok(mut window) = self.shared.window.write() {
            window.clear();
        }
        if let Ok(mut filter) = self.shared.filter.lock() {
            filter.engine.reset();
        }
        self.shared.notify(&[]);
    }

    /// one line per visible event: `[timestamp] [level] [source] message`
    pub fn export_as_text(&self) -> String {
        let mut out = String::new();
        for event in self.visible_events() {
            out.push_str(&event.export_line());
            out.push('\n');
        }
        out
    }

    pub fn is_live(&self) -> bool {
        self.controls.live.load(Ordering::Relaxed)
    }

    /// Tear the pipeline down: close the connection, stop and join both
    /// threads. Idempotent; every call after the first is a no-op.
    pub fn shutdown(&mut self) {
        self.controls.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = self.supervisor.take() {
            log::debug!("waiting for supervisor thread to finish...");
            if handle.join().is_err() {
                log::error!("supervisor thread panicked");
            }
        }
        if let Some(handle) = self.flusher.take() {
            log::debug!("waiting for flusher thread to finish...");
            if handle.join().is_err() {
                log::error!("flusher thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
