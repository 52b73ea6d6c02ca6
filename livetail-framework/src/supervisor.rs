//! Connection supervisor: owns one logical stream connection at a time.
//!
//! The supervisor drives a [`StreamTransport`] through
//! `Connecting -> Open -> Closed -> Connecting -> ...`, reconnecting
//! after a fixed delay, and feeds normalized events into the ingestion
//! buffer. It is split into a deterministic core ([`SupervisorCore`],
//! steppable with an explicit clock in tests) and a thread wrapper
//! ([`spawn_supervisor_thread`]).

use crate::event::{LogEvent, normalize};
use crate::transport::{ConnectionState, StreamTransport};
use ringbuf::traits::Producer;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

/// fixed delay before a reconnect attempt
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// control flags shared between the pipeline handle and its worker threads
#[derive(Clone)]
pub(crate) struct Controls {
    /// pause contract: while set, inbound events are dropped, not buffered
    pub suspended: Arc<AtomicBool>,
    /// hosting surface is observing the stream; while unset, inbound
    /// events are silently discarded
    pub active: Arc<AtomicBool>,
    /// true exactly while the connection is open
    pub live: Arc<AtomicBool>,
    /// teardown signal for both worker threads
    pub stop: Arc<AtomicBool>,
}

impl Controls {
    pub fn new() -> Self {
        Self {
            suspended: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// deterministic connection state machine
///
/// One `step()` per poll tick. All clock reads go through the `now`
/// parameter so tests can drive reconnect timing without sleeping.
pub(crate) struct SupervisorCore<T, P> {
    transport: T,
    producer: P,
    controls: Controls,
    state: ConnectionState,
    /// armed only while `Closed`; at most one deadline exists at a time
    reconnect_at: Option<Instant>,
    reconnect_delay: Duration,
}

impl<T, P> SupervisorCore<T, P>
where
    T: StreamTransport,
    P: Producer<Item = LogEvent>,
{
    pub fn new(transport: T, producer: P, controls: Controls, reconnect_delay: Duration) -> Self {
        Self {
            transport,
            producer,
            controls,
            state: ConnectionState::Connecting,
            reconnect_at: None,
            reconnect_delay,
        }
    }

    /// drive one step of the state machine at time `now`
    pub fn step(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connecting => self.try_connect(now),
            ConnectionState::Open => self.poll_open(now),
            ConnectionState::Closed => {
                if let Some(at) = self.reconnect_at
                    && now >= at
                {
                    self.reconnect_at = None;
                    self.state = ConnectionState::Connecting;
                    self.try_connect(now);
                }
            }
        }
    }

    fn try_connect(&mut self, now: Instant) {
        match self.transport.connect() {
            Ok(()) => {
                self.state = ConnectionState::Open;
                self.controls.live.store(true, Ordering::Relaxed);
                log::debug!("stream connected");
            }
            Err(e) => {
                log::debug!("stream connect failed: {e:#}");
                self.enter_closed(now);
            }
        }
    }

    fn poll_open(&mut self, now: Instant) {
        match self.transport.poll_messages() {
            Ok(raw_messages) => {
                for raw in raw_messages {
                    self.ingest(&raw);
                }
            }
            Err(e) => {
                log::warn!("stream transport error: {e:#}");
                if let Err(e) = self.transport.close() {
                    log::debug!("error closing failed transport: {e:#}");
                }
                self.enter_closed(now);
            }
        }
    }

    /// transition to `Closed`, arming exactly one reconnect deadline
    fn enter_closed(&mut self, now: Instant) {
        self.state = ConnectionState::Closed;
        self.controls.live.store(false, Ordering::Relaxed);
        if self.reconnect_at.is_none() {
            self.reconnect_at = Some(now + self.reconnect_delay);
        }
    }

    fn ingest(&mut self, raw: &str) {
        // live-only semantics: drop rather than buffer while paused or unobserved
        if self.controls.suspended.load(Ordering::Relaxed)
            || !self.controls.active.load(Ordering::Relaxed)
        {
            return;
        }

        match normalize(raw) {
            Ok(event) => {
                if self.producer.try_push(event).is_err() {
                    log::debug!("ingestion buffer full, dropping event");
                }
            }
            Err(e) => {
                // a single bad message never terminates the stream
                log::debug!("dropping malformed event: {e}");
            }
        }
    }

    /// close the connection and stop scheduling reconnects
    pub fn shutdown(&mut self) {
        if let Err(e) = self.transport.close() {
            log::debug!("error closing transport on shutdown: {e:#}");
        }
        self.state = ConnectionState::Closed;
        self.reconnect_at = None;
        self.controls.live.store(false, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }
}

/// Spawns the supervisor thread.
///
/// The thread steps the state machine at `poll_interval` until the stop
/// flag in `controls` is set, then closes the transport; no reconnect is
/// scheduled after teardown.
pub(crate) fn spawn_supervisor_thread<T, P>(
    transport: T,
    producer: P,
    controls: Controls,
    poll_interval: Duration,
    reconnect_delay: Duration,
) -> thread::JoinHandle<()>
where
    T: StreamTransport + 'static,
    P: Producer<Item = LogEvent> + Send + 'static,
{
    thread::spawn(move || {
        let stop = controls.stop.clone();
        let mut core = SupervisorCore::new(transport, producer, controls, reconnect_delay);

        log::debug!("supervisor thread started");

        while !stop.load(Ordering::Relaxed) {
            core.step(Instant::now());
            thread::sleep(poll_interval);
        }

        core.shutdown();
        log::debug!("supervisor thread stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use ringbuf::{
        HeapRb,
        traits::{Consumer, Split},
    };
    use std::collections::VecDeque;

    /// transport driven by a script of connect and poll outcomes
    struct ScriptTransport {
        connects: VecDeque<anyhow::Result<()>>,
        polls: VecDeque<anyhow::Result<Vec<String>>>,
        connect_calls: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl ScriptTransport {
        fn new() -> Self {
            Self {
                connects: VecDeque::new(),
                polls: VecDeque::new(),
                connect_calls: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            }
        }

        fn connect_ok(mut self) -> Self {
            self.connects.push_back(Ok(()));
            self
        }

        fn connect_err(mut self) -> Self {
            self.connects.push_back(Err(anyhow!("refused")));
            self
        }

        fn poll_ok(mut self, messages: &[&str]) -> Self {
            self.polls
                .push_back(Ok(messages.iter().map(|m| m.to_string()).collect()));
            self
        }

        fn poll_err(mut self) -> Self {
            self.polls.push_back(Err(anyhow!("connection reset")));
            self
        }
    }

    impl StreamTransport for ScriptTransport {
        fn connect(&mut self) -> anyhow::Result<()> {
            self.connect_calls.fetch_add(1, Ordering::Relaxed);
            self.connects.pop_front().unwrap_or(Ok(()))
        }

        fn close(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn poll_messages(&mut self) -> anyhow::Result<Vec<String>> {
            self.polls.pop_front().unwrap_or_else(|| Ok(vec![]))
        }
    }

    fn wire(id: &str) -> String {
        format!(
            r#"{{"id":"{id}","timestamp":"2025-01-15T10:30:00Z","level":"INFO","message":"msg {id}"}}"#
        )
    }

    fn core_with(
        transport: ScriptTransport,
    ) -> (
        SupervisorCore<ScriptTransport, ringbuf::HeapProd<LogEvent>>,
        ringbuf::HeapCons<LogEvent>,
        Controls,
    ) {
        let (producer, consumer) = HeapRb::<LogEvent>::new(64).split();
        let controls = Controls::new();
        let core = SupervisorCore::new(transport, producer, controls.clone(), RECONNECT_DELAY);
        (core, consumer, controls)
    }

    fn drain(consumer: &mut ringbuf::HeapCons<LogEvent>) -> Vec<LogEvent> {
        let mut out = Vec::new();
        while let Some(event) = consumer.try_pop() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_successful_connect_goes_live() {
        let (mut core, _consumer, controls) = core_with(ScriptTransport::new().connect_ok());
        assert!(!controls.live.load(Ordering::Relaxed));

        core.step(Instant::now());

        assert_eq!(core.state(), ConnectionState::Open);
        assert!(controls.live.load(Ordering::Relaxed));
    }

    #[test]
    fn test_open_poll_buffers_normalized_events() {
        let transport = ScriptTransport::new()
            .connect_ok()
            .poll_ok(&[&wire("1"), &wire("2")]);
        let (mut core, mut consumer, _controls) = core_with(transport);

        let now = Instant::now();
        core.step(now); // connect
        core.step(now); // poll

        let events = drain(&mut consumer);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "1");
        assert_eq!(events[1].id, "2");
    }

    #[test]
    fn test_malformed_message_is_dropped_not_fatal() {
        let transport = ScriptTransport::new()
            .connect_ok()
            .poll_ok(&[&wire("1"), "{ broken", &wire("2")]);
        let (mut core, mut consumer, controls) = core_with(transport);

        let now = Instant::now();
        core.step(now);
        core.step(now);

        let events = drain(&mut consumer);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "1");
        assert_eq!(events[1].id, "2");
        // stream stays open
        assert_eq!(core.state(), ConnectionState::Open);
        assert!(controls.live.load(Ordering::Relaxed));
    }

    #[test]
    fn test_transport_error_arms_exactly_one_reconnect() {
        let transport = ScriptTransport::new().connect_ok().poll_err();
        let connect_calls = transport.connect_calls.clone();
        let (mut core, _consumer, controls) = core_with(transport);

        let now = Instant::now();
        core.step(now); // connect
        core.step(now); // poll -> error

        assert_eq!(core.state(), ConnectionState::Closed);
        assert!(!controls.live.load(Ordering::Relaxed));
        let deadline = core.reconnect_at().unwrap();
        assert_eq!(deadline, now + RECONNECT_DELAY);

        // before the deadline nothing happens, and no second timer is armed
        core.step(now + Duration::from_secs(1));
        assert_eq!(core.state(), ConnectionState::Closed);
        assert_eq!(core.reconnect_at(), Some(deadline));
        assert_eq!(connect_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_reconnect_fires_after_delay() {
        let transport = ScriptTransport::new().connect_ok().poll_err().connect_ok();
        let connect_calls = transport.connect_calls.clone();
        let (mut core, _consumer, controls) = core_with(transport);

        let now = Instant::now();
        core.step(now); // connect #1
        core.step(now); // poll -> error
        core.step(now + RECONNECT_DELAY); // deadline reached -> connect #2

        assert_eq!(core.state(), ConnectionState::Open);
        assert!(controls.live.load(Ordering::Relaxed));
        assert_eq!(core.reconnect_at(), None);
        assert_eq!(connect_calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_failed_reconnect_rearms_single_timer() {
        let transport = ScriptTransport::new().connect_err();
        let (mut core, _consumer, _controls) = core_with(transport);

        let now = Instant::now();
        core.step(now); // connect fails immediately

        assert_eq!(core.state(), ConnectionState::Closed);
        assert_eq!(core.reconnect_at(), Some(now + RECONNECT_DELAY));
    }

    #[test]
    fn test_suspended_drops_instead_of_buffering() {
        let transport = ScriptTransport::new()
            .connect_ok()
            .poll_ok(&[&wire("a")])
            .poll_ok(&[&wire("b")]);
        let (mut core, mut consumer, controls) = core_with(transport);

        let now = Instant::now();
        core.step(now); // connect
        controls.suspended.store(true, Ordering::Relaxed);
        core.step(now); // "a" arrives while suspended -> dropped
        controls.suspended.store(false, Ordering::Relaxed);
        core.step(now); // "b" arrives after resume -> buffered

        let events = drain(&mut consumer);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "b");
    }

    #[test]
    fn test_inactive_surface_discards_silently() {
        let transport = ScriptTransport::new().connect_ok().poll_ok(&[&wire("a")]);
        let (mut core, mut consumer, controls) = core_with(transport);

        let now = Instant::now();
        core.step(now);
        controls.active.store(false, Ordering::Relaxed);
        core.step(now);

        assert!(drain(&mut consumer).is_empty());
        // the connection itself stays open
        assert_eq!(core.state(), ConnectionState::Open);
    }

    #[test]
    fn test_shutdown_closes_and_cancels_reconnect() {
        let transport = ScriptTransport::new().connect_ok().poll_err();
        let (mut core, _consumer, controls) = core_with(transport);

        let now = Instant::now();
        core.step(now);
        core.step(now); // now Closed with a reconnect armed

        core.shutdown();

        assert_eq!(core.state(), ConnectionState::Closed);
        assert_eq!(core.reconnect_at(), None);
        assert!(!controls.live.load(Ordering::Relaxed));

        // further steps are no-ops: no reconnect is ever scheduled again
        core.step(now + Duration::from_secs(60));
        assert_eq!(core.state(), ConnectionState::Closed);
        assert_eq!(core.reconnect_at(), None);
    }
}
