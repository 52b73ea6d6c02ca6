//! Transport trait for log stream acquisition.
//!
//! This module defines the seam between the pipeline and whatever
//! carries the stream on the wire:
//!
//! - [`StreamTransport`]: one logical duplex connection to a message source
//! - [`ConnectionState`]: the lifecycle the supervisor drives it through
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   poll_messages()   ┌─────────────┐
//! │ StreamTransport │ ──────────────────> │ Vec<String> │ (raw JSON messages)
//! └─────────────────┘                     └──────┬──────┘
//!                                                │
//!                                                │ normalize()
//!                                                │
//!                                         ┌──────▼──────┐
//!                                         │  LogEvent   │ → ingestion buffer
//!                                         └─────────────┘
//! ```
//!
//! The supervisor owns the transport and its state machine; a transport
//! implementation only has to connect, hand over raw messages, and fail
//! loudly when the connection dies.

use anyhow::Result;

/// Trait for one logical duplex connection to a message stream.
///
/// Implement this to define where messages come from (websocket, unix
/// socket, a replay file in tests, ...). The transport is responsible
/// for:
/// - Performing the connection handshake in [`connect`](Self::connect)
/// - Handing raw messages to the supervisor as they arrive
/// - Reporting transport failure via `Err` so the supervisor can reconnect
/// - Releasing the connection on [`close`](Self::close)
///
/// # Non-blocking Contract
///
/// `poll_messages()` **must be non-blocking**. If nothing is pending,
/// return an empty `Vec` immediately. The supervisor calls it repeatedly
/// at the poll cadence; a blocking read would stall reconnect detection
/// and teardown.
///
/// `connect()` is the one call that may block: it is the handshake, and
/// it runs on the supervisor thread only, never on the flush path.
///
/// # Failure Semantics
///
/// Any `Err` from `poll_messages()` means the connection is gone. The
/// supervisor closes the transport, flips the live flag off, and arms
/// exactly one reconnect timer. Returning `Err` for a recoverable hiccup
/// is therefore safe but costs a reconnect round-trip; swallow what the
/// protocol lets you swallow (pings, fragments) and fail on the rest.
///
/// # Examples
///
/// ```rust
/// use livetail_framework::StreamTransport;
/// use anyhow::Result;
/// use std::collections::VecDeque;
///
/// /// replays a canned script of messages, for tests
/// struct ReplayTransport {
///     script: VecDeque<String>,
/// }
///
/// impl StreamTransport for ReplayTransport {
///     fn connect(&mut self) -> Result<()> {
///         Ok(())
///     }
///
///     fn close(&mut self) -> Result<()> {
///         Ok(())
///     }
///
///     fn poll_messages(&mut self) -> Result<Vec<String>> {
///         Ok(self.script.drain(..).collect())
///     }
/// }
/// ```
pub trait StreamTransport: Send {
    /// Perform the connection handshake.
    ///
    /// Called once per connection attempt, on the supervisor thread.
    /// May block for the duration of the handshake.
    ///
    /// # Errors
    ///
    /// Return an error if the connection cannot be established; the
    /// supervisor schedules a reconnect.
    fn connect(&mut self) -> Result<()>;

    /// Release the connection.
    ///
    /// Called on transport failure (before reconnecting) and on
    /// teardown. Must be safe to call when not connected.
    ///
    /// # Errors
    ///
    /// Errors are logged but never prevent shutdown.
    fn close(&mut self) -> Result<()>;

    /// Poll for raw messages that arrived since the last call (non-blocking).
    ///
    /// # Errors
    ///
    /// An error signals transport failure and forces the connection into
    /// `Closed`; the supervisor arms a single reconnect timer.
    fn poll_messages(&mut self) -> Result<Vec<String>>;
}

/// lifecycle of one logical connection, transitioned by the supervisor only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// a connect attempt is in flight
    Connecting,
    /// handshake succeeded, messages are flowing
    Open,
    /// connection lost, reconnect pending
    Closed,
}
