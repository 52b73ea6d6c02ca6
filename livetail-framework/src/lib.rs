//! # livetail-framework
//!
//! A bounded, backpressure-aware ingestion pipeline for live log
//! streams: connect once, absorb bursts, never let the consumer fall
//! behind or run out of memory.
//!
//! ## Overview
//!
//! livetail-framework separates stream acquisition from consumption. You
//! implement the [`StreamTransport`] trait to define where messages come
//! from, and the framework handles connection supervision with automatic
//! reconnect, normalization, batched flushing into a bounded display
//! window, and live multi-criteria filtering.
//!
//! ## Core Concepts
//!
//! ### Transport Seam
//!
//! A [`StreamTransport`] is one logical duplex connection. The supervisor
//! drives it through `Connecting -> Open -> Closed -> Connecting`,
//! reconnecting after a fixed delay, so transports only connect, poll,
//! and fail loudly.
//!
//! ### Ingestion Buffer
//!
//! Normalized events flow through a lock-free SPSC ring buffer between
//! the supervisor thread (single writer) and the flush loop (single
//! reader). Arrival rate and consumption rate are fully decoupled.
//!
//! ### Display Window
//!
//! The flusher drains the buffer on a fixed cadence (100 ms) into a
//! capacity-bounded window (1000 events, oldest evicted first).
//! Subscribers get one notification per mutating tick, never one per
//! event, regardless of burst size.
//!
//! ### Filtering
//!
//! Level, source, and free-text criteria are evaluated against
//! per-event search keys precomputed at normalization; text edits are
//! debounced so typing never triggers a filter pass per keystroke.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use livetail_framework::{Pipeline, StreamTransport};
//! use anyhow::Result;
//!
//! // 1. implement StreamTransport for your message source
//! struct MyTransport {
//!     // your state here (socket, url, ...)
//! }
//!
//! impl StreamTransport for MyTransport {
//!     fn connect(&mut self) -> Result<()> {
//!         // perform the handshake
//!         Ok(())
//!     }
//!
//!     fn close(&mut self) -> Result<()> {
//!         // release the connection
//!         Ok(())
//!     }
//!
//!     fn poll_messages(&mut self) -> Result<Vec<String>> {
//!         // return raw JSON messages since the last poll (non-blocking)
//!         Ok(vec![])
//!     }
//! }
//!
//! // 2. start the pipeline and subscribe
//! let pipeline = Pipeline::start(MyTransport {});
//! pipeline.subscribe(|visible| {
//!     for event in visible {
//!         println!("[{}] {}", event.level, event.message);
//!     }
//! });
//! ```
//!
//! ## Guarantees
//!
//! - **Bounded memory**: the window never exceeds its capacity; the
//!   retained events are always the most recent by arrival order
//! - **Batched updates**: N events between two ticks are one update
//! - **Loss-tolerant ingestion**: a malformed message is dropped, never
//!   fatal; a transport failure reconnects with at most one timer armed
//! - **Live-only pause**: pausing drops inbound events instead of
//!   buffering them, so a paused consumer costs nothing

pub mod event;
pub mod filter;
pub mod transport;
pub mod window;

// re-export commonly used types
pub use event::{LogEvent, LogLevel, normalize};
pub use filter::{FilterCriteria, FilterEngine, QueryDebouncer};
pub use transport::{ConnectionState, StreamTransport};
pub use window::{DisplayWindow, MAX_EVENTS};

pub(crate) mod supervisor;

pub mod error;
pub use error::MalformedEvent;

// public API for running the pipeline
pub mod pipeline;
pub use pipeline::{FLUSH_INTERVAL_MS, Pipeline, PipelineDesc, SubscriptionId};
pub use supervisor::RECONNECT_DELAY;
