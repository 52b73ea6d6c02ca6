//! The normalized shape of one log record.
//!
//! Raw wire messages (one JSON object per message) cross into the
//! pipeline exactly once, through [`normalize`]. Normalization also
//! computes the derived fields ([`LogEvent::search_key`] and
//! [`LogEvent::display_time`]) so that no later stage ever re-lowercases
//! or re-formats an event per filter pass or per render.

use crate::error::MalformedEvent;
use chrono::{DateTime, Local, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// severity of a single log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// parse a wire-format level tag (case-insensitive)
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" | "WARNING" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// represents a single log event from the stream
///
/// `search_key` and `display_time` are derived at normalization time and
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct LogEvent {
    /// opaque unique token, assigned by the source
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// optional origin tag (e.g. upstream service name)
    pub source: Option<String>,
    /// open key/value map; may carry a `duration` display hint
    pub metadata: HashMap<String, serde_json::Value>,
    /// lowercase concatenation of message and source, used for substring filtering
    pub search_key: String,
    /// locale-formatted rendering of `timestamp`
    pub display_time: String,
}

impl LogEvent {
    /// the `duration` display hint, if the source attached one
    pub fn duration_hint(&self) -> Option<&str> {
        self.metadata.get("duration").and_then(|v| v.as_str())
    }

    /// one export line: `[timestamp] [level] [source] message`
    pub fn export_line(&self) -> String {
        match &self.source {
            Some(source) => format!(
                "[{}] [{}] [{}] {}",
                self.timestamp.to_rfc3339(),
                self.level,
                source,
                self.message
            ),
            None => format!(
                "[{}] [{}] {}",
                self.timestamp.to_rfc3339(),
                self.level,
                self.message
            ),
        }
    }
}

/// wire shape of one stream message
#[derive(Deserialize)]
struct WireEvent {
    id: String,
    /// ISO-8601 string
    timestamp: String,
    level: String,
    message: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, serde_json::Value>>,
}

/// parse one raw wire message into a fully-populated [`LogEvent`]
///
/// A failure here means the message is dropped by the caller; it must
/// never terminate the stream.
pub fn normalize(raw: &str) -> Result<LogEvent, MalformedEvent> {
    let wire: WireEvent = serde_json::from_str(raw)?;

    let timestamp = DateTime::parse_from_rfc3339(&wire.timestamp)
        .map_err(|e| MalformedEvent::Timestamp(wire.timestamp.clone(), e))?
        .with_timezone(&Utc);

    let level =
        LogLevel::parse(&wire.level).ok_or_else(|| MalformedEvent::UnknownLevel(wire.level.clone()))?;

    // derived fields, computed exactly once
    let mut search_key = wire.message.to_lowercase();
    if let Some(source) = &wire.source {
        search_key.push(' ');
        search_key.push_str(&source.to_lowercase());
    }
    let display_time = timestamp
        .with_timezone(&Local)
        .format("%H:%M:%S%.3f")
        .to_string();

    Ok(LogEvent {
        id: wire.id,
        timestamp,
        level,
        message: wire.message,
        source: wire.source,
        metadata: wire.metadata.unwrap_or_default(),
        search_key,
        display_time,
    })
}
