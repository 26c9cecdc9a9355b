//! Side-channel events emitted while a script runs.
//!
//! Sent on an unbounded channel so the sandbox thread never blocks on a
//! slow consumer; a dropped receiver just discards them.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::result::{RequestRecord, ScriptErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Log {
        level: LogLevel,
        message: String,
    },
    Request(RequestRecord),
    Stopped {
        success: bool,
        error: Option<ScriptErrorKind>,
        elapsed_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Log,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<ScriptEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ScriptEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Fire-and-forget send.
pub(crate) fn emit(sender: &EventSender, event: ScriptEvent) {
    let _ = sender.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_event_serializes_with_tag() {
        let event = ScriptEvent::Log {
            level: LogLevel::Warn,
            message: "slow".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "log");
        assert_eq!(json["level"], "warn");
        assert_eq!(json["message"], "slow");
    }

    #[test]
    fn emit_after_receiver_dropped_is_silent() {
        let (tx, rx) = channel();
        drop(rx);
        emit(
            &tx,
            ScriptEvent::Stopped {
                success: true,
                error: None,
                elapsed_ms: 0,
            },
        );
    }
}
