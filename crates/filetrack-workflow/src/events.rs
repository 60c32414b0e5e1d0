//! Stage facts published to the analytics pipeline
//!
//! Emission is fire-and-forget: a failing sink is logged and the workflow
//! carries on.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use filetrack_core::{FileId, SlaStatus, Stage};

/// Something that happened to a file's stage tracking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StageEvent {
    /// The file entered `to`. `from` is `None` on initialization.
    Transitioned {
        file_id: FileId,
        from: Option<Stage>,
        to: Stage,
        actor: String,
        at: DateTime<Utc>,
    },
    /// A stage entry was closed.
    StageCompleted {
        file_id: FileId,
        stage: Stage,
        assignee: Option<String>,
        entered_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        duration_minutes: Option<i64>,
        sla_status: Option<SlaStatus>,
        actor: String,
    },
}

impl StageEvent {
    pub fn file_id(&self) -> &FileId {
        match self {
            Self::Transitioned { file_id, .. } | Self::StageCompleted { file_id, .. } => file_id,
        }
    }
}

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver of stage events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StageEvent) -> Result<(), SinkError>;
}

/// Writes each event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &StageEvent) -> Result<(), SinkError> {
        match event {
            StageEvent::Transitioned {
                file_id,
                from,
                to,
                actor,
                ..
            } => match from {
                Some(from) => log::info!(
                    target: "filetrack::events",
                    "{file_id}: {from} -> {to} (by {actor})"
                ),
                None => log::info!(
                    target: "filetrack::events",
                    "{file_id}: started at {to} (by {actor})"
                ),
            },
            StageEvent::StageCompleted {
                file_id,
                stage,
                duration_minutes,
                sla_status,
                ..
            } => {
                let minutes = duration_minutes.map_or_else(|| "?".to_string(), |m| m.to_string());
                let sla = sla_status.map_or("unknown", SlaStatus::as_str);
                log::info!(
                    target: "filetrack::events",
                    "{file_id}: {stage} completed in {minutes} min ({sla})"
                );
            }
        }
        Ok(())
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StageEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &StageEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Send events to a sink, logging instead of failing.
pub(crate) fn publish(sink: &dyn EventSink, events: &[StageEvent]) {
    for event in events {
        if let Err(e) = sink.emit(event) {
            log::warn!("event sink failed for {}: {e}", event.file_id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: &StageEvent) -> Result<(), SinkError> {
            Err("pipeline down".into())
        }
    }

    fn transitioned() -> StageEvent {
        StageEvent::Transitioned {
            file_id: FileId::new("PF-1"),
            from: Some(Stage::Prelims),
            to: Stage::Production,
            actor: "E1".into(),
            at: Utc::now(),
        }
    }

    #[test]
    fn failing_sink_is_swallowed() {
        publish(&FailingSink, &[transitioned()]);
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let first = transitioned();
        let second = StageEvent::Transitioned {
            file_id: FileId::new("PF-2"),
            from: None,
            to: Stage::Prelims,
            actor: "E2".into(),
            at: Utc::now(),
        };
        publish(&sink, &[first.clone(), second.clone()]);
        assert_eq!(sink.events(), vec![first, second]);
    }

    #[test]
    fn event_serializes_with_tag() {
        let json = serde_json::to_value(transitioned()).unwrap();
        assert_eq!(json["event"], "transitioned");
        assert_eq!(json["to"], "PRODUCTION");
    }
}
