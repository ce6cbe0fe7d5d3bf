//! Append-only event stream from the orchestrator to whatever renders progress.
//!
//! The orchestrator only ever sends. A missing or closed receiver is not an
//! error, so orchestration behaves the same with or without a reporter.

use tokio::sync::mpsc;

use crate::state_machine::{DroppedUnit, JobOutcome, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Discovery finished; `count` units will be submitted.
    UnitsDiscovered { count: usize },
    JobCreated {
        job_id: String,
        status: JobStatus,
    },
    StatusChanged {
        job_id: String,
        status: JobStatus,
        progress_hint: Option<String>,
    },
    JobFinished {
        job_id: String,
        outcome: JobOutcome,
    },
    /// Upload or job creation failed; no remote job exists for this unit.
    UnitDropped { unit: DroppedUnit },
    Log { level: LogLevel, message: String },
}

/// Cheap, clonable handle for emitting [`Event`]s.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    /// A sink wired to a fresh channel, plus its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: Event) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is rendering; keep orchestrating.
            let _ = tx.send(event);
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Event::Log {
            level,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_emission_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(Event::UnitsDiscovered { count: 2 });
        sink.log(LogLevel::Warn, "skipping notes.txt");
        drop(sink);

        assert_eq!(rx.recv().await, Some(Event::UnitsDiscovered { count: 2 }));
        assert_eq!(
            rx.recv().await,
            Some(Event::Log {
                level: LogLevel::Warn,
                message: "skipping notes.txt".into()
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn disabled_sink_ignores_events() {
        let sink = EventSink::disabled();
        sink.log(LogLevel::Info, "nobody listens");
    }

    #[test]
    fn closed_receiver_is_not_an_error() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(Event::UnitsDiscovered { count: 1 });
    }
}
