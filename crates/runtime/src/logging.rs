use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::events::EngineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLogEventKind {
    StateChanged(EngineState),
    PacingBehind,
    ExplainerDispatched,
    ExplainerCacheHit,
    ExplainerFailed,
    RecordAppended,
}

/// Structured engine event. `tick` is the zero-based replay position;
/// lifecycle events emitted before the first tick use `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogEvent {
    pub tick: u64,
    pub kind: RunLogEventKind,
    pub latency_micros: Option<u64>,
}

impl RunLogEvent {
    pub fn new(tick: u64, kind: RunLogEventKind, latency_micros: Option<u64>) -> Self {
        Self {
            tick,
            kind,
            latency_micros,
        }
    }
}

pub trait RunLogWriter: Send + Sync {
    fn write(&self, event: RunLogEvent);
}

#[derive(Debug, Default)]
pub struct InMemoryRunLogWriter {
    events: Mutex<Vec<RunLogEvent>>,
}

impl InMemoryRunLogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunLogEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: RunLogEventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }
}

impl RunLogWriter for InMemoryRunLogWriter {
    fn write(&self, event: RunLogEvent) {
        self.events.lock().push(event);
    }
}

/// Forwards run log events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunLogWriter;

impl RunLogWriter for TracingRunLogWriter {
    fn write(&self, event: RunLogEvent) {
        let tick = event.tick;
        match event.kind {
            RunLogEventKind::StateChanged(state) => {
                info!(tick, state = state.as_str(), "engine state changed");
            }
            RunLogEventKind::PacingBehind => {
                debug!(
                    tick,
                    lag_micros = event.latency_micros,
                    "replay behind wall clock"
                );
            }
            RunLogEventKind::ExplainerDispatched => debug!(tick, "explainer dispatched"),
            RunLogEventKind::ExplainerCacheHit => debug!(tick, "explainer cache hit"),
            RunLogEventKind::ExplainerFailed => {
                warn!(
                    tick,
                    latency_micros = event.latency_micros,
                    "explainer failed; diagnostic analysis recorded"
                );
            }
            RunLogEventKind::RecordAppended => debug!(tick, "record appended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryRunLogWriter, RunLogEvent, RunLogEventKind, RunLogWriter};

    #[test]
    fn in_memory_writer_keeps_events_in_write_order() {
        let writer = InMemoryRunLogWriter::new();

        writer.write(RunLogEvent::new(0, RunLogEventKind::ExplainerDispatched, None));
        writer.write(RunLogEvent::new(0, RunLogEventKind::ExplainerFailed, Some(12)));
        writer.write(RunLogEvent::new(1, RunLogEventKind::RecordAppended, None));

        let events = writer.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].latency_micros, Some(12));
        assert_eq!(events[2].tick, 1);
        assert_eq!(writer.count(RunLogEventKind::ExplainerFailed), 1);
    }
}
