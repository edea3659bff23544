pub mod clock;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod record;
pub mod sink;
pub mod trigger;

pub use clock::{Interrupted, Pacing, SimulationClock};
pub use dispatch::{AnalysisHandle, ExplainDispatcher};
pub use engine::{EngineConfig, EngineError, ReplayEngine, ReplaySources, RunReport};
pub use events::EngineState;
pub use logging::{InMemoryRunLogWriter, RunLogEvent, RunLogEventKind, RunLogWriter, TracingRunLogWriter};
pub use metrics::{LatencyMetrics, LatencyPercentiles};
pub use record::EnrichedRecord;
pub use sink::{create_output_log, LogTarget, RecordLogWriter, SinkError};
pub use trigger::{ExplainPolicy, Explainer, RiskTrigger, ServiceError};
