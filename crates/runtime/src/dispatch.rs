use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::clock::shutdown_requested;
use crate::logging::{RunLogEvent, RunLogEventKind, RunLogWriter};
use crate::metrics::{duration_micros, LatencyMetrics};
use crate::trigger::{
    ExplainStatus, RiskTrigger, TriggerDecision, ANALYSIS_FAILED_PREFIX, MARKET_STABLE,
    NO_ATTRIBUTABLE_NEWS,
};

const INTERRUPTED_REASON: &str = "interrupted by shutdown";

/// Analysis text that is either known now or still being produced by a worker.
pub enum AnalysisHandle {
    Ready(String),
    Pending(JoinHandle<String>),
}

impl AnalysisHandle {
    pub async fn resolve(self) -> String {
        match self {
            Self::Ready(text) => text,
            Self::Pending(handle) => match handle.await {
                Ok(text) => text,
                Err(err) => format!("{ANALYSIS_FAILED_PREFIX}: explainer worker stopped ({err})"),
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    dispatched: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
}

impl DispatchStats {
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }
}

/// Moves explainer calls off the replay loop onto at most `workers`
/// concurrent tasks. Calls still queued or in flight when `shutdown` flips to
/// `true` are abandoned and resolve to a failure analysis.
pub struct ExplainDispatcher {
    trigger: Arc<RiskTrigger>,
    permits: Arc<Semaphore>,
    run_log: Arc<dyn RunLogWriter>,
    shutdown: watch::Receiver<bool>,
    latency: Arc<Mutex<LatencyMetrics>>,
    stats: Arc<DispatchStats>,
}

impl ExplainDispatcher {
    pub fn new(
        trigger: Arc<RiskTrigger>,
        workers: usize,
        run_log: Arc<dyn RunLogWriter>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            trigger,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            run_log,
            shutdown,
            latency: Arc::new(Mutex::new(LatencyMetrics::new())),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Below-threshold and no-news points resolve immediately; everything
    /// else is handed to a worker. Must be called from within a tokio runtime.
    pub fn submit(&self, tick: u64, volatility: f64, headline: Option<&str>) -> AnalysisHandle {
        let headline = match self.trigger.decide(volatility, headline) {
            TriggerDecision::Stable => return AnalysisHandle::Ready(MARKET_STABLE.to_string()),
            TriggerDecision::NoAttributableNews => {
                return AnalysisHandle::Ready(NO_ATTRIBUTABLE_NEWS.to_string())
            }
            TriggerDecision::Explain { headline, .. } => headline.to_string(),
        };

        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        self.run_log.write(RunLogEvent::new(
            tick,
            RunLogEventKind::ExplainerDispatched,
            None,
        ));

        let trigger = Arc::clone(&self.trigger);
        let permits = Arc::clone(&self.permits);
        let run_log = Arc::clone(&self.run_log);
        let latency = Arc::clone(&self.latency);
        let stats = Arc::clone(&self.stats);
        let mut shutdown = self.shutdown.clone();

        AnalysisHandle::Pending(tokio::spawn(async move {
            let call = async {
                let _permit = permits.acquire_owned().await.ok()?;
                Some(trigger.explain(volatility, &headline).await)
            };
            let explanation = tokio::select! {
                biased;
                explanation = call => explanation,
                _ = shutdown_requested(&mut shutdown) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    run_log.write(RunLogEvent::new(tick, RunLogEventKind::ExplainerFailed, None));
                    return format!("{ANALYSIS_FAILED_PREFIX}: {INTERRUPTED_REASON}");
                }
            };
            let Some(explanation) = explanation else {
                return format!("{ANALYSIS_FAILED_PREFIX}: explainer pool closed");
            };
            let latency_micros = duration_micros(explanation.latency);

            match &explanation.status {
                ExplainStatus::Answered => latency.lock().record(explanation.latency),
                ExplainStatus::Cached => {
                    stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    run_log.write(RunLogEvent::new(tick, RunLogEventKind::ExplainerCacheHit, None));
                }
                ExplainStatus::Failed(_) => {
                    latency.lock().record(explanation.latency);
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    run_log.write(RunLogEvent::new(
                        tick,
                        RunLogEventKind::ExplainerFailed,
                        Some(latency_micros),
                    ));
                }
            }

            explanation.text
        }))
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn latency(&self) -> LatencyMetrics {
        self.latency.lock().clone()
    }
}
