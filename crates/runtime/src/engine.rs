use std::path::Path;
use std::sync::Arc;

use market_data::{
    format_timestamp, load_news, load_prices, NewsItem, PriceTick, SourceError, SourceKind,
};
use serde::Serialize;
use signals::{NewsCursor, SlidingWindow, WindowConfigError};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::clock::{Pacing, SimulationClock};
use crate::dispatch::ExplainDispatcher;
use crate::events::EngineState;
use crate::logging::{RunLogEvent, RunLogEventKind, RunLogWriter};
use crate::metrics::{duration_micros, LatencyMetrics, LatencyPercentiles};
use crate::sink::{drain_pending, LogTarget, PendingRecord, RecordLogWriter, SinkError};
use crate::trigger::{ExplainPolicy, Explainer, RiskTrigger, DEFAULT_VOLATILITY_THRESHOLD};

pub const DEFAULT_LOOKBACK_SECS: i64 = 30;
pub const DEFAULT_SPEED_MULTIPLIER: f64 = 20.0;
pub const DEFAULT_EXPLAIN_WORKERS: usize = 4;
pub const DEFAULT_PROGRESS_EVERY: u64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Window(#[from] WindowConfigError),
    #[error("engine cannot start from state {}", .0.as_str())]
    NotIdle(EngineState),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("output sink task stopped unexpectedly: {0}")]
    SinkTaskStopped(String),
}

/// Fixed parameters of one replay.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub lookback: time::Duration,
    pub volatility_threshold: f64,
    pub speed_multiplier: f64,
    pub explain: ExplainPolicy,
    pub explain_workers: usize,
    pub explain_cache: bool,
    /// Emit a progress line every this many ticks; `0` disables it.
    pub progress_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookback: time::Duration::seconds(DEFAULT_LOOKBACK_SECS),
            volatility_threshold: DEFAULT_VOLATILITY_THRESHOLD,
            speed_multiplier: DEFAULT_SPEED_MULTIPLIER,
            explain: ExplainPolicy::default(),
            explain_workers: DEFAULT_EXPLAIN_WORKERS,
            explain_cache: false,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.lookback.is_positive() {
            return Err(EngineError::InvalidConfig("lookback must be positive"));
        }
        if !self.volatility_threshold.is_finite() || self.volatility_threshold < 0.0 {
            return Err(EngineError::InvalidConfig(
                "volatility threshold must be finite and non-negative",
            ));
        }
        if !self.speed_multiplier.is_finite() || self.speed_multiplier <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "speed multiplier must be finite and positive",
            ));
        }
        if self.explain.attempt_timeout.is_zero() {
            return Err(EngineError::InvalidConfig("explain timeout must be positive"));
        }
        if self.explain.max_attempts == 0 {
            return Err(EngineError::InvalidConfig("explain attempts must be at least 1"));
        }
        if self.explain_workers == 0 {
            return Err(EngineError::InvalidConfig("explain workers must be at least 1"));
        }
        Ok(())
    }
}

/// Price and news sequences accepted for one replay, both non-empty and
/// sorted ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySources {
    prices: Vec<PriceTick>,
    news: Vec<NewsItem>,
    skipped_price_rows: usize,
    skipped_news_rows: usize,
}

impl ReplaySources {
    pub fn prices(&self) -> &[PriceTick] {
        &self.prices
    }

    pub fn news(&self) -> &[NewsItem] {
        &self.news
    }

    pub fn skipped_rows(&self) -> (usize, usize) {
        (self.skipped_price_rows, self.skipped_news_rows)
    }
}

/// End-of-run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub ticks_total: u64,
    pub ticks_processed: u64,
    pub records_appended: u64,
    pub skipped_price_rows: usize,
    pub skipped_news_rows: usize,
    pub interrupted: bool,
    pub explain_dispatched: u64,
    pub explain_failed: u64,
    pub explain_cache_hits: u64,
    pub ticks_behind: u64,
    pub pacing_lag: Option<LatencyPercentiles>,
    pub explain_latency: Option<LatencyPercentiles>,
}

/// Drives one replay through `Idle -> Running -> Draining -> Completed`.
pub struct ReplayEngine {
    config: EngineConfig,
    state: EngineState,
    run_log: Arc<dyn RunLogWriter>,
}

impl ReplayEngine {
    pub fn new(config: EngineConfig, run_log: Arc<dyn RunLogWriter>) -> Self {
        Self {
            config,
            state: EngineState::Idle,
            run_log,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Marks an unrecoverable startup failure, such as an output log that
    /// cannot be created.
    pub fn abort(&mut self) {
        if self.state.can_transition_to(EngineState::Aborted) {
            self.transition(0, EngineState::Aborted);
        }
    }

    /// Loads both CSV sources. Any failure aborts the engine.
    pub fn load_sources(
        &mut self,
        prices_path: &Path,
        news_path: &Path,
    ) -> Result<ReplaySources, EngineError> {
        let loaded = load_prices(prices_path).and_then(|prices| {
            let news = load_news(news_path)?;
            Ok((prices, news))
        });
        let (prices, news) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => return Err(self.abort_with(err.into())),
        };

        let skipped_price_rows = prices.skipped_rows;
        let skipped_news_rows = news.skipped_rows;
        let mut sources = self.accept(prices.records, news.records)?;
        sources.skipped_price_rows = skipped_price_rows;
        sources.skipped_news_rows = skipped_news_rows;
        Ok(sources)
    }

    /// Accepts in-memory sequences. Both must be non-empty; they are stably
    /// sorted by timestamp.
    pub fn accept(
        &mut self,
        mut prices: Vec<PriceTick>,
        mut news: Vec<NewsItem>,
    ) -> Result<ReplaySources, EngineError> {
        if prices.is_empty() {
            return Err(self.abort_with(SourceError::Empty {
                kind: SourceKind::Prices,
            }
            .into()));
        }
        if news.is_empty() {
            return Err(self.abort_with(SourceError::Empty {
                kind: SourceKind::News,
            }
            .into()));
        }

        prices.sort_by_key(|tick| tick.timestamp);
        news.sort_by_key(|item| item.timestamp);

        Ok(ReplaySources {
            prices,
            news,
            skipped_price_rows: 0,
            skipped_news_rows: 0,
        })
    }

    /// Replays every price tick, paced against the wall clock, and appends one
    /// enriched record per processed tick. Setting `shutdown` to `true` stops
    /// pacing and abandons outstanding explainer calls; every processed tick
    /// is still appended, with abandoned analyses recorded as failures.
    pub async fn run<W>(
        &mut self,
        sources: ReplaySources,
        output: RecordLogWriter<W>,
        explainer: Arc<dyn Explainer>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport, EngineError>
    where
        W: LogTarget + Send + 'static,
    {
        if self.state != EngineState::Idle {
            return Err(EngineError::NotIdle(self.state));
        }
        if let Err(err) = self.config.validate() {
            return Err(self.abort_with(err));
        }
        let mut window = match SlidingWindow::new(self.config.lookback) {
            Ok(window) => window,
            Err(err) => return Err(self.abort_with(err.into())),
        };

        let ReplaySources {
            prices,
            news,
            skipped_price_rows,
            skipped_news_rows,
        } = sources;
        let ticks_total = prices.len() as u64;
        let Some(sim_start) = prices.first().map(|tick| tick.timestamp) else {
            return Err(self.abort_with(
                SourceError::Empty {
                    kind: SourceKind::Prices,
                }
                .into(),
            ));
        };

        let mut trigger = RiskTrigger::new(self.config.volatility_threshold, explainer)
            .with_policy(self.config.explain);
        if self.config.explain_cache {
            trigger = trigger.with_cache();
        }
        let dispatcher = ExplainDispatcher::new(
            Arc::new(trigger),
            self.config.explain_workers,
            Arc::clone(&self.run_log),
            shutdown.clone(),
        );
        let news_total = news.len();
        let mut cursor = NewsCursor::new(news);

        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        let sink = tokio::spawn(drain_pending(
            pending_rx,
            output,
            Arc::clone(&self.run_log),
        ));

        let clock = SimulationClock::start(sim_start, self.config.speed_multiplier);
        self.transition(0, EngineState::Running);
        info!(
            ticks = ticks_total,
            news = news_total,
            speed_multiplier = self.config.speed_multiplier,
            lookback_secs = self.config.lookback.whole_seconds(),
            threshold = self.config.volatility_threshold,
            "replay started"
        );

        let mut pacing_lag = LatencyMetrics::new();
        let mut ticks_behind = 0_u64;
        let mut ticks_processed = 0_u64;
        let mut interrupted = false;
        let mut last_tick = 0_u64;

        for (index, tick) in prices.into_iter().enumerate() {
            let tick_no = index as u64;
            last_tick = tick_no;

            match clock.wait_until(tick.timestamp, &mut shutdown).await {
                Ok(Pacing::OnTime) => {}
                Ok(Pacing::Behind(lag)) => {
                    ticks_behind += 1;
                    pacing_lag.record(lag);
                    self.run_log.write(RunLogEvent::new(
                        tick_no,
                        RunLogEventKind::PacingBehind,
                        Some(duration_micros(lag)),
                    ));
                }
                Err(_) => {
                    interrupted = true;
                    info!(tick = tick_no, "shutdown requested; draining replay");
                    break;
                }
            }

            let timestamp = tick.timestamp;
            let price = tick.price;
            window.push(tick);
            let volatility = window.volatility();
            let headline = cursor.advance_to(timestamp).map(str::to_string);
            let analysis = dispatcher.submit(tick_no, volatility, headline.as_deref());

            if self.config.progress_every > 0 && tick_no % self.config.progress_every == 0 {
                info!(
                    tick = tick_no,
                    simulated_time = %format_timestamp(timestamp),
                    price,
                    volatility,
                    "replay progress"
                );
            }

            let pending = PendingRecord {
                tick: tick_no,
                timestamp,
                price,
                volatility,
                headline,
                analysis,
            };
            if pending_tx.send(pending).is_err() {
                warn!(tick = tick_no, "output sink stopped; ending replay");
                break;
            }
            ticks_processed += 1;
        }

        drop(pending_tx);
        self.transition(last_tick, EngineState::Draining);

        let writer = match sink.await {
            Ok(Ok(writer)) => writer,
            Ok(Err(err)) => return Err(self.abort_with(err.into())),
            Err(err) => {
                return Err(self.abort_with(EngineError::SinkTaskStopped(err.to_string())))
            }
        };
        self.transition(last_tick, EngineState::Completed);

        let stats = dispatcher.stats();
        let report = RunReport {
            ticks_total,
            ticks_processed,
            records_appended: writer.appended(),
            skipped_price_rows,
            skipped_news_rows,
            interrupted,
            explain_dispatched: stats.dispatched(),
            explain_failed: stats.failed(),
            explain_cache_hits: stats.cache_hits(),
            ticks_behind,
            pacing_lag: pacing_lag.percentiles(),
            explain_latency: dispatcher.latency().percentiles(),
        };
        info!(
            ticks_processed = report.ticks_processed,
            records = report.records_appended,
            explained = report.explain_dispatched,
            failed = report.explain_failed,
            interrupted = report.interrupted,
            "replay completed"
        );
        Ok(report)
    }

    fn transition(&mut self, tick: u64, next: EngineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
        self.run_log
            .write(RunLogEvent::new(tick, RunLogEventKind::StateChanged(next), None));
    }

    fn abort_with(&mut self, err: EngineError) -> EngineError {
        warn!(error = %err, state = self.state.as_str(), "replay aborted");
        self.abort();
        err
    }
}
