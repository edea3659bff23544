use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

pub const MARKET_STABLE: &str = "Market Stable";
pub const NO_ATTRIBUTABLE_NEWS: &str = "High Volatility detected, but no recent news found.";
pub const ANALYSIS_FAILED_PREFIX: &str = "AI Analysis Failed";

pub const DEFAULT_VOLATILITY_THRESHOLD: f64 = 0.5;
pub const DEFAULT_EXPLAIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EXPLAIN_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_EXPLAIN_BACKOFF: Duration = Duration::from_millis(500);
pub const MAX_EXPLAIN_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("API key is not configured")]
    MissingApiKey,
}

impl ServiceError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::MalformedResponse(_) | Self::MissingApiKey => false,
        }
    }
}

/// External text-generation capability asked to explain a volatility spike.
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, volatility: f64, headline: &str) -> Result<String, ServiceError>;
}

/// Timeout and retry policy applied to every explainer call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExplainPolicy {
    pub attempt_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for ExplainPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_EXPLAIN_TIMEOUT,
            max_attempts: DEFAULT_EXPLAIN_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_EXPLAIN_BACKOFF,
        }
    }
}

impl ExplainPolicy {
    /// Delay before retry number `retry` (1-based), doubling and capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(MAX_EXPLAIN_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerDecision<'a> {
    Stable,
    NoAttributableNews,
    Explain { volatility: f64, headline: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplainStatus {
    Answered,
    Cached,
    Failed(ServiceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explanation {
    pub text: String,
    pub status: ExplainStatus,
    pub attempts: u32,
    pub latency: Duration,
}

impl Explanation {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, ExplainStatus::Failed(_))
    }
}

pub fn failure_analysis(err: &ServiceError) -> String {
    format!("{ANALYSIS_FAILED_PREFIX}: {err}")
}

type CacheKey = (i64, String);

/// Decides whether a point needs an explanation and obtains one without ever
/// surfacing collaborator failures to the caller.
pub struct RiskTrigger {
    threshold: f64,
    explainer: Arc<dyn Explainer>,
    policy: ExplainPolicy,
    cache: Option<Mutex<HashMap<CacheKey, String>>>,
}

impl RiskTrigger {
    pub fn new(threshold: f64, explainer: Arc<dyn Explainer>) -> Self {
        Self {
            threshold,
            explainer,
            policy: ExplainPolicy::default(),
            cache: None,
        }
    }

    pub fn with_policy(mut self, policy: ExplainPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reuses answers for repeated `(volatility to 2 decimals, headline)` pairs.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(Mutex::new(HashMap::new()));
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn decide<'a>(&self, volatility: f64, headline: Option<&'a str>) -> TriggerDecision<'a> {
        if volatility < self.threshold {
            return TriggerDecision::Stable;
        }

        match headline {
            Some(headline) => TriggerDecision::Explain {
                volatility,
                headline,
            },
            None => TriggerDecision::NoAttributableNews,
        }
    }

    /// Analysis text for one point, calling the explainer inline when needed.
    pub async fn evaluate(&self, volatility: f64, headline: Option<&str>) -> String {
        match self.decide(volatility, headline) {
            TriggerDecision::Stable => MARKET_STABLE.to_string(),
            TriggerDecision::NoAttributableNews => NO_ATTRIBUTABLE_NEWS.to_string(),
            TriggerDecision::Explain {
                volatility,
                headline,
            } => self.explain(volatility, headline).await.text,
        }
    }

    /// Calls the explainer under the timeout and retry policy. Failures come
    /// back as a diagnostic `Explanation`, never as an error.
    pub async fn explain(&self, volatility: f64, headline: &str) -> Explanation {
        let started = Instant::now();
        let key = cache_key(volatility, headline);

        if let Some(text) = self.cached(&key) {
            return Explanation {
                text,
                status: ExplainStatus::Cached,
                attempts: 0,
                latency: started.elapsed(),
            };
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(
                self.policy.attempt_timeout,
                self.explainer.explain(volatility, headline),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout(self.policy.attempt_timeout)),
            };

            match result {
                Ok(text) => {
                    let text = text.trim().to_string();
                    self.remember(key, &text);
                    return Explanation {
                        text,
                        status: ExplainStatus::Answered,
                        attempts: attempt,
                        latency: started.elapsed(),
                    };
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let backoff = self.policy.backoff_for(attempt);
                    debug!(attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "retrying explainer");
                    sleep(backoff).await;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "explainer gave up");
                    return Explanation {
                        text: failure_analysis(&err),
                        status: ExplainStatus::Failed(err),
                        attempts: attempt,
                        latency: started.elapsed(),
                    };
                }
            }
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<String> {
        self.cache.as_ref()?.lock().get(key).cloned()
    }

    fn remember(&self, key: CacheKey, text: &str) {
        if let Some(cache) = &self.cache {
            cache.lock().insert(key, text.to_string());
        }
    }
}

fn cache_key(volatility: f64, headline: &str) -> CacheKey {
    ((volatility * 100.0).round() as i64, headline.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Replays scripted results, then repeats the last one.
    pub(crate) struct ScriptedExplainer {
        pub calls: AtomicUsize,
        script: Mutex<Vec<Result<String, ServiceError>>>,
        delay: Duration,
    }

    impl ScriptedExplainer {
        pub(crate) fn new(script: Vec<Result<String, ServiceError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn answering(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        pub(crate) fn failing(err: ServiceError) -> Self {
            Self::new(vec![Err(err)])
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Explainer for ScriptedExplainer {
        async fn explain(&self, _volatility: f64, _headline: &str) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn fast_policy() -> ExplainPolicy {
        ExplainPolicy {
            attempt_timeout: Duration::from_millis(200),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn below_threshold_never_calls_explainer() {
        let explainer = Arc::new(ScriptedExplainer::answering("unused"));
        let trigger = RiskTrigger::new(0.5, explainer.clone());

        for (volatility, headline) in [(0.0, None), (0.49, Some("X")), (0.499_999, Some("Y"))] {
            assert_eq!(trigger.evaluate(volatility, headline).await, MARKET_STABLE);
        }
        assert_eq!(explainer.call_count(), 0);
    }

    #[tokio::test]
    async fn high_volatility_without_news_reports_missing_attribution() {
        let explainer = Arc::new(ScriptedExplainer::answering("unused"));
        let trigger = RiskTrigger::new(0.5, explainer.clone());

        assert_eq!(trigger.evaluate(0.8, None).await, NO_ATTRIBUTABLE_NEWS);
        assert_eq!(explainer.call_count(), 0);
    }

    #[tokio::test]
    async fn threshold_itself_triggers_explanation_and_trims_answer() {
        let explainer = Arc::new(ScriptedExplainer::answering("  Lawsuit spooked buyers.\n"));
        let trigger = RiskTrigger::new(0.5, explainer.clone());

        assert_eq!(
            trigger.evaluate(0.5, Some("DOJ sues")).await,
            "Lawsuit spooked buyers."
        );
        assert_eq!(explainer.call_count(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_becomes_diagnostic_without_retry() {
        let explainer = Arc::new(ScriptedExplainer::failing(ServiceError::MissingApiKey));
        let trigger = RiskTrigger::new(0.5, explainer.clone()).with_policy(fast_policy());

        let explanation = trigger.explain(0.6, "DOJ sues").await;

        assert_eq!(explanation.text, "AI Analysis Failed: API key is not configured");
        assert_eq!(
            explanation.status,
            ExplainStatus::Failed(ServiceError::MissingApiKey)
        );
        assert_eq!(explanation.attempts, 1);
        assert_eq!(explainer.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let explainer = Arc::new(ScriptedExplainer::new(vec![
            Err(ServiceError::RateLimited),
            Err(ServiceError::Http {
                status: 503,
                message: "unavailable".to_string(),
            }),
            Ok("Recovered.".to_string()),
        ]));
        let trigger = RiskTrigger::new(0.5, explainer.clone()).with_policy(fast_policy());

        let explanation = trigger.explain(0.9, "DOJ sues").await;

        assert_eq!(explanation.text, "Recovered.");
        assert_eq!(explanation.status, ExplainStatus::Answered);
        assert_eq!(explanation.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_explainer_times_out_on_every_attempt() {
        let explainer = Arc::new(
            ScriptedExplainer::answering("too late").with_delay(Duration::from_secs(5)),
        );
        let trigger = RiskTrigger::new(0.5, explainer.clone()).with_policy(fast_policy());

        let explanation = trigger.explain(0.9, "DOJ sues").await;

        assert!(explanation.is_failure());
        assert!(explanation.text.starts_with(ANALYSIS_FAILED_PREFIX));
        assert!(explanation.text.contains("timed out"));
        assert_eq!(explainer.call_count(), 3);
    }

    #[tokio::test]
    async fn cache_reuses_answers_for_same_rounded_volatility_and_headline() {
        let explainer = Arc::new(ScriptedExplainer::answering("Because of the lawsuit."));
        let trigger = RiskTrigger::new(0.5, explainer.clone()).with_cache();

        let first = trigger.explain(0.901, "DOJ sues").await;
        let second = trigger.explain(0.899, "DOJ sues").await;
        let other_headline = trigger.explain(0.90, "Earnings beat").await;

        assert_eq!(first.status, ExplainStatus::Answered);
        assert_eq!(second.status, ExplainStatus::Cached);
        assert_eq!(second.text, first.text);
        assert_eq!(other_headline.status, ExplainStatus::Answered);
        assert_eq!(explainer.call_count(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let explainer = Arc::new(ScriptedExplainer::new(vec![
            Err(ServiceError::MalformedResponse("no candidates".to_string())),
            Ok("Second try.".to_string()),
        ]));
        let trigger = RiskTrigger::new(0.5, explainer.clone()).with_cache();

        assert!(trigger.explain(0.7, "DOJ sues").await.is_failure());
        assert_eq!(trigger.explain(0.7, "DOJ sues").await.text, "Second try.");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ExplainPolicy {
            attempt_timeout: Duration::from_secs(1),
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(20), MAX_EXPLAIN_BACKOFF);
    }

    #[test]
    fn transient_classification() {
        assert!(ServiceError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ServiceError::RateLimited.is_transient());
        assert!(ServiceError::Http {
            status: 500,
            message: String::new()
        }
        .is_transient());
        assert!(!ServiceError::Http {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!ServiceError::MissingApiKey.is_transient());
    }
}
