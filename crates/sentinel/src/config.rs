use std::{env, fmt, path::PathBuf, time::Duration};

use runtime::{EngineConfig, ExplainPolicy};

const DEFAULT_PRICES_PATH: &str = "data/stream_prices.csv";
const DEFAULT_NEWS_PATH: &str = "data/stream_news.csv";
const DEFAULT_OUTPUT_PATH: &str = "data/sentinel_output.jsonl";
const DEFAULT_WINDOW_SECS: f64 = 30.0;
const DEFAULT_VOLATILITY_THRESHOLD: f64 = 0.5;
const DEFAULT_SPEED_MULTIPLIER: f64 = 20.0;
const DEFAULT_EXPLAIN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_EXPLAIN_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_EXPLAIN_BACKOFF_MS: u64 = 500;
const DEFAULT_EXPLAIN_WORKERS: usize = 4;
const DEFAULT_EXPLAIN_CACHE: bool = false;
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

pub const PRICES_PATH_KEY: &str = "SENTINEL_PRICES_PATH";
pub const NEWS_PATH_KEY: &str = "SENTINEL_NEWS_PATH";
pub const OUTPUT_PATH_KEY: &str = "SENTINEL_OUTPUT_PATH";
pub const WINDOW_SECS_KEY: &str = "SENTINEL_WINDOW_SECS";
pub const THRESHOLD_KEY: &str = "SENTINEL_VOLATILITY_THRESHOLD";
pub const SPEED_KEY: &str = "SENTINEL_SPEED_MULTIPLIER";
pub const EXPLAIN_TIMEOUT_KEY: &str = "SENTINEL_EXPLAIN_TIMEOUT_MS";
pub const EXPLAIN_ATTEMPTS_KEY: &str = "SENTINEL_EXPLAIN_MAX_ATTEMPTS";
pub const EXPLAIN_BACKOFF_KEY: &str = "SENTINEL_EXPLAIN_BACKOFF_MS";
pub const EXPLAIN_WORKERS_KEY: &str = "SENTINEL_EXPLAIN_WORKERS";
pub const EXPLAIN_CACHE_KEY: &str = "SENTINEL_EXPLAIN_CACHE";
pub const GEMINI_MODEL_KEY: &str = "SENTINEL_GEMINI_MODEL";
pub const API_KEY_KEY: &str = "GOOGLE_API_KEY";

/// Credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub prices_path: PathBuf,
    pub news_path: PathBuf,
    pub output_path: PathBuf,
    pub window_secs: f64,
    pub volatility_threshold: f64,
    pub speed_multiplier: f64,
    pub explain_timeout: Duration,
    pub explain_max_attempts: u32,
    pub explain_backoff: Duration,
    pub explain_workers: usize,
    pub explain_cache: bool,
    pub gemini_model: String,
    pub api_key: Option<ApiKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must not be empty or whitespace")]
    EmptyValue { key: &'static str },
    #[error("{key} must be {expected}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
    },
    #[error("{key} contains non-unicode data")]
    NonUnicode { key: &'static str },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let prices_path = parse_path_env(PRICES_PATH_KEY, DEFAULT_PRICES_PATH)?;
        let news_path = parse_path_env(NEWS_PATH_KEY, DEFAULT_NEWS_PATH)?;
        let output_path = parse_path_env(OUTPUT_PATH_KEY, DEFAULT_OUTPUT_PATH)?;

        let window_secs = parse_env(
            WINDOW_SECS_KEY,
            DEFAULT_WINDOW_SECS,
            "a finite number of seconds greater than 0 that fits a duration",
            |value: &f64| {
                *value > 0.0 && time::Duration::checked_seconds_f64(*value).is_some()
            },
        )?;
        let volatility_threshold = parse_env(
            THRESHOLD_KEY,
            DEFAULT_VOLATILITY_THRESHOLD,
            "a finite number greater than or equal to 0",
            |value: &f64| value.is_finite() && *value >= 0.0,
        )?;
        let speed_multiplier = parse_env(
            SPEED_KEY,
            DEFAULT_SPEED_MULTIPLIER,
            "a finite number greater than 0",
            |value: &f64| value.is_finite() && *value > 0.0,
        )?;

        let explain_timeout_ms = parse_env(
            EXPLAIN_TIMEOUT_KEY,
            DEFAULT_EXPLAIN_TIMEOUT_MS,
            "an integer number of milliseconds greater than 0",
            |value: &u64| *value > 0,
        )?;
        let explain_max_attempts = parse_env(
            EXPLAIN_ATTEMPTS_KEY,
            DEFAULT_EXPLAIN_MAX_ATTEMPTS,
            "an integer greater than or equal to 1",
            |value: &u32| *value >= 1,
        )?;
        let explain_backoff_ms = parse_env(
            EXPLAIN_BACKOFF_KEY,
            DEFAULT_EXPLAIN_BACKOFF_MS,
            "an integer number of milliseconds",
            |_: &u64| true,
        )?;
        let explain_workers = parse_env(
            EXPLAIN_WORKERS_KEY,
            DEFAULT_EXPLAIN_WORKERS,
            "an integer greater than or equal to 1",
            |value: &usize| *value >= 1,
        )?;

        let explain_cache = match read_env(EXPLAIN_CACHE_KEY)? {
            Some(value) => parse_bool(value.as_str()).ok_or(ConfigError::InvalidValue {
                key: EXPLAIN_CACHE_KEY,
                expected: "true or false",
            })?,
            None => DEFAULT_EXPLAIN_CACHE,
        };

        let gemini_model = match read_env(GEMINI_MODEL_KEY)? {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyValue {
                    key: GEMINI_MODEL_KEY,
                });
            }
            Some(value) => value.trim().to_owned(),
            None => DEFAULT_GEMINI_MODEL.to_owned(),
        };

        let api_key = read_env(API_KEY_KEY)?
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(ApiKey::new);

        Ok(Self {
            prices_path,
            news_path,
            output_path,
            window_secs,
            volatility_threshold,
            speed_multiplier,
            explain_timeout: Duration::from_millis(explain_timeout_ms),
            explain_max_attempts,
            explain_backoff: Duration::from_millis(explain_backoff_ms),
            explain_workers,
            explain_cache,
            gemini_model,
            api_key,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lookback: time::Duration::saturating_seconds_f64(self.window_secs),
            volatility_threshold: self.volatility_threshold,
            speed_multiplier: self.speed_multiplier,
            explain: ExplainPolicy {
                attempt_timeout: self.explain_timeout,
                max_attempts: self.explain_max_attempts,
                initial_backoff: self.explain_backoff,
            },
            explain_workers: self.explain_workers,
            explain_cache: self.explain_cache,
            ..EngineConfig::default()
        }
    }
}

fn read_env(key: &'static str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NonUnicode { key }),
    }
}

fn parse_path_env(key: &'static str, default_value: &str) -> Result<PathBuf, ConfigError> {
    match read_env(key)? {
        Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue { key }),
        Some(value) => Ok(PathBuf::from(value)),
        None => Ok(PathBuf::from(default_value)),
    }
}

fn parse_env<T, F>(
    key: &'static str,
    default_value: T,
    expected: &'static str,
    is_valid: F,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&T) -> bool,
{
    let Some(value) = read_env(key)? else {
        return Ok(default_value);
    };

    match value.trim().parse::<T>() {
        Ok(parsed) if is_valid(&parsed) => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { key, expected }),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
