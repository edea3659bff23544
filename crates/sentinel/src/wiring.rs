use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use market_data::generators::{write_news_csv, write_prices_csv};
use market_data::{generate_session, Session, SessionConfig};
use runtime::{Explainer, ReplayEngine, RunLogWriter};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::config::{Config, API_KEY_KEY};
use crate::gemini::GeminiExplainer;

pub fn build_engine(config: &Config, run_log: Arc<dyn RunLogWriter>) -> ReplayEngine {
    ReplayEngine::new(config.engine_config(), run_log)
}

pub fn build_explainer(config: &Config) -> anyhow::Result<Arc<dyn Explainer>> {
    let explainer = GeminiExplainer::new(config.gemini_model.clone(), config.api_key.clone())
        .context("failed to build Gemini HTTP client")?;

    if !explainer.has_api_key() {
        warn!(
            key = API_KEY_KEY,
            "API key is not set; high-volatility explanations will be recorded as failures"
        );
    }

    Ok(Arc::new(explainer))
}

/// Start of the current UTC hour, used as the demo session start.
pub fn current_hour_utc() -> anyhow::Result<OffsetDateTime> {
    let now = OffsetDateTime::now_utc();
    Ok(now
        .replace_minute(0)?
        .replace_second(0)?
        .replace_nanosecond(0)?)
}

/// Generates a seeded demo session and writes it to the configured source paths.
pub fn write_demo_session(
    config: &Config,
    seed: u64,
    minutes: u32,
    start: OffsetDateTime,
) -> anyhow::Result<Session> {
    let mut session_config = SessionConfig::new(seed, start);
    session_config.minutes = minutes;
    let session = generate_session(&session_config).context("failed to generate demo session")?;

    let prices_file = create_with_parents(&config.prices_path)?;
    write_prices_csv(prices_file, &session.prices)
        .with_context(|| format!("failed to write {}", config.prices_path.display()))?;

    let news_file = create_with_parents(&config.news_path)?;
    write_news_csv(news_file, &session_config.ticker, &session.news)
        .with_context(|| format!("failed to write {}", config.news_path.display()))?;

    info!(
        seed,
        minutes,
        ticks = session.prices.len(),
        news = session.news.len(),
        prices_path = %config.prices_path.display(),
        news_path = %config.news_path.display(),
        "demo session written"
    );
    Ok(session)
}

fn create_with_parents(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    File::create(path).with_context(|| format!("failed to create {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use runtime::{EngineState, InMemoryRunLogWriter};
    use time::macros::datetime;

    use super::{build_engine, build_explainer, current_hour_utc, write_demo_session};
    use crate::config::Config;

    fn config_in(root: &std::path::Path) -> Config {
        Config {
            prices_path: root.join("data").join("stream_prices.csv"),
            news_path: root.join("data").join("stream_news.csv"),
            output_path: root.join("data").join("sentinel_output.jsonl"),
            window_secs: 30.0,
            volatility_threshold: 0.5,
            speed_multiplier: 20.0,
            explain_timeout: Duration::from_secs(10),
            explain_max_attempts: 3,
            explain_backoff: Duration::from_millis(500),
            explain_workers: 4,
            explain_cache: false,
            gemini_model: "gemini-2.5-flash".to_string(),
            api_key: None,
        }
    }

    #[test]
    fn demo_session_round_trips_through_the_engine_loader() {
        let root = tempfile::tempdir().unwrap();
        let config = config_in(root.path());

        let session =
            write_demo_session(&config, 42, 50, datetime!(2026-01-05 10:00:00 UTC)).unwrap();

        let mut engine = build_engine(&config, Arc::new(InMemoryRunLogWriter::new()));
        let sources = engine
            .load_sources(&config.prices_path, &config.news_path)
            .unwrap();

        assert_eq!(sources.prices().len(), 3_000);
        assert_eq!(sources.prices(), session.prices.as_slice());
        assert_eq!(sources.news(), session.news.as_slice());
        assert_eq!(sources.skipped_rows(), (0, 0));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn explainer_builds_without_api_key() {
        let config = config_in(&PathBuf::from("unused"));

        assert!(build_explainer(&config).is_ok());
    }

    #[test]
    fn demo_start_is_top_of_hour() {
        let start = current_hour_utc().unwrap();

        assert_eq!((start.minute(), start.second(), start.nanosecond()), (0, 0, 0));
    }
}
