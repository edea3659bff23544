use std::io::{self, Write};

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::records::{NewsItem, PriceTick};
use crate::timestamp::format_timestamp;

pub const DEFAULT_TICKER: &str = "AAPL";
pub const DEFAULT_BASE_PRICE: f64 = 150.0;
pub const DEFAULT_SESSION_MINUTES: u32 = 60;
pub const PRICE_FLOOR: f64 = 0.01;

pub const CRASH_CAUSE_HEADLINE: &str =
    "BREAKING: DOJ announces antitrust lawsuit against Apple. Stock expected to plummet.";

const CRASH_START_MINUTE: f64 = 45.0;
const CRASH_END_MINUTE: f64 = 47.0;
const NEWS_INTERVAL_MINUTES: u32 = 5;
const NEWS_JITTER_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GeneratorError {
    #[error("start price must be finite and positive, got {0}")]
    InvalidStartPrice(f64),
}

/// Price dynamics for one stretch of the demo session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Regime {
    Stable,
    Crash,
    Recovery,
}

impl Regime {
    pub fn at_minute(minutes_elapsed: f64) -> Self {
        if minutes_elapsed < CRASH_START_MINUTE {
            Self::Stable
        } else if minutes_elapsed < CRASH_END_MINUTE {
            Self::Crash
        } else {
            Self::Recovery
        }
    }

    /// Mean and standard deviation of the per-second price change.
    pub fn step_distribution(self) -> (f64, f64) {
        match self {
            Self::Stable => (0.0, 0.05),
            Self::Crash => (-0.5, 0.2),
            Self::Recovery => (0.1, 0.3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PriceGenerator {
    state: u64,
    price: f64,
}

impl PriceGenerator {
    pub fn new(seed: u64, start_price: f64) -> Result<Self, GeneratorError> {
        if !start_price.is_finite() || start_price <= 0.0 {
            return Err(GeneratorError::InvalidStartPrice(start_price));
        }

        Ok(Self {
            state: seed,
            price: start_price,
        })
    }

    /// Advances the walk by one second under `regime`. The price never drops
    /// below `PRICE_FLOOR` and is rounded to cents.
    pub fn next_price(&mut self, regime: Regime) -> f64 {
        let (mean, std_dev) = regime.step_distribution();
        let change = mean + std_dev * next_standard_normal(&mut self.state);
        self.price = (self.price + change).max(PRICE_FLOOR);
        round_cents(self.price)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub seed: u64,
    pub start: OffsetDateTime,
    pub minutes: u32,
    pub ticker: String,
    pub base_price: f64,
}

impl SessionConfig {
    pub fn new(seed: u64, start: OffsetDateTime) -> Self {
        Self {
            seed,
            start,
            minutes: DEFAULT_SESSION_MINUTES,
            ticker: DEFAULT_TICKER.to_string(),
            base_price: DEFAULT_BASE_PRICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub prices: Vec<PriceTick>,
    pub news: Vec<NewsItem>,
}

/// Synthesizes a one-tick-per-second session: a quiet random walk, a crash
/// between minutes 45 and 47, then a volatile recovery. Background analyst
/// notes land every five minutes and the crash cause lands ten seconds before
/// the crash.
pub fn generate_session(config: &SessionConfig) -> Result<Session, GeneratorError> {
    let mut generator = PriceGenerator::new(config.seed, config.base_price)?;
    let total_secs = i64::from(config.minutes) * 60;

    let prices = (0..total_secs)
        .map(|second| {
            let regime = Regime::at_minute(second as f64 / 60.0);
            PriceTick::new(
                config.start + Duration::seconds(second),
                config.ticker.as_str(),
                generator.next_price(regime),
            )
        })
        .collect();

    Ok(Session {
        prices,
        news: generate_news(config),
    })
}

fn generate_news(config: &SessionConfig) -> Vec<NewsItem> {
    let mut state = config.seed ^ 0x9E37_79B9_7F4A_7C15;
    let note = format!(
        "Analyst note: {} showing steady performance.",
        config.ticker
    );

    let mut news: Vec<NewsItem> = (0..config.minutes)
        .step_by(NEWS_INTERVAL_MINUTES as usize)
        .map(|minute| {
            let jitter = next_u64(&mut state) % (NEWS_JITTER_SECS + 1);
            NewsItem::new(
                config.start + Duration::minutes(i64::from(minute)) + Duration::seconds(jitter as i64),
                note.as_str(),
            )
        })
        .collect();

    let crash_cause_at = Duration::minutes(44) + Duration::seconds(50);
    if crash_cause_at < Duration::minutes(i64::from(config.minutes)) {
        news.push(NewsItem::new(
            config.start + crash_cause_at,
            CRASH_CAUSE_HEADLINE,
        ));
    }

    news.sort_by_key(|item| item.timestamp);
    news
}

#[derive(Serialize)]
struct PriceCsvRow<'a> {
    timestamp: String,
    ticker: &'a str,
    price: f64,
}

#[derive(Serialize)]
struct NewsCsvRow<'a> {
    timestamp: String,
    ticker: &'a str,
    headline: &'a str,
}

pub fn write_prices_csv<W: Write>(writer: W, prices: &[PriceTick]) -> io::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for tick in prices {
        csv_writer
            .serialize(PriceCsvRow {
                timestamp: format_timestamp(tick.timestamp),
                ticker: &tick.ticker,
                price: tick.price,
            })
            .map_err(io::Error::other)?;
    }
    csv_writer.flush()
}

pub fn write_news_csv<W: Write>(writer: W, ticker: &str, news: &[NewsItem]) -> io::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for item in news {
        csv_writer
            .serialize(NewsCsvRow {
                timestamp: format_timestamp(item.timestamp),
                ticker,
                headline: &item.headline,
            })
            .map_err(io::Error::other)?;
    }
    csv_writer.flush()
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn next_u64(state: &mut u64) -> u64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    *state
}

fn next_unit(state: &mut u64) -> f64 {
    let value = next_u64(state);
    (value as f64) / (u64::MAX as f64)
}

// Box-Muller over two uniform draws.
fn next_standard_normal(state: &mut u64) -> f64 {
    let u1 = next_unit(state).max(f64::MIN_POSITIVE);
    let u2 = next_unit(state);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::source::{read_news, read_prices};

    fn config(seed: u64) -> SessionConfig {
        SessionConfig::new(seed, datetime!(2026-01-05 10:00:00 UTC))
    }

    #[test]
    fn seeded_sessions_are_deterministic() {
        assert_eq!(
            generate_session(&config(42)).unwrap(),
            generate_session(&config(42)).unwrap()
        );
        assert_ne!(
            generate_session(&config(42)).unwrap().prices,
            generate_session(&config(43)).unwrap().prices
        );
    }

    #[test]
    fn session_has_one_tick_per_second_with_positive_prices() {
        let session = generate_session(&config(7)).unwrap();

        assert_eq!(session.prices.len(), 3_600);
        assert_eq!(session.prices[0].timestamp, datetime!(2026-01-05 10:00:00 UTC));
        assert_eq!(session.prices[1].timestamp, datetime!(2026-01-05 10:00:01 UTC));
        assert!(session.prices.iter().all(|tick| tick.price >= PRICE_FLOOR));
    }

    #[test]
    fn crash_window_pulls_price_down() {
        let session = generate_session(&config(11)).unwrap();
        let before = session.prices[45 * 60 - 1].price;
        let after = session.prices[47 * 60 - 1].price;

        assert!(after < before - 20.0, "before={before} after={after}");
    }

    #[test]
    fn news_includes_crash_cause_ten_seconds_before_crash() {
        let session = generate_session(&config(3)).unwrap();

        assert_eq!(session.news.len(), 13);
        assert!(session
            .news
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        let cause = session
            .news
            .iter()
            .find(|item| item.headline == CRASH_CAUSE_HEADLINE)
            .unwrap();
        assert_eq!(cause.timestamp, datetime!(2026-01-05 10:44:50 UTC));
    }

    #[test]
    fn short_sessions_skip_the_crash_cause() {
        let mut short = config(3);
        short.minutes = 10;

        let session = generate_session(&short).unwrap();

        assert_eq!(session.prices.len(), 600);
        assert_eq!(session.news.len(), 2);
    }

    #[test]
    fn written_csv_is_readable_by_the_sources() {
        let mut short = config(5);
        short.minutes = 2;
        let session = generate_session(&short).unwrap();

        let mut prices_csv = Vec::new();
        write_prices_csv(&mut prices_csv, &session.prices).unwrap();
        let mut news_csv = Vec::new();
        write_news_csv(&mut news_csv, DEFAULT_TICKER, &session.news).unwrap();

        let prices = read_prices(prices_csv.as_slice()).unwrap();
        let news = read_news(news_csv.as_slice()).unwrap();

        assert_eq!(prices.skipped_rows, 0);
        assert_eq!(prices.records, session.prices);
        assert_eq!(news.records, session.news);
    }

    #[test]
    fn price_generator_rejects_invalid_start_price() {
        assert!(matches!(
            PriceGenerator::new(1, f64::NAN),
            Err(GeneratorError::InvalidStartPrice(_))
        ));
        assert!(PriceGenerator::new(1, 0.0).is_err());
    }

    #[test]
    fn session_with_negative_base_price_is_rejected() {
        let mut bad = config(1);
        bad.base_price = -5.0;

        assert_eq!(
            generate_session(&bad),
            Err(GeneratorError::InvalidStartPrice(-5.0))
        );
    }
}
