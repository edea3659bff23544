use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One timestamped price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub ticker: String,
    pub price: f64,
}

impl PriceTick {
    pub fn new(timestamp: OffsetDateTime, ticker: impl Into<String>, price: f64) -> Self {
        Self {
            timestamp,
            ticker: ticker.into(),
            price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub headline: String,
}

impl NewsItem {
    pub fn new(timestamp: OffsetDateTime, headline: impl Into<String>) -> Self {
        Self {
            timestamp,
            headline: headline.into(),
        }
    }
}
