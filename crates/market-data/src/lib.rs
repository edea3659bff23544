pub mod generators;
pub mod records;
pub mod source;
pub mod timestamp;

pub use generators::{generate_session, GeneratorError, Session, SessionConfig};
pub use records::{NewsItem, PriceTick};
pub use source::{load_news, load_prices, Loaded, SourceError, SourceKind};
pub use timestamp::{format_timestamp, parse_timestamp};

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{NewsItem, PriceTick};

    #[test]
    fn price_tick_serializes_timestamp_as_rfc3339() {
        let tick = PriceTick::new(datetime!(2026-01-05 10:00:00 UTC), "AAPL", 150.0);
        let json = serde_json::to_value(&tick).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "timestamp": "2026-01-05T10:00:00Z",
                "ticker": "AAPL",
                "price": 150.0,
            })
        );
    }

    #[test]
    fn news_item_keeps_headline_verbatim() {
        let item = NewsItem::new(datetime!(2026-01-05 10:44:50 UTC), "  spaced  ");
        assert_eq!(item.headline, "  spaced  ");
    }
}
