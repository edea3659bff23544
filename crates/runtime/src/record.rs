use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One line of the output log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub price: f64,
    pub volatility: f64,
    pub headline: Option<String>,
    #[serde(rename = "ai_analysis")]
    pub analysis: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::EnrichedRecord;

    #[test]
    fn serializes_with_exact_output_shape() {
        let record = EnrichedRecord {
            timestamp: datetime!(2026-01-05 10:00:00 UTC),
            price: 150.25,
            volatility: 0.0,
            headline: None,
            analysis: "Market Stable".to_string(),
        };

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "timestamp": "2026-01-05T10:00:00Z",
                "price": 150.25,
                "volatility": 0.0,
                "headline": null,
                "ai_analysis": "Market Stable",
            })
        );
    }
}
