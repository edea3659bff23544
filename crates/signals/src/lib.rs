pub mod cursor;
pub mod window;

pub use cursor::NewsCursor;
pub use window::{population_std_dev, SlidingWindow, WindowConfigError};

#[cfg(test)]
mod tests {
    use market_data::{NewsItem, PriceTick};
    use time::{macros::datetime, Duration};

    use crate::{NewsCursor, SlidingWindow};

    #[test]
    fn window_and_cursor_enrich_a_short_replay() {
        let t0 = datetime!(2026-01-05 10:00:00 UTC);
        let prices = [(0, 100.0), (1, 90.0), (2, 70.0), (10, 70.0)];
        let mut window = SlidingWindow::new(Duration::seconds(30)).unwrap();
        let mut cursor = NewsCursor::new(vec![NewsItem::new(t0 + Duration::seconds(5), "X")]);

        let enriched: Vec<(f64, Option<String>)> = prices
            .into_iter()
            .map(|(offset, price)| {
                let ts = t0 + Duration::seconds(offset);
                window.push(PriceTick::new(ts, "AAPL", price));
                let headline = cursor.advance_to(ts).map(str::to_owned);
                (window.volatility(), headline)
            })
            .collect();

        assert_eq!(enriched[0], (0.0, None));
        assert!((enriched[2].0 - 12.47).abs() < 0.01);
        assert_eq!(enriched[2].1, None);
        assert_eq!(enriched[3].1.as_deref(), Some("X"));
    }
}
