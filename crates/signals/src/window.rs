use std::collections::VecDeque;

use market_data::PriceTick;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WindowConfigError {
    #[error("window lookback must be positive")]
    NonPositiveLookback,
}

/// Trailing window of price ticks keyed on simulated time.
///
/// Members always satisfy `latest - lookback < ts <= latest`, where `latest` is
/// the timestamp of the most recently pushed tick. Ticks must be pushed in
/// non-decreasing timestamp order; eviction only inspects the front.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    lookback: Duration,
    ticks: VecDeque<PriceTick>,
}

impl SlidingWindow {
    pub fn new(lookback: Duration) -> Result<Self, WindowConfigError> {
        if !lookback.is_positive() {
            return Err(WindowConfigError::NonPositiveLookback);
        }

        Ok(Self {
            lookback,
            ticks: VecDeque::new(),
        })
    }

    /// Appends `tick`, then evicts every member at or before
    /// `tick.timestamp - lookback`. When that cutoff falls outside the
    /// representable date range nothing can be old enough, so all members stay.
    pub fn push(&mut self, tick: PriceTick) {
        let cutoff = tick.timestamp.checked_sub(self.lookback);
        self.ticks.push_back(tick);

        let Some(cutoff) = cutoff else {
            return;
        };
        while self
            .ticks
            .front()
            .is_some_and(|oldest| oldest.timestamp <= cutoff)
        {
            self.ticks.pop_front();
        }
    }

    /// Population standard deviation of the prices in the window, `0.0` with
    /// fewer than two members.
    pub fn volatility(&self) -> f64 {
        population_std_dev(self.ticks.iter().map(|tick| tick.price))
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn latest_timestamp(&self) -> Option<OffsetDateTime> {
        self.ticks.back().map(|tick| tick.timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriceTick> {
        self.ticks.iter()
    }
}

pub fn population_std_dev<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
    I::IntoIter: Clone,
{
    let values = values.into_iter();
    let count = values.clone().count();
    if count < 2 {
        return 0.0;
    }

    let n = count as f64;
    let mean = values.clone().sum::<f64>() / n;
    let sum_sq = values.map(|value| (value - mean).powi(2)).sum::<f64>();
    (sum_sq / n).sqrt()
}
