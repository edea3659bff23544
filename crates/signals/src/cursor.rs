use market_data::NewsItem;
use time::OffsetDateTime;

/// Forward-only cursor implementing an as-of join against a sorted news
/// sequence.
///
/// `advance_to(ts)` yields the headline of the last item with
/// `timestamp <= ts`. The index never rewinds, so pairing every tick of a
/// replay costs O(1) amortized.
#[derive(Debug, Clone)]
pub struct NewsCursor {
    news: Vec<NewsItem>,
    index: usize,
    latest: Option<usize>,
}

impl NewsCursor {
    /// `news` must already be sorted ascending by timestamp.
    pub fn new(news: Vec<NewsItem>) -> Self {
        Self {
            news,
            index: 0,
            latest: None,
        }
    }

    pub fn advance_to(&mut self, ts: OffsetDateTime) -> Option<&str> {
        while self
            .news
            .get(self.index)
            .is_some_and(|item| item.timestamp <= ts)
        {
            self.latest = Some(self.index);
            self.index += 1;
        }

        self.latest_headline()
    }

    pub fn latest_headline(&self) -> Option<&str> {
        self.latest.map(|index| self.news[index].headline.as_str())
    }

    /// Number of news items consumed so far.
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn remaining(&self) -> usize {
        self.news.len() - self.index
    }
}
