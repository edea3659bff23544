use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::records::{NewsItem, PriceTick};
use crate::timestamp::parse_timestamp;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source file {} does not exist", path.display())]
    Missing { path: PathBuf },
    #[error("source file {} could not be read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{kind} source contains no valid records")]
    Empty { kind: SourceKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Prices,
    News,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prices => "prices",
            Self::News => "news",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records parsed from one source, sorted ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub skipped_rows: usize,
}

impl<T> Loaded<T> {
    /// Returns the records, or `SourceError::Empty` when no row survived parsing.
    pub fn non_empty(self, kind: SourceKind) -> Result<Vec<T>, SourceError> {
        if self.records.is_empty() {
            return Err(SourceError::Empty { kind });
        }
        Ok(self.records)
    }
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    timestamp: String,
    #[serde(default)]
    ticker: Option<String>,
    price: String,
}

#[derive(Debug, Deserialize)]
struct NewsRow {
    timestamp: String,
    headline: String,
}

pub fn load_prices(path: &Path) -> Result<Loaded<PriceTick>, SourceError> {
    let file = open_source(path)?;
    read_prices(file).map_err(|source| SourceError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_news(path: &Path) -> Result<Loaded<NewsItem>, SourceError> {
    let file = open_source(path)?;
    read_news(file).map_err(|source| SourceError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads price rows from CSV with a `timestamp,ticker,price` header.
///
/// Rows with an unparseable timestamp or a price that is not a finite positive
/// number are skipped and counted. Only I/O failures are returned as errors.
pub fn read_prices<R: Read>(reader: R) -> io::Result<Loaded<PriceTick>> {
    let loaded = read_rows(reader, SourceKind::Prices, |row: PriceRow| {
        let timestamp = parse_timestamp(&row.timestamp)?;
        let price = row
            .price
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value > 0.0)?;
        let ticker = row.ticker.unwrap_or_default();

        Some(PriceTick {
            timestamp,
            ticker,
            price,
        })
    })?;

    Ok(sorted(loaded, |tick| tick.timestamp))
}

/// Reads news rows from CSV with at least `timestamp,headline` columns.
pub fn read_news<R: Read>(reader: R) -> io::Result<Loaded<NewsItem>> {
    let loaded = read_rows(reader, SourceKind::News, |row: NewsRow| {
        let timestamp = parse_timestamp(&row.timestamp)?;
        if row.headline.trim().is_empty() {
            return None;
        }

        Some(NewsItem {
            timestamp,
            headline: row.headline,
        })
    })?;

    Ok(sorted(loaded, |item| item.timestamp))
}

fn open_source(path: &Path) -> Result<File, SourceError> {
    File::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => SourceError::Missing {
            path: path.to_path_buf(),
        },
        _ => SourceError::Unreadable {
            path: path.to_path_buf(),
            source: err,
        },
    })
}

fn read_rows<R, Row, T, F>(reader: R, kind: SourceKind, mut convert: F) -> io::Result<Loaded<T>>
where
    R: Read,
    Row: for<'de> Deserialize<'de>,
    F: FnMut(Row) -> Option<T>,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    let mut skipped_rows = 0;

    for (index, row) in csv_reader.deserialize::<Row>().enumerate() {
        let line = index + 2;
        match row {
            Ok(row) => match convert(row) {
                Some(record) => records.push(record),
                None => {
                    skipped_rows += 1;
                    debug!(source = kind.as_str(), line, "skipping row with invalid values");
                }
            },
            Err(err) if err.is_io_error() => return Err(into_io_error(err)),
            Err(err) => {
                skipped_rows += 1;
                debug!(source = kind.as_str(), line, error = %err, "skipping malformed row");
            }
        }
    }

    if skipped_rows > 0 {
        warn!(
            source = kind.as_str(),
            skipped_rows,
            kept_rows = records.len(),
            "skipped malformed source rows"
        );
    }

    Ok(Loaded {
        records,
        skipped_rows,
    })
}

fn sorted<T, K: Ord>(mut loaded: Loaded<T>, key: impl FnMut(&T) -> K) -> Loaded<T> {
    loaded.records.sort_by_key(key);
    loaded
}

fn into_io_error(err: csv::Error) -> io::Error {
    match err.into_kind() {
        csv::ErrorKind::Io(err) => err,
        other => io::Error::other(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use time::macros::datetime;

    use super::{load_news, load_prices, read_news, read_prices, SourceError, SourceKind};

    #[test]
    fn reads_prices_and_skips_malformed_rows() {
        let csv = "timestamp,ticker,price\n\
                   2026-01-05 10:00:00,AAPL,150.10\n\
                   not-a-time,AAPL,150.20\n\
                   2026-01-05 10:00:01,AAPL,abc\n\
                   2026-01-05 10:00:02,AAPL,-1\n\
                   2026-01-05 10:00:03,AAPL,NaN\n\
                   2026-01-05 10:00:04,AAPL\n\
                   2026-01-05 10:00:05,AAPL,149.95\n";

        let loaded = read_prices(csv.as_bytes()).unwrap();

        assert_eq!(loaded.skipped_rows, 5);
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].ticker, "AAPL");
        assert_eq!(loaded.records[0].price, 150.10);
        assert_eq!(
            loaded.records[1].timestamp,
            datetime!(2026-01-05 10:00:05 UTC)
        );
    }

    #[test]
    fn sorts_out_of_order_rows_stably() {
        let csv = "timestamp,ticker,price\n\
                   2026-01-05T10:00:02Z,AAPL,3\n\
                   2026-01-05T10:00:01Z,AAPL,1\n\
                   2026-01-05T10:00:01Z,AAPL,2\n";

        let loaded = read_prices(csv.as_bytes()).unwrap();
        let prices: Vec<f64> = loaded.records.iter().map(|tick| tick.price).collect();

        assert_eq!(prices, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn reads_news_with_optional_ticker_column_and_quoted_commas() {
        let csv = "timestamp,ticker,headline\n\
                   2026-01-05 10:44:50,AAPL,\"BREAKING: DOJ sues, stock expected to plummet\"\n\
                   2026-01-05 10:05:12,AAPL,   \n\
                   2026-01-05 10:00:30,AAPL,Analyst note\n";

        let loaded = read_news(csv.as_bytes()).unwrap();

        assert_eq!(loaded.skipped_rows, 1);
        assert_eq!(loaded.records[0].headline, "Analyst note");
        assert_eq!(
            loaded.records[1].headline,
            "BREAKING: DOJ sues, stock expected to plummet"
        );
    }

    #[test]
    fn header_only_source_is_rejected_as_empty() {
        let loaded = read_prices("timestamp,ticker,price\n".as_bytes()).unwrap();
        let err = loaded.non_empty(SourceKind::Prices).unwrap_err();

        assert!(matches!(
            err,
            SourceError::Empty {
                kind: SourceKind::Prices
            }
        ));
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_prices(&dir.path().join("absent.csv")).unwrap_err();

        assert!(matches!(err, SourceError::Missing { .. }));
    }

    #[test]
    fn loads_news_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timestamp,headline").unwrap();
        writeln!(file, "2026-01-05 10:00:05,X").unwrap();

        let loaded = load_news(file.path()).unwrap();

        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].headline, "X");
    }
}
