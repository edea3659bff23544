use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::dispatch::AnalysisHandle;
use crate::logging::{RunLogEvent, RunLogEventKind, RunLogWriter};
use crate::record::EnrichedRecord;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("output log write failed: {0}")]
    Io(#[from] io::Error),
    #[error("output record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("output writer stopped: {0}")]
    Worker(String),
}

/// A writer that can push appended bytes to durable storage.
pub trait LogTarget: Write {
    fn sync_durable(&mut self) -> io::Result<()>;
}

impl LogTarget for File {
    fn sync_durable(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

impl LogTarget for Vec<u8> {
    fn sync_durable(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: LogTarget + ?Sized> LogTarget for &mut T {
    fn sync_durable(&mut self) -> io::Result<()> {
        (**self).sync_durable()
    }
}

/// Append-only JSON-lines writer for enriched records.
pub struct RecordLogWriter<W: LogTarget> {
    writer: W,
    appended: u64,
}

impl<W: LogTarget> RecordLogWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            appended: 0,
        }
    }

    /// Writes one line, then flushes and syncs before returning so a tailing
    /// reader sees the record as soon as this call completes.
    pub fn append(&mut self, record: &EnrichedRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;
        self.writer.sync_durable()?;
        self.appended += 1;
        Ok(())
    }

    pub fn append_and_log(
        &mut self,
        tick: u64,
        record: &EnrichedRecord,
        run_log: &dyn RunLogWriter,
    ) -> Result<(), SinkError> {
        self.append(record)?;
        run_log.write(RunLogEvent::new(tick, RunLogEventKind::RecordAppended, None));
        Ok(())
    }

    pub fn appended(&self) -> u64 {
        self.appended
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Truncates or creates the output log, creating parent directories first.
pub fn create_output_log(path: &Path) -> io::Result<RecordLogWriter<File>> {
    if let Some(parent) = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    Ok(RecordLogWriter::new(file))
}

/// A record whose analysis may still be in flight.
pub struct PendingRecord {
    pub tick: u64,
    pub timestamp: OffsetDateTime,
    pub price: f64,
    pub volatility: f64,
    pub headline: Option<String>,
    pub analysis: AnalysisHandle,
}

impl PendingRecord {
    pub async fn resolve(self) -> (u64, EnrichedRecord) {
        let analysis = self.analysis.resolve().await;
        (
            self.tick,
            EnrichedRecord {
                timestamp: self.timestamp,
                price: self.price,
                volatility: self.volatility,
                headline: self.headline,
                analysis,
            },
        )
    }
}

/// Sink task body: resolves pending records strictly in arrival order and
/// appends each one. Appends run on the blocking pool since each one waits on
/// a durable sync. Returns the writer once the channel closes.
pub async fn drain_pending<W>(
    mut pending: mpsc::UnboundedReceiver<PendingRecord>,
    mut writer: RecordLogWriter<W>,
    run_log: Arc<dyn RunLogWriter>,
) -> Result<RecordLogWriter<W>, SinkError>
where
    W: LogTarget + Send + 'static,
{
    while let Some(record) = pending.recv().await {
        let (tick, record) = record.resolve().await;
        let run_log = Arc::clone(&run_log);
        let (appended, returned) = tokio::task::spawn_blocking(move || {
            let appended = writer.append_and_log(tick, &record, run_log.as_ref());
            (appended, writer)
        })
        .await
        .map_err(|err| SinkError::Worker(err.to_string()))?;
        appended?;
        writer = returned;
    }
    Ok(writer)
}
