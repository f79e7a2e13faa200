use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::message::normalize::{normalize, NormalizeError};
use crate::message::parser::{parse, ParseError};
use crate::message::{Batch, PersistedRecord};
use crate::prelude::BatchSender;
use crate::sinks::{InitError, Storage, WriteError};
use crate::sources::{MessageSource, ReadPosition, SourceError, Unit};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// How much of an offending unit ends up in the logs.
const PREVIEW_SIZE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unable to initialize sink {target:?}")]
    SinkInit {
        target: String,
        #[source]
        source: InitError,
    },
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Exit signals of the process, one per way the loop can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    Interrupted,
    SourceNotFound,
    SinkInit,
    Fatal,
}

impl ExitSignal {
    pub const fn code(&self) -> u8 {
        match self {
            Self::Fatal => 1,
            Self::SourceNotFound => 2,
            Self::SinkInit => 3,
            Self::Interrupted => 130,
        }
    }
}

impl IngestError {
    pub fn signal(&self) -> ExitSignal {
        match self {
            Self::SinkInit { .. } => ExitSignal::SinkInit,
            Self::Source(SourceError::NotFound(_) | SourceError::Unavailable(..)) => {
                ExitSignal::SourceNotFound
            }
            Self::Source(_) => ExitSignal::Fatal,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum UnitError {
    #[error("unable to parse unit")]
    Parse(#[from] ParseError),
    #[error("unable to normalize record")]
    Normalize(#[from] NormalizeError),
    #[error("unable to persist record into {target:?}")]
    Write {
        target: String,
        #[source]
        source: WriteError,
    },
}

fn preview(payload: &[u8]) -> String {
    let content = String::from_utf8_lossy(payload);
    if content.chars().count() > PREVIEW_SIZE {
        let mut truncated = content.chars().take(PREVIEW_SIZE).collect::<String>();
        truncated.push('…');
        truncated
    } else {
        content.into_owned()
    }
}

/// Outcome of a single drain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Units read from the source
    pub read: usize,
    pub persisted: usize,
    /// Blank units
    pub skipped: usize,
    pub failed: usize,
    pub end: ReadPosition,
}

pub struct Stale {
    start: ReadPosition,
}

pub struct Running {
    position: ReadPosition,
}

/// Moves messages from a source into a sink.
///
/// The loop owns the read position, nothing else in the process writes it.
pub struct Ingestion<Src, Snk, S = Stale> {
    name: String,
    source: Src,
    sink: Snk,
    interval: Duration,
    output: Option<BatchSender>,
    state: S,
}

impl<Src, Snk> Ingestion<Src, Snk, Stale>
where
    Src: MessageSource,
    Snk: Storage,
{
    pub fn new<N: Into<String>>(name: N, source: Src, sink: Snk) -> Self {
        Self {
            name: name.into(),
            source,
            sink,
            interval: DEFAULT_INTERVAL,
            output: None,
            state: Stale {
                start: ReadPosition::START,
            },
        }
    }

    pub fn with_start_cursor(mut self, start: ReadPosition) -> Self {
        self.state.start = start;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Receives every non empty batch of persisted records.
    pub fn with_output(mut self, output: BatchSender) -> Self {
        self.output = Some(output);
        self
    }

    /// Initializes the sink, consuming the stale loop so it can only happen once.
    pub async fn prepare(self) -> Result<Ingestion<Src, Snk, Running>, IngestError> {
        self.sink
            .initialize()
            .await
            .map_err(|source| IngestError::SinkInit {
                target: self.sink.target().to_owned(),
                source,
            })?;
        tracing::info!(
            source = self.source.flavor(),
            sink = self.sink.flavor(),
            uri = self.sink.target(),
            position = %self.state.start,
            "ingestion ready"
        );
        Ok(Ingestion {
            name: self.name,
            source: self.source,
            sink: self.sink,
            interval: self.interval,
            output: self.output,
            state: Running {
                position: self.state.start,
            },
        })
    }
}

impl<Src, Snk> Ingestion<Src, Snk, Running>
where
    Src: MessageSource,
    Snk: Storage,
{
    pub fn position(&self) -> ReadPosition {
        self.state.position
    }

    pub fn sink(&self) -> &Snk {
        &self.sink
    }

    async fn process(&self, unit: &Unit) -> Result<Option<PersistedRecord>, UnitError> {
        let Some(fields) = parse(&unit.payload)? else {
            return Ok(None);
        };
        let message = normalize(&fields)?;
        let id = self
            .sink
            .persist(&message)
            .await
            .map_err(|source| UnitError::Write {
                target: self.sink.target().to_owned(),
                source,
            })?;
        tracing::debug!(position = %unit.position, %id, "record persisted");
        Ok(Some(PersistedRecord { id, message }))
    }

    async fn forward(&mut self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        if let Some(ref output) = self.output {
            if output.send(batch).await.is_err() {
                tracing::warn!("batch receiver is gone, no longer forwarding batches");
                self.output = None;
            }
        }
    }

    /// Reads everything available since the current position and persists it.
    ///
    /// A failing unit only skips itself. Only an error from the source itself
    /// is returned, in which case the position doesn't move.
    pub async fn drain_once(&mut self) -> Result<DrainReport, SourceError> {
        let drain = self.source.drain(self.state.position).await?;
        let mut report = DrainReport::default();
        let mut batch = Batch::with_capacity(drain.units.len());
        for unit in drain.units.iter() {
            report.read += 1;
            match self.process(unit).await {
                Ok(Some(record)) => batch.push(record),
                Ok(None) => {
                    tracing::debug!(position = %unit.position, "skipping blank unit");
                    report.skipped += 1;
                }
                Err(UnitError::Write { target, source }) => {
                    report.failed += 1;
                    tracing::error!(
                        position = %unit.position,
                        sink = %target,
                        content = %preview(&unit.payload),
                        "unable to persist record: {source:?}"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        position = %unit.position,
                        content = %preview(&unit.payload),
                        "skipping unit: {err:?}"
                    );
                }
            }
        }
        self.state.position = self.state.position.max(drain.end);
        report.persisted = batch.len();
        report.end = self.state.position;
        self.forward(batch).await;
        Ok(report)
    }

    /// Runs poll, drain and sleep until cancelled or the source fails for good.
    ///
    /// Cancellation is only looked at between iterations, a drain always
    /// completes. Returns the last position on a graceful stop.
    pub async fn execute(mut self, token: CancellationToken) -> Result<ReadPosition, IngestError> {
        tracing::info!(position = %self.state.position, "starting");
        let result = loop {
            if token.is_cancelled() {
                tracing::info!(position = %self.state.position, "interrupted");
                break Ok(self.state.position);
            }
            match self.drain_once().await {
                Ok(report) if report.read > 0 => {
                    tracing::info!(
                        read = report.read,
                        persisted = report.persisted,
                        skipped = report.skipped,
                        failed = report.failed,
                        position = %report.end,
                        "drain completed"
                    );
                }
                Ok(_) => tracing::trace!("nothing new"),
                Err(err) if err.is_fatal() => {
                    tracing::error!(position = %self.state.position, "source failed: {err:?}");
                    break Err(IngestError::Source(err));
                }
                Err(err) => {
                    tracing::error!(position = %self.state.position, "iteration failed: {err:?}");
                }
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        };
        self.sink.close().await;
        tracing::info!("stopping");
        result
    }
}

impl Ingestion<crate::sources::Source, crate::sinks::Sink, Running> {
    pub fn spawn(
        self,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<ReadPosition, IngestError>> {
        let span = tracing::info_span!(
            "component",
            name = self.name.as_str(),
            kind = "ingestion",
            source = self.source.flavor(),
            sink = self.sink.flavor(),
        );
        tokio::spawn(async move { self.execute(token).instrument(span).await })
    }
}
