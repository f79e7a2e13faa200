use std::io::{Error, ErrorKind, Result as IOResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ingestion::{IngestError, Ingestion, Running};
use crate::prelude::StringOrEnv;
use crate::sinks::Sink;
use crate::sources::{ReadPosition, Source};

pub const DEFAULT_SOURCE_PATH: &str = "data/project_live.json";
pub const DEFAULT_SINK_URI: &str = "sqlite:data/buzz.sqlite";
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Source(#[from] crate::sources::BuildError),
    #[error(transparent)]
    Sink(#[from] crate::sinks::BuildError),
    #[error("unable to resolve {0}, environment variable is not set")]
    Unresolved(&'static str),
}

fn resolve(value: Option<StringOrEnv>, name: &'static str) -> Result<Option<String>, BuildError> {
    match value {
        None => Ok(None),
        Some(inner) => inner.as_string().map(Some).ok_or(BuildError::Unresolved(name)),
    }
}

/// Options recognized in the configuration file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct Config {
    /// Name given to the ingestion loop in logs
    pub name: Option<String>,
    /// File to tail
    pub source_path: Option<StringOrEnv>,
    /// Address to listen on for producers, instead of tailing a file
    pub source_address: Option<StringOrEnv>,
    /// Payloads buffered between producers and the loop
    pub source_buffer_size: Option<usize>,
    pub sink_uri: Option<StringOrEnv>,
    /// Drop persisted records when starting
    pub reset_sink: Option<bool>,
    pub poll_interval_seconds: Option<u64>,
    pub start_cursor: Option<u64>,
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(path: P) -> IOResult<Self> {
        let file = std::fs::read_to_string(path)?;
        toml::de::from_str(&file).map_err(|error| Error::new(ErrorKind::InvalidData, error))
    }

    pub fn with_source_path(mut self, path: PathBuf) -> Self {
        self.source_path = Some(StringOrEnv::String(path.display().to_string()));
        self
    }

    pub fn with_sink_uri(mut self, uri: String) -> Self {
        self.sink_uri = Some(StringOrEnv::String(uri));
        self
    }

    pub fn with_poll_interval_seconds(mut self, value: u64) -> Self {
        self.poll_interval_seconds = Some(value);
        self
    }

    pub fn with_start_cursor(mut self, value: u64) -> Self {
        self.start_cursor = Some(value);
        self
    }

    pub fn with_reset_sink(mut self, value: bool) -> Self {
        self.reset_sink = Some(value);
        self
    }

    fn source(
        path: Option<String>,
        address: Option<String>,
        buffer_size: Option<usize>,
    ) -> Result<crate::sources::Config, BuildError> {
        match (path, address) {
            (Some(_), Some(_)) => Err(crate::sources::BuildError::Conflicting.into()),
            #[cfg(feature = "source-tcp-server")]
            (None, Some(address)) => Ok(crate::sources::Config::TcpServer(
                crate::sources::tcp_server::Config {
                    address: Some(address),
                    buffer_size,
                },
            )),
            #[cfg(not(feature = "source-tcp-server"))]
            (None, Some(_)) => {
                let _ = buffer_size;
                Err(BuildError::Unresolved("source_address"))
            }
            (path, None) => Ok(crate::sources::Config::File(crate::sources::file::Config {
                path: PathBuf::from(path.as_deref().unwrap_or(DEFAULT_SOURCE_PATH)),
            })),
        }
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        let source = Self::source(
            resolve(self.source_path, "source_path")?,
            resolve(self.source_address, "source_address")?,
            self.source_buffer_size,
        )?
        .build()?;
        let sink_uri =
            resolve(self.sink_uri, "sink_uri")?.unwrap_or_else(|| DEFAULT_SINK_URI.to_owned());
        let sink = crate::sinks::Config::new(sink_uri)
            .with_reset(self.reset_sink.unwrap_or(true))
            .build()?;

        Ok(Pipeline {
            name: self.name.unwrap_or_else(|| String::from("ingestion")),
            source,
            sink,
            interval: Duration::from_secs(
                self.poll_interval_seconds
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS),
            ),
            start: ReadPosition::from(self.start_cursor.unwrap_or(0)),
        })
    }
}

/// Everything needed to start ingesting, nothing acquired yet.
pub struct Pipeline {
    name: String,
    source: crate::sources::Builder,
    sink: Sink,
    interval: Duration,
    start: ReadPosition,
}

impl Pipeline {
    /// Handle on the sink, shared with the read side.
    pub fn sink(&self) -> &Sink {
        &self.sink
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Opens the source then initializes the sink.
    pub async fn prepare(
        self,
        token: &CancellationToken,
        output: Option<crate::prelude::BatchSender>,
    ) -> Result<Ingestion<Source, Sink, Running>, IngestError> {
        let source = self.source.prepare(token).await?;
        let mut ingestion = Ingestion::new(self.name, source, self.sink)
            .with_interval(self.interval)
            .with_start_cursor(self.start);
        if let Some(output) = output {
            ingestion = ingestion.with_output(output);
        }
        ingestion.prepare().await
    }
}
