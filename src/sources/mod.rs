pub mod channel;
pub mod file;
#[cfg(feature = "source-tcp-server")]
pub mod tcp_server;

/// Progress cursor into a message source.
///
/// Byte offset for files, count of delivered units for channel based sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReadPosition(u64);

impl ReadPosition {
    pub const START: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ReadPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ReadPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One raw unit read from the source, a line or a broker payload.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Where the unit starts in the source.
    pub position: ReadPosition,
    pub payload: Vec<u8>,
}

/// Everything that was available since the previous position.
#[derive(Debug, Default)]
pub struct Drain {
    pub units: Vec<Unit>,
    pub end: ReadPosition,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source {0:?} not found")]
    NotFound(String),
    #[error("source {0:?} is unavailable")]
    Unavailable(String, #[source] std::io::Error),
    #[error("source {0:?} has been closed")]
    Closed(String),
    #[error("unable to read from source {0:?}")]
    Read(String, #[source] std::io::Error),
}

impl SourceError {
    /// Whether the loop can't go on after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Read(..))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("only one source can be configured, found a path and an address")]
    Conflicting,
    #[cfg(feature = "source-tcp-server")]
    #[error(transparent)]
    TcpServer(#[from] self::tcp_server::BuildError),
}

#[allow(async_fn_in_trait)]
pub trait MessageSource {
    fn flavor(&self) -> &'static str;

    /// Reads every complete unit available after `from`.
    async fn drain(&mut self, from: ReadPosition) -> Result<Drain, SourceError>;
}

#[derive(Clone, Debug)]
pub enum Config {
    File(self::file::Config),
    #[cfg(feature = "source-tcp-server")]
    TcpServer(self::tcp_server::Config),
}

impl Config {
    pub fn build(self) -> Result<Builder, BuildError> {
        Ok(match self {
            Self::File(inner) => Builder::File(inner.build()),
            #[cfg(feature = "source-tcp-server")]
            Self::TcpServer(inner) => Builder::TcpServer(inner.build()?),
        })
    }
}

/// A source that still needs to acquire its resources.
pub enum Builder {
    File(self::file::Source),
    #[cfg(feature = "source-tcp-server")]
    TcpServer(self::tcp_server::Server),
}

impl Builder {
    #[cfg_attr(not(feature = "source-tcp-server"), allow(unused_variables))]
    pub async fn prepare(
        self,
        token: &tokio_util::sync::CancellationToken,
    ) -> Result<Source, SourceError> {
        Ok(match self {
            Self::File(inner) => Source::File(inner),
            #[cfg(feature = "source-tcp-server")]
            Self::TcpServer(inner) => Source::Channel(inner.prepare(token.child_token()).await?),
        })
    }
}

pub enum Source {
    File(self::file::Source),
    Channel(self::channel::Source),
}

impl MessageSource for Source {
    fn flavor(&self) -> &'static str {
        match self {
            Self::File(inner) => inner.flavor(),
            Self::Channel(inner) => inner.flavor(),
        }
    }

    async fn drain(&mut self, from: ReadPosition) -> Result<Drain, SourceError> {
        match self {
            Self::File(inner) => inner.drain(from).await,
            Self::Channel(inner) => inner.drain(from).await,
        }
    }
}

impl From<self::file::Source> for Source {
    fn from(value: self::file::Source) -> Self {
        Self::File(value)
    }
}

impl From<self::channel::Source> for Source {
    fn from(value: self::channel::Source) -> Self {
        Self::Channel(value)
    }
}
