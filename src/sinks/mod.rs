#[cfg(feature = "sink-document")]
pub mod document;
#[cfg(feature = "sink-sqlite")]
pub mod sqlite;

use crate::message::{Message, PersistedRecord, RecordId};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unsupported sink uri {0:?}")]
    UnsupportedUri(String),
    #[cfg(feature = "sink-document")]
    #[error(transparent)]
    Document(#[from] self::document::BuildError),
    #[cfg(feature = "sink-sqlite")]
    #[error(transparent)]
    Sqlite(#[from] self::sqlite::BuildError),
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[cfg(feature = "sink-document")]
    #[error(transparent)]
    Document(#[from] self::document::InitError),
    #[cfg(feature = "sink-sqlite")]
    #[error(transparent)]
    Sqlite(#[from] self::sqlite::InitError),
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("unable to write document")]
    Document(#[source] std::io::Error),
    #[error("unable to encode document")]
    Encoding(#[source] serde_json::Error),
    #[cfg(feature = "sink-sqlite")]
    #[error("unable to execute query")]
    Sqlite(#[source] sqlx::Error),
    #[error("identity {0} does not belong to a {1} sink")]
    ForeignIdentity(RecordId, &'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[cfg(feature = "sink-sqlite")]
    #[error("unable to query records")]
    Sqlite(#[source] sqlx::Error),
}

/// Durable storage for normalized messages.
#[allow(async_fn_in_trait)]
pub trait Storage {
    fn flavor(&self) -> &'static str;

    /// Where the records end up, used to give context in logs.
    fn target(&self) -> &str;

    /// Prepares the underlying store, must be called before anything else.
    async fn initialize(&self) -> Result<(), InitError>;

    async fn persist(&self, message: &Message) -> Result<RecordId, WriteError>;

    /// Returns whether a record was actually removed.
    async fn remove(&self, id: &RecordId) -> Result<bool, WriteError>;

    async fn fetch_all(&self) -> Result<Vec<PersistedRecord>, ReadError>;

    /// Releases the resources held by the sink.
    async fn close(&self) {}
}

#[derive(Clone, Debug)]
pub struct Config {
    pub uri: String,
    /// Drop existing records when initializing
    pub reset: bool,
}

impl Config {
    pub fn new<U: Into<String>>(uri: U) -> Self {
        Self {
            uri: uri.into(),
            reset: true,
        }
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn build(self) -> Result<Sink, BuildError> {
        #[cfg(feature = "sink-sqlite")]
        if self.uri.starts_with("sqlite:") {
            let inner = self::sqlite::Config {
                url: Some(self.uri),
                reset: self.reset,
            };
            return Ok(Sink::Sqlite(inner.build()?));
        }
        #[cfg(feature = "sink-document")]
        if let Some(location) = self.uri.strip_prefix("document:") {
            let inner = self::document::Config::from_location(location, self.reset);
            return Ok(Sink::Document(inner.build()?));
        }
        Err(BuildError::UnsupportedUri(self.uri))
    }
}

/// Every supported sink, selected from the configured uri.
#[derive(Clone)]
pub enum Sink {
    #[cfg(feature = "sink-document")]
    Document(self::document::Sink),
    #[cfg(feature = "sink-sqlite")]
    Sqlite(self::sqlite::Sink),
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $body:expr) => {
        match $self {
            #[cfg(feature = "sink-document")]
            Self::Document($inner) => $body,
            #[cfg(feature = "sink-sqlite")]
            Self::Sqlite($inner) => $body,
        }
    };
}

impl Storage for Sink {
    fn flavor(&self) -> &'static str {
        dispatch!(self, inner => inner.flavor())
    }

    fn target(&self) -> &str {
        dispatch!(self, inner => inner.target())
    }

    async fn initialize(&self) -> Result<(), InitError> {
        dispatch!(self, inner => inner.initialize().await)
    }

    async fn persist(&self, message: &Message) -> Result<RecordId, WriteError> {
        dispatch!(self, inner => inner.persist(message).await)
    }

    async fn remove(&self, id: &RecordId) -> Result<bool, WriteError> {
        dispatch!(self, inner => inner.remove(id).await)
    }

    async fn fetch_all(&self) -> Result<Vec<PersistedRecord>, ReadError> {
        dispatch!(self, inner => inner.fetch_all().await)
    }

    async fn close(&self) {
        dispatch!(self, inner => inner.close().await)
    }
}

#[cfg(test)]
mod tests {
    #[test_case::test_case("postgres://localhost/buzz"; "other database")]
    #[test_case::test_case("data/buzz.sqlite"; "missing scheme")]
    fn should_reject_unknown_uri(uri: &str) {
        let result = super::Config::new(uri).build();
        assert!(matches!(result, Err(super::BuildError::UnsupportedUri(_))));
    }

    #[cfg(feature = "sink-sqlite")]
    #[tokio::test]
    async fn should_select_sqlite() {
        use super::Storage;

        let sink = super::Config::new("sqlite::memory:").build().unwrap();
        assert_eq!(sink.flavor(), "sqlite");
    }

    #[cfg(feature = "sink-document")]
    #[test]
    fn should_select_document() {
        use super::Storage;

        let sink = super::Config::new("document::memory:").build().unwrap();
        assert_eq!(sink.flavor(), "document");
    }
}
