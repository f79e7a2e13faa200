use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{ReadError, Storage, WriteError};
use crate::message::{Message, PersistedRecord, RecordId};

const IN_MEMORY: &str = "sqlite::memory:";

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub url: Option<String>,
    pub reset: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid database connection url")]
    InvalidUrl(
        #[from]
        #[source]
        sqlx::Error,
    ),
}

impl Config {
    pub fn build(self) -> Result<Sink, BuildError> {
        let url = self.url.unwrap_or_else(|| IN_MEMORY.to_owned());
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
        let filename = options.get_filename();
        let directory = filename
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty() && filename.as_os_str() != ":memory:")
            .map(|parent| parent.to_path_buf());
        // every connection to an in-memory database opens a new database
        let pool = if url == IN_MEMORY || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_lazy_with(options)
        } else {
            SqlitePoolOptions::new().connect_lazy_with(options)
        };
        Ok(Sink {
            pool,
            url,
            directory,
            reset: self.reset,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("unable to create database directory")]
    UnableToCreateDirectory(#[source] std::io::Error),
    #[error("unable to connect")]
    UnableToConnect(#[source] sqlx::Error),
    #[error("unable to execute migrations")]
    UnableToMigrate(#[source] sqlx::Error),
}

async fn migrate(pool: &SqlitePool, reset: bool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    if reset {
        sqlx::query("drop table if exists streamed_messages")
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query(
        "create table if not exists streamed_messages (
            id integer primary key autoincrement,
            message text,
            author text,
            timestamp text,
            category text,
            sentiment real,
            keyword_mentioned text,
            message_length integer
        )",
    )
    .execute(&mut *tx)
    .await?;
    tx.commit().await
}

fn read_record(row: SqliteRow) -> Result<PersistedRecord, sqlx::Error> {
    Ok(PersistedRecord {
        id: RecordId::Row(row.try_get("id")?),
        message: Message {
            text: row.try_get::<Option<String>, _>("message")?.unwrap_or_default(),
            author: row.try_get::<Option<String>, _>("author")?.unwrap_or_default(),
            timestamp: row
                .try_get::<Option<String>, _>("timestamp")?
                .unwrap_or_default(),
            category: row
                .try_get::<Option<String>, _>("category")?
                .unwrap_or_default(),
            sentiment: row.try_get::<Option<f64>, _>("sentiment")?.unwrap_or(0.0),
            keyword: row
                .try_get::<Option<String>, _>("keyword_mentioned")?
                .unwrap_or_default(),
            length: row
                .try_get::<Option<i64>, _>("message_length")?
                .unwrap_or(0),
        },
    })
}

/// Stores messages as rows of the `streamed_messages` table.
///
/// Each operation checks a connection out of the pool, it goes back to the
/// pool when the operation returns, whatever the outcome.
#[derive(Clone)]
pub struct Sink {
    pool: SqlitePool,
    url: String,
    directory: Option<std::path::PathBuf>,
    reset: bool,
}

impl Storage for Sink {
    fn flavor(&self) -> &'static str {
        "sqlite"
    }

    fn target(&self) -> &str {
        self.url.as_str()
    }

    async fn initialize(&self) -> Result<(), super::InitError> {
        if let Some(ref directory) = self.directory {
            tokio::fs::create_dir_all(directory)
                .await
                .map_err(InitError::UnableToCreateDirectory)?;
        }
        // acquiring first splits connection issues from migration issues
        drop(
            self.pool
                .acquire()
                .await
                .map_err(InitError::UnableToConnect)?,
        );
        migrate(&self.pool, self.reset)
            .await
            .map_err(InitError::UnableToMigrate)?;
        tracing::info!(url = %self.url, reset = self.reset, "table streamed_messages ready");
        Ok(())
    }

    async fn persist(&self, message: &Message) -> Result<RecordId, WriteError> {
        let result = sqlx::query(
            "insert into streamed_messages (message, author, timestamp, category, sentiment, keyword_mentioned, message_length) values (?,?,?,?,?,?,?)",
        )
        .bind(&message.text)
        .bind(&message.author)
        .bind(&message.timestamp)
        .bind(&message.category)
        .bind(message.sentiment)
        .bind(&message.keyword)
        .bind(message.length)
        .execute(&self.pool)
        .await
        .map_err(WriteError::Sqlite)?;
        Ok(RecordId::from(result.last_insert_rowid()))
    }

    async fn remove(&self, id: &RecordId) -> Result<bool, WriteError> {
        let RecordId::Row(id) = id else {
            return Err(WriteError::ForeignIdentity(id.clone(), self.flavor()));
        };
        let result = sqlx::query("delete from streamed_messages where id = ?")
            .bind(*id)
            .execute(&self.pool)
            .await
            .map_err(WriteError::Sqlite)?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_all(&self) -> Result<Vec<PersistedRecord>, ReadError> {
        let rows = sqlx::query("select * from streamed_messages order by id")
            .fetch_all(&self.pool)
            .await
            .map_err(ReadError::Sqlite)?;
        rows.into_iter()
            .map(read_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ReadError::Sqlite)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use crate::message::{Message, RecordId};
    use crate::sinks::{Storage, WriteError};

    fn memory_sink() -> super::Sink {
        super::Config {
            url: None,
            reset: true,
        }
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn should_reset_table_twice() {
        let sink = memory_sink();
        sink.initialize().await.unwrap();
        sink.persist(&Message::new("hello")).await.unwrap();
        sink.initialize().await.unwrap();
        assert!(sink.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_keep_rows_without_reset() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("nested/buzz.sqlite").display());

        let sink = super::Config {
            url: Some(url.clone()),
            reset: true,
        }
        .build()
        .unwrap();
        sink.initialize().await.unwrap();
        sink.persist(&Message::new("hello")).await.unwrap();
        sink.close().await;

        let sink = super::Config {
            url: Some(url),
            reset: false,
        }
        .build()
        .unwrap();
        sink.initialize().await.unwrap();
        let records = sink.fetch_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message.text, "hello");
        sink.close().await;
    }

    #[tokio::test]
    async fn should_persist_and_remove() {
        let sink = memory_sink();
        sink.initialize().await.unwrap();
        sink.persist(&Message::new("first")).await.unwrap();
        let before = sink.fetch_all().await.unwrap().len();

        let message = Message::new("I just shared a meme! It was amazing.")
            .with_author("Charlie")
            .with_category("humor")
            .with_keyword("meme")
            .with_timestamp("2025-01-29 14:35:20");
        let id = sink.persist(&message).await.unwrap();
        assert!(matches!(id, RecordId::Row(_)));

        let records = sink.fetch_all().await.unwrap();
        let stored = records.iter().find(|r| r.id == id).unwrap();
        assert_eq!(stored.message, message);

        assert!(sink.remove(&id).await.unwrap());
        assert_eq!(sink.fetch_all().await.unwrap().len(), before);
        assert!(!sink.remove(&id).await.unwrap());
    }

    #[tokio::test]
    async fn should_reject_document_identity() {
        let sink = memory_sink();
        sink.initialize().await.unwrap();
        let error = sink
            .remove(&RecordId::Document("abc".into()))
            .await
            .unwrap_err();
        assert!(matches!(error, WriteError::ForeignIdentity(..)));
    }

    #[tokio::test]
    async fn should_fail_writing_before_initialize() {
        let sink = memory_sink();
        let error = sink.persist(&Message::new("hello")).await.unwrap_err();
        assert!(matches!(error, WriteError::Sqlite(_)));
    }
}
