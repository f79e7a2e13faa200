use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::RwLock;

use super::{ReadError, Storage, WriteError};
use crate::message::{Message, PersistedRecord, RecordId};

const IN_MEMORY: &str = ":memory:";

#[derive(Clone, Debug, Default)]
pub struct Config {
    /// JSON lines file backing the collection, kept in memory only when missing
    pub path: Option<PathBuf>,
    pub reset: bool,
}

impl Config {
    /// Reads the part of a `document:` uri after the scheme.
    pub fn from_location(location: &str, reset: bool) -> Self {
        let location = location.strip_prefix("//").unwrap_or(location);
        let path = (!location.is_empty() && location != IN_MEMORY).then(|| PathBuf::from(location));
        Self { path, reset }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("collection path {0:?} is a directory")]
    NotAFile(PathBuf),
}

impl Config {
    pub fn build(self) -> Result<Sink, BuildError> {
        if let Some(ref path) = self.path {
            if path.is_dir() {
                return Err(BuildError::NotAFile(path.clone()));
            }
        }
        let target = self
            .path
            .as_ref()
            .map(|path| format!("document://{}", path.display()))
            .unwrap_or_else(|| format!("document:{IN_MEMORY}"));
        Ok(Sink {
            collection: Arc::new(RwLock::new(IndexMap::new())),
            path: self.path.map(Arc::new),
            target: Arc::new(target),
            reset: self.reset,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("unable to create collection directory")]
    UnableToCreateDirectory(#[source] std::io::Error),
    #[error("unable to prepare collection file")]
    UnableToPrepare(#[source] std::io::Error),
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
struct Document {
    #[serde(rename = "_id")]
    id: String,
    #[serde(flatten)]
    message: Message,
}

type Collection = IndexMap<String, Message>;

fn encode(id: &str, message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let mut encoded = serde_json::to_vec(&Document {
        id: id.to_owned(),
        message: message.clone(),
    })?;
    encoded.push(b'\n');
    Ok(encoded)
}

async fn load(path: &Path) -> std::io::Result<Collection> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Collection::new()),
        Err(err) => return Err(err),
    };
    let mut collection = Collection::new();
    for (index, line) in content.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Document>(line) {
            Ok(document) => {
                collection.insert(document.id, document.message);
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), line = index + 1, "skipping invalid document: {err:?}");
            }
        }
    }
    Ok(collection)
}

/// Appends one encoded document, starting a new line if the file ends with a
/// torn one. A failed write truncates the file back to where it was.
async fn append(path: &Path, encoded: &[u8]) -> std::io::Result<()> {
    let mut output = tokio::fs::OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .await?;
    let length = output.metadata().await?.len();
    let mut line = Vec::with_capacity(encoded.len() + 1);
    if length > 0 {
        output.seek(SeekFrom::End(-1)).await?;
        let mut last = [0u8; 1];
        output.read_exact(&mut last).await?;
        if last[0] != b'\n' {
            tracing::warn!(path = %path.display(), "collection file ends with a torn line");
            line.push(b'\n');
        }
    }
    line.extend_from_slice(encoded);
    let written = match output.write_all(&line).await {
        Ok(()) => output.flush().await,
        Err(err) => Err(err),
    };
    if let Err(err) = written {
        if let Err(truncate) = output.set_len(length).await {
            tracing::error!(path = %path.display(), "unable to drop partial document: {truncate:?}");
        }
        return Err(err);
    }
    Ok(())
}

async fn rewrite(path: &Path, collection: &Collection) -> Result<(), WriteError> {
    let mut content = Vec::new();
    for (id, message) in collection.iter() {
        content.extend(encode(id, message).map_err(WriteError::Encoding)?);
    }
    let staging = path.with_extension("staging");
    tokio::fs::write(&staging, &content)
        .await
        .map_err(WriteError::Document)?;
    tokio::fs::rename(&staging, path)
        .await
        .map_err(WriteError::Document)
}

/// Stores messages as schemaless documents identified by a generated id.
///
/// Clones share the same collection, the lock being the store's own
/// concurrency control.
#[derive(Clone)]
pub struct Sink {
    collection: Arc<RwLock<Collection>>,
    path: Option<Arc<PathBuf>>,
    target: Arc<String>,
    reset: bool,
}

impl Storage for Sink {
    fn flavor(&self) -> &'static str {
        "document"
    }

    fn target(&self) -> &str {
        self.target.as_str()
    }

    async fn initialize(&self) -> Result<(), super::InitError> {
        let mut collection = self.collection.write().await;
        if let Some(ref path) = self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(InitError::UnableToCreateDirectory)?;
            }
            if self.reset {
                tokio::fs::write(path.as_path(), b"")
                    .await
                    .map_err(InitError::UnableToPrepare)?;
                collection.clear();
            } else {
                *collection = load(path).await.map_err(InitError::UnableToPrepare)?;
            }
        } else if self.reset {
            collection.clear();
        }
        tracing::info!(collection = %self.target, documents = collection.len(), "collection ready");
        Ok(())
    }

    async fn persist(&self, message: &Message) -> Result<RecordId, WriteError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut collection = self.collection.write().await;
        if let Some(ref path) = self.path {
            let encoded = encode(&id, message).map_err(WriteError::Encoding)?;
            append(path, &encoded).await.map_err(WriteError::Document)?;
        }
        collection.insert(id.clone(), message.clone());
        Ok(RecordId::from(id))
    }

    async fn remove(&self, id: &RecordId) -> Result<bool, WriteError> {
        let RecordId::Document(id) = id else {
            return Err(WriteError::ForeignIdentity(id.clone(), self.flavor()));
        };
        let mut collection = self.collection.write().await;
        let Some(index) = collection.get_index_of(id) else {
            return Ok(false);
        };
        if let Some(ref path) = self.path {
            let mut remaining = collection.clone();
            remaining.shift_remove_index(index);
            rewrite(path, &remaining).await?;
            *collection = remaining;
        } else {
            collection.shift_remove_index(index);
        }
        Ok(true)
    }

    async fn fetch_all(&self) -> Result<Vec<PersistedRecord>, ReadError> {
        let collection = self.collection.read().await;
        Ok(collection
            .iter()
            .map(|(id, message)| PersistedRecord {
                id: RecordId::Document(id.clone()),
                message: message.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::message::{Message, RecordId};
    use crate::sinks::Storage;

    #[test_case::test_case(":memory:", None; "in memory")]
    #[test_case::test_case("", None; "empty")]
    #[test_case::test_case("//data/buzz.jsonl", Some("data/buzz.jsonl"); "with slashes")]
    #[test_case::test_case("data/buzz.jsonl", Some("data/buzz.jsonl"); "plain path")]
    fn should_read_location(location: &str, expected: Option<&str>) {
        let config = super::Config::from_location(location, true);
        assert_eq!(
            config.path.as_deref(),
            expected.map(std::path::Path::new)
        );
    }

    #[tokio::test]
    async fn should_persist_and_remove_in_memory() {
        let sink = super::Config::default().build().unwrap();
        sink.initialize().await.unwrap();

        let id = sink.persist(&Message::new("hello")).await.unwrap();
        assert!(matches!(id, RecordId::Document(_)));
        assert_eq!(sink.fetch_all().await.unwrap().len(), 1);

        assert!(sink.remove(&id).await.unwrap());
        assert!(sink.fetch_all().await.unwrap().is_empty());
        assert!(!sink.remove(&id).await.unwrap());
    }

    #[tokio::test]
    async fn should_assign_distinct_ids() {
        let sink = super::Config::default().build().unwrap();
        sink.initialize().await.unwrap();
        let first = sink.persist(&Message::new("same")).await.unwrap();
        let second = sink.persist(&Message::new("same")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn should_reload_collection_file() {
        crate::init_tracing();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("collection.jsonl");

        let sink = super::Config {
            path: Some(path.clone()),
            reset: true,
        }
        .build()
        .unwrap();
        sink.initialize().await.unwrap();
        let kept = sink
            .persist(&Message::new("kept").with_keyword("x"))
            .await
            .unwrap();
        let removed = sink.persist(&Message::new("removed")).await.unwrap();
        assert!(sink.remove(&removed).await.unwrap());

        let reopened = super::Config {
            path: Some(path.clone()),
            reset: false,
        }
        .build()
        .unwrap();
        reopened.initialize().await.unwrap();
        let records = reopened.fetch_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, kept);
        assert_eq!(records[0].message.keyword, "x");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"_id\""));
        assert!(content.contains("\"keyword_mentioned\":\"x\""));
    }

    #[tokio::test]
    async fn should_not_lose_documents_after_torn_line() {
        crate::init_tracing();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.jsonl");
        let sink = super::Config {
            path: Some(path.clone()),
            reset: true,
        }
        .build()
        .unwrap();
        sink.initialize().await.unwrap();
        sink.persist(&Message::new("first")).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        std::io::Write::write_all(&mut file, br#"{"_id":"torn","mess"#).unwrap();
        drop(file);

        let second = sink.persist(&Message::new("second")).await.unwrap();

        let reopened = super::Config {
            path: Some(path),
            reset: false,
        }
        .build()
        .unwrap();
        reopened.initialize().await.unwrap();
        let records = reopened.fetch_all().await.unwrap();
        let texts = records
            .iter()
            .map(|r| r.message.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(records[1].id, second);
    }

    #[tokio::test]
    async fn should_clear_collection_on_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection.jsonl");
        let sink = super::Config {
            path: Some(path),
            reset: true,
        }
        .build()
        .unwrap();
        sink.initialize().await.unwrap();
        sink.persist(&Message::new("hello")).await.unwrap();
        sink.initialize().await.unwrap();
        assert!(sink.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_reject_row_identity() {
        let sink = super::Config::default().build().unwrap();
        sink.initialize().await.unwrap();
        assert!(sink.remove(&RecordId::Row(1)).await.is_err());
    }
}
