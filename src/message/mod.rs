pub mod normalize;
pub mod parser;

/// Canonical shape of an ingested message.
///
/// Field names on the wire follow the producer contract, which is why some
/// of them are renamed.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Message {
    #[serde(rename = "message")]
    pub text: String,
    pub author: String,
    pub timestamp: String,
    pub category: String,
    pub sentiment: f64,
    #[serde(rename = "keyword_mentioned")]
    pub keyword: String,
    #[serde(rename = "message_length")]
    pub length: i64,
}

#[cfg(test)]
impl Message {
    pub fn new<T: Into<String>>(text: T) -> Self {
        let text = text.into();
        Self {
            length: text.len() as i64,
            text,
            author: String::new(),
            timestamp: String::new(),
            category: String::new(),
            sentiment: 0.0,
            keyword: String::new(),
        }
    }

    pub fn with_author<A: Into<String>>(mut self, author: A) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_category<C: Into<String>>(mut self, category: C) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_keyword<K: Into<String>>(mut self, keyword: K) -> Self {
        self.keyword = keyword.into();
        self
    }

    pub fn with_timestamp<T: Into<String>>(mut self, timestamp: T) -> Self {
        self.timestamp = timestamp.into();
        self
    }
}

/// Identity assigned by a sink when a message gets persisted.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize, derive_more::From,
)]
#[serde(untagged)]
pub enum RecordId {
    Row(i64),
    Document(String),
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Row(inner) => inner.fmt(f),
            Self::Document(inner) => inner.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PersistedRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub message: Message,
}

/// A group of records persisted during the same drain.
pub type Batch = Vec<PersistedRecord>;
