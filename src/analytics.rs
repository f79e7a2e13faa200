//! Read side: frequency aggregates over whatever a sink currently holds.

use indexmap::IndexMap;

use crate::message::{Message, PersistedRecord};
use crate::sinks::{ReadError, Storage};

/// Occurrences per value, most frequent first.
pub type Frequencies = IndexMap<String, usize>;

/// Counts records per value of `key`.
///
/// Ties are ordered by value so the result doesn't depend on storage order.
pub fn frequency_by<F>(records: &[PersistedRecord], key: F) -> Frequencies
where
    F: Fn(&Message) -> &str,
{
    let mut counts = Frequencies::new();
    for record in records {
        *counts.entry(key(&record.message).to_owned()).or_default() += 1;
    }
    counts.sort_by(|left_key, left, right_key, right| {
        right.cmp(left).then_with(|| left_key.cmp(right_key))
    });
    counts
}

/// The `limit` most mentioned keywords.
pub fn top_keywords(records: &[PersistedRecord], limit: usize) -> Frequencies {
    frequency_by(records, |message| message.keyword.as_str())
        .into_iter()
        .take(limit)
        .collect()
}

pub fn messages_by_category<'a>(
    records: &'a [PersistedRecord],
    category: &'a str,
) -> impl Iterator<Item = &'a PersistedRecord> + 'a {
    records
        .iter()
        .filter(move |record| record.message.category == category)
}

/// Records with a timestamp between `start` and `end`, both included.
///
/// Timestamps are compared as text, which orders ISO-8601 values correctly.
pub fn messages_in_time_range<'a>(
    records: &'a [PersistedRecord],
    start: &'a str,
    end: &'a str,
) -> impl Iterator<Item = &'a PersistedRecord> + 'a {
    records.iter().filter(move |record| {
        let timestamp = record.message.timestamp.as_str();
        timestamp >= start && timestamp <= end
    })
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Trends {
    pub keywords: Frequencies,
    pub categories: Frequencies,
    pub authors: Frequencies,
}

impl Trends {
    pub fn from_records(records: &[PersistedRecord]) -> Self {
        Self {
            keywords: frequency_by(records, |message| message.keyword.as_str()),
            categories: frequency_by(records, |message| message.category.as_str()),
            authors: frequency_by(records, |message| message.author.as_str()),
        }
    }

    /// Reads everything the sink holds, without modifying it.
    pub async fn collect<S: Storage>(sink: &S) -> Result<Self, ReadError> {
        let records = sink.fetch_all().await?;
        Ok(Self::from_records(&records))
    }
}
