pub mod http;
pub mod memory;

use std::collections::HashSet;
use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::feed::event::RawEvent;

/// Destination collection an entry is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Therapy events (boluses, basal changes, site changes, notes).
    Treatments,
    /// Glucose readings.
    Entries,
}

impl Collection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Treatments => "treatments",
            Self::Entries => "entries",
        }
    }

    /// REST path of the collection, relative to the service root.
    pub const fn api_path(self) -> &'static str {
        match self {
            Self::Treatments => "/api/v1/treatments",
            Self::Entries => "/api/v1/entries",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate destination document produced by a processor.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub collection: Collection,
    /// Treatment `eventType`, or the entry `type` for glucose entries.
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    /// Stable dedup key; identical across runs for the same pump event.
    pub identifier: String,
    pub fields: Map<String, Value>,
}

impl Entry {
    pub fn new(
        collection: Collection,
        event_type: impl Into<String>,
        created_at: DateTime<Utc>,
        identifier: String,
    ) -> Self {
        Self {
            collection,
            event_type: event_type.into(),
            created_at,
            identifier,
            fields: Map::new(),
        }
    }

    /// Attach an extra document field.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Render the document as sent to the destination service.
    pub fn document(&self, entered_by: &str) -> Value {
        let mut doc = Map::with_capacity(self.fields.len() + 5);
        let created_at = self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        match self.collection {
            Collection::Treatments => {
                doc.insert("eventType".into(), Value::from(self.event_type.as_str()));
                doc.insert("created_at".into(), Value::from(created_at));
                doc.insert("enteredBy".into(), Value::from(entered_by));
            }
            Collection::Entries => {
                doc.insert("type".into(), Value::from(self.event_type.as_str()));
                doc.insert("date".into(), Value::from(self.created_at.timestamp_millis()));
                doc.insert("dateString".into(), Value::from(created_at));
                doc.insert("device".into(), Value::from(entered_by));
            }
        }
        doc.insert("identifier".into(), Value::from(self.identifier.as_str()));
        for (k, v) in &self.fields {
            doc.insert(k.clone(), v.clone());
        }
        Value::Object(doc)
    }
}

/// Stable identifier for the entry derived from one pump event.
///
/// `suffix` distinguishes multiple entries produced from the same event.
pub fn entry_identifier(device_id: &str, raw: &RawEvent, suffix: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"pumpsync-entry-v1:");
    hasher.update(device_id.as_bytes());
    hasher.update(b":");
    hasher.update(raw.id.to_be_bytes());
    hasher.update(raw.seq_num.to_be_bytes());
    hasher.update(raw.timestamp.to_be_bytes());
    hasher.update(suffix.as_bytes());
    hex_digest(&hasher.finalize())
}

/// Content hash of a JSON document, used to detect profile changes.
pub fn document_hash(doc: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"pumpsync-doc-v1:");
    hasher.update(doc.to_string().as_bytes());
    hex_digest(&hasher.finalize())
}

fn hex_digest(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Diabetes data tracking service that entries are synced into.
pub trait DestinationClient: Send + Sync {
    /// Identifiers already stored in `collection` for entries created in
    /// `[start, end]`.
    fn existing_identifiers(
        &self,
        collection: Collection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<HashSet<String>>> + Send;

    /// Store entries, returning how many were accepted.
    fn upload(
        &self,
        collection: Collection,
        entries: &[Entry],
    ) -> impl std::future::Future<Output = Result<usize>> + Send;

    /// The most recent profile document, if any.
    fn current_profile(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<Value>>> + Send;

    /// Store a new profile document.
    fn put_profile(&self, profile: &Value) -> impl std::future::Future<Output = Result<()>> + Send;
}
