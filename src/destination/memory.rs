use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use super::{Collection, DestinationClient, Entry};

#[derive(Debug, Default)]
struct Store {
    entries: Vec<Entry>,
    /// One record per upload call, in call order.
    uploads: Vec<(Collection, usize)>,
    profiles: Vec<Value>,
}

/// Destination that keeps everything in memory.
///
/// Uploads are deduplicated on [`Entry::identifier`], mirroring a service
/// with a unique index on that field.
#[derive(Debug, Default)]
pub struct InMemoryDestination {
    store: Mutex<Store>,
}

impl InMemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored entries in insertion order.
    pub fn entries(&self) -> Vec<Entry> {
        self.store.lock().entries.clone()
    }

    /// Stored entries with the given event type.
    pub fn entries_of_type(&self, event_type: &str) -> Vec<Entry> {
        self.store
            .lock()
            .entries
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Upload calls as `(collection, batch size)`, in call order.
    pub fn uploads(&self) -> Vec<(Collection, usize)> {
        self.store.lock().uploads.clone()
    }

    /// Every profile ever stored, oldest first.
    pub fn profiles(&self) -> Vec<Value> {
        self.store.lock().profiles.clone()
    }
}

impl DestinationClient for InMemoryDestination {
    async fn existing_identifiers(
        &self,
        collection: Collection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        Ok(self
            .store
            .lock()
            .entries
            .iter()
            .filter(|e| e.collection == collection && e.created_at >= start && e.created_at <= end)
            .map(|e| e.identifier.clone())
            .collect())
    }

    async fn upload(&self, collection: Collection, entries: &[Entry]) -> Result<usize> {
        let mut store = self.store.lock();
        store.uploads.push((collection, entries.len()));

        let mut written = 0;
        for entry in entries {
            let duplicate = store
                .entries
                .iter()
                .any(|e| e.identifier == entry.identifier);
            if !duplicate {
                store.entries.push(entry.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn current_profile(&self) -> Result<Option<Value>> {
        Ok(self.store.lock().profiles.last().cloned())
    }

    async fn put_profile(&self, profile: &Value) -> Result<()> {
        self.store.lock().profiles.push(profile.clone());
        Ok(())
    }
}
