use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use forgewms_core::ExpectedVersion;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<BTreeMap<String, Vec<StoredEvent>>>,
    fail_next: Mutex<Option<String>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next append fail as if the backing store were down.
    pub fn fail_next_append(&self, reason: impl Into<String>) {
        match self.fail_next.lock() {
            Ok(mut slot) => *slot = Some(reason.into()),
            Err(_) => tracing::error!("event store failure switch poisoned"),
        }
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        if let Some(reason) = self.fail_next.lock().ok().and_then(|mut s| s.take()) {
            return Err(EventStoreError::Unavailable(reason));
        }

        // All events must target the same stream.
        let stream_id = events[0].stream_id.clone();
        let stream_type = events[0].stream_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.stream_id != stream_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple stream_ids (index {idx})"
                )));
            }
            if e.stream_type != stream_type {
                return Err(EventStoreError::StreamTypeMismatch(format!(
                    "batch contains multiple stream_types (index {idx})"
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(stream_id).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.stream_type != stream_type {
                return Err(EventStoreError::StreamTypeMismatch(format!(
                    "stream type is '{}', attempted append with '{}'",
                    existing.stream_type, stream_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                stream_id: e.stream_id,
                stream_type: e.stream_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(&self, stream_id: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(stream_id).cloned().unwrap_or_default())
    }

    fn stream_ids(&self, stream_type: &str) -> Result<Vec<String>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams
            .iter()
            .filter(|(_, s)| s.first().is_some_and(|e| e.stream_type == stream_type))
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(stream: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            stream_id: stream.into(),
            stream_type: "warehouse.document".into(),
            event_type: "warehouse.document.created".into(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn sequence_numbers_continue_per_stream() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![event("GI-202401-0001"), event("GI-202401-0001")], ExpectedVersion::Exact(0))
            .unwrap();
        let more = store
            .append(vec![event("GI-202401-0001")], ExpectedVersion::Exact(2))
            .unwrap();
        assert_eq!(more[0].sequence_number, 3);
        assert_eq!(store.load_stream("GI-202401-0001").unwrap().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![event("GR-202401-0001")], ExpectedVersion::Exact(0))
            .unwrap();
        let err = store
            .append(vec![event("GR-202401-0001")], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn injected_failure_leaves_stream_untouched() {
        let store = InMemoryEventStore::new();
        store.fail_next_append("disk full");
        assert!(matches!(
            store.append(vec![event("GR-202401-0002")], ExpectedVersion::Any),
            Err(EventStoreError::Unavailable(_))
        ));
        assert!(store.load_stream("GR-202401-0002").unwrap().is_empty());
        assert_eq!(store.stream_ids("warehouse.document").unwrap().len(), 0);
    }
}
