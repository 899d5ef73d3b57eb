use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use forgewms_core::ActorId;

use crate::status::DocumentStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEvent {
    pub status: DocumentStatus,
    pub actor: ActorId,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Append-only status log.
///
/// Timestamps are strictly increasing. An append whose `(status, actor)`
/// equals the last entry is suppressed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusHistory(Vec<StatusHistoryEvent>);

impl StatusHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[StatusHistoryEvent] {
        &self.0
    }

    pub fn last(&self) -> Option<&StatusHistoryEvent> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether appending `(status, actor)` would be suppressed as a repeat.
    pub fn is_repeat(&self, status: DocumentStatus, actor: &ActorId) -> bool {
        self.last()
            .is_some_and(|last| last.status == status && &last.actor == actor)
    }

    /// The timestamp an append at `requested` will carry: `requested`, or one
    /// microsecond after the last entry when the clock did not move forward.
    pub fn next_timestamp(&self, requested: DateTime<Utc>) -> DateTime<Utc> {
        match self.last() {
            Some(last) if requested <= last.at => last.at + Duration::microseconds(1),
            _ => requested,
        }
    }

    /// Append an entry; returns `false` when it was suppressed as a repeat.
    pub fn append(&mut self, mut event: StatusHistoryEvent) -> bool {
        if self.is_repeat(event.status, &event.actor) {
            return false;
        }
        event.at = self.next_timestamp(event.at);
        self.0.push(event);
        true
    }
}
