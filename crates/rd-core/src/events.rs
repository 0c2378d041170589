//! Job lifecycle events.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that late subscribers can catch up.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::{AssetId, JobId};
use crate::model::{FailureKind, JobStatus};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobCreated {
        job_id: JobId,
        asset_id: AssetId,
        tasks: usize,
    },
    TaskStarted {
        job_id: JobId,
        profile: String,
        attempt: u32,
    },
    TaskProgress {
        job_id: JobId,
        profile: String,
        progress: f32,
    },
    TaskSucceeded {
        job_id: JobId,
        profile: String,
        output_path: PathBuf,
    },
    TaskFailed {
        job_id: JobId,
        profile: String,
        kind: FailureKind,
        error: String,
    },
    TaskRetried {
        job_id: JobId,
        profile: String,
        attempt: u32,
    },
    JobFinished {
        job_id: JobId,
        status: JobStatus,
    },
    JobCancelled {
        job_id: JobId,
    },
}

impl EventPayload {
    /// The job this event belongs to.
    pub fn job_id(&self) -> JobId {
        match self {
            EventPayload::JobCreated { job_id, .. }
            | EventPayload::TaskStarted { job_id, .. }
            | EventPayload::TaskProgress { job_id, .. }
            | EventPayload::TaskSucceeded { job_id, .. }
            | EventPayload::TaskFailed { job_id, .. }
            | EventPayload::TaskRetried { job_id, .. }
            | EventPayload::JobFinished { job_id, .. }
            | EventPayload::JobCancelled { job_id } => *job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn broadcast(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let job_id = JobId::new();
        bus.broadcast(EventPayload::JobCancelled { job_id });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.payload.job_id(), job_id);
    }

    #[test]
    fn recent_events_capped() {
        let bus = EventBus::new(256);
        let job_id = JobId::new();

        for _ in 0..150 {
            bus.broadcast(EventPayload::JobCancelled { job_id });
        }

        assert_eq!(bus.recent_events(200).len(), MAX_RECENT_EVENTS);
    }

    #[test]
    fn recent_events_newest_first() {
        let bus = EventBus::default();
        let job_id = JobId::new();
        bus.broadcast(EventPayload::TaskStarted {
            job_id,
            profile: "360p".into(),
            attempt: 1,
        });
        bus.broadcast(EventPayload::JobFinished {
            job_id,
            status: JobStatus::Completed,
        });

        let recent = bus.recent_events(1);
        assert!(matches!(recent[0].payload, EventPayload::JobFinished { .. }));
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.broadcast(EventPayload::TaskFailed {
            job_id: JobId::new(),
            profile: "720p".into(),
            kind: FailureKind::Error,
            error: "encoder crashed".into(),
        });
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let payload = EventPayload::JobFinished {
            job_id: JobId::new(),
            status: JobStatus::CompletedWithErrors,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "job_finished");
        assert_eq!(json["status"], "completed_with_errors");
    }
}
