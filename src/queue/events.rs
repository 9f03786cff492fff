//! Job lifecycle notifications.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::jobs::JobState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted {
        job_id: String,
    },
    StateChanged {
        job_id: String,
        state: JobState,
    },
    Retrying {
        job_id: String,
        attempt: u32,
        #[serde(with = "millis")]
        delay: Duration,
    },
    Completed {
        job_id: String,
    },
    Failed {
        job_id: String,
        error: String,
    },
    DeadLettered {
        job_id: String,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Submitted { job_id }
            | JobEvent::StateChanged { job_id, .. }
            | JobEvent::Retrying { job_id, .. }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::DeadLettered { job_id, .. } => job_id,
        }
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

/// Fan-out channel for [`JobEvent`]s. Publishing never blocks and never fails;
/// slow subscribers lose old events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
