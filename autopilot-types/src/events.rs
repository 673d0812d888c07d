use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trigger::{TaskId, TaskStatus};

/// Record of a single status transition of a trigger task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub attempt_id: Uuid,
    pub owner_addr: String,
    pub chain_id: u64,
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub details: String, // e.g. revert reason or "condition not met"
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    /// `at_sec` comes from the engine clock so events line up with task timestamps.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        attempt_id: Uuid,
        owner_addr: impl Into<String>,
        chain_id: u64,
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        details: impl Into<String>,
        at_sec: i64,
    ) -> Self {
        Self {
            attempt_id,
            owner_addr: owner_addr.into(),
            chain_id,
            task_id,
            from,
            to,
            details: details.into(),
            timestamp: Utc.timestamp_opt(at_sec, 0).single().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_uses_supplied_time() {
        let event = TaskEvent::new(
            Uuid::new_v4(),
            "0xowner",
            1,
            3,
            TaskStatus::Created,
            TaskStatus::Started,
            "claimed",
            1_700_000_000,
        );
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
    }
}
