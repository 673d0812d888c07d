//! Persisted trigger records and the store that owns their lifecycle.

use serde::{Deserialize, Serialize};

use autopilot_types::{ListedTrigger, Payload, TaskId, TaskStatus};

use crate::executor::PendingSteps;

pub mod store;

pub use store::{InMemoryTaskStore, TaskStore};

/// Identity of a task. `task_id` is unique per `(owner_addr, chain_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub owner_addr: String,
    pub chain_id: u64,
    pub task_id: TaskId,
}

impl TaskKey {
    /// Owner addresses compare case-insensitively.
    pub fn new(owner_addr: &str, chain_id: u64, task_id: TaskId) -> Self {
        Self {
            owner_addr: owner_addr.to_lowercase(),
            chain_id,
            task_id,
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.owner_addr, self.chain_id, self.task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTask {
    pub key: TaskKey,
    pub payload: Payload,
    pub status: TaskStatus,
    pub last_updated_sec: i64,
    pub created_at_sec: i64,
    /// Failed execution attempts so far.
    pub execution_attempts: u32,
    pub last_error: Option<String>,
    /// Set while an interrupted step-by-step submission holds owner tokens.
    #[serde(default)]
    pub pending_steps: Option<PendingSteps>,
}

impl TriggerTask {
    pub fn nft_id(&self) -> u64 {
        self.payload.nft_id
    }

    pub fn is_limit_order(&self) -> bool {
        self.payload.action.is_limit_order()
    }

    pub fn to_listed(&self) -> ListedTrigger {
        ListedTrigger {
            owner_addr: self.payload.owner_addr.clone(),
            task_id: self.key.task_id,
            chain_id: self.key.chain_id,
            nft_id: self.payload.nft_id,
            status: self.status,
            last_updated_sec: self.last_updated_sec,
        }
    }
}
