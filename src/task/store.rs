use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use autopilot_types::{Payload, TaskStatus};

use super::{TaskKey, TriggerTask};
use crate::error::{AutopilotError, Result};
use crate::executor::PendingSteps;

/// Durable home of every trigger. The only shared mutable state in the engine.
///
/// Every status change goes through [`TaskStore::compare_and_set`], which
/// succeeds for exactly one caller when several race on the same task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persists a new task in CREATED and assigns its id.
    async fn insert(&self, payload: Payload, now: i64) -> Result<TriggerTask>;

    async fn get(&self, key: &TaskKey) -> Result<Option<TriggerTask>>;

    /// All tasks of an owner on a chain, ordered by task id.
    async fn list(&self, owner_addr: &str, chain_id: u64) -> Result<Vec<TriggerTask>>;

    /// Tasks in CREATED, i.e. candidates for the next claim cycle.
    async fn pending(&self) -> Result<Vec<TriggerTask>>;

    /// Moves `key` from `expected` to `next`. Fails with `StaleTransition` if the
    /// task is not in `expected` anymore.
    async fn compare_and_set(
        &self,
        key: &TaskKey,
        expected: TaskStatus,
        next: TaskStatus,
        now: i64,
    ) -> Result<TriggerTask>;

    /// Counts a failed execution attempt and returns the new total.
    async fn record_failure(&self, key: &TaskKey, error: &str) -> Result<u32>;

    /// Records how far a step-by-step submission got, or clears it with `None`.
    async fn record_progress(&self, key: &TaskKey, pending: Option<PendingSteps>) -> Result<()>;

    async fn delete(&self, key: &TaskKey) -> Result<TriggerTask>;

    /// Records that the engine holds operator rights over a position until `expires_at`.
    async fn grant_authority(&self, chain_id: u64, nft_id: u64, expires_at: i64) -> Result<()>;

    async fn has_authority(&self, chain_id: u64, nft_id: u64, now: i64) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskKey, TriggerTask>,
    next_ids: DashMap<(String, u64), AtomicU64>,
    authority: DashMap<(u64, u64), i64>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn allocate_id(&self, owner_addr: &str, chain_id: u64) -> u64 {
        let counter = self
            .next_ids
            .entry((owner_addr.to_string(), chain_id))
            .or_insert_with(|| AtomicU64::new(1));
        counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, payload: Payload, now: i64) -> Result<TriggerTask> {
        let owner = payload.owner_addr.to_lowercase();
        let task_id = self.allocate_id(&owner, payload.chain_id);
        let key = TaskKey::new(&owner, payload.chain_id, task_id);
        let task = TriggerTask {
            key: key.clone(),
            payload,
            status: TaskStatus::Created,
            last_updated_sec: now,
            created_at_sec: now,
            execution_attempts: 0,
            last_error: None,
            pending_steps: None,
        };

        match self.tasks.entry(key) {
            Entry::Occupied(entry) => Err(AutopilotError::InternalError(format!(
                "task id {} allocated twice",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(task.clone());
                Ok(task)
            }
        }
    }

    async fn get(&self, key: &TaskKey) -> Result<Option<TriggerTask>> {
        Ok(self.tasks.get(key).map(|task| task.clone()))
    }

    async fn list(&self, owner_addr: &str, chain_id: u64) -> Result<Vec<TriggerTask>> {
        let owner = owner_addr.to_lowercase();
        let mut tasks: Vec<TriggerTask> = self
            .tasks
            .iter()
            .filter(|entry| entry.key().owner_addr == owner && entry.key().chain_id == chain_id)
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by_key(|task| task.key.task_id);
        Ok(tasks)
    }

    async fn pending(&self) -> Result<Vec<TriggerTask>> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.status == TaskStatus::Created)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn compare_and_set(
        &self,
        key: &TaskKey,
        expected: TaskStatus,
        next: TaskStatus,
        now: i64,
    ) -> Result<TriggerTask> {
        if !expected.can_transition_to(next) {
            return Err(AutopilotError::InternalError(format!(
                "illegal transition {} -> {}",
                expected, next
            )));
        }

        // The shard write lock held by get_mut makes check-and-write atomic
        let mut task = self.tasks.get_mut(key).ok_or_else(|| AutopilotError::TaskNotFound {
            owner_addr: key.owner_addr.clone(),
            chain_id: key.chain_id,
            task_id: key.task_id,
        })?;
        if task.status != expected {
            return Err(AutopilotError::StaleTransition {
                expected,
                actual: task.status,
            });
        }
        task.status = next;
        task.last_updated_sec = now;
        debug!(task = %key, from = %expected, to = %next, "Task transition");
        Ok(task.clone())
    }

    async fn record_failure(&self, key: &TaskKey, error: &str) -> Result<u32> {
        let mut task = self.tasks.get_mut(key).ok_or_else(|| AutopilotError::TaskNotFound {
            owner_addr: key.owner_addr.clone(),
            chain_id: key.chain_id,
            task_id: key.task_id,
        })?;
        task.execution_attempts += 1;
        task.last_error = Some(error.to_string());
        Ok(task.execution_attempts)
    }

    async fn record_progress(&self, key: &TaskKey, pending: Option<PendingSteps>) -> Result<()> {
        let mut task = self.tasks.get_mut(key).ok_or_else(|| AutopilotError::TaskNotFound {
            owner_addr: key.owner_addr.clone(),
            chain_id: key.chain_id,
            task_id: key.task_id,
        })?;
        task.pending_steps = pending;
        Ok(())
    }

    async fn delete(&self, key: &TaskKey) -> Result<TriggerTask> {
        self.tasks
            .remove(key)
            .map(|(_, task)| task)
            .ok_or_else(|| AutopilotError::TaskNotFound {
                owner_addr: key.owner_addr.clone(),
                chain_id: key.chain_id,
                task_id: key.task_id,
            })
    }

    async fn grant_authority(&self, chain_id: u64, nft_id: u64, expires_at: i64) -> Result<()> {
        self.authority.insert((chain_id, nft_id), expires_at);
        Ok(())
    }

    async fn has_authority(&self, chain_id: u64, nft_id: u64, now: i64) -> Result<bool> {
        Ok(self
            .authority
            .get(&(chain_id, nft_id))
            .map_or(false, |expires_at| *expires_at >= now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_types::{Action, CloseAction, Condition, TimeCondition};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn payload(owner: &str, chain_id: u64, nft_id: u64) -> Payload {
        Payload {
            owner_addr: owner.to_string(),
            chain_id,
            nft_id,
            condition: Condition::Time(TimeCondition { time_after_epoch_sec: 1_700_000_000 }),
            action: Action::Close(CloseAction { slippage: 0.01, max_gas_proportion: 0.1 }),
        }
    }

    #[tokio::test]
    async fn test_task_ids_are_per_owner_and_chain() {
        let store = InMemoryTaskStore::new();
        let a1 = store.insert(payload("0xA", 1, 10), 100).await.unwrap();
        let a2 = store.insert(payload("0xa", 1, 11), 100).await.unwrap();
        let b1 = store.insert(payload("0xb", 1, 12), 100).await.unwrap();
        let a_other_chain = store.insert(payload("0xa", 10, 13), 100).await.unwrap();

        assert_eq!(a1.key.task_id, 1);
        assert_eq!(a2.key.task_id, 2);
        assert_eq!(b1.key.task_id, 1);
        assert_eq!(a_other_chain.key.task_id, 1);
        assert_eq!(store.list("0xA", 1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_status() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(payload("0xa", 1, 10), 100).await.unwrap();

        let started = store
            .compare_and_set(&task.key, TaskStatus::Created, TaskStatus::Started, 200)
            .await
            .unwrap();
        assert_eq!(started.status, TaskStatus::Started);
        assert_eq!(started.last_updated_sec, 200);

        let second = store
            .compare_and_set(&task.key, TaskStatus::Created, TaskStatus::Started, 201)
            .await;
        assert!(matches!(
            second,
            Err(AutopilotError::StaleTransition { actual: TaskStatus::Started, .. })
        ));
    }

    #[tokio::test]
    async fn test_illegal_transition_is_refused() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(payload("0xa", 1, 10), 100).await.unwrap();
        let result = store
            .compare_and_set(&task.key, TaskStatus::Created, TaskStatus::Completed, 200)
            .await;
        assert!(matches!(result, Err(AutopilotError::InternalError(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claim_is_exclusive_under_contention() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store.insert(payload("0xa", 1, 10), 100).await.unwrap();

        let claims = (0..32).map(|i| {
            let store = store.clone();
            let key = task.key.clone();
            tokio::spawn(async move {
                store
                    .compare_and_set(&key, TaskStatus::Created, TaskStatus::Started, 200 + i)
                    .await
                    .is_ok()
            })
        });
        let results = futures::future::join_all(claims).await;
        let winners = results.into_iter().filter(|r| matches!(r, Ok(true))).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(payload("0xa", 1, 10), 100).await.unwrap();
        assert_eq!(store.record_failure(&task.key, "reverted").await.unwrap(), 1);
        assert_eq!(store.record_failure(&task.key, "timeout").await.unwrap(), 2);

        let stored = store.get(&task.key).await.unwrap().unwrap();
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_progress_is_kept_until_cleared() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(payload("0xa", 1, 10), 100).await.unwrap();
        let pending = PendingSteps {
            plan: crate::chain::TxPlan::new(1, 10),
            next_step: 2,
            token0: "0xweth".to_string(),
            token1: "0xusdc".to_string(),
        };
        store.record_progress(&task.key, Some(pending.clone())).await.unwrap();
        let stored = store.get(&task.key).await.unwrap().unwrap();
        assert_eq!(stored.pending_steps, Some(pending));

        store.record_progress(&task.key, None).await.unwrap();
        assert!(store.get(&task.key).await.unwrap().unwrap().pending_steps.is_none());
    }

    #[tokio::test]
    async fn test_authority_expires() {
        let store = InMemoryTaskStore::new();
        store.grant_authority(1, 10, 1_000).await.unwrap();
        assert!(store.has_authority(1, 10, 999).await.unwrap());
        assert!(store.has_authority(1, 10, 1_000).await.unwrap());
        assert!(!store.has_authority(1, 10, 1_001).await.unwrap());
        assert!(!store.has_authority(1, 11, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_task() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(payload("0xa", 1, 10), 100).await.unwrap();
        store.delete(&task.key).await.unwrap();
        assert!(store.get(&task.key).await.unwrap().is_none());
        assert!(matches!(store.delete(&task.key).await, Err(AutopilotError::TaskNotFound { .. })));
    }
}
