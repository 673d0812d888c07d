//! Trigger lifecycle: registration, listing, deletion, and one evaluation cycle
//! per claimed task.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use autopilot_types::{ListedTrigger, Payload, PermitInfo, TaskEvent, TaskId, TaskStatus};

use crate::auth::{create_message, delete_message, SignatureVerifier};
use crate::chain::ChainClient;
use crate::config::Settings;
use crate::error::{log_error, with_timeout, AuthErrorKind, AutopilotError, Result};
use crate::evaluator::{ConditionEvaluator, Evaluation};
use crate::executor::{DeferReason, ExecutionOutcome, ExecutionService};
use crate::market_data::PriceHistoryProvider;
use crate::monitoring::{record_evaluation, record_transition};
use crate::task::{TaskKey, TaskStore, TriggerTask};

pub mod clock;
pub mod dispatcher;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatcher::{Dispatcher, DispatcherCommand};

/// Result of one claim-evaluate-execute cycle on a task.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The task was not in CREATED, e.g. another worker holds it.
    NotClaimed,
    NotMet,
    /// A read failed; the task is back in the pool without spending an attempt.
    Undetermined(String),
    Deferred(DeferReason),
    /// Execution failed and the attempt budget is not exhausted yet.
    Retrying { attempts: u32, error: String },
    Completed,
    Invalid(String),
    /// Deleted by its owner while in flight.
    Deleted,
}

/// Everything the engine reaches outside itself.
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub chain: Arc<dyn ChainClient>,
    pub prices: Arc<dyn PriceHistoryProvider>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub clock: Arc<dyn Clock>,
}

pub struct AutopilotEngine {
    store: Arc<dyn TaskStore>,
    chain: Arc<dyn ChainClient>,
    prices: Arc<dyn PriceHistoryProvider>,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Arc<dyn Clock>,
    evaluator: ConditionEvaluator,
    executor: ExecutionService,
    rpc_timeout: Duration,
    max_execution_attempts: u32,
}

impl AutopilotEngine {
    pub fn new(settings: &Settings, collaborators: Collaborators) -> Self {
        let Collaborators { store, chain, prices, verifier, clock } = collaborators;
        Self {
            executor: ExecutionService::new(chain.clone(), settings.rpc_timeout()),
            evaluator: ConditionEvaluator::new(settings.max_price_sample_gap_secs),
            store,
            chain,
            prices,
            verifier,
            clock,
            rpc_timeout: settings.rpc_timeout(),
            max_execution_attempts: settings.max_execution_attempts,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Registers a trigger after verifying the payload signature and, when the
    /// engine holds no authority over the position yet, the permit.
    pub async fn create_trigger(
        &self,
        payload: Payload,
        signature: &str,
        permit: Option<PermitInfo>,
    ) -> Result<TaskId> {
        validation::validate_payload(&payload)?;

        let message = create_message(&payload)?;
        if !self.verifier.verify(&message, signature, &payload.owner_addr).await? {
            return Err(AutopilotError::authorization(
                AuthErrorKind::InvalidSignature,
                "payload signature does not match ownerAddr",
            ));
        }

        let snapshot = with_timeout(
            self.rpc_timeout,
            "position snapshot",
            self.chain.get_position_snapshot(payload.chain_id, payload.nft_id),
        )
        .await
        .map_err(|e| match e {
            AutopilotError::Unrecoverable(message) => AutopilotError::validation(message),
            other => other,
        })?;
        if !snapshot.owner.eq_ignore_ascii_case(&payload.owner_addr) {
            return Err(AutopilotError::authorization(
                AuthErrorKind::NotPositionOwner,
                format!("position {} is not owned by {}", payload.nft_id, payload.owner_addr),
            ));
        }
        if payload.action.is_limit_order() && !snapshot.is_limit_order {
            return Err(AutopilotError::validation(format!(
                "position {} is not a limit order",
                payload.nft_id
            )));
        }

        let now = self.now();
        self.ensure_authority(&payload, permit.as_ref(), now).await?;

        let task = self.store.insert(payload, now).await?;
        info!(
            task = %task.key,
            nft_id = task.nft_id(),
            condition = task.payload.condition.kind(),
            action = task.payload.action.kind(),
            "Trigger created"
        );
        Ok(task.key.task_id)
    }

    async fn ensure_authority(&self, payload: &Payload, permit: Option<&PermitInfo>, now: i64) -> Result<()> {
        let (chain_id, nft_id) = (payload.chain_id, payload.nft_id);
        if self.store.has_authority(chain_id, nft_id, now).await? {
            return Ok(());
        }
        let approved = with_timeout(
            self.rpc_timeout,
            "operator approval check",
            self.chain.is_operator_approved(chain_id, nft_id),
        )
        .await?;
        if approved {
            return Ok(());
        }

        let permit = permit.ok_or_else(|| {
            AutopilotError::authorization(AuthErrorKind::MissingPermit, "no operator rights and no permit supplied")
        })?;
        if permit.deadline < now {
            return Err(AutopilotError::authorization(
                AuthErrorKind::PermitExpired,
                format!("permit deadline {} has passed", permit.deadline),
            ));
        }
        if !self
            .verifier
            .verify_permit(permit, chain_id, nft_id, &payload.owner_addr, now)
            .await?
        {
            return Err(AutopilotError::authorization(AuthErrorKind::PermitRejected, "permit verification failed"));
        }

        let receipt = with_timeout(self.rpc_timeout, "permit submission", self.chain.submit_permit(chain_id, nft_id, permit))
            .await?;
        self.store.grant_authority(chain_id, nft_id, permit.deadline).await?;
        info!(chain_id, nft_id, tx = %receipt.tx_hash, "Operator rights granted by permit");
        Ok(())
    }

    pub async fn list_triggers(&self, owner_addr: &str, chain_id: u64, is_limit_order: bool) -> Result<Vec<ListedTrigger>> {
        let tasks = self.store.list(owner_addr, chain_id).await?;
        Ok(tasks
            .iter()
            .filter(|task| task.is_limit_order() == is_limit_order)
            .map(TriggerTask::to_listed)
            .collect())
    }

    pub async fn get_trigger(&self, owner_addr: &str, chain_id: u64, task_id: TaskId) -> Result<TriggerTask> {
        let key = TaskKey::new(owner_addr, chain_id, task_id);
        self.store.get(&key).await?.ok_or(AutopilotError::TaskNotFound {
            owner_addr: key.owner_addr,
            chain_id,
            task_id,
        })
    }

    /// Removes a trigger in any state. A task already in flight finishes its
    /// current cycle but is never claimed again.
    pub async fn delete_trigger(&self, owner_addr: &str, chain_id: u64, task_id: TaskId, signature: &str) -> Result<()> {
        let message = delete_message(owner_addr, chain_id, task_id)?;
        if !self.verifier.verify(&message, signature, owner_addr).await? {
            return Err(AutopilotError::authorization(
                AuthErrorKind::InvalidSignature,
                "delete signature does not match ownerAddr",
            ));
        }

        let removed = self.store.delete(&TaskKey::new(owner_addr, chain_id, task_id)).await?;
        info!(task = %removed.key, status = %removed.status, "Trigger deleted");
        if let Some(pending) = &removed.pending_steps {
            if let Err(e) = self.executor.sweep(pending, &removed.payload.owner_addr).await {
                log_error(&e, "Could not return held tokens of deleted trigger");
            }
        }
        Ok(())
    }

    /// Claims the task and runs one evaluate-guard-execute cycle on it.
    ///
    /// The CREATED -> STARTED claim happens before any chain call, and the
    /// final transition is recorded only after the chain call returned. A task
    /// holding an interrupted plan resumes it instead of re-evaluating.
    pub async fn process_task(&self, key: &TaskKey) -> Result<CycleOutcome> {
        let attempt_id = Uuid::new_v4();
        let claimed = match self
            .store
            .compare_and_set(key, TaskStatus::Created, TaskStatus::Started, self.now())
            .await
        {
            Ok(task) => task,
            Err(AutopilotError::StaleTransition { .. }) | Err(AutopilotError::TaskNotFound { .. }) => {
                debug!(task = %key, "Task not claimable");
                return Ok(CycleOutcome::NotClaimed);
            }
            Err(e) => return Err(e),
        };
        self.emit(attempt_id, key, TaskStatus::Created, TaskStatus::Started, "claimed");

        if let Some(pending) = &claimed.pending_steps {
            let result = self.executor.resume(pending).await;
            return self.conclude(attempt_id, &claimed, result).await;
        }

        let payload = &claimed.payload;
        let snapshot = match with_timeout(
            self.rpc_timeout,
            "position snapshot",
            self.chain.get_position_snapshot(payload.chain_id, payload.nft_id),
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(AutopilotError::Unrecoverable(reason)) => return self.invalidate(attempt_id, key, reason).await,
            Err(e) => {
                log_error(&e, "Position read failed");
                return self.release(attempt_id, key, CycleOutcome::Undetermined(e.to_string())).await;
            }
        };

        let condition = &payload.condition;
        let evaluation = self
            .evaluator
            .evaluate(condition, &snapshot, self.prices.as_ref(), self.now())
            .await;
        record_evaluation(condition.kind(), evaluation.label());
        match evaluation {
            Evaluation::Met => {}
            Evaluation::NotMet => return self.release(attempt_id, key, CycleOutcome::NotMet).await,
            Evaluation::Undetermined(reason) => {
                return self.release(attempt_id, key, CycleOutcome::Undetermined(reason)).await
            }
        }

        let result = self.executor.execute(payload, &snapshot).await;
        self.conclude(attempt_id, &claimed, result).await
    }

    /// Maps an execution result to the task's next status.
    async fn conclude(
        &self,
        attempt_id: Uuid,
        task: &TriggerTask,
        result: Result<ExecutionOutcome>,
    ) -> Result<CycleOutcome> {
        let key = &task.key;
        match result {
            Ok(ExecutionOutcome::Executed { receipts }) => {
                if task.pending_steps.is_some() {
                    match self.store.record_progress(key, None).await {
                        Ok(()) => {}
                        Err(AutopilotError::TaskNotFound { .. }) => return Ok(CycleOutcome::Deleted),
                        Err(e) => return Err(e),
                    }
                }
                let details = receipts
                    .last()
                    .map(|r| format!("confirmed in {}", r.tx_hash))
                    .unwrap_or_else(|| "confirmed".to_string());
                self.finish(attempt_id, key, TaskStatus::Completed, &details, CycleOutcome::Completed)
                    .await
            }
            Ok(ExecutionOutcome::Deferred(reason)) => self.release(attempt_id, key, CycleOutcome::Deferred(reason)).await,
            Ok(ExecutionOutcome::Interrupted { pending, error }) => {
                warn!(
                    task = %key,
                    next_step = pending.next_step,
                    remaining = pending.remaining(),
                    "Execution interrupted with tokens held: {}",
                    error
                );
                match self.store.record_progress(key, Some(pending.clone())).await {
                    Ok(()) => self.fail_attempt(attempt_id, key, error).await,
                    Err(AutopilotError::TaskNotFound { .. }) => {
                        if let Err(e) = self.executor.sweep(&pending, &task.payload.owner_addr).await {
                            log_error(&e, "Could not return held tokens of deleted trigger");
                        }
                        Ok(CycleOutcome::Deleted)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(AutopilotError::Unrecoverable(reason)) => self.invalidate(attempt_id, key, reason).await,
            Err(
                e @ (AutopilotError::TransientRead { .. }
                | AutopilotError::Timeout(_)
                | AutopilotError::NetworkError(_)
                | AutopilotError::HttpError { .. }),
            ) => {
                log_error(&e, "Read failed before submission");
                self.release(attempt_id, key, CycleOutcome::Undetermined(e.to_string())).await
            }
            Err(e) => self.fail_attempt(attempt_id, key, e.to_string()).await,
        }
    }

    async fn fail_attempt(&self, attempt_id: Uuid, key: &TaskKey, message: String) -> Result<CycleOutcome> {
        let attempts = match self.store.record_failure(key, &message).await {
            Ok(attempts) => attempts,
            Err(AutopilotError::TaskNotFound { .. }) => return Ok(CycleOutcome::Deleted),
            Err(e) => return Err(e),
        };
        warn!(task = %key, attempts, max = self.max_execution_attempts, "Execution attempt failed: {}", message);

        if attempts >= self.max_execution_attempts {
            let mut reason = format!("gave up after {} attempts: {}", attempts, message);
            if let Some(note) = self.return_held_tokens(key).await? {
                reason = format!("{}; {}", reason, note);
            }
            return self
                .finish(attempt_id, key, TaskStatus::Invalid, &reason, CycleOutcome::Invalid(reason.clone()))
                .await;
        }
        self.release(attempt_id, key, CycleOutcome::Retrying { attempts, error: message }).await
    }

    async fn invalidate(&self, attempt_id: Uuid, key: &TaskKey, mut reason: String) -> Result<CycleOutcome> {
        if let Err(e) = self.store.record_failure(key, &reason).await {
            if matches!(e, AutopilotError::TaskNotFound { .. }) {
                return Ok(CycleOutcome::Deleted);
            }
            return Err(e);
        }
        if let Some(note) = self.return_held_tokens(key).await? {
            reason = format!("{}; {}", reason, note);
        }
        self.finish(attempt_id, key, TaskStatus::Invalid, &reason, CycleOutcome::Invalid(reason.clone()))
            .await
    }

    /// Sweeps tokens an interrupted plan left with the engine back to the
    /// owner before the task is given up on. A failed sweep keeps the progress
    /// record so the held amounts stay visible on the task.
    async fn return_held_tokens(&self, key: &TaskKey) -> Result<Option<String>> {
        let Some(task) = self.store.get(key).await? else {
            return Ok(None);
        };
        let Some(pending) = task.pending_steps else {
            return Ok(None);
        };
        let held = pending.held();
        match self.executor.sweep(&pending, &task.payload.owner_addr).await {
            Ok(_) => {
                match self.store.record_progress(key, None).await {
                    Ok(()) | Err(AutopilotError::TaskNotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
                Ok(Some(format!(
                    "returned held tokens to owner ({} token0, {} token1)",
                    held.token0, held.token1
                )))
            }
            Err(e) => {
                log_error(&e, "Sweep of held tokens failed");
                Ok(Some(format!("held tokens not returned: {}", e)))
            }
        }
    }

    /// STARTED -> CREATED: the task goes back to the pool.
    async fn release(&self, attempt_id: Uuid, key: &TaskKey, outcome: CycleOutcome) -> Result<CycleOutcome> {
        let details = match &outcome {
            CycleOutcome::NotMet => "condition not met".to_string(),
            CycleOutcome::Undetermined(reason) => format!("undetermined: {}", reason),
            CycleOutcome::Deferred(reason) => format!("deferred: {:?}", reason),
            CycleOutcome::Retrying { attempts, error } => format!("attempt {} failed: {}", attempts, error),
            other => format!("{:?}", other),
        };
        self.finish(attempt_id, key, TaskStatus::Created, &details, outcome).await
    }

    async fn finish(
        &self,
        attempt_id: Uuid,
        key: &TaskKey,
        to: TaskStatus,
        details: &str,
        outcome: CycleOutcome,
    ) -> Result<CycleOutcome> {
        match self.store.compare_and_set(key, TaskStatus::Started, to, self.now()).await {
            Ok(_) => {
                self.emit(attempt_id, key, TaskStatus::Started, to, details);
                Ok(outcome)
            }
            Err(AutopilotError::TaskNotFound { .. }) => {
                info!(task = %key, "Task deleted while in flight, dropping outcome {:?}", outcome);
                Ok(CycleOutcome::Deleted)
            }
            Err(e) => Err(e),
        }
    }

    fn emit(&self, attempt_id: Uuid, key: &TaskKey, from: TaskStatus, to: TaskStatus, details: &str) {
        let event = TaskEvent::new(
            attempt_id,
            key.owner_addr.clone(),
            key.chain_id,
            key.task_id,
            from,
            to,
            details,
            self.now(),
        );
        record_transition(&event);
    }
}
