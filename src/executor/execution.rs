use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use autopilot_types::Payload;

use super::actions::{handler_for, PlanContext};
use super::{DeferReason, ExecutionOutcome, PendingSteps};
use crate::chain::{ChainClient, PositionSnapshot, TxPlan, TxReceipt};
use crate::error::{with_timeout, AutopilotError, ExecutionErrorKind, Result};
use crate::guard::{Authorization, GuardVerdict};
use crate::monitoring::{record_execution_latency, record_guard_rejection};

/// Runs an action against a fresh position snapshot: precheck, gas estimate,
/// guard, then submission.
///
/// Every chain call is bounded by `rpc_timeout`. A failed or timed-out
/// submission is reported as [`AutopilotError::Execution`] so that the caller
/// can count it against the attempt budget. When a step-by-step submission
/// fails after earlier steps confirmed, the outcome is
/// [`ExecutionOutcome::Interrupted`] and the caller must keep the returned
/// [`PendingSteps`] until they are resumed or swept.
pub struct ExecutionService {
    chain: Arc<dyn ChainClient>,
    rpc_timeout: Duration,
}

impl ExecutionService {
    pub fn new(chain: Arc<dyn ChainClient>, rpc_timeout: Duration) -> Self {
        Self { chain, rpc_timeout }
    }

    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    pub async fn execute(&self, payload: &Payload, snapshot: &PositionSnapshot) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let handler = handler_for(&payload.action);
        let kind = handler.kind();

        if !handler.precheck(snapshot)? {
            debug!(action = kind, nft_id = snapshot.nft_id, "Nothing to do this cycle");
            return Ok(ExecutionOutcome::Deferred(DeferReason::NothingToDo(format!(
                "{} has nothing to act on",
                kind
            ))));
        }

        let approved = with_timeout(
            self.rpc_timeout,
            "operator approval check",
            self.chain.is_operator_approved(snapshot.chain_id, snapshot.nft_id),
        )
        .await?;
        if !approved {
            return Err(AutopilotError::unrecoverable(format!(
                "operator rights over position {} were revoked",
                snapshot.nft_id
            )));
        }

        // Estimate against a plan without any gas deduction
        let draft_auth = Authorization {
            gas_proportion: 0.0,
            slippage_ppm: crate::guard::to_ppm(handler.slippage()),
            gas_deduction_ppm: 0,
        };
        let draft = handler.plan(&PlanContext {
            snapshot,
            owner_addr: &payload.owner_addr,
            auth: &draft_auth,
        });
        let estimate = with_timeout(self.rpc_timeout, "gas estimate", self.chain.estimate_gas_cost(&draft)).await?;

        let auth = match handler.authorize(snapshot, estimate.total()) {
            GuardVerdict::Allowed(auth) => auth,
            GuardVerdict::Rejected { gas_proportion, ceiling } => {
                record_guard_rejection(kind);
                warn!(
                    action = kind,
                    nft_id = snapshot.nft_id,
                    gas_proportion,
                    ceiling,
                    "Gas cost exceeds allowed proportion, deferring"
                );
                return Ok(ExecutionOutcome::Deferred(DeferReason::GuardRejected { gas_proportion, ceiling }));
            }
            GuardVerdict::FeesShort { fee_value, gas_cost } => {
                record_guard_rejection(kind);
                warn!(action = kind, nft_id = snapshot.nft_id, fee_value, gas_cost, "Fees do not cover gas, deferring");
                return Ok(ExecutionOutcome::Deferred(DeferReason::FeesBelowGas { fee_value, gas_cost }));
            }
        };

        let plan = handler.plan(&PlanContext {
            snapshot,
            owner_addr: &payload.owner_addr,
            auth: &auth,
        });
        info!(
            action = kind,
            chain_id = plan.chain_id,
            nft_id = plan.nft_id,
            steps = ?plan.step_names(),
            gas_proportion = auth.gas_proportion,
            "Submitting action"
        );

        if self.chain.supports_multicall(plan.chain_id) {
            let receipt = self.submit_one(&plan, "multicall").await?;
            record_execution_latency(kind, started.elapsed());
            return Ok(ExecutionOutcome::Executed { receipts: vec![receipt] });
        }

        let mut receipts = Vec::with_capacity(plan.steps.len());
        match self.submit_steps(&plan, 0, &mut receipts).await {
            Ok(()) => {
                record_execution_latency(kind, started.elapsed());
                Ok(ExecutionOutcome::Executed { receipts })
            }
            // Nothing confirmed, nothing held
            Err((0, e)) => Err(e),
            Err((next_step, e)) => Ok(ExecutionOutcome::Interrupted {
                pending: PendingSteps {
                    plan,
                    next_step,
                    token0: snapshot.token0.address.clone(),
                    token1: snapshot.token1.address.clone(),
                },
                error: e.to_string(),
            }),
        }
    }

    /// Continues an interrupted plan from its first unconfirmed step. The
    /// position is not re-read and the guard is not re-run: the plan was
    /// already authorized and part of it is on-chain.
    pub async fn resume(&self, pending: &PendingSteps) -> Result<ExecutionOutcome> {
        info!(
            chain_id = pending.plan.chain_id,
            nft_id = pending.plan.nft_id,
            next_step = pending.next_step,
            remaining = pending.remaining(),
            "Resuming interrupted plan"
        );
        let mut receipts = Vec::with_capacity(pending.remaining());
        match self.submit_steps(&pending.plan, pending.next_step, &mut receipts).await {
            Ok(()) => Ok(ExecutionOutcome::Executed { receipts }),
            Err((next_step, e)) => Ok(ExecutionOutcome::Interrupted {
                pending: pending.advanced_to(next_step),
                error: e.to_string(),
            }),
        }
    }

    /// Transfers whatever an interrupted plan left with the engine back to `owner_addr`.
    pub async fn sweep(&self, pending: &PendingSteps, owner_addr: &str) -> Result<Vec<TxReceipt>> {
        let Some(plan) = pending.sweep_plan(owner_addr) else {
            return Ok(Vec::new());
        };
        let held = pending.held();
        warn!(
            chain_id = plan.chain_id,
            nft_id = plan.nft_id,
            token0 = %held.token0,
            token1 = %held.token1,
            owner = owner_addr,
            "Returning held tokens to owner"
        );
        if self.chain.supports_multicall(plan.chain_id) {
            return Ok(vec![self.submit_one(&plan, "sweep").await?]);
        }
        let mut receipts = Vec::with_capacity(plan.steps.len());
        self.submit_steps(&plan, 0, &mut receipts).await.map_err(|(_, e)| e)?;
        Ok(receipts)
    }

    /// Submits `plan.steps[from..]`, each confirming before the next is sent.
    /// On failure returns the index of the first unconfirmed step.
    async fn submit_steps(
        &self,
        plan: &TxPlan,
        from: usize,
        receipts: &mut Vec<TxReceipt>,
    ) -> std::result::Result<(), (usize, AutopilotError)> {
        for index in from..plan.steps.len() {
            let Some(step_plan) = plan.single_step(index) else {
                break;
            };
            let step = step_plan.step_names()[0];
            match self.submit_one(&step_plan, step).await {
                Ok(receipt) => {
                    debug!(step, index, block = receipt.block_number, "Step confirmed");
                    receipts.push(receipt);
                }
                Err(e) => {
                    warn!(step, index, "Step-by-step submission stopped: {}", e);
                    return Err((index, e));
                }
            }
        }
        Ok(())
    }

    async fn submit_one(&self, plan: &TxPlan, label: &str) -> Result<TxReceipt> {
        let result = with_timeout(self.rpc_timeout, label, self.chain.submit_transaction(plan)).await;
        result.map_err(|e| match e {
            AutopilotError::Timeout(message) => AutopilotError::execution(ExecutionErrorKind::Timeout, message),
            AutopilotError::TransientRead { message, .. } | AutopilotError::NetworkError(message) => {
                AutopilotError::execution(ExecutionErrorKind::RpcError, message)
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::simulated::sample_position;
    use crate::chain::{GasEstimate, SimulatedChainClient};
    use autopilot_types::{
        Action, CloseAction, Condition, ReinvestAction, TimeCondition,
    };

    fn payload(action: Action) -> Payload {
        Payload {
            owner_addr: "0xowner".to_string(),
            chain_id: 1,
            nft_id: 42,
            condition: Condition::Time(TimeCondition { time_after_epoch_sec: 0 }),
            action,
        }
    }

    fn close() -> Action {
        Action::Close(CloseAction { slippage: 0.01, max_gas_proportion: 0.10 })
    }

    fn setup(chain: SimulatedChainClient) -> (Arc<SimulatedChainClient>, ExecutionService) {
        chain.upsert_position(sample_position(1, 42, "0xowner"));
        chain.approve_operator(1, 42);
        let chain = Arc::new(chain);
        let service = ExecutionService::new(chain.clone(), Duration::from_secs(5));
        (chain, service)
    }

    #[tokio::test]
    async fn test_multicall_submits_single_transaction() {
        let (chain, service) = setup(SimulatedChainClient::new());
        let snapshot = chain.position(1, 42).unwrap();

        let outcome = service.execute(&payload(close()), &snapshot).await.unwrap();
        match outcome {
            ExecutionOutcome::Executed { receipts } => assert_eq!(receipts.len(), 1),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_step_by_step_without_multicall() {
        let (chain, service) = setup(SimulatedChainClient::new().without_multicall());
        let snapshot = chain.position(1, 42).unwrap();

        let outcome = service.execute(&payload(close()), &snapshot).await.unwrap();
        let ExecutionOutcome::Executed { receipts } = outcome else {
            panic!("expected execution");
        };
        let submitted = chain.submitted();
        assert_eq!(receipts.len(), submitted.len());
        assert!(submitted.iter().all(|plan| plan.steps.len() == 1));
        assert_eq!(submitted[0].step_names(), vec!["collect_fees"]);
    }

    #[tokio::test]
    async fn test_guard_rejection_defers_without_submitting() {
        let (chain, service) = setup(SimulatedChainClient::new());
        // 15% of a ~4005 USDC position
        chain.set_gas_estimate(GasEstimate { execution_fee: 600_750_000.0, l1_data_fee: 0.0 });
        let snapshot = chain.position(1, 42).unwrap();

        let outcome = service.execute(&payload(close()), &snapshot).await.unwrap();
        assert!(matches!(
            outcome,
            ExecutionOutcome::Deferred(DeferReason::GuardRejected { .. })
        ));
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_approval_is_unrecoverable() {
        let (chain, service) = setup(SimulatedChainClient::new());
        chain.revoke_operator(1, 42);
        let snapshot = chain.position(1, 42).unwrap();

        let result = service.execute(&payload(close()), &snapshot).await;
        assert!(matches!(result, Err(AutopilotError::Unrecoverable(_))));
    }

    #[tokio::test]
    async fn test_revert_is_execution_error() {
        let (chain, service) = setup(SimulatedChainClient::new());
        chain.revert_next_submissions(1);
        let snapshot = chain.position(1, 42).unwrap();

        let result = service.execute(&payload(close()), &snapshot).await;
        assert!(matches!(result, Err(AutopilotError::Execution { kind: ExecutionErrorKind::Reverted, .. })));
    }

    #[tokio::test]
    async fn test_reinvest_without_fees_is_deferred() {
        let (chain, service) = setup(SimulatedChainClient::new());
        let mut snapshot = chain.position(1, 42).unwrap();
        snapshot.accrued_fees = Default::default();

        let action = Action::Reinvest(ReinvestAction { slippage: 0.01, max_gas_proportion: 0.1 });
        let outcome = service.execute(&payload(action), &snapshot).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Deferred(DeferReason::NothingToDo(_))));
    }

    #[tokio::test]
    async fn test_reinvest_fees_below_gas_is_deferred() {
        let (chain, service) = setup(SimulatedChainClient::new());
        chain.set_gas_estimate(GasEstimate { execution_fee: 100_000_000.0, l1_data_fee: 0.0 });
        let snapshot = chain.position(1, 42).unwrap();

        let action = Action::Reinvest(ReinvestAction { slippage: 0.01, max_gas_proportion: 0.1 });
        let outcome = service.execute(&payload(action), &snapshot).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Deferred(DeferReason::FeesBelowGas { .. })));
        assert!(chain.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_failed_middle_step_is_interrupted() {
        let (chain, service) = setup(SimulatedChainClient::new().without_multicall());
        let snapshot = chain.position(1, 42).unwrap();
        chain.revert_submission_at(3);

        let outcome = service.execute(&payload(close()), &snapshot).await.unwrap();
        let ExecutionOutcome::Interrupted { pending, .. } = outcome else {
            panic!("expected interruption, got {:?}", outcome);
        };
        assert_eq!(pending.next_step, 3);
        assert_eq!(pending.held(), snapshot.total_amounts());

        let resumed = service.resume(&pending).await.unwrap();
        let ExecutionOutcome::Executed { receipts } = resumed else {
            panic!("expected completion");
        };
        assert_eq!(receipts.len(), 2);
        let names: Vec<&str> = chain.submitted().iter().flat_map(|plan| plan.step_names()).collect();
        assert_eq!(names, vec!["collect_fees", "decrease_liquidity", "collect", "transfer", "transfer"]);
    }

    #[tokio::test]
    async fn test_first_step_failure_holds_nothing() {
        let (chain, service) = setup(SimulatedChainClient::new().without_multicall());
        let snapshot = chain.position(1, 42).unwrap();
        chain.revert_next_submissions(1);

        let result = service.execute(&payload(close()), &snapshot).await;
        assert!(matches!(result, Err(AutopilotError::Execution { kind: ExecutionErrorKind::Reverted, .. })));
    }

    #[tokio::test]
    async fn test_sweep_returns_held_tokens_to_owner() {
        let (chain, service) = setup(SimulatedChainClient::new().without_multicall());
        let snapshot = chain.position(1, 42).unwrap();
        chain.revert_submission_at(3);
        let ExecutionOutcome::Interrupted { pending, .. } = service.execute(&payload(close()), &snapshot).await.unwrap()
        else {
            panic!("expected interruption");
        };

        let receipts = service.sweep(&pending, "0xowner").await.unwrap();
        assert_eq!(receipts.len(), 2);
        let transferred = chain.transfers_to("0xowner");
        assert_eq!(transferred, vec![("0xweth".to_string(), 1_000_000_000_000_000_000), ("0xusdc".to_string(), 2_005_000_000)]);
    }
}
