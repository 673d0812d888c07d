use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info};

use autopilot_types::PermitInfo;

use super::{
    chain_info, ChainClient, GasEstimate, PositionSnapshot, TokenAmounts, TokenInfo, TxPlan,
    TxReceipt, TxStep,
};
use crate::error::{AutopilotError, ExecutionErrorKind, Result};

/// A 1 WETH + 2000 USDC position at a price of 2000 USDC/WETH with 5 USDC of fees.
pub fn sample_position(chain_id: u64, nft_id: u64, owner: &str) -> PositionSnapshot {
    PositionSnapshot {
        chain_id,
        nft_id,
        owner: owner.to_string(),
        token0: TokenInfo { address: "0xweth".to_string(), decimals: 18 },
        token1: TokenInfo { address: "0xusdc".to_string(), decimals: 6 },
        fee_tier: 500,
        liquidity: 1_000_000_000,
        principal: TokenAmounts::new(1_000_000_000_000_000_000, 2_000_000_000),
        accrued_fees: TokenAmounts::new(0, 5_000_000),
        tick_lower: -200_000,
        tick_upper: -190_000,
        is_limit_order: false,
        raw_price: 2000.0 * 1e-12,
    }
}

/// In-memory chain used in simulation mode and tests.
///
/// Successful submissions are applied to the stored positions so that later
/// reads observe them. Failures can be injected per call kind.
pub struct SimulatedChainClient {
    positions: RwLock<HashMap<(u64, u64), PositionSnapshot>>,
    approvals: RwLock<HashSet<(u64, u64)>>,
    gas: RwLock<GasEstimate>,
    submitted: Mutex<Vec<TxPlan>>,
    multicall: bool,
    failing_reads: AtomicU32,
    reverting_submissions: AtomicU32,
    submission_calls: AtomicU64,
    revert_at: Mutex<Option<u64>>,
    next_block: AtomicU64,
    next_nft_id: AtomicU64,
}

impl SimulatedChainClient {
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(HashMap::new()),
            approvals: RwLock::new(HashSet::new()),
            gas: RwLock::new(GasEstimate::default()),
            submitted: Mutex::new(Vec::new()),
            multicall: true,
            failing_reads: AtomicU32::new(0),
            reverting_submissions: AtomicU32::new(0),
            submission_calls: AtomicU64::new(0),
            revert_at: Mutex::new(None),
            next_block: AtomicU64::new(1),
            next_nft_id: AtomicU64::new(1_000_000),
        }
    }

    /// Forces step-by-step submission regardless of the chain registry.
    pub fn without_multicall(mut self) -> Self {
        self.multicall = false;
        self
    }

    pub fn upsert_position(&self, snapshot: PositionSnapshot) {
        let key = (snapshot.chain_id, snapshot.nft_id);
        self.positions.write().insert(key, snapshot);
    }

    pub fn remove_position(&self, chain_id: u64, nft_id: u64) {
        self.positions.write().remove(&(chain_id, nft_id));
    }

    pub fn position(&self, chain_id: u64, nft_id: u64) -> Option<PositionSnapshot> {
        self.positions.read().get(&(chain_id, nft_id)).cloned()
    }

    pub fn approve_operator(&self, chain_id: u64, nft_id: u64) {
        self.approvals.write().insert((chain_id, nft_id));
    }

    pub fn revoke_operator(&self, chain_id: u64, nft_id: u64) {
        self.approvals.write().remove(&(chain_id, nft_id));
    }

    pub fn set_gas_estimate(&self, estimate: GasEstimate) {
        *self.gas.write() = estimate;
    }

    /// The next `count` position reads fail transiently.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// The next `count` submissions revert.
    pub fn revert_next_submissions(&self, count: u32) {
        self.reverting_submissions.store(count, Ordering::SeqCst);
    }

    /// Lets `skip` submissions confirm, then reverts the next one.
    pub fn revert_submission_at(&self, skip: u64) {
        let target = self.submission_calls.load(Ordering::SeqCst) + skip;
        *self.revert_at.lock() = Some(target);
    }

    pub fn submitted(&self) -> Vec<TxPlan> {
        self.submitted.lock().clone()
    }

    /// Confirmed transfers to `recipient`, as `(token, amount)` in submission order.
    pub fn transfers_to(&self, recipient: &str) -> Vec<(String, u128)> {
        self.submitted
            .lock()
            .iter()
            .flat_map(|plan| plan.steps.iter())
            .filter_map(|step| match step {
                TxStep::Transfer { token, amount, recipient: to } if to == recipient => Some((token.clone(), *amount)),
                _ => None,
            })
            .collect()
    }

    fn scheduled_revert(&self) -> bool {
        let call = self.submission_calls.fetch_add(1, Ordering::SeqCst);
        let mut revert_at = self.revert_at.lock();
        if *revert_at == Some(call) {
            *revert_at = None;
            return true;
        }
        false
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn apply(&self, plan: &TxPlan) -> Option<u64> {
        let mut positions = self.positions.write();
        let mut minted = None;
        for step in &plan.steps {
            match step {
                TxStep::CollectFees { nft_id } => {
                    if let Some(p) = positions.get_mut(&(plan.chain_id, *nft_id)) {
                        p.accrued_fees = TokenAmounts::default();
                    }
                }
                TxStep::DecreaseLiquidity { nft_id, liquidity, .. } => {
                    if let Some(p) = positions.get_mut(&(plan.chain_id, *nft_id)) {
                        p.liquidity = p.liquidity.saturating_sub(*liquidity);
                        if p.liquidity == 0 {
                            p.principal = TokenAmounts::default();
                        }
                    }
                }
                TxStep::IncreaseLiquidity { nft_id, amount0_desired, amount1_desired, .. } => {
                    if let Some(p) = positions.get_mut(&(plan.chain_id, *nft_id)) {
                        p.principal = p
                            .principal
                            .saturating_add(&TokenAmounts::new(*amount0_desired, *amount1_desired));
                    }
                }
                TxStep::Mint {
                    token0, token1, fee_tier, tick_lower, tick_upper,
                    amount0_desired, amount1_desired, recipient, ..
                } => {
                    let nft_id = self.next_nft_id.fetch_add(1, Ordering::SeqCst);
                    let price = positions
                        .get(&(plan.chain_id, plan.nft_id))
                        .map(|p| (p.raw_price, p.token0.decimals, p.token1.decimals))
                        .unwrap_or((1.0, 18, 18));
                    positions.insert(
                        (plan.chain_id, nft_id),
                        PositionSnapshot {
                            chain_id: plan.chain_id,
                            nft_id,
                            owner: recipient.clone(),
                            token0: TokenInfo { address: token0.clone(), decimals: price.1 },
                            token1: TokenInfo { address: token1.clone(), decimals: price.2 },
                            fee_tier: *fee_tier,
                            liquidity: 1,
                            principal: TokenAmounts::new(*amount0_desired, *amount1_desired),
                            accrued_fees: TokenAmounts::default(),
                            tick_lower: *tick_lower,
                            tick_upper: *tick_upper,
                            is_limit_order: false,
                            raw_price: price.0,
                        },
                    );
                    minted = Some(nft_id);
                }
                TxStep::Collect { .. }
                | TxStep::Swap { .. }
                | TxStep::DeductGas { .. }
                | TxStep::Transfer { .. } => {}
            }
        }
        minted
    }

    fn receipt(&self, minted_nft_id: Option<u64>) -> TxReceipt {
        let block_number = self.next_block.fetch_add(1, Ordering::SeqCst);
        TxReceipt {
            tx_hash: format!("0x{:064x}", block_number),
            block_number,
            gas_used: 150_000,
            minted_nft_id,
        }
    }
}

impl Default for SimulatedChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for SimulatedChainClient {
    async fn get_position_snapshot(&self, chain_id: u64, nft_id: u64) -> Result<PositionSnapshot> {
        if Self::take_injected(&self.failing_reads) {
            return Err(AutopilotError::transient("chain", "injected read failure"));
        }
        self.position(chain_id, nft_id).ok_or_else(|| {
            AutopilotError::unrecoverable(format!(
                "position {} on chain {} no longer exists",
                nft_id, chain_id
            ))
        })
    }

    async fn is_operator_approved(&self, chain_id: u64, nft_id: u64) -> Result<bool> {
        Ok(self.approvals.read().contains(&(chain_id, nft_id)))
    }

    async fn submit_permit(&self, chain_id: u64, nft_id: u64, permit: &PermitInfo) -> Result<TxReceipt> {
        debug!(chain_id, nft_id, deadline = permit.deadline, "Applying permit");
        self.approve_operator(chain_id, nft_id);
        Ok(self.receipt(None))
    }

    async fn estimate_gas_cost(&self, plan: &TxPlan) -> Result<GasEstimate> {
        let mut estimate = *self.gas.read();
        let op_stack = chain_info(plan.chain_id).map_or(false, |c| c.op_stack);
        if !op_stack {
            estimate.l1_data_fee = 0.0;
        }
        Ok(estimate)
    }

    async fn submit_transaction(&self, plan: &TxPlan) -> Result<TxReceipt> {
        let scheduled = self.scheduled_revert();
        if scheduled || Self::take_injected(&self.reverting_submissions) {
            return Err(AutopilotError::execution(
                ExecutionErrorKind::Reverted,
                "injected revert",
            ));
        }
        let minted = self.apply(plan);
        self.submitted.lock().push(plan.clone());
        info!(chain_id = plan.chain_id, steps = ?plan.step_names(), "Simulated transaction confirmed");
        Ok(self.receipt(minted))
    }

    fn supports_multicall(&self, chain_id: u64) -> bool {
        self.multicall && chain_info(chain_id).map_or(false, |info| info.multicall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_read_failures_are_consumed() {
        let chain = SimulatedChainClient::new();
        chain.upsert_position(sample_position(1, 7, "0xowner"));
        chain.fail_next_reads(1);

        let first = chain.get_position_snapshot(1, 7).await;
        assert!(matches!(first, Err(AutopilotError::TransientRead { .. })));
        assert!(chain.get_position_snapshot(1, 7).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_position_is_unrecoverable() {
        let chain = SimulatedChainClient::new();
        let result = chain.get_position_snapshot(1, 404).await;
        assert!(matches!(result, Err(AutopilotError::Unrecoverable(_))));
    }

    #[tokio::test]
    async fn test_l1_fee_only_on_op_stack() {
        let chain = SimulatedChainClient::new();
        chain.set_gas_estimate(GasEstimate { execution_fee: 10.0, l1_data_fee: 4.0 });
        let mainnet = chain.estimate_gas_cost(&TxPlan::new(1, 1)).await.unwrap();
        let optimism = chain.estimate_gas_cost(&TxPlan::new(10, 1)).await.unwrap();
        assert_eq!(mainnet.total(), 10.0);
        assert_eq!(optimism.total(), 14.0);
    }

    #[tokio::test]
    async fn test_scheduled_revert_hits_one_submission() {
        let chain = SimulatedChainClient::new();
        chain.revert_submission_at(1);
        let plan = TxPlan::new(1, 7);
        assert!(chain.submit_transaction(&plan).await.is_ok());
        assert!(chain.submit_transaction(&plan).await.is_err());
        assert!(chain.submit_transaction(&plan).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_plan_is_applied() {
        let chain = SimulatedChainClient::new();
        chain.upsert_position(sample_position(1, 7, "0xowner"));
        let mut plan = TxPlan::new(1, 7);
        plan.push(TxStep::CollectFees { nft_id: 7 }).push(TxStep::DecreaseLiquidity {
            nft_id: 7,
            liquidity: 1_000_000_000,
            amount0_min: 0,
            amount1_min: 0,
        });
        chain.submit_transaction(&plan).await.unwrap();

        let position = chain.position(1, 7).unwrap();
        assert_eq!(position.principal, TokenAmounts::default());
        assert_eq!(position.accrued_fees, TokenAmounts::default());
        assert_eq!(chain.submitted().len(), 1);
    }
}
