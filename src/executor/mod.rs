//! Turns a satisfied trigger into on-chain effects.

use serde::{Deserialize, Serialize};

pub mod actions;
pub mod execution;
pub mod liquidity_math;

pub use actions::{handler_for, ActionHandler, PlanContext};
pub use execution::ExecutionService;

use crate::chain::{TokenAmounts, TxPlan, TxReceipt, TxStep};

/// Why an execution attempt did nothing this cycle. The task returns to the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    GuardRejected { gas_proportion: f64, ceiling: f64 },
    /// Fees collected this cycle would not pay for the gas spent collecting them.
    FeesBelowGas { fee_value: f64, gas_cost: f64 },
    NothingToDo(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Executed { receipts: Vec<TxReceipt> },
    Deferred(DeferReason),
    /// Step-by-step submission stopped after some steps confirmed. The engine
    /// holds owner tokens until `pending` is resumed or swept.
    Interrupted { pending: PendingSteps, error: String },
}

impl ExecutionOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed { .. })
    }
}

/// A plan submitted one step at a time that has not fully confirmed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSteps {
    pub plan: TxPlan,
    /// First step that has not confirmed.
    pub next_step: usize,
    pub token0: String,
    pub token1: String,
}

impl PendingSteps {
    pub fn remaining(&self) -> usize {
        self.plan.steps.len().saturating_sub(self.next_step)
    }

    /// Owner tokens the engine holds after the confirmed steps.
    pub fn held(&self) -> TokenAmounts {
        self.next_step
            .checked_sub(1)
            .map_or_else(TokenAmounts::default, |last| self.plan.held_after_step(last))
    }

    pub fn advanced_to(&self, next_step: usize) -> PendingSteps {
        PendingSteps {
            next_step,
            ..self.clone()
        }
    }

    /// Transfers returning everything held to `owner_addr`. `None` when nothing is held.
    pub fn sweep_plan(&self, owner_addr: &str) -> Option<TxPlan> {
        let held = self.held();
        let mut plan = TxPlan::new(self.plan.chain_id, self.plan.nft_id);
        if held.token0 > 0 {
            plan.push_holding(
                TxStep::Transfer {
                    token: self.token0.clone(),
                    amount: held.token0,
                    recipient: owner_addr.to_string(),
                },
                TokenAmounts::new(0, held.token1),
            );
        }
        if held.token1 > 0 {
            plan.push_holding(
                TxStep::Transfer {
                    token: self.token1.clone(),
                    amount: held.token1,
                    recipient: owner_addr.to_string(),
                },
                TokenAmounts::default(),
            );
        }
        (!plan.steps.is_empty()).then_some(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(next_step: usize) -> PendingSteps {
        let mut plan = TxPlan::new(1, 42);
        plan.push_holding(TxStep::CollectFees { nft_id: 42 }, TokenAmounts::new(0, 5))
            .push_holding(TxStep::Collect { nft_id: 42 }, TokenAmounts::new(7, 105))
            .push_holding(
                TxStep::Transfer { token: "0xweth".to_string(), amount: 7, recipient: "0xowner".to_string() },
                TokenAmounts::new(0, 105),
            );
        PendingSteps { plan, next_step, token0: "0xweth".to_string(), token1: "0xusdc".to_string() }
    }

    #[test]
    fn test_held_follows_confirmed_steps() {
        assert_eq!(pending(0).held(), TokenAmounts::default());
        assert_eq!(pending(2).held(), TokenAmounts::new(7, 105));
        assert_eq!(pending(3).held(), TokenAmounts::new(0, 105));
        assert_eq!(pending(2).remaining(), 1);
    }

    #[test]
    fn test_sweep_returns_held_tokens() {
        let sweep = pending(2).sweep_plan("0xowner").unwrap();
        assert_eq!(
            sweep.steps,
            vec![
                TxStep::Transfer { token: "0xweth".to_string(), amount: 7, recipient: "0xowner".to_string() },
                TxStep::Transfer { token: "0xusdc".to_string(), amount: 105, recipient: "0xowner".to_string() },
            ]
        );
        assert!(pending(0).sweep_plan("0xowner").is_none());
    }
}
