//! One handler per action variant. Each turns a position snapshot into the
//! ordered contract calls that realize the action.

use autopilot_types::{Action, CloseAction, LimitOrderCloseAction, RebalanceAction, ReinvestAction};

use super::liquidity_math::{amounts_token0_share, range_token0_share, swap_to_share};
use crate::chain::{PositionSnapshot, TokenAmounts, TxPlan, TxStep};
use crate::error::{AutopilotError, Result};
use crate::guard::{ActionGuard, Authorization, GuardVerdict};

/// Inputs shared by every plan.
pub struct PlanContext<'a> {
    pub snapshot: &'a PositionSnapshot,
    pub owner_addr: &'a str,
    pub auth: &'a Authorization,
}

/// Capability implemented by each action variant.
pub trait ActionHandler: Send + Sync {
    fn kind(&self) -> &'static str;

    fn slippage(&self) -> f64;

    fn max_gas_proportion(&self) -> f64;

    /// `Ok(false)` when there is nothing to do this cycle; `Err` when the action
    /// can never apply to this position.
    fn precheck(&self, snapshot: &PositionSnapshot) -> Result<bool>;

    fn plan(&self, ctx: &PlanContext<'_>) -> TxPlan;

    fn authorize(&self, snapshot: &PositionSnapshot, gas_cost: f64) -> GuardVerdict {
        ActionGuard::authorize(
            self.max_gas_proportion(),
            self.slippage(),
            snapshot.value_in_token1(),
            gas_cost,
        )
    }
}

pub fn handler_for(action: &Action) -> Box<dyn ActionHandler> {
    match action {
        Action::Close(a) => Box::new(CloseHandler(a.clone())),
        Action::LimitOrderClose(a) => Box::new(LimitOrderCloseHandler(a.clone())),
        Action::Reinvest(a) => Box::new(ReinvestHandler(a.clone())),
        Action::Rebalance(a) => Box::new(RebalanceHandler(a.clone())),
    }
}

/// Amounts the engine holds after pulling all liquidity and fees out.
fn push_withdraw_all(plan: &mut TxPlan, ctx: &PlanContext<'_>) -> (u128, u128) {
    let snapshot = ctx.snapshot;
    let total = snapshot.total_amounts();
    if snapshot.liquidity == 0 {
        // Anything left is already owed to the position
        plan.push_holding(TxStep::CollectFees { nft_id: snapshot.nft_id }, total);
        return (total.token0, total.token1);
    }
    plan.push_holding(TxStep::CollectFees { nft_id: snapshot.nft_id }, snapshot.accrued_fees);
    plan.push(TxStep::DecreaseLiquidity {
        nft_id: snapshot.nft_id,
        liquidity: snapshot.liquidity,
        amount0_min: ctx.auth.min_output(snapshot.principal.token0),
        amount1_min: ctx.auth.min_output(snapshot.principal.token1),
    });
    plan.push_holding(TxStep::Collect { nft_id: snapshot.nft_id }, total);
    (total.token0, total.token1)
}

/// Withholds the gas share from both amounts and returns what remains.
fn push_gas_deduction(plan: &mut TxPlan, auth: &Authorization, amount0: u128, amount1: u128) -> (u128, u128) {
    let (kept0, deducted0) = auth.deduct_gas(amount0);
    let (kept1, deducted1) = auth.deduct_gas(amount1);
    if deducted0 > 0 || deducted1 > 0 {
        plan.push_holding(
            TxStep::DeductGas { amount0: deducted0, amount1: deducted1 },
            TokenAmounts::new(kept0, kept1),
        );
    }
    (kept0, kept1)
}

/// Swaps toward `target_share` and returns the expected balances afterwards.
fn push_swap_to_share(
    plan: &mut TxPlan,
    ctx: &PlanContext<'_>,
    amount0: u128,
    amount1: u128,
    target_share: f64,
) -> (u128, u128) {
    let snapshot = ctx.snapshot;
    match swap_to_share(amount0, amount1, snapshot.raw_price, target_share) {
        Some(leg) => {
            let (token_in, token_out) = if leg.zero_for_one {
                (&snapshot.token0.address, &snapshot.token1.address)
            } else {
                (&snapshot.token1.address, &snapshot.token0.address)
            };
            let (after0, after1) = leg.apply(amount0, amount1);
            plan.push_holding(
                TxStep::Swap {
                    token_in: token_in.clone(),
                    token_out: token_out.clone(),
                    amount_in: leg.amount_in,
                    amount_out_min: ctx.auth.min_output(leg.expected_out),
                },
                TokenAmounts::new(after0, after1),
            );
            (after0, after1)
        }
        None => (amount0, amount1),
    }
}

fn close_plan(ctx: &PlanContext<'_>) -> TxPlan {
    let snapshot = ctx.snapshot;
    let mut plan = TxPlan::new(snapshot.chain_id, snapshot.nft_id);
    let (amount0, amount1) = push_withdraw_all(&mut plan, ctx);
    let (kept0, kept1) = push_gas_deduction(&mut plan, ctx.auth, amount0, amount1);
    if kept0 > 0 {
        plan.push_holding(
            TxStep::Transfer {
                token: snapshot.token0.address.clone(),
                amount: kept0,
                recipient: ctx.owner_addr.to_string(),
            },
            TokenAmounts::new(0, kept1),
        );
    }
    if kept1 > 0 {
        plan.push_holding(
            TxStep::Transfer {
                token: snapshot.token1.address.clone(),
                amount: kept1,
                recipient: ctx.owner_addr.to_string(),
            },
            TokenAmounts::default(),
        );
    }
    plan
}

fn has_anything(snapshot: &PositionSnapshot) -> bool {
    let total = snapshot.total_amounts();
    snapshot.liquidity > 0 || total.token0 > 0 || total.token1 > 0
}

pub struct CloseHandler(pub CloseAction);

impl ActionHandler for CloseHandler {
    fn kind(&self) -> &'static str {
        "Close"
    }

    fn slippage(&self) -> f64 {
        self.0.slippage
    }

    fn max_gas_proportion(&self) -> f64 {
        self.0.max_gas_proportion
    }

    fn precheck(&self, snapshot: &PositionSnapshot) -> Result<bool> {
        if !has_anything(snapshot) {
            return Err(AutopilotError::unrecoverable("position is already empty"));
        }
        Ok(true)
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> TxPlan {
        close_plan(ctx)
    }
}

pub struct LimitOrderCloseHandler(pub LimitOrderCloseAction);

impl ActionHandler for LimitOrderCloseHandler {
    fn kind(&self) -> &'static str {
        "LimitOrderClose"
    }

    fn slippage(&self) -> f64 {
        0.0
    }

    fn max_gas_proportion(&self) -> f64 {
        self.0.max_gas_proportion
    }

    fn precheck(&self, snapshot: &PositionSnapshot) -> Result<bool> {
        if !snapshot.is_limit_order {
            return Err(AutopilotError::unrecoverable(format!(
                "position {} is not a limit order",
                snapshot.nft_id
            )));
        }
        if !has_anything(snapshot) {
            return Err(AutopilotError::unrecoverable("limit order position is already empty"));
        }
        Ok(true)
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> TxPlan {
        close_plan(ctx)
    }
}

pub struct ReinvestHandler(pub ReinvestAction);

impl ActionHandler for ReinvestHandler {
    fn kind(&self) -> &'static str {
        "Reinvest"
    }

    fn slippage(&self) -> f64 {
        self.0.slippage
    }

    fn max_gas_proportion(&self) -> f64 {
        self.0.max_gas_proportion
    }

    fn precheck(&self, snapshot: &PositionSnapshot) -> Result<bool> {
        if snapshot.liquidity == 0 {
            return Err(AutopilotError::unrecoverable("position has no liquidity to reinvest into"));
        }
        let fees = snapshot.accrued_fees;
        Ok(fees.token0 > 0 || fees.token1 > 0)
    }

    /// Gas is paid from the collected fees only.
    fn authorize(&self, snapshot: &PositionSnapshot, gas_cost: f64) -> GuardVerdict {
        let fees = snapshot.accrued_fees;
        let fee_value = fees.token0 as f64 * snapshot.raw_price + fees.token1 as f64;
        ActionGuard::authorize_from_fees(
            self.max_gas_proportion(),
            self.slippage(),
            snapshot.value_in_token1(),
            fee_value,
            gas_cost,
        )
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> TxPlan {
        let snapshot = ctx.snapshot;
        let mut plan = TxPlan::new(snapshot.chain_id, snapshot.nft_id);
        let fees = snapshot.accrued_fees;
        plan.push_holding(TxStep::CollectFees { nft_id: snapshot.nft_id }, fees);

        let (fees0, fees1) = push_gas_deduction(&mut plan, ctx.auth, fees.token0, fees.token1);

        // Out-of-range positions hold a single token; keep whatever share the principal has
        let target_share = amounts_token0_share(snapshot.principal.token0, snapshot.principal.token1, snapshot.raw_price)
            .unwrap_or_else(|| range_token0_share(snapshot.raw_price, snapshot.tick_lower, snapshot.tick_upper));
        let (amount0, amount1) = push_swap_to_share(&mut plan, ctx, fees0, fees1, target_share);

        plan.push_holding(
            TxStep::IncreaseLiquidity {
                nft_id: snapshot.nft_id,
                amount0_desired: amount0,
                amount1_desired: amount1,
                amount0_min: ctx.auth.min_output(amount0),
                amount1_min: ctx.auth.min_output(amount1),
            },
            TokenAmounts::default(),
        );
        plan
    }
}

pub struct RebalanceHandler(pub RebalanceAction);

impl ActionHandler for RebalanceHandler {
    fn kind(&self) -> &'static str {
        "Rebalance"
    }

    fn slippage(&self) -> f64 {
        self.0.slippage
    }

    fn max_gas_proportion(&self) -> f64 {
        self.0.max_gas_proportion
    }

    fn precheck(&self, snapshot: &PositionSnapshot) -> Result<bool> {
        if !has_anything(snapshot) {
            return Err(AutopilotError::unrecoverable("position is empty, nothing to rebalance"));
        }
        Ok(true)
    }

    fn plan(&self, ctx: &PlanContext<'_>) -> TxPlan {
        let snapshot = ctx.snapshot;
        let mut plan = TxPlan::new(snapshot.chain_id, snapshot.nft_id);
        let (amount0, amount1) = push_withdraw_all(&mut plan, ctx);
        let (kept0, kept1) = push_gas_deduction(&mut plan, ctx.auth, amount0, amount1);

        let target_share = range_token0_share(snapshot.raw_price, self.0.tick_lower, self.0.tick_upper);
        let (amount0, amount1) = push_swap_to_share(&mut plan, ctx, kept0, kept1, target_share);

        plan.push_holding(
            TxStep::Mint {
                token0: snapshot.token0.address.clone(),
                token1: snapshot.token1.address.clone(),
                fee_tier: snapshot.fee_tier,
                tick_lower: self.0.tick_lower,
                tick_upper: self.0.tick_upper,
                amount0_desired: amount0,
                amount1_desired: amount1,
                amount0_min: ctx.auth.min_output(amount0),
                amount1_min: ctx.auth.min_output(amount1),
                recipient: ctx.owner_addr.to_string(),
            },
            TokenAmounts::default(),
        );
        plan
    }
}
