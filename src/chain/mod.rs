//! Boundary to the node client that reads positions and broadcasts transactions.
//!
//! Amounts are raw token units. Prices and values are expressed in raw token1
//! units so that gas cost and position value share a denomination.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use autopilot_types::PermitInfo;

use crate::error::Result;
use crate::market_data::TokenPair;

pub mod registry;
pub mod simulated;

pub use registry::{chain_info, ChainInfo};
pub use simulated::SimulatedChainClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmounts {
    pub token0: u128,
    pub token1: u128,
}

impl TokenAmounts {
    pub fn new(token0: u128, token1: u128) -> Self {
        Self { token0, token1 }
    }

    pub fn get(&self, side: u8) -> u128 {
        if side == 0 {
            self.token0
        } else {
            self.token1
        }
    }

    pub fn saturating_add(&self, other: &TokenAmounts) -> TokenAmounts {
        TokenAmounts {
            token0: self.token0.saturating_add(other.token0),
            token1: self.token1.saturating_add(other.token1),
        }
    }
}

/// Point-in-time view of a concentrated-liquidity position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub chain_id: u64,
    pub nft_id: u64,
    pub owner: String,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    pub fee_tier: u32,
    pub liquidity: u128,
    /// Underlying amounts, excluding uncollected fees.
    pub principal: TokenAmounts,
    pub accrued_fees: TokenAmounts,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub is_limit_order: bool,
    /// Pool price as raw token1 units per raw token0 unit.
    pub raw_price: f64,
}

impl PositionSnapshot {
    /// Price in whole tokens: token1 per token0.
    pub fn human_price(&self) -> f64 {
        let shift = self.token0.decimals as i32 - self.token1.decimals as i32;
        self.raw_price * 10f64.powi(shift)
    }

    pub fn principal_of(&self, side: u8) -> u128 {
        self.principal.get(side)
    }

    /// Principal plus uncollected fees.
    pub fn total_amounts(&self) -> TokenAmounts {
        self.principal.saturating_add(&self.accrued_fees)
    }

    /// Position value (principal and fees) in raw token1 units.
    pub fn value_in_token1(&self) -> f64 {
        let total = self.total_amounts();
        total.token0 as f64 * self.raw_price + total.token1 as f64
    }

    pub fn token_pair(&self) -> TokenPair {
        TokenPair {
            chain_id: self.chain_id,
            base: self.token0.address.clone(),
            quote: self.token1.address.clone(),
        }
    }
}

/// One contract interaction in an action's protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxStep {
    /// Collect accrued fees into the engine.
    CollectFees { nft_id: u64 },
    DecreaseLiquidity {
        nft_id: u64,
        liquidity: u128,
        amount0_min: u128,
        amount1_min: u128,
    },
    /// Collect tokens owed after a liquidity decrease.
    Collect { nft_id: u64 },
    Swap {
        token_in: String,
        token_out: String,
        amount_in: u128,
        amount_out_min: u128,
    },
    IncreaseLiquidity {
        nft_id: u64,
        amount0_desired: u128,
        amount1_desired: u128,
        amount0_min: u128,
        amount1_min: u128,
    },
    Mint {
        token0: String,
        token1: String,
        fee_tier: u32,
        tick_lower: i32,
        tick_upper: i32,
        amount0_desired: u128,
        amount1_desired: u128,
        amount0_min: u128,
        amount1_min: u128,
        recipient: String,
    },
    /// Tokens withheld to pay for gas.
    DeductGas { amount0: u128, amount1: u128 },
    Transfer {
        token: String,
        amount: u128,
        recipient: String,
    },
}

impl TxStep {
    pub fn name(&self) -> &'static str {
        match self {
            TxStep::CollectFees { .. } => "collect_fees",
            TxStep::DecreaseLiquidity { .. } => "decrease_liquidity",
            TxStep::Collect { .. } => "collect",
            TxStep::Swap { .. } => "swap",
            TxStep::IncreaseLiquidity { .. } => "increase_liquidity",
            TxStep::Mint { .. } => "mint",
            TxStep::DeductGas { .. } => "deduct_gas",
            TxStep::Transfer { .. } => "transfer",
        }
    }
}

/// Ordered steps realizing one action. Submitted as a single multicall where the
/// chain supports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPlan {
    pub chain_id: u64,
    pub nft_id: u64,
    pub steps: Vec<TxStep>,
    /// Owner tokens sitting with the engine once each step has confirmed.
    #[serde(default)]
    pub held_after: Vec<TokenAmounts>,
}

impl TxPlan {
    pub fn new(chain_id: u64, nft_id: u64) -> Self {
        Self {
            chain_id,
            nft_id,
            steps: Vec::new(),
            held_after: Vec::new(),
        }
    }

    /// Appends a step that leaves the engine's holdings unchanged.
    pub fn push(&mut self, step: TxStep) -> &mut Self {
        let held = self.held_after.last().copied().unwrap_or_default();
        self.push_holding(step, held)
    }

    /// Appends a step after which the engine holds `held` for the owner.
    pub fn push_holding(&mut self, step: TxStep, held: TokenAmounts) -> &mut Self {
        self.steps.push(step);
        self.held_after.push(held);
        self
    }

    pub fn held_after_step(&self, index: usize) -> TokenAmounts {
        self.held_after.get(index).copied().unwrap_or_default()
    }

    /// A plan holding only the step at `index`.
    pub fn single_step(&self, index: usize) -> Option<TxPlan> {
        self.steps.get(index).map(|step| TxPlan {
            chain_id: self.chain_id,
            nft_id: self.nft_id,
            steps: vec![step.clone()],
            held_after: vec![self.held_after_step(index)],
        })
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(TxStep::name).collect()
    }
}

/// Gas cost of a plan in raw token1 units of the position being acted on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GasEstimate {
    pub execution_fee: f64,
    /// L1 data-availability fee charged by OP-stack rollups. Zero elsewhere.
    pub l1_data_fee: f64,
}

impl GasEstimate {
    pub fn total(&self) -> f64 {
        self.execution_fee + self.l1_data_fee
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    /// NFT minted by the transaction, if any.
    pub minted_nft_id: Option<u64>,
}

/// Node client used to read position state and submit the engine's transactions.
///
/// A position that no longer exists must be reported as
/// [`AutopilotError::Unrecoverable`](crate::error::AutopilotError::Unrecoverable);
/// any other read failure as a transient error.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_position_snapshot(&self, chain_id: u64, nft_id: u64) -> Result<PositionSnapshot>;

    /// Whether the engine already holds operator rights over the position.
    async fn is_operator_approved(&self, chain_id: u64, nft_id: u64) -> Result<bool>;

    /// Applies a verified permit on-chain, granting operator rights.
    async fn submit_permit(&self, chain_id: u64, nft_id: u64, permit: &PermitInfo) -> Result<TxReceipt>;

    async fn estimate_gas_cost(&self, plan: &TxPlan) -> Result<GasEstimate>;

    /// Submits the plan and waits for its confirmation.
    async fn submit_transaction(&self, plan: &TxPlan) -> Result<TxReceipt>;

    fn supports_multicall(&self, chain_id: u64) -> bool {
        chain_info(chain_id).map_or(false, |info| info.multicall)
    }
}
