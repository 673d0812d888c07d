use serde::{Deserialize, Serialize};
use std::fmt;

/// Task identifier, unique per `(owner_addr, chain_id)`.
pub type TaskId = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCondition {
    /// Met once the current time reaches this many seconds since the UNIX epoch.
    pub time_after_epoch_sec: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAmountCondition {
    /// 0 for token0, 1 for token1. Met when that token's principal is exactly zero.
    pub zero_amount_token: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
}

/// What to watch for. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Condition {
    Time(TimeCondition),
    TokenAmount(TokenAmountCondition),
    Price(PriceCondition),
}

impl Condition {
    pub fn kind(&self) -> &'static str {
        match self {
            Condition::Time(_) => "Time",
            Condition::TokenAmount(_) => "TokenAmount",
            Condition::Price(_) => "Price",
        }
    }
}

/// Close the position and send principal plus collected fees to the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseAction {
    pub slippage: f64,
    pub max_gas_proportion: f64,
}

/// Close of a position placed as a limit order. Always closed with zero slippage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrderCloseAction {
    pub max_gas_proportion: f64,
}

/// Claim fees, swap them to the principal ratio and add them back as liquidity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReinvestAction {
    pub slippage: f64,
    pub max_gas_proportion: f64,
}

/// Close, swap to the ratio of the new range and mint a position there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceAction {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub slippage: f64,
    pub max_gas_proportion: f64,
}

/// What to do once the condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    Close(CloseAction),
    LimitOrderClose(LimitOrderCloseAction),
    Reinvest(ReinvestAction),
    Rebalance(RebalanceAction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Close(_) => "Close",
            Action::LimitOrderClose(_) => "LimitOrderClose",
            Action::Reinvest(_) => "Reinvest",
            Action::Rebalance(_) => "Rebalance",
        }
    }

    /// Slippage tolerance as submitted. Limit orders are always zero.
    pub fn slippage(&self) -> f64 {
        match self {
            Action::Close(a) => a.slippage,
            Action::LimitOrderClose(_) => 0.0,
            Action::Reinvest(a) => a.slippage,
            Action::Rebalance(a) => a.slippage,
        }
    }

    pub fn max_gas_proportion(&self) -> f64 {
        match self {
            Action::Close(a) => a.max_gas_proportion,
            Action::LimitOrderClose(a) => a.max_gas_proportion,
            Action::Reinvest(a) => a.max_gas_proportion,
            Action::Rebalance(a) => a.max_gas_proportion,
        }
    }

    pub fn is_limit_order(&self) -> bool {
        matches!(self, Action::LimitOrderClose(_))
    }
}

/// The signed body of a create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    pub owner_addr: String,
    pub chain_id: u64,
    pub nft_id: u64,
    pub condition: Condition,
    pub action: Action,
}

/// EIP-4494 style permit granting operating rights over a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitInfo {
    pub signature: String,
    /// Unix timestamp in seconds.
    pub deadline: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Started,
    Completed,
    Invalid,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Started => "STARTED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Invalid => "INVALID",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Invalid)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Started)
                | (Started, Created)
                | (Started, Completed)
                | (Started, Invalid)
                | (Created, Invalid)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row returned by a list request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedTrigger {
    pub owner_addr: String,
    pub task_id: TaskId,
    pub chain_id: u64,
    pub nft_id: u64,
    pub status: TaskStatus,
    pub last_updated_sec: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_condition_wire_format() {
        let json = r#"{"type":"Price","gte":10.0,"durationSec":3600}"#;
        let condition: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(
            condition,
            Condition::Price(PriceCondition {
                gte: Some(10.0),
                lte: None,
                duration_sec: Some(3600),
            })
        );
    }

    #[test]
    fn test_action_wire_format() {
        let json = r#"{"type":"Rebalance","tickLower":-600,"tickUpper":600,"slippage":0.01,"maxGasProportion":0.1}"#;
        let action: Action = serde_json::from_str(json).unwrap();
        assert_eq!(action.kind(), "Rebalance");
        assert_eq!(action.slippage(), 0.01);

        let limit: Action =
            serde_json::from_str(r#"{"type":"LimitOrderClose","maxGasProportion":0.2}"#).unwrap();
        assert!(limit.is_limit_order());
        assert_eq!(limit.slippage(), 0.0);
    }

    #[test]
    fn test_status_transitions() {
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Started));
        assert!(TaskStatus::Started.can_transition_to(TaskStatus::Created));
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Invalid));
        assert!(!TaskStatus::Created.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Created));
        assert!(!TaskStatus::Invalid.can_transition_to(TaskStatus::Started));
        assert_eq!(serde_json::to_string(&TaskStatus::Invalid).unwrap(), r#""INVALID""#);
    }
}
