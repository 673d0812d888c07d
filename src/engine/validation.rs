use autopilot_types::{Action, Condition, Payload};

use crate::chain::registry::is_supported;
use crate::error::{AutopilotError, Result};
use crate::executor::liquidity_math::{MAX_TICK, MIN_TICK};

/// Structural checks on a create request. Nothing here touches the chain.
pub fn validate_payload(payload: &Payload) -> Result<()> {
    if payload.owner_addr.trim().is_empty() {
        return Err(AutopilotError::validation("ownerAddr is required"));
    }
    if !is_supported(payload.chain_id) {
        return Err(AutopilotError::validation(format!(
            "chain {} is not supported",
            payload.chain_id
        )));
    }
    validate_condition(&payload.condition)?;
    validate_action(&payload.action)
}

pub fn validate_condition(condition: &Condition) -> Result<()> {
    match condition {
        Condition::Time(time) => {
            if time.time_after_epoch_sec < 0 {
                return Err(AutopilotError::validation("timeAfterEpochSec must not be negative"));
            }
        }
        Condition::TokenAmount(token) => {
            if token.zero_amount_token > 1 {
                return Err(AutopilotError::validation("zeroAmountToken must be 0 or 1"));
            }
        }
        Condition::Price(price) => {
            let bound = match (price.gte, price.lte) {
                (Some(bound), None) | (None, Some(bound)) => bound,
                (Some(_), Some(_)) => return Err(AutopilotError::validation("gte and lte are mutually exclusive")),
                (None, None) => return Err(AutopilotError::validation("one of gte or lte is required")),
            };
            if !bound.is_finite() || bound <= 0.0 {
                return Err(AutopilotError::validation("price bound must be a positive number"));
            }
            if price.duration_sec == Some(0) {
                return Err(AutopilotError::validation("durationSec must be positive when set"));
            }
        }
    }
    Ok(())
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AutopilotError::validation(format!("{} must be within [0, 1], got {}", name, value)));
    }
    Ok(())
}

pub fn validate_action(action: &Action) -> Result<()> {
    check_fraction("slippage", action.slippage())?;
    check_fraction("maxGasProportion", action.max_gas_proportion())?;

    if let Action::Rebalance(rebalance) = action {
        if rebalance.tick_lower >= rebalance.tick_upper {
            return Err(AutopilotError::validation("tickLower must be below tickUpper"));
        }
        if rebalance.tick_lower < MIN_TICK || rebalance.tick_upper > MAX_TICK {
            return Err(AutopilotError::validation(format!(
                "ticks must be within [{}, {}]",
                MIN_TICK, MAX_TICK
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_types::{
        CloseAction, PriceCondition, RebalanceAction, TimeCondition, TokenAmountCondition,
    };

    fn payload(condition: Condition, action: Action) -> Payload {
        Payload {
            owner_addr: "0xowner".to_string(),
            chain_id: 1,
            nft_id: 1,
            condition,
            action,
        }
    }

    fn close() -> Action {
        Action::Close(CloseAction { slippage: 0.005, max_gas_proportion: 0.1 })
    }

    fn price(gte: Option<f64>, lte: Option<f64>) -> Condition {
        Condition::Price(PriceCondition { gte, lte, duration_sec: None })
    }

    #[test]
    fn test_price_bounds_are_exclusive() {
        assert!(validate_condition(&price(Some(10.0), None)).is_ok());
        assert!(validate_condition(&price(None, Some(10.0))).is_ok());
        assert!(matches!(
            validate_condition(&price(Some(10.0), Some(12.0))),
            Err(AutopilotError::Validation(_))
        ));
        assert!(matches!(validate_condition(&price(None, None)), Err(AutopilotError::Validation(_))));
        assert!(validate_condition(&price(Some(f64::NAN), None)).is_err());
    }

    #[test]
    fn test_token_side() {
        let ok = Condition::TokenAmount(TokenAmountCondition { zero_amount_token: 1 });
        let bad = Condition::TokenAmount(TokenAmountCondition { zero_amount_token: 2 });
        assert!(validate_condition(&ok).is_ok());
        assert!(validate_condition(&bad).is_err());
    }

    #[test]
    fn test_rebalance_ticks() {
        let rebalance = |tick_lower, tick_upper| {
            Action::Rebalance(RebalanceAction { tick_lower, tick_upper, slippage: 0.01, max_gas_proportion: 0.1 })
        };
        assert!(validate_action(&rebalance(-100, 100)).is_ok());
        assert!(validate_action(&rebalance(100, 100)).is_err());
        assert!(validate_action(&rebalance(200, 100)).is_err());
        assert!(validate_action(&rebalance(MIN_TICK - 1, 0)).is_err());
    }

    #[test]
    fn test_fractions_in_unit_interval() {
        let action = Action::Close(CloseAction { slippage: 1.5, max_gas_proportion: 0.1 });
        assert!(validate_action(&action).is_err());
        let action = Action::Close(CloseAction { slippage: 0.0, max_gas_proportion: -0.1 });
        assert!(validate_action(&action).is_err());
    }

    #[test]
    fn test_unsupported_chain() {
        let mut p = payload(Condition::Time(TimeCondition { time_after_epoch_sec: 0 }), close());
        assert!(validate_payload(&p).is_ok());
        p.chain_id = 999_999;
        assert!(matches!(validate_payload(&p), Err(AutopilotError::Validation(_))));
    }
}
