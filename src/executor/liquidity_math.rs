//! Concentrated-liquidity ratio helpers. Prices are raw token1 per raw token0.

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

pub fn tick_to_price(tick: i32) -> f64 {
    1.0001f64.powi(tick)
}

/// Share of value held in token0 by a position over `[tick_lower, tick_upper]`
/// at `raw_price`.
pub fn range_token0_share(raw_price: f64, tick_lower: i32, tick_upper: i32) -> f64 {
    let lower = tick_to_price(tick_lower);
    let upper = tick_to_price(tick_upper);
    if raw_price <= lower {
        return 1.0;
    }
    if raw_price >= upper {
        return 0.0;
    }

    let sp = raw_price.sqrt();
    let sa = lower.sqrt();
    let sb = upper.sqrt();
    // Amounts per unit of liquidity
    let amount0 = (sb - sp) / (sp * sb);
    let amount1 = sp - sa;
    let value0 = amount0 * raw_price;
    value0 / (value0 + amount1)
}

/// Share of value held in token0 by the given amounts, if they are worth anything.
pub fn amounts_token0_share(amount0: u128, amount1: u128, raw_price: f64) -> Option<f64> {
    let value0 = amount0 as f64 * raw_price;
    let total = value0 + amount1 as f64;
    if total > 0.0 {
        Some(value0 / total)
    } else {
        None
    }
}

/// A swap moving a pair of balances toward a target value share.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapLeg {
    /// true when selling token0 for token1.
    pub zero_for_one: bool,
    pub amount_in: u128,
    /// Output at the current price, before slippage.
    pub expected_out: u128,
}

impl SwapLeg {
    /// Balances after the swap fills at the expected output.
    pub fn apply(&self, amount0: u128, amount1: u128) -> (u128, u128) {
        if self.zero_for_one {
            (amount0 - self.amount_in, amount1 + self.expected_out)
        } else {
            (amount0 + self.expected_out, amount1 - self.amount_in)
        }
    }
}

/// Swap needed so that token0 holds `target_share` of the combined value.
pub fn swap_to_share(amount0: u128, amount1: u128, raw_price: f64, target_share: f64) -> Option<SwapLeg> {
    if raw_price <= 0.0 || !raw_price.is_finite() {
        return None;
    }
    let value0 = amount0 as f64 * raw_price;
    let total = value0 + amount1 as f64;
    let target0 = target_share.clamp(0.0, 1.0) * total;

    let leg = if value0 > target0 {
        let amount_in = (((value0 - target0) / raw_price) as u128).min(amount0);
        SwapLeg {
            zero_for_one: true,
            amount_in,
            expected_out: (amount_in as f64 * raw_price) as u128,
        }
    } else {
        let amount_in = ((target0 - value0) as u128).min(amount1);
        SwapLeg {
            zero_for_one: false,
            amount_in,
            expected_out: (amount_in as f64 / raw_price) as u128,
        }
    };

    if leg.amount_in == 0 {
        None
    } else {
        Some(leg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_share_edges() {
        assert_eq!(range_token0_share(tick_to_price(-100), 0, 100), 1.0);
        assert_eq!(range_token0_share(tick_to_price(200), 0, 100), 0.0);
        let mid = range_token0_share(1.0, -1000, 1000);
        assert!((mid - 0.5).abs() < 1e-3, "symmetric range at price 1 is ~50/50, got {}", mid);
    }

    #[test]
    fn test_swap_to_share_sells_excess_token0() {
        // 10 token0 at price 2, 0 token1: value 20, target half
        let leg = swap_to_share(10, 0, 2.0, 0.5).unwrap();
        assert!(leg.zero_for_one);
        assert_eq!(leg.amount_in, 5);
        assert_eq!(leg.expected_out, 10);
        assert_eq!(leg.apply(10, 0), (5, 10));
    }

    #[test]
    fn test_swap_to_share_sells_excess_token1() {
        let leg = swap_to_share(0, 1_000, 4.0, 0.25).unwrap();
        assert!(!leg.zero_for_one);
        assert_eq!(leg.amount_in, 250);
        assert_eq!(leg.expected_out, 62);
    }

    #[test]
    fn test_balanced_amounts_need_no_swap() {
        assert_eq!(swap_to_share(100, 200, 2.0, 0.5), None);
        assert_eq!(amounts_token0_share(0, 0, 1.0), None);
    }
}
