//! Economic bounds checked before any chain-mutating call.

use autopilot_types::Action;

/// Parts-per-million denominator. Slippage and gas proportions are carried at
/// this precision.
pub const PPM: u128 = 1_000_000;

/// Truncates a fraction in `[0, 1]` to six decimal digits, as parts per million.
pub fn to_ppm(fraction: f64) -> u32 {
    if !fraction.is_finite() || fraction <= 0.0 {
        return 0;
    }
    // Guard against 0.07 * 1e6 = 69999.99999 style representation error
    let scaled = (fraction * PPM as f64 + 1e-6).floor();
    scaled.min(PPM as f64) as u32
}

/// `amount * (1 - ppm/1e6)` without overflowing u128.
pub fn scale_down(amount: u128, ppm: u32) -> u128 {
    let keep = PPM - (ppm as u128).min(PPM);
    (amount / PPM) * keep + (amount % PPM) * keep / PPM
}

/// `amount * ppm/1e6` without overflowing u128.
pub fn portion(amount: u128, ppm: u32) -> u128 {
    amount - scale_down(amount, ppm)
}

/// Minimum acceptable output for an expected output under a slippage tolerance.
pub fn min_output(expected: u128, slippage_ppm: u32) -> u128 {
    scale_down(expected, slippage_ppm)
}

/// Bounds under which an action may execute this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Authorization {
    pub gas_proportion: f64,
    pub slippage_ppm: u32,
    /// Share of each handled token amount withheld to pay for gas.
    pub gas_deduction_ppm: u32,
}

impl Authorization {
    pub fn min_output(&self, expected: u128) -> u128 {
        min_output(expected, self.slippage_ppm)
    }

    /// Splits `amount` into what stays with the owner and what pays for gas.
    pub fn deduct_gas(&self, amount: u128) -> (u128, u128) {
        let deducted = portion(amount, self.gas_deduction_ppm);
        (amount - deducted, deducted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuardVerdict {
    Allowed(Authorization),
    /// Gas would take more of the position than the owner allows. Not an error:
    /// the task is retried next cycle.
    Rejected { gas_proportion: f64, ceiling: f64 },
    /// Gas would cost more than the fees that are meant to pay for it.
    FeesShort { fee_value: f64, gas_cost: f64 },
}

impl GuardVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardVerdict::Allowed(_))
    }
}

pub struct ActionGuard;

impl ActionGuard {
    /// Hard ceiling: allowed only when `gas_cost / position_value <= max_gas_proportion`.
    pub fn authorize(
        max_gas_proportion: f64,
        slippage: f64,
        position_value: f64,
        gas_cost: f64,
    ) -> GuardVerdict {
        let gas_cost = gas_cost.max(0.0);
        let gas_proportion = if position_value > 0.0 {
            gas_cost / position_value
        } else {
            f64::INFINITY
        };

        if !(gas_proportion <= max_gas_proportion) {
            return GuardVerdict::Rejected {
                gas_proportion,
                ceiling: max_gas_proportion,
            };
        }

        // Round the deduction up so the gas is fully covered, never past the owner's ceiling
        let gas_deduction_ppm = ((gas_proportion * PPM as f64).ceil() as u32)
            .min(PPM as u32)
            .min(to_ppm(max_gas_proportion));
        GuardVerdict::Allowed(Authorization {
            gas_proportion,
            slippage_ppm: to_ppm(slippage),
            gas_deduction_ppm,
        })
    }

    /// For actions that pay gas out of collected fees. The position-value
    /// ceiling still applies; on top of it the fees must cover the gas, and the
    /// deduction is sized against the fees rather than the whole position.
    pub fn authorize_from_fees(
        max_gas_proportion: f64,
        slippage: f64,
        position_value: f64,
        fee_value: f64,
        gas_cost: f64,
    ) -> GuardVerdict {
        let auth = match Self::authorize(max_gas_proportion, slippage, position_value, gas_cost) {
            GuardVerdict::Allowed(auth) => auth,
            rejected => return rejected,
        };
        let gas_cost = gas_cost.max(0.0);
        if !(gas_cost <= fee_value) {
            return GuardVerdict::FeesShort { fee_value, gas_cost };
        }

        let fee_share = if fee_value > 0.0 { gas_cost / fee_value } else { 0.0 };
        GuardVerdict::Allowed(Authorization {
            gas_deduction_ppm: ((fee_share * PPM as f64).ceil() as u32).min(PPM as u32),
            ..auth
        })
    }

    pub fn authorize_action(action: &Action, position_value: f64, gas_cost: f64) -> GuardVerdict {
        Self::authorize(action.max_gas_proportion(), action.slippage(), position_value, gas_cost)
    }
}
