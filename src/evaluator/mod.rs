//! Decides whether a trigger's condition currently holds.

use tracing::debug;

use autopilot_types::{Condition, PriceCondition};

use crate::chain::PositionSnapshot;
use crate::market_data::PriceHistoryProvider;

pub mod price_window;

pub use price_window::{window_holds, PriceBound};

/// Outcome of evaluating a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Met,
    NotMet,
    /// A data source failed; treated as not met and retried on the next cycle.
    Undetermined(String),
}

impl Evaluation {
    pub fn is_met(&self) -> bool {
        matches!(self, Evaluation::Met)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Evaluation::Met => "met",
            Evaluation::NotMet => "not_met",
            Evaluation::Undetermined(_) => "undetermined",
        }
    }

    fn from_bool(met: bool) -> Self {
        if met {
            Evaluation::Met
        } else {
            Evaluation::NotMet
        }
    }
}

/// Evaluates conditions against a position snapshot and the price history.
///
/// Holds no state between calls: identical inputs give identical outcomes.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    /// Largest tolerated gap between consecutive price samples in a window.
    max_sample_gap_secs: u64,
}

impl ConditionEvaluator {
    pub fn new(max_sample_gap_secs: u64) -> Self {
        Self { max_sample_gap_secs }
    }

    pub async fn evaluate(
        &self,
        condition: &Condition,
        snapshot: &PositionSnapshot,
        history: &dyn PriceHistoryProvider,
        now: i64,
    ) -> Evaluation {
        match condition {
            Condition::Time(time) => Evaluation::from_bool(now >= time.time_after_epoch_sec),
            Condition::TokenAmount(token) => {
                // Principal only; accrued fees never count toward the amount
                Evaluation::from_bool(snapshot.principal_of(token.zero_amount_token) == 0)
            }
            Condition::Price(price) => self.evaluate_price(price, snapshot, history, now).await,
        }
    }

    async fn evaluate_price(
        &self,
        condition: &PriceCondition,
        snapshot: &PositionSnapshot,
        history: &dyn PriceHistoryProvider,
        now: i64,
    ) -> Evaluation {
        let Some(bound) = PriceBound::from_condition(condition) else {
            return Evaluation::Undetermined("price condition needs exactly one of gte/lte".to_string());
        };

        let current = snapshot.human_price();
        if !bound.holds(current) {
            return Evaluation::NotMet;
        }

        let duration = match condition.duration_sec {
            Some(duration) if duration > 0 => duration as i64,
            _ => return Evaluation::Met,
        };

        let pair = snapshot.token_pair();
        let window_start = now - duration;

        let anchor = match history.price_at(&pair, window_start).await {
            Ok(anchor) => anchor,
            Err(e) => return Evaluation::Undetermined(format!("price_at failed: {}", e)),
        };
        let samples = match history.prices_in_range(&pair, window_start, now).await {
            Ok(samples) => samples,
            Err(e) => return Evaluation::Undetermined(format!("prices_in_range failed: {}", e)),
        };

        let held = window_holds(bound, anchor, &samples, window_start, now, self.max_sample_gap_secs);
        debug!(
            ?bound,
            current,
            duration,
            samples = samples.len(),
            held,
            "Evaluated price window"
        );
        Evaluation::from_bool(held)
    }
}
