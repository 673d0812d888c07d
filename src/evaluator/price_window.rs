use autopilot_types::PriceCondition;

use crate::market_data::PricePoint;

/// The single threshold of a price condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceBound {
    AtLeast(f64),
    AtMost(f64),
}

impl PriceBound {
    /// `None` unless exactly one of `gte`/`lte` is set.
    pub fn from_condition(condition: &PriceCondition) -> Option<Self> {
        match (condition.gte, condition.lte) {
            (Some(gte), None) => Some(PriceBound::AtLeast(gte)),
            (None, Some(lte)) => Some(PriceBound::AtMost(lte)),
            _ => None,
        }
    }

    pub fn holds(&self, price: f64) -> bool {
        match self {
            PriceBound::AtLeast(threshold) => price >= *threshold,
            PriceBound::AtMost(threshold) => price <= *threshold,
        }
    }
}

/// Whether `bound` held for the whole of `[window_start, now]`.
///
/// `anchor` is the sample in effect at `window_start` (the latest one at or
/// before it) and `samples` are the samples inside the window. The window only
/// counts as covered when the anchor exists and no two consecutive samples,
/// nor the last sample and `now`, are more than `max_gap_secs` apart. An
/// uncovered window never holds.
pub fn window_holds(
    bound: PriceBound,
    anchor: Option<PricePoint>,
    samples: &[PricePoint],
    window_start: i64,
    now: i64,
    max_gap_secs: u64,
) -> bool {
    let Some(anchor) = anchor else {
        return false;
    };
    if anchor.timestamp > window_start {
        return false;
    }

    let max_gap = max_gap_secs as i64;
    let mut previous = anchor.timestamp;
    for sample in std::iter::once(&anchor).chain(samples.iter()) {
        if sample.timestamp < previous || sample.timestamp - previous > max_gap {
            return false;
        }
        if !bound.holds(sample.price) {
            return false;
        }
        previous = sample.timestamp;
    }

    now - previous <= max_gap
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(samples: &[(i64, f64)]) -> Vec<PricePoint> {
        samples
            .iter()
            .map(|(timestamp, price)| PricePoint { timestamp: *timestamp, price: *price })
            .collect()
    }

    #[test]
    fn test_bound_from_condition() {
        let both = PriceCondition { gte: Some(1.0), lte: Some(2.0), duration_sec: None };
        let neither = PriceCondition { gte: None, lte: None, duration_sec: None };
        let gte = PriceCondition { gte: Some(1.0), lte: None, duration_sec: None };
        assert_eq!(PriceBound::from_condition(&both), None);
        assert_eq!(PriceBound::from_condition(&neither), None);
        assert_eq!(PriceBound::from_condition(&gte), Some(PriceBound::AtLeast(1.0)));
    }

    #[test]
    fn test_any_violating_sample_fails_window() {
        let base = points(&[(0, 11.0), (100, 12.0), (200, 11.5), (300, 10.5)]);
        let anchor = Some(PricePoint { timestamp: 0, price: 11.0 });

        for violating in 0..base.len() {
            let mut samples = base[1..].to_vec();
            let mut anchor = anchor;
            if violating == 0 {
                anchor = Some(PricePoint { timestamp: 0, price: 9.99 });
            } else {
                samples[violating - 1].price = 9.99;
            }
            assert!(
                !window_holds(PriceBound::AtLeast(10.0), anchor, &samples, 0, 350, 200),
                "violation at index {} must fail the window",
                violating
            );
        }
        assert!(window_holds(PriceBound::AtLeast(10.0), anchor, &base[1..], 0, 350, 200));
    }

    #[test]
    fn test_lte_window() {
        let samples = points(&[(50, 4.0), (100, 4.9)]);
        let anchor = Some(PricePoint { timestamp: 0, price: 3.0 });
        assert!(window_holds(PriceBound::AtMost(5.0), anchor, &samples, 0, 120, 60));
        assert!(!window_holds(PriceBound::AtMost(4.5), anchor, &samples, 0, 120, 60));
    }

    #[test]
    fn test_gaps_fail_closed() {
        let anchor = Some(PricePoint { timestamp: 0, price: 11.0 });
        // Gap of 500s inside the window
        let sparse = points(&[(500, 11.0)]);
        assert!(!window_holds(PriceBound::AtLeast(10.0), anchor, &sparse, 0, 550, 200));
        // Feed went quiet before now
        let stale = points(&[(100, 11.0)]);
        assert!(!window_holds(PriceBound::AtLeast(10.0), anchor, &stale, 0, 1000, 200));
        // No anchor covering the window start
        assert!(!window_holds(PriceBound::AtLeast(10.0), None, &stale, 0, 150, 200));
    }
}
