use std::sync::Arc;

use crate::registry::Direction;

/// Where a log-density contribution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// An explicit density statement.
    Explicit,
    /// An automatic change-of-variables correction.
    Jacobian(Direction),
}

/// One recorded addition to the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub source: Source,
    /// Target of the density statement, or the corrected variable.
    pub label: Arc<str>,
    pub log_value: f64,
}

/// Running log-density for exactly one evaluation.
///
/// The value is only ever changed by addition. Summation is compensated
/// (Neumaier) so long chains of small corrections next to large likelihood
/// terms do not lose precision.
#[derive(Debug, Clone, Default)]
pub struct LogDensityAccumulator {
    sum: f64,
    compensation: f64,
    contributions: Option<Vec<Contribution>>,
}

impl LogDensityAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An accumulator that also keeps a ledger of every contribution.
    pub fn recording() -> Self {
        Self {
            contributions: Some(Vec::new()),
            ..Self::default()
        }
    }

    /// Back to `log 1 = 0`. Keeps the recording mode.
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.compensation = 0.0;
        if let Some(ledger) = self.contributions.as_mut() {
            ledger.clear();
        }
    }

    pub fn add(&mut self, source: Source, label: &Arc<str>, log_value: f64) {
        let t = self.sum + log_value;
        if self.sum.abs() >= log_value.abs() {
            self.compensation += (self.sum - t) + log_value;
        } else {
            self.compensation += (log_value - t) + self.sum;
        }
        self.sum = t;

        if let Some(ledger) = self.contributions.as_mut() {
            ledger.push(Contribution {
                source,
                label: Arc::clone(label),
                log_value,
            });
        }
    }

    pub fn value(&self) -> f64 {
        let v = self.sum + self.compensation;
        // Compensation is meaningless once the sum has left the finite range.
        if v.is_nan() && !self.sum.is_nan() {
            self.sum
        } else {
            v
        }
    }

    pub fn is_recording(&self) -> bool {
        self.contributions.is_some()
    }

    pub fn contributions(&self) -> &[Contribution] {
        self.contributions.as_deref().unwrap_or(&[])
    }

    pub(crate) fn take_contributions(&mut self) -> Vec<Contribution> {
        self.contributions
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Sum of the recorded contributions coming from `source`.
    pub fn total_from(&self, source: Source) -> f64 {
        self.contributions()
            .iter()
            .filter(|c| c.source == source)
            .map(|c| c.log_value)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn test_starts_at_zero_and_adds() {
        let mut acc = LogDensityAccumulator::new();
        assert_eq!(acc.value(), 0.0);
        acc.add(Source::Explicit, &label("x"), -1.25);
        acc.add(Source::Jacobian(Direction::Forward), &label("y"), -0.5);
        assert!((acc.value() - (-1.75)).abs() < 1e-15);
        assert!(acc.contributions().is_empty());
    }

    #[test]
    fn test_reset_clears_value_and_ledger() {
        let mut acc = LogDensityAccumulator::recording();
        acc.add(Source::Explicit, &label("x"), 3.0);
        acc.reset();
        assert_eq!(acc.value(), 0.0);
        assert!(acc.contributions().is_empty());
        assert!(acc.is_recording());
    }

    #[test]
    fn test_compensated_sum_keeps_small_terms() {
        let mut acc = LogDensityAccumulator::new();
        acc.add(Source::Explicit, &label("big"), 1e16);
        for _ in 0..10 {
            acc.add(Source::Explicit, &label("small"), 1.0);
        }
        acc.add(Source::Explicit, &label("big"), -1e16);
        assert_eq!(acc.value(), 10.0);
    }

    #[test]
    fn test_total_from_splits_sources() {
        let mut acc = LogDensityAccumulator::recording();
        acc.add(Source::Explicit, &label("x"), -2.0);
        acc.add(Source::Jacobian(Direction::Backward), &label("y"), 0.25);
        acc.add(Source::Explicit, &label("y"), -1.0);
        assert_eq!(acc.total_from(Source::Explicit), -3.0);
        assert_eq!(acc.total_from(Source::Jacobian(Direction::Backward)), 0.25);
        assert_eq!(acc.contributions().len(), 3);
    }

    #[test]
    fn test_negative_infinity_propagates() {
        let mut acc = LogDensityAccumulator::new();
        acc.add(Source::Explicit, &label("x"), -1.0);
        acc.add(Source::Explicit, &label("x"), f64::NEG_INFINITY);
        assert_eq!(acc.value(), f64::NEG_INFINITY);
    }
}
