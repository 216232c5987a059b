use super::error::SkillError;
use super::portfolio::{signed_weights, AlignedReturns, Composition, EvaluatedUnit, PortfolioComposer};
use crate::metrics::PerformanceMetrics;

/// `1/n` exposure per member, signed by the member's direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeight;

impl EqualWeight {
    pub const MODEL: &'static str = "equal_weight";

    pub(crate) fn magnitudes(n: usize) -> Vec<f64> {
        vec![1.0 / n as f64; n]
    }
}

impl PortfolioComposer for EqualWeight {
    fn model(&self) -> &str {
        Self::MODEL
    }

    fn compose(&self, units: &[EvaluatedUnit]) -> Result<Composition, SkillError> {
        let aligned = AlignedReturns::from_units(units)?;
        let magnitudes = Self::magnitudes(units.len());
        Ok(Composition {
            weights: signed_weights(units, &magnitudes),
            metrics: PerformanceMetrics::from_returns(&aligned.portfolio_returns(&magnitudes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::portfolio::test_support::unit_with_returns;

    #[test]
    fn long_short_pair_gets_opposite_halves() {
        let units = vec![
            unit_with_returns("多AU", &[0.01, 0.02, -0.01, 0.0]),
            unit_with_returns("空AG", &[0.03, -0.02, 0.01, 0.02]),
        ];
        let c = EqualWeight.compose(&units).unwrap();
        assert_eq!(c.weights, vec![("多AU".into(), 0.5), ("空AG".into(), -0.5)]);
        assert_eq!(c.metrics.n_days, 4);
        // mean of the two series each day
        let expected = PerformanceMetrics::from_returns(&[0.02, 0.0, 0.0, 0.01]);
        assert!((c.metrics.total_return - expected.total_return).abs() < 1e-12);
    }
}
