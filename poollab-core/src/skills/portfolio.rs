//! Portfolio composer contract and model registry.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::equal_weight::EqualWeight;
use super::error::SkillError;
use super::mean_variance::MeanVariance;
use super::series::align;
use super::strategy::StrategyEvaluation;
use crate::metrics::PerformanceMetrics;

/// A unit together with its cached strategy evaluation.
pub type EvaluatedUnit = Arc<StrategyEvaluation>;

/// Weights and aggregate metrics of one composed portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    /// Member canonical text and signed weight, in input order.
    pub weights: Vec<(String, f64)>,
    pub metrics: PerformanceMetrics,
}

/// Computes weights for a subset of evaluated units under one model.
pub trait PortfolioComposer: Send + Sync {
    /// Model identifier, e.g. `equal_weight`.
    fn model(&self) -> &str;

    fn compose(&self, units: &[EvaluatedUnit]) -> Result<Composition, SkillError>;
}

/// Direction-adjusted unit returns on their common dates.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedReturns {
    pub dates: Vec<NaiveDate>,
    /// One column per unit, in input order.
    pub columns: Vec<Vec<f64>>,
}

impl AlignedReturns {
    /// Inner-join the units' return series. Fewer than two common dates is
    /// insufficient data.
    pub fn from_units(units: &[EvaluatedUnit]) -> Result<Self, SkillError> {
        let subject = members_label(units);
        let period = units
            .first()
            .map(|u| u.period.code().to_string())
            .unwrap_or_default();
        if units.is_empty() {
            return Err(SkillError::Evaluation {
                subject,
                detail: "empty portfolio".into(),
            });
        }
        let series: Vec<_> = units.iter().map(|u| &u.returns).collect();
        let (dates, columns) = align(&series);
        if dates.len() < 2 {
            return Err(SkillError::InsufficientData {
                subject,
                period,
                detail: format!("only {} common date(s) across members", dates.len()),
            });
        }
        Ok(Self { dates, columns })
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Daily portfolio returns for exposure magnitudes `abs_weights`.
    pub fn portfolio_returns(&self, abs_weights: &[f64]) -> Vec<f64> {
        (0..self.len())
            .map(|t| {
                self.columns
                    .iter()
                    .zip(abs_weights)
                    .map(|(col, w)| col[t] * w)
                    .sum()
            })
            .collect()
    }
}

pub(crate) fn members_label(units: &[EvaluatedUnit]) -> String {
    units
        .iter()
        .map(|u| u.unit.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Attach each unit's direction sign to its exposure magnitude.
pub(crate) fn signed_weights(units: &[EvaluatedUnit], abs_weights: &[f64]) -> Vec<(String, f64)> {
    units
        .iter()
        .zip(abs_weights)
        .map(|(u, w)| (u.unit.to_string(), u.unit.direction().sign() * w))
        .collect()
}

/// Composers by model id.
#[derive(Clone, Default)]
pub struct ComposerRegistry {
    composers: BTreeMap<String, Arc<dyn PortfolioComposer>>,
}

impl ComposerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `equal_weight` and `mean_variance`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EqualWeight));
        registry.register(Arc::new(MeanVariance::default()));
        registry
    }

    /// Register or replace the composer for its model id.
    pub fn register(&mut self, composer: Arc<dyn PortfolioComposer>) {
        self.composers.insert(composer.model().to_string(), composer);
    }

    pub fn models(&self) -> Vec<&str> {
        self.composers.keys().map(String::as_str).collect()
    }

    pub fn get(&self, model: &str) -> Result<Arc<dyn PortfolioComposer>, SkillError> {
        self.composers
            .get(model)
            .cloned()
            .ok_or_else(|| SkillError::UnsupportedModel {
                model: model.to_string(),
                available: self.models().join(", "),
            })
    }

    pub fn compose(&self, units: &[EvaluatedUnit], model: &str) -> Result<Composition, SkillError> {
        self.get(model)?.compose(units)
    }
}

impl std::fmt::Debug for ComposerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposerRegistry")
            .field("models", &self.models())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::unit_with_returns;
    use super::*;

    #[test]
    fn unknown_model_is_unsupported() {
        let registry = ComposerRegistry::with_defaults();
        let units = vec![unit_with_returns("多AU", &[0.01, 0.02, -0.01])];
        let err = registry.compose(&units, "risk_parity").unwrap_err();
        match err {
            SkillError::UnsupportedModel { model, available } => {
                assert_eq!(model, "risk_parity");
                assert_eq!(available, "equal_weight, mean_variance");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn custom_models_register_without_engine_changes() {
        struct First;
        impl PortfolioComposer for First {
            fn model(&self) -> &str {
                "first_only"
            }
            fn compose(&self, units: &[EvaluatedUnit]) -> Result<Composition, SkillError> {
                let mut w = vec![0.0; units.len()];
                w[0] = 1.0;
                let aligned = AlignedReturns::from_units(units)?;
                Ok(Composition {
                    weights: signed_weights(units, &w),
                    metrics: PerformanceMetrics::from_returns(&aligned.portfolio_returns(&w)),
                })
            }
        }

        let mut registry = ComposerRegistry::with_defaults();
        registry.register(Arc::new(First));
        let units = vec![
            unit_with_returns("空AG", &[0.01, 0.02, -0.01]),
            unit_with_returns("多AU", &[0.03, 0.01, 0.0]),
        ];
        let c = registry.compose(&units, "first_only").unwrap();
        assert_eq!(c.weights, vec![("空AG".into(), -1.0), ("多AU".into(), 0.0)]);
    }

    #[test]
    fn too_few_common_dates_is_insufficient() {
        let a = unit_with_returns("多AU", &[0.01]);
        let err = AlignedReturns::from_units(&[a]).unwrap_err();
        assert!(matches!(err, SkillError::InsufficientData { .. }));
    }
}
