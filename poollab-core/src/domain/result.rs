//! Scored outcomes of strategy evaluation and portfolio composition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{ResultId, TaskId};
use crate::metrics::PerformanceMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Strategy,
    Portfolio,
}

/// One scored result row.
///
/// Immutable after creation apart from the report path and rank, which are
/// attached by later pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub result_id: ResultId,
    pub task_id: TaskId,
    pub result_type: ResultType,
    /// Strategy results: the evaluated unit.
    pub position_name: Option<String>,
    /// Portfolio results: member units in pool order.
    pub portfolio_positions: Option<Vec<String>>,
    pub portfolio_model: Option<String>,
    pub period: String,
    /// Strategy parameters, or each member's signed weight for portfolios.
    pub params: BTreeMap<String, f64>,
    pub metrics: PerformanceMetrics,
    pub excel_path: Option<String>,
    /// Smart-mode portfolio results only, 1 = best.
    pub rank: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn strategy(
        task_id: &TaskId,
        position_name: &str,
        period: &str,
        params: BTreeMap<String, f64>,
        metrics: PerformanceMetrics,
    ) -> Self {
        let result_id = ResultId::derive(&[task_id.as_str(), "strategy", position_name, period]);
        Self {
            result_id,
            task_id: task_id.clone(),
            result_type: ResultType::Strategy,
            position_name: Some(position_name.to_string()),
            portfolio_positions: None,
            portfolio_model: None,
            period: period.to_string(),
            params,
            metrics,
            excel_path: None,
            rank: None,
            created_at: Utc::now(),
        }
    }

    /// Portfolio result. `weights` pairs each member with its signed weight,
    /// in pool order.
    pub fn portfolio(
        task_id: &TaskId,
        weights: &[(String, f64)],
        model: &str,
        period: &str,
        metrics: PerformanceMetrics,
    ) -> Self {
        let members: Vec<String> = weights.iter().map(|(name, _)| name.clone()).collect();
        let joined = members.join(",");
        let result_id =
            ResultId::derive(&[task_id.as_str(), "portfolio", &joined, period, model]);
        Self {
            result_id,
            task_id: task_id.clone(),
            result_type: ResultType::Portfolio,
            position_name: None,
            portfolio_positions: Some(members),
            portfolio_model: Some(model.to_string()),
            period: period.to_string(),
            params: weights.iter().cloned().collect(),
            metrics,
            excel_path: None,
            rank: None,
            created_at: Utc::now(),
        }
    }

    /// Member weights aligned with `portfolio_positions`.
    pub fn weights(&self) -> Vec<f64> {
        self.portfolio_positions
            .as_ref()
            .map(|members| {
                members
                    .iter()
                    .map(|m| self.params.get(m).copied().unwrap_or(0.0))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of units in the result (1 for strategy results).
    pub fn size(&self) -> usize {
        self.portfolio_positions.as_ref().map_or(1, Vec::len)
    }

    pub fn label(&self) -> String {
        match (&self.position_name, &self.portfolio_positions) {
            (Some(name), _) => name.clone(),
            (None, Some(members)) => members.join(" + "),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portfolio_weights_follow_member_order() {
        let r = ResultRecord::portfolio(
            &TaskId::from("t1"),
            &[("空AG".into(), -0.5), ("多AU".into(), 0.5)],
            "equal_weight",
            "5y",
            PerformanceMetrics::default(),
        );
        assert_eq!(
            r.portfolio_positions.as_deref(),
            Some(&["空AG".to_string(), "多AU".to_string()][..])
        );
        assert_eq!(r.weights(), vec![-0.5, 0.5]);
        assert_eq!(r.rank, None);
        assert_eq!(r.size(), 2);
    }

    #[test]
    fn ids_are_stable_across_constructions() {
        let a = ResultRecord::strategy(&TaskId::from("t"), "多AU", "3y", BTreeMap::new(), PerformanceMetrics::default());
        let b = ResultRecord::strategy(&TaskId::from("t"), "多AU", "3y", BTreeMap::new(), PerformanceMetrics::default());
        let c = ResultRecord::strategy(&TaskId::from("t"), "多AU", "5y", BTreeMap::new(), PerformanceMetrics::default());
        assert_eq!(a.result_id, b.result_id);
        assert_ne!(a.result_id, c.result_id);
    }
}
