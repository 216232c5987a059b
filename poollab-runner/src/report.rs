//! Task reports. Generated at most once per task, after ranking.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult};
use thiserror::Error;

use poollab_core::domain::{ResultRecord, ResultType, TaskId};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Render(#[from] anyhow::Error),
}

pub trait ReportGenerator: Send + Sync {
    /// Render the results and return where the report was written.
    fn generate(&self, task_id: &TaskId, results: &[ResultRecord]) -> Result<PathBuf, ReportError>;
}

/// Writes `<output_dir>/<task_id>.csv`.
#[derive(Debug, Clone)]
pub struct CsvReportGenerator {
    output_dir: PathBuf,
}

impl CsvReportGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ReportGenerator for CsvReportGenerator {
    fn generate(&self, task_id: &TaskId, results: &[ResultRecord]) -> Result<PathBuf, ReportError> {
        let path = self.output_dir.join(format!("{task_id}.csv"));
        let body = render_csv(results)?;
        fs::create_dir_all(&self.output_dir).map_err(|source| ReportError::Io {
            path: self.output_dir.clone(),
            source,
        })?;
        fs::write(&path, body).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(%task_id, path = %path.display(), rows = results.len(), "report written");
        Ok(path)
    }
}

/// Columns: rank, result_type, period, model, positions, weights,
/// sharpe_ratio, max_drawdown, total_return, annualized_return,
/// annualized_volatility, n_days, params
pub fn render_csv(results: &[ResultRecord]) -> AnyResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "rank",
        "result_type",
        "period",
        "model",
        "positions",
        "weights",
        "sharpe_ratio",
        "max_drawdown",
        "total_return",
        "annualized_return",
        "annualized_volatility",
        "n_days",
        "params",
    ])?;

    for r in results {
        let (kind, weights, params) = match r.result_type {
            ResultType::Strategy => (
                "strategy",
                String::new(),
                serde_json::to_string(&r.params).context("failed to encode params")?,
            ),
            ResultType::Portfolio => (
                "portfolio",
                r.weights()
                    .iter()
                    .map(|w| format!("{w:+.4}"))
                    .collect::<Vec<_>>()
                    .join(";"),
                String::new(),
            ),
        };
        let positions = match &r.portfolio_positions {
            Some(members) => members.join(";"),
            None => r.position_name.clone().unwrap_or_default(),
        };
        let m = &r.metrics;
        let row: Vec<String> = vec![
            r.rank.map(|k| k.to_string()).unwrap_or_default(),
            kind.to_string(),
            r.period.clone(),
            r.portfolio_model.clone().unwrap_or_default(),
            positions,
            weights,
            format!("{:.4}", m.sharpe_ratio),
            format!("{:.4}", m.max_drawdown),
            format!("{:.4}", m.total_return),
            format!("{:.4}", m.annualized_return),
            format!("{:.4}", m.annualized_volatility),
            m.n_days.to_string(),
            params,
        ];
        wtr.write_record(&row)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}
