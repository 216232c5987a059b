use thiserror::Error;

use crate::data::DataError;
use crate::position::ParseError;

/// How a supervisor should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Re-invoking the same call may succeed.
    Retryable,
    /// Re-invoking cannot help; escalate at once.
    Fatal,
}

/// Failures raised by skills (strategy evaluators and portfolio composers).
#[derive(Debug, Clone, Error)]
pub enum SkillError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("insufficient data for {subject} over {period}: {detail}")]
    InsufficientData {
        subject: String,
        period: String,
        detail: String,
    },

    #[error("evaluation of {subject} failed: {detail}")]
    Evaluation { subject: String, detail: String },

    #[error("unsupported portfolio model '{model}' (available: {available})")]
    UnsupportedModel { model: String, available: String },
}

impl SkillError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            SkillError::Parse(_) | SkillError::UnsupportedModel { .. } => FailureClass::Fatal,
            SkillError::InsufficientData { .. } | SkillError::Evaluation { .. } => {
                FailureClass::Retryable
            }
        }
    }

    /// Short machine-readable tag for log payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SkillError::Parse(_) => "parse",
            SkillError::InsufficientData { .. } => "insufficient_data",
            SkillError::Evaluation { .. } => "evaluation",
            SkillError::UnsupportedModel { .. } => "unsupported_model",
        }
    }

    pub(crate) fn from_data(subject: &str, period: &str, err: DataError) -> Self {
        if err.is_missing_data() {
            SkillError::InsufficientData {
                subject: subject.to_string(),
                period: period.to_string(),
                detail: err.to_string(),
            }
        } else {
            SkillError::Evaluation {
                subject: subject.to_string(),
                detail: err.to_string(),
            }
        }
    }
}
