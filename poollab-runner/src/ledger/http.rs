//! Remote ledger over HTTP.
//!
//! `POST {write_url}/api/backtest/task`, `/api/backtest/log`,
//! `/api/backtest/result` and `/api/backtest/task/{id}/status`, each with a
//! JSON body and an `Idempotency-Key` header. The server answers `409` for a
//! key it has already applied.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use poollab_core::domain::{LogEvent, ResultRecord, Task};

use super::{Ledger, LedgerError, StatusUpdate, WriteOutcome};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const MAX_ERROR_BODY: usize = 512;

pub struct HttpLedger {
    client: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LedgerError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport {
                url: base_url.clone(),
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/backtest/{path}", self.base_url)
    }

    fn post<T: Serialize>(
        &self,
        path: &str,
        key: &str,
        body: &T,
        on_conflict: WriteOutcome,
    ) -> Result<WriteOutcome, LedgerError> {
        let url = self.url(path);
        let mut request = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, key)
            .json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().map_err(|e| LedgerError::Transport {
            url: url.clone(),
            detail: e.to_string(),
        })?;
        let status = resp.status();
        let text = if status.is_success() {
            String::new()
        } else {
            resp.text().unwrap_or_default()
        };
        classify(status, &url, &text, on_conflict)
    }
}

/// Map a response status to an outcome or error.
fn classify(
    status: StatusCode,
    url: &str,
    body: &str,
    on_conflict: WriteOutcome,
) -> Result<WriteOutcome, LedgerError> {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    if status.is_success() {
        Ok(WriteOutcome::Applied)
    } else if status == StatusCode::CONFLICT {
        Ok(on_conflict)
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(LedgerError::Server {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        })
    } else if status.is_client_error() {
        Err(LedgerError::Rejected {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        })
    } else {
        Err(LedgerError::InvalidResponse {
            url: url.to_string(),
            detail: format!("unexpected status {status}"),
        })
    }
}

impl Ledger for HttpLedger {
    fn name(&self) -> &str {
        "http"
    }

    fn create_task(&self, task: &Task) -> Result<WriteOutcome, LedgerError> {
        self.post("task", task.task_id.as_str(), task, WriteOutcome::Duplicate)
    }

    fn append_log(&self, event: &LogEvent) -> Result<WriteOutcome, LedgerError> {
        let key = format!("{}:{}", event.task_id, event.seq);
        self.post("log", &key, event, WriteOutcome::Duplicate)
    }

    fn write_result(&self, result: &ResultRecord) -> Result<WriteOutcome, LedgerError> {
        // a later write carrying the report path must not collide with the first
        let key = match &result.excel_path {
            Some(path) => format!("{}:{path}", result.result_id.0),
            None => result.result_id.0.clone(),
        };
        self.post("result", &key, result, WriteOutcome::Duplicate)
    }

    fn update_task_status(&self, update: &StatusUpdate) -> Result<WriteOutcome, LedgerError> {
        let path = format!("task/{}/status", update.task_id);
        let key = format!("{}:status", update.task_id);
        self.post(&path, &key, update, WriteOutcome::AlreadyTerminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use poollab_core::domain::{TaskId, TaskStatus};

    #[test]
    fn status_classification() {
        let ok = classify(StatusCode::CREATED, "u", "", WriteOutcome::Duplicate);
        assert_eq!(ok.unwrap(), WriteOutcome::Applied);

        let dup = classify(StatusCode::CONFLICT, "u", "", WriteOutcome::AlreadyTerminal);
        assert_eq!(dup.unwrap(), WriteOutcome::AlreadyTerminal);

        let err = classify(StatusCode::BAD_GATEWAY, "u", "upstream", WriteOutcome::Duplicate)
            .unwrap_err();
        assert!(err.is_retryable());

        let err = classify(StatusCode::UNPROCESSABLE_ENTITY, "u", "bad field", WriteOutcome::Duplicate)
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad field"));
    }

    #[test]
    fn long_error_bodies_are_cut() {
        let body = "x".repeat(10_000);
        let err = classify(StatusCode::BAD_REQUEST, "u", &body, WriteOutcome::Duplicate).unwrap_err();
        match err {
            LedgerError::Rejected { body, .. } => assert_eq!(body.len(), MAX_ERROR_BODY),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn urls_drop_trailing_slash() {
        let ledger = HttpLedger::new("http://ledger:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(ledger.base_url(), "http://ledger:8080");
        assert_eq!(ledger.url("task/t1/status"), "http://ledger:8080/api/backtest/task/t1/status");
    }

    #[test]
    fn unreachable_server_is_retryable() {
        let ledger = HttpLedger::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let update = StatusUpdate {
            task_id: TaskId::from("t1"),
            status: TaskStatus::Completed,
            error_message: None,
            completed_at: Some(Utc::now()),
        };
        let err = ledger.update_task_status(&update).unwrap_err();
        assert!(matches!(err, LedgerError::Transport { .. }), "{err}");
        assert!(err.is_retryable());
    }
}
