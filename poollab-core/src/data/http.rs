//! HTTP continuous-contract price source.
//!
//! `GET {base_url}/api/continuous/{SYMBOL}?start_date=..&end_date=..&limit=..`
//! returning `{"data": [{"trade_date": "2024-01-02", "close_ba": 123.4}, ...]}`.
//! Responses are kept in a small in-process cache keyed by (symbol, period).

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::provider::{normalize_series, trim_to_period, DataError, PricePoint, PriceSource};
use crate::period::Period;

const CACHE_CAPACITY: usize = 64;
const ROW_LIMIT: usize = 10_000;
/// Extra history fetched ahead of the window for rolling indicators.
const WARMUP_DAYS: i64 = 120;

#[derive(Debug, Deserialize)]
struct ContinuousResponse {
    #[serde(default)]
    data: Vec<ContinuousRow>,
}

#[derive(Debug, Deserialize)]
struct ContinuousRow {
    trade_date: String,
    close_ba: Option<f64>,
}

type CacheKey = (String, String);

#[derive(Default)]
struct ResponseCache {
    order: VecDeque<CacheKey>,
    entries: HashMap<CacheKey, Vec<PricePoint>>,
}

impl ResponseCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<PricePoint>> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: CacheKey, points: Vec<PricePoint>) {
        if self.entries.insert(key.clone(), points).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

pub struct HttpPriceSource {
    client: reqwest::blocking::Client,
    base_url: String,
    token: Option<String>,
    circuit_breaker: Arc<CircuitBreaker>,
    cache: Mutex<ResponseCache>,
}

impl HttpPriceSource {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            circuit_breaker,
            cache: Mutex::new(ResponseCache::default()),
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    fn url(&self, symbol: &str) -> String {
        format!("{}/api/continuous/{symbol}", self.base_url)
    }

    fn query(period: &Period) -> Vec<(&'static str, String)> {
        let today = Utc::now().date_naive();
        let mut query = vec![
            ("end_date", today.to_string()),
            ("limit", ROW_LIMIT.to_string()),
        ];
        if let Some(days) = period.lookback_days() {
            let start = today - ChronoDuration::days(i64::from(days) + WARMUP_DAYS);
            query.push(("start_date", start.to_string()));
        }
        query
    }

    fn fetch(&self, symbol: &str, period: &Period) -> Result<Vec<PricePoint>, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let mut request = self.client.get(self.url(symbol)).query(&Self::query(period));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = match request.send() {
            Ok(resp) => resp,
            Err(e) => {
                self.circuit_breaker.record_failure();
                return Err(DataError::NetworkUnreachable(e.to_string()));
            }
        };

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            self.circuit_breaker.record_success();
            return Err(DataError::InstrumentNotFound {
                instrument: symbol.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !status.is_success() {
            if status.is_server_error() {
                self.circuit_breaker.record_failure();
            }
            return Err(DataError::Http {
                status: status.as_u16(),
                instrument: symbol.to_string(),
            });
        }

        let body: ContinuousResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {symbol}: {e}"))
        })?;
        self.circuit_breaker.record_success();
        parse_rows(symbol, body.data)
    }
}

fn parse_rows(symbol: &str, rows: Vec<ContinuousRow>) -> Result<Vec<PricePoint>, DataError> {
    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        // accept both `2024-01-02` and `2024-01-02T00:00:00`
        let day = row.trade_date.get(..10).unwrap_or(&row.trade_date);
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
            DataError::ResponseFormatChanged(format!(
                "bad trade_date '{}' for {symbol}: {e}",
                row.trade_date
            ))
        })?;
        if let Some(price) = row.close_ba {
            points.push(PricePoint::new(date, price));
        }
    }
    Ok(normalize_series(points))
}

impl PriceSource for HttpPriceSource {
    fn name(&self) -> &str {
        "http_continuous"
    }

    fn get_price_series(
        &self,
        instrument: &str,
        period: &Period,
    ) -> Result<Vec<PricePoint>, DataError> {
        let symbol = instrument.to_ascii_uppercase();
        let key = (symbol.clone(), period.code().to_string());
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key);
        if let Some(points) = cached {
            return Ok(points);
        }

        let points = trim_to_period(self.fetch(&symbol, period)?, period);
        tracing::debug!(symbol = %symbol, period = %period, rows = points.len(), "fetched price series");
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, points.clone());
        Ok(points)
    }
}
