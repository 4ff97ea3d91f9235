//! Client for a Prometheus-compatible query backend.
//!
//! Wraps the standard HTTP API: metric name listing, instant queries, and
//! range queries. Range queries take a resolved [`TimeRangeValue`] plus an
//! optional step; when no step is given one is derived from the rendered
//! chart width. Guardrails, when configured, veto queries before any
//! request is sent.

use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::promql::{Guardrails, PromqlError};
use crate::timerange::{self, TimeRangeError, TimeRangeValue};

/// Chart width assumed when the caller supplies neither step nor width.
pub const DEFAULT_WIDTH_PX: u32 = 1000;

#[derive(Debug, Error)]
pub enum PrometheusError {
    #[error("invalid prometheus url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Query(#[from] PromqlError),
    #[error(transparent)]
    TimeRange(#[from] TimeRangeError),
    #[error("prometheus request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("prometheus returned an error: {0}")]
    Api(String),
}

pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    guardrails: Option<Guardrails>,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self, PrometheusError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| PrometheusError::InvalidUrl(format!("{base_url}: {e}")))?;

        // joins against the base replace the last path segment unless the
        // path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            guardrails: None,
        })
    }

    pub fn with_guardrails(mut self, guardrails: Option<Guardrails>) -> Self {
        self.guardrails = guardrails;
        self
    }

    /// List metric names seen over the last hour.
    pub async fn list_metrics(&self) -> Result<Vec<String>, PrometheusError> {
        let end = Utc::now();
        let start = end - Duration::hours(1);

        let url = self.endpoint("api/v1/label/__name__/values")?;
        let response: LabelValuesResponse = self
            .http
            .get(url)
            .query(&[("start", start.to_rfc3339()), ("end", end.to_rfc3339())])
            .send()
            .await?
            .json()
            .await?;

        if response.status != "success" {
            return Err(PrometheusError::Api(
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(response.data)
    }

    /// Evaluate a query at a single point in time, defaulting to now.
    pub async fn instant_query(
        &self,
        query: &str,
        time: Option<DateTime<Utc>>,
    ) -> Result<QueryResponse, PrometheusError> {
        self.check_guardrails(query)?;

        let mut params = vec![("query".to_string(), query.to_string())];
        if let Some(time) = time {
            params.push(("time".to_string(), time.to_rfc3339()));
        }

        let url = self.endpoint("api/v1/query")?;
        let raw: RawResponse = self
            .http
            .get(url)
            .query(&params)
            .send()
            .await?
            .json()
            .await?;

        raw.into_result()
    }

    /// Evaluate a query over a resolved time range.
    ///
    /// `step` wins when given; otherwise the step is suggested from
    /// `width_px` (the rendered chart width, defaulting to
    /// [`DEFAULT_WIDTH_PX`]). Relative ranges are anchored at the current
    /// time.
    pub async fn range_query(
        &self,
        query: &str,
        range: &TimeRangeValue,
        step: Option<Duration>,
        width_px: Option<u32>,
    ) -> Result<QueryResponse, PrometheusError> {
        self.check_guardrails(query)?;

        let (start, end) = range.window_at(Utc::now())?;
        let step = step.unwrap_or_else(|| {
            timerange::suggested_step(width_px.unwrap_or(DEFAULT_WIDTH_PX), start, end)
        });

        let params = vec![
            ("query".to_string(), query.to_string()),
            ("start".to_string(), start.to_rfc3339()),
            ("end".to_string(), end.to_rfc3339()),
            ("step".to_string(), format_step(step)),
        ];

        let url = self.endpoint("api/v1/query_range")?;
        let raw: RawResponse = self
            .http
            .get(url)
            .query(&params)
            .send()
            .await?
            .json()
            .await?;

        raw.into_result()
    }

    fn check_guardrails(&self, query: &str) -> Result<(), PrometheusError> {
        if let Some(guardrails) = &self.guardrails {
            guardrails.check(query)?;
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url, PrometheusError> {
        self.base_url
            .join(path)
            .map_err(|e| PrometheusError::InvalidUrl(format!("{path}: {e}")))
    }
}

/// Step as fractional seconds, the format the query API accepts.
fn format_step(step: Duration) -> String {
    format!("{}", (step.num_milliseconds().max(1) as f64) / 1000.0)
}

#[derive(Debug, Deserialize)]
struct LabelValuesResponse {
    status: String,
    #[serde(default)]
    data: Vec<String>,
    error: Option<String>,
}

/// Raw query API envelope, before status checking.
#[derive(Debug, Deserialize)]
struct RawResponse {
    status: String,
    #[serde(default)]
    warnings: Vec<String>,
    data: Option<QueryData>,
    error: Option<String>,
    #[serde(rename = "errorType")]
    error_type: Option<String>,
}

impl RawResponse {
    fn into_result(self) -> Result<QueryResponse, PrometheusError> {
        if self.status != "success" {
            let message = self.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(PrometheusError::Api(match self.error_type {
                Some(kind) => format!("{kind}: {message}"),
                None => message,
            }));
        }

        let data = self
            .data
            .ok_or_else(|| PrometheusError::Api("missing data in response".to_string()))?;

        Ok(QueryResponse {
            data,
            warnings: self.warnings,
        })
    }
}

/// A successful query result.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub data: QueryData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum QueryData {
    Matrix(Vec<MatrixResult>),
    Vector(Vec<VectorResult>),
    Scalar(Sample),
    String(Sample),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatrixResult {
    pub metric: HashMap<String, String>,
    pub values: Vec<Sample>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VectorResult {
    pub metric: HashMap<String, String>,
    pub value: Sample,
}

/// `[unix_seconds, "value"]` pair as returned by the query API.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample(pub f64, pub String);
