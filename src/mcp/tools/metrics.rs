//! Metric listing and query execution tools.

use regex::Regex;
use serde_json::{json, Value};

use super::arg_str;
use crate::prometheus::Client;
use crate::timerange;

pub async fn list_metrics(client: &Client, args: &Value) -> Result<Value, String> {
    let metrics = client
        .list_metrics()
        .await
        .map_err(|e| format!("failed to list metrics: {e}"))?;

    let metrics = match arg_str(args, "pattern") {
        Some(pattern) => {
            let pattern = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
            metrics
                .into_iter()
                .filter(|name| pattern.is_match(name))
                .collect()
        }
        None => metrics,
    };

    Ok(json!({ "metrics": metrics }))
}

pub async fn query_instant(client: &Client, args: &Value) -> Result<Value, String> {
    let query = arg_str(args, "query").ok_or("query parameter is required and must be a string")?;

    let time = arg_str(args, "time")
        .map(timerange::parse_timestamp)
        .transpose()
        .map_err(|e| e.to_string())?;

    let response = client
        .instant_query(query, time)
        .await
        .map_err(|e| format!("failed to execute instant query: {e}"))?;

    serde_json::to_value(&response).map_err(|e| e.to_string())
}

pub async fn query_range(client: &Client, args: &Value) -> Result<Value, String> {
    let query = arg_str(args, "query").ok_or("query parameter is required and must be a string")?;

    let range = timerange::resolve(
        arg_str(args, "start"),
        arg_str(args, "end"),
        arg_str(args, "duration"),
    )
    .map_err(|e| e.to_string())?;

    let step = arg_str(args, "step")
        .map(timerange::parse_duration)
        .transpose()
        .map_err(|e| e.to_string())?;

    let width = args
        .get("width")
        .and_then(Value::as_u64)
        .map(|w| w.min(u64::from(u32::MAX)) as u32);

    let response = client
        .range_query(query, &range, step, width)
        .await
        .map_err(|e| format!("failed to execute range query: {e}"))?;

    serde_json::to_value(&response).map_err(|e| e.to_string())
}
