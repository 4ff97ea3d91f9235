//! Dashboard library tools.

use serde_json::{json, Value};

use super::arg_str;
use crate::dashboard::Client;

fn require_client(client: Option<&Client>) -> Result<&Client, String> {
    client.ok_or_else(|| "dashboard service is not configured (set --dashboard-url)".to_string())
}

pub async fn list_dashboards(client: Option<&Client>, _args: &Value) -> Result<Value, String> {
    let client = require_client(client)?;

    let layouts = client
        .list_dashboards()
        .await
        .map_err(|e| format!("failed to list dashboards: {e}"))?;

    Ok(json!({ "layouts": layouts }))
}

pub async fn set_dashboard_metadata(client: Option<&Client>, args: &Value) -> Result<Value, String> {
    let client = require_client(client)?;

    let layout_id =
        arg_str(args, "layout_id").ok_or("layout_id parameter is required and must be a string")?;
    // the client trims and validates the name; pass blanks through so the
    // error is consistent with the HTTP path
    let name = args
        .get("name")
        .and_then(Value::as_str)
        .ok_or("name parameter is required and must be a string")?;
    let description = arg_str(args, "description");

    client
        .set_metadata(layout_id, name, description)
        .await
        .map_err(|e| format!("failed to update dashboard metadata: {e}"))?;

    Ok(json!({ "layoutId": layout_id, "name": name.trim() }))
}
