// Tool implementations for the MCP server.

mod dashboards;
mod metrics;

pub use dashboards::*;
pub use metrics::*;

use serde_json::Value;

/// Fetch a string argument, treating empty strings as absent.
pub(crate) fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}
