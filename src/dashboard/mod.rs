//! Client for the dashboard library service.
//!
//! The service stores saved dashboard layouts; this client consumes the
//! listing endpoint and the per-layout metadata update. Only the fields
//! the library view renders are modeled here.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("invalid dashboard service url: {0}")]
    InvalidUrl(String),
    #[error("dashboard name must not be empty")]
    EmptyName,
    #[error("dashboard service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("dashboard service returned an error: {0}")]
    Api(String),
}

/// One saved dashboard as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardListItem {
    pub id: String,
    pub layout_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DashboardListItem {
    /// List views fall back to the layout id when no name was saved.
    pub fn display_label(&self) -> &str {
        if self.name.is_empty() {
            &self.layout_id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListLayoutsResponse {
    #[serde(default)]
    layouts: Vec<DashboardListItem>,
}

#[derive(Debug, Serialize)]
struct MetadataUpdate<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

pub struct Client {
    http: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self, DashboardError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| DashboardError::InvalidUrl(format!("{base_url}: {e}")))?;

        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    /// Fetch all saved dashboards.
    pub async fn list_dashboards(&self) -> Result<Vec<DashboardListItem>, DashboardError> {
        let url = self.endpoint("layouts")?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(DashboardError::Api(format!(
                "list layouts returned {}",
                response.status()
            )));
        }

        let body: ListLayoutsResponse = response.json().await?;
        Ok(body.layouts)
    }

    /// Update the display name and description of a layout.
    ///
    /// The name is required and trimmed before sending; a name that is
    /// empty after trimming is rejected without a request. Passing no
    /// description leaves the stored description untouched.
    pub async fn set_metadata(
        &self,
        layout_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<(), DashboardError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DashboardError::EmptyName);
        }

        let url = self.endpoint(&format!("layouts/{layout_id}/metadata"))?;
        let response = self
            .http
            .put(url)
            .json(&MetadataUpdate { name, description })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DashboardError::Api(format!(
                "metadata update for {layout_id:?} returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url, DashboardError> {
        self.base_url
            .join(path)
            .map_err(|e| DashboardError::InvalidUrl(format!("{path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_item_deserializes_from_wire_format() {
        let item: DashboardListItem = serde_json::from_str(
            r#"{
                "id": "42",
                "layoutId": "layout-abc",
                "name": "Fleet overview",
                "description": "Per-region traffic",
                "isActive": true,
                "createdAt": "2024-01-01T00:00:00Z",
                "updatedAt": "2024-02-01T00:00:00Z"
            }"#,
        )
        .expect("deserializes");

        assert_eq!(item.layout_id, "layout-abc");
        assert!(item.is_active);
        assert!(item.created_at.is_some());
        assert_eq!(item.display_label(), "Fleet overview");
    }

    #[test]
    fn missing_optional_fields_default() {
        let item: DashboardListItem =
            serde_json::from_str(r#"{"id": "1", "layoutId": "layout-1"}"#).expect("deserializes");

        assert_eq!(item.name, "");
        assert_eq!(item.description, "");
        assert!(!item.is_active);
        assert!(item.created_at.is_none());
        // unnamed dashboards show their layout id
        assert_eq!(item.display_label(), "layout-1");
    }

    #[test]
    fn metadata_update_omits_absent_description() {
        let body = serde_json::to_value(MetadataUpdate {
            name: "renamed",
            description: None,
        })
        .expect("serializes");
        assert_eq!(body, serde_json::json!({"name": "renamed"}));

        let body = serde_json::to_value(MetadataUpdate {
            name: "renamed",
            description: Some("details"),
        })
        .expect("serializes");
        assert_eq!(
            body,
            serde_json::json!({"name": "renamed", "description": "details"})
        );
    }

    #[tokio::test]
    async fn blank_names_are_rejected_without_a_request() {
        // port 9 is discard; validation must fail before networking
        let client = Client::new("http://localhost:9").expect("builds");

        for name in ["", "   ", "\t\n"] {
            let result = client.set_metadata("layout-1", name, None).await;
            assert!(matches!(result, Err(DashboardError::EmptyName)));
        }
    }
}
