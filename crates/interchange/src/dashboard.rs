//! Serde model of the dashboard configuration document.
//!
//! ```json
//! {
//!   "meta": {"name": "My Dashboard", "url": "owner/my-dashboard"},
//!   "queries": [
//!     {"id": 1, "name": "Q1", "network": "mainnet", "query_file": "q1.sql",
//!      "parameters": [{"key": "N", "type": "number", "value": 5}]}
//!   ]
//! }
//! ```
//!
//! The same model is produced from a remote `FindDashboard` response, with
//! SQL carried inline in `query` rather than in `query_file`.

use serde::{Deserialize, Serialize};

use crate::decode::DecodeError;
use crate::types::{Network, ParameterError, ParameterType, QueryParameter};

/// Top-level dashboard document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub meta: DashboardMeta,
    pub queries: Vec<QueryEntry>,
}

/// Name and location of a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardMeta {
    pub name: String,
    /// Path of the dashboard under the service's base URL (`owner/slug`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl DashboardMeta {
    /// `url` if given, otherwise the owner's profile path.
    pub fn slug(&self) -> String {
        match (&self.url, &self.owner) {
            (Some(url), _) => url.trim_start_matches('/').to_string(),
            (None, Some(owner)) => owner.clone(),
            (None, None) => String::new(),
        }
    }
}

/// One query of a dashboard.
///
/// Exactly one of `query_file` and `query` is expected; `requires` names a
/// base SQL file prepended to the query body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEntry {
    pub id: u64,
    pub name: String,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterEntry>,
}

/// A parameter binding as written in configuration; `value` may be a
/// JSON string or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub value: serde_json::Value,
}

impl ParameterEntry {
    pub fn to_parameter(&self) -> Result<QueryParameter, ParameterError> {
        QueryParameter::parse(&self.key, self.kind, &self.value)
    }
}

impl From<&QueryParameter> for ParameterEntry {
    fn from(p: &QueryParameter) -> Self {
        ParameterEntry {
            key: p.key().to_string(),
            kind: p.kind(),
            value: serde_json::Value::String(p.value().to_string()),
        }
    }
}

impl DashboardConfig {
    /// Build the configuration model from the `data` member of a
    /// `FindDashboard` response. Returns `Ok(None)` when no dashboard matched.
    ///
    /// Widgets without a query (text boxes) are skipped, and several widgets
    /// visualising the same query collapse into a single entry.
    pub fn from_remote(data: &serde_json::Value) -> Result<Option<DashboardConfig>, DecodeError> {
        let dashboards = data
            .get("dashboards")
            .and_then(|d| d.as_array())
            .ok_or_else(|| missing("dashboards"))?;
        let Some(dashboard) = dashboards.first() else {
            return Ok(None);
        };

        let name = dashboard
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| missing("dashboards.name"))?
            .to_string();
        let slug = dashboard.get("slug").and_then(|v| v.as_str());
        let owner = dashboard
            .get("user")
            .and_then(|u| u.get("name"))
            .and_then(|v| v.as_str());

        let widgets = dashboard
            .get("visualization_widgets")
            .and_then(|w| w.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut queries: Vec<QueryEntry> = Vec::new();
        for widget in widgets {
            let Some(details) = widget
                .get("visualization")
                .and_then(|v| v.get("query_details"))
                .filter(|d| !d.is_null())
            else {
                continue;
            };
            let entry = parse_query_details(details)?;
            if queries.iter().all(|q| q.id != entry.id) {
                queries.push(entry);
            }
        }

        Ok(Some(DashboardConfig {
            meta: DashboardMeta {
                name,
                url: match (owner, slug) {
                    (Some(owner), Some(slug)) => Some(format!("{}/{}", owner, slug)),
                    _ => None,
                },
                owner: owner.map(str::to_string),
            },
            queries,
        }))
    }
}

fn parse_query_details(details: &serde_json::Value) -> Result<QueryEntry, DecodeError> {
    let id = details
        .get("query_id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| missing("query_details.query_id"))?;
    let name = details
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing("query_details.name"))?;
    let query = details
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing("query_details.query"))?;
    let network = details
        .get("dataset_id")
        .and_then(|v| v.as_u64())
        .and_then(Network::from_dataset_id)
        .ok_or_else(|| missing("query_details.dataset_id"))?;
    let parameters = match details.get("parameters") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(raw) => serde_json::from_value::<Vec<ParameterEntry>>(raw.clone())
            .map_err(|_| missing("query_details.parameters"))?,
    };

    Ok(QueryEntry {
        id,
        name: name.to_string(),
        network,
        query_file: None,
        query: Some(query.to_string()),
        requires: None,
        parameters,
    })
}

fn missing(field: &str) -> DecodeError {
    DecodeError::MissingField {
        field: field.to_string(),
    }
}
