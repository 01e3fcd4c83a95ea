//! Controller Protocol
//!
//! Endpoint paths and payload formats used to talk to the controller's
//! label API.

use serde::Deserialize;

/// Path of the label query endpoint
pub const GET_LABELS_PATH: &str = "/plugin/swarm/getSlaveLabels";

/// Path of the label append endpoint
pub const ADD_LABELS_PATH: &str = "/plugin/swarm/addSlaveLabels";

/// Path of the label removal endpoint
pub const REMOVE_LABELS_PATH: &str = "/plugin/swarm/removeSlaveLabels";

/// Path of the CSRF crumb issuer
pub const CRUMB_PATH: &str = "/crumbIssuer/api/json";

/// Label mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMutation {
    Add,
    Remove,
}

impl LabelMutation {
    pub fn path(&self) -> &'static str {
        match self {
            LabelMutation::Add => ADD_LABELS_PATH,
            LabelMutation::Remove => REMOVE_LABELS_PATH,
        }
    }
}

impl std::fmt::Display for LabelMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelMutation::Add => write!(f, "add"),
            LabelMutation::Remove => write!(f, "remove"),
        }
    }
}

/// XML document returned by the label query endpoint
#[derive(Debug, Clone, Deserialize)]
struct LabelsDocument {
    labels: Option<String>,
}

/// Extract the `labels` field from a label query response
pub fn parse_labels_document(xml: &str) -> Result<String, String> {
    let document: LabelsDocument =
        quick_xml::de::from_str(xml).map_err(|e| format!("invalid XML: {}", e))?;

    document
        .labels
        .ok_or_else(|| "missing <labels> element".to_string())
}

/// CSRF crumb handed out by the controller
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crumb {
    pub crumb_request_field: String,
    pub crumb: String,
}

/// Join a base URL and an endpoint path without doubling slashes
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
