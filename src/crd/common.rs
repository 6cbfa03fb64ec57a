use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether the sidecar deletes the physical snapshot when its content is
/// removed, or merely releases the content and leaves the snapshot on
/// the storage system.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum DeletionPolicy {
    Retain,
    #[default]
    Delete,
}

/// A structured, user-visible, secret-free error recorded onto status
/// (spec §7 "user-visible failure behavior").
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SnapshotError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            time: Some(chrono::Utc::now().to_rfc3339()),
            message: Some(message.into()),
        }
    }
}
