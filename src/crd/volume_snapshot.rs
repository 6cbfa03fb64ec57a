//! `VolumeSnapshot` — the user-facing request object (spec §3).
//!
//! Immutable after creation except through controller-owned fields
//! (status, finalizers, a handful of annotations). Exactly one of
//! `source.persistentVolumeClaimName` / `source.volumeSnapshotContentName`
//! must be set; which one determines the dynamic vs. pre-provisioned
//! path (spec §4.6 step 1).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::SnapshotError;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    namespaced,
    status = "VolumeSnapshotStatus",
    shortname = "vs",
    printcolumn = r#"{"name":"ReadyToUse","type":"boolean","jsonPath":".status.readyToUse"}"#,
    printcolumn = r#"{"name":"SourcePVC","type":"string","jsonPath":".spec.source.persistentVolumeClaimName"}"#,
    printcolumn = r#"{"name":"SourceSnapshotContent","type":"string","jsonPath":".spec.source.volumeSnapshotContentName"}"#,
    printcolumn = r#"{"name":"RestoreSize","type":"string","jsonPath":".status.restoreSize"}"#,
    printcolumn = r#"{"name":"SnapshotClass","type":"string","jsonPath":".spec.volumeSnapshotClassName"}"#,
    printcolumn = r#"{"name":"SnapshotContent","type":"string","jsonPath":".status.boundVolumeSnapshotContentName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    pub source: VolumeSnapshotSource,

    /// Class selector. If empty, a default class for the target driver
    /// is chosen during reconciliation (spec §4.6 step 3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Exactly one of these two fields must be set (enforced by the common
/// reconciler, not by the schema, matching webhook-enforced immutability
/// upstream rather than a schema-level oneOf).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

/// Which of the two source fields was set, and the referenced name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Dynamic { claim_name: String },
    PreProvisioned { content_name: String },
}

impl VolumeSnapshotSource {
    /// Spec §4.6 step 1: exactly one of `{claimName, contentName}` must
    /// be set.
    pub fn classify(&self) -> Result<SourceKind, String> {
        match (
            &self.persistent_volume_claim_name,
            &self.volume_snapshot_content_name,
        ) {
            (Some(claim), None) if !claim.is_empty() => Ok(SourceKind::Dynamic {
                claim_name: claim.clone(),
            }),
            (None, Some(content)) if !content.is_empty() => Ok(SourceKind::PreProvisioned {
                content_name: content.clone(),
            }),
            (None, None) => Err("exactly one of source.persistentVolumeClaimName or \
                source.volumeSnapshotContentName must be set, neither was"
                .to_string()),
            _ => Err("exactly one of source.persistentVolumeClaimName or \
                source.volumeSnapshotContentName must be set, both were"
                .to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bound_volume_snapshot_content_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
}

impl VolumeSnapshotStatus {
    pub fn is_bound(&self) -> bool {
        self.bound_volume_snapshot_content_name.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_requires_exactly_one_source() {
        let neither = VolumeSnapshotSource::default();
        assert!(neither.classify().is_err());

        let both = VolumeSnapshotSource {
            persistent_volume_claim_name: Some("c1".into()),
            volume_snapshot_content_name: Some("sc1".into()),
        };
        assert!(both.classify().is_err());

        let dynamic = VolumeSnapshotSource {
            persistent_volume_claim_name: Some("c1".into()),
            volume_snapshot_content_name: None,
        };
        assert_eq!(
            dynamic.classify().unwrap(),
            SourceKind::Dynamic {
                claim_name: "c1".into()
            }
        );
    }
}
