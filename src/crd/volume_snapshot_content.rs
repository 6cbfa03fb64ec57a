//! `VolumeSnapshotContent` — the controller's view of a physical
//! snapshot (spec §3). Cluster-scoped; owned by the sidecar for the
//! physical lifecycle and by the common reconciler for binding.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{DeletionPolicy, SnapshotError};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshotContent",
    status = "VolumeSnapshotContentStatus",
    shortname = "vsc",
    printcolumn = r#"{"name":"ReadyToUse","type":"boolean","jsonPath":".status.readyToUse"}"#,
    printcolumn = r#"{"name":"RestoreSize","type":"integer","jsonPath":".status.restoreSize"}"#,
    printcolumn = r#"{"name":"DeletionPolicy","type":"string","jsonPath":".spec.deletionPolicy"}"#,
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driver"}"#,
    printcolumn = r#"{"name":"VolumeSnapshotClass","type":"string","jsonPath":".spec.volumeSnapshotClassName"}"#,
    printcolumn = r#"{"name":"VolumeSnapshot","type":"string","jsonPath":".spec.volumeSnapshotRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSpec {
    pub source: VolumeSnapshotContentSource,

    /// Back-reference to the user-facing snapshot. The UID distinguishes
    /// a live binding from a stale one when the snapshot is recreated
    /// under the same name (spec I1, I2).
    pub volume_snapshot_ref: VolumeSnapshotRef,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    pub driver: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// A trimmed `ObjectReference`: only the three fields the binding
/// protocol actually needs (spec §3 `spec.volumeSnapshotRef`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
}

impl VolumeSnapshotRef {
    pub fn is_unbound(&self) -> bool {
        self.uid.is_empty()
    }

    pub fn matches(&self, name: &str, namespace: &str, uid: &str) -> bool {
        self.name.as_deref() == Some(name) && self.namespace.as_deref() == Some(namespace) && self.uid == uid
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSource {
    /// Set for dynamic provisioning: the sidecar creates the physical
    /// snapshot from this volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_handle: Option<String>,
    /// Set for pre-provisioned content: the physical snapshot already
    /// exists under this handle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,
}

impl VolumeSnapshotContentSource {
    pub fn is_pre_provisioned(&self) -> bool {
        self.snapshot_handle.is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
}

impl VolumeSnapshotContentStatus {
    pub fn has_handle(&self) -> bool {
        self.snapshot_handle.is_some()
    }
}

/// Annotation stamped by the common reconciler to tell the sidecar a
/// bound content should begin physical deletion (spec §4.6 step 6).
pub const SHOULD_DELETE_ANNOTATION: &str = "snapshot.storage.kubernetes.io/should-delete";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_ref_has_empty_uid() {
        let r = VolumeSnapshotRef::default();
        assert!(r.is_unbound());
        let bound = VolumeSnapshotRef {
            name: Some("s1".into()),
            namespace: Some("ns".into()),
            uid: "U1".into(),
        };
        assert!(!bound.is_unbound());
        assert!(bound.matches("s1", "ns", "U1"));
        assert!(!bound.matches("s1", "ns", "U2"));
    }
}
