//! `VolumeSnapshotClass` — driver name, opaque parameters, and a
//! default deletion policy (spec §3). Cluster-scoped. Zero-or-one class
//! per driver may be annotated as default (spec I7).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::DeletionPolicy;

/// Annotation marking a class as the default for its driver. Any value
/// other than `"true"` is treated as not-default (spec I7 tie-break is
/// evaluated by the common reconciler, not by schema).
pub const DEFAULT_CLASS_ANNOTATION: &str = "snapshot.storage.kubernetes.io/is-default-class";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshotClass",
    shortname = "vsclass",
    printcolumn = r#"{"name":"Driver","type":"string","jsonPath":".spec.driver"}"#,
    printcolumn = r#"{"name":"DeletionPolicy","type":"string","jsonPath":".spec.deletionPolicy"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClassSpec {
    pub driver: String,

    /// Opaque parameters; keys may reference secrets via the templated
    /// `csi.storage.k8s.io/snapshotter-secret-{name,namespace}` keys
    /// (spec §4.7).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

impl VolumeSnapshotClass {
    pub fn is_default(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}
