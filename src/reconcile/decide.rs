//! Pure decision logic for the common reconciler (spec §4.6).
//!
//! Every function here is a plain transformation from observed state to
//! a decision; no I/O. Keeping the binding/class/state-machine rules free
//! of the object store and driver makes them exhaustively unit-testable
//! (spec §8) without standing up a fake API server.

use kube::Resource;

use crate::crd::{SourceKind, VolumeSnapshot, VolumeSnapshotClass, VolumeSnapshotContent};
use crate::error::{Error, Result};

/// Spec §4.6 step 3: zero or more-than-one default class for a driver is
/// a terminal error; the controller never picks one on its own.
pub fn resolve_default_class<'a>(
    classes: &'a [VolumeSnapshotClass],
    driver: &str,
) -> Result<&'a VolumeSnapshotClass> {
    let mut defaults = classes.iter().filter(|c| c.spec.driver == driver && c.is_default());
    match (defaults.next(), defaults.next()) {
        (Some(c), None) => Ok(c),
        (None, _) => Err(Error::Validation(format!(
            "no default VolumeSnapshotClass found for driver {driver}"
        ))),
        (Some(_), Some(_)) => Err(Error::Validation(format!(
            "found more than one default VolumeSnapshotClass for driver {driver}"
        ))),
    }
}

/// Spec §4.6 step 4, dynamic path: whether an existing content with the
/// deterministic name can be adopted, needs creating, or is a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicBindingDecision {
    Adopt,
    Create,
    ConflictContentInUse,
}

pub fn decide_dynamic_binding(
    snapshot_name: &str,
    snapshot_namespace: &str,
    snapshot_uid: &str,
    existing: Option<&VolumeSnapshotContent>,
) -> DynamicBindingDecision {
    match existing {
        None => DynamicBindingDecision::Create,
        Some(content) => {
            if content
                .spec
                .volume_snapshot_ref
                .matches(snapshot_name, snapshot_namespace, snapshot_uid)
            {
                DynamicBindingDecision::Adopt
            } else {
                DynamicBindingDecision::ConflictContentInUse
            }
        }
    }
}

/// Spec §4.6 step 4, pre-provisioned path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreProvisionedBindingDecision {
    BindUnbound,
    AlreadyBoundToThis,
    ConflictBoundToOther,
}

pub fn decide_preprovisioned_binding(
    snapshot_name: &str,
    snapshot_namespace: &str,
    snapshot_uid: &str,
    content: &VolumeSnapshotContent,
) -> PreProvisionedBindingDecision {
    let r = &content.spec.volume_snapshot_ref;
    if r.is_unbound() {
        PreProvisionedBindingDecision::BindUnbound
    } else if r.matches(snapshot_name, snapshot_namespace, snapshot_uid) {
        PreProvisionedBindingDecision::AlreadyBoundToThis
    } else {
        PreProvisionedBindingDecision::ConflictBoundToOther
    }
}

/// Spec §4.6 step 7: the claim finalizer is held iff some dynamic
/// snapshot referencing `claim_name` in `namespace` is still in progress
/// (not yet bound, not being deleted).
pub fn claim_has_in_progress_snapshot(snapshots: &[VolumeSnapshot], claim_name: &str) -> bool {
    snapshots.iter().any(|s| {
        let dynamic_for_claim = matches!(
            s.spec.source.classify(),
            Ok(SourceKind::Dynamic { claim_name: ref c }) if c == claim_name
        );
        dynamic_for_claim
            && s.metadata.deletion_timestamp.is_none()
            && !s.status.as_ref().map(|st| st.is_bound()).unwrap_or(false)
    })
}

/// Spec §4.6 "State machine (snapshot)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    PendingBinding,
    BoundNotReady,
    BoundReady,
    Deleting,
    Gone,
}

pub fn snapshot_state(snapshot: &VolumeSnapshot) -> SnapshotState {
    use kube::ResourceExt;

    if snapshot.meta().deletion_timestamp.is_some() {
        return if snapshot.finalizers().is_empty() {
            SnapshotState::Gone
        } else {
            SnapshotState::Deleting
        };
    }
    match &snapshot.status {
        None => SnapshotState::PendingBinding,
        Some(s) if !s.is_bound() => SnapshotState::PendingBinding,
        Some(s) if s.ready_to_use != Some(true) => SnapshotState::BoundNotReady,
        Some(_) => SnapshotState::BoundReady,
    }
}

/// Spec §4.6 "State machine (content)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    AwaitingHandle,
    HandleAssignedNotReady,
    HandleAssignedReady,
    Deleting,
    Gone,
}

pub fn content_state(content: &VolumeSnapshotContent) -> ContentState {
    use kube::ResourceExt;

    if content.meta().deletion_timestamp.is_some() {
        return if content.finalizers().is_empty() {
            ContentState::Gone
        } else {
            ContentState::Deleting
        };
    }
    match &content.status {
        None => ContentState::AwaitingHandle,
        Some(s) if !s.has_handle() => ContentState::AwaitingHandle,
        Some(s) if s.ready_to_use != Some(true) => ContentState::HandleAssignedNotReady,
        Some(_) => ContentState::HandleAssignedReady,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        DeletionPolicy, VolumeSnapshotClassSpec, VolumeSnapshotContentSource, VolumeSnapshotContentSpec,
        VolumeSnapshotRef,
    };
    use kube::api::ObjectMeta;

    fn class(driver: &str, default: bool) -> VolumeSnapshotClass {
        let mut annotations = std::collections::BTreeMap::new();
        if default {
            annotations.insert(crate::crd::DEFAULT_CLASS_ANNOTATION.to_string(), "true".to_string());
        }
        VolumeSnapshotClass {
            metadata: ObjectMeta {
                name: Some(format!("class-{driver}-{default}")),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: VolumeSnapshotClassSpec {
                driver: driver.to_string(),
                parameters: Default::default(),
                deletion_policy: DeletionPolicy::Delete,
            },
        }
    }

    #[test]
    fn no_default_class_is_validation_error() {
        let classes = vec![class("other", true)];
        assert!(resolve_default_class(&classes, "d").is_err());
    }

    #[test]
    fn exactly_one_default_resolves() {
        let classes = vec![class("d", true), class("other", true)];
        let resolved = resolve_default_class(&classes, "d").unwrap();
        assert_eq!(resolved.spec.driver, "d");
    }

    #[test]
    fn two_defaults_for_same_driver_is_validation_error() {
        let classes = vec![class("d", true), class("d", true)];
        assert!(resolve_default_class(&classes, "d").is_err());
    }

    fn content(name: &str, ref_name: &str, ref_ns: &str, ref_uid: &str) -> VolumeSnapshotContent {
        VolumeSnapshotContent {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: VolumeSnapshotContentSpec {
                source: VolumeSnapshotContentSource {
                    volume_handle: Some("vh1".to_string()),
                    snapshot_handle: None,
                },
                volume_snapshot_ref: VolumeSnapshotRef {
                    name: Some(ref_name.to_string()),
                    namespace: Some(ref_ns.to_string()),
                    uid: ref_uid.to_string(),
                },
                deletion_policy: DeletionPolicy::Delete,
                driver: "d".to_string(),
                volume_snapshot_class_name: Some("gold".to_string()),
            },
            status: None,
        }
    }

    #[test]
    fn dynamic_binding_creates_when_absent() {
        let d = decide_dynamic_binding("s1", "ns", "U1", None);
        assert_eq!(d, DynamicBindingDecision::Create);
    }

    #[test]
    fn dynamic_binding_adopts_matching_content() {
        let c = content("snapcontent-U1", "s1", "ns", "U1");
        let d = decide_dynamic_binding("s1", "ns", "U1", Some(&c));
        assert_eq!(d, DynamicBindingDecision::Adopt);
    }

    #[test]
    fn dynamic_binding_conflicts_on_uid_mismatch() {
        let c = content("snapcontent-U1", "other", "ns", "UOther");
        let d = decide_dynamic_binding("s3", "ns", "U3", Some(&c));
        assert_eq!(d, DynamicBindingDecision::ConflictContentInUse);
    }

    #[test]
    fn preprovisioned_binds_unbound_content() {
        let c = content("pc", "", "", "");
        let d = decide_preprovisioned_binding("s2", "ns", "U2", &c);
        assert_eq!(d, PreProvisionedBindingDecision::BindUnbound);
    }

    #[test]
    fn preprovisioned_conflicts_on_other_owner() {
        let c = content("pc", "other", "ns", "UOther");
        let d = decide_preprovisioned_binding("s3", "ns", "U3", &c);
        assert_eq!(d, PreProvisionedBindingDecision::ConflictBoundToOther);
    }
}
