//! Content sub-reconciler (spec §4.6): driver-agnostic validation of the
//! bound-snapshot invariant, one content key per tick.

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use tracing::warn;

use super::CommonCtx;
use crate::crd::{VolumeSnapshotContent, SHOULD_DELETE_ANNOTATION};
use crate::error::Result;

const FIELD_MANAGER: &str = "snapshot-controller";

/// Spec §4.6: "Enforce that the bound snapshot still exists and that the
/// UIDs match; if not, mark the content for deletion subject to its
/// deletion policy."
pub async fn reconcile_content(ctx: &CommonCtx, name: &str) -> Result<()> {
    let api: Api<VolumeSnapshotContent> = ctx.content_api();
    let content = match api.get(name).await {
        Ok(c) => c,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if content.meta().deletion_timestamp.is_some() {
        // The sidecar owns physical deletion; nothing for the common
        // reconciler to do beyond having already stamped the annotation.
        return Ok(());
    }

    let r = &content.spec.volume_snapshot_ref;
    if r.is_unbound() {
        return Ok(());
    }

    let snapshot_gone = match (&r.namespace, &r.name) {
        (Some(ns), Some(n)) => {
            let snapshot_api: Api<crate::crd::VolumeSnapshot> = Api::namespaced(ctx.client.clone(), ns);
            match snapshot_api.get(n).await {
                Ok(s) => s.uid().as_deref() != Some(r.uid.as_str()),
                Err(kube::Error::Api(e)) if e.code == 404 => true,
                Err(e) => return Err(e.into()),
            }
        }
        _ => true,
    };

    if snapshot_gone {
        warn!(%name, "bound snapshot gone or UID mismatch, marking content for deletion");
        let patch = serde_json::json!({ "metadata": { "annotations": { SHOULD_DELETE_ANNOTATION: "true" } } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch)).await?;
    }

    Ok(())
}
