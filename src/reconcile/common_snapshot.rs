//! Snapshot sub-reconciler (spec §4.6, one snapshot key per tick).

use chrono::TimeZone;
use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use super::decide::{self, DynamicBindingDecision, PreProvisionedBindingDecision};
use super::{resolve_claim_volume, CommonCtx};
use crate::crd::{
    SourceKind, VolumeSnapshot, VolumeSnapshotContent, VolumeSnapshotContentSource,
    VolumeSnapshotContentSpec, VolumeSnapshotRef, VolumeSnapshotStatus, SnapshotError,
};
use crate::crd::SHOULD_DELETE_ANNOTATION;
use crate::error::{Error, Result};
use crate::finalizers::{self, CLAIM_PROTECTION_FINALIZER, SNAPSHOT_BOUND_FINALIZER};
use crate::naming;

const FIELD_MANAGER: &str = "snapshot-controller";

/// Spec §4.6 snapshot sub-reconciler, steps 1-7.
pub async fn reconcile_snapshot(ctx: &CommonCtx, namespace: &str, name: &str) -> Result<()> {
    let api = ctx.snapshot_api(namespace);
    let snapshot = match api.get(name).await {
        Ok(s) => s,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let uid = snapshot.uid().unwrap_or_default();

    // Step 6: deletion takes priority over every other step.
    if snapshot.meta().deletion_timestamp.is_some() {
        return reconcile_deletion(ctx, &api, &snapshot, &uid).await;
    }

    // Step 1: source type check.
    let source_kind = match snapshot.spec.source.classify() {
        Ok(k) => k,
        Err(msg) => {
            set_status_error(&api, name, msg.clone()).await?;
            return Err(Error::Validation(msg));
        }
    };

    // Step 2: finalizer install.
    finalizers::ensure_finalizer(&api, name, snapshot.finalizers(), SNAPSHOT_BOUND_FINALIZER).await?;

    // Step 3: class resolution.
    let class_name = match resolve_class_name(ctx, &snapshot, &source_kind).await {
        Ok(name) => name,
        Err(e) => {
            set_status_error(&api, name, e.to_string()).await?;
            return Err(e);
        }
    };

    // Step 4: binding.
    let bound_content_name = match bind(ctx, namespace, name, &uid, &source_kind, &class_name).await {
        Ok(n) => n,
        Err(e) => {
            set_status_error(&api, name, e.to_string()).await?;
            return Err(e);
        }
    };

    // Step 5: status mirror.
    if let Some(content) = ctx.contents.get(&crate::cache::ObjKey {
        namespace: None,
        name: bound_content_name.clone(),
    }) {
        mirror_status(&api, name, &bound_content_name, &content).await?;
    }

    // Step 7: claim finalizer lifecycle.
    if let SourceKind::Dynamic { claim_name } = &source_kind {
        reconcile_claim_finalizer(ctx, namespace, claim_name).await?;
    }

    Ok(())
}

async fn resolve_class_name(ctx: &CommonCtx, snapshot: &VolumeSnapshot, source: &SourceKind) -> Result<String> {
    if let Some(explicit) = &snapshot.spec.volume_snapshot_class_name {
        if !explicit.is_empty() {
            return Ok(explicit.clone());
        }
    }

    let driver = match source {
        SourceKind::Dynamic { claim_name } => {
            let namespace = snapshot.namespace().unwrap_or_default();
            resolve_claim_volume(&ctx.client, &namespace, claim_name).await?.0
        }
        SourceKind::PreProvisioned { content_name } => {
            let content = ctx
                .contents
                .get(&crate::cache::ObjKey { namespace: None, name: content_name.clone() })
                .ok_or_else(|| Error::ObjectNotFound(content_name.clone()))?;
            content.spec.driver.clone()
        }
    };

    let classes: Vec<_> = ctx.classes.list().iter().map(|c| (**c).clone()).collect();
    let class = decide::resolve_default_class(&classes, &driver)?;
    let name = class.name_any();

    let api = ctx.snapshot_api(&snapshot.namespace().unwrap_or_default());
    let patch = serde_json::json!({ "spec": { "volumeSnapshotClassName": name } });
    api.patch(&snapshot.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;

    Ok(name)
}

async fn bind(
    ctx: &CommonCtx,
    namespace: &str,
    name: &str,
    uid: &str,
    source: &SourceKind,
    class_name: &str,
) -> Result<String> {
    match source {
        SourceKind::Dynamic { claim_name } => {
            let content_name = naming::content_name(uid);
            let existing = ctx.contents.get(&crate::cache::ObjKey { namespace: None, name: content_name.clone() });

            match decide::decide_dynamic_binding(name, namespace, uid, existing.as_deref()) {
                DynamicBindingDecision::Adopt => Ok(content_name),
                DynamicBindingDecision::ConflictContentInUse => Err(Error::Validation(format!(
                    "content {content_name} is already bound to a different snapshot"
                ))),
                DynamicBindingDecision::Create => {
                    let (driver, volume_handle) = resolve_claim_volume(&ctx.client, namespace, claim_name).await?;
                    let class = ctx
                        .classes
                        .list()
                        .into_iter()
                        .find(|c| c.name_any() == class_name)
                        .ok_or_else(|| Error::ObjectNotFound(class_name.to_string()))?;

                    let content = VolumeSnapshotContent {
                        metadata: kube::api::ObjectMeta {
                            name: Some(content_name.clone()),
                            ..Default::default()
                        },
                        spec: VolumeSnapshotContentSpec {
                            source: VolumeSnapshotContentSource {
                                volume_handle: Some(volume_handle),
                                snapshot_handle: None,
                            },
                            volume_snapshot_ref: VolumeSnapshotRef {
                                name: Some(name.to_string()),
                                namespace: Some(namespace.to_string()),
                                uid: uid.to_string(),
                            },
                            deletion_policy: class.spec.deletion_policy,
                            driver,
                            volume_snapshot_class_name: Some(class_name.to_string()),
                        },
                        status: None,
                    };

                    ctx.content_api()
                        .create(&kube::api::PostParams::default(), &content)
                        .await?;
                    info!(%content_name, %name, "created VolumeSnapshotContent");

                    let claim_api: Api<k8s_openapi::api::core::v1::PersistentVolumeClaim> =
                        Api::namespaced(ctx.client.clone(), namespace);
                    let claim = claim_api.get(claim_name).await.map_err(|e| Error::from_kube_get(e, claim_name))?;
                    finalizers::ensure_finalizer(&claim_api, claim_name, claim.finalizers(), CLAIM_PROTECTION_FINALIZER)
                        .await?;

                    Ok(content_name)
                }
            }
        }
        SourceKind::PreProvisioned { content_name } => {
            let content = ctx
                .contents
                .get(&crate::cache::ObjKey { namespace: None, name: content_name.clone() })
                .ok_or_else(|| Error::ObjectNotFound(content_name.clone()))?;

            match decide::decide_preprovisioned_binding(name, namespace, uid, &content) {
                PreProvisionedBindingDecision::AlreadyBoundToThis => Ok(content_name.clone()),
                PreProvisionedBindingDecision::ConflictBoundToOther => Err(Error::Validation(format!(
                    "content {content_name} is already bound to a different snapshot"
                ))),
                PreProvisionedBindingDecision::BindUnbound => {
                    let patch = serde_json::json!({
                        "spec": {
                            "volumeSnapshotRef": {
                                "name": name,
                                "namespace": namespace,
                                "uid": uid,
                            }
                        }
                    });
                    match ctx
                        .content_api()
                        .patch(content_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
                        .await
                    {
                        Ok(_) => Ok(content_name.clone()),
                        Err(kube::Error::Api(e)) if e.code == 409 => {
                            Err(Error::ObjectConflict(format!("content {content_name} binding race")))
                        }
                        Err(e) => Err(e.into()),
                    }
                }
            }
        }
    }
}

async fn mirror_status(
    api: &Api<VolumeSnapshot>,
    name: &str,
    bound_content_name: &str,
    content: &VolumeSnapshotContent,
) -> Result<()> {
    let status = content.status.clone().unwrap_or_default();
    let new_status = VolumeSnapshotStatus {
        bound_volume_snapshot_content_name: Some(bound_content_name.to_string()),
        ready_to_use: status.ready_to_use,
        creation_time: status.creation_time.and_then(|secs| {
            chrono::Utc.timestamp_opt(secs, 0).single().map(|t| t.to_rfc3339())
        }),
        restore_size: status.restore_size,
        error: None,
    };
    let patch = serde_json::json!({ "status": new_status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn set_status_error(api: &Api<VolumeSnapshot>, name: &str, message: String) -> Result<()> {
    warn!(%name, %message, "snapshot validation error");
    let patch = serde_json::json!({ "status": { "error": SnapshotError::new(message) } });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn reconcile_deletion(
    ctx: &CommonCtx,
    api: &Api<VolumeSnapshot>,
    snapshot: &VolumeSnapshot,
    uid: &str,
) -> Result<()> {
    let name = snapshot.name_any();
    let bound_content_name = snapshot.status.as_ref().and_then(|s| s.bound_volume_snapshot_content_name.clone());

    match bound_content_name {
        None => {
            finalizers::drop_finalizer(api, &name, snapshot.finalizers(), SNAPSHOT_BOUND_FINALIZER).await?;
        }
        Some(content_name) => {
            let patch = serde_json::json!({ "metadata": { "annotations": { SHOULD_DELETE_ANNOTATION: "true" } } });
            if let Err(e) = ctx
                .content_api()
                .patch(&content_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
                .await
            {
                if !matches!(&e, kube::Error::Api(ae) if ae.code == 404) {
                    return Err(e.into());
                }
            }
            finalizers::drop_finalizer(api, &name, snapshot.finalizers(), SNAPSHOT_BOUND_FINALIZER).await?;
        }
    }

    if let Ok(SourceKind::Dynamic { claim_name }) = snapshot.spec.source.classify() {
        let namespace = snapshot.namespace().unwrap_or_default();
        reconcile_claim_finalizer(ctx, &namespace, &claim_name).await?;
    }

    let _ = uid;
    Ok(())
}

async fn reconcile_claim_finalizer(ctx: &CommonCtx, namespace: &str, claim_name: &str) -> Result<()> {
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;

    let snapshots: Vec<_> = ctx
        .snapshots
        .list()
        .into_iter()
        .filter(|s| s.namespace().as_deref() == Some(namespace))
        .map(|s| (*s).clone())
        .collect();

    let claim_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    let claim = match claim_api.get(claim_name).await {
        Ok(c) => c,
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if decide::claim_has_in_progress_snapshot(&snapshots, claim_name) {
        finalizers::ensure_finalizer(&claim_api, claim_name, claim.finalizers(), CLAIM_PROTECTION_FINALIZER).await?;
    } else {
        finalizers::drop_finalizer(&claim_api, claim_name, claim.finalizers(), CLAIM_PROTECTION_FINALIZER).await?;
    }
    Ok(())
}
