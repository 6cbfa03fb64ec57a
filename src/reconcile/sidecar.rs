//! Sidecar reconciler (spec §4.5): one content key per tick, paired 1:1
//! with a CSI driver over its Unix domain socket.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

use crate::cache::{ObjKey, ObjectCache};
use crate::crd::{
    DeletionPolicy, VolumeSnapshotClass, VolumeSnapshotContent, VolumeSnapshotContentStatus,
    SHOULD_DELETE_ANNOTATION,
};
use crate::dispatch::{dispatch_key, DispatchOutcome, Dispatcher};
use crate::driver::DriverClient;
use crate::error::{Error, Result};
use crate::finalizers::{self, CONTENT_PROTECTION_FINALIZER};
use crate::metrics;
use crate::naming;
use crate::secrets::{fetch_secret_data, secret_ref, SecretOp, TemplateContext};
use crate::workqueue::WorkQueue;

/// CSI sidecar "extra create metadata" convention parameter keys (spec
/// §6): the source snapshot's identity, attached to the driver's
/// `createSnapshot` call when `--extra-create-metadata` is set.
const EXTRA_METADATA_NAME: &str = "csi.storage.k8s.io/volumesnapshot/name";
const EXTRA_METADATA_NAMESPACE: &str = "csi.storage.k8s.io/volumesnapshot/namespace";
const EXTRA_METADATA_UID: &str = "csi.storage.k8s.io/volumesnapshot/uid";
const EXTRA_METADATA_CONTENT_NAME: &str = "csi.storage.k8s.io/volumesnapshotcontent/name";

const FIELD_MANAGER: &str = "snapshot-sidecar";
const DRIVER_CALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SidecarCtx {
    pub client: kube::Client,
    pub driver: Arc<dyn DriverClient>,
    pub driver_name: String,
    pub contents: Arc<ObjectCache<VolumeSnapshotContent>>,
    pub content_queue: Arc<WorkQueue<ObjKey>>,
    pub dispatcher: Arc<Dispatcher>,
    pub snapshot_name_prefix: String,
    pub snapshot_name_uuid_length: usize,
    pub extra_create_metadata: bool,
}

fn content_api(ctx: &SidecarCtx) -> Api<VolumeSnapshotContent> {
    Api::all(ctx.client.clone())
}

async fn class_parameters(ctx: &SidecarCtx, class_name: &Option<String>) -> Result<BTreeMap<String, String>> {
    let Some(class_name) = class_name else {
        return Ok(BTreeMap::new());
    };
    let api: Api<VolumeSnapshotClass> = Api::all(ctx.client.clone());
    match api.get(class_name).await {
        Ok(class) => Ok(class.spec.parameters),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}

async fn resolve_secrets(
    ctx: &SidecarCtx,
    content: &VolumeSnapshotContent,
    op: SecretOp,
) -> Result<BTreeMap<String, String>> {
    let params = class_parameters(ctx, &content.spec.volume_snapshot_class_name).await?;
    let ctx_template = TemplateContext {
        snapshotcontent_name: &content.name_any(),
        volumesnapshot_name: content.spec.volume_snapshot_ref.name.as_deref().unwrap_or(""),
        volumesnapshot_namespace: content.spec.volume_snapshot_ref.namespace.as_deref().unwrap_or(""),
    };
    match secret_ref(&params, op, &ctx_template) {
        Some(sref) => fetch_secret_data(&ctx.client, &sref).await,
        None => Ok(BTreeMap::new()),
    }
}

/// Spec §4.5: resolve → deletion phase → create phase → status refresh.
pub async fn reconcile_content(ctx: &SidecarCtx, name: &str) -> Result<()> {
    // Step 1: resolve from cache.
    let Some(content) = ctx.contents.get(&ObjKey { namespace: None, name: name.to_string() }) else {
        return Ok(());
    };

    if content.spec.driver != ctx.driver_name {
        warn!(%name, driver = %content.spec.driver, "content belongs to a different driver, dropping");
        return Ok(());
    }

    let api = content_api(ctx);
    let should_delete = content.meta().deletion_timestamp.is_some()
        || content
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SHOULD_DELETE_ANNOTATION))
            .map(|v| v == "true")
            .unwrap_or(false);

    if should_delete {
        return reconcile_deletion(ctx, &api, &content).await;
    }

    finalizers::ensure_finalizer(&api, name, content.finalizers(), CONTENT_PROTECTION_FINALIZER).await?;

    // Step 3: create phase.
    if !content.status.as_ref().map(|s| s.has_handle()).unwrap_or(false) {
        if content.spec.source.is_pre_provisioned() {
            // Pre-provisioned: fall through to status refresh below, the
            // handle is already known to the driver.
        } else {
            create_snapshot(ctx, &api, &content).await?;
        }
    }

    // Step 4: status refresh.
    refresh_status(ctx, &api, &content).await
}

async fn create_snapshot(ctx: &SidecarCtx, api: &Api<VolumeSnapshotContent>, content: &VolumeSnapshotContent) -> Result<()> {
    let name = content.name_any();
    let uid = &content.spec.volume_snapshot_ref.uid;
    let physical_name = naming::physical_snapshot_name(&ctx.snapshot_name_prefix, uid, ctx.snapshot_name_uuid_length);
    let volume_handle = content
        .spec
        .source
        .volume_handle
        .clone()
        .ok_or_else(|| Error::Validation(format!("content {name} has neither volumeHandle nor snapshotHandle")))?;

    let secrets = resolve_secrets(ctx, content, SecretOp::Create).await?;
    let mut params = class_parameters(ctx, &content.spec.volume_snapshot_class_name).await?;
    if ctx.extra_create_metadata {
        if let Some(snapshot_name) = &content.spec.volume_snapshot_ref.name {
            params.insert(EXTRA_METADATA_NAME.to_string(), snapshot_name.clone());
        }
        if let Some(snapshot_namespace) = &content.spec.volume_snapshot_ref.namespace {
            params.insert(EXTRA_METADATA_NAMESPACE.to_string(), snapshot_namespace.clone());
        }
        params.insert(EXTRA_METADATA_UID.to_string(), content.spec.volume_snapshot_ref.uid.clone());
        params.insert(EXTRA_METADATA_CONTENT_NAME.to_string(), name.clone());
    }

    let key = dispatch_key("create", &name, content.uid().as_deref().unwrap_or_default());
    let driver = Arc::clone(&ctx.driver);
    let sample = metrics::start_operation(&ctx.driver_name, "create_snapshot");
    let outcome = ctx
        .dispatcher
        .run(key, || async move {
            tokio::time::timeout(DRIVER_CALL_TIMEOUT, driver.create_snapshot(&physical_name, &volume_handle, &params, &secrets))
                .await
                .map_err(|_| Error::TransientDriver("createSnapshot timed out".to_string()))?
        })
        .await;
    sample.finish(!matches!(outcome, DispatchOutcome::Ran(Err(_))));

    match outcome {
        DispatchOutcome::Ran(Ok(info)) => {
            info!(%name, handle = %info.snapshot_handle, "physical snapshot created");
            let status = VolumeSnapshotContentStatus {
                snapshot_handle: Some(info.snapshot_handle),
                creation_time: Some(info.creation_time.timestamp()),
                restore_size: Some(info.size_bytes),
                ready_to_use: Some(info.ready_to_use),
                error: None,
            };
            api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(serde_json::json!({ "status": status })))
                .await?;
            ctx.content_queue.forget(&ObjKey { namespace: None, name }).await;
            Ok(())
        }
        DispatchOutcome::Ran(Err(e)) => {
            record_error(api, &name, e.to_string()).await?;
            ctx.content_queue.add_rate_limited(ObjKey { namespace: None, name }).await;
            Err(e)
        }
        DispatchOutcome::AlreadyInProgress => Ok(()),
        DispatchOutcome::Backoff(delay) => {
            ctx.content_queue.add_after(ObjKey { namespace: None, name }, delay);
            Ok(())
        }
    }
}

async fn refresh_status(ctx: &SidecarCtx, api: &Api<VolumeSnapshotContent>, content: &VolumeSnapshotContent) -> Result<()> {
    let Some(handle) = content.status.as_ref().and_then(|s| s.snapshot_handle.clone()) else {
        return Ok(());
    };
    let name = content.name_any();
    let secrets = resolve_secrets(ctx, content, SecretOp::List).await?;
    let sample = metrics::start_operation(&ctx.driver_name, "snapshot_status");
    let status = ctx.driver.snapshot_status(&handle, &secrets).await;
    sample.finish(status.is_ok());
    let status = status?;

    let new_status = VolumeSnapshotContentStatus {
        snapshot_handle: Some(handle),
        creation_time: status.creation_time.map(|t| t.timestamp()).or_else(|| content.status.as_ref().and_then(|s| s.creation_time)),
        restore_size: status.size_bytes.or_else(|| content.status.as_ref().and_then(|s| s.restore_size)),
        ready_to_use: Some(status.ready_to_use),
        error: None,
    };
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(serde_json::json!({ "status": new_status })))
        .await?;

    if !status.ready_to_use {
        ctx.content_queue.add_after(ObjKey { namespace: None, name }, Duration::from_secs(5));
    }
    Ok(())
}

async fn reconcile_deletion(ctx: &SidecarCtx, api: &Api<VolumeSnapshotContent>, content: &VolumeSnapshotContent) -> Result<()> {
    let name = content.name_any();

    if content.spec.deletion_policy == DeletionPolicy::Retain {
        finalizers::drop_finalizer(api, &name, content.finalizers(), CONTENT_PROTECTION_FINALIZER).await?;
        return Ok(());
    }

    let Some(handle) = content.status.as_ref().and_then(|s| s.snapshot_handle.clone()) else {
        finalizers::drop_finalizer(api, &name, content.finalizers(), CONTENT_PROTECTION_FINALIZER).await?;
        return Ok(());
    };

    let secrets = resolve_secrets(ctx, content, SecretOp::Delete).await?;
    let key = dispatch_key("delete", &name, content.uid().as_deref().unwrap_or_default());
    let driver = Arc::clone(&ctx.driver);
    let handle_for_call = handle.clone();
    let sample = metrics::start_operation(&ctx.driver_name, "delete_snapshot");
    let outcome = ctx
        .dispatcher
        .run(key, || async move { driver.delete_snapshot(&handle_for_call, &secrets).await })
        .await;
    sample.finish(!matches!(outcome, DispatchOutcome::Ran(Err(_))));

    match outcome {
        DispatchOutcome::Ran(Ok(())) => {
            info!(%name, %handle, "physical snapshot deleted");
            finalizers::drop_finalizer(api, &name, content.finalizers(), CONTENT_PROTECTION_FINALIZER).await?;
            Ok(())
        }
        DispatchOutcome::Ran(Err(e)) => {
            record_error(api, &name, e.to_string()).await?;
            ctx.content_queue.add_rate_limited(ObjKey { namespace: None, name }).await;
            Err(e)
        }
        DispatchOutcome::AlreadyInProgress => Ok(()),
        DispatchOutcome::Backoff(delay) => {
            ctx.content_queue.add_after(ObjKey { namespace: None, name }, delay);
            Ok(())
        }
    }
}

async fn record_error(api: &Api<VolumeSnapshotContent>, name: &str, message: String) -> Result<()> {
    let patch = serde_json::json!({ "status": { "error": crate::crd::SnapshotError::new(message) } });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch)).await?;
    Ok(())
}
