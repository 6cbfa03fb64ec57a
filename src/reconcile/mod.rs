//! Reconcilers (spec §4.5, §4.6): the sidecar's content-only loop and the
//! common controller's paired snapshot/content sub-reconcilers. Both
//! share the object cache, finalizer, naming, and secret-resolution
//! building blocks; `decide` holds the pure logic the two drive.

pub mod common_content;
pub mod common_snapshot;
pub mod decide;
pub mod sidecar;

use std::sync::Arc;

use kube::{Api, Client};

use crate::cache::{ObjKey, ObjectCache};
use crate::crd::{VolumeSnapshot, VolumeSnapshotClass, VolumeSnapshotContent};
use crate::error::{Error, Result};
use crate::workqueue::WorkQueue;

/// Shared dependencies of the common controller's two sub-reconcilers.
pub struct CommonCtx {
    pub client: Client,
    pub snapshots: Arc<ObjectCache<VolumeSnapshot>>,
    pub contents: Arc<ObjectCache<VolumeSnapshotContent>>,
    pub classes: Arc<ObjectCache<VolumeSnapshotClass>>,
    pub content_queue: Arc<WorkQueue<ObjKey>>,
    pub snapshot_queue: Arc<WorkQueue<ObjKey>>,
    pub prevent_volume_mode_conversion: bool,
}

impl CommonCtx {
    pub fn snapshot_api(&self, namespace: &str) -> Api<VolumeSnapshot> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn content_api(&self) -> Api<VolumeSnapshotContent> {
        Api::all(self.client.clone())
    }
}

/// Resolve the CSI driver name and volume handle backing a claim, via its
/// bound `PersistentVolume` (spec §4.6 step 3/4: "determined via the
/// referenced claim's bound volume").
pub(crate) async fn resolve_claim_volume(
    client: &Client,
    namespace: &str,
    claim_name: &str,
) -> Result<(String, String)> {
    use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};

    let pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let pvc = pvc_api
        .get(claim_name)
        .await
        .map_err(|e| Error::from_kube_get(e, claim_name))?;

    let volume_name = pvc
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.clone())
        .ok_or_else(|| Error::Validation(format!("claim {claim_name} is not yet bound to a volume")))?;

    let pv_api: Api<PersistentVolume> = Api::all(client.clone());
    let pv = pv_api
        .get(&volume_name)
        .await
        .map_err(|e| Error::from_kube_get(e, &volume_name))?;

    let csi = pv
        .spec
        .as_ref()
        .and_then(|s| s.csi.as_ref())
        .ok_or_else(|| Error::Validation(format!("volume {volume_name} has no CSI source")))?;

    Ok((csi.driver.clone(), csi.volume_handle.clone()))
}
