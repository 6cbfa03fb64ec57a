//! Finalizer helpers (spec §4.7).
//!
//! Three finalizers, each with a single owner: the sidecar owns
//! [`CONTENT_PROTECTION_FINALIZER`], the common reconciler owns
//! [`SNAPSHOT_BOUND_FINALIZER`] and [`CLAIM_PROTECTION_FINALIZER`].
//! Removing a finalizer you do not own is forbidden — every call site in
//! this crate only ever removes the one finalizer its component owns.

use std::fmt::Debug;

use kube::{
    api::{Api, Patch, PatchParams},
    Resource,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub const CLAIM_PROTECTION_FINALIZER: &str = "snapshot.storage.kubernetes.io/volume-claim-protection";
pub const SNAPSHOT_BOUND_FINALIZER: &str = "snapshot.storage.kubernetes.io/volumesnapshot-bound-protection";
pub const CONTENT_PROTECTION_FINALIZER: &str =
    "snapshot.storage.kubernetes.io/volumesnapshotcontent-bound-protection";

const FIELD_MANAGER: &str = "snapshot-controller";

/// Idempotently add `finalizer` to `current`'s owner if absent.
pub async fn ensure_finalizer<K>(
    api: &Api<K>,
    name: &str,
    current: &[String],
    finalizer: &str,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    if current.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    let mut finalizers = current.to_vec();
    finalizers.push(finalizer.to_string());
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}

/// Idempotently remove `finalizer` from `current`'s owner if present.
pub async fn drop_finalizer<K>(
    api: &Api<K>,
    name: &str,
    current: &[String],
    finalizer: &str,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    if !current.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    let finalizers: Vec<String> = current.iter().filter(|f| f.as_str() != finalizer).cloned().collect();
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;
    Ok(())
}
