//! Custom Resource Definitions for the CSI volume-snapshot reconciliation
//! core (spec §3).
//!
//! Four kinds participate: `VolumeSnapshot` (user-facing, namespaced),
//! `VolumeSnapshotContent` (backing, cluster-scoped), `VolumeSnapshotClass`
//! (cluster-scoped), and the externally owned `PersistentVolumeClaim`
//! (consumed directly from `k8s_openapi`, never redefined here).

mod common;
mod volume_snapshot;
mod volume_snapshot_class;
mod volume_snapshot_content;

pub use common::{DeletionPolicy, SnapshotError};
pub use volume_snapshot::{
    SourceKind, VolumeSnapshot, VolumeSnapshotSource, VolumeSnapshotSpec, VolumeSnapshotStatus,
};
pub use volume_snapshot_class::{VolumeSnapshotClass, VolumeSnapshotClassSpec, DEFAULT_CLASS_ANNOTATION};
pub use volume_snapshot_content::{
    VolumeSnapshotContent, VolumeSnapshotContentSource, VolumeSnapshotContentSpec,
    VolumeSnapshotContentStatus, VolumeSnapshotRef, SHOULD_DELETE_ANNOTATION,
};
