//! CSI driver proxy (spec §4.1).
//!
//! Wraps a connection to a CSI driver over a local gRPC socket and
//! exposes the five operations the reconcilers need. Every transport
//! failure is classified `retryable` or `final` (see [`classify`]) so
//! callers never have to parse gRPC status codes themselves.

mod classify;
mod fake;
mod grpc;

pub(crate) mod proto {
    tonic::include_proto!("csi.v1");
}

pub use classify::classify_status;
pub use fake::FakeDriverClient;
pub use grpc::GrpcDriverClient;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriverCapabilities {
    pub create_delete_snapshot: bool,
    pub list_snapshots: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotInfo {
    pub snapshot_handle: String,
    pub creation_time: DateTime<Utc>,
    pub size_bytes: i64,
    pub ready_to_use: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotStatus {
    pub ready_to_use: bool,
    pub creation_time: Option<DateTime<Utc>>,
    pub size_bytes: Option<i64>,
}

/// The driver proxy contract (spec §4.1). Implemented by [`GrpcDriverClient`]
/// against a real CSI driver and by [`FakeDriverClient`] in tests.
#[async_trait]
pub trait DriverClient: Send + Sync {
    /// Liveness check; blocks until the driver is reachable or the
    /// caller's timeout fires.
    async fn probe(&self) -> Result<()>;

    /// Cached after first success.
    async fn driver_name(&self) -> Result<String>;

    /// Cached after first success.
    async fn capabilities(&self) -> Result<DriverCapabilities>;

    /// `name` must be caller-chosen and deterministic for the snapshot's
    /// identity so retries coalesce (spec §4.1).
    async fn create_snapshot(
        &self,
        name: &str,
        volume_handle: &str,
        parameters: &BTreeMap<String, String>,
        secrets: &BTreeMap<String, String>,
    ) -> Result<SnapshotInfo>;

    /// Idempotent: absence of the snapshot on the storage system is
    /// success.
    async fn delete_snapshot(&self, snapshot_handle: &str, secrets: &BTreeMap<String, String>) -> Result<()>;

    /// If the driver lacks `LIST_SNAPSHOTS`, implementations return
    /// `ready_to_use = true` with unknown timestamps/size.
    async fn snapshot_status(
        &self,
        snapshot_handle: &str,
        secrets: &BTreeMap<String, String>,
    ) -> Result<SnapshotStatus>;
}
