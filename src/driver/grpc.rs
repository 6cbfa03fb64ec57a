//! Production [`DriverClient`] over a CSI driver's Unix domain socket.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::net::UnixStream;
use tokio::sync::OnceCell;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

use super::classify::{classify_status, classify_transport};
use super::proto::{
    controller_client::ControllerClient, identity_client::IdentityClient,
    ControllerServiceCapabilityType, CreateSnapshotRequest, DeleteSnapshotRequest,
    GetPluginCapabilitiesRequest, GetPluginInfoRequest, ListSnapshotsRequest, ProbeRequest,
};
use super::{DriverCapabilities, DriverClient, SnapshotInfo, SnapshotStatus};
use crate::error::{Error, Result};

pub struct GrpcDriverClient {
    channel: Channel,
    driver_name: OnceCell<String>,
    capabilities: OnceCell<DriverCapabilities>,
}

impl GrpcDriverClient {
    /// Connect to the driver over its Unix domain socket (`--csi-address`).
    pub async fn connect(socket_path: PathBuf) -> Result<Self> {
        let channel = Endpoint::try_from("http://[::]:0")
            .expect("static dummy URI is always valid")
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = socket_path.clone();
                async move { UnixStream::connect(path).await }
            }))
            .await
            .map_err(classify_transport)?;

        Ok(Self {
            channel,
            driver_name: OnceCell::new(),
            capabilities: OnceCell::new(),
        })
    }

    fn identity(&self) -> IdentityClient<Channel> {
        IdentityClient::new(self.channel.clone())
    }

    fn controller(&self) -> ControllerClient<Channel> {
        ControllerClient::new(self.channel.clone())
    }
}

#[async_trait]
impl DriverClient for GrpcDriverClient {
    async fn probe(&self) -> Result<()> {
        self.identity()
            .probe(ProbeRequest {})
            .await
            .map_err(classify_status)?;
        Ok(())
    }

    async fn driver_name(&self) -> Result<String> {
        if let Some(name) = self.driver_name.get() {
            return Ok(name.clone());
        }
        let resp = self
            .identity()
            .get_plugin_info(GetPluginInfoRequest {})
            .await
            .map_err(classify_status)?
            .into_inner();
        let name = self.driver_name.get_or_init(|| async { resp.name }).await;
        Ok(name.clone())
    }

    async fn capabilities(&self) -> Result<DriverCapabilities> {
        if let Some(caps) = self.capabilities.get() {
            return Ok(*caps);
        }
        let resp = self
            .identity()
            .get_plugin_capabilities(GetPluginCapabilitiesRequest {})
            .await
            .map_err(classify_status)?
            .into_inner();
        let caps = DriverCapabilities {
            create_delete_snapshot: resp
                .capabilities
                .contains(&(ControllerServiceCapabilityType::CreateDeleteSnapshot as i32)),
            list_snapshots: resp
                .capabilities
                .contains(&(ControllerServiceCapabilityType::ListSnapshots as i32)),
        };
        let caps = *self.capabilities.get_or_init(|| async { caps }).await;
        Ok(caps)
    }

    async fn create_snapshot(
        &self,
        name: &str,
        volume_handle: &str,
        parameters: &BTreeMap<String, String>,
        secrets: &BTreeMap<String, String>,
    ) -> Result<SnapshotInfo> {
        let resp = self
            .controller()
            .create_snapshot(CreateSnapshotRequest {
                source_volume_id: volume_handle.to_string(),
                name: name.to_string(),
                secrets: secrets.clone().into_iter().collect(),
                parameters: parameters.clone().into_iter().collect(),
            })
            .await
            .map_err(classify_status)?
            .into_inner();

        let snapshot = resp
            .snapshot
            .ok_or_else(|| Error::FinalDriver("createSnapshot returned no snapshot".to_string()))?;

        Ok(SnapshotInfo {
            snapshot_handle: snapshot.snapshot_id,
            creation_time: unix_seconds_to_utc(snapshot.creation_time_unix_seconds),
            size_bytes: snapshot.size_bytes,
            ready_to_use: snapshot.ready_to_use,
        })
    }

    async fn delete_snapshot(&self, snapshot_handle: &str, secrets: &BTreeMap<String, String>) -> Result<()> {
        match self
            .controller()
            .delete_snapshot(DeleteSnapshotRequest {
                snapshot_id: snapshot_handle.to_string(),
                secrets: secrets.clone().into_iter().collect(),
            })
            .await
        {
            Ok(_) => Ok(()),
            // Absence on the storage system is success (spec §4.1).
            Err(status) if status.code() == tonic::Code::NotFound => Ok(()),
            Err(status) => Err(classify_status(status)),
        }
    }

    async fn snapshot_status(
        &self,
        snapshot_handle: &str,
        secrets: &BTreeMap<String, String>,
    ) -> Result<SnapshotStatus> {
        let caps = self.capabilities().await?;
        if !caps.list_snapshots {
            return Ok(SnapshotStatus {
                ready_to_use: true,
                creation_time: None,
                size_bytes: None,
            });
        }

        let resp = self
            .controller()
            .list_snapshots(ListSnapshotsRequest {
                snapshot_id: snapshot_handle.to_string(),
                secrets: secrets.clone().into_iter().collect(),
            })
            .await
            .map_err(classify_status)?
            .into_inner();

        match resp.entries.into_iter().next().and_then(|e| e.snapshot) {
            Some(snapshot) => Ok(SnapshotStatus {
                ready_to_use: snapshot.ready_to_use,
                creation_time: Some(unix_seconds_to_utc(snapshot.creation_time_unix_seconds)),
                size_bytes: Some(snapshot.size_bytes),
            }),
            None => Ok(SnapshotStatus {
                ready_to_use: true,
                creation_time: None,
                size_bytes: None,
            }),
        }
    }
}

fn unix_seconds_to_utc(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now)
}
