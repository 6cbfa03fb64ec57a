//! In-memory [`DriverClient`] used by unit and property tests (spec §8).
//!
//! Persists already-exists semantics: a second `create_snapshot` call
//! with a name that was already created returns the same handle instead
//! of minting a new physical snapshot, mirroring a real driver's
//! idempotent behavior under retry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{DriverCapabilities, DriverClient, SnapshotInfo, SnapshotStatus};
use crate::error::{Error, Result};

#[derive(Default)]
struct State {
    by_name: BTreeMap<String, SnapshotInfo>,
    deleted: std::collections::BTreeSet<String>,
    /// Queued outcomes for `create_snapshot`, consumed in order; once
    /// exhausted, calls succeed deterministically. Lets tests model "N
    /// transient failures then success" (spec §8 scenario 6).
    create_script: Vec<Result<(), Error>>,
}

pub struct FakeDriverClient {
    state: Mutex<State>,
    pub create_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub list_capability: bool,
}

impl FakeDriverClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            list_capability: true,
        }
    }

    pub fn without_list_capability() -> Self {
        Self {
            list_capability: false,
            ..Self::new()
        }
    }

    /// Queue `n` transient failures before `create_snapshot` starts
    /// succeeding.
    pub fn fail_create_times(self, n: usize) -> Self {
        let mut state = self.state.lock().unwrap();
        state.create_script = (0..n).map(|_| Err(Error::TransientDriver("injected".into()))).collect();
        drop(state);
        self
    }

    pub fn snapshot_count(&self) -> usize {
        self.state.lock().unwrap().by_name.len()
    }
}

impl Default for FakeDriverClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriverClient for FakeDriverClient {
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn driver_name(&self) -> Result<String> {
        Ok("fake.csi.example.com".to_string())
    }

    async fn capabilities(&self) -> Result<DriverCapabilities> {
        Ok(DriverCapabilities {
            create_delete_snapshot: true,
            list_snapshots: self.list_capability,
        })
    }

    async fn create_snapshot(
        &self,
        name: &str,
        volume_handle: &str,
        _parameters: &BTreeMap<String, String>,
        _secrets: &BTreeMap<String, String>,
    ) -> Result<SnapshotInfo> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(existing) = state.by_name.get(name) {
                return Ok(existing.clone());
            }
            if !state.create_script.is_empty() {
                let scripted = state.create_script.remove(0);
                scripted?;
            }
        }

        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let info = SnapshotInfo {
            snapshot_handle: format!("handle-{name}"),
            creation_time: Utc::now(),
            size_bytes: 1024,
            ready_to_use: true,
        };
        let _ = volume_handle;
        self.state.lock().unwrap().by_name.insert(name.to_string(), info.clone());
        Ok(info)
    }

    async fn delete_snapshot(&self, snapshot_handle: &str, _secrets: &BTreeMap<String, String>) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.deleted.insert(snapshot_handle.to_string());
        state.by_name.retain(|_, v| v.snapshot_handle != snapshot_handle);
        Ok(())
    }

    async fn snapshot_status(
        &self,
        snapshot_handle: &str,
        _secrets: &BTreeMap<String, String>,
    ) -> Result<SnapshotStatus> {
        if !self.list_capability {
            return Ok(SnapshotStatus {
                ready_to_use: true,
                creation_time: None,
                size_bytes: None,
            });
        }
        let state = self.state.lock().unwrap();
        match state.by_name.values().find(|s| s.snapshot_handle == snapshot_handle) {
            Some(info) => Ok(SnapshotStatus {
                ready_to_use: info.ready_to_use,
                creation_time: Some(info.creation_time),
                size_bytes: Some(info.size_bytes),
            }),
            None => Ok(SnapshotStatus {
                ready_to_use: false,
                creation_time: None,
                size_bytes: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent_by_name() {
        let fake = FakeDriverClient::new();
        let params = BTreeMap::new();
        let a = fake.create_snapshot("snapshot-U1", "vh1", &params, &params).await.unwrap();
        let b = fake.create_snapshot("snapshot-U1", "vh1", &params, &params).await.unwrap();
        assert_eq!(a.snapshot_handle, b.snapshot_handle);
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_then_status_reports_absent() {
        let fake = FakeDriverClient::new();
        let params = BTreeMap::new();
        let info = fake.create_snapshot("snapshot-U1", "vh1", &params, &params).await.unwrap();
        fake.delete_snapshot(&info.snapshot_handle, &params).await.unwrap();
        assert_eq!(fake.snapshot_count(), 0);
    }

    #[tokio::test]
    async fn transient_failures_then_success_yields_one_physical_snapshot() {
        let fake = FakeDriverClient::new().fail_create_times(2);
        let params = BTreeMap::new();
        assert!(fake.create_snapshot("snapshot-U1", "vh1", &params, &params).await.is_err());
        assert!(fake.create_snapshot("snapshot-U1", "vh1", &params, &params).await.is_err());
        let ok = fake.create_snapshot("snapshot-U1", "vh1", &params, &params).await.unwrap();
        assert_eq!(ok.snapshot_handle, "handle-snapshot-U1");
        assert_eq!(fake.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.snapshot_count(), 1);
    }
}
