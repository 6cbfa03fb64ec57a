//! End-to-end exercise of the dynamic-provisioning happy path (spec §8
//! concrete scenario 1), driven against a mocked Kubernetes API using the
//! same `tower_test::mock` construction `kube`'s own test suite uses
//! (see `kube::mock_tests`), plus the real `CommonCtx` and reconcile
//! functions. No real cluster, no real driver.

use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response};
use kube::client::Body;
use kube::runtime::{reflector, watcher};
use kube::Client;
use serde_json::json;
use snapshot_controller::cache::ObjectCache;
use snapshot_controller::crd::{VolumeSnapshot, VolumeSnapshotClass, VolumeSnapshotContent};
use snapshot_controller::rate_limiter::RetryPolicy;
use snapshot_controller::reconcile::common_snapshot::reconcile_snapshot;
use snapshot_controller::reconcile::CommonCtx;
use snapshot_controller::workqueue::WorkQueue;

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

async fn respond_json(handle: &mut ApiServerHandle, method: http::Method, path_contains: &str, body: serde_json::Value) {
    let (request, send) = handle
        .next_request()
        .await
        .unwrap_or_else(|| panic!("expected a request matching {method} {path_contains} but none arrived"));
    assert_eq!(request.method(), method, "unexpected method for {path_contains}");
    let uri = request.uri().to_string();
    assert!(uri.contains(path_contains), "uri {uri} did not contain {path_contains}");
    let payload = serde_json::to_vec(&body).unwrap();
    send.send_response(Response::builder().body(Body::from(payload)).unwrap());
}

fn pvc(name: &str, volume_name: &str, finalizers: Vec<&str>) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": name, "namespace": "ns", "finalizers": finalizers },
        "spec": { "volumeName": volume_name },
    })
}

fn pv(name: &str, driver: &str, volume_handle: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolume",
        "metadata": { "name": name },
        "spec": { "csi": { "driver": driver, "volumeHandle": volume_handle } },
    })
}

#[tokio::test]
async fn dynamic_happy_path_creates_content_and_installs_finalizers() {
    let (mock_service, mut handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    let client = Client::new(mock_service, "ns");

    let retry_policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_secs(1));
    let snapshot_queue = WorkQueue::new(retry_policy);
    let content_queue = WorkQueue::new(retry_policy);

    let (snapshot_store, mut snapshot_writer) = reflector::store::<VolumeSnapshot>();
    snapshot_writer.apply_watcher_event(&watcher::Event::Apply(serde_json::from_value(json!({
        "apiVersion": "snapshot.storage.k8s.io/v1",
        "kind": "VolumeSnapshot",
        "metadata": { "name": "s1", "namespace": "ns", "uid": "U1" },
        "spec": {
            "source": { "persistentVolumeClaimName": "c1" },
            "volumeSnapshotClassName": "gold",
        },
    })).unwrap()));

    let (content_store, _content_writer) = reflector::store::<VolumeSnapshotContent>();

    let (class_store, mut class_writer) = reflector::store::<VolumeSnapshotClass>();
    class_writer.apply_watcher_event(&watcher::Event::Apply(serde_json::from_value(json!({
        "apiVersion": "snapshot.storage.k8s.io/v1",
        "kind": "VolumeSnapshotClass",
        "metadata": { "name": "gold" },
        "spec": { "driver": "d", "deletionPolicy": "Delete" },
    })).unwrap()));

    let ctx = Arc::new(CommonCtx {
        client: client.clone(),
        snapshots: Arc::new(ObjectCache::from_store(snapshot_store)),
        contents: Arc::new(ObjectCache::from_store(content_store)),
        classes: Arc::new(ObjectCache::from_store(class_store)),
        content_queue: Arc::clone(&content_queue),
        snapshot_queue: Arc::clone(&snapshot_queue),
        prevent_volume_mode_conversion: false,
    });

    let server = tokio::spawn(async move {
        // 1. fetch the snapshot.
        respond_json(&mut handle, http::Method::GET, "/volumesnapshots/s1", json!({
            "apiVersion": "snapshot.storage.k8s.io/v1",
            "kind": "VolumeSnapshot",
            "metadata": { "name": "s1", "namespace": "ns", "uid": "U1" },
            "spec": {
                "source": { "persistentVolumeClaimName": "c1" },
                "volumeSnapshotClassName": "gold",
            },
        })).await;
        // 2. install the bound-protection finalizer.
        respond_json(&mut handle, http::Method::PATCH, "/volumesnapshots/s1", json!({
            "apiVersion": "snapshot.storage.k8s.io/v1",
            "kind": "VolumeSnapshot",
            "metadata": { "name": "s1", "namespace": "ns", "uid": "U1" },
            "spec": { "source": { "persistentVolumeClaimName": "c1" }, "volumeSnapshotClassName": "gold" },
        })).await;
        // 3. resolve the claim's bound volume.
        respond_json(&mut handle, http::Method::GET, "/persistentvolumeclaims/c1", pvc("c1", "pv1", vec![])).await;
        respond_json(&mut handle, http::Method::GET, "/persistentvolumes/pv1", pv("pv1", "d", "vh-c1")).await;
        // 4. create the backing content.
        respond_json(&mut handle, http::Method::POST, "/volumesnapshotcontents", json!({
            "apiVersion": "snapshot.storage.k8s.io/v1",
            "kind": "VolumeSnapshotContent",
            "metadata": { "name": "snapcontent-U1" },
            "spec": {
                "source": { "volumeHandle": "vh-c1" },
                "volumeSnapshotRef": { "name": "s1", "namespace": "ns", "uid": "U1" },
                "deletionPolicy": "Delete",
                "driver": "d",
                "volumeSnapshotClassName": "gold",
            },
        })).await;
        // 5. ensure the claim's protection finalizer.
        respond_json(&mut handle, http::Method::GET, "/persistentvolumeclaims/c1", pvc("c1", "pv1", vec![])).await;
        respond_json(&mut handle, http::Method::PATCH, "/persistentvolumeclaims/c1", pvc("c1", "pv1", vec!["snapshot.storage.kubernetes.io/volume-claim-protection"])).await;
        // 6. claim-finalizer lifecycle re-check: the claim already carries
        // the finalizer, so no further PATCH is issued.
        respond_json(&mut handle, http::Method::GET, "/persistentvolumeclaims/c1", pvc("c1", "pv1", vec!["snapshot.storage.kubernetes.io/volume-claim-protection"])).await;
    });

    reconcile_snapshot(&ctx, "ns", "s1").await.expect("reconcile should succeed");

    tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .expect("mock api server scenario timed out")
        .expect("mock api server task panicked");

    snapshot_queue.shutdown();
    content_queue.shutdown();
}
