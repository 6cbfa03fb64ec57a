//! `snapshot-controller` entry point.
//!
//! Runs the common reconciler: paired snapshot/content sub-reconcilers
//! sharing one object cache and one set of work queues per kind.

use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use kube::Client;
use snapshot_controller::cache::ObjectCache;
use snapshot_controller::config::ControllerArgs;
use snapshot_controller::crd::{VolumeSnapshot, VolumeSnapshotClass, VolumeSnapshotContent};
use snapshot_controller::rate_limiter::RetryPolicy;
use snapshot_controller::reconcile::{common_content, common_snapshot, CommonCtx};
use snapshot_controller::workqueue::WorkQueue;
use snapshot_controller::{telemetry, Error};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Requeue policy for a failed reconcile tick (spec §7). Mirrors
/// `Error::is_retriable`/`Error::requeue_after`: `Validation` is left
/// alone until the next resync, `ObjectConflict`/`FinalDriver` requeue
/// at the fixed interval the error prescribes without growing the
/// backoff window, and everything else falls back to the queue's own
/// exponential backoff.
async fn requeue_after_error(queue: &Arc<WorkQueue<snapshot_controller::cache::ObjKey>>, key: snapshot_controller::cache::ObjKey, error: &Error, retry_policy: &RetryPolicy) {
    if !error.is_retriable() {
        return;
    }
    match error.requeue_after(retry_policy, 0) {
        Some(delay) if matches!(error, Error::ObjectConflict(_) | Error::FinalDriver(_)) => {
            queue.add_after(key, delay);
        }
        _ => queue.add_rate_limited(key).await,
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = ControllerArgs::parse();

    let env_filter = EnvFilter::builder().with_default_directive(Level::INFO.into()).from_env_lossy();
    let fmt_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    if otel_enabled {
        let otel_layer = telemetry::init_telemetry(&registry, "snapshot-controller");
        registry.with(otel_layer).init();
    } else {
        registry.init();
    }

    info!("starting snapshot-controller v{}", env!("CARGO_PKG_VERSION"));

    let client = if let Some(path) = args.common.kubeconfig_path() {
        let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| Error::Config(e.to_string()))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| Error::Config(e.to_string()))?;
        Client::try_from(config)?
    } else {
        Client::try_default().await?
    };

    let retry_policy = RetryPolicy::new(args.common.retry_interval_start, args.common.retry_interval_max);
    let snapshot_queue = WorkQueue::new(retry_policy);
    let content_queue = WorkQueue::new(retry_policy);

    let (snapshots, snapshot_watch) = ObjectCache::<VolumeSnapshot>::start(
        kube::Api::all(client.clone()),
        Arc::clone(&snapshot_queue),
        args.common.resync_period,
    );
    let (contents, content_watch) = ObjectCache::<VolumeSnapshotContent>::start(
        kube::Api::all(client.clone()),
        Arc::clone(&content_queue),
        args.common.resync_period,
    );
    let (classes, class_watch) = ObjectCache::<VolumeSnapshotClass>::start(
        kube::Api::all(client.clone()),
        Arc::clone(&content_queue),
        args.common.resync_period,
    );

    let ctx = Arc::new(CommonCtx {
        client: client.clone(),
        snapshots: Arc::new(snapshots),
        contents: Arc::new(contents),
        classes: Arc::new(classes),
        content_queue: Arc::clone(&content_queue),
        snapshot_queue: Arc::clone(&snapshot_queue),
        prevent_volume_mode_conversion: args.common.prevent_volume_mode_conversion,
    });

    #[cfg(feature = "metrics")]
    {
        if let Ok(addr) = args.common.http_endpoint.parse() {
            tokio::spawn(snapshot_controller::metrics::serve(addr));
        }
    }

    let snapshot_workers = (0..args.common.worker_threads).map(|_| {
        let ctx = Arc::clone(&ctx);
        let queue = Arc::clone(&snapshot_queue);
        tokio::spawn(async move {
            while let Some(key) = queue.get().await {
                let namespace = key.namespace.clone().unwrap_or_default();
                if let Err(e) = common_snapshot::reconcile_snapshot(&ctx, &namespace, &key.name).await {
                    error!(key = %key, error = %e, "snapshot reconcile failed");
                    requeue_after_error(&queue, key.clone(), &e, &retry_policy).await;
                } else {
                    queue.forget(&key).await;
                }
                queue.done(&key).await;
            }
        })
    });

    let content_workers = (0..args.common.worker_threads).map(|_| {
        let ctx = Arc::clone(&ctx);
        let queue = Arc::clone(&content_queue);
        tokio::spawn(async move {
            while let Some(key) = queue.get().await {
                if let Err(e) = common_content::reconcile_content(&ctx, &key.name).await {
                    error!(key = %key, error = %e, "content reconcile failed");
                    requeue_after_error(&queue, key.clone(), &e, &retry_policy).await;
                } else {
                    queue.forget(&key).await;
                }
                queue.done(&key).await;
            }
        })
    });

    tokio::select! {
        _ = join_all(snapshot_workers.chain(content_workers)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            snapshot_queue.shutdown();
            content_queue.shutdown();
        }
    }

    snapshot_watch.abort();
    content_watch.abort();
    class_watch.abort();

    if otel_enabled {
        telemetry::shutdown_telemetry();
    }

    Ok(())
}
