//! `snapshot-sidecar` entry point.
//!
//! One process per CSI driver; reconciles `VolumeSnapshotContent` objects
//! whose `spec.driver` matches this sidecar's driver name (spec §4.5).

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use snapshot_controller::cache::ObjectCache;
use snapshot_controller::config::SidecarArgs;
use snapshot_controller::crd::VolumeSnapshotContent;
use snapshot_controller::dispatch::Dispatcher;
use snapshot_controller::driver::{DriverClient, GrpcDriverClient};
use snapshot_controller::rate_limiter::RetryPolicy;
use snapshot_controller::reconcile::sidecar::{self, SidecarCtx};
use snapshot_controller::workqueue::WorkQueue;
use snapshot_controller::{telemetry, Error};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = SidecarArgs::parse();

    let env_filter = EnvFilter::builder().with_default_directive(Level::INFO.into()).from_env_lossy();
    let fmt_layer = fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    if otel_enabled {
        let otel_layer = telemetry::init_telemetry(&registry, "snapshot-sidecar");
        registry.with(otel_layer).init();
    } else {
        registry.init();
    }

    let client = if let Some(path) = args.common.kubeconfig_path() {
        let kubeconfig = kube::config::Kubeconfig::read_from(path).map_err(|e| Error::Config(e.to_string()))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| Error::Config(e.to_string()))?;
        Client::try_from(config)?
    } else {
        Client::try_default().await?
    };

    let driver: Arc<dyn DriverClient> = Arc::new(GrpcDriverClient::connect(args.csi_address.clone()).await?);
    driver.probe().await?;
    let driver_name = driver.driver_name().await?;
    info!(%driver_name, "connected to CSI driver");

    let retry_policy = RetryPolicy::new(args.common.retry_interval_start, args.common.retry_interval_max);
    let content_queue = WorkQueue::new(retry_policy);
    let (contents, content_watch) = ObjectCache::<VolumeSnapshotContent>::start(
        kube::Api::all(client.clone()),
        Arc::clone(&content_queue),
        args.common.resync_period,
    );

    let ctx = Arc::new(SidecarCtx {
        client,
        driver,
        driver_name,
        contents: Arc::new(contents),
        content_queue: Arc::clone(&content_queue),
        dispatcher: Dispatcher::new(retry_policy),
        snapshot_name_prefix: args.snapshot_name_prefix,
        snapshot_name_uuid_length: args.snapshot_name_uuid_length,
        extra_create_metadata: args.extra_create_metadata,
    });

    #[cfg(feature = "metrics")]
    {
        if let Ok(addr) = args.common.http_endpoint.parse() {
            tokio::spawn(snapshot_controller::metrics::serve(addr));
        }
    }

    let workers: Vec<_> = (0..args.common.worker_threads)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let queue = Arc::clone(&content_queue);
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    if let Err(e) = sidecar::reconcile_content(&ctx, &key.name).await {
                        error!(key = %key, error = %e, "sidecar reconcile failed");
                    } else {
                        queue.forget(&key).await;
                    }
                    queue.done(&key).await;
                }
            })
        })
        .collect();

    tokio::select! {
        _ = futures::future::join_all(workers) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            content_queue.shutdown();
        }
    }

    content_watch.abort();

    if otel_enabled {
        telemetry::shutdown_telemetry();
    }

    Ok(())
}
