//! Metrics surface (spec §2 item 9, §6.1): a counter + histogram pair
//! per driver per operation kind. The sidecar calls [`start_operation`]
//! before a driver RPC and [`OperationSample::finish`] after.

#[cfg(feature = "metrics")]
mod enabled {
    use once_cell::sync::Lazy;
    use prometheus_client::encoding::EncodeLabelSet;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::histogram::Histogram;
    use prometheus_client::registry::Registry;
    use std::time::Instant;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    pub struct OperationLabels {
        pub driver: String,
        pub operation: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    pub struct OperationResultLabels {
        pub driver: String,
        pub operation: String,
        pub result: String,
    }

    pub static OPERATIONS_TOTAL: Lazy<Family<OperationResultLabels, Counter>> =
        Lazy::new(Family::default);

    pub static OPERATION_DURATION_SECONDS: Lazy<Family<OperationLabels, Histogram>> = Lazy::new(|| {
        Family::new_with_constructor(|| {
            Histogram::new([0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0].into_iter())
        })
    });

    pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
        let mut registry = Registry::default();
        registry.register(
            "snapshot_controller_operations",
            "Total number of driver operations, by result",
            OPERATIONS_TOTAL.clone(),
        );
        registry.register(
            "snapshot_controller_operation_duration_seconds",
            "Duration of driver operations",
            OPERATION_DURATION_SECONDS.clone(),
        );
        registry
    });

    /// RAII sample: construct at the start of a driver call, call
    /// `finish(ok)` when it completes.
    pub struct OperationSample {
        driver: String,
        operation: String,
        started: Instant,
    }

    pub fn start_operation(driver: &str, operation: &str) -> OperationSample {
        OperationSample {
            driver: driver.to_string(),
            operation: operation.to_string(),
            started: Instant::now(),
        }
    }

    impl OperationSample {
        pub fn finish(self, ok: bool) {
            OPERATION_DURATION_SECONDS
                .get_or_create(&OperationLabels {
                    driver: self.driver.clone(),
                    operation: self.operation.clone(),
                })
                .observe(self.started.elapsed().as_secs_f64());
            OPERATIONS_TOTAL
                .get_or_create(&OperationResultLabels {
                    driver: self.driver,
                    operation: self.operation,
                    result: if ok { "success".to_string() } else { "failure".to_string() },
                })
                .inc();
        }
    }

    pub fn encode() -> String {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &REGISTRY).expect("metrics encode");
        buf
    }
}

#[cfg(feature = "metrics")]
pub use enabled::*;

#[cfg(feature = "metrics")]
pub async fn serve(addr: std::net::SocketAddr) -> std::io::Result<()> {
    use axum::{routing::get, Router};

    let app = Router::new().route("/metrics", get(|| async { enabled::encode() }));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {addr}");
    axum::serve(listener, app).await
}

#[cfg(not(feature = "metrics"))]
pub struct OperationSample;

#[cfg(not(feature = "metrics"))]
impl OperationSample {
    pub fn finish(self, _ok: bool) {}
}

#[cfg(not(feature = "metrics"))]
pub fn start_operation(_driver: &str, _operation: &str) -> OperationSample {
    OperationSample
}
