//! Command-line configuration shared by both binaries (spec §6).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_like(s).ok_or_else(|| format!("invalid duration: {s}"))
}

/// Minimal duration parser accepting `90s`, `15m`, `1h`, or a bare integer
/// of seconds, without pulling in a dedicated humantime dependency.
fn humantime_like(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(n) = s.strip_suffix("ms") {
        return n.parse().ok().map(Duration::from_millis);
    }
    if let Some(n) = s.strip_suffix('s') {
        return n.parse().ok().map(Duration::from_secs);
    }
    if let Some(n) = s.strip_suffix('m') {
        return n.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    if let Some(n) = s.strip_suffix('h') {
        return n.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600));
    }
    s.parse().ok().map(Duration::from_secs)
}

/// Flags shared by `snapshot-controller` and `snapshot-sidecar`.
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to a kubeconfig file; empty uses in-cluster config.
    #[arg(long, env = "KUBECONFIG", default_value = "")]
    pub kubeconfig: String,

    #[arg(long, env = "RESYNC_PERIOD", default_value = "15m", value_parser = parse_duration)]
    pub resync_period: Duration,

    #[arg(long, env = "WORKER_THREADS", default_value_t = 10)]
    pub worker_threads: usize,

    #[arg(long, env = "LEADER_ELECTION", default_value_t = false)]
    pub leader_election: bool,

    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    #[arg(long, env = "LEASE_DURATION", default_value = "15s", value_parser = parse_duration)]
    pub lease_duration: Duration,

    #[arg(long, env = "RENEW_DEADLINE", default_value = "10s", value_parser = parse_duration)]
    pub renew_deadline: Duration,

    #[arg(long, env = "RETRY_PERIOD", default_value = "2s", value_parser = parse_duration)]
    pub retry_period: Duration,

    #[arg(long, env = "KUBE_API_QPS", default_value_t = 20.0)]
    pub kube_api_qps: f32,

    #[arg(long, env = "KUBE_API_BURST", default_value_t = 40)]
    pub kube_api_burst: u32,

    #[arg(long, env = "HTTP_ENDPOINT", default_value = "0.0.0.0:8080")]
    pub http_endpoint: String,

    #[arg(long, env = "METRICS_PATH", default_value = "/metrics")]
    pub metrics_path: String,

    #[arg(long, env = "RETRY_INTERVAL_START", default_value = "500ms", value_parser = parse_duration)]
    pub retry_interval_start: Duration,

    #[arg(long, env = "RETRY_INTERVAL_MAX", default_value = "300s", value_parser = parse_duration)]
    pub retry_interval_max: Duration,

    /// Forbid converting a claim's volume mode when binding a snapshot.
    #[arg(long, env = "PREVENT_VOLUME_MODE_CONVERSION", default_value_t = false)]
    pub prevent_volume_mode_conversion: bool,

    /// Comma-separated `name=bool` pairs; gates optional features such as
    /// group snapshots or distributed snapshotting that this build does
    /// not implement but whose flag surface callers may still pass.
    #[arg(long, env = "FEATURE_GATES", value_delimiter = ',')]
    pub feature_gates: Vec<String>,
}

impl CommonArgs {
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        if self.kubeconfig.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.kubeconfig))
        }
    }
}

/// `snapshot-controller`: runs the common reconciler (snapshot + content
/// sub-reconcilers), driver-agnostic.
#[derive(Parser, Debug, Clone)]
#[command(name = "snapshot-controller", version, about = "External CSI volume-snapshot reconciliation controller")]
pub struct ControllerArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// `snapshot-sidecar`: runs the per-driver sidecar reconciler, paired
/// 1:1 with a CSI driver over its Unix domain socket.
#[derive(Parser, Debug, Clone)]
#[command(name = "snapshot-sidecar", version, about = "Per-driver CSI snapshot sidecar")]
pub struct SidecarArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Path to the CSI driver's Unix domain socket.
    #[arg(long, env = "CSI_ADDRESS")]
    pub csi_address: PathBuf,

    #[arg(long, env = "SNAPSHOT_NAME_PREFIX", default_value = "snapshot")]
    pub snapshot_name_prefix: String,

    #[arg(long, env = "SNAPSHOT_NAME_UUID_LENGTH", default_value_t = 0)]
    pub snapshot_name_uuid_length: usize,

    /// Attach the source snapshot's name/namespace/UID as driver
    /// parameters on create.
    #[arg(long, env = "EXTRA_CREATE_METADATA", default_value_t = false)]
    pub extra_create_metadata: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(humantime_like("90s"), Some(Duration::from_secs(90)));
        assert_eq!(humantime_like("15m"), Some(Duration::from_secs(900)));
        assert_eq!(humantime_like("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(humantime_like("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(humantime_like("bogus"), None);
    }

    #[test]
    fn sidecar_args_require_csi_address() {
        let err = SidecarArgs::try_parse_from(["snapshot-sidecar"]).unwrap_err();
        assert!(err.to_string().contains("csi-address"));
    }

    #[test]
    fn sidecar_args_parse_with_csi_address() {
        let args = SidecarArgs::try_parse_from([
            "snapshot-sidecar",
            "--csi-address",
            "/var/lib/csi.sock",
            "--retry-interval-max",
            "60s",
        ])
        .unwrap();
        assert_eq!(args.csi_address, PathBuf::from("/var/lib/csi.sock"));
        assert_eq!(args.common.retry_interval_max, Duration::from_secs(60));
    }
}
