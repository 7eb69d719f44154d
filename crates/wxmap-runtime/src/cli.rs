//! CLI definition using clap derive.

use clap::{Parser, Subcommand};

use wxmap_core::Topic;
use wxmap_markers::MAX_MARKERS;

#[derive(Parser)]
#[command(
    name = "wxmap",
    version,
    about = "Live vehicle weather telemetry on a bounded marker map"
)]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/wxmap/wxmapd.sock or /tmp/wxmap-$USER/wxmapd.sock)
    #[arg(long, short = 's', global = true, env = "WXMAP_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (gateway + marker store + UDS server)
    Daemon(DaemonOpts),
    /// Show the latest reading
    Latest(OutputOpts),
    /// List retained markers, oldest first
    Markers(MarkersOpts),
    /// Show gateway status
    Status(OutputOpts),
}

#[derive(clap::Args)]
pub struct DaemonOpts {
    /// Stream id to subscribe to
    #[arg(long, env = "WXMAP_TOPIC", default_value_t = Topic::default())]
    pub topic: Topic,

    /// WebSocket broker base URL (ws:// or wss://)
    #[arg(long, env = "WXMAP_WS_URL", required_unless_present = "demo")]
    pub ws_url: Option<String>,

    /// Broker API key
    #[arg(long, env = "WXMAP_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Number of partitions the topic is deployed with. The broker has no
    /// discovery call, so this must match the deployment.
    #[arg(long, env = "WXMAP_PARTITIONS", required_unless_present = "demo")]
    pub partitions: Option<u32>,

    /// Maximum number of markers kept on the map
    #[arg(long, env = "WXMAP_MAX_MARKERS", default_value_t = MAX_MARKERS)]
    pub max_markers: usize,

    /// Run against an in-process broker fed with simulated readings
    #[arg(long, conflicts_with = "ws_url")]
    pub demo: bool,

    /// Partitions of the simulated topic
    #[arg(long, default_value = "3", requires = "demo")]
    pub demo_partitions: u32,

    /// Interval between simulated readings in milliseconds
    #[arg(long, default_value = "500", requires = "demo")]
    pub demo_interval_ms: u64,
}

#[derive(clap::Args, Default)]
pub struct OutputOpts {
    /// Print the raw JSON-RPC result
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Default)]
pub struct MarkersOpts {
    /// Show only the newest N markers
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub output: OutputOpts,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/wxmap/wxmapd.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/wxmap-{user}/wxmapd.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_defaults_in_demo_mode() {
        let cli = Cli::try_parse_from(["wxmap", "daemon", "--demo"]).expect("parse");
        let Command::Daemon(opts) = cli.command else {
            panic!("expected daemon subcommand");
        };
        assert!(opts.demo);
        assert_eq!(opts.topic, Topic::default());
        assert_eq!(opts.max_markers, 100);
        assert_eq!(opts.demo_partitions, 3);
    }

    #[test]
    fn daemon_requires_a_broker() {
        assert!(Cli::try_parse_from(["wxmap", "daemon"]).is_err());
    }

    #[test]
    fn ws_url_requires_partitions() {
        assert!(Cli::try_parse_from(["wxmap", "daemon", "--ws-url", "ws://b"]).is_err());

        let cli = Cli::try_parse_from(["wxmap", "daemon", "--ws-url", "ws://b", "--partitions", "3"])
            .expect("parse");
        let Command::Daemon(opts) = cli.command else {
            panic!("expected daemon subcommand");
        };
        assert_eq!(opts.partitions, Some(3));
    }

    #[test]
    fn demo_conflicts_with_ws_url() {
        assert!(
            Cli::try_parse_from(["wxmap", "daemon", "--demo", "--ws-url", "ws://b"]).is_err()
        );
    }

    #[test]
    fn rejects_invalid_topic() {
        assert!(
            Cli::try_parse_from(["wxmap", "daemon", "--demo", "--topic", " padded "]).is_err()
        );
    }

    #[test]
    fn socket_path_is_global() {
        let cli = Cli::try_parse_from(["wxmap", "markers", "-n", "5", "-s", "/tmp/x.sock"])
            .expect("parse");
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
        let Command::Markers(opts) = cli.command else {
            panic!("expected markers subcommand");
        };
        assert_eq!(opts.limit, Some(5));
    }
}
