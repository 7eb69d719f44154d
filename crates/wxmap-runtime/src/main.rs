//! wxmap: live vehicle weather telemetry on a bounded marker map.
//! Single-process binary embedding the gateway, marker store and control
//! socket in-process.

use clap::Parser;

mod cli;
mod client;
mod daemon;
mod demo;
mod server;
mod surface;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("WXMAP_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!(topic = %opts.topic, "wxmap daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Latest(opts) => {
            client::cmd_latest(&socket_path, &opts).await?;
        }
        cli::Command::Markers(opts) => {
            client::cmd_markers(&socket_path, &opts).await?;
        }
        cli::Command::Status(opts) => {
            client::cmd_status(&socket_path, &opts).await?;
        }
    }

    Ok(())
}
