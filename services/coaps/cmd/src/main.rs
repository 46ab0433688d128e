//! Secure CoAP gateway node.
//!
//! Serves the built-in resources over one UDP socket shared by every peer, or,
//! in client role, sends a periodic GET to a fixed server and logs the answers.

use clap::Parser;
use std::{net::SocketAddr, path::PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod runtime;

use config::{GatewayConfig, Role, Security};
use logging::CoapsLogFormatter;
use runtime::Gateway;

/// Secure CoAP gateway
#[derive(Parser, Debug)]
#[command(name = "coaps", version, about = "CoAP gateway over PSK-secured datagram sessions")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "coaps.yaml")]
    config: PathBuf,

    /// Serve requests or send them
    #[arg(long, value_enum)]
    role: Option<Role>,

    /// Record protection
    #[arg(long, value_enum)]
    security: Option<Security>,

    /// Local UDP port
    #[arg(long)]
    local_port: Option<u16>,

    /// Server address for the client role, e.g. [fd00::1]:7777
    #[arg(long)]
    peer: Option<SocketAddr>,

    /// Client request period, e.g. 3s
    #[arg(long)]
    send_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(security) = self.security {
            config.security = security;
        }
        if let Some(port) = self.local_port {
            config.local_port = port;
        }
        if let Some(peer) = self.peer {
            config.remote_peer = peer;
        }
        if let Some(interval) = self.send_interval {
            config.send_interval = interval.into();
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("coaps={}", args.log_level).parse()?)
        .add_directive(format!("coaps_session={}", args.log_level).parse()?)
        .add_directive(format!("coaps_dispatch={}", args.log_level).parse()?)
        .add_directive(format!("coaps_wire={}", args.log_level).parse()?);

    let formatter = CoapsLogFormatter::new("coaps".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
        .event_format(formatter)
        .init();

    info!("Starting coaps gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = GatewayConfig::load_from_file(&args.config)?;
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        component_event!(error, "config", "Invalid configuration: {:#}", e);
        return Err(e);
    }

    info!(
        "Gateway config: role={:?}, security={:?}, bind={}, peer={}, send_interval={:?}, identity={}",
        config.role,
        config.security,
        config.bind_addr(),
        config.remote_peer,
        config.send_interval,
        config.psk.identity
    );

    let gateway = Gateway::bind(config).await?;
    let stats = gateway
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                component_event!(warn, "runtime", "Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("Final counters: {}", stats);
    info!("coaps gateway shutdown complete");
    Ok(())
}
