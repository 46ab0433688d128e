//! Host event loop: one socket, one engine, one task.

use crate::config::{GatewayConfig, Role, Security};
use crate::component_event;
use anyhow::{Context, Result};
use coaps_dispatch::{local_clock, register_defaults, Dispatcher, ResourceTable};
use coaps_session::{
    BridgeRole, BridgeStats, ClientLoop, ClientRequest, NoSecEngine, PskEngine, PumpOutcome,
    ReadPump, SecureSessionEngine, TransportBridge,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{self, Instant, MissedTickBehavior};

type UdpBridge = TransportBridge<Arc<UdpSocket>>;

/// A bound gateway node, ready to run
pub struct Gateway {
    config: GatewayConfig,
    socket: Arc<UdpSocket>,
}

impl Gateway {
    /// Bind the configured local address
    pub async fn bind(config: GatewayConfig) -> Result<Self> {
        let addr = config.bind_addr();
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        Ok(Self {
            config,
            socket: Arc::new(socket),
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Run until `shutdown` resolves, then close every session.
    ///
    /// Returns the bridge counters at exit.
    pub async fn run<F>(self, shutdown: F) -> Result<BridgeStats>
    where
        F: Future<Output = ()>,
    {
        let bridge = self.build_bridge()?;
        component_event!(
            info,
            "runtime",
            "Listening on {} as {:?} with {:?} security",
            self.local_addr()?,
            self.config.role,
            self.config.security
        );

        match self.config.security {
            Security::Psk => {
                let engine = PskEngine::new(bridge, self.config.psk_config());
                drive(engine, &self.socket, &self.config, shutdown).await
            }
            Security::NoSec => {
                let engine = NoSecEngine::new(bridge, self.config.idle_timeout);
                drive(engine, &self.socket, &self.config, shutdown).await
            }
        }
    }

    fn build_bridge(&self) -> Result<UdpBridge> {
        let role = match self.config.role {
            Role::Server => {
                let mut table = ResourceTable::new();
                register_defaults(&mut table, local_clock)?;
                component_event!(debug, "runtime", "Resources: {}", table.link_format());
                BridgeRole::Server(Dispatcher::new(table))
            }
            Role::Client => BridgeRole::Client,
        };
        Ok(TransportBridge::new(
            self.socket.clone(),
            self.config.credentials(),
            role,
            self.config.max_response_size,
        ))
    }
}

async fn drive<E, F>(
    mut engine: E,
    socket: &UdpSocket,
    config: &GatewayConfig,
    shutdown: F,
) -> Result<BridgeStats>
where
    E: SecureSessionEngine<Handler = UdpBridge>,
    F: Future<Output = ()>,
{
    let start = Instant::now();
    let mut pump = ReadPump::new(config.max_datagram);
    let mut client = match config.role {
        Role::Client => Some(ClientLoop::new(
            config.remote_peer,
            config.send_interval,
            ClientRequest::get(&config.request_path),
            start.into_std(),
            config.max_datagram,
        )),
        Role::Server => None,
    };

    let mut tick = time::interval_at(start + config.tick_interval, config.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = time::interval_at(start + config.stats_interval, config.stats_interval);
    stats.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);

    loop {
        let client_deadline = client
            .as_ref()
            .map(|c| Instant::from_std(c.deadline()))
            .unwrap_or(start);

        tokio::select! {
            ready = socket.readable() => {
                ready.context("socket readiness failed")?;
                match pump.on_datagram_available(&mut engine, Instant::now().into_std()) {
                    PumpOutcome::Deferred(kind) => {
                        component_event!(debug, "runtime", "Receive deferred: {:?}", kind);
                    }
                    PumpOutcome::Idle
                    | PumpOutcome::Processed { .. }
                    | PumpOutcome::Rejected { .. } => {}
                }
            }
            _ = time::sleep_until(client_deadline), if client.is_some() => {
                if let Some(client) = client.as_mut() {
                    if let Err(e) = client.poll(&mut engine, Instant::now().into_std()) {
                        component_event!(warn, "client", "Request to {} not sent: {}", client.peer(), e);
                    }
                }
            }
            _ = tick.tick() => {
                engine.tick(Instant::now().into_std());
            }
            _ = stats.tick() => {
                component_event!(
                    info,
                    "stats",
                    "{} sessions={}",
                    engine.handler().stats(),
                    engine.session_count()
                );
            }
            _ = &mut shutdown => {
                component_event!(info, "runtime", "Shutting down, closing {} sessions", engine.session_count());
                engine.close_all();
                break;
            }
        }
    }

    Ok(engine.handler().stats().clone())
}
