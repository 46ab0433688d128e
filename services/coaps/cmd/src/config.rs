//! Configuration handling for the coaps gateway.
//!
//! Values come from a YAML file, then `COAPS_*` environment variables, then
//! command line flags. Everything is fixed once the gateway starts.

use anyhow::{bail, Context, Result};
use coaps_session::psk::handshake::{MAX_IDENTITY_LEN, MAX_PSK_LEN};
use coaps_session::{CredentialStore, PskConfig, PskRole};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Smallest message the wire format can carry
const MIN_MESSAGE_SIZE: usize = 4;

/// Which side of the exchange this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Answer requests from any peer
    Server,
    /// Send a periodic request to the remote peer
    Client,
}

/// Record protection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Pre-shared key sessions
    Psk,
    /// Plaintext datagrams
    #[value(name = "nosec")]
    NoSec,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub role: Role,
    pub security: Security,
    /// Local address to bind, `::` for every interface
    pub bind_address: IpAddr,
    pub local_port: u16,
    /// Server the client role talks to
    pub remote_peer: SocketAddr,
    #[serde(with = "duration_str")]
    pub send_interval: Duration,
    /// Uri-Path of the periodic client request
    pub request_path: String,
    pub psk: PskCredentials,
    /// Response buffer size; larger responses are dropped
    pub max_response_size: usize,
    /// Receive buffer size
    pub max_datagram: usize,
    pub max_peers: usize,
    /// Sessions silent this long are closed
    #[serde(with = "duration_str")]
    pub idle_timeout: Duration,
    /// First handshake retransmission delay
    #[serde(with = "duration_str")]
    pub retransmit_interval: Duration,
    pub max_retransmits: u32,
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,
    #[serde(with = "duration_str")]
    pub stats_interval: Duration,
}

/// PSK identity and key
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PskCredentials {
    pub identity: String,
    pub key: String,
}

impl std::fmt::Debug for PskCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PskCredentials")
            .field("identity", &self.identity)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Default for PskCredentials {
    fn default() -> Self {
        Self {
            identity: "Client_identity".to_string(),
            key: "secretPSK".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            security: Security::Psk,
            bind_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            local_port: 6666,
            remote_peer: SocketAddr::new(
                IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)),
                7777,
            ),
            send_interval: Duration::from_secs(3),
            request_path: "hello".to_string(),
            psk: PskCredentials::default(),
            max_response_size: 256,
            max_datagram: 1280,
            max_peers: 3,
            idle_timeout: Duration::from_secs(10),
            retransmit_interval: Duration::from_secs(1),
            max_retransmits: 4,
            tick_interval: Duration::from_millis(250),
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from file and environment variables.
    ///
    /// A missing file falls back to defaults; a file that does not parse is an
    /// error.
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();
        Ok(config)
    }

    /// Apply `COAPS_*` environment variables
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role) = lookup("COAPS_ROLE") {
            let parsed = match role.to_lowercase().as_str() {
                "server" => Some(Role::Server),
                "client" => Some(Role::Client),
                _ => None,
            };
            match parsed {
                Some(parsed) => {
                    self.role = parsed;
                    info!("Role overridden by environment: {:?}", parsed);
                }
                None => warn!("Ignoring COAPS_ROLE={}", role),
            }
        }

        if let Some(port) = lookup("COAPS_LOCAL_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.local_port = port;
                    info!("Local port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring COAPS_LOCAL_PORT={}", port),
            }
        }

        if let Some(peer) = lookup("COAPS_REMOTE_PEER") {
            match peer.parse::<SocketAddr>() {
                Ok(peer) => {
                    self.remote_peer = peer;
                    info!("Remote peer overridden by environment: {}", peer);
                }
                Err(_) => warn!("Ignoring COAPS_REMOTE_PEER={}", peer),
            }
        }

        if let Some(identity) = lookup("COAPS_PSK_IDENTITY") {
            info!("PSK identity overridden by environment: {}", identity);
            self.psk.identity = identity;
        }

        if let Some(key) = lookup("COAPS_PSK_KEY") {
            info!("PSK key overridden by environment");
            self.psk.key = key;
        }
    }

    /// Reject settings the gateway cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.psk.identity.is_empty() {
            bail!("PSK identity must not be empty");
        }
        if self.psk.identity.len() > MAX_IDENTITY_LEN {
            bail!(
                "PSK identity is {} bytes, at most {} are supported",
                self.psk.identity.len(),
                MAX_IDENTITY_LEN
            );
        }
        if self.psk.key.is_empty() {
            bail!("PSK key must not be empty");
        }
        if self.psk.key.len() > MAX_PSK_LEN {
            bail!(
                "PSK key is {} bytes, at most {} are supported",
                self.psk.key.len(),
                MAX_PSK_LEN
            );
        }
        if self.local_port == 0 {
            bail!("local_port must not be 0");
        }
        if self.role == Role::Client && self.remote_peer.port() == 0 {
            bail!("remote_peer {} has no port", self.remote_peer);
        }
        if self.send_interval.is_zero() {
            bail!("send_interval must be greater than zero");
        }
        if self.max_response_size < MIN_MESSAGE_SIZE {
            bail!(
                "max_response_size {} is below the {} byte minimum message",
                self.max_response_size,
                MIN_MESSAGE_SIZE
            );
        }
        if self.max_datagram < MIN_MESSAGE_SIZE {
            bail!("max_datagram {} is too small", self.max_datagram);
        }
        if self.max_peers == 0 {
            bail!("max_peers must be at least 1");
        }
        if self.tick_interval.is_zero() || self.stats_interval.is_zero() {
            bail!("tick_interval and stats_interval must be greater than zero");
        }
        Ok(())
    }

    /// Socket address to bind
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.local_port)
    }

    /// Credential store holding the configured identity
    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::single(self.psk.identity.as_bytes(), self.psk.key.as_bytes())
    }

    /// PSK engine settings for this role
    pub fn psk_config(&self) -> PskConfig {
        let role = match self.role {
            Role::Server => PskRole::Server,
            Role::Client => PskRole::Client {
                identity: self.psk.identity.as_bytes().to_vec(),
            },
        };
        PskConfig {
            role,
            max_peers: self.max_peers,
            idle_timeout: self.idle_timeout,
            retransmit_interval: self.retransmit_interval,
            max_retransmits: self.max_retransmits,
            ..PskConfig::default()
        }
    }
}

/// Durations as humantime strings, e.g. `250ms` or `1m 30s`
mod duration_str {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.security, Security::Psk);
        assert_eq!(config.local_port, 6666);
        assert_eq!(config.remote_peer, "[fd00::1]:7777".parse().unwrap());
        assert_eq!(config.send_interval, Duration::from_secs(3));
        assert_eq!(config.psk.identity, "Client_identity");
        assert_eq!(config.max_response_size, 256);
        assert_eq!(config.max_peers, 3);
        assert_eq!(config.bind_addr(), "[::]:6666".parse().unwrap());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
role: client
security: nosec
local_port: 5684
remote_peer: "[fd00::2]:5683"
send_interval: 500ms
request_path: time
psk:
  identity: node-7
  key: s3cret
idle_timeout: 1m 30s
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = GatewayConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.role, Role::Client);
        assert_eq!(config.security, Security::NoSec);
        assert_eq!(config.local_port, 5684);
        assert_eq!(config.remote_peer, "[fd00::2]:5683".parse().unwrap());
        assert_eq!(config.send_interval, Duration::from_millis(500));
        assert_eq!(config.request_path, "time");
        assert_eq!(config.psk.identity, "node-7");
        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        // untouched fields keep their defaults
        assert_eq!(config.max_datagram, 1280);
        assert_eq!(config.retransmit_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load_from_file(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config.local_port, GatewayConfig::default().local_port);
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"send_interval: soon\n").unwrap();
        assert!(GatewayConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = GatewayConfig::default();
        config.apply_overrides(overrides(&[
            ("COAPS_ROLE", "Client"),
            ("COAPS_LOCAL_PORT", "7000"),
            ("COAPS_REMOTE_PEER", "127.0.0.1:5683"),
            ("COAPS_PSK_IDENTITY", "gw-1"),
            ("COAPS_PSK_KEY", "k"),
        ]));

        assert_eq!(config.role, Role::Client);
        assert_eq!(config.local_port, 7000);
        assert_eq!(config.remote_peer, "127.0.0.1:5683".parse().unwrap());
        assert_eq!(config.psk.identity, "gw-1");
        assert_eq!(config.psk.key, "k");
    }

    #[test]
    fn test_bad_environment_values_ignored() {
        let mut config = GatewayConfig::default();
        config.apply_overrides(overrides(&[
            ("COAPS_ROLE", "relay"),
            ("COAPS_LOCAL_PORT", "99999"),
            ("COAPS_REMOTE_PEER", "nowhere"),
        ]));

        assert_eq!(config.role, Role::Server);
        assert_eq!(config.local_port, 6666);
        assert_eq!(config.remote_peer, GatewayConfig::default().remote_peer);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = GatewayConfig::default();
        config.psk.identity.clear();
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.psk.key.clear();
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.local_port = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.send_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.max_response_size = 3;
        assert!(config.validate().is_err());
        config.max_response_size = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_credentials() {
        // a key the engine cannot load would fail every handshake at run time
        let mut config = GatewayConfig::default();
        config.psk.key = "k".repeat(MAX_PSK_LEN + 1);
        assert!(config.validate().is_err());
        config.psk.key = "k".repeat(MAX_PSK_LEN);
        assert!(config.validate().is_ok());

        let mut config = GatewayConfig::default();
        config.psk.identity = "i".repeat(MAX_IDENTITY_LEN + 1);
        assert!(config.validate().is_err());
        config.psk.identity = "i".repeat(MAX_IDENTITY_LEN);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_psk_config_per_role() {
        let mut config = GatewayConfig::default();
        assert_eq!(config.psk_config().role, PskRole::Server);

        config.role = Role::Client;
        config.max_retransmits = 2;
        let psk = config.psk_config();
        assert_eq!(
            psk.role,
            PskRole::Client {
                identity: b"Client_identity".to_vec()
            }
        );
        assert_eq!(psk.max_retransmits, 2);
        assert_eq!(psk.max_peers, 3);
    }

    #[test]
    fn test_key_not_in_debug_output() {
        let config = GatewayConfig::default();
        assert!(!format!("{:?}", config).contains("secretPSK"));
    }
}
