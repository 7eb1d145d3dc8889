// ABOUTME: Configuration surfaces for the server and client engines
// ABOUTME: Builder-style structs with Default impls matching the protocol's documented defaults

use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 2024;
pub const DEFAULT_MAX_CLIENTS: usize = 254;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_THRESHOLD: u32 = 3;

/// Configuration for a server engine.
///
/// # Example
///
/// ```
/// use chatrelay::config::ServerConfig;
///
/// let config = ServerConfig::new("myhost")
///     .with_port(3000)
///     .with_max_clients(32);
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub addr: Ipv4Addr,
    /// Port the listener binds to.
    pub port: u16,
    /// Name returned to clients that issue REQHOST.
    pub name: String,
    /// Upper bound on simultaneously connected clients (ids `1..=254` at most).
    pub max_clients: usize,
    /// Interval between heartbeat liveness ticks.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before a connection is declared dead.
    pub heartbeat_threshold: u32,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            addr: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            name: name.into(),
            max_clients: DEFAULT_MAX_CLIENTS,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_threshold: DEFAULT_HEARTBEAT_THRESHOLD,
        }
    }

    pub fn with_addr(mut self, addr: Ipv4Addr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_threshold(mut self, threshold: u32) -> Self {
        self.heartbeat_threshold = threshold;
        self
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.addr.into(), self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("chatrelay-server")
    }
}

/// Configuration for a client engine.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address to connect to.
    pub addr: Ipv4Addr,
    /// Port to connect to.
    pub port: u16,
    /// Display name registered with the server at CONNECT time.
    pub name: String,
    /// Interval between heartbeat liveness ticks.
    pub heartbeat_interval: Duration,
    /// Consecutive missed heartbeats before the connection is declared dead.
    pub heartbeat_threshold: u32,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            addr: Ipv4Addr::LOCALHOST,
            port: DEFAULT_PORT,
            name: name.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_threshold: DEFAULT_HEARTBEAT_THRESHOLD,
        }
    }

    pub fn with_addr(mut self, addr: Ipv4Addr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.addr.into(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_clients, DEFAULT_MAX_CLIENTS);
        assert_eq!(config.heartbeat_threshold, DEFAULT_HEARTBEAT_THRESHOLD);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let config = ServerConfig::new("host").with_port(9999).with_max_clients(10);
        assert_eq!(config.port, 9999);
        assert_eq!(config.max_clients, 10);
    }
}
