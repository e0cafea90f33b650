//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tree::Capacity;

/// Default listen port, overridable via the `PORT` environment variable
pub const DEFAULT_PORT: u16 = 3000;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent participants (0 = unlimited)
    pub max_participants: usize,

    /// Maximum children of the broadcaster
    pub root_capacity: usize,

    /// Maximum children of any listener
    pub node_capacity: usize,

    /// Participants silent longer than this are terminated
    pub heartbeat_timeout: Duration,

    /// Interval between liveness sweeps
    pub sweep_interval: Duration,

    /// Interval between rebalance passes
    pub rebalance_interval: Duration,

    /// Per-connection outbound queue length; overflow frames are dropped
    pub outbound_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_participants: 0, // Unlimited
            root_capacity: 2,
            node_capacity: 2,
            heartbeat_timeout: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(5),
            rebalance_interval: Duration::from_secs(8),
            outbound_queue: 64,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Read the configuration from the environment
    ///
    /// `PORT` selects the listen port; everything else keeps its default.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid PORT value: {port:?}")))?;
            config.bind_addr.set_port(port);
        }
        Ok(config)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum participants
    pub fn max_participants(mut self, max: usize) -> Self {
        self.max_participants = max;
        self
    }

    /// Set the fan-out limits
    pub fn capacities(mut self, root: usize, node: usize) -> Self {
        self.root_capacity = root;
        self.node_capacity = node;
        self
    }

    /// Set the heartbeat timeout
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the liveness sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the rebalance interval
    pub fn rebalance_interval(mut self, interval: Duration) -> Self {
        self.rebalance_interval = interval;
        self
    }

    /// Fan-out limits as a [`Capacity`]
    pub fn capacity(&self) -> Capacity {
        Capacity {
            root: self.root_capacity,
            node: self.node_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.max_participants, 0);
        assert_eq!(config.root_capacity, 2);
        assert_eq!(config.node_capacity, 2);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.rebalance_interval, Duration::from_secs(8));
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:3001".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 3001);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_participants(128)
            .capacities(4, 3)
            .heartbeat_timeout(Duration::from_secs(30))
            .sweep_interval(Duration::from_secs(2))
            .rebalance_interval(Duration::from_secs(4));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_participants, 128);
        assert_eq!(config.capacity(), Capacity { root: 4, node: 3 });
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(2));
        assert_eq!(config.rebalance_interval, Duration::from_secs(4));
    }
}
