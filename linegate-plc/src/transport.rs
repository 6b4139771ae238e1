//! Register transport abstraction

use crate::error::PlcError;
use async_trait::async_trait;
use linegate_core::PlcConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::Slave;
use tracing::debug;

/// Holding-register access to a PLC.
///
/// Implementations report failures as [`PlcError`] and leave policy
/// (retries, logging, fail-safe defaults) to the gateway.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Human readable endpoint, for logs and status
    fn endpoint(&self) -> String;

    /// Open a session, replacing any existing one
    async fn connect(&mut self) -> Result<(), PlcError>;

    /// Drop the session
    async fn disconnect(&mut self) -> Result<(), PlcError>;

    /// Read a single holding register
    async fn read_holding_register(&mut self, address: u16) -> Result<u16, PlcError>;

    /// Write a single holding register
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), PlcError>;

    /// Whether a session is currently open
    fn is_connected(&self) -> bool;
}

/// Modbus TCP transport backed by `tokio-modbus`
pub struct ModbusTcpTransport {
    host: String,
    port: u16,
    unit_id: u8,
    connect_timeout: Duration,
    io_timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusTcpTransport {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            connect_timeout: Duration::from_millis(2500),
            io_timeout: Duration::from_secs(1),
            ctx: None,
        }
    }

    pub fn from_config(config: &PlcConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.unit_id)
            .with_timeouts(config.connect_timeout(), config.io_timeout())
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }

    async fn resolve(host: String, port: u16) -> Result<SocketAddr, PlcError> {
        let mut addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
        addrs
            .next()
            .ok_or_else(|| PlcError::Config(format!("{}:{} did not resolve", host, port)))
    }

    fn io_timeout_ms(&self) -> u64 {
        self.io_timeout.as_millis() as u64
    }
}

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&mut self) -> Result<(), PlcError> {
        self.ctx = None;
        let addr = Self::resolve(self.host.clone(), self.port).await?;

        match timeout(self.connect_timeout, tcp::connect_slave(addr, Slave(self.unit_id))).await {
            Ok(Ok(ctx)) => {
                debug!("Modbus session opened to {} (unit {})", addr, self.unit_id);
                self.ctx = Some(ctx);
                Ok(())
            }
            Ok(Err(e)) => Err(PlcError::Transport(e.to_string())),
            Err(_) => Err(PlcError::Timeout(self.connect_timeout.as_millis() as u64)),
        }
    }

    async fn disconnect(&mut self) -> Result<(), PlcError> {
        // Dropping the context closes the socket
        self.ctx = None;
        Ok(())
    }

    async fn read_holding_register(&mut self, address: u16) -> Result<u16, PlcError> {
        let io_timeout = self.io_timeout;
        let ctx = self.ctx.as_mut().ok_or(PlcError::NotConnected)?;
        let result = timeout(io_timeout, ctx.read_holding_registers(address, 1)).await;

        match result {
            Ok(Ok(Ok(values))) => values.first().copied().ok_or_else(|| PlcError::Protocol {
                address,
                reason: "empty response".to_string(),
            }),
            Ok(Ok(Err(exception))) => Err(PlcError::Protocol {
                address,
                reason: format!("{:?}", exception),
            }),
            Ok(Err(e)) => {
                self.ctx = None;
                Err(PlcError::Transport(e.to_string()))
            }
            Err(_) => {
                self.ctx = None;
                Err(PlcError::Timeout(self.io_timeout_ms()))
            }
        }
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), PlcError> {
        let io_timeout = self.io_timeout;
        let ctx = self.ctx.as_mut().ok_or(PlcError::NotConnected)?;
        let result = timeout(io_timeout, ctx.write_single_register(address, value)).await;

        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(PlcError::Protocol {
                address,
                reason: format!("{:?}", exception),
            }),
            Ok(Err(e)) => {
                self.ctx = None;
                Err(PlcError::Transport(e.to_string()))
            }
            Err(_) => {
                self.ctx = None;
                Err(PlcError::Timeout(self.io_timeout_ms()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = PlcConfig::default();
        config.host = "10.1.2.3".to_string();
        config.port = 1502;
        let transport = ModbusTcpTransport::from_config(&config);
        assert_eq!(transport.endpoint(), "10.1.2.3:1502");
        assert_eq!(transport.connect_timeout, Duration::from_millis(2500));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_io_without_session() {
        let mut transport = ModbusTcpTransport::new("127.0.0.1", 502, 1);
        assert_eq!(transport.read_holding_register(0).await, Err(PlcError::NotConnected));
        assert_eq!(transport.write_register(22001, 1).await, Err(PlcError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a local port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = ModbusTcpTransport::new("127.0.0.1", port, 1)
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(100));
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }
}
