use std::cmp::min;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::lookup_host;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::tcp;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tracing::{debug, info, warn};

/// Configuration options for connecting to a Modbus TCP device.
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Maximum number of registers to read in a single request; devices with quirks may require lower batch sizes.
    pub max_batch_size: Option<u16>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Optional delay between split reads to placate slower devices.
    pub inter_read_delay_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            max_batch_size: None,
            timeout_ms: 1_000,
            connect_timeout_ms: 3_000,
            inter_read_delay_ms: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid socket address {0}:{1}")]
    InvalidAddress(String, u16),
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("modbus transport error: {0}")]
    Modbus(std::io::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("register address overflow")]
    AddressOverflow,
}

impl ClientError {
    /// True when the session can no longer be trusted and should be reopened.
    ///
    /// Every transport failure counts, including the `WouldBlock` tokio-modbus
    /// reports when the peer closes the socket. Only exception responses
    /// (`ErrorKind::Other`) prove the session is still alive.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ClientError::Timeout { .. } => true,
            ClientError::Modbus(err) => err.kind() != ErrorKind::Other,
            _ => false,
        }
    }
}

/// Register-level access to one Modbus device.
///
/// [`ModbusClient`] is the TCP implementation; meter and heat pump drivers are
/// generic over this trait so they can be exercised against in-memory register maps.
#[async_trait]
pub trait RegisterIo: Send {
    async fn read_holding(
        &mut self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError>;

    async fn write_holding(
        &mut self,
        unit_id: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), ClientError>;

    /// Drops the current session; the next request opens a new one.
    fn disconnect(&mut self) {}
}

/// A Modbus TCP session that is opened on first use and reopened once when it is lost.
#[derive(Debug)]
pub struct ModbusClient {
    config: ClientConfig,
    context: Option<Context>,
}

impl ModbusClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            context: None,
        }
    }

    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let mut client = Self::new(config);
        client.session().await?;
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.context.is_some()
    }

    pub fn close(&mut self) {
        if self.context.take().is_some() {
            info!(host = %self.config.host, port = self.config.port, "modbus session closed");
        }
    }

    pub async fn read_range(
        &mut self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let batch_size = self.config.max_batch_size.unwrap_or(count).max(1u16);
        let mut remaining = count;
        let mut offset = 0u16;
        let mut out = Vec::with_capacity(count as usize);

        while remaining > 0 {
            let chunk = min(remaining, batch_size);
            let chunk_start = u16::try_from(u32::from(start) + u32::from(offset))
                .map_err(|_| ClientError::AddressOverflow)?;
            let values = self.read_chunk(unit_id, chunk_start, chunk).await?;
            out.extend(values);
            remaining -= chunk;
            offset += chunk;

            if remaining > 0 {
                if let Some(delay_ms) = self.config.inter_read_delay_ms {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Ok(out)
    }

    /// Writes `values` starting at `start` in one request.
    pub async fn write_range(
        &mut self,
        unit_id: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), ClientError> {
        if values.is_empty() {
            return Ok(());
        }
        u16::try_from(u32::from(start) + values.len() as u32 - 1)
            .map_err(|_| ClientError::AddressOverflow)?;

        let timeout_ms = self.config.timeout_ms;
        let mut reconnected = false;
        loop {
            let ctx = self.session().await?;
            ctx.set_slave(Slave(unit_id));
            let request = ctx.write_multiple_registers(start, values);
            let err = match timeout(Duration::from_millis(timeout_ms), request).await {
                Ok(Ok(())) => {
                    debug!(unit_id, start, count = values.len(), "modbus write ok");
                    return Ok(());
                }
                Ok(Err(err)) => ClientError::Modbus(err),
                Err(_) => ClientError::Timeout { timeout_ms },
            };
            warn!(unit_id, start, error = %err, "modbus write error");
            if !self.should_retry(&err, &mut reconnected) {
                return Err(err);
            }
        }
    }

    async fn read_chunk(
        &mut self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let timeout_ms = self.config.timeout_ms;
        let mut reconnected = false;
        loop {
            let ctx = self.session().await?;
            ctx.set_slave(Slave(unit_id));
            let request = ctx.read_holding_registers(start, count);
            let err = match timeout(Duration::from_millis(timeout_ms), request).await {
                Ok(Ok(values)) => {
                    debug!(unit_id, start, count, "modbus read ok");
                    return Ok(values);
                }
                Ok(Err(err)) => ClientError::Modbus(err),
                Err(_) => ClientError::Timeout { timeout_ms },
            };
            warn!(unit_id, start, count, error = %err, "modbus read error");
            if !self.should_retry(&err, &mut reconnected) {
                return Err(err);
            }
        }
    }

    /// Drops a lost session and allows exactly one retry on a fresh one.
    fn should_retry(&mut self, err: &ClientError, reconnected: &mut bool) -> bool {
        if !err.is_disconnect() {
            return false;
        }
        self.context = None;
        if *reconnected {
            return false;
        }
        *reconnected = true;
        warn!(host = %self.config.host, port = self.config.port, "modbus session lost, reconnecting");
        true
    }

    async fn session(&mut self) -> Result<&mut Context, ClientError> {
        let context = match self.context.take() {
            Some(context) => context,
            None => open(&self.config).await?,
        };
        Ok(self.context.insert(context))
    }
}

async fn open(config: &ClientConfig) -> Result<Context, ClientError> {
    let addr = resolve(config).await?;
    let timeout_ms = config.connect_timeout_ms;
    let context = timeout(Duration::from_millis(timeout_ms), tcp::connect(addr))
        .await
        .map_err(|_| ClientError::Timeout { timeout_ms })?
        .map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, "modbus session opened");
    Ok(context)
}

async fn resolve(config: &ClientConfig) -> Result<SocketAddr, ClientError> {
    let invalid = || ClientError::InvalidAddress(config.host.clone(), config.port);
    let mut addrs = lookup_host((config.host.as_str(), config.port))
        .await
        .map_err(|_| invalid())?;
    addrs.next().ok_or_else(invalid)
}

#[async_trait]
impl RegisterIo for ModbusClient {
    async fn read_holding(
        &mut self,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        self.read_range(unit_id, start, count).await
    }

    async fn write_holding(
        &mut self,
        unit_id: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), ClientError> {
        self.write_range(unit_id, start, values).await
    }

    fn disconnect(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_resets_count_as_disconnects() {
        assert!(ClientError::Timeout { timeout_ms: 10 }.is_disconnect());
        assert!(ClientError::Modbus(std::io::Error::from(ErrorKind::BrokenPipe)).is_disconnect());
        assert!(ClientError::Modbus(std::io::Error::from(ErrorKind::WouldBlock)).is_disconnect());
        assert!(!ClientError::Modbus(std::io::Error::new(ErrorKind::Other, "exception"))
            .is_disconnect());
        assert!(!ClientError::AddressOverflow.is_disconnect());
    }

    #[tokio::test]
    async fn empty_requests_skip_the_network() {
        let mut client = ModbusClient::new(ClientConfig::default());
        assert!(client.read_range(1, 0, 0).await.expect("read").is_empty());
        client.write_range(1, 0, &[]).await.expect("write");
        assert!(!client.is_connected());
    }
}
