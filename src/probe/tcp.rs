//! TCP connect probe.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::{Probe, ProbeError, ProbeReply};

pub const DEFAULT_TCP_PORTS: [u16; 2] = [80, 22];

/// Considers a host alive when any of its ports answers a connect.
///
/// A refused connection still proves the host is up, so it counts as alive.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    ports: Vec<u16>,
}

impl TcpProbe {
    pub fn new(ports: Vec<u16>) -> Self {
        let ports = if ports.is_empty() {
            DEFAULT_TCP_PORTS.to_vec()
        } else {
            ports
        };
        Self { ports }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    async fn connect_any(&self, address: &str, timeout: Duration) -> Option<Duration> {
        for &port in &self.ports {
            let start = Instant::now();
            match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
                Ok(Ok(_stream)) => return Some(start.elapsed()),
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => return Some(start.elapsed()),
                Ok(Err(e)) => tracing::debug!("TCP probe {}:{} failed: {}", address, port, e),
                Err(_) => tracing::debug!("TCP probe {}:{} timed out", address, port),
            }
        }
        None
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, address: &str, timeout: Duration, count: u32) -> Result<ProbeReply, ProbeError> {
        for _ in 0..count.max(1) {
            if let Some(rtt) = self.connect_any(address, timeout).await {
                return Ok(ProbeReply::alive(rtt));
            }
        }
        Ok(ProbeReply::dead())
    }
}
