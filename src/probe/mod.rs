//! Probe module for liveness checks.
//!
//! The scheduler only sees the [`Probe`] trait. ICMP echo and TCP connect
//! strategies ship with the crate.

mod ping;
mod tcp;

pub use ping::*;
pub use tcp::*;

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
///
/// An unreachable host is not an error: probes report it as a dead reply.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Outcome of one probe round against a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    pub alive: bool,
    /// Round-trip latency in milliseconds, zero when dead.
    pub latency_ms: u32,
}

impl ProbeReply {
    pub fn alive(latency: Duration) -> Self {
        Self {
            alive: true,
            latency_ms: latency.as_millis().min(u128::from(u32::MAX)) as u32,
        }
    }

    pub fn dead() -> Self {
        Self {
            alive: false,
            latency_ms: 0,
        }
    }
}

/// Bounded-time liveness check.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Send up to `count` probes, each waiting at most `timeout`.
    async fn probe(&self, address: &str, timeout: Duration, count: u32) -> Result<ProbeReply, ProbeError>;
}

/// Which built-in strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Icmp,
    Tcp,
}

impl FromStr for ProbeKind {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icmp" | "ping" => Ok(ProbeKind::Icmp),
            "tcp" => Ok(ProbeKind::Tcp),
            other => Err(ProbeError::Config(format!("unknown probe type: {}", other))),
        }
    }
}

/// Build a probe of the given kind.
pub fn build_probe(kind: ProbeKind, tcp_ports: &[u16]) -> Arc<dyn Probe> {
    match kind {
        ProbeKind::Icmp => Arc::new(IcmpProbe::new()),
        ProbeKind::Tcp => Arc::new(TcpProbe::new(tcp_ports.to_vec())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_parse() {
        assert_eq!("ICMP".parse::<ProbeKind>().unwrap(), ProbeKind::Icmp);
        assert_eq!("ping".parse::<ProbeKind>().unwrap(), ProbeKind::Icmp);
        assert_eq!(" tcp ".parse::<ProbeKind>().unwrap(), ProbeKind::Tcp);
        assert!(matches!("dns".parse::<ProbeKind>(), Err(ProbeError::Config(_))));
    }

    #[test]
    fn test_reply_latency_in_millis() {
        let reply = ProbeReply::alive(Duration::from_micros(12_345));
        assert!(reply.alive);
        assert_eq!(reply.latency_ms, 12);
        assert_eq!(ProbeReply::dead().latency_ms, 0);
    }
}
