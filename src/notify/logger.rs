//! Sink that writes events to the tracing log.

use async_trait::async_trait;

use super::{NotificationSink, SinkError};
use crate::registry::{Device, DeviceStats, DeviceStatus};
use crate::wake::MacAddress;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn on_probe_result(&self, name: &str, address: &str, alive: bool, latency_ms: u32) -> Result<(), SinkError> {
        if alive {
            tracing::debug!("Probe {} ({}): alive in {} ms", name, address, latency_ms);
        } else {
            tracing::debug!("Probe {} ({}): no reply", name, address);
        }
        Ok(())
    }

    async fn on_status_change(&self, name: &str, old: DeviceStatus, new: DeviceStatus) -> Result<(), SinkError> {
        tracing::info!("Device {} status changed: {} -> {}", name, old, new);
        Ok(())
    }

    async fn on_probe_error(&self, name: &str, address: &str, error: &str) -> Result<(), SinkError> {
        tracing::warn!("Probe {} ({}) failed: {}", name, address, error);
        Ok(())
    }

    async fn on_wake_sent(&self, name: &str, hw_address: MacAddress) -> Result<(), SinkError> {
        tracing::info!("Wake-on-LAN sent to {} ({})", name, hw_address);
        Ok(())
    }

    async fn on_status_report(&self, device: &Device) -> Result<(), SinkError> {
        tracing::info!(
            "Device {} ({}) is {}, enabled={}",
            device.name,
            device.address,
            device.status,
            device.enabled
        );
        Ok(())
    }

    async fn on_statistics(&self, stats: &DeviceStats) -> Result<(), SinkError> {
        tracing::info!(
            "  {} ({}): success={}, fail={}, success rate={:.1}%",
            stats.name,
            stats.address,
            stats.success_count,
            stats.fail_count,
            stats.success_rate
        );
        Ok(())
    }
}
