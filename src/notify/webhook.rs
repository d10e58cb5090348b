//! Sink that POSTs JSON events to a webhook.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{NotificationSink, SinkError};
use crate::registry::{Device, DeviceStats, DeviceStatus};
use crate::wake::MacAddress;

/// Publishes events as JSON documents to a single URL.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, body: Value) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(format!("{} returned {}", self.url, status)));
        }
        Ok(())
    }
}

fn probe_result_body(name: &str, address: &str, alive: bool, latency_ms: u32) -> Value {
    json!({
        "event": "probe_result",
        "device": name,
        "target_ip": address,
        "success": alive,
        "response_time_ms": latency_ms,
        "timestamp": Utc::now().timestamp(),
    })
}

fn status_change_body(name: &str, old: DeviceStatus, new: DeviceStatus) -> Value {
    json!({
        "event": "status_change",
        "device": name,
        "previous": old,
        "status": new,
        "timestamp": Utc::now().timestamp(),
    })
}

fn status_report_body(device: &Device) -> Value {
    json!({
        "event": "status_report",
        "device": device.name,
        "status": device.status,
        "ip": device.address,
        "enabled": device.enabled,
        "success_count": device.success_count,
        "fail_count": device.fail_count,
        "timestamp": Utc::now().timestamp(),
    })
}

fn statistics_body(stats: &DeviceStats) -> Value {
    json!({
        "event": "statistics",
        "device": stats.name,
        "target_ip": stats.address,
        "success_count": stats.success_count,
        "fail_count": stats.fail_count,
        "success_rate": stats.success_rate,
        "timestamp": Utc::now().timestamp(),
    })
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn on_probe_result(&self, name: &str, address: &str, alive: bool, latency_ms: u32) -> Result<(), SinkError> {
        self.post(probe_result_body(name, address, alive, latency_ms)).await
    }

    async fn on_status_change(&self, name: &str, old: DeviceStatus, new: DeviceStatus) -> Result<(), SinkError> {
        self.post(status_change_body(name, old, new)).await
    }

    async fn on_probe_error(&self, name: &str, address: &str, error: &str) -> Result<(), SinkError> {
        self.post(json!({
            "event": "probe_error",
            "device": name,
            "target_ip": address,
            "error": error,
            "timestamp": Utc::now().timestamp(),
        }))
        .await
    }

    async fn on_wake_sent(&self, name: &str, hw_address: MacAddress) -> Result<(), SinkError> {
        self.post(json!({
            "event": "wake_sent",
            "device": name,
            "action": "wake_sent",
            "mac": hw_address,
            "timestamp": Utc::now().timestamp(),
        }))
        .await
    }

    async fn on_status_report(&self, device: &Device) -> Result<(), SinkError> {
        self.post(status_report_body(device)).await
    }

    async fn on_statistics(&self, stats: &DeviceStats) -> Result<(), SinkError> {
        self.post(statistics_body(stats)).await
    }
}
