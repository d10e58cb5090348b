//! Registry model types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::wake::MacAddress;

pub const DEFAULT_INTERVAL_MS: u32 = 10_000;
pub const DEFAULT_TIMEOUT_MS: u32 = 3_000;
pub const DEFAULT_PROBE_COUNT: u32 = 1;

/// Liveness state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Online,
    Offline,
    /// A wake packet was sent; the next probe replaces this.
    Waking,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Waking => "waking",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe cadence and parameters. A zero field means "inherit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub interval_ms: u32,
    pub timeout_ms: u32,
    pub probe_count: u32,
}

impl ProbeSettings {
    pub const fn new(interval_ms: u32, timeout_ms: u32, probe_count: u32) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            probe_count,
        }
    }

    /// System-wide defaults applied when a caller supplies zero.
    pub const fn system_default() -> Self {
        Self::new(DEFAULT_INTERVAL_MS, DEFAULT_TIMEOUT_MS, DEFAULT_PROBE_COUNT)
    }

    /// Fill every zero field from `fallback`.
    pub fn or(self, fallback: ProbeSettings) -> Self {
        let pick = |v: u32, f: u32| if v == 0 { f } else { v };
        Self {
            interval_ms: pick(self.interval_ms, fallback.interval_ms),
            timeout_ms: pick(self.timeout_ms, fallback.timeout_ms),
            probe_count: pick(self.probe_count, fallback.probe_count),
        }
    }
}

/// Everything needed to register a device. Also the seed file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    #[serde(alias = "ip")]
    pub address: String,
    #[serde(default, alias = "mac")]
    pub hw_address: Option<MacAddress>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub wol_port: Option<u16>,
    #[serde(flatten)]
    pub settings: ProbeSettings,
}

impl DeviceSpec {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            hw_address: None,
            description: String::new(),
            wol_port: None,
            settings: ProbeSettings::default(),
        }
    }

    pub fn with_hw_address(mut self, mac: MacAddress) -> Self {
        self.hw_address = Some(mac);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_settings(mut self, settings: ProbeSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Snapshot of a registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub name: String,
    pub address: String,
    pub hw_address: Option<MacAddress>,
    pub description: String,
    pub wol_port: Option<u16>,
    #[serde(flatten)]
    pub settings: ProbeSettings,
    pub enabled: bool,
    pub status: DeviceStatus,
    pub success_count: u64,
    pub fail_count: u64,
    /// Milliseconds since registry creation.
    pub last_probe_ms: Option<u64>,
    pub last_success_ms: Option<u64>,
    pub last_latency_ms: Option<u32>,
}

impl Device {
    pub fn total_probes(&self) -> u64 {
        self.success_count + self.fail_count
    }

    /// Percentage of successful probes, 0 before the first probe.
    pub fn success_rate(&self) -> f64 {
        match self.total_probes() {
            0 => 0.0,
            total => 100.0 * self.success_count as f64 / total as f64,
        }
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            name: self.name.clone(),
            address: self.address.clone(),
            success_count: self.success_count,
            fail_count: self.fail_count,
            success_rate: self.success_rate(),
        }
    }
}

/// Probe counters for the periodic statistics report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStats {
    pub name: String,
    pub address: String,
    pub success_count: u64,
    pub fail_count: u64,
    pub success_rate: f64,
}

/// Identifies one occupancy of a registry slot.
///
/// The generation changes whenever the slot is vacated, so a handle taken
/// before a remove never matches the slot's next occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    pub slot: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted(DeviceHandle),
    /// The name already existed; its address fields were refreshed.
    Updated(DeviceHandle),
}

impl AddOutcome {
    pub fn handle(&self) -> DeviceHandle {
        match self {
            AddOutcome::Inserted(h) | AddOutcome::Updated(h) => *h,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub old: DeviceStatus,
    pub new: DeviceStatus,
    pub changed: bool,
}

/// Result of applying one probe outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub name: String,
    pub address: String,
    pub alive: bool,
    pub latency_ms: u32,
    pub transition: Transition,
}

/// A probe the scheduler should issue now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueProbe {
    pub handle: DeviceHandle,
    pub name: String,
    pub address: String,
    pub timeout: Duration,
    pub count: u32,
}

impl DueProbe {
    /// Upper bound on how long the probe may take.
    pub fn budget(&self) -> Duration {
        self.timeout * self.count.max(1)
    }
}

/// What the wake coordinator needs once the device is marked waking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeTarget {
    pub name: String,
    pub hw_address: MacAddress,
    pub wol_port: Option<u16>,
    pub previous: DeviceStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(DeviceStatus::Unknown.as_str(), "unknown");
        assert_eq!(DeviceStatus::Online.as_str(), "online");
        assert_eq!(DeviceStatus::Offline.as_str(), "offline");
        assert_eq!(DeviceStatus::Waking.to_string(), "waking");
    }

    #[test]
    fn test_settings_zero_inherits() {
        let s = ProbeSettings::new(5000, 0, 0).or(ProbeSettings::system_default());
        assert_eq!(s, ProbeSettings::new(5000, DEFAULT_TIMEOUT_MS, DEFAULT_PROBE_COUNT));
    }

    #[test]
    fn test_seed_record_parses_with_defaults() {
        let json = r#"{"name":"server1","address":"192.168.0.111","hw_address":"c0:18:50:ac:e1:a5","description":"Main Server","interval_ms":5000}"#;
        let spec: DeviceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.name, "server1");
        assert_eq!(spec.settings, ProbeSettings::new(5000, 0, 0));
        assert_eq!(spec.wol_port, None);
        assert!(spec.hw_address.is_some());
    }

    #[test]
    fn test_success_rate() {
        let mut device = Device {
            name: "db".to_string(),
            address: "10.0.0.5".to_string(),
            hw_address: None,
            description: String::new(),
            wol_port: None,
            settings: ProbeSettings::system_default(),
            enabled: true,
            status: DeviceStatus::Unknown,
            success_count: 0,
            fail_count: 0,
            last_probe_ms: None,
            last_success_ms: None,
            last_latency_ms: None,
        };
        assert_eq!(device.success_rate(), 0.0);

        device.success_count = 3;
        device.fail_count = 1;
        let stats = device.stats();
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!((stats.success_count, stats.fail_count), (3, 1));
    }
}
