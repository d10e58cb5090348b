//! Configuration module for wakewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::{ProbeKind, DEFAULT_TCP_PORTS};
use crate::registry::ProbeSettings;
use crate::scheduler::{DEFAULT_MAX_CONCURRENT_PROBES, DEFAULT_REPORT_INTERVAL, DEFAULT_TICK};
use crate::wake::DEFAULT_WOL_PORT;

/// Engine and server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Scheduler tick period (default: 100 ms)
    pub tick: Duration,
    /// Maximum number of registered devices (default: 20)
    pub max_devices: usize,
    /// Pending command slots (default: 10)
    pub queue_capacity: usize,
    /// How long an enqueue waits for space (default: 1000 ms)
    pub enqueue_timeout: Duration,
    /// Probes running at once (default: 5)
    pub max_concurrent_probes: usize,
    /// Applied to devices that leave a setting at zero
    pub defaults: ProbeSettings,
    pub wol_port: u16,
    pub wol_broadcast: Ipv4Addr,
    pub probe: ProbeKind,
    pub tcp_ports: Vec<u16>,
    /// JSON seed file, if any
    pub devices_file: Option<PathBuf>,
    pub webhook_url: Option<String>,
    /// Notification queue length (default: 256)
    pub event_buffer: usize,
    /// Statistics report period, `None` when disabled (default: 120 s)
    pub report_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            tick: DEFAULT_TICK,
            max_devices: 20,
            queue_capacity: 10,
            enqueue_timeout: Duration::from_millis(1000),
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            defaults: ProbeSettings::system_default(),
            wol_port: DEFAULT_WOL_PORT,
            wol_broadcast: Ipv4Addr::BROADCAST,
            probe: ProbeKind::Icmp,
            tcp_ports: DEFAULT_TCP_PORTS.to_vec(),
            devices_file: None,
            webhook_url: None,
            event_buffer: 256,
            report_interval: Some(DEFAULT_REPORT_INTERVAL),
        }
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

fn parse_ports(raw: &str) -> Option<Vec<u16>> {
    let ports: Vec<u16> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    (!ports.is_empty()).then_some(ports)
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `WAKEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `WAKEWATCH_TICK_MS`: scheduler tick (default: 100)
    /// - `WAKEWATCH_MAX_DEVICES`: registry capacity (default: 20)
    /// - `WAKEWATCH_QUEUE_CAPACITY`: command queue length (default: 10)
    /// - `WAKEWATCH_ENQUEUE_TIMEOUT_MS`: enqueue wait (default: 1000)
    /// - `WAKEWATCH_MAX_CONCURRENT_PROBES`: probe bound (default: 5)
    /// - `WAKEWATCH_DEFAULT_INTERVAL_MS`, `WAKEWATCH_DEFAULT_TIMEOUT_MS`,
    ///   `WAKEWATCH_DEFAULT_PROBE_COUNT`: device defaults (10000, 3000, 1)
    /// - `WAKEWATCH_WOL_PORT`: magic packet port (default: 9)
    /// - `WAKEWATCH_WOL_BROADCAST`: magic packet destination (default: 255.255.255.255)
    /// - `WAKEWATCH_PROBE`: `icmp` or `tcp` (default: icmp)
    /// - `WAKEWATCH_TCP_PORTS`: comma-separated ports for the TCP probe (default: 80,22)
    /// - `WAKEWATCH_DEVICES_FILE`: JSON seed file (default: unset)
    /// - `WAKEWATCH_WEBHOOK_URL`: webhook endpoint (default: unset)
    /// - `WAKEWATCH_EVENT_BUFFER`: notification queue length (default: 256)
    /// - `WAKEWATCH_REPORT_INTERVAL_MS`: statistics report period, 0 disables (default: 120000)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("WAKEWATCH_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Some(ms) = parse_var("WAKEWATCH_TICK_MS") {
            cfg.tick = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var("WAKEWATCH_MAX_DEVICES") {
            cfg.max_devices = n;
        }
        if let Some(n) = parse_var("WAKEWATCH_QUEUE_CAPACITY") {
            cfg.queue_capacity = n;
        }
        if let Some(ms) = parse_var("WAKEWATCH_ENQUEUE_TIMEOUT_MS") {
            cfg.enqueue_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var("WAKEWATCH_MAX_CONCURRENT_PROBES") {
            cfg.max_concurrent_probes = n;
        }
        if let Some(ms) = parse_var("WAKEWATCH_DEFAULT_INTERVAL_MS") {
            cfg.defaults.interval_ms = ms;
        }
        if let Some(ms) = parse_var("WAKEWATCH_DEFAULT_TIMEOUT_MS") {
            cfg.defaults.timeout_ms = ms;
        }
        if let Some(n) = parse_var("WAKEWATCH_DEFAULT_PROBE_COUNT") {
            cfg.defaults.probe_count = n;
        }
        if let Some(port) = parse_var("WAKEWATCH_WOL_PORT") {
            cfg.wol_port = port;
        }
        if let Some(addr) = parse_var("WAKEWATCH_WOL_BROADCAST") {
            cfg.wol_broadcast = addr;
        }
        if let Some(kind) = parse_var("WAKEWATCH_PROBE") {
            cfg.probe = kind;
        }
        if let Ok(raw) = env::var("WAKEWATCH_TCP_PORTS") {
            match parse_ports(&raw) {
                Some(ports) => cfg.tcp_ports = ports,
                None => tracing::warn!("Ignoring unparseable WAKEWATCH_TCP_PORTS={:?}", raw),
            }
        }
        if let Ok(path) = env::var("WAKEWATCH_DEVICES_FILE") {
            cfg.devices_file = Some(PathBuf::from(path));
        }
        if let Ok(url) = env::var("WAKEWATCH_WEBHOOK_URL") {
            cfg.webhook_url = Some(url);
        }
        if let Some(n) = parse_var("WAKEWATCH_EVENT_BUFFER") {
            cfg.event_buffer = n;
        }
        if let Some(ms) = parse_var::<u64>("WAKEWATCH_REPORT_INTERVAL_MS") {
            cfg.report_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.tick, Duration::from_millis(100));
        assert_eq!(cfg.max_devices, 20);
        assert_eq!(cfg.queue_capacity, 10);
        assert_eq!(cfg.enqueue_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.max_concurrent_probes, 5);
        assert_eq!(cfg.defaults, ProbeSettings::new(10_000, 3_000, 1));
        assert_eq!(cfg.wol_port, 9);
        assert_eq!(cfg.tcp_ports, vec![80, 22]);
        assert!(cfg.devices_file.is_none());
        assert_eq!(cfg.report_interval, Some(Duration::from_secs(120)));
    }

    // Every variable is touched in this one test so parallel tests never
    // observe a half-written environment.
    #[test]
    fn test_load_from_env() {
        let vars = [
            ("WAKEWATCH_HTTP_PORT", "9090"),
            ("WAKEWATCH_TICK_MS", "250"),
            ("WAKEWATCH_MAX_DEVICES", "lots"),
            ("WAKEWATCH_WOL_PORT", "7"),
            ("WAKEWATCH_WOL_BROADCAST", "192.168.1.255"),
            ("WAKEWATCH_PROBE", "tcp"),
            ("WAKEWATCH_TCP_PORTS", "443,https"),
            ("WAKEWATCH_DEFAULT_TIMEOUT_MS", "-5"),
            ("WAKEWATCH_WEBHOOK_URL", "http://hooks.local/events"),
            ("WAKEWATCH_REPORT_INTERVAL_MS", "0"),
        ];
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let cfg = EngineConfig::load();
        for (key, _) in vars {
            env::remove_var(key);
        }

        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.tick, Duration::from_millis(250));
        assert_eq!(cfg.wol_port, 7);
        assert_eq!(cfg.wol_broadcast, Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(cfg.probe, ProbeKind::Tcp);
        assert_eq!(cfg.webhook_url.as_deref(), Some("http://hooks.local/events"));
        assert_eq!(cfg.report_interval, None);

        // Unparseable values keep their defaults.
        assert_eq!(cfg.max_devices, 20);
        assert_eq!(cfg.tcp_ports, vec![80, 22]);
        assert_eq!(cfg.defaults.timeout_ms, 3_000);
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(parse_ports("443, 8080"), Some(vec![443, 8080]));
        assert_eq!(parse_ports("22,"), Some(vec![22]));
        assert_eq!(parse_ports(""), None);
        assert_eq!(parse_ports("22,ssh"), None);
    }
}
