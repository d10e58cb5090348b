//! In-crate fakes for probes, sinks and wake transports.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::notify::{Event, NotificationSink, SinkError};
use crate::probe::{Probe, ProbeError, ProbeReply};
use crate::registry::{Device, DeviceStats, DeviceStatus};
use crate::wake::{MacAddress, WakeTransport, MAGIC_PACKET_LEN};

/// Let spawned tasks (the notification dispatcher in particular) catch up.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Probe that replays queued replies per address, then falls back to a default.
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, VecDeque<Result<ProbeReply, ProbeError>>>>,
    calls: Mutex<HashMap<String, usize>>,
    fallback: ProbeReply,
}

impl ScriptedProbe {
    pub fn new(fallback: ProbeReply) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            fallback,
        }
    }

    pub fn push(&self, address: &str, result: Result<ProbeReply, ProbeError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self, address: &str) -> usize {
        self.calls.lock().unwrap().get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, address: &str, _timeout: Duration, _count: u32) -> Result<ProbeReply, ProbeError> {
        *self.calls.lock().unwrap().entry(address.to_string()).or_default() += 1;
        self.scripts
            .lock()
            .unwrap()
            .get_mut(address)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(self.fallback))
    }
}

/// Probe that blocks each call until the test releases it.
///
/// Callers are released in the order they started.
pub struct GatedProbe {
    gate: Semaphore,
    started: AtomicUsize,
}

impl GatedProbe {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for GatedProbe {
    async fn probe(&self, _address: &str, _timeout: Duration, _count: u32) -> Result<ProbeReply, ProbeError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        permit.forget();
        Ok(ProbeReply::alive(Duration::from_millis(1)))
    }
}

/// Sink that keeps every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn status_changes(&self, device: &str) -> Vec<(DeviceStatus, DeviceStatus)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StatusChange { name, old, new } if name == device => Some((old, new)),
                _ => None,
            })
            .collect()
    }

    /// `(alive, latency_ms)` for every probe result of `device`.
    pub fn probe_results(&self, device: &str) -> Vec<(bool, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ProbeResult {
                    name,
                    alive,
                    latency_ms,
                    ..
                } if name == device => Some((alive, latency_ms)),
                _ => None,
            })
            .collect()
    }

    pub fn probe_errors(&self, device: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ProbeError { name, error, .. } if name == device => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn statistics(&self, device: &str) -> Vec<DeviceStats> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Statistics(stats) if stats.name == device => Some(stats),
                _ => None,
            })
            .collect()
    }

    pub fn wakes(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::WakeSent { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn on_probe_result(&self, name: &str, address: &str, alive: bool, latency_ms: u32) -> Result<(), SinkError> {
        self.push(Event::ProbeResult {
            name: name.to_string(),
            address: address.to_string(),
            alive,
            latency_ms,
        });
        Ok(())
    }

    async fn on_status_change(&self, name: &str, old: DeviceStatus, new: DeviceStatus) -> Result<(), SinkError> {
        self.push(Event::StatusChange {
            name: name.to_string(),
            old,
            new,
        });
        Ok(())
    }

    async fn on_probe_error(&self, name: &str, address: &str, error: &str) -> Result<(), SinkError> {
        self.push(Event::ProbeError {
            name: name.to_string(),
            address: address.to_string(),
            error: error.to_string(),
        });
        Ok(())
    }

    async fn on_wake_sent(&self, name: &str, hw_address: MacAddress) -> Result<(), SinkError> {
        self.push(Event::WakeSent {
            name: name.to_string(),
            hw_address,
        });
        Ok(())
    }

    async fn on_status_report(&self, device: &Device) -> Result<(), SinkError> {
        self.push(Event::StatusReport {
            device: device.clone(),
        });
        Ok(())
    }

    async fn on_statistics(&self, stats: &DeviceStats) -> Result<(), SinkError> {
        self.push(Event::Statistics(stats.clone()));
        Ok(())
    }
}

/// Sink whose probe-result delivery blocks until the test releases it.
pub struct GatedSink {
    gate: Semaphore,
    started: AtomicUsize,
    inner: RecordingSink,
}

impl GatedSink {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
            inner: RecordingSink::default(),
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> &RecordingSink {
        &self.inner
    }
}

#[async_trait]
impl NotificationSink for GatedSink {
    async fn on_probe_result(&self, name: &str, address: &str, alive: bool, latency_ms: u32) -> Result<(), SinkError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        permit.forget();
        self.inner.on_probe_result(name, address, alive, latency_ms).await
    }

    async fn on_status_change(&self, name: &str, old: DeviceStatus, new: DeviceStatus) -> Result<(), SinkError> {
        self.inner.on_status_change(name, old, new).await
    }
}

#[derive(Debug, Clone)]
pub struct SentPacket {
    pub payload: Vec<u8>,
    pub port: u16,
    pub destination: Option<Ipv4Addr>,
}

/// Transport that records packets instead of sending them.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentPacket>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().unwrap().clone()
    }

    /// Make the next broadcast fail.
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WakeTransport for RecordingTransport {
    async fn broadcast(
        &self,
        payload: &[u8; MAGIC_PACKET_LEN],
        port: u16,
        destination: Option<Ipv4Addr>,
    ) -> io::Result<usize> {
        if self.fail.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "broadcast not permitted"));
        }
        self.sent.lock().unwrap().push(SentPacket {
            payload: payload.to_vec(),
            port,
            destination,
        });
        Ok(payload.len())
    }
}
