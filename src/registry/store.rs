//! Lock-protected device store.

use regex::Regex;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::models::*;

/// Registry error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("registry full (capacity {0})")]
    Capacity(usize),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("device {0} is disabled")]
    Disabled(String),
    #[error("stale result for slot {} generation {}", .0.slot, .0.generation)]
    Stale(DeviceHandle),
    #[error("registry lock poisoned")]
    Poisoned,
}

struct Entry {
    /// Insertion sequence, used to keep listing order stable across slot reuse.
    seq: u64,
    device: Device,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    next_seq: u64,
}

impl Slots {
    fn find(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.entry
                .as_ref()
                .is_some_and(|e| e.device.name == name)
        })
    }

    fn device_mut(&mut self, name: &str) -> Result<&mut Device, RegistryError> {
        let idx = self
            .find(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        match self.slots[idx].entry.as_mut() {
            Some(entry) => Ok(&mut entry.device),
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    fn handle(&self, idx: usize) -> DeviceHandle {
        DeviceHandle {
            slot: idx,
            generation: self.slots[idx].generation,
        }
    }

    fn occupied(&self) -> impl Iterator<Item = (usize, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.entry.as_ref().map(|e| (i, e)))
    }
}

/// Thread-safe device registry.
///
/// Cloning yields another handle to the same registry. No method holds the
/// lock across an await point.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<Slots>>,
    capacity: usize,
    defaults: ProbeSettings,
    epoch: Instant,
}

impl Registry {
    /// Create an empty registry holding at most `capacity` devices.
    pub fn new(capacity: usize, defaults: ProbeSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slots::default())),
            capacity,
            defaults: defaults.or(ProbeSettings::system_default()),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slots>, RegistryError> {
        self.inner.lock().map_err(|_| RegistryError::Poisoned)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn defaults(&self) -> ProbeSettings {
        self.defaults
    }

    /// Milliseconds elapsed on the registry's monotonic clock.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    // --- Mutation ---

    /// Register a device, or refresh the address fields of an existing one.
    pub fn add(&self, spec: DeviceSpec) -> Result<AddOutcome, RegistryError> {
        validate_name(&spec.name)?;
        validate_address(&spec.address)?;

        let mut slots = self.lock()?;

        if let Some(idx) = slots.find(&spec.name) {
            let handle = slots.handle(idx);
            let device = slots.device_mut(&spec.name)?;
            device.address = spec.address;
            if spec.hw_address.is_some() {
                device.hw_address = spec.hw_address;
            }
            if !spec.description.is_empty() {
                device.description = spec.description;
            }
            if spec.wol_port.is_some() {
                device.wol_port = spec.wol_port;
            }
            tracing::warn!("Device {} already exists, updating", device.name);
            return Ok(AddOutcome::Updated(handle));
        }

        let idx = match slots.slots.iter().position(|s| s.entry.is_none()) {
            Some(free) => free,
            None if slots.slots.len() < self.capacity => {
                slots.slots.push(Slot::default());
                slots.slots.len() - 1
            }
            None => return Err(RegistryError::Capacity(self.capacity)),
        };

        let seq = slots.next_seq;
        slots.next_seq += 1;

        let device = Device {
            name: spec.name,
            address: spec.address,
            hw_address: spec.hw_address,
            description: spec.description,
            wol_port: spec.wol_port,
            settings: spec.settings.or(self.defaults),
            enabled: true,
            status: DeviceStatus::Unknown,
            success_count: 0,
            fail_count: 0,
            last_probe_ms: None,
            last_success_ms: None,
            last_latency_ms: None,
        };
        slots.slots[idx].entry = Some(Entry { seq, device });

        Ok(AddOutcome::Inserted(slots.handle(idx)))
    }

    /// Remove a device and retire its slot generation.
    pub fn remove(&self, name: &str) -> Result<Device, RegistryError> {
        let mut slots = self.lock()?;
        let idx = slots
            .find(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let slot = &mut slots.slots[idx];
        slot.generation += 1;
        slot.entry
            .take()
            .map(|e| e.device)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut slots = self.lock()?;
        slots.device_mut(name)?.enabled = enabled;
        Ok(())
    }

    /// Override the non-zero fields of `update`. Returns the effective settings.
    pub fn reconfigure(&self, name: &str, update: ProbeSettings) -> Result<ProbeSettings, RegistryError> {
        let mut slots = self.lock()?;
        let device = slots.device_mut(name)?;
        device.settings = update.or(device.settings);
        Ok(device.settings)
    }

    /// Apply a probe outcome to the device `handle` was issued for.
    ///
    /// Fails with `Stale` when the device has been removed since, even if
    /// its slot now holds a different device.
    pub fn record_probe_result(
        &self,
        handle: DeviceHandle,
        alive: bool,
        latency_ms: u32,
        now_ms: u64,
    ) -> Result<ProbeRecord, RegistryError> {
        let mut slots = self.lock()?;
        let slot = slots
            .slots
            .get_mut(handle.slot)
            .filter(|s| s.generation == handle.generation)
            .ok_or(RegistryError::Stale(handle))?;
        let device = match slot.entry.as_mut() {
            Some(entry) => &mut entry.device,
            None => return Err(RegistryError::Stale(handle)),
        };

        device.last_probe_ms = Some(now_ms);
        if alive {
            device.success_count += 1;
            device.last_success_ms = Some(now_ms);
            device.last_latency_ms = Some(latency_ms);
        } else {
            device.fail_count += 1;
        }

        let old = device.status;
        let new = if alive {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        };
        device.status = new;

        Ok(ProbeRecord {
            name: device.name.clone(),
            address: device.address.clone(),
            alive,
            latency_ms: if alive { latency_ms } else { 0 },
            transition: Transition {
                old,
                new,
                changed: old != new,
            },
        })
    }

    /// Validate a wake request and mark the device as waking.
    pub fn begin_wake(&self, name: &str) -> Result<WakeTarget, RegistryError> {
        let mut slots = self.lock()?;
        let device = slots.device_mut(name)?;

        if !device.enabled {
            return Err(RegistryError::Disabled(name.to_string()));
        }
        let hw_address = device.hw_address.ok_or_else(|| {
            RegistryError::InvalidArgument(format!("device {} has no hardware address", name))
        })?;

        let previous = device.status;
        device.status = DeviceStatus::Waking;

        Ok(WakeTarget {
            name: device.name.clone(),
            hw_address,
            wol_port: device.wol_port,
            previous,
        })
    }

    // --- Queries ---

    pub fn get(&self, name: &str) -> Result<Device, RegistryError> {
        let slots = self.lock()?;
        slots
            .find(name)
            .and_then(|idx| slots.slots[idx].entry.as_ref())
            .map(|e| e.device.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// All devices in insertion order.
    pub fn all(&self) -> Result<Vec<Device>, RegistryError> {
        let slots = self.lock()?;
        let mut entries: Vec<&Entry> = slots.occupied().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.seq);
        Ok(entries.into_iter().map(|e| e.device.clone()).collect())
    }

    pub fn len(&self) -> Result<usize, RegistryError> {
        Ok(self.lock()?.occupied().count())
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        Ok(self.len()? == 0)
    }

    /// Enabled devices whose interval has elapsed, in insertion order.
    pub fn due(&self, now_ms: u64) -> Result<Vec<DueProbe>, RegistryError> {
        let slots = self.lock()?;
        let mut due: Vec<(u64, DueProbe)> = slots
            .occupied()
            .filter(|(_, e)| e.device.enabled)
            .filter(|(_, e)| {
                e.device.last_probe_ms.map_or(true, |last| {
                    now_ms.saturating_sub(last) >= u64::from(e.device.settings.interval_ms)
                })
            })
            .map(|(idx, e)| {
                let d = &e.device;
                (
                    e.seq,
                    DueProbe {
                        handle: slots.handle(idx),
                        name: d.name.clone(),
                        address: d.address.clone(),
                        timeout: Duration::from_millis(u64::from(d.settings.timeout_ms)),
                        count: d.settings.probe_count,
                    },
                )
            })
            .collect();
        due.sort_by_key(|(seq, _)| *seq);
        Ok(due.into_iter().map(|(_, p)| p).collect())
    }
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::InvalidArgument("device name is empty".to_string()));
    }
    Ok(())
}

/// Accept IP literals and plausible DNS hostnames.
pub fn validate_address(address: &str) -> Result<(), RegistryError> {
    if address.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    static HOSTNAME: OnceLock<Regex> = OnceLock::new();
    let re = HOSTNAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,62})(\.[A-Za-z0-9]([A-Za-z0-9-]{0,62}))*\.?$").unwrap()
    });

    // Dotted digits that failed IP parsing are a malformed address, not a host.
    let numeric = address.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !numeric && re.is_match(address) {
        return Ok(());
    }

    Err(RegistryError::InvalidArgument(format!("malformed address: {:?}", address)))
}
