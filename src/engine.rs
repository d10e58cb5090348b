//! Engine construction and teardown.
//!
//! [`Engine::builder`] wires the registry, command queue, scheduler task and
//! notification dispatcher together. Callers talk to the running engine
//! through a cloneable [`EngineHandle`].

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::command::{self, CommandError, CommandSender};
use crate::config::EngineConfig;
use crate::notify::{spawn_dispatcher, NotificationSink};
use crate::probe::{build_probe, Probe, ProbeError, ProbeReply};
use crate::registry::{validate_address, Device, DeviceSpec, ProbeSettings, Registry, RegistryError};
use crate::scheduler::{Scheduler, SchedulerConfig, PROBE_GRACE};
use std::time::Duration;
use crate::wake::{CommandReply, MacAddress, UdpBroadcast, WakeCoordinator, WakeError, WakeTransport};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to read seed file: {0}")]
    SeedFile(#[from] std::io::Error),
    #[error("failed to parse seed file: {0}")]
    SeedFormat(#[from] serde_json::Error),
    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Read a JSON array of device records.
pub fn load_seed_file(path: impl AsRef<Path>) -> Result<Vec<DeviceSpec>, EngineError> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let specs: Vec<DeviceSpec> = serde_json::from_str(&raw)?;
    tracing::info!("Loaded {} devices from {}", specs.len(), path.as_ref().display());
    Ok(specs)
}

pub struct EngineBuilder {
    config: EngineConfig,
    probe: Option<Arc<dyn Probe>>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    transport: Option<Arc<dyn WakeTransport>>,
    seed: Vec<DeviceSpec>,
}

impl EngineBuilder {
    /// Use this probe instead of the one named in the configuration.
    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn WakeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Devices registered before the scheduler starts.
    pub fn seed(mut self, specs: impl IntoIterator<Item = DeviceSpec>) -> Self {
        self.seed.extend(specs);
        self
    }

    /// Spawn the scheduler and notification tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Engine, EngineError> {
        let cfg = self.config;
        if cfg.tick.is_zero() {
            return Err(EngineError::Config("tick must be non-zero".to_string()));
        }
        if cfg.max_devices == 0 {
            return Err(EngineError::Config("max_devices must be non-zero".to_string()));
        }
        if cfg.queue_capacity == 0 {
            return Err(EngineError::Config("queue_capacity must be non-zero".to_string()));
        }
        if cfg.max_concurrent_probes == 0 {
            return Err(EngineError::Config(
                "max_concurrent_probes must be non-zero".to_string(),
            ));
        }

        let registry = Registry::new(cfg.max_devices, cfg.defaults);

        // Nothing else holds the registry yet, so seeding here keeps the
        // scheduler the only writer once it runs.
        for spec in self.seed {
            let name = spec.name.clone();
            match registry.add(spec) {
                Ok(_) => tracing::info!("Seeded device {}", name),
                Err(e) => tracing::warn!("Skipping seed device {}: {}", name, e),
            }
        }

        let (commands, receiver) = command::channel(cfg.queue_capacity, cfg.enqueue_timeout);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let (notifier, notifier_task) = spawn_dispatcher(self.sinks, cfg.event_buffer, stop_rx);

        let probe = match self.probe {
            Some(p) => p,
            None => build_probe(cfg.probe, &cfg.tcp_ports),
        };
        let transport: Arc<dyn WakeTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(UdpBroadcast::default()),
        };

        let wake = WakeCoordinator::new(registry.clone(), commands.clone(), transport, notifier.clone())
            .with_default_port(cfg.wol_port)
            .with_destination(cfg.wol_broadcast);

        let scheduler = Scheduler::new(
            registry.clone(),
            receiver,
            probe.clone(),
            notifier,
            SchedulerConfig {
                tick: cfg.tick,
                max_concurrent_probes: cfg.max_concurrent_probes,
                report_interval: cfg.report_interval,
            },
        )
        .spawn();

        tracing::info!(
            "Engine started with {} devices (capacity {})",
            registry.len().unwrap_or(0),
            cfg.max_devices
        );

        Ok(Engine {
            handle: EngineHandle {
                registry,
                commands,
                wake,
                probe,
            },
            scheduler,
            notifier: notifier_task,
            stop_tx,
        })
    }
}

/// A running engine.
///
/// Dropping it leaves the scheduler and the notification dispatcher running
/// for as long as an [`EngineHandle`] is alive; call [`Engine::shutdown`] to
/// stop them.
pub struct Engine {
    handle: EngineHandle,
    scheduler: JoinHandle<()>,
    notifier: JoinHandle<()>,
    stop_tx: broadcast::Sender<()>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            probe: None,
            sinks: Vec::new(),
            transport: None,
            seed: Vec::new(),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the scheduler, then flush pending notifications.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        tracing::info!("Engine shutting down");

        if let Err(e) = self.handle.commands.enqueue_stop().await {
            // The scheduler may already be gone; abort covers the rest.
            tracing::warn!("Failed to enqueue stop: {}", e);
            self.scheduler.abort();
        }
        match self.scheduler.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => return Err(e.into()),
        }

        let _ = self.stop_tx.send(());
        self.notifier.await?;

        tracing::info!("Engine stopped");
        Ok(())
    }
}

/// Command ingress and query surface of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    registry: Registry,
    commands: CommandSender,
    wake: WakeCoordinator,
    probe: Arc<dyn Probe>,
}

impl EngineHandle {
    pub async fn enqueue_add(&self, spec: DeviceSpec) -> Result<(), CommandError> {
        self.commands.enqueue_add(spec).await
    }

    pub async fn enqueue_remove(&self, name: &str) -> Result<(), CommandError> {
        self.commands.enqueue_remove(name).await
    }

    pub async fn enqueue_set_enabled(&self, name: &str, enabled: bool) -> Result<(), CommandError> {
        self.commands.enqueue_set_enabled(name, enabled).await
    }

    pub async fn enqueue_reconfigure(&self, name: &str, settings: ProbeSettings) -> Result<(), CommandError> {
        self.commands.enqueue_reconfigure(name, settings).await
    }

    pub async fn enqueue_stop(&self) -> Result<(), CommandError> {
        self.commands.enqueue_stop().await
    }

    pub fn get_device(&self, name: &str) -> Result<Device, RegistryError> {
        self.registry.get(name)
    }

    /// Every device, in insertion order.
    pub fn list_devices(&self) -> Result<Vec<Device>, RegistryError> {
        self.registry.all()
    }

    pub async fn wake(&self, name: &str) -> Result<(), WakeError> {
        self.wake.wake(name).await
    }

    /// Wake a hardware address that is not in the registry.
    pub async fn wake_mac(&self, mac: MacAddress, port: u16) -> Result<(), WakeError> {
        self.wake.send_magic_packet(mac, port).await
    }

    pub async fn handle_command(&self, name: &str, verb: &str) -> Result<CommandReply, WakeError> {
        self.wake.handle_command(name, verb).await
    }

    /// Magic packet port for devices and requests that name none.
    pub fn wol_port(&self) -> u16 {
        self.wake.default_port()
    }

    /// Probe `address` once with the configured strategy, outside the registry.
    ///
    /// A zero `timeout` or `count` takes the registry default. Nothing is
    /// recorded and no event is emitted.
    pub async fn probe_once(&self, address: &str, timeout: Duration, count: u32) -> Result<ProbeReply, ProbeError> {
        validate_address(address).map_err(|e| ProbeError::Config(e.to_string()))?;

        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let settings = ProbeSettings::new(0, timeout_ms, count).or(self.registry.defaults());
        let timeout = Duration::from_millis(u64::from(settings.timeout_ms));
        let budget = timeout * settings.probe_count + PROBE_GRACE;

        tracing::info!("One-shot probe of {} (count {})", address, settings.probe_count);
        let attempt = self.probe.probe(address, timeout, settings.probe_count);
        match tokio::time::timeout(budget, attempt).await {
            Ok(Err(ProbeError::Timeout(_))) => Ok(ProbeReply::dead()),
            Ok(result) => result,
            Err(_) => Ok(ProbeReply::dead()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
