//! Scheduler module for running probes and applying their results.
//!
//! A single task owns the command receiver. Each tick it applies pending
//! commands, then launches probes for devices whose interval has elapsed.
//! Results are written back to the registry as they complete.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::command::{Command, CommandReceiver};
use crate::notify::{Event, Notifier};
use crate::probe::{Probe, ProbeError, ProbeReply};
use crate::registry::{AddOutcome, DeviceHandle, DueProbe, Registry, RegistryError};

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 5;
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(120);

/// Extra time granted on top of a probe's own budget before it is cut off.
pub const PROBE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub max_concurrent_probes: usize,
    /// Period of the statistics report; `None` turns it off.
    pub report_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            report_interval: Some(DEFAULT_REPORT_INTERVAL),
        }
    }
}

async fn next_report(report: &mut Option<Interval>) {
    match report {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct ProbeOutcome {
    job: DueProbe,
    result: Result<ProbeReply, ProbeError>,
}

/// The probe loop. Sole consumer of the command queue.
pub struct Scheduler {
    registry: Registry,
    commands: CommandReceiver,
    probe: Arc<dyn Probe>,
    notifier: Notifier,
    config: SchedulerConfig,
    /// Devices with a probe running, keyed to the time after which the
    /// entry is considered lost.
    in_flight: HashMap<DeviceHandle, u64>,
    probes: JoinSet<ProbeOutcome>,
}

impl Scheduler {
    pub fn new(
        registry: Registry,
        commands: CommandReceiver,
        probe: Arc<dyn Probe>,
        notifier: Notifier,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            commands,
            probe,
            notifier,
            config,
            in_flight: HashMap::new(),
            probes: JoinSet::new(),
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until a `Stop` command arrives or every sender is dropped.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report = self.config.report_interval.filter(|p| !p.is_zero()).map(|period| {
            let mut report = tokio::time::interval_at(Instant::now() + period, period);
            report.set_missed_tick_behavior(MissedTickBehavior::Skip);
            report
        });

        tracing::info!(
            "Scheduler started (tick {:?}, max {} concurrent probes)",
            self.config.tick,
            self.config.max_concurrent_probes
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.tick() {
                        break;
                    }
                }
                Some(joined) = self.probes.join_next(), if !self.probes.is_empty() => {
                    self.handle_joined(joined);
                }
                _ = next_report(&mut report) => self.report(),
            }
        }

        let aborted = self.probes.len();
        self.probes.shutdown().await;
        tracing::info!("Scheduler stopped ({} in-flight probes aborted)", aborted);
    }

    /// Apply pending commands, then dispatch due probes.
    /// Returns false when the loop should end.
    fn tick(&mut self) -> bool {
        let drained = self.commands.drain();
        let mut stop = drained.disconnected;

        for command in drained.commands {
            match command {
                Command::Stop => stop = true,
                other => self.apply(other),
            }
        }

        if stop {
            return false;
        }
        self.dispatch_due();
        true
    }

    fn apply(&mut self, command: Command) {
        let kind = command.kind();
        let result = match command {
            Command::Add(spec) => {
                let name = spec.name.clone();
                self.registry.add(spec).map(|outcome| match outcome {
                    AddOutcome::Inserted(_) => tracing::info!("Scheduler: added device {}", name),
                    AddOutcome::Updated(_) => tracing::info!("Scheduler: updated device {}", name),
                })
            }
            Command::Remove { name } => self.registry.remove(&name).map(|device| {
                tracing::info!("Scheduler: removed device {}", device.name);
            }),
            Command::SetEnabled { name, enabled } => self.registry.set_enabled(&name, enabled).map(|()| {
                tracing::info!("Scheduler: device {} {}", name, if enabled { "enabled" } else { "disabled" });
            }),
            Command::Reconfigure { name, settings } => {
                self.registry.reconfigure(&name, settings).map(|effective| {
                    tracing::info!(
                        "Scheduler: device {} now probes every {} ms (timeout {} ms, count {})",
                        name,
                        effective.interval_ms,
                        effective.timeout_ms,
                        effective.probe_count
                    );
                })
            }
            Command::Stop => Ok(()),
        };

        if let Err(e) = result {
            tracing::warn!("Scheduler: {} command failed: {}", kind, e);
        }
    }

    fn dispatch_due(&mut self) {
        let now = self.registry.now_ms();
        self.in_flight.retain(|_, deadline| *deadline > now);

        let due = match self.registry.due(now) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("Scheduler: failed to read due devices: {}", e);
                return;
            }
        };

        for job in due {
            if self.in_flight.contains_key(&job.handle) {
                continue;
            }
            if self.probes.len() >= self.config.max_concurrent_probes {
                tracing::debug!("Probe limit reached, deferring {} to a later tick", job.name);
                break;
            }

            let budget = job.budget() + PROBE_GRACE;
            let deadline = now + budget.as_millis() as u64 + self.config.tick.as_millis() as u64;
            self.in_flight.insert(job.handle, deadline);

            let probe = self.probe.clone();
            self.probes.spawn(async move {
                let attempt = probe.probe(&job.address, job.timeout, job.count);
                let result = match tokio::time::timeout(budget, attempt).await {
                    Ok(r) => r,
                    Err(_) => Err(ProbeError::Timeout(budget)),
                };
                ProbeOutcome { job, result }
            });
        }
    }

    /// Publish success and failure counters for every device.
    fn report(&self) {
        let devices = match self.registry.all() {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Failed to read probe statistics: {}", e);
                return;
            }
        };
        tracing::info!("Probe statistics for {} devices", devices.len());
        for device in devices {
            self.notifier.emit(Event::Statistics(device.stats()));
        }
    }

    fn handle_joined(&mut self, joined: Result<ProbeOutcome, JoinError>) {
        match joined {
            Ok(outcome) => self.apply_outcome(outcome),
            Err(e) if e.is_cancelled() => {}
            Err(e) => tracing::error!("Probe task failed: {}", e),
        }
    }

    fn apply_outcome(&mut self, outcome: ProbeOutcome) {
        let ProbeOutcome { job, result } = outcome;
        self.in_flight.remove(&job.handle);

        // A timeout is an ordinary miss; anything else is also reported.
        let (reply, error) = match result {
            Ok(reply) => (reply, None),
            Err(ProbeError::Timeout(_)) => (ProbeReply::dead(), None),
            Err(e) => (ProbeReply::dead(), Some(e)),
        };

        let now = self.registry.now_ms();
        let record = match self
            .registry
            .record_probe_result(job.handle, reply.alive, reply.latency_ms, now)
        {
            Ok(r) => r,
            Err(RegistryError::Stale(_)) => {
                tracing::debug!("Discarding probe result for removed device {}", job.name);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to record probe result for {}: {}", job.name, e);
                return;
            }
        };

        if let Some(e) = error {
            tracing::warn!("Probe failed for {} ({}): {}", record.name, record.address, e);
            self.notifier.emit(Event::ProbeError {
                name: record.name.clone(),
                address: record.address.clone(),
                error: e.to_string(),
            });
        }

        self.notifier.emit(Event::ProbeResult {
            name: record.name.clone(),
            address: record.address.clone(),
            alive: record.alive,
            latency_ms: record.latency_ms,
        });

        let t = record.transition;
        if t.changed {
            tracing::info!("Device {} status changed: {} -> {}", record.name, t.old, t.new);
            self.notifier.emit(Event::StatusChange {
                name: record.name,
                old: t.old,
                new: t.new,
            });
        }
    }
}
