//! Wake-on-LAN coordination.
//!
//! Resolves a device name to its hardware address, marks it waking and
//! broadcasts a magic packet. Also dispatches the external command verbs.

mod packet;
mod transport;

pub use packet::*;
pub use transport::*;

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::command::{CommandError, CommandSender};
use crate::notify::{Event, Notifier};
use crate::registry::{Device, Registry, RegistryError};

#[derive(Error, Debug)]
pub enum WakeError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to send wake packet: {0}")]
    Transport(String),
    #[error("unknown command: {0}")]
    InvalidCommand(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// External command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Wake,
    Status,
    Enable,
    Disable,
}

impl FromStr for Verb {
    type Err = WakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wake" | "on" => Ok(Verb::Wake),
            "status" => Ok(Verb::Status),
            "enable" => Ok(Verb::Enable),
            "disable" => Ok(Verb::Disable),
            _ => Err(WakeError::InvalidCommand(s.to_string())),
        }
    }
}

/// What a dispatched verb produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    WakeSent,
    Status(Device),
    /// The change was queued for the scheduler.
    Queued,
}

#[derive(Clone)]
pub struct WakeCoordinator {
    registry: Registry,
    commands: CommandSender,
    transport: Arc<dyn WakeTransport>,
    notifier: Notifier,
    default_port: u16,
    destination: Option<Ipv4Addr>,
}

impl WakeCoordinator {
    pub fn new(
        registry: Registry,
        commands: CommandSender,
        transport: Arc<dyn WakeTransport>,
        notifier: Notifier,
    ) -> Self {
        Self {
            registry,
            commands,
            transport,
            notifier,
            default_port: DEFAULT_WOL_PORT,
            destination: None,
        }
    }

    /// Port used for devices that do not set their own.
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Send to this address instead of the transport's default.
    pub fn with_destination(mut self, destination: Ipv4Addr) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Mark `name` waking and broadcast its magic packet.
    ///
    /// Success means the packet left through the transport; nothing confirms
    /// the device woke. The status stays `Waking` until the next probe.
    pub async fn wake(&self, name: &str) -> Result<(), WakeError> {
        let target = self.registry.begin_wake(name).inspect_err(|e| {
            tracing::warn!("Cannot wake {}: {}", name, e);
        })?;
        let port = target.wol_port.unwrap_or(self.default_port);

        self.send_magic_packet(target.hw_address, port).await?;

        tracing::info!(
            "Wake-on-LAN sent to device {} (was {})",
            target.name,
            target.previous
        );
        self.notifier.emit(Event::WakeSent {
            name: target.name,
            hw_address: target.hw_address,
        });
        Ok(())
    }

    /// Broadcast a magic packet for `mac` without touching the registry.
    pub async fn send_magic_packet(&self, mac: MacAddress, port: u16) -> Result<(), WakeError> {
        let packet = magic_packet(&mac);
        match self.transport.broadcast(&packet, port, self.destination).await {
            Ok(sent) => {
                tracing::debug!("WoL packet sent ({} bytes) to {}", sent, mac);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to send WoL packet to {}: {}", mac, e);
                Err(WakeError::Transport(e.to_string()))
            }
        }
    }

    /// Dispatch an external command verb for `name`.
    pub async fn handle_command(&self, name: &str, verb: &str) -> Result<CommandReply, WakeError> {
        let verb = verb.parse::<Verb>().inspect_err(|_| {
            tracing::warn!("Unknown WoL command: {}", verb);
        })?;
        tracing::info!("WoL command: {} -> {:?}", name, verb);

        match verb {
            Verb::Wake => {
                self.wake(name).await?;
                Ok(CommandReply::WakeSent)
            }
            Verb::Status => {
                let device = self.registry.get(name)?;
                self.notifier.emit(Event::StatusReport {
                    device: device.clone(),
                });
                Ok(CommandReply::Status(device))
            }
            Verb::Enable | Verb::Disable => {
                // Confirm existence so callers get a definite NotFound.
                self.registry.get(name)?;
                self.commands
                    .enqueue_set_enabled(name, verb == Verb::Enable)
                    .await?;
                Ok(CommandReply::Queued)
            }
        }
    }
}
