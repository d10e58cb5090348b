//! Bounded command queue feeding the scheduler.
//!
//! Any number of producers may enqueue; the scheduler is the only consumer,
//! so every registry mutation requested here is applied by a single writer.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TryRecvError};

use crate::registry::{DeviceSpec, ProbeSettings};

/// A registry mutation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(DeviceSpec),
    Remove { name: String },
    SetEnabled { name: String, enabled: bool },
    Reconfigure { name: String, settings: ProbeSettings },
    Stop,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Add(_) => "add",
            Command::Remove { .. } => "remove",
            Command::SetEnabled { .. } => "set_enabled",
            Command::Reconfigure { .. } => "reconfigure",
            Command::Stop => "stop",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command queue full after waiting {0:?}")]
    Timeout(Duration),
    #[error("command queue closed")]
    Closed,
}

/// Create a queue holding at most `capacity` pending commands.
///
/// Producers wait up to `enqueue_timeout` for space before failing.
pub fn channel(capacity: usize, enqueue_timeout: Duration) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        CommandSender {
            tx,
            timeout: enqueue_timeout,
        },
        CommandReceiver { rx },
    )
}

/// Producer side. Cheap to clone.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<Command>,
    timeout: Duration,
}

impl CommandSender {
    /// Enqueue with a bounded wait. Either the command is queued or nothing happens.
    pub async fn send(&self, command: Command) -> Result<(), CommandError> {
        let kind = command.kind();
        match self.tx.send_timeout(command, self.timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!("Command queue full, dropped {} command", kind);
                Err(CommandError::Timeout(self.timeout))
            }
            Err(SendTimeoutError::Closed(_)) => Err(CommandError::Closed),
        }
    }

    pub async fn enqueue_add(&self, spec: DeviceSpec) -> Result<(), CommandError> {
        self.send(Command::Add(spec)).await
    }

    pub async fn enqueue_remove(&self, name: impl Into<String>) -> Result<(), CommandError> {
        self.send(Command::Remove { name: name.into() }).await
    }

    pub async fn enqueue_set_enabled(&self, name: impl Into<String>, enabled: bool) -> Result<(), CommandError> {
        self.send(Command::SetEnabled {
            name: name.into(),
            enabled,
        })
        .await
    }

    pub async fn enqueue_reconfigure(
        &self,
        name: impl Into<String>,
        settings: ProbeSettings,
    ) -> Result<(), CommandError> {
        self.send(Command::Reconfigure {
            name: name.into(),
            settings,
        })
        .await
    }

    pub async fn enqueue_stop(&self) -> Result<(), CommandError> {
        self.send(Command::Stop).await
    }
}

/// Everything that was pending at drain time.
#[derive(Debug, Default)]
pub struct Drained {
    pub commands: Vec<Command>,
    /// Every sender is gone; no further commands can arrive.
    pub disconnected: bool,
}

/// Consumer side, owned by the scheduler.
pub struct CommandReceiver {
    rx: mpsc::Receiver<Command>,
}

impl CommandReceiver {
    /// Take every pending command without waiting, in arrival order.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => drained.commands.push(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drained.disconnected = true;
                    break;
                }
            }
        }
        drained
    }
}
