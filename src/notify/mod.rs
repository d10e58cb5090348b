//! Event delivery to notification sinks.
//!
//! The scheduler and wake coordinator push [`Event`]s into a bounded queue
//! with `try_send`; a dispatcher task hands them to every sink. A full queue
//! drops the event instead of stalling the producer.
//!
//! Status changes and wake notices travel on a separate unbounded lane that
//! the dispatcher drains first, so they are never dropped. Their order
//! relative to probe results is not preserved.

mod logger;
mod webhook;

pub use logger::*;
pub use webhook::*;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::registry::{Device, DeviceStats, DeviceStatus};
use crate::wake::MacAddress;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("sink rejected event: {0}")]
    Rejected(String),
}

/// Something worth telling the outside world about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ProbeResult {
        name: String,
        address: String,
        alive: bool,
        latency_ms: u32,
    },
    StatusChange {
        name: String,
        old: DeviceStatus,
        new: DeviceStatus,
    },
    ProbeError {
        name: String,
        address: String,
        error: String,
    },
    WakeSent {
        name: String,
        hw_address: MacAddress,
    },
    StatusReport {
        device: Device,
    },
    /// Periodic counters for one device.
    Statistics(DeviceStats),
}

impl Event {
    /// Edge events must reach the sinks even when the queue is full.
    fn is_edge(&self) -> bool {
        matches!(self, Event::StatusChange { .. } | Event::WakeSent { .. })
    }
}

/// Downstream consumer of engine events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn on_probe_result(&self, name: &str, address: &str, alive: bool, latency_ms: u32) -> Result<(), SinkError>;

    async fn on_status_change(&self, name: &str, old: DeviceStatus, new: DeviceStatus) -> Result<(), SinkError>;

    async fn on_probe_error(&self, _name: &str, _address: &str, _error: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn on_wake_sent(&self, _name: &str, _hw_address: MacAddress) -> Result<(), SinkError> {
        Ok(())
    }

    async fn on_status_report(&self, _device: &Device) -> Result<(), SinkError> {
        Ok(())
    }

    async fn on_statistics(&self, _stats: &DeviceStats) -> Result<(), SinkError> {
        Ok(())
    }
}

async fn deliver(sink: &dyn NotificationSink, event: &Event) -> Result<(), SinkError> {
    match event {
        Event::ProbeResult {
            name,
            address,
            alive,
            latency_ms,
        } => sink.on_probe_result(name, address, *alive, *latency_ms).await,
        Event::StatusChange { name, old, new } => sink.on_status_change(name, *old, *new).await,
        Event::ProbeError { name, address, error } => sink.on_probe_error(name, address, error).await,
        Event::WakeSent { name, hw_address } => sink.on_wake_sent(name, *hw_address).await,
        Event::StatusReport { device } => sink.on_status_report(device).await,
        Event::Statistics(stats) => sink.on_statistics(stats).await,
    }
}

/// Producer handle for the event queue.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Event>,
    edges: mpsc::UnboundedSender<Event>,
}

impl Notifier {
    /// Queue an event without waiting.
    pub fn emit(&self, event: Event) {
        if event.is_edge() {
            if self.edges.send(event).is_err() {
                tracing::debug!("Notification dispatcher stopped, event discarded");
            }
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!("Notification queue full, dropping {:?}", ev);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Notification dispatcher stopped, event discarded");
            }
        }
    }
}

/// Start the dispatcher task.
///
/// It runs until every [`Notifier`] is dropped or `stop` fires; on stop it
/// flushes whatever is already queued first. Dropping the stop sender
/// without sending does not stop it.
pub fn spawn_dispatcher(
    sinks: Vec<Arc<dyn NotificationSink>>,
    buffer: usize,
    stop: broadcast::Receiver<()>,
) -> (Notifier, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let (edges_tx, edges_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_dispatcher(rx, edges_rx, sinks, stop));
    (Notifier { tx, edges: edges_tx }, handle)
}

async fn run_dispatcher(
    mut rx: mpsc::Receiver<Event>,
    mut edges: mpsc::UnboundedReceiver<Event>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    mut stop: broadcast::Receiver<()>,
) {
    let mut stop_open = true;
    let mut queue_open = true;
    let mut edges_open = true;

    while queue_open || edges_open {
        tokio::select! {
            biased;
            signal = stop.recv(), if stop_open => match signal {
                Err(broadcast::error::RecvError::Closed) => stop_open = false,
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    while let Ok(ev) = edges.try_recv() {
                        dispatch(&sinks, &ev).await;
                    }
                    while let Ok(ev) = rx.try_recv() {
                        dispatch(&sinks, &ev).await;
                    }
                    break;
                }
            },
            event = edges.recv(), if edges_open => match event {
                Some(ev) => dispatch(&sinks, &ev).await,
                None => edges_open = false,
            },
            event = rx.recv(), if queue_open => match event {
                Some(ev) => dispatch(&sinks, &ev).await,
                None => queue_open = false,
            },
        }
    }
    tracing::debug!("Notification dispatcher stopped");
}

async fn dispatch(sinks: &[Arc<dyn NotificationSink>], event: &Event) {
    for sink in sinks {
        if let Err(e) = deliver(sink.as_ref(), event).await {
            tracing::warn!("Failed to deliver notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settle, GatedSink, RecordingSink};

    fn result(name: &str) -> Event {
        Event::ProbeResult {
            name: name.to_string(),
            address: "10.0.0.1".to_string(),
            alive: true,
            latency_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out_to_every_sink() {
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        let (_stop_tx, stop_rx) = broadcast::channel(1);
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![a.clone(), b.clone()];
        let (notifier, handle) = spawn_dispatcher(sinks, 8, stop_rx);

        notifier.emit(Event::StatusChange {
            name: "db".to_string(),
            old: DeviceStatus::Unknown,
            new: DeviceStatus::Offline,
        });
        drop(notifier);
        handle.await.unwrap();

        assert_eq!(a.status_changes("db"), vec![(DeviceStatus::Unknown, DeviceStatus::Offline)]);
        assert_eq!(b.events().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_flushes_queued_events() {
        let sink = Arc::new(RecordingSink::default());
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![sink.clone()];
        let (notifier, handle) = spawn_dispatcher(sinks, 8, stop_rx);

        for i in 0..3 {
            notifier.emit(Event::ProbeResult {
                name: format!("dev{i}"),
                address: "10.0.0.1".to_string(),
                alive: true,
                latency_ms: i,
            });
        }
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(sink.events().len(), 3);
        // Still alive, but the queue is closed.
        notifier.emit(Event::WakeSent {
            name: "x".to_string(),
            hw_address: MacAddress::new([0; 6]),
        });
    }

    #[tokio::test]
    async fn test_full_queue_drops_results_but_keeps_status_changes() {
        let sink = Arc::new(GatedSink::new());
        let (_stop_tx, stop_rx) = broadcast::channel(1);
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![sink.clone()];
        let (notifier, handle) = spawn_dispatcher(sinks, 1, stop_rx);

        // The dispatcher takes "a" and parks inside the sink.
        notifier.emit(result("a"));
        settle().await;
        assert_eq!(sink.started(), 1);

        let start = std::time::Instant::now();
        notifier.emit(result("b"));
        notifier.emit(result("c"));
        notifier.emit(Event::StatusChange {
            name: "db".to_string(),
            old: DeviceStatus::Online,
            new: DeviceStatus::Offline,
        });
        assert!(start.elapsed() < std::time::Duration::from_millis(50));

        sink.release(8);
        drop(notifier);
        handle.await.unwrap();

        let recorded = sink.recorded();
        assert_eq!(recorded.probe_results("a").len(), 1);
        assert_eq!(recorded.probe_results("b").len(), 1);
        assert!(recorded.probe_results("c").is_empty());
        assert_eq!(
            recorded.status_changes("db"),
            vec![(DeviceStatus::Online, DeviceStatus::Offline)]
        );
    }

    #[tokio::test]
    async fn test_dropped_stop_sender_keeps_dispatcher_running() {
        let sink = Arc::new(RecordingSink::default());
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![sink.clone()];
        let (notifier, handle) = spawn_dispatcher(sinks, 8, stop_rx);

        drop(stop_tx);
        settle().await;
        notifier.emit(result("late"));
        settle().await;
        assert_eq!(sink.probe_results("late").len(), 1);
        assert!(!handle.is_finished());

        drop(notifier);
        handle.await.unwrap();
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(Event::StatusChange {
            name: "db".to_string(),
            old: DeviceStatus::Offline,
            new: DeviceStatus::Online,
        })
        .unwrap();
        assert_eq!(json["event"], "status_change");
        assert_eq!(json["old"], "offline");
        assert_eq!(json["new"], "online");

        let json = serde_json::to_value(Event::Statistics(DeviceStats {
            name: "db".to_string(),
            address: "10.0.0.5".to_string(),
            success_count: 3,
            fail_count: 1,
            success_rate: 75.0,
        }))
        .unwrap();
        assert_eq!(json["event"], "statistics");
        assert_eq!(json["success_rate"], 75.0);
    }
}
