//! Consumer liveness.
//!
//! A running consumer rewrites its heartbeat key every interval with a
//! short TTL. The key vanishing (deleted on shutdown, or lapsed after a
//! crash) is the only signal the rest of the fleet has that the consumer's
//! processing list is orphaned.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HeartbeatConfig;
use crate::consumer::Signal;
use crate::error::StoreResult;
use crate::storage::keys::{KeyScope, KeySegments, Keys};
use crate::storage::{scan_all, Connector, SetOptions, Store};

const ONLINE_SCAN_PAGE_SIZE: usize = 1000;

/// Process resource snapshot written as the heartbeat value.
///
/// Only redismq consumers write this shape. Heartbeats from other writers
/// still count as liveness but their value is reported as undecodable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceUsage {
    pub pid: u32,
    pub ram: RamUsage,
    pub cpu: CpuUsage,
}

/// Memory figures in bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RamUsage {
    pub rss: u64,
    #[serde(rename = "virtual")]
    pub virtual_memory: u64,
    pub free: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CpuUsage {
    /// Percent of one core since the previous sample.
    pub usage: f32,
}

/// Samples this process through a long-lived `System` so CPU usage is
/// measured between consecutive beats.
pub struct ResourceProbe {
    system: System,
    pid: Pid,
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    pub fn sample(&mut self) -> ResourceUsage {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        self.system.refresh_memory();

        let (rss, virtual_memory, usage) = match self.system.process(self.pid) {
            Some(process) => (
                process.memory(),
                process.virtual_memory(),
                process.cpu_usage(),
            ),
            None => (0, 0, 0.0),
        };
        ResourceUsage {
            pid: self.pid.as_u32(),
            ram: RamUsage {
                rss,
                virtual_memory,
                free: self.system.free_memory(),
                total: self.system.total_memory(),
            },
            cpu: CpuUsage { usage },
        }
    }
}

/// Start beating on a dedicated connection.
///
/// Sends [`Signal::HeartbeatStarted`] after the first successful write and
/// [`Signal::HeartbeatHalted`] once `halt` is raised and the key has been
/// deleted. Any store error ends the task with [`Signal::Fault`].
pub(crate) fn spawn(
    connector: Arc<dyn Connector>,
    queue: String,
    consumer_id: String,
    config: HeartbeatConfig,
    halt: watch::Receiver<bool>,
    signals: mpsc::UnboundedSender<Signal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let key = Keys::heartbeat_of(&queue, &consumer_id);
        let outcome = beat_until_halted(connector, &key, &config, halt, &signals).await;
        let signal = match outcome {
            Ok(()) => {
                info!(%queue, %consumer_id, "heartbeat halted");
                Signal::HeartbeatHalted
            }
            Err(err) => Signal::Fault(err),
        };
        let _ = signals.send(signal);
    })
}

async fn beat_until_halted(
    connector: Arc<dyn Connector>,
    key: &str,
    config: &HeartbeatConfig,
    mut halt: watch::Receiver<bool>,
    signals: &mpsc::UnboundedSender<Signal>,
) -> StoreResult<()> {
    let mut store = connector.connect().await?;
    let mut probe = ResourceProbe::new();
    let mut started = false;

    loop {
        let halted = *halt.borrow();
        if halted {
            break;
        }
        let usage = serde_json::to_string(&probe.sample())?;
        store
            .set(key, &usage, SetOptions::expiring(config.ttl()))
            .await?;
        if !started {
            started = true;
            let _ = signals.send(Signal::HeartbeatStarted);
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval()) => {}
            changed = halt.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    store.delete(key).await?;
    debug!(%key, "heartbeat key deleted");
    Ok(())
}

/// Whether a consumer's heartbeat key currently exists. Errors are
/// propagated, never read as "offline".
pub async fn is_online(store: &mut dyn Store, queue: &str, consumer_id: &str) -> StoreResult<bool> {
    store.exists(&Keys::heartbeat_of(queue, consumer_id)).await
}

/// A live consumer and its last reported resources.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineConsumer {
    pub consumer_id: String,
    /// `None` when the heartbeat value could not be decoded.
    pub resources: Option<ResourceUsage>,
}

/// Every consumer with a live heartbeat, grouped by queue name.
pub async fn online_consumers(
    store: &mut dyn Store,
) -> StoreResult<BTreeMap<String, Vec<OnlineConsumer>>> {
    let pattern = Keys::new(KeyScope::fleet()).pattern_heartbeat;
    let keys = scan_all(store, &pattern, ONLINE_SCAN_PAGE_SIZE).await?;
    let values = store.get_many(&keys).await?;

    let mut grouped: BTreeMap<String, Vec<OnlineConsumer>> = BTreeMap::new();
    for (key, value) in keys.iter().zip(values) {
        // Lapsed between the scan and the read.
        let Some(value) = value else { continue };
        let KeySegments::Heartbeat { queue, consumer } = KeySegments::parse(key) else {
            continue;
        };
        let resources = match serde_json::from_str(&value) {
            Ok(resources) => Some(resources),
            Err(err) => {
                warn!(%key, error = %err, "undecodable heartbeat value");
                None
            }
        };
        grouped.entry(queue).or_default().push(OnlineConsumer {
            consumer_id: consumer,
            resources,
        });
    }
    Ok(grouped)
}
