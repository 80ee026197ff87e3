//! Fabric counters and periodic reporting.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lamb_frame::Command;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{FabricError, Result};
use crate::fabric::Fabric;

/// Default interval between telemetry reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(3);

/// A fabric-wide event counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    HellosAccepted,
    HellosRejected,
    Malformed,
    AllocationFailures,
    AllocationTimeouts,
    UnknownClientTypes,
    SessionsOpened,
    SessionsClosed,
    DeadPeers,
    PushedSubmit,
    PushedReport,
    PushedDeliver,
    Popped,
    EmptyPops,
}

impl Counter {
    pub const ALL: [Counter; 14] = [
        Counter::HellosAccepted,
        Counter::HellosRejected,
        Counter::Malformed,
        Counter::AllocationFailures,
        Counter::AllocationTimeouts,
        Counter::UnknownClientTypes,
        Counter::SessionsOpened,
        Counter::SessionsClosed,
        Counter::DeadPeers,
        Counter::PushedSubmit,
        Counter::PushedReport,
        Counter::PushedDeliver,
        Counter::Popped,
        Counter::EmptyPops,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::HellosAccepted => "hellos_accepted",
            Counter::HellosRejected => "hellos_rejected",
            Counter::Malformed => "malformed",
            Counter::AllocationFailures => "allocation_failures",
            Counter::AllocationTimeouts => "allocation_timeouts",
            Counter::UnknownClientTypes => "unknown_client_types",
            Counter::SessionsOpened => "sessions_opened",
            Counter::SessionsClosed => "sessions_closed",
            Counter::DeadPeers => "dead_peers",
            Counter::PushedSubmit => "pushed_submit",
            Counter::PushedReport => "pushed_report",
            Counter::PushedDeliver => "pushed_deliver",
            Counter::Popped => "popped",
            Counter::EmptyPops => "empty_pops",
        }
    }

    /// The push counter for a record command.
    pub fn pushed(command: Command) -> Option<Counter> {
        match command {
            Command::Submit => Some(Counter::PushedSubmit),
            Command::Report => Some(Counter::PushedReport),
            Command::Deliver => Some(Counter::PushedDeliver),
            _ => None,
        }
    }
}

/// Lock-free event counters.
#[derive(Debug, Default)]
pub struct FabricCounters {
    values: [AtomicU64; Counter::ALL.len()],
}

impl FabricCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.values[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter as usize].load(Ordering::Relaxed)
    }

    /// Current value of every counter, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        Counter::ALL
            .into_iter()
            .map(|counter| (counter.name(), self.get(counter)))
            .collect()
    }
}

/// Queue depths of one lane.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LaneSnapshot {
    pub name: &'static str,
    pub sessions: usize,
    pub messages: usize,
}

/// Point-in-time view of the whole fabric.
#[derive(Debug, Clone, Serialize)]
pub struct FabricSnapshot {
    pub lanes: Vec<LaneSnapshot>,
    pub live_sessions: usize,
    pub counters: BTreeMap<&'static str, u64>,
}

impl FabricSnapshot {
    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters.get(counter.name()).copied().unwrap_or(0)
    }

    /// Messages queued across all lanes.
    pub fn queued(&self) -> usize {
        self.lanes.iter().map(|lane| lane.messages).sum()
    }
}

/// Destination for periodic snapshots.
pub trait TelemetrySink: Send + Sync {
    fn report(&self, snapshot: &FabricSnapshot);
}

/// Sink that writes snapshots to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn report(&self, snapshot: &FabricSnapshot) {
        info!(
            live_sessions = snapshot.live_sessions,
            queued = snapshot.queued(),
            accepted = snapshot.counter(Counter::HellosAccepted),
            rejected = snapshot.counter(Counter::HellosRejected),
            popped = snapshot.counter(Counter::Popped),
            dead_peers = snapshot.counter(Counter::DeadPeers),
            "fabric status"
        );
        for lane in &snapshot.lanes {
            debug!(
                queue = lane.name,
                sessions = lane.sessions,
                messages = lane.messages,
                "lane status"
            );
        }
    }
}

/// Report a snapshot to `sink` every `interval` until the fabric shuts down.
pub fn spawn_reporter(
    fabric: Arc<Fabric>,
    sink: Arc<dyn TelemetrySink>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let name = "lamb-telemetry".to_string();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            while fabric.pacer().pause(interval) {
                sink.report(&fabric.snapshot());
            }
            debug!("telemetry reporter stopped");
        })
        .map_err(|source| FabricError::Spawn { name, source })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::FabricConfig;
    use crate::pacer::InstantPacer;

    #[derive(Default)]
    struct CollectingSink {
        snapshots: Mutex<Vec<FabricSnapshot>>,
    }

    impl TelemetrySink for CollectingSink {
        fn report(&self, snapshot: &FabricSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }
    }

    #[test]
    fn counters_start_at_zero_and_increment() {
        let counters = FabricCounters::new();
        counters.incr(Counter::Popped);
        counters.incr(Counter::Popped);
        counters.incr(Counter::DeadPeers);

        assert_eq!(counters.get(Counter::Popped), 2);
        assert_eq!(counters.get(Counter::DeadPeers), 1);
        assert_eq!(counters.get(Counter::Malformed), 0);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.len(), Counter::ALL.len());
        assert_eq!(snapshot["popped"], 2);
    }

    #[test]
    fn only_records_have_push_counters() {
        assert_eq!(
            Counter::pushed(Command::Deliver),
            Some(Counter::PushedDeliver)
        );
        assert_eq!(Counter::pushed(Command::Req), None);
    }

    #[test]
    fn reporter_stops_when_pacer_cancels() {
        let pacer = Arc::new(InstantPacer::with_limit(3));
        let fabric = Arc::new(Fabric::with_pacer(FabricConfig::default(), pacer.clone()));
        let sink = Arc::new(CollectingSink::default());

        let handle = spawn_reporter(fabric, sink.clone(), Duration::from_secs(3))
            .expect("reporter should spawn");
        handle.join().expect("reporter should stop");

        let snapshots = sink.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].lanes.len(), 7);
        assert_eq!(snapshots[0].live_sessions, 0);
    }
}
