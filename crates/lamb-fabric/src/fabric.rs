use std::sync::Arc;

use lamb_transport::PortAllocator;

use crate::config::FabricConfig;
use crate::pacer::{Pacer, SignalPacer};
use crate::registry::SessionRegistry;
use crate::router::DispatchRouter;
use crate::telemetry::{FabricCounters, FabricSnapshot, LaneSnapshot};

/// Shared state of one running fabric: allocator, lanes, session registry,
/// counters and the pacer every wait goes through.
///
/// Passed explicitly as `Arc<Fabric>` to the broker, workers, consumers and
/// the telemetry reporter.
pub struct Fabric {
    config: FabricConfig,
    allocator: PortAllocator,
    router: DispatchRouter,
    registry: Arc<SessionRegistry>,
    counters: FabricCounters,
    pacer: Arc<dyn Pacer>,
}

impl Fabric {
    /// Create a new fabric with a real-time pacer.
    pub fn new(config: FabricConfig) -> Self {
        Self::with_pacer(config, Arc::new(SignalPacer::new()))
    }

    /// Create a new fabric with an explicit pacer.
    pub fn with_pacer(config: FabricConfig, pacer: Arc<dyn Pacer>) -> Self {
        let allocator =
            PortAllocator::with_config(config.broker.listen, config.allocator.clone());
        Self {
            config,
            allocator,
            router: DispatchRouter::new(),
            registry: Arc::new(SessionRegistry::new()),
            counters: FabricCounters::new(),
            pacer,
        }
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    pub fn router(&self) -> &DispatchRouter {
        &self.router
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn counters(&self) -> &FabricCounters {
        &self.counters
    }

    pub fn pacer(&self) -> &dyn Pacer {
        self.pacer.as_ref()
    }

    /// Shared handle to the pacer, for threads that outlive a borrow.
    pub fn pacer_handle(&self) -> Arc<dyn Pacer> {
        Arc::clone(&self.pacer)
    }

    /// Cancel every wait; the broker, workers, consumers and reporter wind
    /// down at their next pause.
    pub fn shutdown(&self) {
        self.pacer.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.pacer.is_cancelled()
    }

    /// Lane depths, live sessions and counters.
    pub fn snapshot(&self) -> FabricSnapshot {
        FabricSnapshot {
            lanes: self
                .router
                .lanes()
                .iter()
                .map(|lane| LaneSnapshot {
                    name: lane.name(),
                    sessions: lane.sessions.len(),
                    messages: lane.messages.len(),
                })
                .collect(),
            live_sessions: self.registry.len(),
            counters: self.counters.snapshot(),
        }
    }
}

impl std::fmt::Debug for Fabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fabric")
            .field("config", &self.config)
            .field("live_sessions", &self.registry.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
