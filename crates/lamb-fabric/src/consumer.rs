//! Polling consumers for work queues.
//!
//! Backend loops (billing, storage, session intake) pop until the queue is
//! empty, then idle through the pacer.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::error::{FabricError, Result};
use crate::pacer::Pacer;
use crate::queue::WorkQueue;

/// Default wait after the queue runs dry.
pub const DEFAULT_IDLE: Duration = Duration::from_millis(10);

/// Drain `queue` into `handler` until the pacer is cancelled. Returns the
/// number of items handled.
pub fn drain<T, F>(
    queue: &WorkQueue<T>,
    pacer: &dyn Pacer,
    idle: Duration,
    mut handler: F,
) -> u64
where
    F: FnMut(T),
{
    let mut handled = 0u64;
    loop {
        while let Some(item) = queue.pop() {
            handler(item);
            handled += 1;
        }
        if !pacer.pause(idle) {
            debug!(queue = queue.name(), handled, "consumer stopped");
            return handled;
        }
    }
}

/// Run [`drain`] on a dedicated thread.
pub fn spawn_consumer<T, F>(
    queue: Arc<WorkQueue<T>>,
    pacer: Arc<dyn Pacer>,
    idle: Duration,
    handler: F,
) -> Result<JoinHandle<u64>>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let name = format!("lamb-consumer-{}", queue.name());
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || drain(&queue, pacer.as_ref(), idle, handler))
        .map_err(|source| FabricError::Spawn { name, source })
}
