//! Session port allocation.
//!
//! Every accepted hello gets its own point-to-point endpoint, bound to the
//! first free port at or above a start port. The bind-and-retry scan runs
//! under one mutex so that two concurrent hellos can never obtain the same
//! port.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::tcp::TcpEndpoint;

/// Highest port the allocator will try by default.
pub const DEFAULT_PORT_CEILING: u16 = u16::MAX;

/// How the allocator picks the first port of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortPolicy {
    /// Never hand out a port below the last one allocated. Ports freed by
    /// closed sessions are not reused for the lifetime of the allocator.
    #[default]
    Monotonic,
    /// Start every scan at the requested start port, reusing freed ports.
    Rescan,
}

/// Configuration for [`PortAllocator`].
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Last port that may be tried before giving up.
    pub ceiling: u16,
    /// First-port selection policy.
    pub policy: PortPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_PORT_CEILING,
            policy: PortPolicy::default(),
        }
    }
}

/// Finds and binds the next free session endpoint.
#[derive(Debug)]
pub struct PortAllocator {
    listen: IpAddr,
    config: AllocatorConfig,
    /// Next port for the monotonic policy; `None` once the ceiling was handed out.
    cursor: Mutex<Option<u16>>,
}

impl PortAllocator {
    /// Create an allocator binding on `listen` with default configuration.
    pub fn new(listen: IpAddr) -> Self {
        Self::with_config(listen, AllocatorConfig::default())
    }

    /// Create an allocator with explicit configuration.
    pub fn with_config(listen: IpAddr, config: AllocatorConfig) -> Self {
        Self {
            listen,
            config,
            cursor: Mutex::new(Some(0)),
        }
    }

    /// Bind the first free port at or above `start`.
    ///
    /// Ports that are in use (or reserved) are skipped. Any other bind
    /// error aborts the scan. Returns the bound endpoint and its port.
    pub fn allocate(&self, start: u16) -> Result<(TcpEndpoint, u16)> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);

        let first = match self.config.policy {
            PortPolicy::Rescan => start,
            PortPolicy::Monotonic => match *cursor {
                Some(next) => start.max(next),
                None => return Err(self.exhausted(start)),
            },
        };

        // Port 0 would ask the OS for an ephemeral port; session ports are explicit.
        let first = first.max(1);
        if first > self.config.ceiling {
            return Err(self.exhausted(start));
        }

        for port in first..=self.config.ceiling {
            let addr = SocketAddr::new(self.listen, port);
            match TcpEndpoint::bind(addr) {
                Ok(endpoint) => {
                    *cursor = port.checked_add(1);
                    debug!(port, "allocated session port");
                    return Ok((endpoint, port));
                }
                Err(TransportError::Bind { source, .. })
                    if matches!(
                        source.kind(),
                        ErrorKind::AddrInUse | ErrorKind::PermissionDenied
                    ) =>
                {
                    trace!(port, error = %source, "port unavailable, trying next");
                }
                Err(err) => return Err(err),
            }
        }

        Err(self.exhausted(start))
    }

    /// The address session endpoints are bound on.
    pub fn listen(&self) -> IpAddr {
        self.listen
    }

    /// Active allocation policy.
    pub fn policy(&self) -> PortPolicy {
        self.config.policy
    }

    fn exhausted(&self, start: u16) -> TransportError {
        TransportError::NoPortAvailable {
            start,
            ceiling: self.config.ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    /// Reserve a short run of consecutive free ports and release them.
    fn free_port_base(span: u16) -> u16 {
        for _ in 0..64 {
            let probe = TcpEndpoint::bind(SocketAddr::new(LOOPBACK, 0)).unwrap();
            let base = probe.port();
            drop(probe);
            if base > u16::MAX - span {
                continue;
            }
            let all_free = (base..base + span)
                .all(|port| TcpEndpoint::bind(SocketAddr::new(LOOPBACK, port)).is_ok());
            if all_free {
                return base;
            }
        }
        panic!("could not find a free port range");
    }

    #[test]
    fn allocates_start_port_when_free() {
        let base = free_port_base(4);
        let allocator = PortAllocator::new(LOOPBACK);
        let (endpoint, port) = allocator.allocate(base).unwrap();
        assert_eq!(port, base);
        assert_eq!(endpoint.port(), base);
    }

    #[test]
    fn skips_ports_in_use() {
        let base = free_port_base(4);
        let _taken = TcpEndpoint::bind(SocketAddr::new(LOOPBACK, base)).unwrap();

        let allocator = PortAllocator::new(LOOPBACK);
        let (_endpoint, port) = allocator.allocate(base).unwrap();
        assert_eq!(port, base + 1);
    }

    #[test]
    fn monotonic_never_reuses_freed_port() {
        let base = free_port_base(4);
        let allocator = PortAllocator::new(LOOPBACK);

        let (first, first_port) = allocator.allocate(base).unwrap();
        drop(first);
        let (_second, second_port) = allocator.allocate(base).unwrap();

        assert_eq!(first_port, base);
        assert_eq!(second_port, base + 1);
    }

    #[test]
    fn rescan_reuses_freed_port() {
        let base = free_port_base(4);
        let allocator = PortAllocator::with_config(
            LOOPBACK,
            AllocatorConfig {
                policy: PortPolicy::Rescan,
                ..AllocatorConfig::default()
            },
        );

        let (first, first_port) = allocator.allocate(base).unwrap();
        drop(first);
        let (_second, second_port) = allocator.allocate(base).unwrap();

        assert_eq!(first_port, base);
        assert_eq!(second_port, base);
    }

    #[test]
    fn fails_past_ceiling() {
        let base = free_port_base(2);
        let _taken = TcpEndpoint::bind(SocketAddr::new(LOOPBACK, base)).unwrap();
        let allocator = PortAllocator::with_config(
            LOOPBACK,
            AllocatorConfig {
                ceiling: base,
                ..AllocatorConfig::default()
            },
        );

        let result = allocator.allocate(base);
        assert!(matches!(
            result,
            Err(TransportError::NoPortAvailable { start, ceiling }) if start == base && ceiling == base
        ));
    }

    #[test]
    fn monotonic_exhausts_after_ceiling_handed_out() {
        let base = free_port_base(2);
        let allocator = PortAllocator::with_config(
            LOOPBACK,
            AllocatorConfig {
                ceiling: base,
                ..AllocatorConfig::default()
            },
        );

        let (first, _) = allocator.allocate(base).unwrap();
        drop(first);
        assert!(matches!(
            allocator.allocate(base),
            Err(TransportError::NoPortAvailable { .. })
        ));
    }

    #[test]
    fn concurrent_allocations_get_distinct_ports() {
        let base = free_port_base(16);
        let allocator = Arc::new(PortAllocator::new(LOOPBACK));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || allocator.allocate(base).unwrap())
            })
            .collect();

        let endpoints: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        let ports: HashSet<u16> = endpoints.iter().map(|(_, port)| *port).collect();
        assert_eq!(ports.len(), endpoints.len());
    }
}
