use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use lamb_frame::{FrameConfig, DEFAULT_MAX_MESSAGE};
use lamb_transport::AllocatorConfig;

/// Default control endpoint port. Sessions are allocated from the next one.
pub const DEFAULT_CONTROL_PORT: u16 = 30000;

/// Default fixed size of an application record on the wire, header included.
pub const DEFAULT_RECORD_SIZE: usize = 512;

/// Configuration for the rendezvous broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the control and session endpoints bind on.
    pub listen: IpAddr,
    /// Control endpoint port. `0` binds an ephemeral port.
    pub port: u16,
    /// Address put in hello responses. Defaults to `listen`.
    pub advertise: Option<String>,
    /// Receive timeout on a control connection before it is dropped.
    pub recv_timeout: Duration,
    /// How long to wait for a worker to report its session port.
    pub allocation_timeout: Duration,
    /// Wait between accept polls while no control connection is pending.
    pub accept_poll: Duration,
}

impl BrokerConfig {
    /// Address to advertise in hello responses.
    pub fn advertised_addr(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| self.listen.to_string())
    }

    pub(crate) fn control_frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_message_size: DEFAULT_MAX_MESSAGE,
            read_timeout: Some(self.recv_timeout),
            write_timeout: Some(self.recv_timeout),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_CONTROL_PORT,
            advertise: None,
            recv_timeout: Duration::from_secs(5),
            allocation_timeout: Duration::from_secs(5),
            accept_poll: Duration::from_millis(10),
        }
    }
}

/// Configuration for session workers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Exact wire size of a record message.
    pub record_size: usize,
    /// Wait between polls while a peer is attached.
    pub poll_interval: Duration,
    /// Wait after an empty poll while no peer is attached.
    pub dead_peer_backoff: Duration,
    /// Empty polls without a peer tolerated before the session closes.
    pub idle_limit: u32,
    /// How long a worker waits for the broker's assignment.
    pub assignment_timeout: Duration,
    /// Maximum inbound message size.
    pub max_message: usize,
    /// How long a reply may stay blocked on a peer that does not read
    /// before the peer is dropped.
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            record_size: DEFAULT_RECORD_SIZE,
            poll_interval: Duration::from_millis(10),
            dead_peer_backoff: Duration::from_secs(1),
            idle_limit: 3,
            assignment_timeout: Duration::from_secs(5),
            max_message: DEFAULT_MAX_MESSAGE,
            write_timeout: Duration::from_secs(1),
        }
    }
}

/// Everything a [`crate::Fabric`] is built from.
#[derive(Debug, Clone, Default)]
pub struct FabricConfig {
    pub broker: BrokerConfig,
    pub session: SessionConfig,
    pub allocator: AllocatorConfig,
}

/// Client-side settings for [`crate::client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect and reply timeout.
    pub timeout: Duration,
    /// Must match the serving fabric's `SessionConfig::record_size`.
    pub record_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            record_size: DEFAULT_RECORD_SIZE,
        }
    }
}
