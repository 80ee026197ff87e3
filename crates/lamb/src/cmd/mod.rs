use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use lamb_fabric::{
    BrokerConfig, ClientConfig, ClientType, FabricConfig, SessionConfig, DEFAULT_CONTROL_PORT,
    DEFAULT_RECORD_SIZE,
};
use lamb_frame::Command as FrameCommand;
use lamb_transport::{AllocatorConfig, PortPolicy, DEFAULT_PORT_CEILING};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod hello;
pub mod pull;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the rendezvous broker.
    Serve(ServeArgs),
    /// Say hello and print the allocated session endpoint.
    Hello(HelloArgs),
    /// Push one record through a session.
    Send(SendArgs),
    /// Pull records from a session's lane.
    Pull(PullArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Hello(args) => hello::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Pull(args) => pull::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum PolicyArg {
    /// Never reuse a session port.
    Monotonic,
    /// Reuse freed session ports.
    Rescan,
}

impl From<PolicyArg> for PortPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Monotonic => PortPolicy::Monotonic,
            PolicyArg::Rescan => PortPolicy::Rescan,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the control and session endpoints on.
    #[arg(long, env = "LAMB_LISTEN", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub listen: IpAddr,
    /// Control endpoint port (0 picks an ephemeral port).
    #[arg(long, env = "LAMB_PORT", default_value_t = DEFAULT_CONTROL_PORT)]
    pub port: u16,
    /// Address advertised in hello responses. Default: --listen.
    #[arg(long, env = "LAMB_ADVERTISE")]
    pub advertise: Option<String>,
    /// Control connection receive timeout (e.g. 5s, 500ms).
    #[arg(long, env = "LAMB_RECV_TIMEOUT", default_value = "5s")]
    pub recv_timeout: String,
    /// How long to wait for a session worker to bind.
    #[arg(long, env = "LAMB_ALLOCATION_TIMEOUT", default_value = "5s")]
    pub allocation_timeout: String,
    /// Record size on the wire, header included.
    #[arg(long, env = "LAMB_RECORD_SIZE", default_value_t = DEFAULT_RECORD_SIZE)]
    pub record_size: usize,
    /// Empty polls without a peer before a session is closed.
    #[arg(long, env = "LAMB_IDLE_LIMIT", default_value_t = 3)]
    pub idle_limit: u32,
    /// Wait between polls while a session has no peer.
    #[arg(long, env = "LAMB_DEAD_PEER_BACKOFF", default_value = "1s")]
    pub dead_peer_backoff: String,
    /// Session port selection.
    #[arg(long, env = "LAMB_PORT_POLICY", value_enum, default_value = "monotonic")]
    pub port_policy: PolicyArg,
    /// Highest port handed to a session.
    #[arg(long, env = "LAMB_PORT_CEILING", default_value_t = DEFAULT_PORT_CEILING)]
    pub port_ceiling: u16,
    /// Interval between telemetry snapshots.
    #[arg(long, env = "LAMB_REPORT_INTERVAL", default_value = "3s")]
    pub report_interval: String,
}

impl ServeArgs {
    pub fn fabric_config(&self) -> CliResult<FabricConfig> {
        if self.record_size <= lamb_frame::HEADER_SIZE {
            return Err(CliError::new(
                USAGE,
                format!(
                    "--record-size must exceed the {}-byte header",
                    lamb_frame::HEADER_SIZE
                ),
            ));
        }
        Ok(FabricConfig {
            broker: BrokerConfig {
                listen: self.listen,
                port: self.port,
                advertise: self.advertise.clone(),
                recv_timeout: parse_duration(&self.recv_timeout)?,
                allocation_timeout: parse_duration(&self.allocation_timeout)?,
                ..BrokerConfig::default()
            },
            session: SessionConfig {
                record_size: self.record_size,
                idle_limit: self.idle_limit,
                dead_peer_backoff: parse_duration(&self.dead_peer_backoff)?,
                ..SessionConfig::default()
            },
            allocator: AllocatorConfig {
                ceiling: self.port_ceiling,
                policy: self.port_policy.into(),
            },
        })
    }
}

/// Where and as whom a client command connects.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Control endpoint address (host:port).
    pub addr: SocketAddr,
    /// Client identity (must be positive).
    #[arg(long, allow_hyphen_values = true)]
    pub id: i64,
    /// Client type: mt, mo, ismg, server, scheduler, delivery, gateway, or 1-7.
    #[arg(long = "type", default_value = "mt")]
    pub client_type: ClientType,
    /// Connect and reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

impl TargetArgs {
    pub fn client_config(&self, record_size: usize) -> CliResult<ClientConfig> {
        Ok(ClientConfig {
            timeout: parse_duration(&self.timeout)?,
            record_size,
        })
    }
}

#[derive(Args, Debug)]
pub struct HelloArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum RecordKind {
    Submit,
    Report,
    Deliver,
}

impl From<RecordKind> for FrameCommand {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Submit => FrameCommand::Submit,
            RecordKind::Report => FrameCommand::Report,
            RecordKind::Deliver => FrameCommand::Deliver,
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Record command.
    #[arg(long, value_enum, default_value = "submit")]
    pub command: RecordKind,
    /// Raw string body.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read the body from a file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Record size on the wire; must match the broker's.
    #[arg(long, env = "LAMB_RECORD_SIZE", default_value_t = DEFAULT_RECORD_SIZE)]
    pub record_size: usize,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    #[command(flatten)]
    pub target: TargetArgs,
    /// Stop after N requests. Default: pull until the queue is empty.
    #[arg(long)]
    pub count: Option<usize>,
    /// Record size on the wire; must match the broker's.
    #[arg(long, env = "LAMB_RECORD_SIZE", default_value_t = DEFAULT_RECORD_SIZE)]
    pub record_size: usize,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
