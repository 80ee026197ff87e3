//! Envelope command codes.
//!
//! The set is closed: a code outside it is rejected by the decoder before
//! any body byte is interpreted.

use crate::error::FrameError;

/// Command code carried in every envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Client hello on the control endpoint.
    Request = 1,
    /// Broker reply to a hello.
    Response = 2,
    /// Mobile-terminated message submitted by an account.
    Submit = 3,
    /// Delivery status report.
    Report = 4,
    /// Mobile-originated message delivered to an account.
    Deliver = 5,
    /// Pull request for the next queued item.
    Req = 6,
    /// Reply to a pull request when the queue is empty; also the broker's
    /// failure reply when no session could be prepared in time.
    Empty = 7,
}

impl Command {
    /// Every command, in code order.
    pub const ALL: [Command; 7] = [
        Command::Request,
        Command::Response,
        Command::Submit,
        Command::Report,
        Command::Deliver,
        Command::Req,
        Command::Empty,
    ];

    /// Wire code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Returns a human-readable name for the command.
    pub fn name(self) -> &'static str {
        match self {
            Command::Request => "REQUEST",
            Command::Response => "RESPONSE",
            Command::Submit => "SUBMIT",
            Command::Report => "REPORT",
            Command::Deliver => "DELIVER",
            Command::Req => "REQ",
            Command::Empty => "EMPTY",
        }
    }

    /// Returns true for commands that carry an application record
    /// through a session.
    pub fn is_record(self) -> bool {
        matches!(self, Command::Submit | Command::Report | Command::Deliver)
    }
}

impl TryFrom<u32> for Command {
    type Error = FrameError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Command::ALL
            .into_iter()
            .find(|command| command.code() == code)
            .ok_or(FrameError::UnknownCommand(code))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
