//! Control-endpoint hello exchange.
//!
//! A client opens a session by sending a `Request` envelope whose body is a
//! JSON [`HelloRequest`]. The broker answers once with a `Response`
//! envelope holding a [`HelloResponse`], or with an `Empty` envelope when
//! no session endpoint could be prepared in time.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use lamb_frame::{envelope, Command, Envelope};
use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

/// Category of a connecting client. Selects the lane its session feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ClientType {
    /// Mobile-terminated traffic from accounts.
    Mt = 1,
    /// Mobile-originated traffic towards accounts.
    Mo = 2,
    /// Carrier gateway link.
    Ismg = 3,
    /// Per-account server.
    Server = 4,
    /// Routing scheduler.
    Scheduler = 5,
    /// Delivery daemon.
    Delivery = 6,
    /// Upstream gateway.
    Gateway = 7,
}

impl ClientType {
    /// Every client type, in code order.
    pub const ALL: [ClientType; 7] = [
        ClientType::Mt,
        ClientType::Mo,
        ClientType::Ismg,
        ClientType::Server,
        ClientType::Scheduler,
        ClientType::Delivery,
        ClientType::Gateway,
    ];

    /// Wire code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Position in [`ClientType::ALL`].
    pub fn index(self) -> usize {
        (self.code() - 1) as usize
    }

    /// Lowercase lane name.
    pub fn name(self) -> &'static str {
        match self {
            ClientType::Mt => "mt",
            ClientType::Mo => "mo",
            ClientType::Ismg => "ismg",
            ClientType::Server => "server",
            ClientType::Scheduler => "scheduler",
            ClientType::Delivery => "delivery",
            ClientType::Gateway => "gateway",
        }
    }
}

impl TryFrom<i32> for ClientType {
    type Error = FabricError;

    fn try_from(code: i32) -> Result<Self> {
        ClientType::ALL
            .into_iter()
            .find(|ty| ty.code() == code)
            .ok_or(FabricError::UnknownClientType(code))
    }
}

impl FromStr for ClientType {
    type Err = String;

    /// Accepts a lane name (`mt`, `ismg`, ...) or its numeric code.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<i32>() {
            return ClientType::try_from(code).map_err(|err| err.to_string());
        }
        ClientType::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown client type '{s}'"))
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Client hello sent on the control endpoint.
///
/// `client_type` stays a raw integer so that values outside
/// [`ClientType`] still reach the dispatch step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloRequest {
    /// Account or link identifier. Must be at least 1.
    pub id: i64,
    /// Raw [`ClientType`] code.
    #[serde(rename = "type")]
    pub client_type: i32,
}

impl HelloRequest {
    /// Create a new hello for a known client type.
    pub fn new(id: i64, client_type: ClientType) -> Self {
        Self {
            id,
            client_type: client_type.code(),
        }
    }

    /// Reject ids below 1.
    pub fn validate(&self) -> Result<()> {
        if self.id < 1 {
            return Err(FabricError::InvalidIdentity(self.id));
        }
        Ok(())
    }

    /// Encode as a `Request` envelope.
    pub fn to_envelope(&self) -> Result<Bytes> {
        let body = serde_json::to_vec(self)?;
        Ok(envelope::encode(Command::Request, &body)?)
    }

    /// Decode from a received envelope. The command must be `Request`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        expect_command(envelope, Command::Request)?;
        Ok(serde_json::from_slice(&envelope.body)?)
    }
}

/// Broker reply naming the session endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloResponse {
    /// Echo of the request id.
    pub id: i64,
    /// Address the session endpoint is reachable on.
    pub addr: String,
    /// Session endpoint port.
    pub port: u16,
}

impl HelloResponse {
    /// Encode as a `Response` envelope.
    pub fn to_envelope(&self) -> Result<Bytes> {
        let body = serde_json::to_vec(self)?;
        Ok(envelope::encode(Command::Response, &body)?)
    }

    /// Decode from a received envelope. The command must be `Response`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        expect_command(envelope, Command::Response)?;
        Ok(serde_json::from_slice(&envelope.body)?)
    }
}

fn expect_command(envelope: &Envelope, expected: Command) -> Result<()> {
    if envelope.command != expected {
        return Err(FabricError::Protocol(format!(
            "expected {expected} envelope, got {}",
            envelope.command
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_json_uses_type_key() {
        let request = HelloRequest::new(42, ClientType::Mt);
        let json = serde_json::to_value(&request).expect("request should serialize");
        assert_eq!(json, serde_json::json!({ "id": 42, "type": 1 }));
    }

    #[test]
    fn request_roundtrip_through_envelope() {
        let request = HelloRequest::new(7, ClientType::Ismg);
        let wire = request.to_envelope().expect("request should encode");
        let envelope = Envelope::decode(&wire).expect("envelope should decode");
        assert_eq!(envelope.command, Command::Request);
        assert_eq!(
            HelloRequest::from_envelope(&envelope).expect("hello should decode"),
            request
        );
    }

    #[test]
    fn unknown_type_survives_decoding() {
        let envelope = Envelope::new(Command::Request, &br#"{"id":3,"type":99}"#[..]);
        let request = HelloRequest::from_envelope(&envelope).expect("hello should decode");
        assert_eq!(request.client_type, 99);
        assert!(matches!(
            ClientType::try_from(request.client_type),
            Err(FabricError::UnknownClientType(99))
        ));
    }

    #[test]
    fn identity_below_one_rejected() {
        assert!(HelloRequest::new(1, ClientType::Mo).validate().is_ok());
        assert!(matches!(
            HelloRequest::new(0, ClientType::Mo).validate(),
            Err(FabricError::InvalidIdentity(0))
        ));
        assert!(matches!(
            HelloRequest::new(-5, ClientType::Mo).validate(),
            Err(FabricError::InvalidIdentity(-5))
        ));
    }

    #[test]
    fn response_requires_response_command() {
        let envelope = Envelope::new(Command::Empty, Bytes::new());
        assert!(matches!(
            HelloResponse::from_envelope(&envelope),
            Err(FabricError::Protocol(_))
        ));
    }

    #[test]
    fn client_type_parses_names_and_codes() {
        assert_eq!("mt".parse::<ClientType>().unwrap(), ClientType::Mt);
        assert_eq!("ISMG".parse::<ClientType>().unwrap(), ClientType::Ismg);
        assert_eq!("6".parse::<ClientType>().unwrap(), ClientType::Delivery);
        assert!("sms".parse::<ClientType>().is_err());
        assert!("0".parse::<ClientType>().is_err());
    }

    #[test]
    fn index_matches_position() {
        for (position, ty) in ClientType::ALL.into_iter().enumerate() {
            assert_eq!(ty.index(), position);
        }
    }
}
