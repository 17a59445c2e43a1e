//! Signaling envelopes
//!
//! One JSON object per WebSocket text frame, discriminated by `type`.
//! Offer, answer and candidate payloads are opaque and passed through untouched.

use crate::domain::shared::value_objects::Identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Opaque media payload (session description or connectivity candidate)
pub type Payload = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// Client announces its identifier
    Register {
        #[serde(rename = "userId", alias = "identifier")]
        user_id: Identifier,
    },
    /// Relay confirms a registration
    Registered {
        #[serde(rename = "userId")]
        user_id: Identifier,
        message: String,
    },
    /// Relay greeting sent on every new connection
    Connected { message: String },
    CallOffer {
        from: Identifier,
        to: Identifier,
        offer: Payload,
    },
    CallAnswer {
        from: Identifier,
        to: Identifier,
        answer: Payload,
    },
    IceCandidate {
        from: Identifier,
        to: Identifier,
        candidate: Payload,
    },
    CallEnd { from: Identifier, to: Identifier },
    Error { message: String },
}

/// Reasons an inbound frame is rejected.
///
/// The `Display` text is exactly what goes back to the sender.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Invalid message format")]
    Malformed(String),

    #[error("Unknown message type")]
    UnknownType(Option<String>),

    #[error("User ID is required")]
    MissingIdentifier,

    #[error("Missing required fields for {0}")]
    MissingFields(&'static str),
}

/// Loosely typed view of an inbound frame, before per-type validation
#[derive(Debug, Default, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "userId", alias = "identifier")]
    user_id: Option<Value>,
    from: Option<Value>,
    to: Option<Value>,
    offer: Option<Value>,
    answer: Option<Value>,
    candidate: Option<Value>,
}

impl Envelope {
    /// Parse and validate a client-to-relay frame.
    ///
    /// Nothing is routed until this succeeds. Relay-originated types
    /// (`registered`, `connected`, `error`) are rejected as unknown.
    pub fn parse_inbound(text: &str) -> Result<Self, EnvelopeError> {
        let raw: RawEnvelope =
            serde_json::from_str(text).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        match raw.kind.as_deref() {
            Some("register") => {
                let user_id = identifier(&raw.user_id).ok_or(EnvelopeError::MissingIdentifier)?;
                Ok(Envelope::Register { user_id })
            }
            Some("call-offer") => {
                let kind = "call offer";
                let (from, to) = endpoints(&raw, kind)?;
                let offer = payload(raw.offer).ok_or(EnvelopeError::MissingFields(kind))?;
                Ok(Envelope::CallOffer { from, to, offer })
            }
            Some("call-answer") => {
                let kind = "call answer";
                let (from, to) = endpoints(&raw, kind)?;
                let answer = payload(raw.answer).ok_or(EnvelopeError::MissingFields(kind))?;
                Ok(Envelope::CallAnswer { from, to, answer })
            }
            Some("ice-candidate") => {
                let kind = "ICE candidate";
                let (from, to) = endpoints(&raw, kind)?;
                let candidate = payload(raw.candidate).ok_or(EnvelopeError::MissingFields(kind))?;
                Ok(Envelope::IceCandidate { from, to, candidate })
            }
            Some("call-end") => {
                let (from, to) = endpoints(&raw, "call end")?;
                Ok(Envelope::CallEnd { from, to })
            }
            other => Err(EnvelopeError::UnknownType(other.map(str::to_string))),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    /// Wire name of this envelope's type
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Register { .. } => "register",
            Envelope::Registered { .. } => "registered",
            Envelope::Connected { .. } => "connected",
            Envelope::CallOffer { .. } => "call-offer",
            Envelope::CallAnswer { .. } => "call-answer",
            Envelope::IceCandidate { .. } => "ice-candidate",
            Envelope::CallEnd { .. } => "call-end",
            Envelope::Error { .. } => "error",
        }
    }

    pub fn sender(&self) -> Option<&Identifier> {
        match self {
            Envelope::CallOffer { from, .. }
            | Envelope::CallAnswer { from, .. }
            | Envelope::IceCandidate { from, .. }
            | Envelope::CallEnd { from, .. } => Some(from),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<&Identifier> {
        match self {
            Envelope::CallOffer { to, .. }
            | Envelope::CallAnswer { to, .. }
            | Envelope::IceCandidate { to, .. }
            | Envelope::CallEnd { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn identifier(value: &Option<Value>) -> Option<Identifier> {
    match value {
        Some(Value::String(s)) => Identifier::parse(s.as_str()).ok(),
        _ => None,
    }
}

fn payload(value: Option<Value>) -> Option<Payload> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => Some(v),
    }
}

fn endpoints(
    raw: &RawEnvelope,
    kind: &'static str,
) -> Result<(Identifier, Identifier), EnvelopeError> {
    match (identifier(&raw.from), identifier(&raw.to)) {
        (Some(from), Some(to)) => Ok((from, to)),
        _ => Err(EnvelopeError::MissingFields(kind)),
    }
}
