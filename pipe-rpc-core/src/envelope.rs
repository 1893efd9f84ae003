use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::Payload;

/// Stable identifier for a logical request that survives relaying across hops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

/// Identifier for one transmitted envelope; the pending-response table's correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

macro_rules! uuid_newtype {
    ($ty:ident) => {
        impl $ty {
            /// Generates a fresh, random identifier.
            pub fn new() -> Self {
                $ty(Uuid::new_v4())
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $ty {
            fn from(id: Uuid) -> Self {
                $ty(id)
            }
        }

        impl From<$ty> for Uuid {
            fn from(id: $ty) -> Self {
                id.0
            }
        }
    };
}

uuid_newtype!(RequestId);
uuid_newtype!(MessageId);

/// A `Type` value on the wire: either one of the four reserved protocol
/// enumerants, or an application method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Reserved for "no value" requests; not currently used in replies.
    Void,
    /// Reply carrying an explicit nil result.
    Null,
    /// Reply carrying `{Message: string}`.
    Error,
    /// Only legal as the first frame sent by a worker on a newly accepted connection.
    RegisterWorker,
    /// Application traffic: the method name being invoked or replied to.
    Method(String),
}

impl MessageType {
    const VOID: &'static str = "Void";
    const NULL: &'static str = "Null";
    const ERROR: &'static str = "Error";
    const REGISTER_WORKER: &'static str = "RegisterWorker";

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Void => Self::VOID,
            MessageType::Null => Self::NULL,
            MessageType::Error => Self::ERROR,
            MessageType::RegisterWorker => Self::REGISTER_WORKER,
            MessageType::Method(name) => name.as_str(),
        }
    }

    pub fn is_reserved(&self) -> bool {
        !matches!(self, MessageType::Method(_))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            Self::VOID => MessageType::Void,
            Self::NULL => MessageType::Null,
            Self::ERROR => MessageType::Error,
            Self::REGISTER_WORKER => MessageType::RegisterWorker,
            other => MessageType::Method(other.to_owned()),
        }
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        MessageType::from(s.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(MessageType::from(s))
    }
}

/// The on-wire envelope: a request or a reply, framed by the codec.
///
/// Unknown fields are ignored on deserialize; `None` fields are omitted on
/// serialize, per the wire format in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PipeMessage {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message_id: Option<MessageId>,
    #[serde(rename = "Type")]
    pub ty: MessageType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<Payload>,
}

impl PipeMessage {
    /// Construction rule 1: a fresh envelope with a new `RequestId` and a new `MessageId`.
    pub fn new(ty: impl Into<MessageType>, payload: Payload) -> Self {
        PipeMessage {
            request_id: Some(RequestId::new()),
            message_id: Some(MessageId::new()),
            ty: ty.into(),
            payload: Some(payload),
        }
    }

    /// Construction rule 1, for a request carrying no payload (e.g. `RegisterWorker`).
    pub fn new_without_payload(ty: impl Into<MessageType>) -> Self {
        PipeMessage {
            request_id: Some(RequestId::new()),
            message_id: Some(MessageId::new()),
            ty: ty.into(),
            payload: None,
        }
    }

    /// Construction rule 2: a reply that inherits both `RequestId` and `MessageId`
    /// from `self` (the request being answered), so the pending-response table
    /// can correlate it by `MessageId`.
    pub fn copy_for(&self, ty: impl Into<MessageType>, payload: Payload) -> Self {
        PipeMessage {
            request_id: self.request_id,
            message_id: self.message_id,
            ty: ty.into(),
            payload: Some(payload),
        }
    }

    /// Construction rule 3: an envelope for forwarding `self`, carrying the
    /// original `RequestId` and `Payload` but a fresh `MessageId`, so the
    /// response to this hop can be correlated independently.
    pub fn relay(&self) -> Self {
        PipeMessage {
            request_id: self.request_id,
            message_id: Some(MessageId::new()),
            ty: self.ty.clone(),
            payload: self.payload.clone(),
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn is_error(&self) -> bool {
        matches!(self.ty, MessageType::Error)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.ty, MessageType::Null)
    }
}

/// Payload of a `RegisterWorker` envelope: `{WorkerId, PipeName}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    pub pipe_name: String,
}

/// Payload of an `Error` reply: `{Message}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorResponse {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_for_inherits_request_and_message_id() {
        let req = PipeMessage::new("Add", Payload::from_value(&(2, 3)).unwrap());
        let reply = req.copy_for("Add", Payload::from_value(&5).unwrap());

        assert_eq!(req.request_id(), reply.request_id());
        assert_eq!(req.message_id(), reply.message_id());
    }

    #[test]
    fn relay_keeps_request_id_but_allocates_fresh_message_id() {
        let req = PipeMessage::new("Add", Payload::from_value(&(2, 3)).unwrap());
        let relayed = req.relay();

        assert_eq!(req.request_id(), relayed.request_id());
        assert_ne!(req.message_id(), relayed.message_id());
    }

    #[test]
    fn message_type_round_trips_through_display_and_from() {
        for ty in [
            MessageType::Void,
            MessageType::Null,
            MessageType::Error,
            MessageType::RegisterWorker,
            MessageType::Method("Add".to_owned()),
        ] {
            let rt = MessageType::from(ty.as_str());
            assert_eq!(ty, rt);
        }
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = PipeMessage::new("Add", Payload::from_value(&(2, 3)).unwrap());
        let json = serde_json::to_string(&msg).unwrap();
        let back: PipeMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.request_id(), back.request_id());
        assert_eq!(msg.message_id(), back.message_id());
        assert_eq!(msg.ty, back.ty);
    }

    #[test]
    fn unknown_fields_are_ignored_on_deserialize() {
        let json = serde_json::json!({
            "RequestId": Uuid::new_v4().to_string(),
            "MessageId": Uuid::new_v4().to_string(),
            "Type": "Add",
            "Payload": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"[2,3]"),
            "SomeFutureField": "ignored",
        });

        let msg: PipeMessage = serde_json::from_value(json).unwrap();
        assert_eq!(msg.ty, MessageType::Method("Add".to_owned()));
    }
}
