//! Protocol messages for shared reducer synchronisation.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier linking a sent delta to the server's eventual response.
pub type CorrelationId = u64;

const INIT: &str = "init";
const DELTA: &str = "delta";
const LEGACY_CHANGE: &str = "change";
const ERROR: &str = "error";
const ID: &str = "id";

/// A locally-originated delta sent to the server.
///
/// Encodes as `{ "delta": <Delta>, "id": <int> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage<D> {
    /// The combined delta produced by one flush.
    #[serde(alias = "change")]
    pub delta: D,
    /// Correlation id assigned at flush time.
    pub id: CorrelationId,
}

impl<D> ClientMessage<D> {
    /// Creates a new client message.
    pub fn new(delta: D, id: CorrelationId) -> Self {
        Self { delta, id }
    }
}

impl<D: Serialize> ClientMessage<D> {
    /// Encodes to a JSON value.
    pub fn encode(&self) -> ProtocolResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl<D: DeserializeOwned> ClientMessage<D> {
    /// Decodes from a JSON value.
    pub fn decode(value: Value) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// A message sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage<T, D> {
    /// Full baseline state: `{ "init": <State> }`.
    Init(T),
    /// A delta the server has applied: `{ "delta": <Delta>, "id"?: <int> }`.
    ///
    /// `id` is present only when echoing this client's own change.
    Change {
        /// The applied delta.
        delta: D,
        /// Correlation id of the originating client message, if ours.
        id: Option<CorrelationId>,
    },
    /// A rejected change or unattributed failure: `{ "error": <string>, "id"?: <int> }`.
    Error {
        /// Server-supplied reason.
        error: String,
        /// Correlation id of the rejected client message, if any.
        id: Option<CorrelationId>,
    },
}

impl<T, D> ServerMessage<T, D> {
    /// Creates a baseline message.
    pub fn init(state: T) -> Self {
        Self::Init(state)
    }

    /// Creates an acknowledgement of a client's own change.
    pub fn ack(delta: D, id: CorrelationId) -> Self {
        Self::Change {
            delta,
            id: Some(id),
        }
    }

    /// Creates a broadcast of another client's change.
    pub fn change(delta: D) -> Self {
        Self::Change { delta, id: None }
    }

    /// Creates a rejection.
    pub fn rejection(error: impl Into<String>, id: Option<CorrelationId>) -> Self {
        Self::Error {
            error: error.into(),
            id,
        }
    }

    /// Returns the correlation id carried by the message.
    pub fn id(&self) -> Option<CorrelationId> {
        match self {
            ServerMessage::Init(_) => None,
            ServerMessage::Change { id, .. } | ServerMessage::Error { id, .. } => *id,
        }
    }
}

impl<T: DeserializeOwned, D: DeserializeOwned> ServerMessage<T, D> {
    /// Decodes from a JSON value.
    ///
    /// The message kind is chosen by key presence, checked in the order
    /// `delta` (or `change`), `init`, `error`.
    pub fn decode(value: Value) -> ProtocolResult<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => return Err(ProtocolError::NotAnObject(other.to_string())),
        };

        if let Some(delta) = map.remove(DELTA).or_else(|| map.remove(LEGACY_CHANGE)) {
            let id = take_id(&mut map)?;
            let delta =
                serde_json::from_value(delta).map_err(|e| ProtocolError::malformed(DELTA, e))?;
            return Ok(Self::Change { delta, id });
        }

        if let Some(state) = map.remove(INIT) {
            let state =
                serde_json::from_value(state).map_err(|e| ProtocolError::malformed(INIT, e))?;
            return Ok(Self::Init(state));
        }

        if let Some(error) = map.remove(ERROR) {
            let id = take_id(&mut map)?;
            let error = match error {
                Value::String(text) => text,
                other => other.to_string(),
            };
            return Ok(Self::Error { error, id });
        }

        Err(ProtocolError::UnknownMessage(Value::Object(map).to_string()))
    }
}

impl<T: Serialize, D: Serialize> ServerMessage<T, D> {
    /// Encodes to a JSON value.
    pub fn encode(&self) -> ProtocolResult<Value> {
        let mut map = Map::new();
        match self {
            ServerMessage::Init(state) => {
                map.insert(INIT.into(), serde_json::to_value(state)?);
            }
            ServerMessage::Change { delta, id } => {
                map.insert(DELTA.into(), serde_json::to_value(delta)?);
                if let Some(id) = id {
                    map.insert(ID.into(), Value::from(*id));
                }
            }
            ServerMessage::Error { error, id } => {
                map.insert(ERROR.into(), Value::String(error.clone()));
                if let Some(id) = id {
                    map.insert(ID.into(), Value::from(*id));
                }
            }
        }
        Ok(Value::Object(map))
    }
}

fn take_id(map: &mut Map<String, Value>) -> ProtocolResult<Option<CorrelationId>> {
    match map.remove(ID) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ProtocolError::malformed(ID, format!("expected unsigned integer, got {value}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Message = ServerMessage<Value, Value>;

    #[test]
    fn client_message_shape() {
        let message = ClientMessage::new(json!({"bar": ["+", 5]}), 3);
        assert_eq!(
            message.encode().unwrap(),
            json!({"delta": {"bar": ["+", 5]}, "id": 3})
        );
    }

    #[test]
    fn client_message_accepts_legacy_key() {
        let message: ClientMessage<Value> =
            ClientMessage::decode(json!({"change": {"a": 1}, "id": 9})).unwrap();
        assert_eq!(message.id, 9);
        assert_eq!(message.delta, json!({"a": 1}));
    }

    #[test]
    fn decode_init() {
        let message = Message::decode(json!({"init": {"foo": "v1", "bar": 10}})).unwrap();
        assert_eq!(message, ServerMessage::Init(json!({"foo": "v1", "bar": 10})));
        assert_eq!(message.id(), None);
    }

    #[test]
    fn decode_ack_and_broadcast() {
        let ack = Message::decode(json!({"delta": {"x": 1}, "id": 4})).unwrap();
        assert_eq!(ack, ServerMessage::ack(json!({"x": 1}), 4));

        let broadcast = Message::decode(json!({"change": {"x": 1}})).unwrap();
        assert_eq!(broadcast, ServerMessage::change(json!({"x": 1})));
    }

    #[test]
    fn decode_rejection() {
        let message = Message::decode(json!({"error": "Cannot modify data", "id": 2})).unwrap();
        assert_eq!(
            message,
            ServerMessage::rejection("Cannot modify data", Some(2))
        );

        let unattributed = Message::decode(json!({"error": "boom"})).unwrap();
        assert_eq!(unattributed.id(), None);
    }

    #[test]
    fn delta_takes_precedence_over_other_keys() {
        let message = Message::decode(json!({"delta": 1, "init": 2, "error": "x"})).unwrap();
        assert!(matches!(message, ServerMessage::Change { .. }));
    }

    #[test]
    fn decode_rejects_unknown_and_malformed() {
        assert!(matches!(
            Message::decode(json!({"hello": 1})),
            Err(ProtocolError::UnknownMessage(_))
        ));
        assert!(matches!(
            Message::decode(json!([1, 2])),
            Err(ProtocolError::NotAnObject(_))
        ));
        assert!(matches!(
            Message::decode(json!({"delta": 1, "id": "seven"})),
            Err(ProtocolError::Malformed { field: "id", .. })
        ));

        let typed = ServerMessage::<u32, i64>::decode(json!({"init": "text"}));
        assert!(matches!(
            typed,
            Err(ProtocolError::Malformed { field: "init", .. })
        ));
    }

    #[test]
    fn encode_omits_absent_id() {
        let message: Message = ServerMessage::change(json!({"x": 1}));
        assert_eq!(message.encode().unwrap(), json!({"delta": {"x": 1}}));

        let message: Message = ServerMessage::rejection("no", Some(7));
        assert_eq!(message.encode().unwrap(), json!({"error": "no", "id": 7}));
    }
}
