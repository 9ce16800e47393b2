//! Wire envelope types and message builders
//!
//! Every frame on the wire (except the bare `ping`/`pong` liveness frames)
//! is one JSON object carrying at least a `messageID` and a `command`.
//! Responses additionally carry a `response` status string; its absence
//! marks a message as an unsolicited notification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Request commands understood by the controller
pub mod commands {
    /// One-shot parameter read, optionally scoped by a condition
    pub const GET_PARAM_LIST: &str = "GetParamList";
    /// Register attributes for change notifications, returns initial values
    pub const REQUEST_PARAM_LIST: &str = "RequestParamList";
    /// Write parameters on an object
    pub const SET_PARAM_LIST: &str = "SETPARAMLIST";
    /// Run a named query
    pub const GET_QUERY: &str = "GetQuery";
}

/// Notification commands sent by the controller
pub mod notifications {
    /// Tracked attributes changed
    pub const NOTIFY_LIST: &str = "NotifyList";
    /// A parameter write was applied
    pub const WRITE_PARAM_LIST: &str = "WriteParamList";
    /// Result of a named query
    pub const SEND_QUERY: &str = "SendQuery";
    /// Unsolicited resend of the full configuration
    pub const SEND_PARAM_LIST: &str = "SendParamList";
}

/// Outbound request envelope
///
/// Command parameters are flattened into the envelope next to
/// `messageID` and `command`, as the peer expects.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub command: String,
    #[serde(flatten)]
    pub params: Option<Map<String, Value>>,
}

impl Request {
    pub fn new(message_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            command: command.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    /// Serialize to the wire line (without terminator)
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parsed inbound envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "messageID", default)]
    pub message_id: String,
    #[serde(default)]
    pub command: String,
    /// Status code of a reply; `None` for notifications
    #[serde(default)]
    pub response: Option<String>,
    #[serde(rename = "objectList", default)]
    pub object_list: Option<Vec<Value>>,
    #[serde(default)]
    pub answer: Option<Value>,
    #[serde(rename = "queryName", default)]
    pub query_name: Option<String>,
}

impl Envelope {
    /// Parse one wire line into an envelope
    pub fn parse(line: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// True when the message is not a reply to any request
    pub fn is_notification(&self) -> bool {
        self.response.is_none()
    }

    /// True when the reply carries the success status
    pub fn is_success(&self) -> bool {
        self.response.as_deref() == Some(crate::STATUS_OK)
    }

    /// Decode the `objectList` payload entries into a typed shape,
    /// skipping entries that do not match (the peer occasionally mixes
    /// malformed entries into otherwise valid lists).
    pub fn decode_object_list<T: serde::de::DeserializeOwned>(&self) -> Vec<T> {
        self.object_list
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|entry| match serde_json::from_value(entry.clone()) {
                Ok(decoded) => Some(decoded),
                Err(err) => {
                    tracing::warn!("skipping malformed objectList entry: {err}");
                    None
                }
            })
            .collect()
    }
}

/// `objectList` entry requesting attributes by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub objnam: String,
    pub keys: Vec<String>,
}

impl ObjectRequest {
    pub fn new(objnam: impl Into<String>, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            objnam: objnam.into(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// `objectList` entry carrying attribute values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectParams {
    pub objnam: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// `objectList` entry of a `WriteParamList` notification; the applied
/// values are nested one level deeper than in `NotifyList`
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectChanges {
    #[serde(default)]
    pub objnam: String,
    #[serde(default)]
    pub changes: Vec<ObjectParams>,
}

/// Parameters for a `GetParamList` request
pub fn param_list_query(condition: &str, objects: &[ObjectRequest]) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("condition".into(), Value::String(condition.into()));
    params.insert(
        "objectList".into(),
        serde_json::to_value(objects).unwrap_or(Value::Array(Vec::new())),
    );
    params
}

/// Parameters for a `RequestParamList` subscription batch
pub fn subscription_query(objects: &[ObjectRequest]) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert(
        "objectList".into(),
        serde_json::to_value(objects).unwrap_or(Value::Array(Vec::new())),
    );
    params
}

/// Parameters for a `SETPARAMLIST` write
pub fn write_params(objnam: &str, changes: &HashMap<String, String>) -> Map<String, Value> {
    let entry = serde_json::json!([{ "objnam": objnam, "params": changes }]);
    let mut params = Map::new();
    params.insert("objectList".into(), entry);
    params
}

/// Parameters for a `GetQuery` request
pub fn query_params(query_name: &str, arguments: &str) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("queryName".into(), Value::String(query_name.into()));
    params.insert("arguments".into(), Value::String(arguments.into()));
    params
}
