//! Wire frames of the SFU control channel.
//!
//! Every frame is a JSON object of one of the shapes:
//! - `{"request": true, "id", "method", "data"}`;
//! - `{"response": true, "id", "ok": true, "data"}`;
//! - `{"response": true, "id", "ok": false, "errorCode", "errorReason"}`;
//! - `{"message": true, "method", "data"}`.

use std::convert::TryFrom as _;

use derive_more::{Display, From};
use serde_json::{json, Map, Value};

/// ID correlating a request with its response.
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, PartialEq)]
pub struct RequestId(pub u32);

/// Failure reported in a response.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display(fmt = "{} (code: {:?})", reason, code)]
pub struct ResponseError {
    /// Numeric error code, if any.
    pub code: Option<i64>,

    /// Human-readable error reason.
    pub reason: String,
}

/// Frame of the SFU control channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Request awaiting a response.
    Request {
        id: RequestId,
        method: String,
        data: Value,
    },

    /// Response to a request.
    Response {
        id: RequestId,
        result: Result<Value, ResponseError>,
    },

    /// Fire-and-forget message.
    Message { method: String, data: Value },
}

impl Frame {
    /// Parses [`Frame`] from the provided text.
    ///
    /// Returns `None` for anything not being a well-formed [`Frame`].
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let obj = value.as_object()?;

        if flag(obj, "request") {
            Some(Self::Request {
                id: id(obj)?,
                method: method(obj)?,
                data: data(obj),
            })
        } else if flag(obj, "response") {
            let id = id(obj)?;
            let ok = obj.get("ok").and_then(Value::as_bool)?;
            let result = if ok {
                Ok(data(obj))
            } else {
                Err(ResponseError {
                    code: obj.get("errorCode").and_then(Value::as_i64),
                    reason: obj
                        .get("errorReason")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                })
            };
            Some(Self::Response { id, result })
        } else if flag(obj, "message") {
            Some(Self::Message {
                method: method(obj)?,
                data: data(obj),
            })
        } else {
            None
        }
    }

    /// Serializes this [`Frame`] into its wire text.
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Request { id, method, data } => json!({
                "request": true,
                "id": id.0,
                "method": method,
                "data": data,
            }),
            Self::Response {
                id,
                result: Ok(data),
            } => json!({
                "response": true,
                "id": id.0,
                "ok": true,
                "data": data,
            }),
            Self::Response {
                id,
                result: Err(err),
            } => json!({
                "response": true,
                "id": id.0,
                "ok": false,
                "errorCode": err.code,
                "errorReason": err.reason,
            }),
            Self::Message { method, data } => json!({
                "message": true,
                "method": method,
                "data": data,
            }),
        };
        value.to_string()
    }
}

/// Checks that the provided boolean field is `true`.
fn flag(obj: &Map<String, Value>, name: &str) -> bool {
    obj.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn id(obj: &Map<String, Value>) -> Option<RequestId> {
    obj.get("id")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .map(RequestId)
}

fn method(obj: &Map<String, Value>) -> Option<String> {
    obj.get("method").and_then(Value::as_str).map(ToOwned::to_owned)
}

/// Missing `data` is an empty object.
fn data(obj: &Map<String, Value>) -> Value {
    obj.get("data").cloned().unwrap_or_else(|| json!({}))
}
