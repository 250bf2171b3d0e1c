//! Envelope message types
//!
//! Every message carries a uuid `id`. A response echoes the id of the
//! request it answers; nothing else correlates the two.

use crate::error::{CourierError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Unique message identifier
pub type MessageId = Uuid;

/// Request parameters, keyed by parameter name
pub type Parameters = Map<String, Value>;

/// A call to a named remote operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: MessageId,
    pub method: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl Request {
    /// Create a request with a fresh id and no parameters
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            parameters: Parameters::new(),
        }
    }

    /// Create a request with a fresh id and the given parameters
    pub fn with_parameters(method: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            parameters,
        }
    }

    /// Add a parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Add a parameter from any serializable value
    pub fn param_ser<T: Serialize>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.parameters
            .insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }
}

/// Answer to a request
///
/// `error == true` with an object means the handler failed and the object
/// is an [`ErrorPayload`]. `error == true` with a null object is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: MessageId,
    pub object: Option<Value>,
    #[serde(default)]
    pub error: bool,
}

impl Response {
    /// Successful response carrying the handler's return value
    pub fn success(id: MessageId, object: Option<Value>) -> Self {
        Self {
            id,
            object,
            error: false,
        }
    }

    /// Response for a request no receptor matched
    pub fn noop(id: MessageId) -> Self {
        Self::success(id, None)
    }

    /// Error response with a cause the caller will see
    pub fn failure(id: MessageId, cause: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            cause: cause.into(),
        };
        Self {
            id,
            // ErrorPayload is a single string field, serialization cannot fail
            object: serde_json::to_value(payload).ok(),
            error: true,
        }
    }

    /// Interpret the response as the result of the request it answers
    pub fn into_outcome(self) -> Result<Option<Value>> {
        match (self.error, self.object) {
            (true, Some(object)) => {
                let payload: ErrorPayload = serde_json::from_value(object)
                    .map_err(|e| CourierError::MalformedMessage(format!("Bad error payload: {}", e)))?;
                Err(CourierError::RemoteError {
                    cause: payload.cause,
                })
            }
            (_, None) | (false, Some(Value::Null)) => Ok(None),
            (false, Some(object)) => Ok(Some(object)),
        }
    }
}

/// Error payload carried in [`Response::object`] when `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub cause: String,
}

/// Either side of the envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Id of the wrapped message
    pub fn id(&self) -> MessageId {
        match self {
            Message::Request(request) => request.id,
            Message::Response(response) => response.id,
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}
