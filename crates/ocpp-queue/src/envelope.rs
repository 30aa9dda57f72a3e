//! OCPP-J wire envelopes.
//!
//! Every frame on the wire is a positional JSON array:
//!
//! ```text
//! CALL        [2, "<UniqueId>", "<Action>", {<Payload>}]
//! CALLRESULT  [3, "<UniqueId>", {<Payload>}]
//! CALLERROR   [4, "<UniqueId>", "<ErrorCode>", "<ErrorDescription>", {<ErrorDetails>}]
//! ```

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

use ocpp_core::error::{AppError, ErrorKind};
use ocpp_core::types::MessageId;

const MESSAGE_TYPE_ID: usize = 0;
const MESSAGE_ID: usize = 1;
const CALL_ACTION: usize = 2;
const CALL_PAYLOAD: usize = 3;
const CALLRESULT_PAYLOAD: usize = 2;
const CALLERROR_CODE: usize = 2;
const CALLERROR_DESCRIPTION: usize = 3;
const CALLERROR_DETAILS: usize = 4;

/// The message type id found at index 0 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageTypeId {
    /// Request.
    Call,
    /// Successful reply.
    CallResult,
    /// Error reply.
    CallError,
    /// Not (yet) decoded.
    #[default]
    Unknown,
}

impl MessageTypeId {
    /// Numeric code used on the wire.
    pub fn code(self) -> Option<u64> {
        match self {
            Self::Call => Some(2),
            Self::CallResult => Some(3),
            Self::CallError => Some(4),
            Self::Unknown => None,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u64) -> Self {
        match code {
            2 => Self::Call,
            3 => Self::CallResult,
            4 => Self::CallError,
            _ => Self::Unknown,
        }
    }
}

/// Reasons a frame cannot be decoded into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The text is not JSON at all.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame is valid JSON but not an array.
    #[error("frame is not a JSON array")]
    NotAnArray,
    /// The type id at index 0 is missing or not one of 2, 3, 4.
    #[error("unknown message type id: {0}")]
    UnknownTypeId(Value),
    /// A positional field is absent.
    #[error("missing field '{name}' at index {index}")]
    MissingField {
        /// Field name.
        name: &'static str,
        /// Array index.
        index: usize,
    },
    /// A positional field has the wrong JSON type.
    #[error("field '{name}' must be a {expected}")]
    InvalidField {
        /// Field name.
        name: &'static str,
        /// Expected JSON type.
        expected: &'static str,
    },
}

impl From<EnvelopeError> for AppError {
    fn from(err: EnvelopeError) -> Self {
        AppError::with_source(
            ErrorKind::Serialization,
            format!("Malformed OCPP frame: {err}"),
            err,
        )
    }
}

/// An outbound or inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Unique id correlating the reply.
    pub unique_id: MessageId,
    /// OCPP action name, e.g. `"StartTransaction"`.
    pub action: String,
    /// Action-specific request body.
    pub payload: Value,
}

impl Call {
    /// Create a new call.
    pub fn new(unique_id: impl Into<MessageId>, action: impl Into<String>, payload: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    /// Unique id of the call being answered.
    pub unique_id: MessageId,
    /// Action-specific response body.
    pub payload: Value,
}

impl CallResult {
    /// Create a new result.
    pub fn new(unique_id: impl Into<MessageId>, payload: Value) -> Self {
        Self {
            unique_id: unique_id.into(),
            payload,
        }
    }
}

/// An error reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    /// Unique id of the call being answered.
    pub unique_id: MessageId,
    /// OCPP error code, e.g. `"NotImplemented"`.
    pub error_code: String,
    /// Free-form description.
    pub error_description: String,
    /// Additional details object.
    pub error_details: Value,
}

impl CallError {
    /// Create a new error with empty details.
    pub fn new(
        unique_id: impl Into<MessageId>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: json!({}),
        }
    }
}

/// A decoded OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `[2, id, action, payload]`
    Call(Call),
    /// `[3, id, payload]`
    CallResult(CallResult),
    /// `[4, id, code, description, details]`
    CallError(CallError),
}

impl Envelope {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Decode an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Array(mut fields) = value else {
            return Err(EnvelopeError::NotAnArray);
        };

        let type_id = fields
            .get(MESSAGE_TYPE_ID)
            .cloned()
            .ok_or(EnvelopeError::MissingField {
                name: "MessageTypeId",
                index: MESSAGE_TYPE_ID,
            })?;
        let message_type = type_id
            .as_u64()
            .map(MessageTypeId::from_code)
            .unwrap_or_default();
        if message_type == MessageTypeId::Unknown {
            return Err(EnvelopeError::UnknownTypeId(type_id));
        }

        let unique_id = MessageId::new(string_field(&fields, MESSAGE_ID, "UniqueId")?);

        match message_type {
            MessageTypeId::Call => {
                let action = string_field(&fields, CALL_ACTION, "Action")?;
                let payload = take_field(&mut fields, CALL_PAYLOAD, "Payload")?;
                Ok(Self::Call(Call {
                    unique_id,
                    action,
                    payload,
                }))
            }
            MessageTypeId::CallResult => {
                let payload = take_field(&mut fields, CALLRESULT_PAYLOAD, "Payload")?;
                Ok(Self::CallResult(CallResult { unique_id, payload }))
            }
            MessageTypeId::CallError => {
                let error_code = string_field(&fields, CALLERROR_CODE, "ErrorCode")?;
                let error_description =
                    string_field(&fields, CALLERROR_DESCRIPTION, "ErrorDescription")?;
                // Some central systems omit the details object
                let error_details = fields
                    .get_mut(CALLERROR_DETAILS)
                    .map(Value::take)
                    .unwrap_or_else(|| json!({}));
                Ok(Self::CallError(CallError {
                    unique_id,
                    error_code,
                    error_description,
                    error_details,
                }))
            }
            MessageTypeId::Unknown => Err(EnvelopeError::UnknownTypeId(type_id)),
        }
    }

    /// Encode as the positional JSON array.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Call(call) => json!([2, call.unique_id, call.action, call.payload]),
            Self::CallResult(result) => json!([3, result.unique_id, result.payload]),
            Self::CallError(error) => json!([
                4,
                error.unique_id,
                error.error_code,
                error.error_description,
                error.error_details
            ]),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Unique id at index 1.
    pub fn unique_id(&self) -> &MessageId {
        match self {
            Self::Call(call) => &call.unique_id,
            Self::CallResult(result) => &result.unique_id,
            Self::CallError(error) => &error.unique_id,
        }
    }

    /// Message type id at index 0.
    pub fn message_type_id(&self) -> MessageTypeId {
        match self {
            Self::Call(_) => MessageTypeId::Call,
            Self::CallResult(_) => MessageTypeId::CallResult,
            Self::CallError(_) => MessageTypeId::CallError,
        }
    }
}

fn string_field(fields: &[Value], index: usize, name: &'static str) -> Result<String, EnvelopeError> {
    fields
        .get(index)
        .ok_or(EnvelopeError::MissingField { name, index })?
        .as_str()
        .map(str::to_string)
        .ok_or(EnvelopeError::InvalidField {
            name,
            expected: "string",
        })
}

fn take_field(fields: &mut [Value], index: usize, name: &'static str) -> Result<Value, EnvelopeError> {
    fields
        .get_mut(index)
        .map(Value::take)
        .ok_or(EnvelopeError::MissingField { name, index })
}

impl From<Call> for Envelope {
    fn from(call: Call) -> Self {
        Self::Call(call)
    }
}

impl From<CallResult> for Envelope {
    fn from(result: CallResult) -> Self {
        Self::CallResult(result)
    }
}

impl From<CallError> for Envelope {
    fn from(error: CallError) -> Self {
        Self::CallError(error)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl Serialize for Call {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        json!([2, self.unique_id, self.action, self.payload]).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Call {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Envelope::deserialize(deserializer)? {
            Envelope::Call(call) => Ok(call),
            other => Err(D::Error::custom(format!(
                "expected CALL, found {:?}",
                other.message_type_id()
            ))),
        }
    }
}
