use serde::{Deserialize, Serialize};
use serde_json::Value;

/// gRPC `UNKNOWN`, used for error frames that carry no usable code.
const GRPC_UNKNOWN: i32 = 2;

/// Server-reported fault carried in an error frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamErrorMsg {
    #[serde(default)]
    pub grpc_code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<String>,
}

impl StreamErrorMsg {
    /// Decodes an `error` payload. Payloads that are not a well-formed error
    /// object become `UNKNOWN` with the payload text as the message.
    fn from_value(value: Value) -> Self {
        match serde_json::from_value::<Self>(value.clone()) {
            Ok(msg) => msg,
            Err(_) => Self {
                grpc_code: GRPC_UNKNOWN,
                message: match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                },
                http_code: None,
                http_status: None,
            },
        }
    }
}

/// Demultiplexed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `{"error": {...}}`
    Error(StreamErrorMsg),
    /// `{"result": ...}`
    Data(Value),
    /// Neither tag present.
    Unknown,
}

impl InboundFrame {
    /// Parses and classifies one text frame.
    ///
    /// `error` is checked before `result`. A `result` of JSON `null` is still
    /// a data frame. Non-object payloads classify as [`InboundFrame::Unknown`].
    /// Only text that is not JSON at all is an error.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut fields) = value else {
            return Self::Unknown;
        };

        if let Some(error) = fields.remove("error") {
            return Self::Error(StreamErrorMsg::from_value(error));
        }
        if let Some(result) = fields.remove("result") {
            return Self::Data(result);
        }
        Self::Unknown
    }
}
