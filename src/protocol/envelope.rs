//! Request envelope and response classification.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::common::{result_code, ClientError, SessionState};

/// Header attached to every operation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeader {
    pub app_type: String,
    pub login_id: String,
    pub mobile_id: String,
    pub os_type: String,
    pub pid: String,
    pub tid: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope<T> {
    pub header: RequestHeader,
    pub body: T,
}

impl<T: Serialize> RequestEnvelope<T> {
    /// Snapshot the session into a header with a fresh transaction id.
    pub fn new(session: &SessionState, pid: &str, body: T) -> Self {
        Self {
            header: RequestHeader {
                app_type: session.app_type.clone(),
                login_id: session.login_id.clone(),
                mobile_id: session.mobile_id.clone(),
                os_type: session.os_type.clone(),
                pid: pid.to_string(),
                tid: new_transaction_id(),
                token: session.auth_token.clone(),
            },
            body,
        }
    }

    pub fn tid(&self) -> &str {
        &self.header.tid
    }
}

/// Time-ordered, process-unique transaction id.
pub fn new_transaction_id() -> String {
    Uuid::now_v7().to_string()
}

/// Common shape of every JSON response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseBody {
    #[serde(deserialize_with = "lenient_string")]
    pub result_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub result_message: String,
    pub result: Value,
}

impl ResponseBody {
    pub fn is_success(&self) -> bool {
        self.result_code == result_code::SUCCESS
    }
}

/// Classification of one exchange. Never partially successful.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Success(Value),
    ApplicationError { code: String, message: String },
    TransportError { status: u16, message: String },
}

impl ResponseOutcome {
    /// Classify an HTTP status plus raw body bytes.
    pub fn classify(status: u16, reason: &str, body: &[u8]) -> Self {
        if status != 200 {
            return ResponseOutcome::TransportError {
                status,
                message: reason.to_string(),
            };
        }

        match serde_json::from_slice::<ResponseBody>(body) {
            Ok(parsed) if parsed.is_success() => ResponseOutcome::Success(parsed.result),
            Ok(parsed) => ResponseOutcome::ApplicationError {
                code: parsed.result_code,
                message: parsed.result_message,
            },
            Err(e) => ResponseOutcome::TransportError {
                status,
                message: format!("malformed response body: {e}"),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseOutcome::Success(_))
    }

    /// Attach call context and convert into a `Result`.
    pub fn into_result(self, operation: &str, tid: Option<&str>) -> Result<Value, ClientError> {
        match self {
            ResponseOutcome::Success(value) => Ok(value),
            ResponseOutcome::ApplicationError { code, message } => Err(ClientError::Application {
                operation: operation.to_string(),
                tid: tid.map(str::to_string),
                code,
                message,
            }),
            ResponseOutcome::TransportError { status, message } => Err(ClientError::Transport {
                operation: operation.to_string(),
                tid: tid.map(str::to_string),
                status: Some(status),
                message,
            }),
        }
    }
}

/// Accepts strings, numbers, booleans or null where the server is inconsistent.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

/// Accepts a JSON array, or an object whose values form the list.
pub fn list_or_map_values<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected list or map, got {other}"
            )))
        }
    };

    items
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(serde::de::Error::custom))
        .collect()
}
