//! REST fallback bodies (`POST /translate`, `GET /translate/{id}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body returned by the submit endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Opaque job id assigned by the service. Missing or empty is a failed submit.
    #[serde(default)]
    pub id: Option<String>,
}

/// Body returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
}

/// Interpreted poll state.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Not finished yet (`queued`, `pending`, `running`, or anything unknown).
    Pending,
    /// Finished; carries the result document.
    Done(Value),
    /// Failed; carries the service's message.
    Failed(String),
}

impl From<PollResponse> for PollStatus {
    fn from(resp: PollResponse) -> Self {
        match resp.status.as_str() {
            "done" => PollStatus::Done(resp.result.unwrap_or(Value::Null)),
            "error" => {
                let message = match resp.result {
                    Some(Value::String(s)) if !s.is_empty() => s,
                    Some(Value::Null) | None => "Unknown error".to_string(),
                    Some(other) => other.to_string(),
                };
                PollStatus::Failed(message)
            }
            _ => PollStatus::Pending,
        }
    }
}
