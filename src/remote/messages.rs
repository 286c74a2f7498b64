//! Typed push messages from the generation server.
//!
//! The server pushes JSON frames shaped `{"type": "<kind>", "data": {...}}`
//! over the WebSocket channel. Only the kinds the orchestrator acts on are
//! modeled; anything else parses as an error and is logged and dropped by
//! the listener.

use serde::Deserialize;

/// Push messages the listener reacts to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushMessage {
    /// Step-level progress inside a long-running node (the sampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node started executing; `node: null` means the job finished.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// The whole job completed successfully.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(JobRef),

    /// The job failed server-side.
    #[serde(rename = "execution_error")]
    ExecutionError(ExecutionErrorData),
}

/// Payload for `progress` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step
    pub value: u32,
    /// Total steps
    pub max: u32,
    /// Owning job; absent on some server versions, in which case the frame
    /// cannot be attributed and is ignored
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `executing` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    /// Executing node id, or `None` once the job is done
    pub node: Option<String>,
    /// Owning job
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// A frame that only references a job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRef {
    /// Owning job
    pub prompt_id: String,
}

/// Payload for `execution_error` frames.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionErrorData {
    /// Owning job
    pub prompt_id: String,
    /// Server-side exception text
    #[serde(default)]
    pub exception_message: String,
}

/// Parse one WebSocket text frame.
///
/// # Errors
/// Malformed JSON or an unmodeled `type` value. The listener logs these at
/// debug level and moves on.
pub fn parse_push_message(text: &str) -> Result<PushMessage, serde_json::Error> {
    serde_json::from_str(text)
}
