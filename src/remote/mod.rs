//! Remote generation: staging, submission, push events, and output
//! collection for a ComfyUI-compatible backend.

pub mod api;
pub mod listener;
pub mod messages;
pub mod orchestrator;
pub mod staging;
pub mod task;
pub mod workflow;

pub use api::ComfyClient;
pub use listener::{PushListener, ReconnectPolicy};
pub use messages::PushMessage;
pub use orchestrator::{RemoteConfig, RemoteOrchestrator};
pub use task::{RemoteTask, TaskSet, TaskStatus};
pub use workflow::{NodeKind, WorkflowTemplate};
