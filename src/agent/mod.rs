//! The on-page agent and the control messages it answers

pub mod messages;
pub mod runtime;

pub use messages::{AgentEvent, ControlMessage, ControlResponse};
pub use runtime::{AgentHandle, PageAgent, PageSignal, DEFAULT_FRAME_INTERVAL};
