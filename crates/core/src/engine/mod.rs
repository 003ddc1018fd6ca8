//! Seam between the session and the streaming/signaling engine
//!
//! The engine owns its threads. Once `start_video` / `init_signaling`
//! return, it may call the supplied dispatcher from any of them, at any
//! rate, until the matching `stop_video` / `deinit_signaling` returns.

mod loopback;

pub use loopback::LoopbackEngine;

use serde_json::Value;
use thiserror::Error;

use crate::dispatch::{FrameDispatcher, MessageDispatcher};

/// Failure of an engine call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The call could not be completed
    #[error("Engine call {call} failed: {reason}")]
    CallFailed {
        /// Engine operation name
        call: &'static str,
        /// What went wrong
        reason: String,
    },

    /// An argument cannot be passed to the engine as-is
    #[error("Invalid argument for {call}: {reason}")]
    InvalidArgument {
        /// Engine operation name
        call: &'static str,
        /// What is wrong with the argument
        reason: String,
    },

    /// The engine reported a non-zero status
    #[error("Engine call {call} returned status {status}")]
    Status {
        /// Engine operation name
        call: &'static str,
        /// Raw status code
        status: i32,
    },

    /// Another native engine already owns the process-wide callback slots
    #[error("A native engine is already active in this process")]
    AlreadyClaimed,
}

impl EngineError {
    pub fn call_failed(call: &'static str, reason: impl Into<String>) -> Self {
        EngineError::CallFailed {
            call,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(call: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidArgument {
            call,
            reason: reason.into(),
        }
    }
}

/// Operations the session drives on the engine
///
/// Implementations must tolerate `stop_video` being called when video is
/// not running, and may block inside it for an unbounded time.
pub trait Engine: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Connect signaling for `phone_id`; incoming messages go to `messages`
    fn init_signaling(&self, phone_id: &str, messages: MessageDispatcher) -> Result<(), EngineError>;

    /// Select the remote device; must precede `start_video`
    fn set_device(&self, device_id: &str) -> Result<(), EngineError>;

    /// Begin streaming video frames into `frames`
    fn start_video(&self, frames: FrameDispatcher) -> Result<(), EngineError>;

    /// Stop video streaming
    fn stop_video(&self) -> Result<(), EngineError>;

    /// Publish a JSON message on `topic`; returns the engine status code
    fn send_json(&self, message: &Value, topic: &str) -> Result<i32, EngineError>;

    /// Tear down signaling
    fn deinit_signaling(&self) -> Result<(), EngineError>;
}
