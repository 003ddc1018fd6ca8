//! P2P Bridge Core - native engine to managed receiver callback bridge
//!
//! A streaming engine produces video frames and signaling messages on its
//! own threads. This crate delivers them to a receiver living in a managed
//! runtime (JVM, CPython, or plain Rust) without ever calling the receiver
//! after the session is disposed.
//!
//! # Architecture
//!
//! - `LifecycleGuard` gates every delivery on the disposal flag and holds
//!   the receiver binding
//! - `CallbackAttachment` scopes managed-runtime attachment around each call
//! - `ModeRouter` picks raw-buffer or texture delivery per frame
//! - `FrameDispatcher` / `MessageDispatcher` are the engine-facing entry points
//! - `StopSequencer` stops video off-thread with a deadline
//! - `ErrorReporter` forwards failures to the receiver's error method
//! - `SessionController` owns all of the above for one engine
//!
//! Runtime and engine adapters (JNI, Python, the C function table) live in
//! the `p2pbridge-ffi` crate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use p2pbridge_core::{
//!     BridgeConfig, CallbackReceiver, InProcessRuntime, LoopbackEngine, SessionController,
//! };
//!
//! let engine = Arc::new(LoopbackEngine::new());
//! let session = SessionController::new(
//!     engine.clone(),
//!     Arc::new(InProcessRuntime::new()),
//!     BridgeConfig::default(),
//! )?;
//!
//! session.bind(&CallbackReceiver::noop("viewer"))?;
//! session.start()?;
//! engine.push_frame(&[0x65, 0x88, 0x84]);
//! assert_eq!(session.stats().frames_delivered, 1);
//!
//! session.dispose();
//! # Ok::<(), p2pbridge_core::Error>(())
//! ```

#![warn(clippy::all)]

pub mod attach;
pub mod config;
pub mod counters;
pub mod dispatch;
pub mod engine;
pub mod lifecycle;
pub mod logging;
pub mod nal;
pub mod receiver;
pub mod reporter;
pub mod router;
pub mod session;
pub mod stop;

mod error;
pub use error::{Error, ErrorCode, Result};

/// Alias used by adapter crates
pub use error::Error as BridgeError;

pub use attach::{AttachError, CallbackAttachment, InProcessRuntime, ManagedRuntime};
pub use config::BridgeConfig;
pub use counters::CounterSnapshot;
pub use dispatch::{FrameDispatcher, MessageDispatcher};
pub use engine::{Engine, EngineError, LoopbackEngine};
pub use lifecycle::{LifecycleGuard, SessionState};
pub use logging::{init_tracing, LogFormat};
pub use receiver::{
    CallbackReceiver, DeliveryError, DeliveryMethod, DeliveryResult, ManagedReceiver,
    ReceiverBinding, ResolvedMethods,
};
pub use reporter::ErrorReporter;
pub use router::{DeliveryMode, DeliveryTarget, ModeRouter, TextureHandle};
pub use session::SessionController;
pub use stop::{StopOutcome, StopRequest, StopSequencer};
