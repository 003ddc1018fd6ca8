//! P2P Bridge FFI - engine and managed-runtime adapters
//!
//! - `NativeEngine` drives the C engine through an [`EngineVTable`]
//! - `python` feature: [`PythonRuntime`] and [`PyReceiver`] (PyO3)
//! - `jni` feature: [`JniRuntime`] and [`JniReceiver`] (jni crate)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use p2pbridge_core::{BridgeConfig, SessionController};
//! use p2pbridge_ffi::{JniRuntime, JniReceiver, NativeEngine};
//!
//! let runtime = JniRuntime::from_env(&env)?;
//! let receiver = JniReceiver::new(&runtime, &mut env, &view, "surface-view")?;
//! let session = SessionController::new(
//!     Arc::new(NativeEngine::linked()?),
//!     Arc::new(runtime),
//!     BridgeConfig::default(),
//! )?;
//! session.bind(&receiver)?;
//! session.set_device("cam-01")?;
//! session.start()?;
//! ```

#![warn(clippy::all)]

pub mod native_engine;
pub mod vtable;

#[cfg(feature = "python")]
pub mod python;

#[cfg(feature = "jni")]
pub mod jvm;

pub use native_engine::NativeEngine;
pub use vtable::{EngineVTable, RecvCallback};

#[cfg(feature = "python")]
pub use python::{PyReceiver, PythonRuntime};

#[cfg(feature = "jni")]
pub use jvm::{JniReceiver, JniRuntime};
