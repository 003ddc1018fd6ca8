//! Disposal gate, receiver binding slot and session state
//!
//! `mark_disposed` is a one-way SeqCst store. Any `try_enter` that runs
//! after it returns sees the flag, so nothing new is delivered once
//! disposal has been observed. Callbacks that passed the gate earlier may
//! still finish.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::receiver::{ManagedReceiver, ReceiverBinding};
use crate::{Error, Result};

/// Session lifecycle; `Disposed` is absorbing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    Unbound = 0,
    Bound = 1,
    Starting = 2,
    Running = 3,
    Stopping = 4,
    Disposed = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Unbound,
            1 => SessionState::Bound,
            2 => SessionState::Starting,
            3 => SessionState::Running,
            4 => SessionState::Stopping,
            _ => SessionState::Disposed,
        }
    }

    /// Video is starting, running or being stopped
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::Stopping
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Unbound => "unbound",
            SessionState::Bound => "bound",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Atomically updated [`SessionState`]
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: SessionState) -> Self {
        StateCell(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move `from -> to`; false if the current state is not `from`.
    /// Never leaves `Disposed`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        if from == SessionState::Disposed {
            return false;
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Enter `Disposed`; returns the state that was left
    pub fn dispose(&self) -> SessionState {
        SessionState::from_u8(self.0.swap(SessionState::Disposed as u8, Ordering::SeqCst))
    }
}

/// Disposal flag plus the receiver binding
#[derive(Debug, Default)]
pub struct LifecycleGuard {
    disposed: AtomicBool,
    binding: RwLock<Option<Arc<ReceiverBinding>>>,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// False once disposal has begun
    pub fn try_enter(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Set the disposal flag; true only for the call that set it
    pub fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    /// Resolve `receiver` and install it, replacing any prior binding
    ///
    /// Returns the replaced binding. On error nothing changes.
    pub fn bind(&self, receiver: &dyn ManagedReceiver) -> Result<Option<Arc<ReceiverBinding>>> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        // Resolution may call into the managed side; keep it outside the lock
        let binding = Arc::new(ReceiverBinding::resolve(receiver)?);

        let mut slot = self.binding.write();
        // Re-checked under the lock so a concurrent dispose cannot be undone
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let previous = slot.take();
        *slot = Some(binding);
        Ok(previous)
    }

    /// Clear the binding without disposing
    pub fn unbind(&self) -> Option<Arc<ReceiverBinding>> {
        self.binding.write().take()
    }

    /// Snapshot of the current binding; `None` once disposed
    ///
    /// The lock is released before returning, so callers may invoke the
    /// binding without holding anything.
    pub fn binding(&self) -> Option<Arc<ReceiverBinding>> {
        if !self.try_enter() {
            return None;
        }
        self.binding.read().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.read().is_some()
    }
}
