//! [`Engine`] over the C function table
//!
//! The C callback type carries no user pointer, so the dispatchers the
//! trampolines forward to live in process-wide slots. Only one
//! `NativeEngine` may exist at a time; a second claim fails with
//! [`EngineError::AlreadyClaimed`].

use std::ffi::{c_char, c_int, c_void, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use p2pbridge_core::{Engine, EngineError, FrameDispatcher, MessageDispatcher};
use serde_json::Value;

use crate::vtable::EngineVTable;

static CLAIMED: AtomicBool = AtomicBool::new(false);
static FRAME_SLOT: RwLock<Option<FrameDispatcher>> = parking_lot::const_rwlock(None);
// Bumped under the FRAME_SLOT write lock by every start
static FRAME_GENERATION: AtomicU64 = AtomicU64::new(0);
static MESSAGE_SLOT: RwLock<Option<MessageDispatcher>> = parking_lot::const_rwlock(None);

unsafe extern "C" fn frame_trampoline(data: *mut c_void, len: c_int) {
    let delivered = catch_unwind(AssertUnwindSafe(|| {
        // Clone out; the slot lock must not be held while the receiver runs
        let sink = FRAME_SLOT.read().clone();
        match sink {
            // SAFETY: the engine guarantees `data` holds `len` bytes for this call
            Some(frames) => unsafe { frames.on_raw_frame(data as *const u8, len) },
            None => tracing::trace!(len, "frame arrived with no video session"),
        }
    }));
    if delivered.is_err() {
        tracing::error!("panic while dispatching engine frame");
    }
}

unsafe extern "C" fn message_trampoline(data: *mut c_void, len: c_int) {
    let delivered = catch_unwind(AssertUnwindSafe(|| {
        let sink = MESSAGE_SLOT.read().clone();
        match sink {
            // SAFETY: the engine guarantees `data` holds `len` bytes for this call
            Some(messages) => unsafe { messages.on_raw_message(data as *const u8, len) },
            None => tracing::trace!(len, "message arrived with signaling down"),
        }
    }));
    if delivered.is_err() {
        tracing::error!("panic while dispatching engine message");
    }
}

fn c_string(call: &'static str, value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::invalid_argument(call, "interior NUL byte"))
}

/// The process's C engine
#[derive(Debug)]
pub struct NativeEngine {
    vtable: EngineVTable,
}

impl NativeEngine {
    /// Take ownership of the process-wide callback slots
    pub fn claim(vtable: EngineVTable) -> Result<Self, EngineError> {
        if CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyClaimed);
        }
        tracing::debug!("native engine claimed");
        Ok(Self { vtable })
    }

    /// Claim the engine linked into this binary
    #[cfg(feature = "link-engine")]
    pub fn linked() -> Result<Self, EngineError> {
        Self::claim(EngineVTable::linked())
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        FRAME_SLOT.write().take();
        MESSAGE_SLOT.write().take();
        CLAIMED.store(false, Ordering::SeqCst);
        tracing::debug!("native engine released");
    }
}

impl Engine for NativeEngine {
    fn name(&self) -> &str {
        "native"
    }

    fn init_signaling(&self, phone_id: &str, messages: MessageDispatcher) -> Result<(), EngineError> {
        let phone_id = c_string("InitMqtt", phone_id)?;
        *MESSAGE_SLOT.write() = Some(messages);
        // SAFETY: the string outlives the call and the trampoline matches pFunRecvCB
        unsafe { (self.vtable.init_mqtt)(phone_id.as_ptr() as *mut c_char, message_trampoline) };
        Ok(())
    }

    fn set_device(&self, device_id: &str) -> Result<(), EngineError> {
        let device_id = c_string("SetDevP2p", device_id)?;
        // SAFETY: the string outlives the call
        unsafe { (self.vtable.set_dev_p2p)(device_id.as_ptr() as *mut c_char) };
        Ok(())
    }

    fn start_video(&self, frames: FrameDispatcher) -> Result<(), EngineError> {
        {
            let mut slot = FRAME_SLOT.write();
            FRAME_GENERATION.fetch_add(1, Ordering::SeqCst);
            *slot = Some(frames);
        }
        // SAFETY: the trampoline matches pFunRecvCB and never unwinds
        unsafe { (self.vtable.start_p2p_video)(frame_trampoline) };
        Ok(())
    }

    fn stop_video(&self) -> Result<(), EngineError> {
        let generation = FRAME_GENERATION.load(Ordering::SeqCst);
        // SAFETY: no arguments; the engine tolerates stop without start
        unsafe { (self.vtable.stop_p2p_video)() };
        // Frames may arrive until the stop call returns. A start issued
        // while a slow stop was running keeps its dispatcher.
        let mut slot = FRAME_SLOT.write();
        if FRAME_GENERATION.load(Ordering::SeqCst) == generation {
            slot.take();
        } else {
            tracing::debug!("video restarted during stop, keeping frame dispatcher");
        }
        Ok(())
    }

    fn send_json(&self, message: &Value, topic: &str) -> Result<i32, EngineError> {
        let body = serde_json::to_string(message)
            .map_err(|e| EngineError::invalid_argument("SendJsonMsg", e.to_string()))?;
        let body = c_string("SendJsonMsg", &body)?;
        let topic = c_string("SendJsonMsg", topic)?;
        // SAFETY: both strings outlive the call
        let status = unsafe {
            (self.vtable.send_json_msg)(body.as_ptr() as *mut c_void, topic.as_ptr() as *mut c_char)
        };
        Ok(status)
    }

    fn deinit_signaling(&self) -> Result<(), EngineError> {
        // SAFETY: no arguments
        unsafe { (self.vtable.deinit_mqtt)() };
        MESSAGE_SLOT.write().take();
        Ok(())
    }
}
