//! Engine-thread entry points
//!
//! Both dispatchers are cheap to clone and safe to call from any number of
//! threads at once. They never buffer, so per-thread order is preserved,
//! and they never unwind into the caller.

mod frame;
mod message;

pub use frame::FrameDispatcher;
pub use message::MessageDispatcher;

use std::sync::Arc;

use crate::attach::CallbackAttachment;
use crate::config::BridgeConfig;
use crate::counters::FrameCounters;
use crate::lifecycle::LifecycleGuard;
use crate::reporter::ErrorReporter;
use crate::router::ModeRouter;

/// State shared by the controller and every dispatch path
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) session_id: String,
    pub(crate) guard: Arc<LifecycleGuard>,
    pub(crate) attachment: CallbackAttachment,
    pub(crate) router: ModeRouter,
    pub(crate) counters: FrameCounters,
    pub(crate) reporter: ErrorReporter,
    pub(crate) config: BridgeConfig,
}

impl Shared {
    pub(crate) fn new(session_id: String, attachment: CallbackAttachment, config: BridgeConfig) -> Self {
        let guard = Arc::new(LifecycleGuard::new());
        let reporter = ErrorReporter::new(guard.clone(), attachment.clone());
        Self {
            session_id,
            guard,
            attachment,
            router: ModeRouter::new(config.initial_mode),
            counters: FrameCounters::new(),
            reporter,
            config,
        }
    }
}

/// Turn a raw engine buffer into an optional slice
///
/// # Safety
///
/// When `data` is non-null and `len > 0`, `data` must point to `len`
/// readable bytes that stay valid for the returned lifetime.
pub(crate) unsafe fn raw_slice<'a>(data: *const u8, len: i32) -> Option<&'a [u8]> {
    if data.is_null() || len <= 0 {
        return None;
    }
    // SAFETY: checked non-null and positive length; validity is the caller's contract
    Some(unsafe { std::slice::from_raw_parts(data, len as usize) })
}
