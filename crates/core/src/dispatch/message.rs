use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{raw_slice, Shared};
use crate::error::Error;

/// Signaling messages from the engine to the receiver's `onMessage`
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    shared: Arc<Shared>,
}

impl MessageDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Deliver one message; `None` models a null engine buffer
    pub fn on_message(&self, buffer: Option<&[u8]>) {
        let shared = &*self.shared;
        if !shared.guard.try_enter() {
            return;
        }

        let Some(buffer) = buffer.filter(|b| !b.is_empty()) else {
            shared.counters.record_error(false);
            tracing::warn!(session_id = %shared.session_id, "invalid message: null or empty buffer");
            shared
                .reporter
                .report_error(&Error::InvalidInput("null or empty message buffer".into()));
            return;
        };

        let Some(binding) = shared.guard.binding() else {
            shared.counters.record_error(false);
            tracing::debug!(session_id = %shared.session_id, len = buffer.len(), "message dropped: no receiver bound");
            return;
        };

        let payload = buffer.to_vec();
        let delivered = shared.attachment.with_managed_context(|| {
            if !shared.guard.try_enter() {
                return Ok(Ok(false));
            }
            catch_unwind(AssertUnwindSafe(|| {
                binding.deliver_message(payload).map(|()| true)
            }))
        });

        match delivered {
            Ok(Ok(Ok(true))) => {
                shared.counters.record_message();
                tracing::trace!(session_id = %shared.session_id, len = buffer.len(), "message delivered");
            }
            Ok(Ok(Ok(false))) => {}
            Ok(Ok(Err(e))) => {
                shared.counters.record_error(false);
                tracing::error!(session_id = %shared.session_id, error = %e, "receiver message method failed");
                shared
                    .reporter
                    .report_error(&Error::ManagedCall(format!("message delivery failed: {}", e)));
            }
            Ok(Err(_)) => {
                shared.counters.record_error(false);
                tracing::error!(session_id = %shared.session_id, "receiver message method panicked");
                shared
                    .reporter
                    .report_error(&Error::ManagedCall("message delivery panicked".into()));
            }
            Err(e) => {
                shared.counters.record_error(false);
                tracing::warn!(session_id = %shared.session_id, error = %e, "message dropped");
                shared.reporter.report_error(&Error::Attach(e));
            }
        }
    }

    /// Entry point for raw engine callbacks
    ///
    /// # Safety
    ///
    /// When `data` is non-null and `len > 0`, `data` must point to `len`
    /// readable bytes for the duration of the call.
    pub unsafe fn on_raw_message(&self, data: *const u8, len: i32) {
        // SAFETY: forwarded from the caller's contract
        self.on_message(unsafe { raw_slice(data, len) });
    }
}
