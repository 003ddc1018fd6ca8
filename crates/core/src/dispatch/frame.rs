use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{raw_slice, Shared};
use crate::error::Error;
use crate::nal;
use crate::router::DeliveryTarget;

/// Hot path for video frames coming off engine threads
#[derive(Debug, Clone)]
pub struct FrameDispatcher {
    shared: Arc<Shared>,
}

impl FrameDispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Deliver one frame; `None` models a null engine buffer
    ///
    /// Checks, in order: disposal gate, buffer validity, routing. The
    /// bytes are copied before the receiver sees them, since the engine
    /// reclaims its buffer as soon as this returns.
    pub fn on_frame(&self, buffer: Option<&[u8]>) {
        let shared = &*self.shared;
        if !shared.guard.try_enter() {
            return;
        }

        let Some(buffer) = buffer.filter(|b| !b.is_empty()) else {
            shared.counters.record_error(true);
            tracing::warn!(session_id = %shared.session_id, "invalid frame: null or empty buffer");
            shared
                .reporter
                .report_error(&Error::InvalidInput("null or empty frame buffer".into()));
            return;
        };

        let binding = shared.guard.binding();
        let target = shared.router.route(binding.as_deref());
        let (binding, target) = match (binding, target) {
            (Some(binding), target @ (DeliveryTarget::RawBuffer | DeliveryTarget::Texture(_))) => {
                (binding, target)
            }
            (_, DeliveryTarget::Suppressed(reason)) => {
                shared.counters.record_error(true);
                tracing::warn!(
                    session_id = %shared.session_id,
                    len = buffer.len(),
                    mode = %shared.router.mode(),
                    %reason,
                    "frame suppressed"
                );
                shared
                    .reporter
                    .report_error(&Error::RoutingSuppressed(format!("frame dropped: {}", reason)));
                return;
            }
            (None, _) => return,
        };

        let payload = if shared.config.normalize_start_codes {
            nal::normalized_copy(buffer)
        } else {
            buffer.to_vec()
        };
        let len = payload.len();
        if nal::is_parameter_set(&payload) {
            tracing::debug!(
                session_id = %shared.session_id,
                nal_type = nal::nal_unit_type(&payload),
                len,
                "parameter set received"
            );
        }

        let delivered = shared.attachment.with_managed_context(|| {
            // Disposal may have landed while we were attaching
            if !shared.guard.try_enter() {
                return Ok(Ok(false));
            }
            catch_unwind(AssertUnwindSafe(|| match target {
                DeliveryTarget::Texture(texture) => binding
                    .deliver_texture_frame(texture, payload)
                    .map(|()| true),
                _ => binding.deliver_video_frame(payload).map(|()| true),
            }))
        });

        match delivered {
            Ok(Ok(Ok(true))) => {
                let total = shared.counters.record_frame(len);
                tracing::trace!(session_id = %shared.session_id, len, ?target, "frame delivered");
                if total % shared.config.frame_log_interval == 0 {
                    tracing::debug!(
                        session_id = %shared.session_id,
                        frames = total,
                        receiver = binding.receiver_id(),
                        "frames delivered"
                    );
                }
            }
            Ok(Ok(Ok(false))) => {}
            Ok(Ok(Err(e))) => {
                shared.counters.record_error(false);
                tracing::error!(session_id = %shared.session_id, error = %e, "receiver frame method failed");
                shared
                    .reporter
                    .report_error(&Error::ManagedCall(format!("frame delivery failed: {}", e)));
            }
            Ok(Err(_)) => {
                shared.counters.record_error(false);
                tracing::error!(session_id = %shared.session_id, "receiver frame method panicked");
                shared
                    .reporter
                    .report_error(&Error::ManagedCall("frame delivery panicked".into()));
            }
            Err(e) => {
                shared.counters.record_error(true);
                tracing::warn!(session_id = %shared.session_id, error = %e, "frame dropped");
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
    pub unsafe fn on_raw_frame(&self, data: *const u8, len: i32) {
        // SAFETY: forwarded from the caller's contract
        self.on_frame(unsafe { raw_slice(data, len) });
    }
}
