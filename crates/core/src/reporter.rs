//! Funnels bridge failures into the receiver's `onError`

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::attach::CallbackAttachment;
use crate::error::{Error, ErrorCode};
use crate::lifecycle::LifecycleGuard;

/// Delivers error messages to the bound receiver
///
/// Never fails and never panics: when disposed or unbound the report is
/// only logged, and any failure while delivering is logged and dropped.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    guard: Arc<LifecycleGuard>,
    attachment: CallbackAttachment,
}

impl ErrorReporter {
    pub fn new(guard: Arc<LifecycleGuard>, attachment: CallbackAttachment) -> Self {
        Self { guard, attachment }
    }

    /// Report `error` as `CODE: description`
    pub fn report_error(&self, error: &Error) -> bool {
        self.report(error.code(), error.to_string())
    }

    /// Report `message` under `code`; true if the receiver accepted it
    pub fn report(&self, code: ErrorCode, message: impl AsRef<str>) -> bool {
        let message = message.as_ref();
        if !self.guard.try_enter() {
            tracing::trace!(%code, message, "error report after disposal dropped");
            return false;
        }
        let Some(binding) = self.guard.binding() else {
            tracing::debug!(%code, message, "no receiver bound, error not delivered");
            return false;
        };

        let text = format!("{}: {}", code, message);
        let delivered = self.attachment.with_managed_context(|| {
            if !self.guard.try_enter() {
                return Ok(Ok(()));
            }
            catch_unwind(AssertUnwindSafe(|| binding.deliver_error(text)))
        });

        match delivered {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                tracing::warn!(%code, error = %e, "receiver rejected error report");
                false
            }
            Ok(Err(_)) => {
                tracing::warn!(%code, "receiver panicked while handling error report");
                false
            }
            Err(e) => {
                tracing::warn!(%code, error = %e, "could not attach to deliver error report");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::InProcessRuntime;
    use crate::receiver::CallbackReceiver;
    use parking_lot::Mutex;

    fn reporter() -> (ErrorReporter, Arc<LifecycleGuard>) {
        let guard = Arc::new(LifecycleGuard::new());
        let attachment = CallbackAttachment::new(Arc::new(InProcessRuntime::new()));
        (ErrorReporter::new(guard.clone(), attachment), guard)
    }

    fn recording_receiver(log: Arc<Mutex<Vec<String>>>) -> CallbackReceiver {
        CallbackReceiver::builder("errors")
            .on_video_frame(|_| Ok(()))
            .on_texture_frame(|_, _, _| Ok(()))
            .on_error(move |message| {
                log.lock().push(message);
                Ok(())
            })
            .on_message(|_, _| Ok(()))
            .build()
    }

    #[test]
    fn test_report_prefixes_code() {
        let (reporter, guard) = reporter();
        let log = Arc::new(Mutex::new(Vec::new()));
        guard.bind(&recording_receiver(log.clone())).unwrap();

        assert!(reporter.report(ErrorCode::StopTimeout, "stop took 6000ms"));
        assert_eq!(log.lock().as_slice(), ["STOP_TIMEOUT: stop took 6000ms"]);
    }

    #[test]
    fn test_report_error_uses_variant_code() {
        let (reporter, guard) = reporter();
        let log = Arc::new(Mutex::new(Vec::new()));
        guard.bind(&recording_receiver(log.clone())).unwrap();

        assert!(reporter.report_error(&Error::StopTimeout { elapsed_ms: 5000 }));
        assert!(reporter.report_error(&Error::RoutingSuppressed("texture unset".into())));
        assert_eq!(
            log.lock().as_slice(),
            [
                "STOP_TIMEOUT: Stop timed out after 5000ms",
                "ROUTING_SUPPRESSED: Routing suppressed: texture unset",
            ]
        );
    }

    #[test]
    fn test_unbound_is_noop() {
        let (reporter, _guard) = reporter();
        assert!(!reporter.report(ErrorCode::InvalidInput, "nothing listening"));
    }

    #[test]
    fn test_disposed_is_noop() {
        let (reporter, guard) = reporter();
        let log = Arc::new(Mutex::new(Vec::new()));
        guard.bind(&recording_receiver(log.clone())).unwrap();
        guard.mark_disposed();

        assert!(!reporter.report(ErrorCode::InvalidInput, "late"));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_panicking_handler_swallowed() {
        let (reporter, guard) = reporter();
        let receiver = CallbackReceiver::builder("panics")
            .on_video_frame(|_| Ok(()))
            .on_texture_frame(|_, _, _| Ok(()))
            .on_error(|_| panic!("handler broke"))
            .on_message(|_, _| Ok(()))
            .build();
        guard.bind(&receiver).unwrap();

        assert!(!reporter.report(ErrorCode::ManagedCallFailure, "boom"));
    }
}
