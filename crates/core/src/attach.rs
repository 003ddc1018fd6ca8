//! Managed execution context for native callback threads
//!
//! Engine threads are not known to the managed runtime. Before a receiver
//! method may run, the calling thread has to acquire a context (attach to
//! the JVM, take the GIL, ...) and release it afterwards.
//!
//! [`CallbackAttachment`] scopes that acquisition and tracks nesting per
//! thread and per runtime: a thread that already holds a context for the
//! same runtime, either because the runtime reports it or because an outer
//! `with_managed_context` on that runtime is still on the stack, runs the
//! callback directly without acquiring again. Holding a context for one
//! runtime says nothing about another.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use thiserror::Error;

/// Context acquisition failed; no delivery was attempted
#[derive(Debug, Clone, Error)]
#[error("failed to acquire managed context ({runtime}): {reason}")]
pub struct AttachError {
    pub runtime: &'static str,
    pub reason: String,
}

impl AttachError {
    pub fn new(runtime: &'static str, reason: impl Into<String>) -> Self {
        Self {
            runtime,
            reason: reason.into(),
        }
    }
}

/// A managed runtime that native threads can call into
pub trait ManagedRuntime: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Whether the calling thread already holds a context
    fn is_attached(&self) -> bool;

    /// Acquire a context for the calling thread, run `f`, release.
    ///
    /// Release must happen even if `f` unwinds.
    fn attach(&self, f: &mut dyn FnMut()) -> Result<(), AttachError>;
}

thread_local! {
    /// Runtimes this thread is inside a context for, innermost last
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn is_held(runtime: usize) -> bool {
    HELD.with(|held| held.borrow().contains(&runtime))
}

struct HeldGuard;

impl HeldGuard {
    fn enter(runtime: usize) -> Self {
        HELD.with(|held| held.borrow_mut().push(runtime));
        HeldGuard
    }
}

impl Drop for HeldGuard {
    fn drop(&mut self) {
        HELD.with(|held| {
            held.borrow_mut().pop();
        });
    }
}

/// Scoped managed-context acquisition around callbacks
#[derive(Clone)]
pub struct CallbackAttachment {
    runtime: Arc<dyn ManagedRuntime>,
}

impl CallbackAttachment {
    pub fn new(runtime: Arc<dyn ManagedRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    // Attachments sharing one runtime share its nesting
    fn runtime_key(&self) -> usize {
        Arc::as_ptr(&self.runtime) as *const () as usize
    }

    /// Run `f` with a managed context held by the calling thread
    pub fn with_managed_context<R>(&self, f: impl FnOnce() -> R) -> Result<R, AttachError> {
        let key = self.runtime_key();
        let nested = is_held(key);
        if nested || self.runtime.is_attached() {
            tracing::trace!(runtime = self.runtime.name(), nested, "reusing managed context");
            let _held = HeldGuard::enter(key);
            return Ok(f());
        }

        let mut f = Some(f);
        let mut output = None;
        self.runtime.attach(&mut || {
            let _held = HeldGuard::enter(key);
            if let Some(f) = f.take() {
                output = Some(f());
            }
        })?;

        output.ok_or_else(|| AttachError::new(self.runtime.name(), "runtime did not run the callback"))
    }
}

impl std::fmt::Debug for CallbackAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackAttachment")
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

/// Runtime for receivers that live in this Rust process
///
/// There is nothing to acquire, but attach/release are still counted so
/// callers can verify pairing.
#[derive(Debug, Default)]
pub struct InProcessRuntime {
    attached: Mutex<Vec<ThreadId>>,
    attaches: AtomicU64,
    releases: AtomicU64,
}

impl InProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_count(&self) -> u64 {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

struct InProcessRelease<'a>(&'a InProcessRuntime);

impl Drop for InProcessRelease<'_> {
    fn drop(&mut self) {
        let current = std::thread::current().id();
        let mut attached = self.0.attached.lock();
        if let Some(pos) = attached.iter().rposition(|id| *id == current) {
            attached.swap_remove(pos);
        }
        drop(attached);
        self.0.releases.fetch_add(1, Ordering::SeqCst);
    }
}

impl ManagedRuntime for InProcessRuntime {
    fn name(&self) -> &'static str {
        "in-process"
    }

    fn is_attached(&self) -> bool {
        self.attached.lock().contains(&std::thread::current().id())
    }

    fn attach(&self, f: &mut dyn FnMut()) -> Result<(), AttachError> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        self.attached.lock().push(std::thread::current().id());
        let _release = InProcessRelease(self);
        f();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    struct Unavailable;

    impl ManagedRuntime for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn is_attached(&self) -> bool {
            false
        }

        fn attach(&self, _f: &mut dyn FnMut()) -> Result<(), AttachError> {
            Err(AttachError::new("unavailable", "vm gone"))
        }
    }

    #[test]
    fn test_attach_and_release_paired() {
        let runtime = Arc::new(InProcessRuntime::new());
        let attachment = CallbackAttachment::new(runtime.clone());

        let value = attachment.with_managed_context(|| 7).unwrap();
        assert_eq!(value, 7);
        assert_eq!(runtime.attach_count(), 1);
        assert_eq!(runtime.release_count(), 1);
    }

    #[test]
    fn test_nested_context_not_reacquired() {
        let runtime = Arc::new(InProcessRuntime::new());
        let attachment = CallbackAttachment::new(runtime.clone());

        attachment
            .with_managed_context(|| {
                attachment.with_managed_context(|| ()).unwrap();
                attachment.with_managed_context(|| ()).unwrap();
            })
            .unwrap();

        assert_eq!(runtime.attach_count(), 1);
        assert_eq!(runtime.release_count(), 1);
    }

    #[test]
    fn test_nesting_tracked_per_runtime() {
        let (outer, inner) = (Arc::new(InProcessRuntime::new()), Arc::new(InProcessRuntime::new()));
        let outer_attachment = CallbackAttachment::new(outer.clone());
        let inner_attachment = CallbackAttachment::new(inner.clone());

        outer_attachment
            .with_managed_context(|| {
                assert!(!inner.is_attached());
                inner_attachment
                    .with_managed_context(|| assert!(inner.is_attached()))
                    .unwrap();
                assert!(!inner.is_attached());
                assert!(outer.is_attached());
            })
            .unwrap();

        assert_eq!(outer.attach_count(), 1);
        assert_eq!(inner.attach_count(), 1);
        assert_eq!(inner.release_count(), 1);
    }

    #[test]
    fn test_release_on_panic() {
        let runtime = Arc::new(InProcessRuntime::new());
        let attachment = CallbackAttachment::new(runtime.clone());

        let result = catch_unwind(AssertUnwindSafe(|| {
            attachment.with_managed_context(|| panic!("receiver blew up"))
        }));
        assert!(result.is_err());
        assert_eq!(runtime.release_count(), 1);
        assert!(!runtime.is_attached());

        // Nesting was unwound too: the next call acquires again
        attachment.with_managed_context(|| ()).unwrap();
        assert_eq!(runtime.attach_count(), 2);
    }

    #[test]
    fn test_fail_closed() {
        let attachment = CallbackAttachment::new(Arc::new(Unavailable));
        let mut ran = false;
        let result = attachment.with_managed_context(|| ran = true);
        assert!(result.is_err());
        assert!(!ran);
    }
}
