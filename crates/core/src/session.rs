//! Session façade owning all bridge state for one engine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use crate::attach::{CallbackAttachment, ManagedRuntime};
use crate::config::BridgeConfig;
use crate::counters::CounterSnapshot;
use crate::dispatch::{FrameDispatcher, MessageDispatcher, Shared};
use crate::engine::{Engine, EngineError};
use crate::lifecycle::{SessionState, StateCell};
use crate::receiver::ManagedReceiver;
use crate::router::{DeliveryMode, TextureHandle};
use crate::stop::{StopRequest, StopSequencer};
use crate::{Error, Result};

/// One bridge session: a receiver, an engine and the state between them
///
/// Every operation is safe to call from any thread. After [`dispose`]
/// every operation is a silent no-op, except `bind`, which reports
/// [`Error::Disposed`].
///
/// [`dispose`]: SessionController::dispose
pub struct SessionController {
    shared: Arc<Shared>,
    state: Arc<StateCell>,
    engine: Arc<dyn Engine>,
    stop: StopSequencer,
    frames: FrameDispatcher,
    messages: MessageDispatcher,
    signaling: AtomicBool,
    running_since: Arc<Mutex<Option<Instant>>>,
}

impl SessionController {
    /// Create a session over `engine`, delivering through `runtime`
    pub fn new(
        engine: Arc<dyn Engine>,
        runtime: Arc<dyn ManagedRuntime>,
        config: BridgeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let session_id = uuid::Uuid::new_v4().to_string();
        let stop_timeout = config.stop_timeout();
        let shared = Arc::new(Shared::new(
            session_id.clone(),
            CallbackAttachment::new(runtime),
            config,
        ));
        let stop = StopSequencer::new(
            session_id.clone(),
            engine.clone(),
            stop_timeout,
            shared.reporter.clone(),
        );

        tracing::info!(
            %session_id,
            engine = engine.name(),
            runtime = shared.attachment.runtime_name(),
            "session created"
        );

        Ok(Self {
            frames: FrameDispatcher::new(shared.clone()),
            messages: MessageDispatcher::new(shared.clone()),
            shared,
            state: Arc::new(StateCell::new(SessionState::Unbound)),
            engine,
            stop,
            signaling: AtomicBool::new(false),
            running_since: Arc::new(Mutex::new(None)),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    fn is_disposed(&self) -> bool {
        !self.shared.guard.try_enter()
    }

    fn idle_state(&self) -> SessionState {
        if self.shared.guard.is_bound() {
            SessionState::Bound
        } else {
            SessionState::Unbound
        }
    }

    /// Bind `receiver`, replacing any previous one
    ///
    /// All four delivery methods are resolved up front; if any is missing
    /// nothing changes and [`Error::BindingIncomplete`] is returned.
    pub fn bind(&self, receiver: &dyn ManagedReceiver) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        let previous = self.shared.guard.bind(receiver).inspect_err(|e| {
            tracing::warn!(session_id = %self.session_id(), error = %e, "bind rejected");
        })?;
        if let Some(previous) = previous {
            tracing::debug!(
                session_id = %self.session_id(),
                receiver = previous.receiver_id(),
                "previous receiver released"
            );
        }
        self.state.transition(SessionState::Unbound, SessionState::Bound);
        tracing::info!(
            session_id = %self.session_id(),
            receiver = %receiver.receiver_id(),
            "receiver bound"
        );
        Ok(())
    }

    /// Drop the receiver binding; a running stream keeps running
    pub fn unbind(&self) {
        if self.is_disposed() {
            return;
        }
        if self.shared.guard.unbind().is_some() {
            tracing::info!(session_id = %self.session_id(), "receiver unbound");
        }
        self.state.transition(SessionState::Bound, SessionState::Unbound);
    }

    pub fn set_mode(&self, mode: DeliveryMode) {
        if self.is_disposed() {
            return;
        }
        self.shared.router.set_mode(mode);
        tracing::debug!(session_id = %self.session_id(), %mode, "delivery mode set");
    }

    pub fn mode(&self) -> DeliveryMode {
        self.shared.router.mode()
    }

    pub fn set_texture(&self, texture: TextureHandle) {
        if self.is_disposed() {
            return;
        }
        self.shared.router.set_texture(texture);
        tracing::debug!(session_id = %self.session_id(), texture = texture.0, "texture handle set");
    }

    pub fn texture(&self) -> TextureHandle {
        self.shared.router.texture()
    }

    /// Connect signaling; a second call is a no-op
    pub fn init_signaling(&self, phone_id: &str) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        if self
            .signaling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(session_id = %self.session_id(), "signaling already initialized");
            return Ok(());
        }
        if let Err(e) = self.engine.init_signaling(phone_id, self.messages.clone()) {
            self.signaling.store(false, Ordering::SeqCst);
            tracing::error!(session_id = %self.session_id(), error = %e, "signaling init failed");
            return Err(e.into());
        }
        tracing::info!(session_id = %self.session_id(), phone_id, "signaling initialized");
        Ok(())
    }

    pub fn is_signaling(&self) -> bool {
        self.signaling.load(Ordering::SeqCst)
    }

    /// Select the remote device; call before `start` on a real engine
    pub fn set_device(&self, device_id: &str) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        self.engine.set_device(device_id)?;
        tracing::info!(session_id = %self.session_id(), device_id, "device selected");
        Ok(())
    }

    pub fn deinit_signaling(&self) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        self.teardown_signaling()
    }

    fn teardown_signaling(&self) -> Result<()> {
        if !self.signaling.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.deinit_signaling()?;
        tracing::info!(session_id = %self.session_id(), "signaling deinitialized");
        Ok(())
    }

    /// Start video; no-op when already starting or running
    pub fn start(&self) -> Result<()> {
        match self.state.get() {
            SessionState::Disposed | SessionState::Starting | SessionState::Running => {
                return Ok(())
            }
            SessionState::Unbound => return Err(Error::NotBound),
            SessionState::Stopping => return Err(Error::invalid_state("stop in progress")),
            SessionState::Bound => {}
        }
        if !self.state.transition(SessionState::Bound, SessionState::Starting) {
            // Lost a race with another control call
            return match self.state.get() {
                SessionState::Disposed | SessionState::Starting | SessionState::Running => Ok(()),
                SessionState::Unbound => Err(Error::NotBound),
                other => Err(Error::invalid_state(format!("cannot start while {}", other))),
            };
        }

        match self.engine.start_video(self.frames.clone()) {
            Ok(()) => {
                if !self.state.transition(SessionState::Starting, SessionState::Running) {
                    // A stop or dispose landed while the engine was starting;
                    // its engine stop may have run before streaming began
                    tracing::info!(
                        session_id = %self.session_id(),
                        state = %self.state.get(),
                        "start superseded, stopping video again"
                    );
                    if let Err(e) = self.stop.force_stop() {
                        tracing::error!(session_id = %self.session_id(), error = %e, "could not launch stop");
                    }
                    return Ok(());
                }
                *self.running_since.lock() = Some(Instant::now());
                tracing::info!(
                    session_id = %self.session_id(),
                    mode = %self.mode(),
                    "video started"
                );
                Ok(())
            }
            Err(e) => {
                self.state.transition(SessionState::Starting, self.idle_state());
                tracing::error!(session_id = %self.session_id(), error = %e, "video start failed");
                self.shared.reporter.report_error(&Error::Engine(e.clone()));
                Err(e.into())
            }
        }
    }

    /// Ask the engine to stop video without waiting for it
    ///
    /// Concurrent calls collapse into a single engine stop.
    pub fn stop(&self) -> Result<StopRequest> {
        let current = self.state.get();
        match current {
            SessionState::Disposed => return Ok(StopRequest::AlreadyInFlight),
            SessionState::Starting | SessionState::Running => {
                self.state.transition(current, SessionState::Stopping);
            }
            _ => {}
        }
        let request = self.request_stop()?;
        tracing::debug!(session_id = %self.session_id(), ?request, "stop requested");
        Ok(request)
    }

    fn request_stop(&self) -> Result<StopRequest> {
        let state = self.state.clone();
        let guard = self.shared.guard.clone();
        let running_since = self.running_since.clone();
        self.stop.request_stop(move |_| {
            running_since.lock().take();
            let idle = if guard.is_bound() {
                SessionState::Bound
            } else {
                SessionState::Unbound
            };
            state.transition(SessionState::Stopping, idle);
        })
    }

    /// Publish a JSON signaling message on `topic`
    pub fn send_message(&self, message: &Value, topic: &str) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let status = self.engine.send_json(message, topic)?;
        if status != 0 {
            tracing::warn!(session_id = %self.session_id(), topic, status, "send rejected by engine");
            return Err(EngineError::Status {
                call: "send_json",
                status,
            }
            .into());
        }
        tracing::trace!(session_id = %self.session_id(), topic, "message sent");
        Ok(())
    }

    /// Feed a locally produced frame through the normal delivery path
    pub fn inject_frame(&self, frame: &[u8]) {
        self.frames.on_frame(Some(frame));
    }

    /// Dispatcher the engine should call with video frames
    pub fn frame_dispatcher(&self) -> FrameDispatcher {
        self.frames.clone()
    }

    /// Dispatcher the engine should call with signaling messages
    pub fn message_dispatcher(&self) -> MessageDispatcher {
        self.messages.clone()
    }

    pub fn stats(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    /// Running, but no frame delivered within the stall threshold
    pub fn is_stalled(&self) -> bool {
        if self.state.get() != SessionState::Running {
            return false;
        }
        let threshold = self.shared.config.stall_threshold();
        let idle = match self.shared.counters.since_last_frame() {
            Some(idle) => idle,
            None => match *self.running_since.lock() {
                Some(since) => since.elapsed(),
                None => return false,
            },
        };
        idle > threshold
    }

    /// Tear the session down; later calls do nothing
    ///
    /// Once this returns no receiver method is invoked again. A stop call
    /// that outlives the timeout is left running on its own thread.
    pub fn dispose(&self) {
        if !self.shared.guard.mark_disposed() {
            return;
        }
        let previous = self.state.dispose();
        tracing::info!(session_id = %self.session_id(), %previous, "disposing session");

        if previous.is_streaming() {
            if let Err(e) = self.request_stop() {
                tracing::error!(session_id = %self.session_id(), error = %e, "could not launch stop");
            }
        }
        if let Err(e) = self.teardown_signaling() {
            tracing::warn!(session_id = %self.session_id(), error = %e, "signaling teardown failed");
        }
        self.shared.guard.unbind();

        let hung = self.stop.shutdown();
        tracing::info!(session_id = %self.session_id(), hung, "session disposed");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.dispose();
        // Stops launched by a start that finished after dispose
        self.stop.shutdown();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("session_id", &self.shared.session_id)
            .field("state", &self.state.get())
            .field("engine", &self.engine.name())
            .field("mode", &self.shared.router.mode())
            .field("texture", &self.shared.router.texture())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::InProcessRuntime;
    use crate::engine::LoopbackEngine;
    use crate::receiver::CallbackReceiver;

    fn session() -> (SessionController, Arc<LoopbackEngine>) {
        let engine = Arc::new(LoopbackEngine::new());
        let session = SessionController::new(
            engine.clone(),
            Arc::new(InProcessRuntime::new()),
            BridgeConfig::default(),
        )
        .unwrap();
        (session, engine)
    }

    #[test]
    fn test_start_requires_binding() {
        let (session, engine) = session();
        assert!(matches!(session.start(), Err(Error::NotBound)));
        assert_eq!(engine.start_calls(), 0);
    }

    #[test]
    fn test_bind_unbind_transitions() {
        let (session, _engine) = session();
        session.bind(&CallbackReceiver::noop("view")).unwrap();
        assert_eq!(session.state(), SessionState::Bound);
        session.unbind();
        assert_eq!(session.state(), SessionState::Unbound);
    }

    #[test]
    fn test_start_failure_returns_to_bound() {
        let (session, engine) = session();
        engine.set_fail_start(true);
        session.bind(&CallbackReceiver::noop("view")).unwrap();

        assert!(matches!(session.start(), Err(Error::Engine(_))));
        assert_eq!(session.state(), SessionState::Bound);
    }

    #[test]
    fn test_send_message_status_mapping() {
        let (session, engine) = session();
        let body = serde_json::json!({"type": "offer"});
        session.send_message(&body, "device/42").unwrap();

        engine.set_send_status(-3);
        assert!(matches!(
            session.send_message(&body, "device/42"),
            Err(Error::Engine(EngineError::Status { status: -3, .. }))
        ));
        assert_eq!(engine.sent_messages().len(), 2);
    }

    #[test]
    fn test_signaling_initialized_once() {
        let (session, engine) = session();
        session.init_signaling("13800000000").unwrap();
        session.init_signaling("13800000000").unwrap();
        assert_eq!(engine.init_calls(), 1);

        session.dispose();
        assert_eq!(engine.deinit_calls(), 1);
        assert!(!session.is_signaling());
    }

    #[test]
    fn test_operations_after_dispose_are_noops() {
        let (session, engine) = session();
        session.dispose();

        assert!(matches!(session.bind(&CallbackReceiver::noop("late")), Err(Error::Disposed)));
        session.start().unwrap();
        session.stop().unwrap();
        session.send_message(&serde_json::json!({}), "t").unwrap();
        session.set_mode(DeliveryMode::Texture);

        assert_eq!(session.mode(), DeliveryMode::RawBuffer);
        assert_eq!(engine.start_calls(), 0);
        assert_eq!(engine.stop_calls(), 0);
        assert!(engine.sent_messages().is_empty());
    }

    #[test]
    fn test_not_stalled_unless_running() {
        let (session, _engine) = session();
        assert!(!session.is_stalled());
    }
}
