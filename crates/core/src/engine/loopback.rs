use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use super::{Engine, EngineError};
use crate::dispatch::{FrameDispatcher, MessageDispatcher};

/// In-process engine driven by the host
///
/// Frames and messages are pushed by the caller through [`push_frame`] /
/// [`push_message`] and land in whatever dispatcher the session registered.
/// Every call is counted, which makes it the engine of choice for tests
/// and for the replay tool.
///
/// [`push_frame`]: LoopbackEngine::push_frame
/// [`push_message`]: LoopbackEngine::push_message
#[derive(Debug, Default)]
pub struct LoopbackEngine {
    frames: Mutex<Option<FrameDispatcher>>,
    /// Bumped by every `start_video`, under the `frames` lock
    video_generation: AtomicU64,
    messages: Mutex<Option<MessageDispatcher>>,
    device: Mutex<Option<String>>,
    sent: Mutex<Vec<(Value, String)>>,
    start_delay_ms: AtomicU64,
    stop_delay_ms: AtomicU64,
    send_status: AtomicI32,
    fail_start: AtomicBool,
    init_calls: AtomicU64,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
    deinit_calls: AtomicU64,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `stop_video` block for `delay` before returning
    pub fn with_stop_delay(self, delay: Duration) -> Self {
        self.set_stop_delay(delay);
        self
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        self.stop_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every `start_video` block for `delay` before the stream is live
    pub fn set_start_delay(&self, delay: Duration) {
        self.start_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Status returned by subsequent `send_json` calls
    pub fn set_send_status(&self, status: i32) {
        self.send_status.store(status, Ordering::SeqCst);
    }

    /// Make subsequent `start_video` calls fail
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Push a frame as the engine would; false if video is not running
    pub fn push_frame(&self, frame: &[u8]) -> bool {
        // Clone out so the dispatcher runs without the sink lock held
        let sink = self.frames.lock().clone();
        match sink {
            Some(frames) => {
                frames.on_frame(Some(frame));
                true
            }
            None => false,
        }
    }

    /// Push a signaling message; false if signaling is not initialized
    pub fn push_message(&self, message: &[u8]) -> bool {
        let sink = self.messages.lock().clone();
        match sink {
            Some(messages) => {
                messages.on_message(Some(message));
                true
            }
            None => false,
        }
    }

    /// The currently registered frame dispatcher, if video is running
    pub fn frame_sink(&self) -> Option<FrameDispatcher> {
        self.frames.lock().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.frames.lock().is_some()
    }

    pub fn device(&self) -> Option<String> {
        self.device.lock().clone()
    }

    /// Messages passed to `send_json`, with their topics
    pub fn sent_messages(&self) -> Vec<(Value, String)> {
        self.sent.lock().clone()
    }

    pub fn init_calls(&self) -> u64 {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn deinit_calls(&self) -> u64 {
        self.deinit_calls.load(Ordering::SeqCst)
    }
}

impl Engine for LoopbackEngine {
    fn name(&self) -> &str {
        "loopback"
    }

    fn init_signaling(&self, phone_id: &str, messages: MessageDispatcher) -> Result<(), EngineError> {
        if phone_id.is_empty() {
            return Err(EngineError::invalid_argument("init_signaling", "empty phone id"));
        }
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        *self.messages.lock() = Some(messages);
        Ok(())
    }

    fn set_device(&self, device_id: &str) -> Result<(), EngineError> {
        *self.device.lock() = Some(device_id.to_string());
        Ok(())
    }

    fn start_video(&self, frames: FrameDispatcher) -> Result<(), EngineError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::call_failed("start_video", "loopback start disabled"));
        }
        let delay = self.start_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let mut sink = self.frames.lock();
        self.video_generation.fetch_add(1, Ordering::SeqCst);
        *sink = Some(frames);
        Ok(())
    }

    fn stop_video(&self) -> Result<(), EngineError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let generation = self.video_generation.load(Ordering::SeqCst);
        let delay = self.stop_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        // A start that came in meanwhile owns the sink now
        let mut sink = self.frames.lock();
        if self.video_generation.load(Ordering::SeqCst) == generation {
            sink.take();
        }
        Ok(())
    }

    fn send_json(&self, message: &Value, topic: &str) -> Result<i32, EngineError> {
        self.sent.lock().push((message.clone(), topic.to_string()));
        Ok(self.send_status.load(Ordering::SeqCst))
    }

    fn deinit_signaling(&self) -> Result<(), EngineError> {
        self.deinit_calls.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().take();
        Ok(())
    }
}
