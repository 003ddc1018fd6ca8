//! Shared fixtures for session integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use p2pbridge_core::{
    BridgeConfig, CallbackReceiver, InProcessRuntime, LoopbackEngine, SessionController,
    TextureHandle,
};

/// Everything a recording receiver has seen
#[derive(Debug, Default)]
pub struct Recorded {
    pub frames: Vec<Vec<u8>>,
    pub texture_frames: Vec<(TextureHandle, Vec<u8>, usize)>,
    pub errors: Vec<String>,
    pub messages: Vec<(Vec<u8>, usize)>,
}

/// Receiver that records every delivery
pub fn recording_receiver(id: &str) -> (CallbackReceiver, Arc<Mutex<Recorded>>) {
    let log = Arc::new(Mutex::new(Recorded::default()));
    let (frames, textures, errors, messages) = (log.clone(), log.clone(), log.clone(), log.clone());
    let receiver = CallbackReceiver::builder(id)
        .on_video_frame(move |bytes| {
            frames.lock().frames.push(bytes);
            Ok(())
        })
        .on_texture_frame(move |handle, bytes, len| {
            textures.lock().texture_frames.push((handle, bytes, len));
            Ok(())
        })
        .on_error(move |message| {
            errors.lock().errors.push(message);
            Ok(())
        })
        .on_message(move |bytes, len| {
            messages.lock().messages.push((bytes, len));
            Ok(())
        })
        .build();
    (receiver, log)
}

pub struct Harness {
    pub engine: Arc<LoopbackEngine>,
    pub runtime: Arc<InProcessRuntime>,
    pub session: SessionController,
}

pub fn harness(config: BridgeConfig) -> Harness {
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = Arc::new(InProcessRuntime::new());
    let session = SessionController::new(engine.clone(), runtime.clone(), config)
        .expect("valid config");
    Harness {
        engine,
        runtime,
        session,
    }
}

/// Poll `check` for up to two seconds
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    check()
}
