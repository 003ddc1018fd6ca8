//! C function table of the streaming/signaling engine

use std::ffi::{c_char, c_int, c_void};

/// `pFunRecvCB`: buffer and length, valid only for the duration of the call
pub type RecvCallback = unsafe extern "C" fn(data: *mut c_void, len: c_int);

/// The engine's exported entry points
///
/// String arguments are NUL-terminated and only borrowed for the duration
/// of the call. `send_json_msg` receives the serialized JSON document as a
/// NUL-terminated UTF-8 string.
#[derive(Clone, Copy)]
pub struct EngineVTable {
    pub init_mqtt: unsafe extern "C" fn(phone_id: *mut c_char, on_message: RecvCallback),
    pub set_dev_p2p: unsafe extern "C" fn(dev_id: *mut c_char),
    pub start_p2p_video: unsafe extern "C" fn(on_frame: RecvCallback),
    pub stop_p2p_video: unsafe extern "C" fn(),
    pub send_json_msg: unsafe extern "C" fn(json: *mut c_void, topic: *mut c_char) -> c_int,
    pub deinit_mqtt: unsafe extern "C" fn(),
}

impl std::fmt::Debug for EngineVTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineVTable")
            .field("init_mqtt", &(self.init_mqtt as *const c_void))
            .field("start_p2p_video", &(self.start_p2p_video as *const c_void))
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "link-engine")]
#[allow(non_snake_case)]
mod linked {
    use super::*;

    extern "C" {
        pub fn InitMqtt(phone_id: *mut c_char, on_message: RecvCallback);
        pub fn SetDevP2p(dev_id: *mut c_char);
        pub fn StartP2pVideo(on_frame: RecvCallback);
        pub fn StopP2pVideo();
        pub fn SendJsonMsg(json: *mut c_void, topic: *mut c_char) -> c_int;
        pub fn DeinitMqtt();
    }
}

#[cfg(feature = "link-engine")]
impl EngineVTable {
    /// Table pointing at the engine library linked into this binary
    pub fn linked() -> Self {
        Self {
            init_mqtt: linked::InitMqtt,
            set_dev_p2p: linked::SetDevP2p,
            start_p2p_video: linked::StartP2pVideo,
            stop_p2p_video: linked::StopP2pVideo,
            send_json_msg: linked::SendJsonMsg,
            deinit_mqtt: linked::DeinitMqtt,
        }
    }
}
