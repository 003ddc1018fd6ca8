//! NativeEngine against an in-test fake of the C engine

use std::ffi::{c_char, c_int, c_void, CStr};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use p2pbridge_core::{
    BridgeConfig, CallbackReceiver, EngineError, InProcessRuntime, SessionController,
    SessionState,
};
use p2pbridge_ffi::{EngineVTable, NativeEngine, RecvCallback};

// The engine slots are process-wide; tests take turns
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

static FRAME_CB: Mutex<Option<RecvCallback>> = parking_lot::const_mutex(None);
static MESSAGE_CB: Mutex<Option<RecvCallback>> = parking_lot::const_mutex(None);
static DEVICE: Mutex<Option<String>> = parking_lot::const_mutex(None);
static SENT: Mutex<Vec<(String, String)>> = parking_lot::const_mutex(Vec::new());
static STOPS: AtomicU32 = AtomicU32::new(0);
static DEINITS: AtomicU32 = AtomicU32::new(0);
static STOP_DELAY_MS: AtomicU64 = AtomicU64::new(0);

unsafe extern "C" fn fake_init(_phone: *mut c_char, on_message: RecvCallback) {
    *MESSAGE_CB.lock() = Some(on_message);
}

unsafe extern "C" fn fake_set_dev(dev: *mut c_char) {
    let dev = unsafe { CStr::from_ptr(dev) }.to_string_lossy().into_owned();
    *DEVICE.lock() = Some(dev);
}

unsafe extern "C" fn fake_start(on_frame: RecvCallback) {
    *FRAME_CB.lock() = Some(on_frame);
}

unsafe extern "C" fn fake_stop() {
    STOPS.fetch_add(1, Ordering::SeqCst);
    let delay = STOP_DELAY_MS.load(Ordering::SeqCst);
    if delay > 0 {
        std::thread::sleep(Duration::from_millis(delay));
    }
}

unsafe extern "C" fn fake_send(json: *mut c_void, topic: *mut c_char) -> c_int {
    let json = unsafe { CStr::from_ptr(json as *const c_char) }.to_string_lossy().into_owned();
    let topic = unsafe { CStr::from_ptr(topic) }.to_string_lossy().into_owned();
    let status = if topic == "reject" { -1 } else { 0 };
    SENT.lock().push((json, topic));
    status
}

unsafe extern "C" fn fake_deinit() {
    DEINITS.fetch_add(1, Ordering::SeqCst);
}

fn vtable() -> EngineVTable {
    EngineVTable {
        init_mqtt: fake_init,
        set_dev_p2p: fake_set_dev,
        start_p2p_video: fake_start,
        stop_p2p_video: fake_stop,
        send_json_msg: fake_send,
        deinit_mqtt: fake_deinit,
    }
}

/// Call a captured engine callback the way the C side would
fn fire(callback: RecvCallback, bytes: &[u8]) {
    unsafe { callback(bytes.as_ptr() as *mut c_void, bytes.len() as c_int) }
}

fn recording() -> (CallbackReceiver, Arc<Mutex<Vec<Vec<u8>>>>, Arc<Mutex<Vec<String>>>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let (f, e, m) = (frames.clone(), errors.clone(), frames.clone());
    let receiver = CallbackReceiver::builder("native-test")
        .on_video_frame(move |bytes| {
            f.lock().push(bytes);
            Ok(())
        })
        .on_texture_frame(|_, _, _| Ok(()))
        .on_error(move |message| {
            e.lock().push(message);
            Ok(())
        })
        .on_message(move |bytes, _| {
            m.lock().push(bytes);
            Ok(())
        })
        .build();
    (receiver, frames, errors)
}

#[test]
fn test_second_claim_rejected() {
    let _serial = SERIAL.lock();
    let first = NativeEngine::claim(vtable()).unwrap();
    assert!(matches!(NativeEngine::claim(vtable()), Err(EngineError::AlreadyClaimed)));
    drop(first);
    assert!(NativeEngine::claim(vtable()).is_ok());
}

#[test]
fn test_frames_through_c_callback() {
    let _serial = SERIAL.lock();
    let stops_before = STOPS.load(Ordering::SeqCst);
    let engine = Arc::new(NativeEngine::claim(vtable()).unwrap());
    let session = SessionController::new(
        engine,
        Arc::new(InProcessRuntime::new()),
        BridgeConfig::default(),
    )
    .unwrap();
    let (receiver, frames, errors) = recording();
    session.bind(&receiver).unwrap();
    session.set_device("cam-01").unwrap();
    assert_eq!(DEVICE.lock().as_deref(), Some("cam-01"));
    session.start().unwrap();

    let on_frame = (*FRAME_CB.lock()).expect("engine saw start");
    std::thread::spawn(move || fire(on_frame, &[0x65, 0xaa]))
        .join()
        .unwrap();
    assert_eq!(frames.lock().as_slice(), [vec![0, 0, 0, 1, 0x65, 0xaa]]);

    // Null buffer from the engine is reported, not delivered
    unsafe { on_frame(std::ptr::null_mut(), 0) };
    assert_eq!(frames.lock().len(), 1);
    assert!(errors.lock()[0].starts_with("INVALID_INPUT"));

    session.stop().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while session.state() != SessionState::Bound && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(STOPS.load(Ordering::SeqCst), stops_before + 1);

    // Late frame after stop returned finds no session
    fire(on_frame, &[0x41]);
    assert_eq!(frames.lock().len(), 1);

    session.dispose();
    fire(on_frame, &[0x41]);
    assert_eq!(frames.lock().len(), 1);
}

#[test]
fn test_signaling_round_trip() {
    let _serial = SERIAL.lock();
    let deinits_before = DEINITS.load(Ordering::SeqCst);
    let engine = Arc::new(NativeEngine::claim(vtable()).unwrap());
    let session = SessionController::new(
        engine,
        Arc::new(InProcessRuntime::new()),
        BridgeConfig::default(),
    )
    .unwrap();
    let (receiver, messages, _errors) = recording();
    session.bind(&receiver).unwrap();
    session.init_signaling("13800000000").unwrap();

    let on_message = (*MESSAGE_CB.lock()).expect("engine saw init");
    fire(on_message, br#"{"type":"answer"}"#);
    assert_eq!(messages.lock()[0], br#"{"type":"answer"}"#.to_vec());

    session
        .send_message(&serde_json::json!({"type": "login"}), "/yyt/cam-01/msg")
        .unwrap();
    let (json, topic) = SENT.lock().last().cloned().unwrap();
    assert_eq!(topic, "/yyt/cam-01/msg");
    assert_eq!(serde_json::from_str::<serde_json::Value>(&json).unwrap()["type"], "login");

    assert!(matches!(
        session.send_message(&serde_json::json!({}), "reject"),
        Err(p2pbridge_core::Error::Engine(EngineError::Status { status: -1, .. }))
    ));
    assert!(matches!(
        session.set_device("bad\0id"),
        Err(p2pbridge_core::Error::Engine(EngineError::InvalidArgument { .. }))
    ));

    drop(session);
    assert_eq!(DEINITS.load(Ordering::SeqCst), deinits_before + 1);
}

#[test]
fn test_restart_survives_late_stop() {
    let _serial = SERIAL.lock();
    let engine = Arc::new(NativeEngine::claim(vtable()).unwrap());
    let session = SessionController::new(
        engine,
        Arc::new(InProcessRuntime::new()),
        BridgeConfig::default().with_stop_timeout_ms(50),
    )
    .unwrap();
    let (receiver, frames, _errors) = recording();
    session.bind(&receiver).unwrap();
    session.start().unwrap();

    STOP_DELAY_MS.store(300, Ordering::SeqCst);
    session.stop().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while session.state() != SessionState::Bound && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    STOP_DELAY_MS.store(0, Ordering::SeqCst);

    // Restart while the first stop call is still inside the engine
    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);
    std::thread::sleep(Duration::from_millis(450));

    let on_frame = (*FRAME_CB.lock()).expect("engine saw start");
    fire(on_frame, &[0x65, 0x01]);
    assert_eq!(frames.lock().as_slice(), [vec![0, 0, 0, 1, 0x65, 0x01]]);
}
