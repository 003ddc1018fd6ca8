//! JVM receivers
//!
//! The managed context is a JVM thread attachment. Method IDs are resolved
//! once at bind time against the receiver's class; each delivery runs in
//! its own local frame so array and string references never accumulate on
//! long-lived engine threads.

use std::sync::Arc;

use jni::objects::{GlobalRef, JMethodID, JObject, JValue};
use jni::signature::{Primitive, ReturnType};
use jni::{JNIEnv, JavaVM};
use p2pbridge_core::{
    AttachError, DeliveryError, DeliveryMethod, DeliveryResult, ManagedReceiver, ManagedRuntime,
    ResolvedMethods, TextureHandle,
};

/// JNI signature of each delivery method
pub fn signature(method: DeliveryMethod) -> &'static str {
    match method {
        DeliveryMethod::VideoFrame => "([B)V",
        DeliveryMethod::TextureFrame => "(J[BI)V",
        DeliveryMethod::Error => "(Ljava/lang/String;)V",
        DeliveryMethod::Message => "([BI)V",
    }
}

/// Runtime backed by a `JavaVM`
#[derive(Clone)]
pub struct JniRuntime {
    vm: Arc<JavaVM>,
}

impl JniRuntime {
    pub fn new(vm: JavaVM) -> Self {
        Self { vm: Arc::new(vm) }
    }

    /// Runtime for the VM that owns `env`
    pub fn from_env(env: &JNIEnv) -> Result<Self, AttachError> {
        env.get_java_vm()
            .map(Self::new)
            .map_err(|e| AttachError::new("jvm", e.to_string()))
    }

    pub fn vm(&self) -> Arc<JavaVM> {
        self.vm.clone()
    }
}

impl ManagedRuntime for JniRuntime {
    fn name(&self) -> &'static str {
        "jvm"
    }

    fn is_attached(&self) -> bool {
        self.vm.get_env().is_ok()
    }

    fn attach(&self, f: &mut dyn FnMut()) -> Result<(), AttachError> {
        // Detaches on drop, including during unwinding
        let _env = self
            .vm
            .attach_current_thread()
            .map_err(|e| AttachError::new("jvm", e.to_string()))?;
        f();
        Ok(())
    }
}

impl std::fmt::Debug for JniRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JniRuntime").finish_non_exhaustive()
    }
}

/// Run one void method call inside a fresh local frame
///
/// A pending Java exception is described, cleared and turned into a
/// [`DeliveryError`] so it never leaks into the engine thread.
fn invoke(
    vm: &JavaVM,
    method: DeliveryMethod,
    call: impl FnOnce(&mut JNIEnv) -> jni::errors::Result<()>,
) -> DeliveryResult {
    let mut env = vm
        .attach_current_thread()
        .map_err(|e| DeliveryError::new(format!("{}: {}", method.name(), e)))?;
    match env.with_local_frame(8, call) {
        Ok(()) => Ok(()),
        Err(e) => {
            if env.exception_check().unwrap_or(false) {
                let _ = env.exception_describe();
                let _ = env.exception_clear();
            }
            Err(DeliveryError::new(format!("{} failed: {}", method.name(), e)))
        }
    }
}

const VOID: ReturnType = ReturnType::Primitive(Primitive::Void);

/// A Java object bound as a receiver
pub struct JniReceiver {
    vm: Arc<JavaVM>,
    target: GlobalRef,
    id: String,
}

impl JniReceiver {
    pub fn new(
        runtime: &JniRuntime,
        env: &mut JNIEnv,
        target: &JObject,
        id: impl Into<String>,
    ) -> jni::errors::Result<Self> {
        Ok(Self {
            vm: runtime.vm(),
            target: env.new_global_ref(target)?,
            id: id.into(),
        })
    }

    fn method_ids(&self) -> Option<[Option<JMethodID>; 4]> {
        let mut env = match self.vm.attach_current_thread() {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(receiver = %self.id, error = %e, "cannot attach to resolve receiver");
                return None;
            }
        };
        let class = match env.get_object_class(&self.target) {
            Ok(class) => class,
            Err(e) => {
                tracing::warn!(receiver = %self.id, error = %e, "cannot load receiver class");
                return None;
            }
        };

        let ids = DeliveryMethod::ALL.map(|method| {
            match env.get_method_id(&class, method.name(), signature(method)) {
                Ok(id) => Some(id),
                Err(e) => {
                    // NoSuchMethodError stays pending otherwise
                    if env.exception_check().unwrap_or(false) {
                        let _ = env.exception_clear();
                    }
                    tracing::debug!(
                        receiver = %self.id,
                        method = method.name(),
                        error = %e,
                        "java method not found"
                    );
                    None
                }
            }
        });
        let _ = env.delete_local_ref(class);
        Some(ids)
    }
}

impl ManagedReceiver for JniReceiver {
    fn receiver_id(&self) -> String {
        self.id.clone()
    }

    fn resolve(&self) -> ResolvedMethods {
        let Some([video, texture, error, message]) = self.method_ids() else {
            return ResolvedMethods::default();
        };
        let mut methods = ResolvedMethods::default();

        if let Some(id) = video {
            let (vm, target) = (self.vm.clone(), self.target.clone());
            methods.on_video_frame = Some(Arc::new(move |bytes: Vec<u8>| {
                invoke(&vm, DeliveryMethod::VideoFrame, |env| {
                    let array = env.byte_array_from_slice(&bytes)?;
                    // SAFETY: id was resolved against target's class with signature ([B)V
                    unsafe {
                        env.call_method_unchecked(&target, id, VOID, &[JValue::Object(&array).as_jni()])
                    }?;
                    Ok(())
                })
            }));
        }

        if let Some(id) = texture {
            let (vm, target) = (self.vm.clone(), self.target.clone());
            methods.on_texture_frame = Some(Arc::new(
                move |handle: TextureHandle, bytes: Vec<u8>, len: usize| {
                    invoke(&vm, DeliveryMethod::TextureFrame, |env| {
                        let array = env.byte_array_from_slice(&bytes)?;
                        let args = [
                            JValue::Long(handle.0).as_jni(),
                            JValue::Object(&array).as_jni(),
                            JValue::Int(len as i32).as_jni(),
                        ];
                        // SAFETY: id was resolved with signature (J[BI)V
                        unsafe { env.call_method_unchecked(&target, id, VOID, &args) }?;
                        Ok(())
                    })
                },
            ));
        }

        if let Some(id) = error {
            let (vm, target) = (self.vm.clone(), self.target.clone());
            methods.on_error = Some(Arc::new(move |text: String| {
                invoke(&vm, DeliveryMethod::Error, |env| {
                    let text = env.new_string(&text)?;
                    // SAFETY: id was resolved with signature (Ljava/lang/String;)V
                    unsafe {
                        env.call_method_unchecked(&target, id, VOID, &[JValue::Object(&text).as_jni()])
                    }?;
                    Ok(())
                })
            }));
        }

        if let Some(id) = message {
            let (vm, target) = (self.vm.clone(), self.target.clone());
            methods.on_message = Some(Arc::new(move |bytes: Vec<u8>, len: usize| {
                invoke(&vm, DeliveryMethod::Message, |env| {
                    let array = env.byte_array_from_slice(&bytes)?;
                    let args = [JValue::Object(&array).as_jni(), JValue::Int(len as i32).as_jni()];
                    // SAFETY: id was resolved with signature ([BI)V
                    unsafe { env.call_method_unchecked(&target, id, VOID, &args) }?;
                    Ok(())
                })
            }));
        }

        methods
    }
}
