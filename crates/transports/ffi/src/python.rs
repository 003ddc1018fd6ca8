//! CPython receivers
//!
//! The managed context is the GIL, acquired through `Python::attach`.
//! Receivers are ordinary Python objects with `on_video_frame(bytes)`,
//! `on_texture_frame(handle, bytes, length)`, `on_error(message)` and
//! `on_message(bytes, length)` methods, looked up once at bind time.

use std::sync::Arc;

use p2pbridge_core::{
    AttachError, DeliveryError, DeliveryResult, ManagedReceiver, ManagedRuntime, ResolvedMethods,
    TextureHandle,
};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

/// GIL-backed runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonRuntime;

impl PythonRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl ManagedRuntime for PythonRuntime {
    fn name(&self) -> &'static str {
        "python"
    }

    // Python::attach is reentrant, so the GIL state is never checked
    fn is_attached(&self) -> bool {
        false
    }

    fn attach(&self, f: &mut dyn FnMut()) -> Result<(), AttachError> {
        Python::attach(|_py| f());
        Ok(())
    }
}

/// Turn a Python call result into a delivery result, printing the traceback
fn delivered(py: Python<'_>, method: &str, result: PyResult<Py<PyAny>>) -> DeliveryResult {
    result.map(|_| ()).map_err(|e| {
        let message = format!("{} raised: {}", method, e);
        e.print(py);
        DeliveryError::new(message)
    })
}

/// A Python object bound as a receiver
pub struct PyReceiver {
    target: Py<PyAny>,
    id: String,
}

impl PyReceiver {
    pub fn new(py: Python<'_>, target: Py<PyAny>) -> Self {
        let bound = target.bind(py);
        let id = bound
            .get_type()
            .name()
            .map(|name| format!("{}@{:x}", name, bound.as_ptr() as usize))
            .unwrap_or_else(|_| "python-receiver".to_string());
        Self { target, id }
    }
}

impl ManagedReceiver for PyReceiver {
    fn receiver_id(&self) -> String {
        self.id.clone()
    }

    fn resolve(&self) -> ResolvedMethods {
        Python::attach(|py| {
            let target = self.target.bind(py);
            let lookup = |name: &str| match target.getattr(name) {
                Ok(attr) if attr.is_callable() => Some(attr.unbind()),
                _ => {
                    tracing::debug!(receiver = %self.id, method = name, "python method not found");
                    None
                }
            };

            let mut methods = ResolvedMethods::default();
            if let Some(method) = lookup("on_video_frame") {
                methods.on_video_frame = Some(Arc::new(move |bytes: Vec<u8>| {
                    Python::attach(|py| {
                        let result = method.call1(py, (PyBytes::new(py, &bytes),));
                        delivered(py, "on_video_frame", result)
                    })
                }));
            }
            if let Some(method) = lookup("on_texture_frame") {
                methods.on_texture_frame = Some(Arc::new(
                    move |texture: TextureHandle, bytes: Vec<u8>, len: usize| {
                        Python::attach(|py| {
                            let result =
                                method.call1(py, (texture.0, PyBytes::new(py, &bytes), len));
                            delivered(py, "on_texture_frame", result)
                        })
                    },
                ));
            }
            if let Some(method) = lookup("on_error") {
                methods.on_error = Some(Arc::new(move |message: String| {
                    Python::attach(|py| {
                        let result = method.call1(py, (message,));
                        delivered(py, "on_error", result)
                    })
                }));
            }
            if let Some(method) = lookup("on_message") {
                methods.on_message = Some(Arc::new(move |bytes: Vec<u8>, len: usize| {
                    Python::attach(|py| {
                        let result = method.call1(py, (PyBytes::new(py, &bytes), len));
                        delivered(py, "on_message", result)
                    })
                }));
            }
            methods
        })
    }
}
