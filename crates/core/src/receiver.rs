//! Managed-side receiver and its resolved binding
//!
//! A receiver exposes four delivery methods. They are looked up once, at
//! bind time, into a [`ReceiverBinding`]; dispatch paths only ever invoke
//! the stored handles.

use std::sync::Arc;

use thiserror::Error;

use crate::router::TextureHandle;
use crate::{Error, Result};

/// Failure raised by a receiver's delivery method
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DeliveryError(String);

impl DeliveryError {
    pub fn new(msg: impl Into<String>) -> Self {
        DeliveryError(msg.into())
    }
}

pub type DeliveryResult = std::result::Result<(), DeliveryError>;

/// `onVideoFrame(bytes)`
pub type VideoFrameFn = Arc<dyn Fn(Vec<u8>) -> DeliveryResult + Send + Sync>;
/// `onTextureFrame(texture, bytes, length)`
pub type TextureFrameFn = Arc<dyn Fn(TextureHandle, Vec<u8>, usize) -> DeliveryResult + Send + Sync>;
/// `onError(message)`
pub type ErrorFn = Arc<dyn Fn(String) -> DeliveryResult + Send + Sync>;
/// `onMessage(bytes, length)`
pub type MessageFn = Arc<dyn Fn(Vec<u8>, usize) -> DeliveryResult + Send + Sync>;

/// The delivery methods every receiver must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
    VideoFrame,
    TextureFrame,
    Error,
    Message,
}

impl DeliveryMethod {
    pub const ALL: [DeliveryMethod; 4] = [
        DeliveryMethod::VideoFrame,
        DeliveryMethod::TextureFrame,
        DeliveryMethod::Error,
        DeliveryMethod::Message,
    ];

    /// Method name as seen by the managed side
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryMethod::VideoFrame => "onVideoFrame",
            DeliveryMethod::TextureFrame => "onTextureFrame",
            DeliveryMethod::Error => "onError",
            DeliveryMethod::Message => "onMessage",
        }
    }
}

/// Whatever a receiver could resolve; any `None` fails the bind
#[derive(Clone, Default)]
pub struct ResolvedMethods {
    pub on_video_frame: Option<VideoFrameFn>,
    pub on_texture_frame: Option<TextureFrameFn>,
    pub on_error: Option<ErrorFn>,
    pub on_message: Option<MessageFn>,
}

impl ResolvedMethods {
    fn missing(&self) -> Vec<&'static str> {
        DeliveryMethod::ALL
            .iter()
            .filter(|method| match method {
                DeliveryMethod::VideoFrame => self.on_video_frame.is_none(),
                DeliveryMethod::TextureFrame => self.on_texture_frame.is_none(),
                DeliveryMethod::Error => self.on_error.is_none(),
                DeliveryMethod::Message => self.on_message.is_none(),
            })
            .map(|method| method.name())
            .collect()
    }
}

/// A managed-side object that consumes frames, messages and errors
pub trait ManagedReceiver: Send + Sync {
    /// Stable identity used in logs
    fn receiver_id(&self) -> String;

    /// Look up the delivery methods. Called once per bind.
    fn resolve(&self) -> ResolvedMethods;
}

/// Fully resolved receiver: all four handles, or nothing
pub struct ReceiverBinding {
    receiver_id: String,
    on_video_frame: VideoFrameFn,
    on_texture_frame: TextureFrameFn,
    on_error: ErrorFn,
    on_message: MessageFn,
}

impl ReceiverBinding {
    /// Resolve a receiver, rejecting partial capability sets
    pub fn resolve(receiver: &dyn ManagedReceiver) -> Result<Self> {
        let receiver_id = receiver.receiver_id();
        let methods = receiver.resolve();
        let missing = methods.missing();
        match methods {
            ResolvedMethods {
                on_video_frame: Some(on_video_frame),
                on_texture_frame: Some(on_texture_frame),
                on_error: Some(on_error),
                on_message: Some(on_message),
            } => Ok(Self {
                receiver_id,
                on_video_frame,
                on_texture_frame,
                on_error,
                on_message,
            }),
            _ => Err(Error::BindingIncomplete {
                receiver: receiver_id,
                missing,
            }),
        }
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn deliver_video_frame(&self, bytes: Vec<u8>) -> DeliveryResult {
        (self.on_video_frame)(bytes)
    }

    pub fn deliver_texture_frame(&self, texture: TextureHandle, bytes: Vec<u8>) -> DeliveryResult {
        let len = bytes.len();
        (self.on_texture_frame)(texture, bytes, len)
    }

    pub fn deliver_error(&self, message: String) -> DeliveryResult {
        (self.on_error)(message)
    }

    pub fn deliver_message(&self, bytes: Vec<u8>) -> DeliveryResult {
        let len = bytes.len();
        (self.on_message)(bytes, len)
    }
}

impl std::fmt::Debug for ReceiverBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverBinding")
            .field("receiver_id", &self.receiver_id)
            .finish_non_exhaustive()
    }
}

/// Receiver built from Rust closures
///
/// ```
/// use p2pbridge_core::CallbackReceiver;
///
/// let receiver = CallbackReceiver::builder("preview")
///     .on_video_frame(|bytes| {
///         println!("frame of {} bytes", bytes.len());
///         Ok(())
///     })
///     .on_texture_frame(|_, _, _| Ok(()))
///     .on_error(|message| {
///         eprintln!("{message}");
///         Ok(())
///     })
///     .on_message(|_, _| Ok(()))
///     .build();
/// # let _ = receiver;
/// ```
#[derive(Clone)]
pub struct CallbackReceiver {
    id: String,
    methods: ResolvedMethods,
}

impl CallbackReceiver {
    pub fn builder(id: impl Into<String>) -> CallbackReceiverBuilder {
        CallbackReceiverBuilder {
            id: id.into(),
            methods: ResolvedMethods::default(),
        }
    }

    /// Receiver that accepts and discards everything
    pub fn noop(id: impl Into<String>) -> Self {
        Self::builder(id)
            .on_video_frame(|_| Ok(()))
            .on_texture_frame(|_, _, _| Ok(()))
            .on_error(|_| Ok(()))
            .on_message(|_, _| Ok(()))
            .build()
    }
}

impl ManagedReceiver for CallbackReceiver {
    fn receiver_id(&self) -> String {
        self.id.clone()
    }

    fn resolve(&self) -> ResolvedMethods {
        self.methods.clone()
    }
}

pub struct CallbackReceiverBuilder {
    id: String,
    methods: ResolvedMethods,
}

impl CallbackReceiverBuilder {
    pub fn on_video_frame<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<u8>) -> DeliveryResult + Send + Sync + 'static,
    {
        self.methods.on_video_frame = Some(Arc::new(f));
        self
    }

    pub fn on_texture_frame<F>(mut self, f: F) -> Self
    where
        F: Fn(TextureHandle, Vec<u8>, usize) -> DeliveryResult + Send + Sync + 'static,
    {
        self.methods.on_texture_frame = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(String) -> DeliveryResult + Send + Sync + 'static,
    {
        self.methods.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<u8>, usize) -> DeliveryResult + Send + Sync + 'static,
    {
        self.methods.on_message = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> CallbackReceiver {
        CallbackReceiver {
            id: self.id,
            methods: self.methods,
        }
    }
}
