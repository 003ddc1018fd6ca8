//! Per-frame delivery routing
//!
//! Mode and texture handle live in independent atomics. A reader may see a
//! mode change one frame before the matching texture change (or vice
//! versa), but never a half-written value of either.

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::receiver::ReceiverBinding;

/// How frames are handed to the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeliveryMode {
    /// `onVideoFrame(bytes)`
    #[default]
    RawBuffer = 0,
    /// `onTextureFrame(texture, bytes, length)`
    Texture = 1,
}

impl DeliveryMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DeliveryMode::Texture,
            _ => DeliveryMode::RawBuffer,
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::RawBuffer => write!(f, "raw_buffer"),
            DeliveryMode::Texture => write!(f, "texture"),
        }
    }
}

/// Opaque external texture identifier; zero means unset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextureHandle(pub i64);

impl TextureHandle {
    pub const UNSET: TextureHandle = TextureHandle(0);

    pub fn is_set(&self) -> bool {
        self.0 != 0
    }
}

impl From<i64> for TextureHandle {
    fn from(raw: i64) -> Self {
        TextureHandle(raw)
    }
}

/// Why a frame was not routed anywhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Texture mode selected but no texture handle set
    TextureUnset,
    /// No receiver bound, so no delivery method exists
    Unbound,
}

impl std::fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuppressReason::TextureUnset => write!(f, "texture mode without a texture handle"),
            SuppressReason::Unbound => write!(f, "no receiver bound"),
        }
    }
}

/// Routing decision for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTarget {
    RawBuffer,
    Texture(TextureHandle),
    Suppressed(SuppressReason),
}

/// Holds the mutable mode flag and texture handle
#[derive(Debug)]
pub struct ModeRouter {
    mode: AtomicU8,
    texture: AtomicI64,
}

impl ModeRouter {
    pub fn new(mode: DeliveryMode) -> Self {
        Self {
            mode: AtomicU8::new(mode as u8),
            texture: AtomicI64::new(TextureHandle::UNSET.0),
        }
    }

    pub fn set_mode(&self, mode: DeliveryMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    pub fn mode(&self) -> DeliveryMode {
        DeliveryMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_texture(&self, handle: TextureHandle) {
        self.texture.store(handle.0, Ordering::Release);
    }

    pub fn texture(&self) -> TextureHandle {
        TextureHandle(self.texture.load(Ordering::Acquire))
    }

    /// Decide where a frame goes given the current binding snapshot
    ///
    /// A binding is all-or-nothing, so its presence means every delivery
    /// method is resolved.
    pub fn route(&self, binding: Option<&ReceiverBinding>) -> DeliveryTarget {
        if binding.is_none() {
            return DeliveryTarget::Suppressed(SuppressReason::Unbound);
        }
        match self.mode() {
            DeliveryMode::RawBuffer => DeliveryTarget::RawBuffer,
            DeliveryMode::Texture => {
                let texture = self.texture();
                if texture.is_set() {
                    DeliveryTarget::Texture(texture)
                } else {
                    DeliveryTarget::Suppressed(SuppressReason::TextureUnset)
                }
            }
        }
    }
}

impl Default for ModeRouter {
    fn default() -> Self {
        Self::new(DeliveryMode::RawBuffer)
    }
}
