use std::fmt;
use std::sync::OnceLock;

use gal::{Texture, TextureCreateInfo};

/// Producer-side stand-in for a backend texture.
///
/// Returned immediately by `ThreadedRenderer::create_texture`; the backend
/// texture behind it is created when the creation command executes. Until
/// then (or if creation failed) commands against it are no-ops.
pub struct ThreadedTexture {
    info: TextureCreateInfo,
    base: OnceLock<Box<dyn Texture>>,
}

impl ThreadedTexture {
    pub(crate) fn new(info: TextureCreateInfo) -> Self {
        Self {
            info,
            base: OnceLock::new(),
        }
    }

    pub fn info(&self) -> TextureCreateInfo {
        self.info
    }

    /// Whether the backend texture exists yet.
    pub fn is_created(&self) -> bool {
        self.base.get().is_some()
    }

    pub(crate) fn base(&self) -> Option<&dyn Texture> {
        self.base.get().map(|texture| texture.as_ref())
    }

    pub(crate) fn set_base(&self, texture: Box<dyn Texture>) {
        if self.base.set(texture).is_err() {
            panic!("backend texture created twice");
        }
    }
}

impl fmt::Debug for ThreadedTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedTexture")
            .field("info", &self.info)
            .field("created", &self.is_created())
            .finish()
    }
}
