//! `gal` is the graphics abstraction layer shared by every rendering backend.
//!
//! It only describes the contract between a producer of rendering work and a
//! backend that executes it:
//! - Resource handle newtypes and plain-data descriptors (see [`types`]).
//! - The [`Renderer`] and [`Texture`] traits implemented by backends.
//! - A deterministic in-memory backend used by tests and benches (see [`soft`]).
//!
//! Every descriptor that may travel through a serialized command stream is
//! `bytemuck::Pod`, so it can be copied into a fixed-size command slot
//! byte-for-byte.

mod error;
mod renderer;

pub mod soft;
pub mod types;

pub use error::BackendError;
pub use renderer::{Renderer, Texture};
pub use types::{
    BufferHandle, BufferRange, Capabilities, CapabilityFlags, IndexType, TextureCreateInfo,
    VertexBufferDescriptor,
};
