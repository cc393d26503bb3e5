//! Backend abstraction.
//!
//! A backend is owned by exactly one thread (the backend/consumer thread) for
//! its whole life. It is `Send` so it can be moved there, but it does not have
//! to be `Sync`: all methods take `&self` and implementations are expected to
//! use interior mutability that is only ever touched from that thread.

use crate::error::BackendError;
use crate::types::{
    BufferHandle, BufferRange, Capabilities, IndexType, TextureCreateInfo, VertexBufferDescriptor,
};

pub trait Texture: Send + Sync {
    fn info(&self) -> TextureCreateInfo;
    fn set_data(&self, data: &[u8]) -> Result<(), BackendError>;
    fn get_data(&self) -> Result<Vec<u8>, BackendError>;
    fn copy_to(&self, destination: &dyn Texture) -> Result<(), BackendError>;
    fn release(&self);
}

pub trait Renderer: Send {
    /// Creation is synchronous: the returned handle is usable immediately.
    fn create_buffer(&self, size: u64) -> Result<BufferHandle, BackendError>;
    fn delete_buffer(&self, buffer: BufferHandle);
    fn set_buffer_data(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;
    fn get_buffer_data(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, BackendError>;
    fn copy_buffer(
        &self,
        source: BufferHandle,
        destination: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), BackendError>;
    fn clear_buffer(
        &self,
        destination: BufferHandle,
        offset: u64,
        size: u64,
        value: u32,
    ) -> Result<(), BackendError>;

    fn create_texture(&self, info: &TextureCreateInfo) -> Result<Box<dyn Texture>, BackendError>;

    fn create_sync(&self, id: u64, strict: bool);
    fn wait_sync(&self, id: u64);

    fn capabilities(&self) -> Capabilities;

    fn pre_frame(&self);
    fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        first_vertex: i32,
        first_instance: u32,
    );
    fn set_vertex_buffers(&self, buffers: &[VertexBufferDescriptor]);
    fn set_index_buffer(&self, buffer: BufferRange, index_type: IndexType);
    fn barrier(&self);

    fn present(&self, texture: Option<&dyn Texture>) -> Result<(), BackendError>;

    /// Whether this backend benefits from running behind the threaded engine.
    fn prefers_threading(&self) -> bool {
        false
    }

    /// Tear down backend state. Called once, on the backend thread, after the
    /// last command has executed.
    fn dispose(&self) {}
}
