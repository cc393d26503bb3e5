//! Deterministic in-memory backend.
//!
//! Buffers and textures are plain byte vectors. Every call is appended to a
//! shared [`CallLog`] together with the calling thread, so tests can check both
//! execution order and thread confinement after the backend has been moved to
//! another thread.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::error::BackendError;
use crate::renderer::{Renderer, Texture};
use crate::types::{
    BufferHandle, BufferRange, Capabilities, CapabilityFlags, IndexType, TextureCreateInfo,
    VertexBufferDescriptor,
};

/// First handle value handed out by [`RecordingRenderer::create_buffer`].
///
/// Deliberately far away from small integers so backend-native handles are
/// easy to tell apart from virtual ones in test output.
pub const FIRST_BUFFER_HANDLE: u64 = 0x1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    CreateBuffer {
        handle: BufferHandle,
        size: u64,
    },
    DeleteBuffer {
        handle: BufferHandle,
    },
    SetBufferData {
        handle: BufferHandle,
        offset: u64,
        len: u64,
    },
    GetBufferData {
        handle: BufferHandle,
        offset: u64,
        size: u64,
    },
    CopyBuffer {
        source: BufferHandle,
        destination: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
    ClearBuffer {
        destination: BufferHandle,
        offset: u64,
        size: u64,
        value: u32,
    },
    CreateTexture {
        id: u64,
        info: TextureCreateInfo,
    },
    TextureSetData {
        id: u64,
        len: u64,
    },
    TextureGetData {
        id: u64,
    },
    TextureCopyTo {
        source: u64,
    },
    TextureRelease {
        id: u64,
    },
    CreateSync {
        id: u64,
        strict: bool,
    },
    WaitSync {
        id: u64,
    },
    Capabilities,
    PreFrame,
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        first_vertex: i32,
        first_instance: u32,
    },
    SetVertexBuffers(Vec<VertexBufferDescriptor>),
    SetIndexBuffer {
        buffer: BufferRange,
        index_type: IndexType,
    },
    Barrier,
    Present {
        texture: Option<TextureCreateInfo>,
    },
    Dispose,
}

#[derive(Debug, Default)]
struct LogState {
    calls: Vec<RecordedCall>,
    threads: HashSet<ThreadId>,
}

/// Shared, cloneable view of everything a [`RecordingRenderer`] has executed.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    inner: Arc<Mutex<LogState>>,
}

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        lock(&self.inner)
    }

    fn record(&self, call: RecordedCall) {
        let mut state = self.lock();
        state.calls.push(call);
        state.threads.insert(thread::current().id());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().calls.is_empty()
    }

    /// Every thread that has called into the backend.
    pub fn threads(&self) -> HashSet<ThreadId> {
        self.lock().threads.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn check_range(offset: u64, len: u64, size: u64) -> Result<(), BackendError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BackendError::OutOfBounds { offset, len, size }),
    }
}

struct SoftTexture {
    id: u64,
    info: TextureCreateInfo,
    data: Mutex<Vec<u8>>,
    released: AtomicBool,
    log: CallLog,
}

impl Texture for SoftTexture {
    fn info(&self) -> TextureCreateInfo {
        self.info
    }

    fn set_data(&self, data: &[u8]) -> Result<(), BackendError> {
        self.log.record(RecordedCall::TextureSetData {
            id: self.id,
            len: data.len() as u64,
        });
        if self.released.load(Ordering::Relaxed) {
            return Err(BackendError::InvalidResource);
        }
        let mut storage = lock(&self.data);
        check_range(0, data.len() as u64, storage.len() as u64)?;
        storage[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn get_data(&self) -> Result<Vec<u8>, BackendError> {
        self.log.record(RecordedCall::TextureGetData { id: self.id });
        if self.released.load(Ordering::Relaxed) {
            return Err(BackendError::InvalidResource);
        }
        Ok(lock(&self.data).clone())
    }

    fn copy_to(&self, destination: &dyn Texture) -> Result<(), BackendError> {
        self.log
            .record(RecordedCall::TextureCopyTo { source: self.id });
        let data = lock(&self.data).clone();
        destination.set_data(&data)
    }

    fn release(&self) {
        self.log.record(RecordedCall::TextureRelease { id: self.id });
        self.released.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct SoftState {
    buffers: HashMap<BufferHandle, Vec<u8>>,
    next_buffer: u64,
    next_texture: u64,
}

/// Software backend that records every call.
pub struct RecordingRenderer {
    state: Mutex<SoftState>,
    log: CallLog,
    capabilities: Capabilities,
    call_delay: Option<Duration>,
    prefers_threading: bool,
}

impl Default for RecordingRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SoftState {
                next_buffer: FIRST_BUFFER_HANDLE,
                next_texture: 1,
                ..SoftState::default()
            }),
            log: CallLog::default(),
            capabilities: Capabilities {
                vendor_name: "soft".to_owned(),
                flags: CapabilityFlags::BGRA_FORMATS | CapabilityFlags::INDIRECT_DRAW,
                max_texture_size: 16384,
                storage_buffer_offset_alignment: 16,
            },
            call_delay: None,
            prefers_threading: true,
        }
    }

    /// Sleep for `delay` inside every call, to simulate a slow backend.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_threading_preference(mut self, prefers_threading: bool) -> Self {
        self.prefers_threading = prefers_threading;
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn record(&self, call: RecordedCall) {
        if let Some(delay) = self.call_delay {
            thread::sleep(delay);
        }
        self.log.record(call);
    }

    fn state(&self) -> MutexGuard<'_, SoftState> {
        lock(&self.state)
    }
}

impl Renderer for RecordingRenderer {
    fn create_buffer(&self, size: u64) -> Result<BufferHandle, BackendError> {
        let len = usize::try_from(size).map_err(|_| BackendError::Unsupported("buffer size"))?;
        let handle = {
            let mut state = self.state();
            let handle = BufferHandle(state.next_buffer);
            state.next_buffer += 1;
            state.buffers.insert(handle, vec![0; len]);
            handle
        };
        self.record(RecordedCall::CreateBuffer { handle, size });
        Ok(handle)
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        self.record(RecordedCall::DeleteBuffer { handle: buffer });
        self.state().buffers.remove(&buffer);
    }

    fn set_buffer_data(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        self.record(RecordedCall::SetBufferData {
            handle: buffer,
            offset,
            len: data.len() as u64,
        });
        let mut state = self.state();
        let storage = state
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::InvalidResource)?;
        check_range(offset, data.len() as u64, storage.len() as u64)?;
        let start = offset as usize;
        storage[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn get_buffer_data(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, BackendError> {
        self.record(RecordedCall::GetBufferData {
            handle: buffer,
            offset,
            size,
        });
        let state = self.state();
        let storage = state
            .buffers
            .get(&buffer)
            .ok_or(BackendError::InvalidResource)?;
        check_range(offset, size, storage.len() as u64)?;
        Ok(storage[offset as usize..(offset + size) as usize].to_vec())
    }

    fn copy_buffer(
        &self,
        source: BufferHandle,
        destination: BufferHandle,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), BackendError> {
        self.record(RecordedCall::CopyBuffer {
            source,
            destination,
            src_offset,
            dst_offset,
            size,
        });
        let mut state = self.state();
        let data = {
            let src = state
                .buffers
                .get(&source)
                .ok_or(BackendError::InvalidResource)?;
            check_range(src_offset, size, src.len() as u64)?;
            src[src_offset as usize..(src_offset + size) as usize].to_vec()
        };
        let dst = state
            .buffers
            .get_mut(&destination)
            .ok_or(BackendError::InvalidResource)?;
        check_range(dst_offset, size, dst.len() as u64)?;
        dst[dst_offset as usize..(dst_offset + size) as usize].copy_from_slice(&data);
        Ok(())
    }

    fn clear_buffer(
        &self,
        destination: BufferHandle,
        offset: u64,
        size: u64,
        value: u32,
    ) -> Result<(), BackendError> {
        self.record(RecordedCall::ClearBuffer {
            destination,
            offset,
            size,
            value,
        });
        let mut state = self.state();
        let dst = state
            .buffers
            .get_mut(&destination)
            .ok_or(BackendError::InvalidResource)?;
        check_range(offset, size, dst.len() as u64)?;
        let pattern = value.to_le_bytes();
        for (i, byte) in dst[offset as usize..(offset + size) as usize]
            .iter_mut()
            .enumerate()
        {
            *byte = pattern[i % pattern.len()];
        }
        Ok(())
    }

    fn create_texture(&self, info: &TextureCreateInfo) -> Result<Box<dyn Texture>, BackendError> {
        if info.width == 0 || info.height == 0 {
            return Err(BackendError::InvalidState("zero-sized texture"));
        }
        let id = {
            let mut state = self.state();
            let id = state.next_texture;
            state.next_texture += 1;
            id
        };
        self.record(RecordedCall::CreateTexture { id, info: *info });
        let len = usize::try_from(info.size_bytes())
            .map_err(|_| BackendError::Unsupported("texture size"))?;
        Ok(Box::new(SoftTexture {
            id,
            info: *info,
            data: Mutex::new(vec![0; len]),
            released: AtomicBool::new(false),
            log: self.log.clone(),
        }))
    }

    fn create_sync(&self, id: u64, strict: bool) {
        self.record(RecordedCall::CreateSync { id, strict });
    }

    fn wait_sync(&self, id: u64) {
        self.record(RecordedCall::WaitSync { id });
    }

    fn capabilities(&self) -> Capabilities {
        self.record(RecordedCall::Capabilities);
        self.capabilities.clone()
    }

    fn pre_frame(&self) {
        self.record(RecordedCall::PreFrame);
    }

    fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.record(RecordedCall::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        first_vertex: i32,
        first_instance: u32,
    ) {
        self.record(RecordedCall::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            first_vertex,
            first_instance,
        });
    }

    fn set_vertex_buffers(&self, buffers: &[VertexBufferDescriptor]) {
        self.record(RecordedCall::SetVertexBuffers(buffers.to_vec()));
    }

    fn set_index_buffer(&self, buffer: BufferRange, index_type: IndexType) {
        self.record(RecordedCall::SetIndexBuffer { buffer, index_type });
    }

    fn barrier(&self) {
        self.record(RecordedCall::Barrier);
    }

    fn present(&self, texture: Option<&dyn Texture>) -> Result<(), BackendError> {
        self.record(RecordedCall::Present {
            texture: texture.map(|texture| texture.info()),
        });
        Ok(())
    }

    fn prefers_threading(&self) -> bool {
        self.prefers_threading
    }

    fn dispose(&self) {
        self.record(RecordedCall::Dispose);
        self.state().buffers.clear();
    }
}
