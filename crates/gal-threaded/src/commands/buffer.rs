use bytemuck::{Pod, Zeroable};
use gal::{BackendError, BufferHandle};

use crate::dispatch::{CommandType, ExecContext, GalCommand};
use crate::ref_table::TableRef;
use crate::result_box::ResultBox;
use crate::span_pool::SpanRef;
use std::sync::Arc;

pub(crate) type BufferDataResult = Arc<ResultBox<Result<Vec<u8>, BackendError>>>;

/// Create the backend buffer behind a freshly minted virtual handle.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateBuffer {
    pub buffer: BufferHandle,
    pub size: u64,
}

impl GalCommand for CreateBuffer {
    const COMMAND_TYPE: CommandType = CommandType::CreateBuffer;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let real = match ctx.renderer.create_buffer(self.size) {
            Ok(real) => real,
            Err(err) => {
                tracing::warn!(buffer = self.buffer.0, size = self.size, %err, "buffer creation failed");
                BufferHandle::NULL
            }
        };
        ctx.buffers.assign(self.buffer, real);
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferDispose {
    pub buffer: BufferHandle,
}

impl GalCommand for BufferDispose {
    const COMMAND_TYPE: CommandType = CommandType::BufferDispose;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let real = ctx.buffers.unassign(self.buffer);
        if !real.is_null() {
            ctx.renderer.delete_buffer(real);
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferSetData {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub data: SpanRef,
}

impl GalCommand for BufferSetData {
    const COMMAND_TYPE: CommandType = CommandType::BufferSetData;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let data = ctx.spans.take(self.data);
        let real = ctx.buffers.map(self.buffer);
        if real.is_null() {
            tracing::debug!(buffer = self.buffer.0, "set_data on a missing buffer ignored");
            return;
        }
        if let Err(err) = ctx.renderer.set_buffer_data(real, self.offset, &data) {
            tracing::warn!(buffer = self.buffer.0, offset = self.offset, %err, "buffer upload failed");
        }
    }
}

/// Read back buffer contents. Always submitted as an invoke.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferGetData {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub result: TableRef,
}

impl GalCommand for BufferGetData {
    const COMMAND_TYPE: CommandType = CommandType::BufferGetData;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let result: BufferDataResult = ctx.refs.pop(self.result);
        let real = ctx.buffers.map(self.buffer);
        if real.is_null() {
            result.set(Err(BackendError::InvalidResource));
        } else {
            result.set(ctx.renderer.get_buffer_data(real, self.offset, self.size));
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CopyBuffer {
    pub source: BufferHandle,
    pub destination: BufferHandle,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl GalCommand for CopyBuffer {
    const COMMAND_TYPE: CommandType = CommandType::CopyBuffer;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let source = ctx.buffers.map(self.source);
        let destination = ctx.buffers.map(self.destination);
        if source.is_null() || destination.is_null() {
            tracing::debug!(
                source = self.source.0,
                destination = self.destination.0,
                "copy involving a missing buffer ignored"
            );
            return;
        }
        if let Err(err) = ctx.renderer.copy_buffer(
            source,
            destination,
            self.src_offset,
            self.dst_offset,
            self.size,
        ) {
            tracing::warn!(%err, "buffer copy failed");
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ClearBuffer {
    pub destination: BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub value: u32,
    pub _reserved: u32,
}

impl GalCommand for ClearBuffer {
    const COMMAND_TYPE: CommandType = CommandType::ClearBuffer;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let destination = ctx.buffers.map(self.destination);
        if destination.is_null() {
            return;
        }
        if let Err(err) =
            ctx.renderer
                .clear_buffer(destination, self.offset, self.size, self.value)
        {
            tracing::warn!(%err, "buffer clear failed");
        }
    }
}
