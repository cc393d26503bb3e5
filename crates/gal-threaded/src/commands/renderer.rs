use bytemuck::{Pod, Zeroable};
use gal::{BufferRange, Capabilities, IndexType, Renderer, VertexBufferDescriptor};
use std::sync::Arc;

use crate::dispatch::{CommandType, ExecContext, GalCommand};
use crate::ref_table::TableRef;
use crate::result_box::ResultBox;
use crate::span_pool::SpanRef;

/// Closure run against the backend on its own thread.
pub type BoxedAction = Box<dyn FnOnce(&dyn Renderer) + Send>;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Action {
    pub action: TableRef,
}

impl GalCommand for Action {
    const COMMAND_TYPE: CommandType = CommandType::Action;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let action: BoxedAction = ctx.refs.pop(self.action);
        action(ctx.renderer);
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateSync {
    pub id: u64,
    pub strict: u32,
    pub _reserved: u32,
}

impl GalCommand for CreateSync {
    const COMMAND_TYPE: CommandType = CommandType::CreateSync;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        ctx.renderer.create_sync(self.id, self.strict != 0);
        ctx.sync.assign(self.id);
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct GetCapabilities {
    pub result: TableRef,
}

impl GalCommand for GetCapabilities {
    const COMMAND_TYPE: CommandType = CommandType::GetCapabilities;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let result: Arc<ResultBox<Capabilities>> = ctx.refs.pop(self.result);
        result.set(ctx.renderer.capabilities());
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreFrame;

// SAFETY: zero-sized, so every (empty) bit pattern is valid.
unsafe impl Zeroable for PreFrame {}
unsafe impl Pod for PreFrame {}

impl GalCommand for PreFrame {
    const COMMAND_TYPE: CommandType = CommandType::PreFrame;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        ctx.renderer.pre_frame();
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Draw {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl GalCommand for Draw {
    const COMMAND_TYPE: CommandType = CommandType::Draw;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        ctx.renderer.draw(
            self.vertex_count,
            self.instance_count,
            self.first_vertex,
            self.first_instance,
        );
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub first_vertex: i32,
    pub first_instance: u32,
}

impl GalCommand for DrawIndexed {
    const COMMAND_TYPE: CommandType = CommandType::DrawIndexed;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        ctx.renderer.draw_indexed(
            self.index_count,
            self.instance_count,
            self.first_index,
            self.first_vertex,
            self.first_instance,
        );
    }
}

/// Vertex buffer bindings. The span holds `VertexBufferDescriptor`s with
/// virtual handles, which are rewritten to backend handles in place.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct SetVertexBuffers {
    pub buffers: SpanRef,
}

impl GalCommand for SetVertexBuffers {
    const COMMAND_TYPE: CommandType = CommandType::SetVertexBuffers;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let mut data = ctx.spans.take(self.buffers);
        let descriptors = data.cast_mut::<VertexBufferDescriptor>();
        ctx.buffers.map_vertex_buffers(descriptors);
        ctx.renderer.set_vertex_buffers(descriptors);
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct SetIndexBuffer {
    pub buffer: BufferRange,
    pub index_type: u32,
    pub _reserved: u32,
}

impl GalCommand for SetIndexBuffer {
    const COMMAND_TYPE: CommandType = CommandType::SetIndexBuffer;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let index_type = IndexType::from_raw(self.index_type)
            .unwrap_or_else(|| panic!("invalid index type {}", self.index_type));
        ctx.renderer
            .set_index_buffer(ctx.buffers.map_range(self.buffer), index_type);
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Barrier;

// SAFETY: zero-sized, so every (empty) bit pattern is valid.
unsafe impl Zeroable for Barrier {}
unsafe impl Pod for Barrier {}

impl GalCommand for Barrier {
    const COMMAND_TYPE: CommandType = CommandType::Barrier;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        ctx.renderer.barrier();
    }
}
