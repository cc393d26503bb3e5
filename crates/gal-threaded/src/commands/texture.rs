use bytemuck::{Pod, Zeroable};
use gal::BackendError;
use std::sync::Arc;

use crate::dispatch::{CommandType, ExecContext, GalCommand};
use crate::ref_table::TableRef;
use crate::result_box::ResultBox;
use crate::span_pool::SpanRef;
use crate::texture::ThreadedTexture;

pub(crate) type TextureDataResult = Arc<ResultBox<Result<Vec<u8>, BackendError>>>;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateTexture {
    pub texture: TableRef,
}

impl GalCommand for CreateTexture {
    const COMMAND_TYPE: CommandType = CommandType::CreateTexture;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let texture: Arc<ThreadedTexture> = ctx.refs.pop(self.texture);
        match ctx.renderer.create_texture(&texture.info()) {
            Ok(base) => texture.set_base(base),
            Err(err) => tracing::warn!(info = ?texture.info(), %err, "texture creation failed"),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureSetData {
    pub texture: TableRef,
    pub data: SpanRef,
}

impl GalCommand for TextureSetData {
    const COMMAND_TYPE: CommandType = CommandType::TextureSetData;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let texture: Arc<ThreadedTexture> = ctx.refs.pop(self.texture);
        let data = ctx.spans.take(self.data);
        let Some(base) = texture.base() else {
            return;
        };
        if let Err(err) = base.set_data(&data) {
            tracing::warn!(%err, "texture upload failed");
        }
    }
}

/// Read back texture contents. Always submitted as an invoke.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureGetData {
    pub texture: TableRef,
    pub result: TableRef,
}

impl GalCommand for TextureGetData {
    const COMMAND_TYPE: CommandType = CommandType::TextureGetData;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let texture: Arc<ThreadedTexture> = ctx.refs.pop(self.texture);
        let result: TextureDataResult = ctx.refs.pop(self.result);
        result.set(match texture.base() {
            Some(base) => base.get_data(),
            None => Err(BackendError::InvalidResource),
        });
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureCopyTo {
    pub source: TableRef,
    pub destination: TableRef,
}

impl GalCommand for TextureCopyTo {
    const COMMAND_TYPE: CommandType = CommandType::TextureCopyTo;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let source: Arc<ThreadedTexture> = ctx.refs.pop(self.source);
        let destination: Arc<ThreadedTexture> = ctx.refs.pop(self.destination);
        if let (Some(source), Some(destination)) = (source.base(), destination.base()) {
            if let Err(err) = source.copy_to(destination) {
                tracing::warn!(%err, "texture copy failed");
            }
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureRelease {
    pub texture: TableRef,
}

impl GalCommand for TextureRelease {
    const COMMAND_TYPE: CommandType = CommandType::TextureRelease;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let texture: Arc<ThreadedTexture> = ctx.refs.pop(self.texture);
        if let Some(base) = texture.base() {
            base.release();
        }
    }
}
