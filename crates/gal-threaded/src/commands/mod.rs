//! The command catalogue.
//!
//! One plain-data struct per operation. Adding an operation means adding a
//! struct with a [`GalCommand`] impl here and registering it below; the ring
//! and the consumer loop do not change.

mod buffer;
mod renderer;
mod texture;
mod window;

pub use buffer::{BufferDispose, BufferGetData, BufferSetData, ClearBuffer, CopyBuffer, CreateBuffer};
pub use renderer::{
    Action, Barrier, BoxedAction, CreateSync, Draw, DrawIndexed, GetCapabilities, PreFrame,
    SetIndexBuffer, SetVertexBuffers,
};
pub use texture::{CreateTexture, TextureCopyTo, TextureGetData, TextureRelease, TextureSetData};
pub use window::WindowPresent;

use crate::dispatch::CommandTable;

pub(crate) fn register_all(table: &mut CommandTable) {
    table
        .register::<Action>()
        .register::<CreateBuffer>()
        .register::<BufferDispose>()
        .register::<BufferSetData>()
        .register::<BufferGetData>()
        .register::<CopyBuffer>()
        .register::<ClearBuffer>()
        .register::<CreateSync>()
        .register::<CreateTexture>()
        .register::<TextureSetData>()
        .register::<TextureGetData>()
        .register::<TextureCopyTo>()
        .register::<TextureRelease>()
        .register::<GetCapabilities>()
        .register::<PreFrame>()
        .register::<Draw>()
        .register::<DrawIndexed>()
        .register::<SetVertexBuffers>()
        .register::<SetIndexBuffer>()
        .register::<Barrier>()
        .register::<WindowPresent>();
}

/// Size of every catalogued command, for layout checks.
#[cfg(test)]
pub(crate) fn command_sizes() -> Vec<(crate::dispatch::CommandType, usize)> {
    fn entry<C: crate::dispatch::GalCommand>() -> (crate::dispatch::CommandType, usize) {
        (C::COMMAND_TYPE, core::mem::size_of::<C>())
    }
    vec![
        entry::<Action>(),
        entry::<CreateBuffer>(),
        entry::<BufferDispose>(),
        entry::<BufferSetData>(),
        entry::<BufferGetData>(),
        entry::<CopyBuffer>(),
        entry::<ClearBuffer>(),
        entry::<CreateSync>(),
        entry::<CreateTexture>(),
        entry::<TextureSetData>(),
        entry::<TextureGetData>(),
        entry::<TextureCopyTo>(),
        entry::<TextureRelease>(),
        entry::<GetCapabilities>(),
        entry::<PreFrame>(),
        entry::<Draw>(),
        entry::<DrawIndexed>(),
        entry::<SetVertexBuffers>(),
        entry::<SetIndexBuffer>(),
        entry::<Barrier>(),
        entry::<WindowPresent>(),
    ]
}
