use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::dispatch::{CommandType, ExecContext, GalCommand};
use crate::ref_table::TableRef;
use crate::texture::ThreadedTexture;

/// Present a frame. Opens the frame gate for the producer's next present
/// before handing the frame to the backend.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WindowPresent {
    pub texture: TableRef,
}

impl GalCommand for WindowPresent {
    const COMMAND_TYPE: CommandType = CommandType::WindowPresent;

    fn execute(self, ctx: &mut ExecContext<'_>) {
        let texture: Option<Arc<ThreadedTexture>> = ctx.refs.pop(self.texture);
        ctx.frame_gate.set();
        ctx.stats.inc_frames_presented();

        let base = texture.as_deref().and_then(ThreadedTexture::base);
        if let Err(err) = ctx.renderer.present(base) {
            tracing::warn!(%err, "present failed");
        }
    }
}
