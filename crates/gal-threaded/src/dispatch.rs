//! Command slot encoding and the tag -> execute function table.
//!
//! A command is a `#[repr(C)]` plain-data struct. It is copied byte-for-byte
//! into a ring slot and the slot's last byte is stamped with its
//! [`CommandType`] tag. The backend thread reads the tag, looks up the
//! execute function registered for it and decodes the struct back out.

use core::mem::size_of;

use bytemuck::Pod;
use gal::Renderer;

use crate::handle_map::{BufferMap, SyncMap};
use crate::ref_table::RefConsumer;
use crate::span_pool::{align_up, SpanConsumer};
use crate::stats::GalStats;
use crate::sync::Event;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandType {
    Action,
    CreateBuffer,
    BufferDispose,
    BufferSetData,
    BufferGetData,
    CopyBuffer,
    ClearBuffer,
    CreateSync,
    CreateTexture,
    TextureSetData,
    TextureGetData,
    TextureCopyTo,
    TextureRelease,
    GetCapabilities,
    PreFrame,
    Draw,
    DrawIndexed,
    SetVertexBuffers,
    SetIndexBuffer,
    Barrier,
    WindowPresent,
}

impl CommandType {
    pub const ALL: [CommandType; 21] = [
        Self::Action,
        Self::CreateBuffer,
        Self::BufferDispose,
        Self::BufferSetData,
        Self::BufferGetData,
        Self::CopyBuffer,
        Self::ClearBuffer,
        Self::CreateSync,
        Self::CreateTexture,
        Self::TextureSetData,
        Self::TextureGetData,
        Self::TextureCopyTo,
        Self::TextureRelease,
        Self::GetCapabilities,
        Self::PreFrame,
        Self::Draw,
        Self::DrawIndexed,
        Self::SetVertexBuffers,
        Self::SetIndexBuffer,
        Self::Barrier,
        Self::WindowPresent,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }
}

/// Everything a command may touch while executing on the backend thread.
pub struct ExecContext<'a> {
    pub renderer: &'a dyn Renderer,
    pub refs: &'a mut RefConsumer,
    pub spans: &'a mut SpanConsumer,
    pub buffers: &'a BufferMap,
    pub sync: &'a SyncMap,
    pub frame_gate: &'a Event,
    pub stats: &'a GalStats,
}

/// A command that can travel through the ring.
///
/// Every reference or span a command carries must be consumed by `execute`,
/// even when the command ends up doing nothing, or later commands will pop
/// the wrong entries.
pub trait GalCommand: Pod {
    const COMMAND_TYPE: CommandType;

    fn execute(self, ctx: &mut ExecContext<'_>);
}

pub type ExecuteFn = fn(&[u8], &mut ExecContext<'_>);

fn execute_slot<C: GalCommand>(slot: &[u8], ctx: &mut ExecContext<'_>) {
    let command: C = bytemuck::pod_read_unaligned(&slot[..size_of::<C>()]);
    command.execute(ctx);
}

/// Write `command` and its tag into `slot`.
///
/// Panics if the command does not fit, i.e. the slot came from a ring sized
/// for a table that does not register `C`.
pub fn encode<C: GalCommand>(slot: &mut [u8], command: &C) {
    let bytes = bytemuck::bytes_of(command);
    assert!(
        bytes.len() < slot.len(),
        "{:?} ({} bytes) does not fit in a {}-byte slot",
        C::COMMAND_TYPE,
        bytes.len(),
        slot.len()
    );
    slot[..bytes.len()].copy_from_slice(bytes);
    let tag = slot.len() - 1;
    slot[tag] = C::COMMAND_TYPE.tag();
}

/// Registry of execute functions, built once per engine.
pub struct CommandTable {
    entries: [Option<ExecuteFn>; CommandType::COUNT],
    max_command_size: usize,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    /// An empty table. Mostly useful for tests; engines use
    /// [`CommandTable::standard`].
    pub fn new() -> Self {
        Self {
            entries: [None; CommandType::COUNT],
            max_command_size: 0,
        }
    }

    /// A table with the whole command catalogue registered.
    pub fn standard() -> Self {
        let mut table = Self::new();
        crate::commands::register_all(&mut table);
        table
    }

    pub fn register<C: GalCommand>(&mut self) -> &mut Self {
        self.entries[C::COMMAND_TYPE as usize] = Some(execute_slot::<C>);
        self.max_command_size = self.max_command_size.max(size_of::<C>());
        self
    }

    pub fn is_registered(&self, command_type: CommandType) -> bool {
        self.entries[command_type as usize].is_some()
    }

    /// Largest registered command, rounded up to a word, plus the tag byte.
    pub fn slot_size(&self) -> usize {
        align_up(self.max_command_size as u64, size_of::<u64>() as u64) as usize + 1
    }

    /// Execute the command held in `slot`.
    ///
    /// Panics on a tag with no registered function; the slot is corrupt.
    pub fn dispatch(&self, slot: &[u8], ctx: &mut ExecContext<'_>) {
        let tag = slot[slot.len() - 1];
        match self.entries.get(tag as usize).copied().flatten() {
            Some(execute) => execute(slot, ctx),
            None => panic!("no command registered for tag {tag}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CopyBuffer, Draw};
    use gal::BufferHandle;

    #[test]
    fn tags_round_trip() {
        for (i, ty) in CommandType::ALL.iter().enumerate() {
            assert_eq!(ty.tag() as usize, i);
            assert_eq!(CommandType::from_tag(ty.tag()), Some(*ty));
        }
        assert_eq!(CommandType::from_tag(CommandType::COUNT as u8), None);
    }

    #[test]
    fn standard_table_registers_every_command() {
        let table = CommandTable::standard();
        for ty in CommandType::ALL {
            assert!(table.is_registered(ty), "{ty:?} is not registered");
        }
        // CopyBuffer is the largest command: five u64 fields.
        assert_eq!(table.slot_size(), 41);
    }

    #[test]
    fn slot_size_tracks_largest_registration() {
        let mut table = CommandTable::new();
        assert_eq!(table.slot_size(), 1);
        table.register::<Draw>();
        assert_eq!(table.slot_size(), 16 + 1);
        table.register::<CopyBuffer>();
        assert_eq!(table.slot_size(), 40 + 1);
    }

    #[test]
    fn encode_places_tag_in_last_byte() {
        let mut slot = vec![0xFFu8; 41];
        let command = CopyBuffer {
            source: BufferHandle(1),
            destination: BufferHandle(2),
            src_offset: 3,
            dst_offset: 4,
            size: 5,
        };
        encode(&mut slot, &command);
        assert_eq!(slot[40], CommandType::CopyBuffer.tag());
        let decoded: CopyBuffer = bytemuck::pod_read_unaligned(&slot[..40]);
        assert_eq!(decoded, command);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn encode_rejects_undersized_slot() {
        let mut slot = vec![0u8; 16];
        encode(
            &mut slot,
            &Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
        );
    }
}
