//! Backend-agnostic resource handles and descriptors.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// Handle to a backend buffer.
///
/// Handles produced by a backend are backend-native. Handles produced by the
/// threaded engine are virtual and are mapped to backend-native handles on the
/// backend thread.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// "No resource".
    pub const NULL: Self = Self(0);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// A byte range of a buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BufferRange {
    pub handle: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    pub fn new(handle: BufferHandle, offset: u64, size: u64) -> Self {
        Self {
            handle,
            offset,
            size,
        }
    }

    /// Same range, different buffer.
    pub fn with_handle(self, handle: BufferHandle) -> Self {
        Self { handle, ..self }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexBufferDescriptor {
    pub buffer: BufferRange,
    pub stride: u32,
    pub divisor: u32,
}

/// Index element width.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    UByte = 0,
    UShort = 1,
    UInt = 2,
}

impl IndexType {
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::UByte),
            1 => Some(Self::UShort),
            2 => Some(Self::UInt),
            _ => None,
        }
    }

    pub fn size_bytes(self) -> u32 {
        match self {
            Self::UByte => 1,
            Self::UShort => 2,
            Self::UInt => 4,
        }
    }
}

/// Parameters for creating a texture.
///
/// `format` is an opaque backend format id; only `bytes_per_pixel` is needed
/// to size the backing storage.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct TextureCreateInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub levels: u32,
    pub bytes_per_pixel: u32,
    pub format: u32,
}

impl TextureCreateInfo {
    pub fn new_2d(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
            levels: 1,
            bytes_per_pixel,
            format: 0,
        }
    }

    /// Size of the top mip level in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth.max(1) as u64 * self.bytes_per_pixel as u64
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u32 {
        const ASTC_COMPRESSION = 1 << 0;
        const BGRA_FORMATS = 1 << 1;
        const INDIRECT_DRAW = 1 << 2;
        const GEOMETRY_SHADER = 1 << 3;
        const NON_CONSTANT_TEXTURE_OFFSET = 1 << 4;
        const VIEWPORT_SWIZZLE = 1 << 5;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub vendor_name: String,
    pub flags: CapabilityFlags,
    pub max_texture_size: u32,
    pub storage_buffer_offset_alignment: u32,
}
