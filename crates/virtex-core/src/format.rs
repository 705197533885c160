//! Compressed texture formats and their block geometry.

use glam::UVec2;

/// Size of one compressed block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockGeometry {
    /// Block width in texels.
    pub width: u32,
    /// Block height in texels.
    pub height: u32,
    /// Encoded block size in bits.
    pub bits: u32,
}

impl BlockGeometry {
    /// Create a new block geometry.
    #[inline]
    pub const fn new(width: u32, height: u32, bits: u32) -> Self {
        Self {
            width,
            height,
            bits,
        }
    }

    /// Encoded block size in bytes.
    #[inline]
    pub const fn bytes(self) -> usize {
        (self.bits / 8) as usize
    }

    /// Number of block columns covering `width` texels.
    #[inline]
    pub const fn blocks_x(self, width: u32) -> u32 {
        width.div_ceil(self.width)
    }

    /// Number of block rows covering `height` texels.
    #[inline]
    pub const fn blocks_y(self, height: u32) -> u32 {
        height.div_ceil(self.height)
    }

    /// Byte pitch of one block row spanning `width` texels.
    #[inline]
    pub const fn row_pitch(self, width: u32) -> usize {
        self.blocks_x(width) as usize * self.bytes()
    }

    /// Compressed payload size of a `width` x `height` region.
    #[inline]
    pub const fn payload_bytes(self, width: u32, height: u32) -> u64 {
        self.blocks_x(width) as u64 * self.blocks_y(height) as u64 * self.bytes() as u64
    }

    /// Whether a texel coordinate lies on a block boundary.
    #[inline]
    pub const fn is_aligned(self, x: u32, y: u32) -> bool {
        x % self.width == 0 && y % self.height == 0
    }

    /// Extent of the whole blocks covering `width` x `height` texels.
    ///
    /// Regions clamped to a texture edge may end mid-block.
    #[inline]
    pub const fn covering_extent(self, width: u32, height: u32) -> UVec2 {
        UVec2::new(
            self.blocks_x(width) * self.width,
            self.blocks_y(height) * self.height,
        )
    }
}

/// Block-compressed formats the pipeline can name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompressedFormat {
    Bc1RgbaUnorm,
    Bc3RgbaUnorm,
    Bc7RgbaUnorm,
    Etc2Rgba8Unorm,
    Astc4x4Unorm,
    Astc5x5Unorm,
    Astc6x6Unorm,
    Astc8x8Unorm,
    Astc10x10Unorm,
    Astc12x12Unorm,
}

impl CompressedFormat {
    /// Every known format, in enumeration order.
    pub const ALL: [Self; 10] = [
        Self::Bc1RgbaUnorm,
        Self::Bc3RgbaUnorm,
        Self::Bc7RgbaUnorm,
        Self::Etc2Rgba8Unorm,
        Self::Astc4x4Unorm,
        Self::Astc5x5Unorm,
        Self::Astc6x6Unorm,
        Self::Astc8x8Unorm,
        Self::Astc10x10Unorm,
        Self::Astc12x12Unorm,
    ];

    /// Block geometry of this format.
    pub const fn block(self) -> BlockGeometry {
        match self {
            Self::Bc1RgbaUnorm => BlockGeometry::new(4, 4, 64),
            Self::Bc3RgbaUnorm | Self::Bc7RgbaUnorm | Self::Etc2Rgba8Unorm => {
                BlockGeometry::new(4, 4, 128)
            }
            Self::Astc4x4Unorm => BlockGeometry::new(4, 4, 128),
            Self::Astc5x5Unorm => BlockGeometry::new(5, 5, 128),
            Self::Astc6x6Unorm => BlockGeometry::new(6, 6, 128),
            Self::Astc8x8Unorm => BlockGeometry::new(8, 8, 128),
            Self::Astc10x10Unorm => BlockGeometry::new(10, 10, 128),
            Self::Astc12x12Unorm => BlockGeometry::new(12, 12, 128),
        }
    }

    /// ASTC format for a header's block dimensions.
    pub const fn astc(block_x: u8, block_y: u8) -> Option<Self> {
        match (block_x, block_y) {
            (4, 4) => Some(Self::Astc4x4Unorm),
            (5, 5) => Some(Self::Astc5x5Unorm),
            (6, 6) => Some(Self::Astc6x6Unorm),
            (8, 8) => Some(Self::Astc8x8Unorm),
            (10, 10) => Some(Self::Astc10x10Unorm),
            (12, 12) => Some(Self::Astc12x12Unorm),
            _ => None,
        }
    }

    /// Short human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bc1RgbaUnorm => "BC1",
            Self::Bc3RgbaUnorm => "BC3",
            Self::Bc7RgbaUnorm => "BC7",
            Self::Etc2Rgba8Unorm => "ETC2_RGBA8",
            Self::Astc4x4Unorm => "ASTC_4x4",
            Self::Astc5x5Unorm => "ASTC_5x5",
            Self::Astc6x6Unorm => "ASTC_6x6",
            Self::Astc8x8Unorm => "ASTC_8x8",
            Self::Astc10x10Unorm => "ASTC_10x10",
            Self::Astc12x12Unorm => "ASTC_12x12",
        }
    }
}

impl std::fmt::Display for CompressedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
