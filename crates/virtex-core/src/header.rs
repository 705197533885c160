//! Compressed image header.
//!
//! The source image starts with a fixed 16-byte header:
//!
//! | bytes  | field                               |
//! |--------|-------------------------------------|
//! | 0..4   | magic `13 AB A1 5C`                 |
//! | 4..7   | block dimensions x, y, z            |
//! | 7..10  | width, 24-bit little endian         |
//! | 10..13 | height, 24-bit little endian        |
//! | 13..16 | depth, 24-bit little endian         |
//!
//! Raw row-major compressed blocks follow immediately.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::format::{BlockGeometry, CompressedFormat};

/// On-disk header layout.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
struct RawHeader {
    magic: [u8; 4],
    block_x: u8,
    block_y: u8,
    block_z: u8,
    x_size: [u8; 3],
    y_size: [u8; 3],
    z_size: [u8; 3],
}

#[inline]
const fn read_u24(bytes: [u8; 3]) -> u32 {
    bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16
}

#[inline]
const fn write_u24(value: u32) -> [u8; 3] {
    [value as u8, (value >> 8) as u8, (value >> 16) as u8]
}

/// Parsed image header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressedImageHeader {
    /// Block width in texels.
    pub block_x: u8,
    /// Block height in texels.
    pub block_y: u8,
    /// Block depth in texels.
    pub block_z: u8,
    /// Image width in texels.
    pub width: u32,
    /// Image height in texels.
    pub height: u32,
    /// Image depth in texels.
    pub depth: u32,
}

impl CompressedImageHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 16;
    /// ASTC file magic.
    pub const MAGIC: [u8; 4] = [0x13, 0xAB, 0xA1, 0x5C];

    /// Create a 2D header for the given block size and extent.
    pub const fn new(block_x: u8, block_y: u8, width: u32, height: u32) -> Self {
        Self {
            block_x,
            block_y,
            block_z: 1,
            width,
            height,
            depth: 1,
        }
    }

    /// Parse the header at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw_bytes = bytes.get(..Self::SIZE).ok_or(Error::Truncated {
            expected: Self::SIZE as u64,
            actual: bytes.len() as u64,
        })?;
        let raw: &RawHeader = bytemuck::from_bytes(raw_bytes);

        if raw.magic != Self::MAGIC {
            return Err(Error::BadMagic(raw.magic));
        }

        let header = Self {
            block_x: raw.block_x,
            block_y: raw.block_y,
            block_z: raw.block_z,
            width: read_u24(raw.x_size),
            height: read_u24(raw.y_size),
            depth: read_u24(raw.z_size),
        };

        if header.depth != 1 {
            return Err(Error::UnsupportedDepth(header.depth));
        }

        Ok(header)
    }

    /// Serialize to the on-disk layout.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let raw = RawHeader {
            magic: Self::MAGIC,
            block_x: self.block_x,
            block_y: self.block_y,
            block_z: self.block_z,
            x_size: write_u24(self.width),
            y_size: write_u24(self.height),
            z_size: write_u24(self.depth),
        };
        bytemuck::cast(raw)
    }

    /// Compressed format matching the header's block dimensions.
    pub fn format(&self) -> Result<CompressedFormat> {
        if self.block_z != 1 {
            return Err(self.unknown_block());
        }
        CompressedFormat::astc(self.block_x, self.block_y).ok_or_else(|| self.unknown_block())
    }

    /// Block geometry of the payload.
    pub fn block(&self) -> Result<BlockGeometry> {
        self.format().map(CompressedFormat::block)
    }

    /// Expected payload length in bytes.
    pub fn payload_len(&self) -> Result<u64> {
        Ok(self.block()?.payload_bytes(self.width, self.height))
    }

    /// Byte pitch of one block row of the payload.
    pub fn row_pitch(&self) -> Result<usize> {
        Ok(self.block()?.row_pitch(self.width))
    }

    fn unknown_block(&self) -> Error {
        Error::UnknownBlockSize {
            x: self.block_x,
            y: self.block_y,
            z: self.block_z,
        }
    }
}

/// A validated header plus the compressed payload that follows it.
#[derive(Clone, Copy, Debug)]
pub struct CompressedImage<'a> {
    pub header: CompressedImageHeader,
    pub format: CompressedFormat,
    pub payload: &'a [u8],
}

impl<'a> CompressedImage<'a> {
    /// Parse and validate a whole image.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let header = CompressedImageHeader::parse(bytes)?;
        let format = header.format()?;
        let payload = &bytes[CompressedImageHeader::SIZE..];

        let expected = header.payload_len()?;
        if (payload.len() as u64) < expected {
            return Err(Error::Truncated {
                expected: expected + CompressedImageHeader::SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        Ok(Self {
            header,
            format,
            payload,
        })
    }

    /// Block geometry of the payload.
    pub fn block(&self) -> BlockGeometry {
        self.format.block()
    }

    /// Byte pitch of one block row of the payload.
    pub fn row_pitch(&self) -> usize {
        self.block().row_pitch(self.header.width)
    }

    /// Image width in texels.
    pub fn width(&self) -> u32 {
        self.header.width
    }

    /// Image height in texels.
    pub fn height(&self) -> u32 {
        self.header.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_bytes(header: CompressedImageHeader, payload_len: usize) -> Vec<u8> {
        let mut bytes = header.to_bytes().to_vec();
        bytes.resize(CompressedImageHeader::SIZE + payload_len, 0xAA);
        bytes
    }

    #[test]
    fn header_roundtrip() {
        let header = CompressedImageHeader::new(8, 8, 0x01_02_03, 512);
        let parsed = CompressedImageHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.width, 0x01_02_03);
    }

    #[test]
    fn dimensions_are_little_endian_24_bit() {
        let mut bytes = CompressedImageHeader::new(8, 8, 0, 0).to_bytes();
        bytes[7..10].copy_from_slice(&[0x00, 0x02, 0x00]);
        bytes[10..13].copy_from_slice(&[0x01, 0x00, 0x01]);
        let header = CompressedImageHeader::parse(&bytes).unwrap();
        assert_eq!(header.width, 512);
        assert_eq!(header.height, 65_537);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = CompressedImageHeader::new(8, 8, 64, 64).to_bytes();
        bytes[0] = 0;
        assert!(matches!(
            CompressedImageHeader::parse(&bytes),
            Err(Error::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_volume_images() {
        let mut header = CompressedImageHeader::new(8, 8, 64, 64);
        header.depth = 4;
        assert!(matches!(
            CompressedImageHeader::parse(&header.to_bytes()),
            Err(Error::UnsupportedDepth(4))
        ));
    }

    #[test]
    fn rejects_short_header() {
        assert!(matches!(
            CompressedImageHeader::parse(&[0x13, 0xAB]),
            Err(Error::Truncated { expected: 16, .. })
        ));
    }

    #[test]
    fn image_requires_full_payload() {
        let header = CompressedImageHeader::new(8, 8, 64, 64);
        // 8 x 8 blocks of 16 bytes
        let full = image_bytes(header, 8 * 8 * 16);
        let image = CompressedImage::parse(&full).unwrap();
        assert_eq!(image.format, CompressedFormat::Astc8x8Unorm);
        assert_eq!(image.row_pitch(), 8 * 16);

        let short = image_bytes(header, 8 * 8 * 16 - 1);
        assert!(matches!(
            CompressedImage::parse(&short),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn unknown_block_size() {
        let header = CompressedImageHeader::new(7, 3, 64, 64);
        assert!(matches!(
            header.format(),
            Err(Error::UnknownBlockSize { x: 7, y: 3, z: 1 })
        ));
    }
}
