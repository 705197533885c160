//! Synthetic compressed images.
//!
//! Every block carries its own block coordinates, so a test can tell exactly
//! which source block ended up where.

use std::io;
use std::path::Path;

use virtex_core::{BlockGeometry, CompressedFormat, CompressedImageHeader};

/// Bytes of the block at (`block_x`, `block_y`).
///
/// Bytes 0..4 hold `block_x` and bytes 4..8 hold `block_y`, little endian.
/// The rest is a fixed filler.
pub fn block_pattern(block_x: u32, block_y: u32, block_bytes: usize) -> Vec<u8> {
    let mut bytes = vec![0xA5; block_bytes];
    bytes[..4].copy_from_slice(&block_x.to_le_bytes());
    bytes[4..8].copy_from_slice(&block_y.to_le_bytes());
    bytes
}

/// A header plus a patterned payload.
#[derive(Clone, Debug)]
pub struct SyntheticImage {
    header: CompressedImageHeader,
    format: CompressedFormat,
    bytes: Vec<u8>,
}

impl SyntheticImage {
    /// Build an ASTC image of `width` x `height` texels.
    ///
    /// # Panics
    /// Panics if `format` is not an ASTC format.
    pub fn new(format: CompressedFormat, width: u32, height: u32) -> Self {
        let block = format.block();
        let header = CompressedImageHeader::new(block.width as u8, block.height as u8, width, height);
        assert_eq!(
            header.format().ok(),
            Some(format),
            "{format} cannot be described by an image header"
        );

        let mut bytes = header.to_bytes().to_vec();
        for by in 0..block.blocks_y(height) {
            for bx in 0..block.blocks_x(width) {
                bytes.extend(block_pattern(bx, by, block.bytes()));
            }
        }
        Self {
            header,
            format,
            bytes,
        }
    }

    pub const fn header(&self) -> &CompressedImageHeader {
        &self.header
    }

    pub const fn format(&self) -> CompressedFormat {
        self.format
    }

    pub const fn block(&self) -> BlockGeometry {
        self.format.block()
    }

    /// Header and payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Expected bytes of one source block.
    pub fn expected_block(&self, block_x: u32, block_y: u32) -> Vec<u8> {
        block_pattern(block_x, block_y, self.block().bytes())
    }

    /// Write the image to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, &self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtex_core::{CompressedImage, ImageSource, MappedImage};

    #[test]
    fn image_parses_back() {
        let image = SyntheticImage::new(CompressedFormat::Astc8x8Unorm, 64, 40);
        let parsed = CompressedImage::parse(image.bytes()).unwrap();
        assert_eq!(parsed.width(), 64);
        assert_eq!(parsed.height(), 40);
        assert_eq!(parsed.payload.len(), 8 * 5 * 16);

        let pitch = parsed.row_pitch();
        let start = 4 * pitch + 3 * 16;
        assert_eq!(&parsed.payload[start..start + 16], image.expected_block(3, 4));
    }

    #[test]
    fn image_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("synthetic.astc");
        let image = SyntheticImage::new(CompressedFormat::Astc4x4Unorm, 16, 16);
        image.write_to(&path).unwrap();

        let mapped = MappedImage::open(&path).unwrap();
        assert_eq!(mapped.bytes(), Some(image.bytes()));
        assert_eq!(mapped.image().unwrap().format, CompressedFormat::Astc4x4Unorm);
    }

    #[test]
    #[should_panic(expected = "cannot be described")]
    fn bc_formats_have_no_header() {
        let _ = SyntheticImage::new(CompressedFormat::Bc1RgbaUnorm, 16, 16);
    }
}
