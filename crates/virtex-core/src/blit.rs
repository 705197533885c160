//! Block copier.
//!
//! Repacks a rectangle of compressed blocks from one row pitch to another.
//! Data stays compressed; only whole blocks are moved, one contiguous run per
//! block row.

use glam::UVec2;

use crate::error::{Error, Result};
use crate::format::BlockGeometry;

/// Copy a block-aligned region from `src` into `dst`.
///
/// `src_origin` is the texel position of the region in the source surface and
/// must lie on a block boundary. `extent` is the region size in texels and
/// must be a whole number of blocks. Each destination block row starts at
/// `row * dst_pitch`.
///
/// Returns the number of blocks copied.
pub fn copy_blocks(
    src: &[u8],
    src_pitch: usize,
    src_origin: UVec2,
    dst: &mut [u8],
    dst_pitch: usize,
    block: BlockGeometry,
    extent: UVec2,
) -> Result<usize> {
    if !block.is_aligned(src_origin.x, src_origin.y) {
        return Err(Error::Misaligned(format!(
            "origin {src_origin} is not on a {}x{} block boundary",
            block.width, block.height
        )));
    }
    if !block.is_aligned(extent.x, extent.y) {
        return Err(Error::Misaligned(format!(
            "extent {extent} is not a multiple of {}x{} blocks",
            block.width, block.height
        )));
    }

    let cols = (extent.x / block.width) as usize;
    let rows = (extent.y / block.height) as usize;
    if cols == 0 || rows == 0 {
        return Ok(0);
    }

    let block_bytes = block.bytes();
    let run = cols * block_bytes;
    let src_col = (src_origin.x / block.width) as usize * block_bytes;
    let src_row = (src_origin.y / block.height) as usize;

    if src_col + run > src_pitch {
        return Err(Error::OutOfBounds(format!(
            "source run ends at byte {} of a {src_pitch} byte row",
            src_col + run
        )));
    }
    if run > dst_pitch {
        return Err(Error::InvalidGeometry(format!(
            "destination pitch {dst_pitch} is shorter than a {run} byte run"
        )));
    }

    let src_end = (src_row + rows - 1) * src_pitch + src_col + run;
    if src_end > src.len() {
        return Err(Error::OutOfBounds(format!(
            "source region ends at byte {src_end}, source holds {}",
            src.len()
        )));
    }
    let dst_end = (rows - 1) * dst_pitch + run;
    if dst_end > dst.len() {
        return Err(Error::OutOfBounds(format!(
            "destination region ends at byte {dst_end}, destination holds {}",
            dst.len()
        )));
    }

    for row in 0..rows {
        let src_start = (src_row + row) * src_pitch + src_col;
        let dst_start = row * dst_pitch;
        dst[dst_start..dst_start + run].copy_from_slice(&src[src_start..src_start + run]);
    }

    Ok(rows * cols)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: BlockGeometry = BlockGeometry::new(8, 8, 128);

    /// A 64x32 texel surface where every byte encodes its block coordinate.
    fn surface(width: u32, height: u32) -> (Vec<u8>, usize) {
        let pitch = BLOCK.row_pitch(width);
        let rows = BLOCK.blocks_y(height) as usize;
        let bytes = (0..pitch * rows)
            .map(|i| {
                let row = i / pitch;
                let col = (i % pitch) / BLOCK.bytes();
                (row * 31 + col * 7 + i % BLOCK.bytes()) as u8
            })
            .collect();
        (bytes, pitch)
    }

    fn reference_copy(
        src: &[u8],
        src_pitch: usize,
        origin: UVec2,
        dst_pitch: usize,
        extent: UVec2,
    ) -> Vec<u8> {
        let rows = (extent.y / BLOCK.height) as usize;
        let run = (extent.x / BLOCK.width) as usize * BLOCK.bytes();
        let mut out = vec![0u8; rows * dst_pitch];
        for row in 0..rows {
            let s = (origin.y / BLOCK.height) as usize + row;
            let start = s * src_pitch + (origin.x / BLOCK.width) as usize * BLOCK.bytes();
            out[row * dst_pitch..row * dst_pitch + run].copy_from_slice(&src[start..start + run]);
        }
        out
    }

    #[test]
    fn matches_reference_row_copy() {
        let (src, src_pitch) = surface(64, 32);
        for (origin, extent) in [
            (UVec2::new(0, 0), UVec2::new(64, 32)),
            (UVec2::new(8, 8), UVec2::new(16, 16)),
            (UVec2::new(56, 24), UVec2::new(8, 8)),
            (UVec2::new(16, 0), UVec2::new(48, 32)),
        ] {
            let dst_pitch = BLOCK.row_pitch(extent.x);
            let mut dst = vec![0u8; dst_pitch * BLOCK.blocks_y(extent.y) as usize];
            let copied =
                copy_blocks(&src, src_pitch, origin, &mut dst, dst_pitch, BLOCK, extent).unwrap();

            assert_eq!(copied, (extent.x / 8 * extent.y / 8) as usize);
            assert_eq!(dst, reference_copy(&src, src_pitch, origin, dst_pitch, extent));
        }
    }

    #[test]
    fn copy_back_restores_source() {
        let (src, pitch) = surface(64, 32);
        let origin = UVec2::new(16, 8);
        let extent = UVec2::new(32, 16);
        let tight = BLOCK.row_pitch(extent.x);

        let mut packed = vec![0u8; tight * 2];
        copy_blocks(&src, pitch, origin, &mut packed, tight, BLOCK, extent).unwrap();

        // Write the packed blocks back into a blank surface at the same origin.
        let mut restored = vec![0u8; src.len()];
        let offset = (origin.y / 8) as usize * pitch + (origin.x / 8) as usize * BLOCK.bytes();
        copy_blocks(
            &packed,
            tight,
            UVec2::ZERO,
            &mut restored[offset..],
            pitch,
            BLOCK,
            extent,
        )
        .unwrap();

        for row in 1..3 {
            let start = row * pitch + 2 * BLOCK.bytes();
            let end = start + tight;
            assert_eq!(restored[start..end], src[start..end]);
        }
    }

    #[test]
    fn wider_destination_pitch_leaves_padding() {
        let (src, pitch) = surface(64, 32);
        let extent = UVec2::new(16, 16);
        let dst_pitch = 64;
        let mut dst = vec![0xEEu8; dst_pitch * 2];
        copy_blocks(&src, pitch, UVec2::ZERO, &mut dst, dst_pitch, BLOCK, extent).unwrap();
        assert!(dst[32..64].iter().all(|&b| b == 0xEE));
        assert_eq!(dst[64..96], src[pitch..pitch + 32]);
    }

    #[test]
    fn rejects_unaligned_regions() {
        let (src, pitch) = surface(64, 32);
        let mut dst = vec![0u8; 4096];
        let result = copy_blocks(
            &src,
            pitch,
            UVec2::new(4, 0),
            &mut dst,
            256,
            BLOCK,
            UVec2::new(8, 8),
        );
        assert!(matches!(result, Err(Error::Misaligned(_))));

        let result = copy_blocks(
            &src,
            pitch,
            UVec2::ZERO,
            &mut dst,
            256,
            BLOCK,
            UVec2::new(12, 8),
        );
        assert!(matches!(result, Err(Error::Misaligned(_))));
    }

    #[test]
    fn rejects_out_of_bounds_regions() {
        let (src, pitch) = surface(64, 32);
        let mut dst = vec![0u8; 4096];
        let past_right = copy_blocks(
            &src,
            pitch,
            UVec2::new(56, 0),
            &mut dst,
            256,
            BLOCK,
            UVec2::new(16, 8),
        );
        assert!(matches!(past_right, Err(Error::OutOfBounds(_))));

        let past_bottom = copy_blocks(
            &src,
            pitch,
            UVec2::new(0, 24),
            &mut dst,
            256,
            BLOCK,
            UVec2::new(8, 16),
        );
        assert!(matches!(past_bottom, Err(Error::OutOfBounds(_))));

        let mut small = vec![0u8; 16];
        let short_dst = copy_blocks(
            &src,
            pitch,
            UVec2::ZERO,
            &mut small,
            16,
            BLOCK,
            UVec2::new(8, 16),
        );
        assert!(matches!(short_dst, Err(Error::OutOfBounds(_))));
    }

    #[test]
    fn empty_region_copies_nothing() {
        let (src, pitch) = surface(64, 32);
        let mut dst = Vec::new();
        let copied =
            copy_blocks(&src, pitch, UVec2::ZERO, &mut dst, 0, BLOCK, UVec2::ZERO).unwrap();
        assert_eq!(copied, 0);
    }
}
