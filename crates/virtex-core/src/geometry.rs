//! Sparse page geometry and texel regions.

use glam::UVec2;

use crate::error::{Error, Result};
use crate::format::BlockGeometry;

/// A virtual page size reported by the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl PageSize {
    /// Create a new page size.
    #[inline]
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
}

/// Rectangle in texel coordinates of the base level (depth is always 1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TexelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TexelRegion {
    /// Create a new region.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Origin of the region.
    #[inline]
    pub const fn origin(self) -> UVec2 {
        UVec2::new(self.x, self.y)
    }

    /// Size of the region.
    #[inline]
    pub const fn extent(self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    /// Exclusive right edge, saturating at `u32::MAX`.
    #[inline]
    pub const fn right(self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge, saturating at `u32::MAX`.
    #[inline]
    pub const fn bottom(self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Whether the region covers no texels.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `other` lies entirely inside this region. Regions whose edges
    /// overflow `u32` are never contained.
    pub const fn contains(self, other: Self) -> bool {
        let (Some(right), Some(bottom)) = (
            other.x.checked_add(other.width),
            other.y.checked_add(other.height),
        ) else {
            return false;
        };
        other.x >= self.x && other.y >= self.y && right <= self.right() && bottom <= self.bottom()
    }
}

/// Page coordinate in the sparse page grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageCoord {
    pub x: u32,
    pub y: u32,
}

impl PageCoord {
    /// Create a new page coordinate.
    #[inline]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Page and block dimensions for one format at one page size index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageGeometry {
    pub page_width: u32,
    pub page_height: u32,
    pub page_depth: u32,
    pub block: BlockGeometry,
}

impl PageGeometry {
    /// Build a geometry, checking that pages hold whole blocks.
    pub fn new(page: PageSize, block: BlockGeometry) -> Result<Self> {
        if page.width == 0 || page.height == 0 || page.depth == 0 {
            return Err(Error::InvalidGeometry(format!("empty page {page:?}")));
        }
        if block.width == 0 || block.height == 0 || block.bits % 8 != 0 {
            return Err(Error::InvalidGeometry(format!("bad block {block:?}")));
        }
        if page.width % block.width != 0 || page.height % block.height != 0 {
            return Err(Error::InvalidGeometry(format!(
                "page {}x{} is not a multiple of block {}x{}",
                page.width, page.height, block.width, block.height
            )));
        }

        Ok(Self {
            page_width: page.width,
            page_height: page.height,
            page_depth: page.depth,
            block,
        })
    }

    /// Page extent in texels.
    #[inline]
    pub const fn page_extent(&self) -> UVec2 {
        UVec2::new(self.page_width, self.page_height)
    }

    /// Compressed payload size of one full page.
    #[inline]
    pub const fn page_bytes(&self) -> u64 {
        self.block.payload_bytes(self.page_width, self.page_height)
    }

    /// Byte pitch of one block row of a full page.
    #[inline]
    pub const fn page_pitch(&self) -> usize {
        self.block.row_pitch(self.page_width)
    }
}

/// Page grid covering a texture's base level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageGrid {
    pub width: u32,
    pub height: u32,
    pub geometry: PageGeometry,
}

impl PageGrid {
    /// Create the grid for a `width` x `height` texture.
    pub const fn new(width: u32, height: u32, geometry: PageGeometry) -> Self {
        Self {
            width,
            height,
            geometry,
        }
    }

    /// Number of page columns.
    #[inline]
    pub const fn pages_x(&self) -> u32 {
        self.width.div_ceil(self.geometry.page_width)
    }

    /// Number of page rows.
    #[inline]
    pub const fn pages_y(&self) -> u32 {
        self.height.div_ceil(self.geometry.page_height)
    }

    /// Total page count.
    #[inline]
    pub const fn page_count(&self) -> usize {
        self.pages_x() as usize * self.pages_y() as usize
    }

    /// Whole-texture region.
    #[inline]
    pub const fn bounds(&self) -> TexelRegion {
        TexelRegion::new(0, 0, self.width, self.height)
    }

    /// Linear index of a page, if it is inside the grid.
    pub const fn index(&self, page: PageCoord) -> Option<usize> {
        if page.x < self.pages_x() && page.y < self.pages_y() {
            Some(page.y as usize * self.pages_x() as usize + page.x as usize)
        } else {
            None
        }
    }

    /// Texel region of a page, clamped to the texture extent.
    pub fn page_region(&self, page: PageCoord) -> Option<TexelRegion> {
        self.index(page)?;
        let x = page.x * self.geometry.page_width;
        let y = page.y * self.geometry.page_height;
        Some(TexelRegion::new(
            x,
            y,
            self.geometry.page_width.min(self.width - x),
            self.geometry.page_height.min(self.height - y),
        ))
    }

    /// Pages touched by a texel region, row by row.
    pub fn pages_covering(&self, region: TexelRegion) -> impl Iterator<Item = PageCoord> {
        let clipped = self.clip(region);
        let (pw, ph) = (self.geometry.page_width, self.geometry.page_height);
        let (x0, y0) = (clipped.x / pw, clipped.y / ph);
        let (x1, y1) = if clipped.is_empty() {
            (x0, y0)
        } else {
            (clipped.right().div_ceil(pw), clipped.bottom().div_ceil(ph))
        };
        (y0..y1).flat_map(move |y| (x0..x1).map(move |x| PageCoord::new(x, y)))
    }

    /// Smallest page-aligned region containing `region`, clamped to the texture.
    pub fn aligned_cover(&self, region: TexelRegion) -> TexelRegion {
        let clipped = self.clip(region);
        if clipped.is_empty() {
            return TexelRegion::new(clipped.x, clipped.y, 0, 0);
        }
        let (pw, ph) = (self.geometry.page_width, self.geometry.page_height);
        let x = clipped.x / pw * pw;
        let y = clipped.y / ph * ph;
        let right = (clipped.right().div_ceil(pw) * pw).min(self.width);
        let bottom = (clipped.bottom().div_ceil(ph) * ph).min(self.height);
        TexelRegion::new(x, y, right - x, bottom - y)
    }

    /// Whether a region starts on page boundaries and ends on page boundaries
    /// or the texture edge.
    pub const fn is_page_aligned(&self, region: TexelRegion) -> bool {
        let (pw, ph) = (self.geometry.page_width, self.geometry.page_height);
        region.x % pw == 0
            && region.y % ph == 0
            && (region.width % pw == 0 || region.right() == self.width)
            && (region.height % ph == 0 || region.bottom() == self.height)
    }

    fn clip(&self, region: TexelRegion) -> TexelRegion {
        let x = region.x.min(self.width);
        let y = region.y.min(self.height);
        TexelRegion::new(
            x,
            y,
            region.right().min(self.width) - x,
            region.bottom().min(self.height) - y,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn astc8_geometry(page: u32) -> PageGeometry {
        PageGeometry::new(PageSize::new(page, page, 1), BlockGeometry::new(8, 8, 128)).unwrap()
    }

    #[test]
    fn page_must_hold_whole_blocks() {
        let block = BlockGeometry::new(8, 8, 128);
        assert!(PageGeometry::new(PageSize::new(36, 32, 1), block).is_err());
        assert!(PageGeometry::new(PageSize::new(0, 32, 1), block).is_err());
        let geometry = PageGeometry::new(PageSize::new(256, 128, 1), block).unwrap();
        assert_eq!(geometry.page_bytes(), 32 * 16 * 16);
    }

    #[test]
    fn overflowing_regions_are_not_contained() {
        let bounds = TexelRegion::new(0, 0, 512, 512);
        let wrapped = TexelRegion::new(u32::MAX - 7, 0, 16, 8);
        assert_eq!(wrapped.right(), u32::MAX);
        assert!(!bounds.contains(wrapped));
        assert!(!TexelRegion::new(0, 0, u32::MAX, u32::MAX).contains(wrapped));
        assert!(!bounds.contains(TexelRegion::new(0, 1, 8, u32::MAX)));
        assert!(bounds.contains(TexelRegion::new(504, 504, 8, 8)));
    }

    #[test]
    fn grid_rounds_up_partial_pages() {
        let grid = PageGrid::new(100, 64, astc8_geometry(32));
        assert_eq!(grid.pages_x(), 4);
        assert_eq!(grid.pages_y(), 2);
        assert_eq!(grid.page_count(), 8);
        assert_eq!(
            grid.page_region(PageCoord::new(3, 1)),
            Some(TexelRegion::new(96, 32, 4, 32))
        );
        assert_eq!(grid.page_region(PageCoord::new(4, 0)), None);
    }

    #[test]
    fn covering_pages() {
        let grid = PageGrid::new(512, 512, astc8_geometry(32));
        let pages: Vec<_> = grid
            .pages_covering(TexelRegion::new(16, 0, 32, 40))
            .collect();
        assert_eq!(
            pages,
            vec![
                PageCoord::new(0, 0),
                PageCoord::new(1, 0),
                PageCoord::new(0, 1),
                PageCoord::new(1, 1),
            ]
        );
        assert_eq!(
            grid.pages_covering(TexelRegion::new(600, 0, 8, 8)).count(),
            0
        );
    }

    #[test]
    fn aligned_cover_clamps_to_texture() {
        let grid = PageGrid::new(100, 100, astc8_geometry(32));
        let cover = grid.aligned_cover(TexelRegion::new(40, 72, 16, 16));
        assert_eq!(cover, TexelRegion::new(32, 64, 32, 32));
        assert!(grid.is_page_aligned(cover));

        let edge = grid.aligned_cover(TexelRegion::new(90, 90, 10, 10));
        assert_eq!(edge, TexelRegion::new(64, 64, 36, 36));
        assert!(grid.is_page_aligned(edge));
        assert!(!grid.is_page_aligned(TexelRegion::new(8, 0, 32, 32)));
    }
}
