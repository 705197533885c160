//! Sparse texture ownership, page residency and the direct fill path.

use virtex_core::{
    copy_blocks, CompressedFormat, CompressedImage, FormatCaps, PageCoord, PageGeometry, PageGrid,
    SparseDevice, SparseTextureDesc, TexelRegion, TextureHandle,
};

use crate::error::{Result, StreamError};
use crate::slot::{SlotState, StagingSlot, TransferDesc};

/// Pick the page geometry for `candidate` from the driver's format table.
///
/// Logs every reported format and its page sizes.
pub fn discover_geometry(
    formats: &[FormatCaps],
    candidate: CompressedFormat,
    page_size_index: usize,
) -> virtex_core::Result<PageGeometry> {
    tracing::info!("{} sparse compressed formats:", formats.len());
    for caps in formats {
        let pages: Vec<String> = caps
            .page_sizes
            .iter()
            .map(|page| format!("{}x{}x{}", page.width, page.height, page.depth))
            .collect();
        tracing::info!(
            "  {:<11} block {}x{} ({} bits), pages [{}]",
            caps.format.name(),
            caps.block.width,
            caps.block.height,
            caps.block.bits,
            pages.join(", ")
        );
    }

    let caps = formats
        .iter()
        .find(|caps| caps.format == candidate)
        .ok_or(virtex_core::Error::UnsupportedFormat(candidate))?;
    let page = caps
        .page_sizes
        .get(page_size_index)
        .ok_or(virtex_core::Error::NoPageSize {
            format: candidate,
            index: page_size_index,
        })?;

    PageGeometry::new(*page, caps.block)
}

/// A sparse texture plus a CPU mirror of its committed pages.
#[derive(Debug)]
pub struct SparseTextureManager {
    texture: TextureHandle,
    format: CompressedFormat,
    grid: PageGrid,
    page_size_index: usize,
    committed: Vec<bool>,
}

impl SparseTextureManager {
    /// Create a single-level sparse texture with no resident pages.
    pub fn create<D: SparseDevice>(
        device: &mut D,
        width: u32,
        height: u32,
        format: CompressedFormat,
        geometry: PageGeometry,
        page_size_index: usize,
    ) -> Result<Self> {
        if geometry.block != format.block() {
            return Err(virtex_core::Error::InvalidGeometry(format!(
                "{format} does not use {:?} blocks",
                geometry.block
            ))
            .into());
        }

        let texture = device.create_sparse_texture(&SparseTextureDesc {
            width,
            height,
            format,
            page_size_index,
        })?;
        let grid = PageGrid::new(width, height, geometry);

        tracing::info!(
            "Sparse texture {width}x{height} {format}: {}x{} pages of {}x{} texels",
            grid.pages_x(),
            grid.pages_y(),
            geometry.page_width,
            geometry.page_height,
        );

        Ok(Self {
            texture,
            format,
            grid,
            page_size_index,
            committed: vec![false; grid.page_count()],
        })
    }

    #[inline]
    pub const fn handle(&self) -> TextureHandle {
        self.texture
    }

    #[inline]
    pub const fn format(&self) -> CompressedFormat {
        self.format
    }

    #[inline]
    pub const fn grid(&self) -> &PageGrid {
        &self.grid
    }

    #[inline]
    pub const fn geometry(&self) -> &PageGeometry {
        &self.grid.geometry
    }

    #[inline]
    pub const fn page_size_index(&self) -> usize {
        self.page_size_index
    }

    const fn out_of_range(&self, px: u32, py: u32) -> StreamError {
        StreamError::PageOutOfRange {
            x: px,
            y: py,
            pages_x: self.grid.pages_x(),
            pages_y: self.grid.pages_y(),
        }
    }

    fn page_index(&self, px: u32, py: u32) -> Result<usize> {
        self.grid
            .index(PageCoord::new(px, py))
            .ok_or_else(|| self.out_of_range(px, py))
    }

    fn page_region(&self, px: u32, py: u32) -> Result<TexelRegion> {
        self.grid
            .page_region(PageCoord::new(px, py))
            .ok_or_else(|| self.out_of_range(px, py))
    }

    fn set_residency<D: SparseDevice>(
        &mut self,
        device: &mut D,
        px: u32,
        py: u32,
        resident: bool,
    ) -> Result<bool> {
        let index = self.page_index(px, py)?;
        if self.committed[index] == resident {
            return Ok(false);
        }

        let region = self.page_region(px, py)?;
        device.commit_region(self.texture, region, resident)?;
        self.committed[index] = resident;
        tracing::debug!(
            "Page ({px}, {py}) {}",
            if resident { "committed" } else { "uncommitted" }
        );
        Ok(true)
    }

    /// Back a page with memory. Returns `false` if it already was.
    pub fn commit_page<D: SparseDevice>(&mut self, device: &mut D, px: u32, py: u32) -> Result<bool> {
        self.set_residency(device, px, py, true)
    }

    /// Release a page's memory, dropping its contents. Returns `false` if it
    /// was not committed.
    pub fn uncommit_page<D: SparseDevice>(
        &mut self,
        device: &mut D,
        px: u32,
        py: u32,
    ) -> Result<bool> {
        self.set_residency(device, px, py, false)
    }

    /// Whether a page is committed. Pages outside the grid never are.
    pub fn is_committed(&self, px: u32, py: u32) -> bool {
        self.grid
            .index(PageCoord::new(px, py))
            .is_some_and(|index| self.committed[index])
    }

    pub fn committed_count(&self) -> usize {
        self.committed.iter().filter(|&&committed| committed).count()
    }

    /// Record pages committed on the device by a slot upload.
    fn mark_committed(&mut self, region: TexelRegion) {
        for page in self.grid.pages_covering(region) {
            if let Some(index) = self.grid.index(page) {
                self.committed[index] = true;
            }
        }
    }

    fn check_source(&self, source: &CompressedImage<'_>) -> Result<()> {
        if source.width() != self.grid.width
            || source.height() != self.grid.height
            || source.format != self.format
        {
            return Err(virtex_core::Error::InvalidGeometry(format!(
                "source {}x{} {} does not match texture {}x{} {}",
                source.width(),
                source.height(),
                source.format,
                self.grid.width,
                self.grid.height,
                self.format
            ))
            .into());
        }
        Ok(())
    }

    /// Commit a page and upload its source blocks synchronously.
    ///
    /// The page is repacked into a scratch buffer of one page's payload.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn fill_page<D: SparseDevice>(
        &mut self,
        device: &mut D,
        source: &CompressedImage<'_>,
        px: u32,
        py: u32,
    ) -> Result<()> {
        self.check_source(source)?;
        let region = self.page_region(px, py)?;
        self.commit_page(device, px, py)?;

        let block = self.grid.geometry.block;
        let mut scratch = vec![0u8; self.grid.geometry.page_bytes() as usize];
        let blocks = copy_blocks(
            source.payload,
            source.row_pitch(),
            region.origin(),
            &mut scratch,
            block.row_pitch(region.width),
            block,
            block.covering_extent(region.width, region.height),
        )?;

        let bytes = blocks * block.bytes();
        device.upload_from_host(self.texture, &scratch[..bytes], region, self.format)?;
        tracing::debug!("Filled page ({px}, {py}) with {blocks} blocks");
        Ok(())
    }

    /// Describe a copy of `region` from `source` into the same place in the
    /// texture.
    pub fn transfer_for(
        &self,
        source: &CompressedImage<'_>,
        region: TexelRegion,
    ) -> Result<TransferDesc> {
        self.check_source(source)?;
        if !self.grid.bounds().contains(region) {
            return Err(virtex_core::Error::OutOfBounds(format!(
                "{region:?} exceeds {}x{}",
                self.grid.width, self.grid.height
            ))
            .into());
        }

        Ok(TransferDesc {
            texture: self.texture,
            format: self.format,
            grid: self.grid,
            src_pitch: source.row_pitch(),
            src_origin: region.origin(),
            dst_origin: region.origin(),
            extent: region.extent(),
        })
    }

    /// Drive `slot` through start, blit and upload for `region`.
    ///
    /// The slot is left in flight; completion is observed through
    /// [`StagingSlot::finish`]. On failure before the copy is queued the slot
    /// is returned to idle. A copy queued without a fence leaves it faulted,
    /// and the next `finish` fences it. Pages committed on the device are
    /// recorded either way.
    pub fn stream_region<D: SparseDevice>(
        &mut self,
        device: &mut D,
        slot: &mut StagingSlot<D>,
        source: &CompressedImage<'_>,
        region: TexelRegion,
    ) -> Result<()> {
        let desc = self.transfer_for(source, region)?;
        slot.start(desc)?;

        let uploaded = slot
            .blit(source.payload)
            .and_then(|_| slot.upload(device));
        if let Some(cover) = slot.committed_cover() {
            self.mark_committed(cover);
        }
        if let Err(e) = uploaded {
            if slot.state() != SlotState::Faulted {
                slot.cancel()?;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stream one page through `slot`.
    pub fn stream_page<D: SparseDevice>(
        &mut self,
        device: &mut D,
        slot: &mut StagingSlot<D>,
        source: &CompressedImage<'_>,
        px: u32,
        py: u32,
    ) -> Result<()> {
        let region = self.page_region(px, py)?;
        self.stream_region(device, slot, source, region)
    }

    /// Destroy the texture.
    pub fn destroy<D: SparseDevice>(self, device: &mut D) {
        tracing::debug!(
            "Destroying sparse texture with {} committed pages",
            self.committed_count()
        );
        device.destroy_texture(self.texture);
    }
}
