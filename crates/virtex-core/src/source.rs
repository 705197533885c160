//! Source image providers.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::header::CompressedImage;

/// Read-only access to the bytes of a compressed source image.
///
/// `bytes` returns `None` when the image could not be mapped. The returned
/// slice is stable for the provider's lifetime and is never written to.
pub trait ImageSource {
    /// The mapped image bytes, or `None` if nothing is mapped.
    fn bytes(&self) -> Option<&[u8]>;

    /// Byte length of the image, zero when unmapped.
    fn size(&self) -> usize {
        self.bytes().map_or(0, <[u8]>::len)
    }

    /// Parse the mapped bytes as a compressed image.
    fn image(&self) -> Result<CompressedImage<'_>> {
        CompressedImage::parse(self.bytes().ok_or(Error::SourceUnmapped)?)
    }
}

impl ImageSource for [u8] {
    fn bytes(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl ImageSource for Vec<u8> {
    fn bytes(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl<T: ImageSource + ?Sized> ImageSource for &T {
    fn bytes(&self) -> Option<&[u8]> {
        (**self).bytes()
    }
}

/// A compressed image file mapped read-only into memory.
#[derive(Debug)]
pub struct MappedImage {
    map: Option<Mmap>,
}

impl MappedImage {
    /// Map `path` read-only.
    ///
    /// An empty file opens successfully but reports itself as unmapped, since
    /// a zero-length mapping has no valid base address.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { map: None });
        }

        // SAFETY: the mapping is read-only and the file is not modified by
        // this process while mapped.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    /// A provider with nothing mapped.
    pub const fn unmapped() -> Self {
        Self { map: None }
    }
}

impl ImageSource for MappedImage {
    fn bytes(&self) -> Option<&[u8]> {
        self.map.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::header::CompressedImageHeader;

    #[test]
    fn maps_file_contents() {
        let header = CompressedImageHeader::new(8, 8, 16, 16);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&header.to_bytes()).unwrap();
        file.write_all(&[7u8; 64]).unwrap();
        file.flush().unwrap();

        let mapped = MappedImage::open(file.path()).unwrap();
        assert_eq!(mapped.size(), 16 + 64);
        let image = mapped.image().unwrap();
        assert_eq!(image.width(), 16);
        assert!(image.payload.iter().all(|&b| b == 7));
    }

    #[test]
    fn empty_file_is_unmapped() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mapped = MappedImage::open(file.path()).unwrap();
        assert!(mapped.bytes().is_none());
        assert_eq!(mapped.size(), 0);
        assert!(matches!(mapped.image(), Err(Error::SourceUnmapped)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MappedImage::open(dir.path().join("missing.astc"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn in_memory_sources() {
        let bytes = vec![1u8, 2, 3];
        assert_eq!(bytes.size(), 3);
        assert_eq!(bytes.as_slice().bytes(), Some(&[1u8, 2, 3][..]));
        assert!(MappedImage::unmapped().bytes().is_none());
    }
}
