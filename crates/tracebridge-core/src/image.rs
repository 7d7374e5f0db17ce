//! File-backed memory images registered with a session.

use std::path::{Path, PathBuf};

use crate::engine::AddressRange;

/// A file section mapped into the traced address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryImage {
    path: PathBuf,
    load_address: u64,
    file_offset: u64,
    size: u64,
}

impl MemoryImage {
    /// Describes `size` bytes of `path`, starting at `file_offset`, loaded at
    /// `load_address`.
    ///
    /// Returns `None` when `size` is zero or the mapped range would pass the
    /// top of the 64-bit address space.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        load_address: u64,
        file_offset: u64,
        size: u64,
    ) -> Option<Self> {
        AddressRange::from_base_size(load_address, size)?;
        Some(Self {
            path: path.into(),
            load_address,
            file_offset,
            size,
        })
    }

    /// Source file of the instruction bytes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Virtual address of the first mapped byte.
    #[must_use]
    pub const fn load_address(&self) -> u64 {
        self.load_address
    }

    /// Offset of the section within the file.
    #[must_use]
    pub const fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Mapped size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Inclusive address range covered by the image.
    #[must_use]
    pub const fn range(&self) -> AddressRange {
        AddressRange {
            start: self.load_address,
            end: self.load_address + (self.size - 1),
        }
    }

    /// Returns `true` when `addr` is covered by the image.
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        self.range().contains(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryImage;
    use crate::engine::AddressRange;

    #[test]
    fn range_is_inclusive_of_last_byte() {
        let image = MemoryImage::new("/usr/bin/app", 0x40_0000, 0x1000, 0x1_0000)
            .expect("valid image");
        assert_eq!(
            image.range(),
            AddressRange {
                start: 0x40_0000,
                end: 0x40_FFFF
            }
        );
        assert!(image.contains(0x40_0000));
        assert!(image.contains(0x40_FFFF));
        assert!(!image.contains(0x41_0000));
        assert_eq!(image.file_offset(), 0x1000);
    }

    #[test]
    fn empty_or_overflowing_images_are_rejected() {
        assert!(MemoryImage::new("/usr/bin/app", 0x40_0000, 0, 0).is_none());
        assert!(MemoryImage::new("/usr/bin/app", u64::MAX - 1, 0, 3).is_none());
        assert!(MemoryImage::new("/usr/bin/app", u64::MAX - 1, 0, 2).is_some());
    }
}
