//! Raw region descriptors exchanged with the disk-array layer.

use bytes::Bytes;

use crate::bytes_to_pages;

/// One contiguous piece of a column's raw representation.
///
/// The handle aliases the column's memory (no copy); the descriptor records
/// both the page extent handed to the striping layer and the exact byte count
/// that is meaningful within it.
#[derive(Debug, Clone)]
pub struct RegionDesc {
    bytes: Bytes,
    size_pages: u64,
    size_bytes: u64,
}

impl RegionDesc {
    /// Describe `size_bytes` meaningful bytes of `bytes`.
    pub fn new(bytes: Bytes, size_bytes: u64) -> Self {
        RegionDesc {
            bytes,
            size_pages: bytes_to_pages(size_bytes),
            size_bytes,
        }
    }

    /// The aliased memory.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Extent in whole pages.
    pub fn size_pages(&self) -> u64 {
        self.size_pages
    }

    /// Meaningful byte count.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// An ordered list of [`RegionDesc`]s forming one representation of a column
/// (compressed or uncompressed). Concatenating the regions in order yields
/// the logical byte stream.
#[derive(Debug, Clone, Default)]
pub struct RegionList {
    regions: Vec<RegionDesc>,
}

impl RegionList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any existing content.
    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// Append a region; order of appends is the on-disk order.
    pub fn append(&mut self, region: RegionDesc) {
        self.regions.push(region);
    }

    /// The regions, in on-disk order.
    pub fn regions(&self) -> &[RegionDesc] {
        &self.regions
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the list holds no regions.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Total meaningful bytes across all regions.
    pub fn total_bytes(&self) -> u64 {
        self.regions.iter().map(|r| r.size_bytes).sum()
    }

    /// Total page extent across all regions.
    pub fn total_pages(&self) -> u64 {
        self.regions.iter().map(|r| r.size_pages).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::PAGE_SIZE;

    #[test]
    fn region_accounting() {
        let mut list = RegionList::new();
        list.append(RegionDesc::new(Bytes::from(vec![0u8; 100]), 100));
        list.append(RegionDesc::new(
            Bytes::from(vec![0u8; PAGE_SIZE as usize * 2]),
            PAGE_SIZE + 1,
        ));

        assert_eq!(list.len(), 2);
        assert_eq!(list.total_bytes(), 100 + PAGE_SIZE + 1);
        assert_eq!(list.total_pages(), 1 + 2);
    }

    #[test]
    fn clear_empties() {
        let mut list = RegionList::new();
        list.append(RegionDesc::new(Bytes::from_static(b"abc"), 3));
        list.clear();
        assert!(list.is_empty());
    }
}
