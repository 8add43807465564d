use serde::{Deserialize, Serialize};
use strata_column::{Fragments, FragmentsTuples};
use strata_error::strata_panic;

/// Placement of one column of one chunk: page extents and byte sizes for the
/// uncompressed and (optional) compressed representations, plus the column's
/// fragment boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    start_page: u64,
    size_pages: u64,
    start_page_compr: u64,
    size_pages_compr: u64,
    size_bytes: u64,
    size_bytes_compr: u64,
    fragments: Fragments,
}

impl ColumnMeta {
    /// Describe one column's placement.
    pub fn new(
        start_page: u64,
        size_pages: u64,
        start_page_compr: u64,
        size_pages_compr: u64,
        size_bytes: u64,
        size_bytes_compr: u64,
        fragments: Fragments,
    ) -> Self {
        ColumnMeta {
            start_page,
            size_pages,
            start_page_compr,
            size_pages_compr,
            size_bytes,
            size_bytes_compr,
            fragments,
        }
    }

    /// First page of the uncompressed representation.
    pub fn start_page(&self) -> u64 {
        self.start_page
    }

    /// First page of the compressed representation,
    /// [`NO_PAGE`](crate::NO_PAGE) when none exists.
    pub fn start_page_compr(&self) -> u64 {
        self.start_page_compr
    }

    /// Page extent of the uncompressed representation.
    pub fn size_pages(&self) -> u64 {
        self.size_pages
    }

    /// Page extent of the compressed representation.
    pub fn size_pages_compr(&self) -> u64 {
        self.size_pages_compr
    }

    /// Meaningful bytes of the uncompressed representation.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Meaningful bytes of the compressed representation.
    pub fn size_bytes_compr(&self) -> u64 {
        self.size_bytes_compr
    }

    /// Fragment boundaries within this column.
    pub fn fragments(&self) -> &Fragments {
        &self.fragments
    }
}

/// Placement of one chunk: its columns in index order, tuple accounting, and
/// the range of the clustering attribute (for chunk pruning).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    num_tuples: u64,
    columns: Vec<ColumnMeta>,
    frag_tuples: FragmentsTuples,
    cluster_min: i64,
    cluster_max: i64,
    #[serde(skip)]
    dirty: bool,
}

impl ChunkMeta {
    /// A chunk with no columns yet. The cluster range starts inverted
    /// (empty).
    pub fn new(num_tuples: u64, frag_tuples: FragmentsTuples) -> Self {
        ChunkMeta {
            num_tuples,
            columns: Vec::new(),
            frag_tuples,
            cluster_min: 1,
            cluster_max: 0,
            dirty: false,
        }
    }

    /// Tuples in this chunk.
    pub fn num_tuples(&self) -> u64 {
        self.num_tuples
    }

    /// Correct the tuple count.
    pub fn set_num_tuples(&mut self, num_tuples: u64) {
        self.num_tuples = num_tuples;
    }

    /// Placement of column `col`. Fatal out of range.
    pub fn column(&self, col: u64) -> &ColumnMeta {
        let Some(meta) = self.columns.get(col as usize) else {
            strata_panic!("column {} out of range ({} columns)", col, self.columns.len());
        };
        meta
    }

    /// Append the next column, in column-index order.
    pub fn add_column(&mut self, column: ColumnMeta) {
        self.columns.push(column);
    }

    /// Number of columns recorded so far.
    pub fn num_columns(&self) -> u64 {
        self.columns.len() as u64
    }

    /// Per-fragment tuple counts.
    pub fn fragments_tuples(&self) -> &FragmentsTuples {
        &self.frag_tuples
    }

    /// Range of the clustering attribute over this chunk's tuples.
    pub fn cluster_range(&self) -> (i64, i64) {
        (self.cluster_min, self.cluster_max)
    }

    /// Replace the clustering range; the chunk is dirty until the catalog is
    /// flushed.
    pub fn update_cluster_range(&mut self, range: (i64, i64)) {
        self.cluster_min = range.0;
        self.cluster_max = range.1;
        self.dirty = true;
    }

    /// Whether this chunk carries unflushed changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cluster_range_tracks_dirtiness() {
        let mut chunk = ChunkMeta::new(10, FragmentsTuples::new());
        assert!(!chunk.is_dirty());
        assert_eq!(chunk.cluster_range(), (1, 0));

        chunk.update_cluster_range((-5, 40));
        assert!(chunk.is_dirty());
        assert_eq!(chunk.cluster_range(), (-5, 40));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn missing_column_is_fatal() {
        ChunkMeta::new(0, FragmentsTuples::new()).column(0);
    }
}
