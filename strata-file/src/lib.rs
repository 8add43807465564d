//! The relation catalog: which pages of the striped store hold which
//! chunk/column, in which representation, with what fragmentation.
//!
//! The catalog deliberately lives in a sidecar file next to the striped data
//! files rather than in their headers, so the data files carry nothing but
//! data. It records placement only — it never decides layout.
//!
//! Conceptually the persisted state is three tables:
//!
//! ```text
//! Relations(relID, relName, numColumns, freeChunkID)
//! Chunks(chunkID, relID, numTuples)
//! Columns(colNo, relID, chunkID, startPage, sizeInPages, columnType, varStartPage)
//! ```
//!
//! Chunks are appended in strict order through the
//! [`start_new_chunk`](FileMetadata::start_new_chunk) /
//! [`add_column`](FileMetadata::add_column) /
//! [`finished_chunk`](FileMetadata::finished_chunk) protocol; columns within
//! a chunk must arrive in column-index order, and violating the protocol is
//! fatal, not recoverable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_column::{Fragments, FragmentsTuples};
use strata_error::{strata_panic, StrataError, StrataResult};

mod meta;

pub use meta::*;

/// The page placement sentinel for "not stored" (e.g. no compressed
/// representation).
pub const NO_PAGE: u64 = u64::MAX;

#[derive(Debug, Serialize, Deserialize)]
struct Catalog {
    rel_name: String,
    rel_id: u64,
    num_cols: u64,
    next_free_page: u64,
    chunks: Vec<ChunkMeta>,
}

/// Per-relation catalog of chunk and column placement.
#[derive(Debug)]
pub struct FileMetadata {
    catalog: Catalog,
    path: PathBuf,
    modified: bool,
    /// Index of the chunk currently being filled, if any.
    chunk_open: Option<usize>,
    /// Columns added so far to the open chunk.
    cols_filled: u64,
}

fn rel_id_of(name: &str) -> u64 {
    // FNV-1a; stable across runs and platforms, which is all the id needs
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

impl FileMetadata {
    /// Open the catalog for `rel_name` under `dir`, creating a fresh one if
    /// none exists. An existing catalog must agree on the column count —
    /// the caller is supposed to know its own schema.
    pub fn open(dir: impl AsRef<Path>, rel_name: &str, num_cols: u64) -> StrataResult<Self> {
        let path = dir.as_ref().join(format!("{rel_name}.meta.json"));
        let catalog = match std::fs::read(&path) {
            Ok(raw) => {
                let catalog: Catalog = serde_json::from_slice(&raw)
                    .map_err(|e| StrataError::Serde(e.to_string().into()))?;
                if catalog.num_cols != num_cols {
                    strata_panic!(
                        "relation {} has {} columns, caller expected {}",
                        rel_name,
                        catalog.num_cols,
                        num_cols
                    );
                }
                log::debug!(
                    "opened catalog for {} ({} chunks)",
                    rel_name,
                    catalog.chunks.len()
                );
                catalog
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Catalog {
                rel_name: rel_name.to_string(),
                rel_id: rel_id_of(rel_name),
                num_cols,
                next_free_page: 0,
                chunks: Vec::new(),
            },
            Err(e) => return Err(e.into()),
        };
        Ok(FileMetadata {
            catalog,
            path,
            modified: false,
            chunk_open: None,
            cols_filled: 0,
        })
    }

    /// The relation id, unique throughout the system.
    pub fn rel_id(&self) -> u64 {
        self.catalog.rel_id
    }

    /// The relation name.
    pub fn rel_name(&self) -> &str {
        &self.catalog.rel_name
    }

    /// Number of columns in each chunk.
    pub fn num_cols(&self) -> u64 {
        self.catalog.num_cols
    }

    /// Number of complete chunks.
    pub fn num_chunks(&self) -> u64 {
        self.catalog.chunks.len() as u64
    }

    fn chunk(&self, chunk: u64) -> &ChunkMeta {
        let Some(meta) = self.catalog.chunks.get(chunk as usize) else {
            strata_panic!(
                "chunk {} out of range ({} chunks)",
                chunk,
                self.catalog.chunks.len()
            );
        };
        meta
    }

    fn chunk_mut(&mut self, chunk: u64) -> &mut ChunkMeta {
        let len = self.catalog.chunks.len();
        let Some(meta) = self.catalog.chunks.get_mut(chunk as usize) else {
            strata_panic!("chunk {} out of range ({} chunks)", chunk, len);
        };
        meta
    }

    /// Tuples in `chunk`.
    pub fn num_tuples(&self, chunk: u64) -> u64 {
        self.chunk(chunk).num_tuples()
    }

    /// First page of column `col` of `chunk` (uncompressed representation).
    pub fn start_page(&self, chunk: u64, col: u64) -> u64 {
        self.chunk(chunk).column(col).start_page()
    }

    /// First page of the compressed representation, [`NO_PAGE`] when none.
    pub fn start_page_compr(&self, chunk: u64, col: u64) -> u64 {
        self.chunk(chunk).column(col).start_page_compr()
    }

    /// Page extent of the uncompressed representation.
    pub fn size_pages(&self, chunk: u64, col: u64) -> u64 {
        self.chunk(chunk).column(col).size_pages()
    }

    /// Page extent of the compressed representation.
    pub fn size_pages_compr(&self, chunk: u64, col: u64) -> u64 {
        self.chunk(chunk).column(col).size_pages_compr()
    }

    /// Meaningful bytes of the uncompressed representation.
    pub fn size_bytes(&self, chunk: u64, col: u64) -> u64 {
        self.chunk(chunk).column(col).size_bytes()
    }

    /// Meaningful bytes of the compressed representation.
    pub fn size_bytes_compr(&self, chunk: u64, col: u64) -> u64 {
        self.chunk(chunk).column(col).size_bytes_compr()
    }

    /// Fragment boundaries of column `col` of `chunk`.
    pub fn fragments(&self, chunk: u64, col: u64) -> &Fragments {
        self.chunk(chunk).column(col).fragments()
    }

    /// Per-fragment tuple counts of `chunk`.
    pub fn fragments_tuples(&self, chunk: u64) -> &FragmentsTuples {
        self.chunk(chunk).fragments_tuples()
    }

    /// Cluster-attribute range of `chunk`.
    pub fn cluster_range(&self, chunk: u64) -> (i64, i64) {
        self.chunk(chunk).cluster_range()
    }

    /// Replace the cluster-attribute range of `chunk`, marking it dirty.
    pub fn update_cluster_range(&mut self, chunk: u64, range: (i64, i64)) {
        self.chunk_mut(chunk).update_cluster_range(range);
        self.modified = true;
    }

    /// Begin appending a chunk; returns its id. Fatal while another chunk is
    /// open.
    pub fn start_new_chunk(
        &mut self,
        num_tuples: u64,
        num_cols: u64,
        frag_tuples: FragmentsTuples,
    ) -> u64 {
        if self.chunk_open.is_some() {
            strata_panic!("chunk started while another chunk is being filled");
        }
        let id = self.catalog.chunks.len();
        self.chunk_open = Some(id);
        self.cols_filled = 0;
        self.catalog.num_cols = num_cols;
        self.catalog.chunks.push(ChunkMeta::new(num_tuples, frag_tuples));
        self.modified = true;
        id as u64
    }

    /// Correct the tuple count of the chunk being filled.
    pub fn set_num_tuples(&mut self, num_tuples: u64) {
        let Some(open) = self.chunk_open else {
            strata_panic!("tuple count set with no chunk being filled");
        };
        self.catalog.chunks[open].set_num_tuples(num_tuples);
    }

    /// Append the next column of the open chunk. Columns must arrive in
    /// column-index order; the count is checked at
    /// [`finished_chunk`](FileMetadata::finished_chunk).
    #[allow(clippy::too_many_arguments)]
    pub fn add_column(
        &mut self,
        start_page: u64,
        size_bytes: u64,
        size_pages: u64,
        start_page_compr: u64,
        size_bytes_compr: u64,
        size_pages_compr: u64,
        fragments: Fragments,
    ) {
        let Some(open) = self.chunk_open else {
            strata_panic!("column added with no chunk being filled");
        };
        if self.cols_filled >= self.catalog.num_cols {
            strata_panic!(
                "column {} added beyond the declared {} columns",
                self.cols_filled,
                self.catalog.num_cols
            );
        }
        self.catalog.chunks[open].add_column(ColumnMeta::new(
            start_page,
            size_pages,
            start_page_compr,
            size_pages_compr,
            size_bytes,
            size_bytes_compr,
            fragments,
        ));
        self.cols_filled += 1;
    }

    /// Close the open chunk. Fatal unless every declared column arrived.
    pub fn finished_chunk(&mut self) {
        if self.chunk_open.is_none() {
            strata_panic!("chunk finished with no chunk being filled");
        }
        if self.cols_filled != self.catalog.num_cols {
            strata_panic!(
                "chunk finished with {} of {} columns",
                self.cols_filled,
                self.catalog.num_cols
            );
        }
        self.chunk_open = None;
    }

    /// Reserve `num_pages` pages in the striped store; returns the first
    /// page index. Call before adding the columns that land on those pages.
    pub fn allocate_pages(&mut self, num_pages: u64) -> u64 {
        let first = self.catalog.next_free_page;
        self.catalog.next_free_page += num_pages;
        self.modified = true;
        first
    }

    /// Persist the catalog. Writes a fresh sidecar file and atomically
    /// replaces the old one.
    pub fn flush(&mut self) -> StrataResult<()> {
        if !self.modified {
            return Ok(());
        }
        let raw = serde_json::to_vec_pretty(&self.catalog)
            .map_err(|e| StrataError::Serde(e.to_string().into()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        self.modified = false;
        log::debug!(
            "flushed catalog for {} ({} chunks)",
            self.catalog.rel_name,
            self.catalog.chunks.len()
        );
        Ok(())
    }

    /// Drop all chunk metadata and remove the sidecar file.
    pub fn delete_content(&mut self) -> StrataResult<()> {
        self.catalog.chunks.clear();
        self.catalog.next_free_page = 0;
        self.chunk_open = None;
        self.cols_filled = 0;
        self.modified = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        log::debug!("deleted catalog content for {}", self.catalog.rel_name);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fragments(points: &[u64]) -> Fragments {
        let mut fragments = Fragments::new();
        for &point in points {
            fragments.push_start(point);
        }
        fragments
    }

    fn frag_tuples(counts: &[u64]) -> FragmentsTuples {
        let mut tuples = FragmentsTuples::new();
        for &count in counts {
            tuples.push_count(count);
        }
        tuples
    }

    fn add_chunk(meta: &mut FileMetadata, num_tuples: u64) -> u64 {
        let id = meta.start_new_chunk(num_tuples, 2, frag_tuples(&[num_tuples]));
        let pages = meta.allocate_pages(4);
        meta.add_column(pages, 100, 2, NO_PAGE, 0, 0, fragments(&[0, 50]));
        meta.add_column(pages + 2, 80, 2, NO_PAGE, 0, 0, fragments(&[0, 40]));
        meta.finished_chunk();
        id
    }

    #[test]
    fn chunk_append_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = FileMetadata::open(dir.path(), "lineitem", 2).unwrap();

        assert_eq!(add_chunk(&mut meta, 1000), 0);
        assert_eq!(add_chunk(&mut meta, 500), 1);

        assert_eq!(meta.num_chunks(), 2);
        assert_eq!(meta.num_tuples(1), 500);
        assert_eq!(meta.start_page(0, 0), 0);
        assert_eq!(meta.start_page(0, 1), 2);
        assert_eq!(meta.start_page(1, 0), 4);
        assert_eq!(meta.size_bytes(0, 1), 80);
        assert_eq!(meta.start_page_compr(0, 0), NO_PAGE);
        assert_eq!(meta.fragments(0, 0).num_fragments(), 2);
        assert_eq!(meta.fragments_tuples(0).overall_tuple_count(), 1000);
    }

    #[test]
    fn flush_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let rel_id;
        {
            let mut meta = FileMetadata::open(dir.path(), "orders", 2).unwrap();
            rel_id = meta.rel_id();
            add_chunk(&mut meta, 123);
            meta.update_cluster_range(0, (17, 99));
            meta.flush().unwrap();
        }

        let meta = FileMetadata::open(dir.path(), "orders", 2).unwrap();
        assert_eq!(meta.rel_id(), rel_id);
        assert_eq!(meta.num_chunks(), 1);
        assert_eq!(meta.num_tuples(0), 123);
        assert_eq!(meta.cluster_range(0), (17, 99));
        assert_eq!(meta.fragments(0, 1).start_position(1), 40);
    }

    #[test]
    fn page_allocation_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = FileMetadata::open(dir.path(), "t", 1).unwrap();
        assert_eq!(meta.allocate_pages(10), 0);
        assert_eq!(meta.allocate_pages(5), 10);
        assert_eq!(meta.allocate_pages(1), 15);
    }

    #[test]
    fn delete_content_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = FileMetadata::open(dir.path(), "t", 2).unwrap();
        add_chunk(&mut meta, 10);
        meta.flush().unwrap();
        meta.delete_content().unwrap();

        assert_eq!(meta.num_chunks(), 0);
        assert_eq!(meta.allocate_pages(1), 0);

        let reopened = FileMetadata::open(dir.path(), "t", 2).unwrap();
        assert_eq!(reopened.num_chunks(), 0);
    }

    #[test]
    #[should_panic(expected = "columns")]
    fn short_chunk_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = FileMetadata::open(dir.path(), "t", 2).unwrap();
        meta.start_new_chunk(10, 2, frag_tuples(&[10]));
        meta.add_column(0, 10, 1, NO_PAGE, 0, 0, fragments(&[0]));
        meta.finished_chunk();
    }

    #[test]
    #[should_panic(expected = "beyond the declared")]
    fn extra_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = FileMetadata::open(dir.path(), "t", 1).unwrap();
        meta.start_new_chunk(10, 1, frag_tuples(&[10]));
        meta.add_column(0, 10, 1, NO_PAGE, 0, 0, fragments(&[0]));
        meta.add_column(1, 10, 1, NO_PAGE, 0, 0, fragments(&[0]));
    }
}
