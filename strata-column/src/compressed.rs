use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use strata_buffer::{alloc, RegionDesc, RegionList};
use strata_error::{strata_panic, StrataExpect};

use crate::{BlockCodec, COMPRESSION_BLOCK};

/// The compressed twin of a storage's logical byte stream.
///
/// Holds the framed compressed bytes plus a streaming decompression cursor.
/// Decompression is strictly linear: each call to [`decompress_up_to`]
/// consumes whole frames forward from where the last call stopped. The only
/// way to go backwards is the explicit [`reset`] restart-from-zero path;
/// anything else is treated as a violated invariant, not a recoverable error.
///
/// [`decompress_up_to`]: CompressedUnit::decompress_up_to
/// [`reset`]: CompressedUnit::reset
#[derive(Debug)]
pub struct CompressedUnit {
    codec: Arc<dyn BlockCodec>,
    compressed: Bytes,
    decompressed: Option<BytesMut>,
    next_compress: usize,
    next_decompress: usize,
    decompressed_size: u64,
    numa_hint: u64,
}

impl CompressedUnit {
    /// Compress the given ordered slices (together forming the first
    /// `decompressed_size` logical bytes) into framed blocks.
    pub fn compress<'a>(
        pieces: impl Iterator<Item = &'a [u8]>,
        decompressed_size: u64,
        codec: Arc<dyn BlockCodec>,
        numa_hint: u64,
    ) -> Self {
        let mut buf = Vec::new();
        for piece in pieces {
            for block in piece.chunks(COMPRESSION_BLOCK as usize) {
                codec.compress_block(block, &mut buf);
            }
        }
        log::debug!(
            "compressed {} bytes into {} ({} blocks of {})",
            decompressed_size,
            buf.len(),
            decompressed_size.div_ceil(COMPRESSION_BLOCK),
            COMPRESSION_BLOCK,
        );
        CompressedUnit {
            codec,
            compressed: Bytes::from(buf),
            decompressed: None,
            next_compress: 0,
            next_decompress: 0,
            decompressed_size,
            numa_hint,
        }
    }

    /// Adopt framed compressed bytes received from the disk layer.
    pub fn from_compressed(
        compressed: Bytes,
        decompressed_size: u64,
        codec: Arc<dyn BlockCodec>,
        numa_hint: u64,
    ) -> Self {
        CompressedUnit {
            codec,
            compressed,
            decompressed: None,
            next_compress: 0,
            next_decompress: 0,
            decompressed_size,
            numa_hint,
        }
    }

    /// Total size of the compressed representation in bytes.
    pub fn compressed_size(&self) -> u64 {
        self.compressed.len() as u64
    }

    /// Logical size of the data once decompressed.
    pub fn decompressed_size(&self) -> u64 {
        self.decompressed_size
    }

    /// Number of logical bytes decompressed so far.
    pub fn resident(&self) -> u64 {
        self.next_decompress as u64
    }

    /// Decompress forward until at least `target` logical bytes are resident
    /// (clamped to the logical size). Returns the resident byte count, which
    /// may exceed the request: frames are only consumed whole.
    pub fn decompress_up_to(&mut self, target: u64) -> u64 {
        let target = target.min(self.decompressed_size) as usize;
        if self.next_decompress >= target {
            return self.next_decompress as u64;
        }

        if self.decompressed.is_none() {
            self.decompressed = Some(alloc(self.decompressed_size, self.numa_hint));
        }
        let buf = self
            .decompressed
            .as_mut()
            .strata_expect("decompression buffer must exist");

        while self.next_decompress < target {
            let frame = &self.compressed[self.next_compress..];
            if frame.is_empty() {
                strata_panic!(
                    "compressed stream exhausted at {} of {} logical bytes",
                    self.next_decompress,
                    self.decompressed_size
                );
            }
            let (framed_len, decompressed_len) = self
                .codec
                .block_sizes(frame)
                .strata_expect("compressed frame header");
            let dst = &mut buf[self.next_decompress..self.next_decompress + decompressed_len];
            self.codec
                .decompress_block(&frame[..framed_len], dst)
                .strata_expect("compressed frame payload");
            self.next_compress += framed_len;
            self.next_decompress += decompressed_len;
        }

        self.next_decompress as u64
    }

    /// Restart decompression from logical byte zero. The sole sanctioned way
    /// to replay the stream.
    pub fn reset(&mut self) {
        self.next_compress = 0;
        self.next_decompress = 0;
    }

    /// View of already-decompressed logical bytes `[pos, pos + len)`.
    pub fn slice(&self, pos: u64, len: u64) -> &[u8] {
        let end = (pos + len) as usize;
        if end > self.next_decompress {
            strata_panic!(
                "read of decompressed bytes [{}, {}) past resident {}",
                pos,
                end,
                self.next_decompress
            );
        }
        let buf = self
            .decompressed
            .as_ref()
            .strata_expect("decompression buffer must exist");
        &buf[pos as usize..end]
    }

    /// An independent unit over the same compressed content. Decompression
    /// progress is not carried over; the copy restarts from zero.
    pub fn deep_copy(&self) -> Self {
        CompressedUnit {
            codec: self.codec.clone(),
            compressed: self.compressed.clone(),
            decompressed: None,
            next_compress: 0,
            next_decompress: 0,
            decompressed_size: self.decompressed_size,
            numa_hint: self.numa_hint,
        }
    }

    /// Describe the compressed representation for the disk layer.
    pub fn region_list(&self, out: &mut RegionList) {
        out.clear();
        out.append(RegionDesc::new(
            self.compressed.clone(),
            self.compressed.len() as u64,
        ));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Lz4Codec;

    fn unit_over(data: &[u8]) -> CompressedUnit {
        CompressedUnit::compress(
            std::iter::once(data),
            data.len() as u64,
            Arc::new(Lz4Codec),
            0,
        )
    }

    #[test]
    fn partial_then_full_matches_single_shot() {
        let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();

        let mut twice = unit_over(&data);
        twice.decompress_up_to(400_000);
        let resident = twice.decompress_up_to(data.len() as u64);
        assert_eq!(resident, data.len() as u64);

        let mut once = unit_over(&data);
        once.decompress_up_to(data.len() as u64);

        assert_eq!(
            twice.slice(0, data.len() as u64),
            once.slice(0, data.len() as u64)
        );
        assert_eq!(twice.slice(0, data.len() as u64), &data[..]);
    }

    #[test]
    fn frames_decompress_past_request() {
        let data = vec![9u8; (COMPRESSION_BLOCK * 2) as usize];
        let mut unit = unit_over(&data);
        // one byte pulls in the whole first frame
        let resident = unit.decompress_up_to(1);
        assert_eq!(resident, COMPRESSION_BLOCK);
    }

    #[test]
    fn reset_replays_from_zero() {
        let data = vec![3u8; 10_000];
        let mut unit = unit_over(&data);
        unit.decompress_up_to(data.len() as u64);
        unit.reset();
        assert_eq!(unit.resident(), 0);
        unit.decompress_up_to(100);
        assert_eq!(unit.slice(0, 100), &data[..100]);
    }

    #[test]
    fn deep_copy_restarts() {
        let data = vec![5u8; 10_000];
        let mut unit = unit_over(&data);
        unit.decompress_up_to(data.len() as u64);

        let mut copy = unit.deep_copy();
        assert_eq!(copy.resident(), 0);
        copy.decompress_up_to(data.len() as u64);
        assert_eq!(copy.slice(0, 64), unit.slice(0, 64));
    }
}
