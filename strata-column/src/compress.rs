use strata_error::{strata_bail, StrataResult};

/// A streaming block compressor.
///
/// The engine never depends on a particular algorithm: it feeds the codec one
/// block at a time ([`COMPRESSION_BLOCK`](crate::COMPRESSION_BLOCK)-sized
/// pieces on the compress side) and requires only that each emitted frame is
/// self-describing, so that decompression can stop after any whole block.
/// That property is what makes decompress-up-to-position possible without
/// touching the rest of the column.
pub trait BlockCodec: std::fmt::Debug + Send + Sync {
    /// Compress `src` as one frame appended to `dst`; returns the framed
    /// length in bytes.
    fn compress_block(&self, src: &[u8], dst: &mut Vec<u8>) -> usize;

    /// Sizes of the frame starting at `src`: `(framed_len, decompressed_len)`.
    fn block_sizes(&self, src: &[u8]) -> StrataResult<(usize, usize)>;

    /// Decompress the frame starting at `src` into `dst`; returns the number
    /// of bytes written. `dst` must hold at least `decompressed_len` bytes.
    fn decompress_block(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize>;
}

/// The shipped codec: LZ4 block frames with a 4-byte framed-length header in
/// front of `lz4_flex`'s size-prepended payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Codec;

impl Lz4Codec {
    const HEADER: usize = 4;
}

impl BlockCodec for Lz4Codec {
    fn compress_block(&self, src: &[u8], dst: &mut Vec<u8>) -> usize {
        let payload = lz4_flex::block::compress_prepend_size(src);
        dst.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        dst.extend_from_slice(&payload);
        Self::HEADER + payload.len()
    }

    fn block_sizes(&self, src: &[u8]) -> StrataResult<(usize, usize)> {
        if src.len() < Self::HEADER * 2 {
            strata_bail!(Corrupt: "compressed frame truncated: {} bytes", src.len());
        }
        let payload_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if src.len() < Self::HEADER + payload_len {
            strata_bail!(
                Corrupt: "compressed frame claims {} payload bytes, {} available",
                payload_len,
                src.len() - Self::HEADER
            );
        }
        let decompressed = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        Ok((Self::HEADER + payload_len, decompressed))
    }

    fn decompress_block(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize> {
        let (framed_len, decompressed_len) = self.block_sizes(src)?;
        let payload = &src[Self::HEADER..framed_len];
        let out = lz4_flex::block::decompress_size_prepended(payload)
            .map_err(|e| strata_error::strata_err!(Corrupt: "lz4 frame: {}", e))?;
        if out.len() != decompressed_len {
            strata_bail!(
                Corrupt: "lz4 frame decompressed to {} bytes, header says {}",
                out.len(),
                decompressed_len
            );
        }
        dst[..out.len()].copy_from_slice(&out);
        Ok(out.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let codec = Lz4Codec;
        let src = vec![42u8; 10_000];

        let mut framed = Vec::new();
        let written = codec.compress_block(&src, &mut framed);
        assert_eq!(written, framed.len());
        // repetitive input must actually shrink
        assert!(framed.len() < src.len());

        let (framed_len, decompressed_len) = codec.block_sizes(&framed).unwrap();
        assert_eq!(framed_len, framed.len());
        assert_eq!(decompressed_len, src.len());

        let mut out = vec![0u8; src.len()];
        let n = codec.decompress_block(&framed, &mut out).unwrap();
        assert_eq!(n, src.len());
        assert_eq!(out, src);
    }

    #[test]
    fn consecutive_frames_are_separable() {
        let codec = Lz4Codec;
        let mut framed = Vec::new();
        codec.compress_block(&[1u8; 500], &mut framed);
        let first_len = framed.len();
        codec.compress_block(&[2u8; 300], &mut framed);

        let (len0, dec0) = codec.block_sizes(&framed).unwrap();
        assert_eq!(len0, first_len);
        assert_eq!(dec0, 500);

        let (_, dec1) = codec.block_sizes(&framed[len0..]).unwrap();
        assert_eq!(dec1, 300);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let codec = Lz4Codec;
        let mut framed = Vec::new();
        codec.compress_block(&[7u8; 100], &mut framed);
        framed.truncate(6);
        assert!(codec.block_sizes(&framed).is_err());
    }
}
