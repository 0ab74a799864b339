//! Block framing and compression
//!
//! Every block written to a container is framed as:
//!
//! ```text
//! [BlockHeader: magic | version | bsize | reserved][zstd payload][BlockTrailer: crc32 | size]
//! ```
//!
//! `bsize` covers the whole frame, so a reader can skip a block without decompressing it.
//! The trailer records the CRC32 and length of the *decompressed* bytes.

use bytemuck::{Pod, Zeroable};
use crc32fast::Hasher;
use zstd::zstd_safe;

use super::utils::sized_compress;
use crate::error::{CorruptBlockError, Result, WriteError};
use crate::{BLOCK_MAGIC, BLOCK_VERSION, DEFAULT_COMPRESSION_LEVEL};

/// Size of the block header in bytes
pub const SIZE_BLOCK_HEADER: usize = size_of::<BlockHeader>();

/// Size of the block trailer in bytes
pub const SIZE_BLOCK_TRAILER: usize = size_of::<BlockTrailer>();

#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct BlockHeader {
    magic: [u8; 3],
    version: u8,

    /// Total framed size: header, compressed payload, and trailer
    pub bsize: u32,

    reserved: [u8; 8],
}
impl BlockHeader {
    #[must_use]
    pub fn new(bsize: u32) -> Self {
        Self {
            magic: *BLOCK_MAGIC,
            version: BLOCK_VERSION,
            bsize,
            reserved: [0; 8],
        }
    }

    /// Length of the framed block in bytes
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.bsize as usize
    }

    /// Length of the compressed payload in bytes
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.block_len()
            .saturating_sub(SIZE_BLOCK_HEADER + SIZE_BLOCK_TRAILER)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Parses and validates a header from the first bytes of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SIZE_BLOCK_HEADER {
            return Err(CorruptBlockError::BlockSizeMismatch {
                declared: SIZE_BLOCK_HEADER as u64,
                available: bytes.len() as u64,
            }
            .into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_BLOCK_HEADER]);
        if header.magic != *BLOCK_MAGIC {
            return Err(CorruptBlockError::InvalidBlockMagic(0).into());
        }
        if header.version != BLOCK_VERSION {
            return Err(CorruptBlockError::UnsupportedBlockVersion(header.version).into());
        }
        if header.block_len() < SIZE_BLOCK_HEADER + SIZE_BLOCK_TRAILER {
            return Err(CorruptBlockError::BlockSizeMismatch {
                declared: u64::from(header.bsize),
                available: (SIZE_BLOCK_HEADER + SIZE_BLOCK_TRAILER) as u64,
            }
            .into());
        }
        Ok(header)
    }
}

#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct BlockTrailer {
    /// CRC32 of the decompressed bytes
    pub checksum: u32,

    /// Number of decompressed bytes
    pub uncompressed_size: u32,
}
impl BlockTrailer {
    #[must_use]
    pub fn new(checksum: u32, uncompressed_size: u32) -> Self {
        Self {
            checksum,
            uncompressed_size,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads the trailer from the last bytes of a framed block
    pub fn from_block(block: &[u8]) -> Result<Self> {
        if block.len() < SIZE_BLOCK_HEADER + SIZE_BLOCK_TRAILER {
            return Err(CorruptBlockError::BlockSizeMismatch {
                declared: (SIZE_BLOCK_HEADER + SIZE_BLOCK_TRAILER) as u64,
                available: block.len() as u64,
            }
            .into());
        }
        Ok(bytemuck::pod_read_unaligned(
            &block[block.len() - SIZE_BLOCK_TRAILER..],
        ))
    }
}

/// Compresses buffers into framed blocks and back.
///
/// A codec owns reusable zstd contexts and scratch buffers, so each writer or reader holds
/// its own instance. It is `Send` but must not be shared between threads.
pub struct BlockCodec {
    level: i32,
    cctx: zstd_safe::CCtx<'static>,
    dctx: zstd_safe::DCtx<'static>,

    /// Concatenation scratch for multi-part input
    raw: Vec<u8>,

    /// Compressed payload scratch
    zbuf: Vec<u8>,

    /// Framed output
    block: Vec<u8>,
}
impl Clone for BlockCodec {
    fn clone(&self) -> Self {
        Self::new(self.level)
    }
}
impl Default for BlockCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}
impl BlockCodec {
    #[must_use]
    pub fn new(level: i32) -> Self {
        Self {
            level,
            cctx: zstd_safe::CCtx::create(),
            dctx: zstd_safe::DCtx::create(),
            raw: Vec::default(),
            zbuf: Vec::default(),
            block: Vec::default(),
        }
    }

    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Frames `raw` into a compressed block
    ///
    /// The returned slice borrows the codec's output buffer and is valid until the next call.
    pub fn compress(&mut self, raw: &[u8]) -> Result<&[u8]> {
        self.compress_parts(&[raw])
    }

    /// Frames the concatenation of `parts` into a single compressed block
    pub fn compress_parts(&mut self, parts: &[&[u8]]) -> Result<&[u8]> {
        let mut hasher = Hasher::new();
        parts.iter().for_each(|part| hasher.update(part));
        let checksum = hasher.finalize();

        let src: &[u8] = if let [single] = parts {
            single
        } else {
            self.raw.clear();
            parts.iter().for_each(|part| self.raw.extend_from_slice(part));
            &self.raw
        };
        let total = src.len();
        sized_compress(&mut self.zbuf, src, self.level, &mut self.cctx)?;

        let bsize = SIZE_BLOCK_HEADER + self.zbuf.len() + SIZE_BLOCK_TRAILER;
        let bsize = u32::try_from(bsize).map_err(|_| WriteError::BlockTooLarge(bsize))?;
        let total = u32::try_from(total).map_err(|_| WriteError::BlockTooLarge(total))?;

        self.block.clear();
        self.block
            .extend_from_slice(BlockHeader::new(bsize).as_bytes());
        self.block.extend_from_slice(&self.zbuf);
        self.block
            .extend_from_slice(BlockTrailer::new(checksum, total).as_bytes());
        Ok(&self.block)
    }

    /// Validates the frame of `block` and returns its header and trailer
    pub fn frame(block: &[u8]) -> Result<(BlockHeader, BlockTrailer)> {
        let header = BlockHeader::from_bytes(block)?;
        if header.block_len() != block.len() {
            return Err(CorruptBlockError::BlockSizeMismatch {
                declared: u64::from(header.bsize),
                available: block.len() as u64,
            }
            .into());
        }
        let trailer = BlockTrailer::from_block(block)?;
        Ok((header, trailer))
    }

    /// Validates the frame and the recorded decompressed size of `block`
    ///
    /// The trailer size must agree with the content size declared by the zstd frame header.
    fn checked_trailer(block: &[u8]) -> Result<BlockTrailer> {
        let (_, trailer) = Self::frame(block)?;
        let expected = u64::from(trailer.uncompressed_size);
        if expected == 0 {
            return Err(CorruptBlockError::EmptyBlock.into());
        }
        let payload = &block[SIZE_BLOCK_HEADER..block.len() - SIZE_BLOCK_TRAILER];
        match zstd_safe::get_frame_content_size(payload) {
            Ok(Some(found)) if found == expected => Ok(trailer),
            Ok(Some(found)) => {
                Err(CorruptBlockError::UncompressedSizeMismatch { expected, found }.into())
            }
            Ok(None) => {
                Err(CorruptBlockError::Decompression("frame does not declare its size").into())
            }
            Err(_) => Err(CorruptBlockError::Decompression("invalid frame header").into()),
        }
    }

    /// Decompresses a framed block into `dst`, resizing it to the recorded size
    pub fn decompress(&mut self, block: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        let trailer = Self::checked_trailer(block)?;
        dst.clear();
        dst.resize(trailer.uncompressed_size as usize, 0);
        self.decompress_into(block, dst.as_mut_slice())
    }

    /// Decompresses a framed block into a buffer of exactly the recorded size
    pub fn decompress_into(&mut self, block: &[u8], dst: &mut [u8]) -> Result<()> {
        let trailer = Self::checked_trailer(block)?;
        let expected = trailer.uncompressed_size as usize;
        if dst.len() != expected {
            return Err(CorruptBlockError::UncompressedSizeMismatch {
                expected: expected as u64,
                found: dst.len() as u64,
            }
            .into());
        }

        let payload = &block[SIZE_BLOCK_HEADER..block.len() - SIZE_BLOCK_TRAILER];
        let found = self
            .dctx
            .decompress(dst, payload)
            .map_err(|code| CorruptBlockError::Decompression(zstd_safe::get_error_name(code)))?;
        if found != expected {
            return Err(CorruptBlockError::UncompressedSizeMismatch {
                expected: expected as u64,
                found: found as u64,
            }
            .into());
        }

        let checksum = crc32fast::hash(dst);
        if checksum != trailer.checksum {
            return Err(CorruptBlockError::ChecksumMismatch {
                expected: trailer.checksum,
                found: checksum,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sample_payload() -> Vec<u8> {
        (0..4096u32).flat_map(|x| (x % 251).to_le_bytes()).collect()
    }

    #[test]
    fn test_block_size_invariant() -> Result<()> {
        let raw = sample_payload();
        let mut codec = BlockCodec::default();
        let block = codec.compress(&raw)?.to_vec();

        let (header, trailer) = BlockCodec::frame(&block)?;
        assert_eq!(header.block_len(), block.len());
        assert_eq!(
            header.payload_len() + SIZE_BLOCK_HEADER + SIZE_BLOCK_TRAILER,
            block.len()
        );
        assert_eq!(trailer.uncompressed_size as usize, raw.len());

        let mut out = Vec::new();
        codec.decompress(&block, &mut out)?;
        assert_eq!(out, raw);
        Ok(())
    }

    #[test]
    fn test_compress_parts_matches_concatenation() -> Result<()> {
        let meta = b"meta-stream".repeat(20);
        let runs = b"run-lengths".repeat(30);
        let mut codec = BlockCodec::default();
        let block = codec.compress_parts(&[&meta, &runs])?.to_vec();

        let mut out = Vec::new();
        codec.decompress(&block, &mut out)?;
        assert_eq!(&out[..meta.len()], meta.as_slice());
        assert_eq!(&out[meta.len()..], runs.as_slice());
        Ok(())
    }

    #[test]
    fn test_invalid_magic() -> Result<()> {
        let mut block = BlockCodec::default().compress(&sample_payload())?.to_vec();
        block[0] ^= 0xff;
        let err = BlockCodec::default()
            .decompress(&block, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::InvalidBlockMagic(_))
        ));
        Ok(())
    }

    #[test]
    fn test_size_mismatch() -> Result<()> {
        let block = BlockCodec::default().compress(&sample_payload())?.to_vec();
        let err = BlockCodec::default()
            .decompress(&block[..block.len() - 1], &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::BlockSizeMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_checksum_mismatch() -> Result<()> {
        let mut block = BlockCodec::default().compress(&sample_payload())?.to_vec();
        let checksum_pos = block.len() - SIZE_BLOCK_TRAILER;
        block[checksum_pos] ^= 0x01;
        let err = BlockCodec::default()
            .decompress(&block, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::ChecksumMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_wrong_recorded_size() -> Result<()> {
        let mut block = BlockCodec::default().compress(&sample_payload())?.to_vec();
        let size_pos = block.len() - 4;
        block[size_pos] ^= 0x01;
        let err = BlockCodec::default()
            .decompress(&block, &mut Vec::new())
            .unwrap_err();
        assert!(err.is_corruption());
        Ok(())
    }

    #[test]
    fn test_empty_block_rejected() -> Result<()> {
        let block = BlockCodec::default().compress(&[])?.to_vec();
        let err = BlockCodec::default()
            .decompress(&block, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::EmptyBlock)
        ));
        Ok(())
    }

    #[test]
    fn test_oversized_recorded_size() -> Result<()> {
        let mut block = BlockCodec::default().compress(&sample_payload())?.to_vec();
        let size_pos = block.len() - 4;
        block[size_pos..].copy_from_slice(&u32::MAX.to_ne_bytes());

        let mut out = Vec::new();
        let err = BlockCodec::default()
            .decompress(&block, &mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::UncompressedSizeMismatch {
                expected: 0xFFFF_FFFF,
                ..
            })
        ));
        assert!(out.is_empty());
        Ok(())
    }
}
