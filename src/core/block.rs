use std::marker::PhantomData;

use super::codec::BlockCodec;
use super::index::IndexEntry;
use super::layout::{check_contig, Layout};
use super::utils::calculate_offsets;
use crate::error::{CorruptBlockError, Result, WriteError};

/// Accumulates records into the meta and payload streams of one block
pub struct BlockBuilder<L: Layout> {
    /// Fixed-size entries
    meta: Vec<u8>,
    /// Variable payload, in record order
    payload: Vec<u8>,

    /// In-progress index entry (count, contig, position bounds)
    entry: IndexEntry,

    /// Accumulation threshold in bytes
    block_size: usize,

    _layout: PhantomData<L>,
}
impl<L: Layout> BlockBuilder<L> {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            meta: Vec::default(),
            payload: Vec::default(),
            entry: IndexEntry::default(),
            block_size,
            _layout: PhantomData,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    /// Number of records accumulated
    #[must_use]
    pub fn len(&self) -> usize {
        self.entry.n_records as usize
    }

    /// Accumulated bytes across both streams
    #[must_use]
    pub fn current_size(&self) -> usize {
        self.meta.len() + self.payload.len()
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the accumulated bytes reached the threshold
    #[must_use]
    pub fn should_flush(&self) -> bool {
        self.current_size() >= self.block_size
    }

    /// Whether `record` has to start a new block
    pub fn breaks(&self, record: &L::Record<'_>) -> bool {
        L::breaks_block(&self.entry, L::locus(record))
    }

    pub fn push(&mut self, record: &L::Record<'_>) {
        L::encode(record, &mut self.meta, &mut self.payload);
        self.entry.observe(L::locus(record));
    }

    /// Compresses both streams into one framed block
    ///
    /// The returned entry has its sizes filled in; the byte span is set at commit time.
    pub fn compress<'c>(&self, codec: &'c mut BlockCodec) -> Result<(&'c [u8], IndexEntry)> {
        let mut entry = self.entry;
        entry.meta_size = u32::try_from(self.meta.len())
            .map_err(|_| WriteError::BlockTooLarge(self.meta.len()))?;
        entry.uncompressed_size = u32::try_from(self.current_size())
            .map_err(|_| WriteError::BlockTooLarge(self.current_size()))?;
        let block = codec.compress_parts(&[&self.meta, &self.payload])?;
        Ok((block, entry))
    }

    pub fn clear(&mut self) {
        self.meta.clear();
        self.payload.clear();
        self.entry.reset();
    }
}

/// Decodes one block into typed entries and payload slices
///
/// Holds its own codec and buffers, so every thread needs its own decoder.
pub struct BlockDecoder<L: Layout> {
    codec: BlockCodec,

    /// Decompressed block: meta stream followed by payload stream
    raw: Vec<u8>,

    /// Decoded fixed-size entries
    entries: Vec<L::Entry>,

    /// Payload offsets per entry (relative to the payload stream)
    offsets: Vec<usize>,

    /// Index entry of the decoded block
    index: IndexEntry,
}
impl<L: Layout> Default for BlockDecoder<L> {
    fn default() -> Self {
        Self {
            codec: BlockCodec::default(),
            raw: Vec::default(),
            entries: Vec::default(),
            offsets: Vec::default(),
            index: IndexEntry::default(),
        }
    }
}
impl<L: Layout> Clone for BlockDecoder<L> {
    /// A clone starts empty with fresh decompression state
    fn clone(&self) -> Self {
        Self::default()
    }
}
impl<L: Layout> BlockDecoder<L> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.entries.clear();
        self.offsets.clear();
        self.index = IndexEntry::default();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index entry of the decoded block
    #[must_use]
    pub fn index(&self) -> &IndexEntry {
        &self.index
    }

    /// Decompresses and validates `block` against its index entry
    ///
    /// On error the decoder is left empty.
    pub fn decode(&mut self, block: &[u8], index: &IndexEntry, n_contigs: u32) -> Result<()> {
        self.clear();
        let result = self.decode_inner(block, index, n_contigs);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn decode_inner(&mut self, block: &[u8], index: &IndexEntry, n_contigs: u32) -> Result<()> {
        let (_, trailer) = BlockCodec::frame(block)?;
        if trailer.uncompressed_size != index.uncompressed_size {
            return Err(CorruptBlockError::UncompressedSizeMismatch {
                expected: u64::from(index.uncompressed_size),
                found: u64::from(trailer.uncompressed_size),
            }
            .into());
        }
        if index.is_mixed() && !L::MIXED_BLOCKS {
            return Err(CorruptBlockError::MixedContigs.into());
        }
        if let Some(contig) = index.contig() {
            check_contig(contig, n_contigs)?;
        }

        self.codec.decompress(block, &mut self.raw)?;

        // split the meta stream from the payload stream
        let meta_size = index.meta_size as usize;
        if meta_size > self.raw.len() {
            return Err(CorruptBlockError::PayloadSizeMismatch {
                expected: meta_size,
                found: self.raw.len(),
            }
            .into());
        }
        let record_size = size_of::<L::Entry>();
        if meta_size % record_size != 0 {
            return Err(CorruptBlockError::Misaligned {
                size: meta_size,
                record_size,
            }
            .into());
        }
        let (meta, payload) = self.raw.split_at(meta_size);

        // decode fixed-size entries
        self.entries.extend(
            meta.chunks_exact(record_size)
                .map(bytemuck::pod_read_unaligned::<L::Entry>),
        );
        if self.entries.len() != index.n_records as usize {
            return Err(CorruptBlockError::RecordCountMismatch {
                expected: index.n_records as usize,
                found: self.entries.len(),
            }
            .into());
        }
        for entry in &self.entries {
            L::check_contigs(entry, n_contigs)?;
        }

        // locate each entry's payload
        calculate_offsets(self.entries.iter().map(L::payload_len), &mut self.offsets);
        let expected = self.offsets.last().copied().unwrap_or(0);
        if expected != payload.len() {
            return Err(CorruptBlockError::PayloadSizeMismatch {
                expected,
                found: payload.len(),
            }
            .into());
        }

        self.index = *index;
        Ok(())
    }

    /// View of the `i`-th record of the decoded block
    #[must_use]
    pub fn get(&self, i: usize) -> Option<L::View<'_>> {
        let entry = self.entries.get(i)?;
        let meta_size = self.index.meta_size as usize;
        let start = meta_size + self.offsets[i];
        let end = meta_size + self.offsets[i + 1];
        Some(L::view(entry, &self.raw[start..end], &self.index))
    }

    pub fn iter(&self) -> impl Iterator<Item = L::View<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Import, ImportRecord, Ld, LdEntry, LdRecord, Site};
    use crate::error::Error;

    fn ld_block(n: u32) -> Result<(Vec<u8>, IndexEntry)> {
        let mut builder = BlockBuilder::<Ld>::new(usize::MAX);
        for i in 0..n {
            builder.push(&LdRecord::new(Site::new(0, i * 10), Site::new(1, i * 10 + 5)));
        }
        let mut codec = BlockCodec::default();
        let (block, entry) = builder.compress(&mut codec)?;
        Ok((block.to_vec(), entry))
    }

    #[test]
    fn test_should_flush_threshold() {
        let mut builder = BlockBuilder::<Ld>::new(4 * size_of::<LdEntry>());
        for i in 0..3 {
            builder.push(&LdRecord::new(Site::new(0, i), Site::new(0, i + 1)));
            assert!(!builder.should_flush());
        }
        builder.push(&LdRecord::new(Site::new(0, 3), Site::new(0, 4)));
        assert!(builder.should_flush());
        assert_eq!(builder.len(), 4);

        builder.clear();
        assert!(builder.is_empty());
        assert_eq!(builder.current_size(), 0);
    }

    #[test]
    fn test_ld_decode() -> Result<()> {
        let (block, entry) = ld_block(5)?;
        assert_eq!(entry.meta_size, entry.uncompressed_size);

        let mut decoder = BlockDecoder::<Ld>::new();
        decoder.decode(&block, &entry, 2)?;
        assert_eq!(decoder.len(), 5);
        let third = decoder.get(2).map(LdEntry::site_a);
        assert_eq!(third, Some(Site::new(0, 20)));
        assert!(decoder.get(5).is_none());
        Ok(())
    }

    #[test]
    fn test_import_decode() -> Result<()> {
        let runs: [&[u8]; 3] = [&[1, 2], &[], &[3, 4, 5]];
        let mut builder = BlockBuilder::<Import>::new(usize::MAX);
        for (i, r) in runs.iter().enumerate() {
            builder.push(&ImportRecord::new(1, 100 + i as u32, r.len() as u32, r));
        }
        let mut codec = BlockCodec::default();
        let (block, entry) = builder.compress(&mut codec)?;

        let mut decoder = BlockDecoder::<Import>::new();
        decoder.decode(block, &entry, 2)?;
        let decoded: Vec<Vec<u8>> = decoder.iter().map(|e| e.runs().to_vec()).collect();
        assert_eq!(decoded, vec![vec![1, 2], vec![], vec![3, 4, 5]]);
        assert!(decoder.iter().all(|e| e.contig() == 1));
        Ok(())
    }

    #[test]
    fn test_record_count_mismatch() -> Result<()> {
        let (block, mut entry) = ld_block(3)?;
        entry.n_records = 4;
        let mut decoder = BlockDecoder::<Ld>::new();
        let err = decoder.decode(&block, &entry, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::RecordCountMismatch {
                expected: 4,
                found: 3
            })
        ));
        assert!(decoder.is_empty());
        Ok(())
    }

    #[test]
    fn test_misaligned_meta() -> Result<()> {
        let (block, mut entry) = ld_block(3)?;
        entry.meta_size -= 1;
        let err = BlockDecoder::<Ld>::new()
            .decode(&block, &entry, 2)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::Misaligned { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_contig_out_of_range() -> Result<()> {
        let (block, entry) = ld_block(2)?;
        let err = BlockDecoder::<Ld>::new()
            .decode(&block, &entry, 1)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::ContigOutOfRange { contig: 1, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_mixed_import_block_rejected() -> Result<()> {
        let mut builder = BlockBuilder::<Import>::new(usize::MAX);
        builder.push(&ImportRecord::new(0, 1, 0, &[]));
        let mut codec = BlockCodec::default();
        let (block, mut entry) = builder.compress(&mut codec)?;
        entry.contig_id = crate::MIXED_CONTIG;
        let err = BlockDecoder::<Import>::new()
            .decode(block, &entry, 1)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CorruptBlock(CorruptBlockError::MixedContigs)
        ));
        Ok(())
    }
}
