use std::io::{Read, Seek, SeekFrom};

use bytemuck::{Pod, Zeroable};

use super::codec::{BlockHeader, SIZE_BLOCK_HEADER};
use super::header::FileHeader;
use super::layout::Locus;
use super::utils::read_exact_at;
use crate::error::{CorruptBlockError, Error, HeaderError, Result};
use crate::{EOF_MARKER, INDEX_MAGIC, MIXED_CONTIG};

/// Size of an inline index entry in bytes
pub const SIZE_INDEX_ENTRY: usize = size_of::<IndexEntry>();

/// Size of the end-of-file marker in bytes
pub const SIZE_EOF_MARKER: usize = size_of::<[u64; 4]>();

/// Describes one committed block.
///
/// Stored inline directly after the block it describes. This is stored identically in
/// memory and on disk.
#[derive(Copy, Clone, Pod, Zeroable, Debug, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct IndexEntry {
    magic: [u8; 4],

    /// Number of records in the block
    pub n_records: u32,

    /// Byte offset of the block header
    pub byte_offset: u64,

    /// Byte offset one past the block trailer
    pub byte_offset_end: u64,

    /// Decompressed size of the block
    pub uncompressed_size: u32,

    /// Length of the fixed-size entry stream at the start of the decompressed block
    pub meta_size: u32,

    /// Contig shared by every record, or [`MIXED_CONTIG`]
    pub contig_id: i32,

    /// Smallest record position in the block
    pub min_position: u32,

    /// Largest record position in the block
    pub max_position: u32,

    reserved: u32,
}
impl Default for IndexEntry {
    fn default() -> Self {
        Self {
            magic: *INDEX_MAGIC,
            n_records: 0,
            byte_offset: 0,
            byte_offset_end: 0,
            uncompressed_size: 0,
            meta_size: 0,
            contig_id: MIXED_CONTIG,
            min_position: u32::MAX,
            max_position: 0,
            reserved: 0,
        }
    }
}
impl IndexEntry {
    /// Accounts for one more record at `locus`
    ///
    /// Contig ids that do not fit the signed field are recorded as [`MIXED_CONTIG`].
    pub fn observe(&mut self, locus: Locus) {
        let contig = i32::try_from(locus.contig).unwrap_or(MIXED_CONTIG);
        if self.n_records == 0 {
            self.contig_id = contig;
            self.min_position = locus.position;
            self.max_position = locus.position;
        } else {
            if self.contig_id != contig {
                self.contig_id = MIXED_CONTIG;
            }
            self.min_position = self.min_position.min(locus.position);
            self.max_position = self.max_position.max(locus.position);
        }
        self.n_records += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_records == 0
    }

    #[must_use]
    pub fn is_mixed(&self) -> bool {
        self.contig_id == MIXED_CONTIG
    }

    /// The contig shared by every record, if any
    #[must_use]
    pub fn contig(&self) -> Option<u32> {
        u32::try_from(self.contig_id).ok()
    }

    /// Size of the framed block in bytes
    #[must_use]
    pub fn block_len(&self) -> u64 {
        self.byte_offset_end.saturating_sub(self.byte_offset)
    }

    /// Whether a record at (`contig`, `position`) could live in this block
    ///
    /// Blocks mixing contigs match on position alone.
    #[must_use]
    pub fn overlaps(&self, contig: u32, position: u32) -> bool {
        !self.is_empty()
            && (self.is_mixed() || self.contig() == Some(contig))
            && (self.min_position..=self.max_position).contains(&position)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Parses an entry read at byte position `pos`
    pub fn from_bytes(bytes: &[u8], pos: u64) -> Result<Self> {
        if bytes.len() < SIZE_INDEX_ENTRY {
            return Err(Error::Truncated {
                offset: pos,
                needed: SIZE_INDEX_ENTRY as u64,
            });
        }
        let entry: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_INDEX_ENTRY]);
        if entry.magic != *INDEX_MAGIC {
            return Err(CorruptBlockError::InvalidIndexMagic(pos).into());
        }
        Ok(entry)
    }

    /// Checks that this entry describes the block spanning `block_offset..block_end`
    pub fn validate_span(&self, block_offset: u64, block_end: u64) -> Result<()> {
        if self.byte_offset != block_offset || self.byte_offset_end != block_end {
            return Err(CorruptBlockError::IndexMismatch {
                entry_offset: self.byte_offset,
                entry_end: self.byte_offset_end,
                block_offset,
                block_end,
            }
            .into());
        }
        Ok(())
    }
}

/// All index entries of a container, in commit order
#[derive(Clone, Debug, Default)]
pub struct Index {
    entries: Vec<IndexEntry>,
}
impl Index {
    #[must_use]
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn num_records(&self) -> usize {
        self.entries.iter().map(|e| e.n_records as usize).sum()
    }

    #[must_use]
    pub fn get(&self, block_id: usize) -> Option<&IndexEntry> {
        self.entries.get(block_id)
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.iter()
    }

    /// Largest decompressed block in bytes
    #[must_use]
    pub fn largest_block(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| e.uncompressed_size)
            .max()
            .unwrap_or(0)
    }

    /// Ids of every block that may contain a record at (`contig`, `position`)
    #[must_use]
    pub fn find_blocks(&self, contig: u32, position: u32) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.overlaps(contig, position))
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether blocks were committed in genomic order without overlap
    ///
    /// Containers written by several concurrent writers are generally unsorted.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.entries.iter().all(|e| !e.is_mixed())
            && self.entries.windows(2).all(|pair| {
                let (a, b) = (&pair[0], &pair[1]);
                a.contig_id < b.contig_id
                    || (a.contig_id == b.contig_id && a.max_position <= b.min_position)
            })
    }

    /// Block ids ordered by (contig, first position); blocks mixing contigs sort last
    #[must_use]
    pub fn sorted_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by_key(|&id| {
            let e = &self.entries[id];
            (e.is_mixed(), e.contig_id, e.min_position, e.byte_offset)
        });
        order
    }
}

/// What the reader finds at the start of the next unit
pub(crate) enum Unit {
    Block(BlockHeader),
    Eof,
}

/// Reads either a block header or the end-of-file marker at byte position `pos`
///
/// The marker must end exactly at `file_len`.
pub(crate) fn read_unit<R: Read>(reader: &mut R, pos: u64, file_len: u64) -> Result<Unit> {
    let mut buf = [0u8; SIZE_BLOCK_HEADER];
    read_exact_at(reader, &mut buf, pos)?;

    let marker: [u8; SIZE_EOF_MARKER] = bytemuck::cast(EOF_MARKER);
    if buf == marker[..SIZE_BLOCK_HEADER] {
        let mut rest = [0u8; SIZE_EOF_MARKER - SIZE_BLOCK_HEADER];
        read_exact_at(reader, &mut rest, pos + SIZE_BLOCK_HEADER as u64)?;
        if rest != marker[SIZE_BLOCK_HEADER..] || pos + SIZE_EOF_MARKER as u64 != file_len {
            return Err(CorruptBlockError::InvalidEofMarker(pos).into());
        }
        return Ok(Unit::Eof);
    }

    match BlockHeader::from_bytes(&buf) {
        Ok(header) => Ok(Unit::Block(header)),
        Err(Error::CorruptBlock(CorruptBlockError::InvalidBlockMagic(_))) => {
            Err(CorruptBlockError::InvalidBlockMagic(pos).into())
        }
        Err(e) => Err(e),
    }
}

/// Reads the inline index entry at byte position `pos`
pub(crate) fn read_index_entry<R: Read>(reader: &mut R, pos: u64) -> Result<IndexEntry> {
    let mut buf = [0u8; SIZE_INDEX_ENTRY];
    read_exact_at(reader, &mut buf, pos)?;
    IndexEntry::from_bytes(&buf, pos)
}

/// Fails if a finalized header disagrees with the number of blocks found
pub(crate) fn check_summary(header: &FileHeader, found: usize) -> Result<()> {
    match header.num_blocks() {
        Some(declared) if declared != found => Err(HeaderError::SummaryMismatch {
            declared: header.n_blocks,
            found,
        }
        .into()),
        _ => Ok(()),
    }
}

/// Recovers the index by walking block headers, never decompressing
pub(crate) fn scan_index<R: Read + Seek>(reader: &mut R, header: &FileHeader) -> Result<Index> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let mut pos = header.data_offset();
    reader.seek(SeekFrom::Start(pos))?;

    let mut entries = Vec::new();
    loop {
        match read_unit(reader, pos, file_len)? {
            Unit::Eof => break,
            Unit::Block(block) => {
                let end = pos + block.block_len() as u64;
                if end > file_len {
                    return Err(Error::Truncated {
                        offset: pos,
                        needed: block.block_len() as u64,
                    });
                }
                reader.seek(SeekFrom::Start(end))?;
                let entry = read_index_entry(reader, end)?;
                entry.validate_span(pos, end)?;
                entries.push(entry);
                pos = end + SIZE_INDEX_ENTRY as u64;
            }
        }
    }

    check_summary(header, entries.len())?;
    Ok(Index::new(entries))
}
