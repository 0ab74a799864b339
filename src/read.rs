//! Sequential and block-addressed container reading
//!
//! A [`ContainerReader`] validates every block it touches: the block frame, the CRC32 of the
//! decompressed bytes, the inline index entry, record alignment and contig ids. The first
//! failure moves the reader into [`ReaderState::Corrupt`] and every later call fails with
//! [`ReadError::Poisoned`].
//!
//! ```rust,no_run
//! use ldpack::LdReader;
//!
//! let mut reader = LdReader::open("pairs.ldp").unwrap();
//! while reader.next_block().unwrap() {
//!     for i in 0..reader.block_len() {
//!         let entry = reader.record_at(i).unwrap();
//!         println!("{:?} r2={}", entry.site_a(), entry.r2);
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, warn};

use crate::core::utils::read_exact_at;
use crate::core::{
    check_summary, read_index_entry, read_unit, scan_index, BlockDecoder, ContigTable,
    FileHeader, Import, Index, IndexEntry, Layout, Ld, LiteralSection, Unit, SIZE_BLOCK_HEADER,
    SIZE_FILE_HEADER, SIZE_INDEX_ENTRY,
};
use crate::error::{Error, ReadError, Result};

/// Reader for genotype import containers
pub type ImportReader<R = BufReader<File>> = ContainerReader<Import, R>;

/// Reader for LD result containers
pub type LdReader<R = BufReader<File>> = ContainerReader<Ld, R>;

/// Lifecycle of a [`ContainerReader`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Header and literal section validated, no block loaded
    Opened,
    /// A block is loaded
    Iterating,
    /// The end-of-file marker (or the end of a block selection) was reached
    Exhausted,
    /// A validation failure occurred; the reader refuses further work
    Corrupt,
}

/// A streaming reader over any seekable byte source
pub struct ContainerReader<L: Layout, R: Read + Seek = BufReader<File>> {
    inner: R,

    header: FileHeader,
    literals: LiteralSection,
    file_len: u64,

    state: ReaderState,

    /// Byte offset of the next unit
    pos: u64,
    /// The stream position may differ from `pos`
    needs_seek: bool,

    /// Framed bytes of the current block
    block_buf: Vec<u8>,
    decoder: BlockDecoder<L>,

    /// Next record returned by `next_record`
    cursor: usize,

    /// Blocks loaded since the last rewind
    blocks_read: usize,
    /// Whether this pass started at the first block and has not jumped
    sequential: bool,

    /// Lazily scanned index
    index: Option<Index>,
    /// Remaining block ids selected by `seek_blocks`
    queue: Option<VecDeque<usize>>,
}
impl<L: Layout> ContainerReader<L, BufReader<File>> {
    /// Opens the container at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }
        let reader = Self::new(BufReader::new(file))?;
        debug!(
            "opened {} ({:?} container, {} bytes)",
            path.display(),
            L::KIND,
            reader.file_len
        );
        Ok(reader)
    }
}
impl<L: Layout, R: Read + Seek> ContainerReader<L, R> {
    /// Validates the header and loads the literal section from `inner`
    pub fn new(mut inner: R) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;

        let header = FileHeader::read_expecting(&mut inner, L::KIND)?;
        if header.data_offset() > file_len {
            return Err(Error::Truncated {
                offset: SIZE_FILE_HEADER as u64,
                needed: u64::from(header.literal_size),
            });
        }
        let literals = LiteralSection::read_from(&mut inner, &header)?;
        if !header.is_finalized() {
            warn!("container summary was never finalized");
        }

        Ok(Self {
            inner,
            pos: header.data_offset(),
            header,
            literals,
            file_len,
            state: ReaderState::Opened,
            needs_seek: false,
            block_buf: Vec::default(),
            decoder: BlockDecoder::new(),
            cursor: 0,
            blocks_read: 0,
            sequential: true,
            index: None,
            queue: None,
        })
    }

    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    #[must_use]
    pub fn literals(&self) -> &LiteralSection {
        &self.literals
    }

    #[must_use]
    pub fn contigs(&self) -> &ContigTable {
        self.literals.contigs()
    }

    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.literals.n_samples()
    }

    #[must_use]
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Blocks loaded since the reader was opened or rewound
    #[must_use]
    pub fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    /// Number of records in the loaded block
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.decoder.len()
    }

    /// Index entry of the loaded block
    #[must_use]
    pub fn current_block(&self) -> Option<&IndexEntry> {
        (self.state == ReaderState::Iterating).then(|| self.decoder.index())
    }

    fn check_usable(&self) -> Result<()> {
        if self.state == ReaderState::Corrupt {
            return Err(ReadError::Poisoned.into());
        }
        Ok(())
    }

    /// Loads the next block
    ///
    /// Returns `false` once the end-of-file marker (or the end of a block selection) is
    /// reached. A container without an end-of-file marker is reported as truncated.
    pub fn next_block(&mut self) -> Result<bool> {
        self.check_usable()?;
        if self.state == ReaderState::Exhausted {
            return Ok(false);
        }
        match self.advance() {
            Ok(true) => {
                self.state = ReaderState::Iterating;
                Ok(true)
            }
            Ok(false) => {
                self.state = ReaderState::Exhausted;
                self.decoder.clear();
                Ok(false)
            }
            Err(e) => {
                self.state = ReaderState::Corrupt;
                self.decoder.clear();
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<bool> {
        if let Some(queue) = self.queue.as_mut() {
            let Some(block_id) = queue.pop_front() else {
                return Ok(false);
            };
            let entry = self.entry(block_id)?;
            self.pos = entry.byte_offset;
            self.needs_seek = true;
        }
        if self.needs_seek {
            self.inner.seek(SeekFrom::Start(self.pos))?;
            self.needs_seek = false;
        }

        let block = match read_unit(&mut self.inner, self.pos, self.file_len)? {
            Unit::Eof => {
                if self.sequential {
                    check_summary(&self.header, self.blocks_read)?;
                }
                return Ok(false);
            }
            Unit::Block(block) => block,
        };

        let start = self.pos;
        let end = start + block.block_len() as u64;
        if end > self.file_len {
            return Err(Error::Truncated {
                offset: start,
                needed: block.block_len() as u64,
            });
        }

        // header was consumed by read_unit, read the rest of the frame
        self.block_buf.clear();
        self.block_buf.extend_from_slice(block.as_bytes());
        self.block_buf.resize(block.block_len(), 0);
        read_exact_at(
            &mut self.inner,
            &mut self.block_buf[SIZE_BLOCK_HEADER..],
            start + SIZE_BLOCK_HEADER as u64,
        )?;

        let entry = read_index_entry(&mut self.inner, end)?;
        entry.validate_span(start, end)?;
        self.decoder
            .decode(&self.block_buf, &entry, self.header.n_contigs)?;

        self.pos = end + SIZE_INDEX_ENTRY as u64;
        self.cursor = 0;
        self.blocks_read += 1;
        Ok(true)
    }

    /// View of the `i`-th record in the loaded block
    pub fn record_at(&self, i: usize) -> Result<L::View<'_>> {
        self.check_usable()?;
        self.decoder.get(i).ok_or_else(|| {
            ReadError::OutOfRange {
                requested_index: i,
                max_index: self.decoder.len(),
            }
            .into()
        })
    }

    /// Returns the next record, loading blocks as needed
    pub fn next_record(&mut self) -> Result<Option<L::View<'_>>> {
        while self.state != ReaderState::Iterating || self.cursor >= self.decoder.len() {
            if !self.next_block()? {
                return Ok(None);
            }
        }
        let i = self.cursor;
        self.cursor += 1;
        Ok(self.decoder.get(i))
    }

    /// Scans the index by walking block headers, without decompressing
    pub fn load_index(&mut self) -> Result<&Index> {
        self.check_usable()?;
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                self.needs_seek = true;
                scan_index(&mut self.inner, &self.header)?
            }
        };
        Ok(self.index.insert(index))
    }

    fn entry(&mut self, block_id: usize) -> Result<IndexEntry> {
        let index = self.load_index()?;
        index.get(block_id).copied().ok_or_else(|| {
            ReadError::BlockOutOfRange {
                requested: block_id,
                num_blocks: index.num_blocks(),
            }
            .into()
        })
    }

    /// Loads the block `block_id`; iteration continues after it in file order
    pub fn seek_block(&mut self, block_id: usize) -> Result<()> {
        let entry = self.entry(block_id)?;
        self.queue = None;
        self.sequential = false;
        self.pos = entry.byte_offset;
        self.needs_seek = true;
        self.state = ReaderState::Opened;
        self.next_block()?;
        Ok(())
    }

    /// Restricts iteration to the blocks overlapping any of the given (contig, position)
    /// pairs, visited in file order
    ///
    /// Returns the selected block ids. The next call to [`Self::next_block`] or
    /// [`Self::next_record`] loads the first of them.
    pub fn seek_blocks(&mut self, loci: &[(u32, u32)]) -> Result<Vec<usize>> {
        let index = self.load_index()?;
        let mut selected: Vec<usize> = loci
            .iter()
            .flat_map(|&(contig, position)| index.find_blocks(contig, position))
            .collect();
        selected.sort_unstable();
        selected.dedup();

        self.queue = Some(selected.iter().copied().collect());
        self.sequential = false;
        self.state = ReaderState::Opened;
        self.decoder.clear();
        Ok(selected)
    }

    /// Restarts sequential iteration at the first block
    pub fn rewind(&mut self) -> Result<()> {
        self.check_usable()?;
        self.queue = None;
        self.sequential = true;
        self.blocks_read = 0;
        self.pos = self.header.data_offset();
        self.needs_seek = true;
        self.state = ReaderState::Opened;
        self.decoder.clear();
        Ok(())
    }
}
