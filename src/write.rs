//! Container writers
//!
//! One generic [`ContainerWriter`] serves both container kinds:
//!
//! - [`ImportWriter`] stores run-length encoded genotype lines ([`Import`] layout).
//! - [`LdWriter`] stores fixed-size LD pair records ([`Ld`] layout).
//!
//! # Concurrent writing
//!
//! The canonical writer owns the output sink and the commit state behind a mutex. Any number
//! of [`SlaveWriter`]s can be borrowed from it and moved into worker threads. Every slave
//! accumulates and compresses its own blocks and only takes the lock to append a finished
//! `[block][index entry]` unit, so compression runs fully in parallel while the file stays
//! consistent.
//!
//! ```rust,no_run
//! use ldpack::{ContigDescriptor, ImportRecord, ImportWriter, LiteralSection};
//!
//! let literals = LiteralSection::new(
//!     vec![ContigDescriptor::new("chr1", 248_956_422)],
//!     vec!["S1".to_string(), "S2".to_string()],
//! );
//! let mut writer = ImportWriter::create("genotypes.ldi", literals).unwrap();
//! std::thread::scope(|scope| {
//!     for worker in 0..4u32 {
//!         let mut slave = writer.slave();
//!         scope.spawn(move || {
//!             let runs = [0x12, 0x34];
//!             let record = ImportRecord::new(0, 1_000 * worker, 2, &runs);
//!             slave.append(&record).unwrap();
//!         });
//!     }
//! });
//! writer.finalize().unwrap();
//! ```
//!
//! # Finalizing
//!
//! [`ContainerWriter::finalize`] flushes pending records, writes the end-of-file marker and
//! backpatches the header summary (block count and largest block). The summary can only be
//! patched on file-backed sinks; a console sink leaves it unfinalized.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

use log::{debug, error, trace, warn};
use parking_lot::Mutex;

use crate::core::{
    BlockBuilder, BlockCodec, FileHeader, Import, IndexEntry, Layout, Ld, LiteralSection,
    SIZE_INDEX_ENTRY, SUMMARY_OFFSET,
};
use crate::error::{Result, WriteError};
use crate::sink::{FileSink, OutputSink};
use crate::{DEFAULT_COMPRESSION_LEVEL, EOF_MARKER};

/// Writer for genotype import containers
pub type ImportWriter<S = FileSink> = ContainerWriter<Import, S>;

/// Writer for LD result containers
pub type LdWriter<S = FileSink> = ContainerWriter<Ld, S>;

/// A builder for creating configured [`ContainerWriter`] instances
///
/// # Examples
///
/// ```rust,no_run
/// use ldpack::{Ld, LiteralSection, WriterBuilder};
///
/// let writer = WriterBuilder::<Ld>::default()
///     .block_size(512 * 1024)
///     .compression_level(9)
///     .build("pairs.ldp", LiteralSection::default())
///     .unwrap();
/// ```
pub struct WriterBuilder<L: Layout> {
    /// Accumulation threshold in bytes
    block_size: Option<usize>,
    /// zstd compression level
    compression_level: Option<i32>,
    _layout: PhantomData<L>,
}
impl<L: Layout> Default for WriterBuilder<L> {
    fn default() -> Self {
        Self {
            block_size: None,
            compression_level: None,
            _layout: PhantomData,
        }
    }
}
impl<L: Layout> WriterBuilder<L> {
    /// Sets the number of accumulated bytes that triggers a block flush
    ///
    /// Defaults to the layout's [`Layout::DEFAULT_BLOCK_SIZE`].
    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Sets the zstd compression level (defaults to [`DEFAULT_COMPRESSION_LEVEL`])
    #[must_use]
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Creates the file at `path` and writes the container header
    pub fn build<P: AsRef<Path>>(
        self,
        path: P,
        literals: LiteralSection,
    ) -> Result<ContainerWriter<L, FileSink>> {
        let sink = FileSink::create(path)?;
        self.build_with_sink(sink, literals)
    }

    /// Writes the container header to an already bound sink
    pub fn build_with_sink<S: OutputSink>(
        self,
        sink: S,
        literals: LiteralSection,
    ) -> Result<ContainerWriter<L, S>> {
        ContainerWriter::new(
            sink,
            literals,
            self.block_size.unwrap_or(L::DEFAULT_BLOCK_SIZE),
            self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL),
        )
    }
}

/// State mutated only under the commit lock
struct CommitState<S: OutputSink> {
    sink: S,

    /// Byte offset of the next unit
    offset: u64,

    /// Summary counters
    n_blocks: u32,
    largest_block: u32,
    n_records: u64,

    /// Set when a commit failed part-way
    failed: bool,
}
impl<S: OutputSink> CommitState<S> {
    /// Appends one `[block][index entry]` unit
    fn commit(&mut self, block: &[u8], entry: &mut IndexEntry) -> Result<()> {
        if self.failed {
            return Err(WriteError::SessionAborted.into());
        }
        let result = self.write_unit(block, entry);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn write_unit(&mut self, block: &[u8], entry: &mut IndexEntry) -> Result<()> {
        entry.byte_offset = self.offset;
        entry.byte_offset_end = self.offset + block.len() as u64;

        self.sink.write_all(block)?;
        self.sink.write_all(entry.as_bytes())?;

        self.offset = entry.byte_offset_end + SIZE_INDEX_ENTRY as u64;
        self.n_blocks += 1;
        self.n_records += u64::from(entry.n_records);
        self.largest_block = self.largest_block.max(entry.uncompressed_size);

        trace!(
            "committed block {} ({} records, {} bytes) at offset {}",
            self.n_blocks - 1,
            entry.n_records,
            block.len(),
            entry.byte_offset
        );
        Ok(())
    }

    /// Writes the end-of-file marker, closes the sink and backpatches the summary
    ///
    /// Returns whether the summary was backpatched.
    fn terminate(&mut self) -> Result<bool> {
        self.sink.write_all(bytemuck::bytes_of(&EOF_MARKER))?;
        self.sink.flush()?;

        let path = self.sink.path().map(Path::to_path_buf);
        self.sink.close()?;
        match path {
            Some(path) => {
                patch_summary(&path, self.n_blocks, self.largest_block)?;
                Ok(true)
            }
            None => {
                warn!("output is not file-backed: container summary left unfinalized");
                Ok(false)
            }
        }
    }
}

/// A writer-local block under construction plus its compressor
struct LocalBlock<L: Layout> {
    builder: BlockBuilder<L>,
    codec: BlockCodec,
    blocks_written: usize,
    records_written: usize,
}
impl<L: Layout> LocalBlock<L> {
    fn new(block_size: usize, level: i32) -> Self {
        Self {
            builder: BlockBuilder::new(block_size),
            codec: BlockCodec::new(level),
            blocks_written: 0,
            records_written: 0,
        }
    }
}

/// Adds a record to `local`, committing full blocks to `shared`
fn append_record<L: Layout, S: OutputSink>(
    shared: &Mutex<CommitState<S>>,
    local: &mut LocalBlock<L>,
    record: &L::Record<'_>,
) -> Result<()> {
    if local.builder.breaks(record) {
        flush_block(shared, local)?;
    }
    local.builder.push(record);
    if local.builder.should_flush() {
        flush_block(shared, local)?;
    }
    Ok(())
}

/// Compresses the local block outside the lock and commits it under the lock
fn flush_block<L: Layout, S: OutputSink>(
    shared: &Mutex<CommitState<S>>,
    local: &mut LocalBlock<L>,
) -> Result<()> {
    if local.builder.is_empty() {
        return Ok(());
    }
    let (block, mut entry) = local.builder.compress(&mut local.codec)?;
    shared.lock().commit(block, &mut entry)?;

    local.blocks_written += 1;
    local.records_written += entry.n_records as usize;
    local.builder.clear();
    Ok(())
}

/// Rewrites the summary counters of a finished container in place
fn patch_summary(path: &Path, n_blocks: u32, largest_block: u32) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    file.seek(SeekFrom::Start(SUMMARY_OFFSET))?;
    file.write_all(&FileHeader::summary_bytes(n_blocks, largest_block))?;
    file.sync_all()?;
    Ok(())
}

/// The canonical writer of a container
///
/// Owns the output sink. Records can be appended directly or through any number of
/// [`SlaveWriter`]s created with [`ContainerWriter::slave`]. The writer finalizes itself on
/// drop if [`ContainerWriter::finalize`] was not called; errors at that point can only be
/// logged, so calling `finalize` explicitly is preferred.
pub struct ContainerWriter<L: Layout, S: OutputSink = FileSink> {
    state: Mutex<CommitState<S>>,

    /// Header as written (summary counters updated on finalize)
    header: FileHeader,
    literals: LiteralSection,

    block_size: usize,
    level: i32,

    /// Records appended directly to the canonical writer
    local: LocalBlock<L>,

    finalized: bool,
}
impl<L: Layout> ContainerWriter<L, FileSink> {
    /// Creates a container at `path` with default settings
    pub fn create<P: AsRef<Path>>(path: P, literals: LiteralSection) -> Result<Self> {
        WriterBuilder::default().build(path, literals)
    }
}
impl<L: Layout, S: OutputSink> ContainerWriter<L, S> {
    /// Writes a container with default settings to `sink`
    pub fn with_sink(sink: S, literals: LiteralSection) -> Result<Self> {
        WriterBuilder::default().build_with_sink(sink, literals)
    }

    fn new(mut sink: S, literals: LiteralSection, block_size: usize, level: i32) -> Result<Self> {
        let header = FileHeader::new(L::KIND, &literals)?;
        sink.write_all(header.as_bytes())?;
        literals.write_bytes(&mut sink)?;

        debug!(
            "opened {:?} container ({} contigs, {} samples, block size {block_size})",
            L::KIND,
            literals.n_contigs(),
            literals.n_samples(),
        );

        Ok(Self {
            state: Mutex::new(CommitState {
                sink,
                offset: header.data_offset(),
                n_blocks: 0,
                largest_block: 0,
                n_records: 0,
                failed: false,
            }),
            header,
            literals,
            block_size,
            level,
            local: LocalBlock::new(block_size, level),
            finalized: false,
        })
    }

    /// Creates a worker-local writer appending to this container
    ///
    /// The slave borrows the commit state, so the canonical writer cannot be finalized
    /// while any slave is alive.
    pub fn slave(&self) -> SlaveWriter<'_, L, S> {
        SlaveWriter {
            shared: &self.state,
            local: LocalBlock::new(self.block_size, self.level),
        }
    }

    /// Appends a record, flushing the current block when it is full
    pub fn append(&mut self, record: &L::Record<'_>) -> Result<()> {
        append_record(&self.state, &mut self.local, record)
    }

    /// Whether the pending block reached the threshold
    #[must_use]
    pub fn should_flush(&self) -> bool {
        self.local.builder.should_flush()
    }

    /// Commits the pending block; a no-op when nothing is pending
    pub fn flush(&mut self) -> Result<()> {
        flush_block(&self.state, &mut self.local)
    }

    /// Flushes, terminates the container and backpatches the header summary
    ///
    /// Calling this again after it succeeded is a no-op. A failure while terminating aborts
    /// the session, so later calls return [`WriteError::SessionAborted`].
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.flush()?;

        let mut state = self.state.lock();
        if state.failed {
            return Err(WriteError::SessionAborted.into());
        }
        let patched = match state.terminate() {
            Ok(patched) => patched,
            Err(e) => {
                state.failed = true;
                return Err(e);
            }
        };
        if patched {
            self.header.n_blocks = state.n_blocks;
            self.header.largest_block = state.largest_block;
        }

        debug!(
            "finalized container: {} blocks, {} records, largest block {} bytes",
            state.n_blocks, state.n_records, state.largest_block
        );
        drop(state);
        self.finalized = true;
        Ok(())
    }

    /// Number of blocks committed by all writers
    pub fn blocks_written(&self) -> usize {
        self.state.lock().n_blocks as usize
    }

    /// Number of records committed by all writers
    pub fn records_written(&self) -> u64 {
        self.state.lock().n_records
    }

    /// Largest decompressed block committed so far
    pub fn largest_block(&self) -> u32 {
        self.state.lock().largest_block
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
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}
impl<L: Layout, S: OutputSink> Drop for ContainerWriter<L, S> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize container on drop: {e}");
        }
    }
}

/// A worker-local writer sharing the canonical writer's output
///
/// Slaves never own or close the sink; they flush their last partial block on drop.
pub struct SlaveWriter<'w, L: Layout, S: OutputSink> {
    shared: &'w Mutex<CommitState<S>>,
    local: LocalBlock<L>,
}
impl<L: Layout, S: OutputSink> SlaveWriter<'_, L, S> {
    /// Appends a record, committing the block when it is full
    pub fn append(&mut self, record: &L::Record<'_>) -> Result<()> {
        append_record(self.shared, &mut self.local, record)
    }

    #[must_use]
    pub fn should_flush(&self) -> bool {
        self.local.builder.should_flush()
    }

    /// Commits the pending block; a no-op when nothing is pending
    pub fn flush(&mut self) -> Result<()> {
        flush_block(self.shared, &mut self.local)
    }

    /// Commits the pending block and reports the number of blocks this slave wrote
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.local.blocks_written)
    }

    /// Blocks committed by this slave
    #[must_use]
    pub fn blocks_written(&self) -> usize {
        self.local.blocks_written
    }

    /// Records committed by this slave
    #[must_use]
    pub fn records_written(&self) -> usize {
        self.local.records_written
    }
}
impl<L: Layout, S: OutputSink> Drop for SlaveWriter<'_, L, S> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("slave writer failed to flush on drop: {e}");
        }
    }
}
