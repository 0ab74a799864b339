//! Memory-mapped, block-parallel reading
//!
//! [`MmapReader`] maps a container once, scans its index and then hands whole blocks to
//! worker threads. Every worker owns a clone of the reader (sharing the map and index) with
//! its own decoder, and a clone of the caller's [`ParallelProcessor`].

use std::fs::File;
use std::io::Cursor;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use log::debug;
use memmap2::Mmap;

use crate::core::{scan_index, BlockDecoder, FileHeader, Index, Layout, LiteralSection};
use crate::error::{Error, ReadError, Result};

/// Trait for types that consume records in parallel.
///
/// This is implemented by the **processor** not by the **reader**.
pub trait ParallelProcessor<L: Layout>: Send + Clone {
    /// Process a single record
    fn process_record(&mut self, record: L::View<'_>) -> Result<()>;

    /// Called after every block a thread finishes
    /// Default implementation does nothing
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    ///
    /// Each worker calls this once with its own unique ID before processing.
    fn set_tid(&mut self, _tid: usize) {
        // Default implementation does nothing
    }

    /// Get the thread ID for this processor
    fn get_tid(&self) -> Option<usize> {
        None
    }
}

/// A memory-mapped container reader
pub struct MmapReader<L: Layout> {
    inner: Arc<Mmap>,
    header: FileHeader,
    literals: Arc<LiteralSection>,
    index: Arc<Index>,

    /// Reusable block decoder
    decoder: BlockDecoder<L>,
}
impl<L: Layout> Clone for MmapReader<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            header: self.header,
            literals: self.literals.clone(),
            index: self.index.clone(),
            decoder: BlockDecoder::new(),
        }
    }
}
impl<L: Layout> MmapReader<L> {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }

        // Load the mmap
        let inner = unsafe { Mmap::map(&file) }?;

        let header = FileHeader::read_expecting(&mut &inner[..], L::KIND)?;
        let literals = {
            let start = header.data_offset() as usize - header.literal_size as usize;
            let end = header.data_offset() as usize;
            let bytes = inner.get(start..end).ok_or(Error::Truncated {
                offset: start as u64,
                needed: u64::from(header.literal_size),
            })?;
            LiteralSection::from_bytes(bytes, &header)
        }?;

        // walk the block headers to recover the index
        let index = scan_index(&mut Cursor::new(&inner[..]), &header)?;
        debug!(
            "mapped {} ({} blocks, {} records)",
            path.display(),
            index.num_blocks(),
            index.num_records()
        );

        Ok(Self {
            inner: Arc::new(inner),
            header,
            literals: Arc::new(literals),
            index: Arc::new(index),
            decoder: BlockDecoder::new(),
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
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.index.num_blocks()
    }

    #[must_use]
    pub fn num_records(&self) -> usize {
        self.index.num_records()
    }

    /// Decodes the block `block_id`, returning its record count
    pub fn load_block(&mut self, block_id: usize) -> Result<usize> {
        let entry = *self
            .index
            .get(block_id)
            .ok_or(ReadError::BlockOutOfRange {
                requested: block_id,
                num_blocks: self.index.num_blocks(),
            })?;

        let start = entry.byte_offset as usize;
        let end = start + entry.block_len() as usize;
        let block = self.inner.get(start..end).ok_or(Error::Truncated {
            offset: entry.byte_offset,
            needed: entry.block_len(),
        })?;
        self.decoder.decode(block, &entry, self.header.n_contigs)?;
        Ok(self.decoder.len())
    }

    /// Records of the most recently loaded block
    pub fn block_records(&self) -> impl Iterator<Item = L::View<'_>> + '_ {
        self.decoder.iter()
    }

    /// Process every block in parallel
    pub fn process_parallel<P: ParallelProcessor<L> + 'static>(
        &self,
        processor: P,
        num_threads: usize,
    ) -> Result<()> {
        self.process_parallel_range(processor, num_threads, 0..self.num_blocks())
    }

    /// Process a range of blocks in parallel
    ///
    /// The blocks are split into contiguous runs, one per thread. A `num_threads` of zero
    /// uses every available CPU.
    pub fn process_parallel_range<P: ParallelProcessor<L> + 'static>(
        &self,
        processor: P,
        num_threads: usize,
        range: Range<usize>,
    ) -> Result<()> {
        let num_threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads.min(num_cpus::get())
        };

        // validate range
        if range.end > self.num_blocks() {
            return Err(ReadError::BlockOutOfRange {
                requested: range.end - 1,
                num_blocks: self.num_blocks(),
            }
            .into());
        }
        if range.is_empty() {
            return Ok(()); // nothing to do
        }

        let blocks_per_thread = range.len().div_ceil(num_threads);

        let mut handles = Vec::new();
        for thread_id in 0..num_threads {
            let start = range.start + thread_id * blocks_per_thread;
            let end = (start + blocks_per_thread).min(range.end);
            if start >= end {
                break;
            }

            let mut t_reader = self.clone();
            let mut t_proc = processor.clone();
            t_proc.set_tid(thread_id);

            let thread_handle = thread::spawn(move || -> Result<()> {
                for block_id in start..end {
                    t_reader.load_block(block_id)?;
                    for record in t_reader.block_records() {
                        t_proc.process_record(record)?;
                    }
                    t_proc.on_batch_complete()?;
                }
                Ok(())
            });
            handles.push(thread_handle);
        }

        for handle in handles {
            handle.join().map_err(|_| ReadError::WorkerPanicked)??;
        }
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tempfile::TempDir;

    use super::*;
    use crate::core::{ContigDescriptor, ImportEntry, ImportRecord, LdEntry, LdRecord, Site};
    use crate::error::HeaderError;
    use crate::write::WriterBuilder;
    use crate::{Import, Ld};

    fn literals() -> LiteralSection {
        LiteralSection::new(
            vec![
                ContigDescriptor::new("chr1", 1_000_000),
                ContigDescriptor::new("chr2", 1_000_000),
            ],
            vec!["S1".to_string()],
        )
    }

    /// 100 records over 25 blocks
    fn write_ld() -> Result<(TempDir, PathBuf)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("parallel.ldp");
        let mut writer = WriterBuilder::<Ld>::default()
            .block_size(4 * size_of::<LdEntry>())
            .build(&path, literals())?;
        for i in 0..100u32 {
            let record = LdRecord::new(Site::new(i % 2, i), Site::new(i % 2, i + 50));
            writer.append(&record)?;
        }
        writer.finalize()?;
        Ok((dir, path))
    }

    #[derive(Clone, Default)]
    struct TestProcessor {
        pub n_records: Arc<Mutex<usize>>,
        pub n_batches: Arc<AtomicUsize>,
        pub position_sum: Arc<AtomicUsize>,
    }
    impl ParallelProcessor<Ld> for TestProcessor {
        fn process_record(&mut self, record: &LdEntry) -> Result<()> {
            *self.n_records.lock() += 1;
            self.position_sum
                .fetch_add(record.site_a().position as usize, Ordering::Relaxed);
            Ok(())
        }

        fn on_batch_complete(&mut self) -> Result<()> {
            self.n_batches.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_mmap_reader_new() -> Result<()> {
        let (_dir, path) = write_ld()?;
        let reader = MmapReader::<Ld>::new(&path)?;
        assert_eq!(reader.num_blocks(), 25);
        assert_eq!(reader.num_records(), 100);
        assert_eq!(reader.literals().n_samples(), 1);
        assert_eq!(reader.header().num_blocks(), Some(25));
        Ok(())
    }

    #[test]
    fn test_load_block() -> Result<()> {
        let (_dir, path) = write_ld()?;
        let mut reader = MmapReader::<Ld>::new(&path)?;
        assert_eq!(reader.load_block(3)?, 4);
        let positions: Vec<u32> = reader
            .block_records()
            .map(|r| r.site_a().position)
            .collect();
        assert_eq!(positions, vec![12, 13, 14, 15]);

        assert!(matches!(
            reader.load_block(25),
            Err(Error::ReadError(ReadError::BlockOutOfRange { .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_parallel_processor() -> Result<()> {
        let (_dir, path) = write_ld()?;
        let reader = MmapReader::<Ld>::new(&path)?;
        let processor = TestProcessor::default();
        reader.process_parallel(processor.clone(), 0)?;
        assert_eq!(*processor.n_records.lock(), 100);
        assert_eq!(processor.n_batches.load(Ordering::Relaxed), 25);
        assert_eq!(
            processor.position_sum.load(Ordering::Relaxed),
            (0..100).sum::<usize>()
        );
        Ok(())
    }

    #[test]
    fn test_parallel_processor_range() -> Result<()> {
        let (_dir, path) = write_ld()?;
        let reader = MmapReader::<Ld>::new(&path)?;
        let processor = TestProcessor::default();
        reader.process_parallel_range(processor.clone(), 3, 5..10)?;
        assert_eq!(*processor.n_records.lock(), 20);
        assert_eq!(processor.n_batches.load(Ordering::Relaxed), 5);
        Ok(())
    }

    #[test]
    fn test_parallel_processor_out_of_range() -> Result<()> {
        let (_dir, path) = write_ld()?;
        let reader = MmapReader::<Ld>::new(&path)?;
        let processor = TestProcessor::default();
        assert!(reader
            .process_parallel_range(processor.clone(), 0, 0..1_000)
            .is_err());
        assert_eq!(*processor.n_records.lock(), 0);
        Ok(())
    }

    #[derive(Clone)]
    struct FailingProcessor;
    impl ParallelProcessor<Ld> for FailingProcessor {
        fn process_record(&mut self, _record: &LdEntry) -> Result<()> {
            Err(Error::GenericError("stop".into()))
        }
    }

    #[test]
    fn test_processor_error_propagates() -> Result<()> {
        let (_dir, path) = write_ld()?;
        let reader = MmapReader::<Ld>::new(&path)?;
        let err = reader.process_parallel(FailingProcessor, 2).unwrap_err();
        assert!(matches!(err, Error::GenericError(_)));
        Ok(())
    }

    #[derive(Clone, Default)]
    struct RunCounter {
        runs: Arc<AtomicUsize>,
    }
    impl ParallelProcessor<Import> for RunCounter {
        fn process_record(&mut self, record: ImportEntry<'_>) -> Result<()> {
            self.runs.fetch_add(record.runs().len(), Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn test_parallel_import() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("parallel.ldi");
        let runs = [3u8, 1, 4, 1, 5];
        let mut writer = WriterBuilder::<Import>::default()
            .block_size(64)
            .build(&path, literals())?;
        for i in 0..40u32 {
            writer.append(&ImportRecord::new(i / 20, i, runs.len() as u32, &runs))?;
        }
        writer.finalize()?;

        let reader = MmapReader::<Import>::new(&path)?;
        let processor = RunCounter::default();
        reader.process_parallel(processor.clone(), 4)?;
        assert_eq!(processor.runs.load(Ordering::Relaxed), 40 * runs.len());
        Ok(())
    }

    #[test]
    fn test_kind_mismatch() -> Result<()> {
        let (_dir, path) = write_ld()?;
        assert!(matches!(
            MmapReader::<Import>::new(&path).err(),
            Some(Error::HeaderError(HeaderError::KindMismatch { .. }))
        ));
        Ok(())
    }
}
