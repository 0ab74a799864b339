//! # ldpack
//!
//! A blocked, indexed binary container for genotype imports and pairwise
//! linkage-disequilibrium (LD) results.
//!
//! A container is laid out as:
//!
//! ```text
//! [FileHeader][literal section][block][index entry] ... [block][index entry][EOF marker]
//! ```
//!
//! Every block is a self-describing zstd frame with a CRC32 trailer, and every block is
//! immediately followed by an [`IndexEntry`] describing its byte span, record count, and
//! genomic bounds. The header carries summary counters that are backpatched once all data
//! has been written.
//!
//! Writers come in two flavours sharing one generic implementation:
//!
//! - [`ImportWriter`] stores run-length encoded genotype lines.
//! - [`LdWriter`] stores fixed-size LD pair records.
//!
//! Any number of [`SlaveWriter`]s may be borrowed from one canonical writer and driven from
//! worker threads; they compress independently and serialize only the final append.
//!
//! # Example
//!
//! ```rust,no_run
//! use ldpack::{ContigDescriptor, LdReader, LdRecord, LdWriter, LiteralSection, Site};
//!
//! let literals = LiteralSection::new(
//!     vec![ContigDescriptor::new("chr20", 64_444_167)],
//!     vec!["NA12878".to_string()],
//! );
//! let mut writer = LdWriter::create("pairs.ldp", literals).unwrap();
//! std::thread::scope(|scope| {
//!     for worker in 0..4u32 {
//!         let mut slave = writer.slave();
//!         scope.spawn(move || {
//!             let record = LdRecord::new(Site::new(0, 100 + worker), Site::new(0, 900));
//!             slave.append(&record).unwrap();
//!         });
//!     }
//! });
//! writer.finalize().unwrap();
//!
//! let mut reader = LdReader::open("pairs.ldp").unwrap();
//! while let Some(entry) = reader.next_record().unwrap() {
//!     println!("{:?} {:?}", entry.site_a(), entry.site_b());
//! }
//! ```

mod core;
pub mod error;
pub mod parallel;
pub mod read;
pub mod sink;
pub mod write;

pub use crate::core::{
    BlockCodec, BlockHeader, BlockTrailer, ContainerKind, ContigDescriptor, ContigTable,
    FileHeader, Import, ImportEntry, ImportMeta, ImportRecord, Index, IndexEntry, Layout, Ld,
    LdEntry, LdRecord, LdStats, LiteralSection, Locus, Site,
};
pub use error::{Error, IntoLdpackError, Result};
pub use parallel::{MmapReader, ParallelProcessor};
pub use read::{ContainerReader, ImportReader, LdReader, ReaderState};
pub use sink::{ConsoleSink, FileSink, OutputSink};
pub use write::{ContainerWriter, ImportWriter, LdWriter, SlaveWriter, WriterBuilder};

/// Magic bytes at the start of every container
pub const FILE_MAGIC: &[u8; 6] = b"LDPACK";

/// Magic bytes at the start of every compressed block
pub const BLOCK_MAGIC: &[u8; 3] = b"LDB";

/// Magic bytes at the start of every inline index entry
pub const INDEX_MAGIC: &[u8; 4] = b"LDIX";

/// Container format version
pub const FILE_VERSION: u8 = 1;

/// Block framing version
pub const BLOCK_VERSION: u8 = 1;

/// Placeholder written to the block counter until the container is finalized
pub const UNFINALIZED: u32 = u32::MAX;

/// Contig id stored in an index entry whose records span more than one contig
pub const MIXED_CONTIG: i32 = -1;

/// Sentinel words terminating every finalized container
pub const EOF_MARKER: [u64; 4] = [
    0x4c44_5041_434b_454f,
    0x4600_0000_0000_0000,
    0x1bad_cafe_f00d_d00d,
    0x0000_0000_4c44_454f,
];

/// Default accumulation threshold (bytes) for genotype import blocks
pub const DEFAULT_IMPORT_BLOCK_SIZE: usize = 64 * 1024;

/// Default accumulation threshold (bytes) for LD result blocks
pub const DEFAULT_LD_BLOCK_SIZE: usize = 2_000_000;

/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
