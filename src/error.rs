use std::error::Error as StdError;
use std::path::PathBuf;

use crate::core::ContainerKind;

/// Custom Result type for ldpack operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the ldpack library, encompassing all possible error cases
/// that can occur while writing or reading containers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The container could not be opened (missing file, permissions)
    #[error("Unable to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Errors related to the container header and literal section
    #[error("Error processing header: {0}")]
    HeaderError(#[from] HeaderError),

    /// The stream ended before a fixed-size read completed
    ///
    /// # Fields
    /// * `offset` - Byte position where the read started
    /// * `needed` - Number of bytes the read required
    #[error("Container truncated: expected {needed} bytes at byte pos {offset}")]
    Truncated { offset: u64, needed: u64 },

    /// A block failed validation and its contents cannot be trusted
    #[error("Corrupt block: {0}")]
    CorruptBlock(#[from] CorruptBlockError),

    /// Errors that occur during write operations
    #[error("Error writing container: {0}")]
    WriteError(#[from] WriteError),

    /// Errors that occur during read operations
    #[error("Error reading container: {0}")]
    ReadError(#[from] ReadError),

    /// Standard I/O errors (write, flush, header backpatch)
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors for other unexpected situations
    #[error("Generic error: {0}")]
    GenericError(#[from] Box<dyn StdError + Send + Sync>),
}
impl Error {
    /// Checks if the error means the container contents cannot be trusted
    ///
    /// # Returns
    ///
    /// * `true` for corrupt blocks, truncation, and header validation failures
    /// * `false` for all other error types
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::CorruptBlock(_) | Self::Truncated { .. } | Self::HeaderError(_)
        )
    }
}

/// Errors specific to processing and validating container headers
#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    /// The magic bytes in the header do not match the expected value
    #[error("Invalid magic bytes: {0:?}")]
    InvalidMagic([u8; 6]),

    /// The format version in the header is not supported
    ///
    /// # Arguments
    /// * `u8` - The unsupported version number that was found
    #[error("Invalid format version: {0}")]
    InvalidFormatVersion(u8),

    /// The container kind byte is not recognized
    #[error("Invalid container kind: {0}")]
    InvalidKind(u8),

    /// The container holds a different record layout than the one requested
    #[error("Container holds {found:?} records but {expected:?} records were requested")]
    KindMismatch {
        expected: ContainerKind,
        found: ContainerKind,
    },

    /// The literal section could not be parsed
    #[error("Malformed literal section: {0}")]
    InvalidLiteral(String),

    /// The literal section size disagrees with its parsed contents
    ///
    /// # Arguments
    /// * First `usize` - The number of bytes consumed while parsing
    /// * Second `usize` - The size declared in the header
    #[error("Literal section consumed {0} bytes but header declares {1}")]
    LiteralSizeMismatch(usize, usize),

    /// The backpatched summary counters disagree with the blocks found in the file
    #[error("Header declares {declared} blocks but {found} were found")]
    SummaryMismatch { declared: u32, found: usize },
}

/// Errors raised while validating a single block and its index entry
#[derive(thiserror::Error, Debug)]
pub enum CorruptBlockError {
    /// When a block header contains invalid magic bytes
    ///
    /// The parameter is the position in the file (0 for detached blocks)
    #[error("Invalid block magic at position {0}")]
    InvalidBlockMagic(u64),

    /// The block framing version is not supported
    #[error("Unsupported block version: {0}")]
    UnsupportedBlockVersion(u8),

    /// The declared block size disagrees with the available bytes
    #[error("Block declares {declared} bytes but {available} are available")]
    BlockSizeMismatch { declared: u64, available: u64 },

    /// The decompressed size disagrees with the size recorded in the trailer
    #[error("Decompressed {found} bytes but trailer records {expected}")]
    UncompressedSizeMismatch { expected: u64, found: u64 },

    /// The CRC32 of the decompressed payload disagrees with the trailer
    #[error("Checksum mismatch: trailer has {expected:#010x}, payload has {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    /// The block decompressed to zero bytes
    #[error("Block decompressed to zero bytes")]
    EmptyBlock,

    /// The zstd frame could not be decoded
    #[error("Unable to decompress block: {0}")]
    Decompression(&'static str),

    /// The fixed-size entry stream is not a whole number of records
    #[error("Entry stream of {size} bytes is not a multiple of the record size {record_size}")]
    Misaligned { size: usize, record_size: usize },

    /// The number of decoded entries disagrees with the index entry
    #[error("Block holds {found} records but its index entry records {expected}")]
    RecordCountMismatch { expected: usize, found: usize },

    /// The variable payload disagrees with the sizes recorded by its entries
    #[error("Entries reference {expected} payload bytes but the block holds {found}")]
    PayloadSizeMismatch { expected: usize, found: usize },

    /// A record references a contig outside the contig table
    #[error("Contig id {contig} exceeds contig count {n_contigs}")]
    ContigOutOfRange { contig: u32, n_contigs: u32 },

    /// A block whose layout requires a single contig reports records from several
    #[error("Block mixes contigs but its layout requires a single contig")]
    MixedContigs,

    /// The inline index entry has invalid magic bytes
    #[error("Invalid index entry magic at position {0}")]
    InvalidIndexMagic(u64),

    /// The inline index entry does not describe the block that precedes it
    #[error(
        "Index entry span ({entry_offset}..{entry_end}) disagrees with block span ({block_offset}..{block_end})"
    )]
    IndexMismatch {
        entry_offset: u64,
        entry_end: u64,
        block_offset: u64,
        block_end: u64,
    },

    /// The end-of-file marker is damaged or followed by trailing bytes
    #[error("Invalid end-of-file marker at position {0}")]
    InvalidEofMarker(u64),
}

/// Errors that can occur while reading containers
#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    /// The file being read is not a regular file
    #[error("File is not regular")]
    IncompatibleFile,

    /// Attempted to access a record index that is beyond the loaded block
    #[error("Requested record index ({requested_index}) is out of record range ({max_index})")]
    OutOfRange {
        requested_index: usize,
        max_index: usize,
    },

    /// Attempted to access a block id that is beyond the index
    #[error("Requested block ({requested}) is out of block range ({num_blocks})")]
    BlockOutOfRange { requested: usize, num_blocks: usize },

    /// The reader previously hit a corrupt block and refuses to continue
    #[error("Reader halted after an earlier corruption error")]
    Poisoned,

    /// A worker thread panicked during parallel processing
    #[error("Worker thread panicked during parallel processing")]
    WorkerPanicked,
}

/// Errors that can occur while writing containers
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// The operation is not available for this output sink
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Attempted to write to a file sink that was never bound to a path
    #[error("Output sink is not bound to a path")]
    UnboundSink,

    /// A previous commit failed part-way, so the output can no longer be trusted
    #[error("Encoding session aborted after an earlier write failure")]
    SessionAborted,

    /// A block exceeds what the 32-bit framing fields can describe
    ///
    /// The parameter is the offending size in bytes
    #[error("Block of {0} bytes exceeds the maximum framed block size")]
    BlockTooLarge(usize),
}

/// Trait for converting arbitrary errors into `Error`
pub trait IntoLdpackError {
    fn into_ldpack_error(self) -> Error;
}

// Implement conversion for Box<dyn Error>
impl<E> IntoLdpackError for E
where
    E: StdError + Send + Sync + 'static,
{
    fn into_ldpack_error(self) -> Error {
        Error::GenericError(Box::new(self))
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    pub enum MyError {
        #[error("Custom error: {0}")]
        CustomError(String),
    }

    #[test]
    fn test_into_ldpack_error() {
        let my_error = MyError::CustomError(String::from("some error"));
        let error = my_error.into_ldpack_error();
        assert!(matches!(error, Error::GenericError(_)));
    }

    #[test]
    fn test_is_corruption() {
        let error = Error::CorruptBlock(CorruptBlockError::EmptyBlock);
        assert!(error.is_corruption());

        let error = Error::Truncated {
            offset: 10,
            needed: 16,
        };
        assert!(error.is_corruption());

        let error = Error::WriteError(WriteError::SessionAborted);
        assert!(!error.is_corruption());
    }

    #[test]
    fn test_truncated_message() {
        let error = Error::Truncated {
            offset: 12345,
            needed: 48,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("12345"));
        assert!(error_str.contains("48"));
    }

    #[test]
    fn test_checksum_message() {
        let error = CorruptBlockError::ChecksumMismatch {
            expected: 0xDEAD_BEEF,
            found: 1,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("0xdeadbeef"));
    }

    #[test]
    fn test_kind_mismatch_message() {
        let error = HeaderError::KindMismatch {
            expected: ContainerKind::Ld,
            found: ContainerKind::Import,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("Ld"));
        assert!(error_str.contains("Import"));
    }

    #[test]
    fn test_out_of_range_message() {
        let error = ReadError::OutOfRange {
            requested_index: 150,
            max_index: 100,
        };
        let error_str = format!("{error}");
        assert!(error_str.contains("150"));
        assert!(error_str.contains("100"));
    }

    #[test]
    fn test_error_from_header_error() {
        let error: Error = HeaderError::InvalidFormatVersion(9).into();
        assert!(matches!(error, Error::HeaderError(_)));
    }

    #[test]
    fn test_error_from_io_error() {
        let error: Error = std::io::Error::other("disk full").into();
        assert!(matches!(error, Error::IoError(_)));
        assert!(!error.is_corruption());
    }
}
