use bytemuck::Pod;

use super::header::ContainerKind;
use super::index::IndexEntry;
use crate::error::{CorruptBlockError, Result};

/// A genomic coordinate used for block bookkeeping
///
/// Index entries store contig ids as `i32`; ids of `2^31` and above are only ever
/// recorded as mixed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locus {
    pub contig: u32,
    pub position: u32,
}
impl Locus {
    #[must_use]
    pub fn new(contig: u32, position: u32) -> Self {
        Self { contig, position }
    }
}

/// Describes one record variant stored in a container.
///
/// A block's decompressed bytes are a stream of fixed-size [`Layout::Entry`] structs
/// (`meta_size` bytes) followed by an optional variable payload, whose per-entry lengths
/// are reported by [`Layout::payload_len`].
///
/// The writer and reader are generic over this trait so both container kinds share one
/// implementation.
pub trait Layout: Send + Sync + 'static {
    /// Container kind written to and required from the file header
    const KIND: ContainerKind;

    /// Default accumulation threshold in bytes
    const DEFAULT_BLOCK_SIZE: usize;

    /// Whether a block may hold records from more than one contig
    const MIXED_BLOCKS: bool;

    /// Fixed-size entry stored in the meta stream
    type Entry: Pod + Send + Sync;

    /// Producer-side input
    type Record<'a>;

    /// Consumer-side view into a decoded block
    type View<'a>;

    /// Locus used for index bounds and block breaking
    fn locus(record: &Self::Record<'_>) -> Locus;

    /// Serializes a record into the meta stream and the payload stream
    fn encode(record: &Self::Record<'_>, meta: &mut Vec<u8>, payload: &mut Vec<u8>);

    /// Number of payload bytes belonging to an entry
    fn payload_len(_entry: &Self::Entry) -> usize {
        0
    }

    /// Checks the contig ids an entry references against the contig table
    fn check_contigs(_entry: &Self::Entry, _n_contigs: u32) -> Result<()> {
        Ok(())
    }

    /// Builds a view over a decoded entry, its payload, and the block's index entry
    fn view<'a>(entry: &'a Self::Entry, payload: &'a [u8], block: &IndexEntry) -> Self::View<'a>;

    /// Whether a record at `locus` must start a new block
    fn breaks_block(current: &IndexEntry, locus: Locus) -> bool {
        let _ = (current, locus);
        false
    }
}

/// Rejects a contig id outside the table
pub(crate) fn check_contig(contig: u32, n_contigs: u32) -> Result<()> {
    if contig >= n_contigs {
        return Err(CorruptBlockError::ContigOutOfRange { contig, n_contigs }.into());
    }
    Ok(())
}
