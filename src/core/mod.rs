mod block;
mod codec;
mod header;
mod import;
mod index;
mod layout;
mod ld;
pub(crate) mod utils;

pub(crate) use block::{BlockBuilder, BlockDecoder};
pub use codec::{BlockCodec, BlockHeader, BlockTrailer, SIZE_BLOCK_HEADER, SIZE_BLOCK_TRAILER};
pub use header::{
    ContainerKind, ContigDescriptor, ContigTable, FileHeader, LiteralSection, SIZE_FILE_HEADER,
    SUMMARY_OFFSET,
};
pub use import::{Import, ImportEntry, ImportMeta, ImportRecord};
pub use index::{Index, IndexEntry, SIZE_EOF_MARKER, SIZE_INDEX_ENTRY};
pub(crate) use index::{check_summary, read_index_entry, read_unit, scan_index, Unit};
pub use layout::{Layout, Locus};
pub use ld::{Ld, LdEntry, LdRecord, LdStats, Site, FLAG_MISSING, FLAG_PHASED};
