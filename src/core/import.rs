use bytemuck::{Pod, Zeroable};

use super::header::ContainerKind;
use super::index::IndexEntry;
use super::layout::{Layout, Locus};
use crate::DEFAULT_IMPORT_BLOCK_SIZE;

/// Fixed-size part of an imported genotype line.
///
/// The `runs_len` bytes of run-length encoded genotypes live in the block's payload stream.
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Zeroable, Pod)]
#[repr(C)]
pub struct ImportMeta {
    pub position: u32,

    /// Packed reference (high nibble) and alternate (low nibble) allele codes
    pub ref_alt: u8,

    /// Caller-defined flags
    pub controller: u8,
    reserved: u16,

    /// Number of runs in the payload
    pub n_runs: u32,

    /// Byte length of the payload
    pub runs_len: u32,
}
impl ImportMeta {
    #[must_use]
    pub fn ref_allele(&self) -> u8 {
        self.ref_alt >> 4
    }

    #[must_use]
    pub fn alt_allele(&self) -> u8 {
        self.ref_alt & 0x0f
    }
}

/// An encoded genotype line as handed to the writer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportRecord<'a> {
    pub contig: u32,
    pub position: u32,
    pub ref_alt: u8,
    pub controller: u8,
    pub n_runs: u32,

    /// Opaque run-length encoded genotypes
    pub runs: &'a [u8],
}
impl<'a> ImportRecord<'a> {
    #[must_use]
    pub fn new(contig: u32, position: u32, n_runs: u32, runs: &'a [u8]) -> Self {
        Self {
            contig,
            position,
            ref_alt: 0,
            controller: 0,
            n_runs,
            runs,
        }
    }

    #[must_use]
    pub fn with_alleles(self, ref_allele: u8, alt_allele: u8) -> Self {
        Self {
            ref_alt: (ref_allele << 4) | (alt_allele & 0x0f),
            ..self
        }
    }

    #[must_use]
    pub fn with_controller(self, controller: u8) -> Self {
        Self { controller, ..self }
    }
}

/// A decoded genotype line borrowed from a block
#[derive(Clone, Copy, Debug)]
pub struct ImportEntry<'a> {
    meta: &'a ImportMeta,
    runs: &'a [u8],
    contig: u32,
}
impl ImportEntry<'_> {
    #[must_use]
    pub fn meta(&self) -> &ImportMeta {
        self.meta
    }

    #[must_use]
    pub fn runs(&self) -> &[u8] {
        self.runs
    }

    #[must_use]
    pub fn contig(&self) -> u32 {
        self.contig
    }

    #[must_use]
    pub fn position(&self) -> u32 {
        self.meta.position
    }

    #[must_use]
    pub fn n_runs(&self) -> u32 {
        self.meta.n_runs
    }
}

/// Layout of genotype import containers.
///
/// Blocks never span contigs, so the contig lives in the index entry rather than in
/// every record.
pub struct Import;
impl Layout for Import {
    const KIND: ContainerKind = ContainerKind::Import;
    const DEFAULT_BLOCK_SIZE: usize = DEFAULT_IMPORT_BLOCK_SIZE;
    const MIXED_BLOCKS: bool = false;

    type Entry = ImportMeta;
    type Record<'a> = ImportRecord<'a>;
    type View<'a> = ImportEntry<'a>;

    fn locus(record: &Self::Record<'_>) -> Locus {
        Locus::new(record.contig, record.position)
    }

    fn encode(record: &Self::Record<'_>, meta: &mut Vec<u8>, payload: &mut Vec<u8>) {
        let entry = ImportMeta {
            position: record.position,
            ref_alt: record.ref_alt,
            controller: record.controller,
            reserved: 0,
            n_runs: record.n_runs,
            runs_len: record.runs.len() as u32,
        };
        meta.extend_from_slice(bytemuck::bytes_of(&entry));
        payload.extend_from_slice(record.runs);
    }

    fn payload_len(entry: &ImportMeta) -> usize {
        entry.runs_len as usize
    }

    fn view<'a>(entry: &'a ImportMeta, payload: &'a [u8], block: &IndexEntry) -> Self::View<'a> {
        ImportEntry {
            meta: entry,
            runs: payload,
            contig: block.contig().unwrap_or_default(),
        }
    }

    fn breaks_block(current: &IndexEntry, locus: Locus) -> bool {
        !current.is_empty() && current.contig() != Some(locus.contig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_layout() {
        assert_eq!(size_of::<ImportMeta>(), 16);
    }

    #[test]
    fn test_encode_streams() {
        let record = ImportRecord::new(4, 1_000, 2, &[0x11, 0x22, 0x33]).with_alleles(1, 3);
        let mut meta = Vec::new();
        let mut payload = Vec::new();
        Import::encode(&record, &mut meta, &mut payload);

        assert_eq!(meta.len(), size_of::<ImportMeta>());
        assert_eq!(payload, vec![0x11, 0x22, 0x33]);

        let entry: ImportMeta = bytemuck::pod_read_unaligned(&meta);
        assert_eq!(entry.position, 1_000);
        assert_eq!(entry.ref_allele(), 1);
        assert_eq!(entry.alt_allele(), 3);
        assert_eq!(Import::payload_len(&entry), 3);
    }

    #[test]
    fn test_breaks_on_contig_change() {
        let mut current = IndexEntry::default();
        assert!(!Import::breaks_block(&current, Locus::new(1, 10)));
        current.observe(Locus::new(1, 10));
        assert!(!Import::breaks_block(&current, Locus::new(1, 5)));
        assert!(Import::breaks_block(&current, Locus::new(2, 5)));
    }
}
