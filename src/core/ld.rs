use bytemuck::{Pod, Zeroable};

use super::header::ContainerKind;
use super::index::IndexEntry;
use super::layout::{check_contig, Layout, Locus};
use crate::error::Result;
use crate::DEFAULT_LD_BLOCK_SIZE;

/// Packed position flag: the site is phased
pub const FLAG_PHASED: u32 = 1 << 1;

/// Packed position flag: the site has missing genotypes
pub const FLAG_MISSING: u32 = 1 << 0;

/// One end of an LD pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Site {
    pub contig: u32,
    pub position: u32,
    pub phased: bool,
    pub missing: bool,
}
impl Site {
    #[must_use]
    pub fn new(contig: u32, position: u32) -> Self {
        Self {
            contig,
            position,
            phased: false,
            missing: false,
        }
    }

    #[must_use]
    pub fn with_flags(self, phased: bool, missing: bool) -> Self {
        Self {
            phased,
            missing,
            ..self
        }
    }

    /// Packs the position and flags as `position << 2 | phased << 1 | missing`
    #[must_use]
    pub fn packed(&self) -> u32 {
        let mut packed = self.position << 2;
        if self.phased {
            packed |= FLAG_PHASED;
        }
        if self.missing {
            packed |= FLAG_MISSING;
        }
        packed
    }

    #[must_use]
    pub fn unpack(contig: u32, packed: u32) -> Self {
        Self {
            contig,
            position: packed >> 2,
            phased: packed & FLAG_PHASED != 0,
            missing: packed & FLAG_MISSING != 0,
        }
    }

    #[must_use]
    pub fn locus(&self) -> Locus {
        Locus::new(self.contig, self.position)
    }
}

/// Pairwise statistics computed upstream
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LdStats {
    /// Haplotype counts or frequencies (AB, Ab, aB, ab)
    pub haplotypes: [f32; 4],
    pub d: f32,
    pub d_prime: f32,
    pub r: f32,
    pub r2: f32,
    pub chi_squared: f32,
    pub p_value: f64,
}

/// An LD result as handed to the writer
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LdRecord {
    pub controller: u16,
    pub site_a: Site,
    pub site_b: Site,
    pub stats: LdStats,
}
impl LdRecord {
    #[must_use]
    pub fn new(site_a: Site, site_b: Site) -> Self {
        Self {
            controller: 0,
            site_a,
            site_b,
            stats: LdStats::default(),
        }
    }

    #[must_use]
    pub fn with_stats(self, stats: LdStats) -> Self {
        Self { stats, ..self }
    }

    #[must_use]
    pub fn with_controller(self, controller: u16) -> Self {
        Self { controller, ..self }
    }
}

/// The on-disk LD pair entry.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable, Pod)]
#[repr(C)]
pub struct LdEntry {
    /// Caller-defined flags
    pub controller: u16,
    reserved: u16,

    pub contig_a: u32,
    pub packed_a: u32,
    pub contig_b: u32,
    pub packed_b: u32,

    pub haplotypes: [f32; 4],
    pub d: f32,
    pub d_prime: f32,
    pub r: f32,
    pub r2: f32,
    pub chi_squared: f32,
    pub p_value: f64,
}
impl LdEntry {
    #[must_use]
    pub fn from_record(record: &LdRecord) -> Self {
        Self {
            controller: record.controller,
            reserved: 0,
            contig_a: record.site_a.contig,
            packed_a: record.site_a.packed(),
            contig_b: record.site_b.contig,
            packed_b: record.site_b.packed(),
            haplotypes: record.stats.haplotypes,
            d: record.stats.d,
            d_prime: record.stats.d_prime,
            r: record.stats.r,
            r2: record.stats.r2,
            chi_squared: record.stats.chi_squared,
            p_value: record.stats.p_value,
        }
    }

    #[must_use]
    pub fn site_a(&self) -> Site {
        Site::unpack(self.contig_a, self.packed_a)
    }

    #[must_use]
    pub fn site_b(&self) -> Site {
        Site::unpack(self.contig_b, self.packed_b)
    }

    #[must_use]
    pub fn stats(&self) -> LdStats {
        LdStats {
            haplotypes: self.haplotypes,
            d: self.d,
            d_prime: self.d_prime,
            r: self.r,
            r2: self.r2,
            chi_squared: self.chi_squared,
            p_value: self.p_value,
        }
    }

    #[must_use]
    pub fn to_record(&self) -> LdRecord {
        LdRecord {
            controller: self.controller,
            site_a: self.site_a(),
            site_b: self.site_b(),
            stats: self.stats(),
        }
    }
}

/// Layout of LD result containers: fixed-size pair entries, no payload stream
pub struct Ld;
impl Layout for Ld {
    const KIND: ContainerKind = ContainerKind::Ld;
    const DEFAULT_BLOCK_SIZE: usize = DEFAULT_LD_BLOCK_SIZE;
    const MIXED_BLOCKS: bool = true;

    type Entry = LdEntry;
    type Record<'a> = LdRecord;
    type View<'a> = &'a LdEntry;

    fn locus(record: &Self::Record<'_>) -> Locus {
        record.site_a.locus()
    }

    fn encode(record: &Self::Record<'_>, meta: &mut Vec<u8>, _payload: &mut Vec<u8>) {
        meta.extend_from_slice(bytemuck::bytes_of(&LdEntry::from_record(record)));
    }

    fn check_contigs(entry: &LdEntry, n_contigs: u32) -> Result<()> {
        check_contig(entry.contig_a, n_contigs)?;
        check_contig(entry.contig_b, n_contigs)
    }

    fn view<'a>(entry: &'a LdEntry, _payload: &'a [u8], _block: &IndexEntry) -> Self::View<'a> {
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CorruptBlockError, Error};

    #[test]
    fn test_entry_layout() {
        assert_eq!(size_of::<LdEntry>(), 64);
        assert_eq!(std::mem::offset_of!(LdEntry, p_value), 56);
    }

    #[test]
    fn test_packed_position() {
        let site = Site::new(2, 123_456).with_flags(true, false);
        assert_eq!(site.packed(), (123_456 << 2) | FLAG_PHASED);
        assert_eq!(Site::unpack(2, site.packed()), site);

        let site = Site::new(0, 7).with_flags(false, true);
        assert_eq!(site.packed() & 0b11, FLAG_MISSING);
        assert_eq!(Site::unpack(0, site.packed()), site);
    }

    #[test]
    fn test_encode_entry() {
        let stats = LdStats {
            haplotypes: [10.0, 2.0, 3.0, 85.0],
            d: 0.08,
            d_prime: 0.9,
            r: 0.7,
            r2: 0.49,
            chi_squared: 48.0,
            p_value: 1e-12,
        };
        let record = LdRecord::new(Site::new(0, 100), Site::new(1, 900).with_flags(true, true))
            .with_stats(stats)
            .with_controller(5);

        let mut meta = Vec::new();
        let mut payload = Vec::new();
        Ld::encode(&record, &mut meta, &mut payload);
        assert_eq!(meta.len(), size_of::<LdEntry>());
        assert!(payload.is_empty());

        let entry: LdEntry = bytemuck::pod_read_unaligned(&meta);
        assert_eq!(entry.to_record(), record);
        assert_eq!(Ld::locus(&record), Locus::new(0, 100));
    }

    #[test]
    fn test_check_contigs() {
        let entry = LdEntry::from_record(&LdRecord::new(Site::new(0, 1), Site::new(3, 2)));
        assert!(Ld::check_contigs(&entry, 4).is_ok());
        assert!(matches!(
            Ld::check_contigs(&entry, 3),
            Err(Error::CorruptBlock(CorruptBlockError::ContigOutOfRange {
                contig: 3,
                n_contigs: 3
            }))
        ));
    }
}
