use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::mem::offset_of;

use bytemuck::{Pod, Zeroable};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::utils::extension_read;
use crate::error::{Error, HeaderError, Result};
use crate::{FILE_MAGIC, FILE_VERSION, UNFINALIZED};

/// Size of the fixed container header in bytes
pub const SIZE_FILE_HEADER: usize = size_of::<FileHeader>();

/// Byte offset of the summary counters (`n_blocks`, `largest_block`) rewritten on finalize
pub const SUMMARY_OFFSET: u64 = offset_of!(FileHeader, n_blocks) as u64;

/// The record layout stored in a container
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContainerKind {
    /// Run-length encoded genotype lines
    Import = 0,
    /// Pairwise LD results
    Ld = 1,
}
impl TryFrom<u8> for ContainerKind {
    type Error = HeaderError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Import),
            1 => Ok(Self::Ld),
            _ => Err(HeaderError::InvalidKind(value)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct FileHeader {
    // File Type Metadata (8 bytes)
    /// File magic number
    magic: [u8; 6],
    /// File version number
    pub version: u8,
    /// Record layout, see [`ContainerKind`]
    kind: u8,

    // Literal metadata (12 bytes)
    /// Number of samples in the literal section
    pub n_samples: u64,
    /// Number of contigs in the literal section
    pub n_contigs: u32,

    // Summary counters (8 bytes), backpatched on finalize
    /// Number of blocks, or [`UNFINALIZED`]
    pub n_blocks: u32,
    /// Largest decompressed block in bytes
    pub largest_block: u32,

    /// Byte size of the literal section following the header
    pub literal_size: u32,

    /// Reserved for future use
    reserved: [u8; 32],
}
impl FileHeader {
    /// Builds the header describing `literals` with placeholder summary counters
    pub fn new(kind: ContainerKind, literals: &LiteralSection) -> Result<Self> {
        let literal_size = u32::try_from(literals.encoded_len()).map_err(|_| {
            HeaderError::InvalidLiteral("literal section exceeds 4 GiB".to_string())
        })?;
        Ok(Self {
            magic: *FILE_MAGIC,
            version: FILE_VERSION,
            kind: kind as u8,
            n_samples: literals.n_samples() as u64,
            n_contigs: literals.n_contigs(),
            n_blocks: UNFINALIZED,
            largest_block: 0,
            literal_size,
            reserved: [0; 32],
        })
    }

    #[must_use]
    pub fn kind(&self) -> ContainerKind {
        if self.kind == ContainerKind::Ld as u8 {
            ContainerKind::Ld
        } else {
            ContainerKind::Import
        }
    }

    /// Whether the summary counters were backpatched
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.n_blocks != UNFINALIZED
    }

    /// Number of blocks recorded in the summary, if finalized
    #[must_use]
    pub fn num_blocks(&self) -> Option<usize> {
        self.is_finalized().then_some(self.n_blocks as usize)
    }

    /// Byte offset of the first block
    #[must_use]
    pub fn data_offset(&self) -> u64 {
        (SIZE_FILE_HEADER + self.literal_size as usize) as u64
    }

    /// Encodes the summary counters as they are written at [`SUMMARY_OFFSET`]
    #[must_use]
    pub fn summary_bytes(n_blocks: u32, largest_block: u32) -> [u8; 8] {
        bytemuck::cast([n_blocks, largest_block])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SIZE_FILE_HEADER {
            return Err(Error::Truncated {
                offset: 0,
                needed: SIZE_FILE_HEADER as u64,
            });
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_FILE_HEADER]);
        if header.magic != *FILE_MAGIC {
            return Err(HeaderError::InvalidMagic(header.magic).into());
        }
        if header.version != FILE_VERSION {
            return Err(HeaderError::InvalidFormatVersion(header.version).into());
        }
        ContainerKind::try_from(header.kind)?;
        Ok(header)
    }

    /// Reads and validates a header, requiring the given record layout
    pub fn read_expecting<R: Read>(reader: &mut R, expected: ContainerKind) -> Result<Self> {
        let mut buf = [0u8; SIZE_FILE_HEADER];
        super::utils::read_exact_at(reader, &mut buf, 0)?;
        let header = Self::from_bytes(&buf)?;
        if header.kind() != expected {
            return Err(HeaderError::KindMismatch {
                expected,
                found: header.kind(),
            }
            .into());
        }
        Ok(header)
    }
}

/// A named contig and its length in base pairs
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContigDescriptor {
    pub name: String,
    pub length: u32,
}
impl ContigDescriptor {
    pub fn new(name: impl Into<String>, length: u32) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }
}

/// Ordered contig descriptors with a name lookup
///
/// Contig ids are positions in this table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContigTable {
    contigs: Vec<ContigDescriptor>,
    lookup: HashMap<String, u32>,
}
impl ContigTable {
    #[must_use]
    pub fn new(contigs: Vec<ContigDescriptor>) -> Self {
        let mut lookup = HashMap::with_capacity(contigs.len());
        for (id, contig) in contigs.iter().enumerate() {
            lookup.entry(contig.name.clone()).or_insert(id as u32);
        }
        Self { contigs, lookup }
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<&ContigDescriptor> {
        self.contigs.get(id as usize)
    }

    /// Returns the id of the first contig with the given name
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.lookup.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContigDescriptor> {
        self.contigs.iter()
    }
}

/// Variable-length container metadata: contig descriptors and sample names
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiteralSection {
    contigs: ContigTable,
    samples: Vec<String>,
}
impl LiteralSection {
    #[must_use]
    pub fn new(contigs: Vec<ContigDescriptor>, samples: Vec<String>) -> Self {
        Self {
            contigs: ContigTable::new(contigs),
            samples,
        }
    }

    #[must_use]
    pub fn contigs(&self) -> &ContigTable {
        &self.contigs
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    #[must_use]
    pub fn n_contigs(&self) -> u32 {
        self.contigs.len() as u32
    }

    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Size of the encoded section in bytes
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let contigs: usize = self.contigs.iter().map(|c| 8 + c.name.len()).sum();
        let samples: usize = self.samples.iter().map(|s| 4 + s.len()).sum();
        contigs + samples
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        for contig in self.contigs.iter() {
            writer.write_u32::<LittleEndian>(contig.length)?;
            write_name(writer, &contig.name)?;
        }
        for sample in &self.samples {
            write_name(writer, sample)?;
        }
        Ok(())
    }

    /// Reads the section that follows `header`
    pub fn read_from<R: Read>(reader: &mut R, header: &FileHeader) -> Result<Self> {
        let mut buf = Vec::new();
        extension_read(
            reader,
            &mut buf,
            header.literal_size as usize,
            SIZE_FILE_HEADER as u64,
        )?;
        Self::from_bytes(&buf, header)
    }

    /// Parses an encoded section, which must be exactly `header.literal_size` bytes
    pub fn from_bytes(bytes: &[u8], header: &FileHeader) -> Result<Self> {
        // every contig carries at least 8 bytes and every sample at least 4
        let minimum =
            (u64::from(header.n_contigs) * 8).saturating_add(header.n_samples.saturating_mul(4));
        if minimum > u64::from(header.literal_size) {
            return Err(HeaderError::InvalidLiteral(format!(
                "{} contigs and {} samples cannot fit in {} bytes",
                header.n_contigs, header.n_samples, header.literal_size
            ))
            .into());
        }

        let mut cursor = Cursor::new(bytes);
        let mut contigs = Vec::with_capacity(header.n_contigs as usize);
        for _ in 0..header.n_contigs {
            let length = cursor.read_u32::<LittleEndian>().map_err(short_literal)?;
            let name = read_name(&mut cursor)?;
            contigs.push(ContigDescriptor::new(name, length));
        }
        let mut samples = Vec::new();
        for _ in 0..header.n_samples {
            samples.push(read_name(&mut cursor)?);
        }

        let consumed = cursor.position() as usize;
        if consumed != header.literal_size as usize {
            return Err(
                HeaderError::LiteralSizeMismatch(consumed, header.literal_size as usize).into(),
            );
        }
        Ok(Self::new(contigs, samples))
    }
}

fn short_literal(_: io::Error) -> Error {
    HeaderError::InvalidLiteral("literal section ends before its declared contents".to_string())
        .into()
}

fn write_name<W: Write>(writer: &mut W, name: &str) -> Result<()> {
    let len = u32::try_from(name.len())
        .map_err(|_| HeaderError::InvalidLiteral(format!("name of {} bytes", name.len())))?;
    writer.write_u32::<LittleEndian>(len)?;
    writer.write_all(name.as_bytes())?;
    Ok(())
}

fn read_name<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u32::<LittleEndian>().map_err(short_literal)? as usize;
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(short_literal)?;
    if buf.len() != len {
        return Err(short_literal(io::ErrorKind::UnexpectedEof.into()));
    }
    String::from_utf8(buf).map_err(|e| HeaderError::InvalidLiteral(e.to_string()).into())
}
