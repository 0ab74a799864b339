use std::io;

use zstd::zstd_safe;

use crate::error::{Error, Result};

pub(crate) fn sized_compress(
    dst: &mut Vec<u8>,
    src: &[u8],
    level: i32,
    cctx: &mut zstd_safe::CCtx,
) -> Result<()> {
    // determine the maximum compressed size
    let max_z_size = zstd_safe::compress_bound(src.len());

    // zstd writes into the spare capacity and sets the length to the true size
    dst.clear();
    dst.reserve(max_z_size);

    cctx.compress(dst, src, level)
        .map_err(|e| io::Error::other(zstd_safe::get_error_name(e)))?;

    Ok(())
}

/// Reads exactly `size` bytes into `dst`, reporting a short read as truncation at `offset`
pub(crate) fn extension_read<R: io::Read>(
    reader: &mut R,
    dst: &mut Vec<u8>,
    size: usize,
    offset: u64,
) -> Result<()> {
    dst.resize(size, 0);
    read_exact_at(reader, dst, offset)
}

/// `read_exact` that maps an early end of stream onto [`Error::Truncated`]
pub(crate) fn read_exact_at<R: io::Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Truncated {
            offset,
            needed: buf.len() as u64,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Fills `offsets` with the exclusive prefix sums of `sizes` followed by the total
pub(crate) fn calculate_offsets<I: IntoIterator<Item = usize>>(sizes: I, offsets: &mut Vec<usize>) {
    offsets.clear();
    offsets.push(0);
    let mut total = 0;
    for size in sizes {
        total += size;
        offsets.push(total);
    }
}
