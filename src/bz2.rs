//! Whole-buffer bzip2 decompression.
//!
//! The output buffer starts at five times the input size and doubles
//! whenever it fills up while the stream still wants to write. A call that
//! neither consumes input nor produces output means the stream is corrupt
//! or was cut short; that case is reported as [`DecompressError::Truncated`]
//! carrying what was produced so far, distinct from a clean end of stream.
use crate::error::DecompressError;
use bzip2::{Decompress, Status};
use log::warn;

const INITIAL_RATIO: usize = 5;

pub fn decompress(input: &[u8]) -> Result<Vec<u8>, DecompressError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let mut stream = Decompress::new(false);
    let mut out: Vec<u8> = Vec::with_capacity(input.len().saturating_mul(INITIAL_RATIO));
    loop {
        if out.len() == out.capacity() {
            let grow = out.capacity().max(4096);
            out.reserve(grow);
        }
        let consumed = stream.total_in() as usize;
        let written = out.len();
        let status = stream.decompress_vec(&input[consumed..], &mut out)?;
        if let Status::StreamEnd = status {
            return Ok(out);
        }
        if stream.total_in() as usize == consumed && out.len() == written {
            return Err(DecompressError::Truncated { partial: out });
        }
    }
}

/// Decompress, falling back to whatever was produced before a stall. Empty
/// on stream errors.
pub fn decompress_lossy(input: &[u8]) -> Vec<u8> {
    match decompress(input) {
        Ok(out) => out,
        Err(DecompressError::Truncated { partial }) => {
            warn!("bzip2 content is corrupt, keeping {} decompressed bytes", partial.len());
            partial
        }
        Err(e) => {
            warn!("{e}");
            Vec::new()
        }
    }
}
