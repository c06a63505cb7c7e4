//! Error types for route discovery, log decoding and frame access.
use std::path::PathBuf;
use thiserror::Error;

/// Route identifier or segment directory name that does not follow the
/// `<device>|<route>` / `<route>--<index>` grammar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("route id {0:?} has no '|' separator")]
    MissingDeviceSeparator(String),

    #[error("segment name {0:?} has no '--' separator")]
    MissingSegmentSeparator(String),

    #[error("segment name {name:?} has invalid index {index:?}")]
    InvalidSegmentIndex { name: String, index: String },
}

/// Failure while walking framed records or decoding a typed payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated frame at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("frame at offset {offset} declares body length {len}, shorter than the record header")]
    BadLength { offset: usize, len: usize },

    #[error("CRC mismatch at offset {offset}: file={expected:#x}, calc={actual:#x}")]
    CrcMismatch {
        offset: usize,
        expected: u32,
        actual: u32,
    },

    #[error("payload decode failed: {0}")]
    Payload(String),
}

impl From<bincode::Error> for DecodeError {
    fn from(e: bincode::Error) -> Self {
        DecodeError::Payload(e.to_string())
    }
}

/// Outcome of a bzip2 stream that did not end cleanly.
#[derive(Debug, Error)]
pub enum DecompressError {
    /// The stream stopped making progress before its end marker. `partial`
    /// holds every byte produced up to that point.
    #[error("bzip2 stream truncated after {} bytes", partial.len())]
    Truncated { partial: Vec<u8> },

    #[error("bzip2 stream error: {0}")]
    Stream(#[from] bzip2::Error),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decompressing {path:?}: {source}")]
    Decompress {
        path: PathBuf,
        #[source]
        source: DecompressError,
    },

    #[error("{path:?} produced an empty buffer")]
    Empty { path: PathBuf },

    #[error("{path:?} contains no records")]
    NoRecords { path: PathBuf },

    /// Decoding stopped early. The `recovered` records before the bad frame
    /// are kept by the reader.
    #[error("decoding {path:?} stopped after {recovered} records: {source}")]
    Decode {
        path: PathBuf,
        recovered: usize,
        #[source]
        source: DecodeError,
    },
}

/// Fatal for the whole route: no segments are produced.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("listing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segment directory {path:?}: {source}")]
    BadSegmentName {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("segment {index} found twice ({first:?} and {second:?})")]
    DuplicateSegment {
        index: u32,
        first: PathBuf,
        second: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("no video decoder available for {0:?}")]
    Unsupported(PathBuf),

    #[error("opening {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame {index} out of range ({count} frames)")]
    OutOfRange { index: usize, count: usize },

    #[error("decoder error: {0}")]
    Decoder(String),
}
