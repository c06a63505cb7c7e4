//! Reader for a single log file of framed records.
//!
//! The file is read and (for `.bz2` names) decompressed fully into memory.
//! Records are decoded in file order, encode-index records are followed by a
//! presentation duplicate stamped with the frame's SOF/EOF time, and the
//! whole list is then sorted by `(timestamp, kind)`. Records only hold spans;
//! the bytes stay in the reader's buffer.
use crate::bz2;
use crate::error::{DecodeError, DecompressError, LoadError};
use crate::framing::FrameCursor;
use crate::record::{EncodeIndex, Record, RecordRef};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct LogReader {
    path: PathBuf,
    loaded: bool,
    buffer: Vec<u8>,
    records: Vec<Record>,
}

impl LogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), loaded: false, buffer: Vec::new(), records: Vec::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once a non-empty buffer produced at least one record.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn is_compressed(&self) -> bool {
        self.path.to_string_lossy().contains(".bz2")
    }

    /// Read, decompress and decode the file. No-op once loaded; a reader that
    /// is not loaded redoes the full read on every call.
    ///
    /// A decode error part-way through keeps the records decoded before it:
    /// the reader counts as loaded if any were recovered and the error is
    /// still returned so the caller can report it.
    pub fn load(&mut self) -> Result<(), LoadError> {
        if self.loaded {
            return Ok(());
        }
        self.records.clear();
        self.buffer = self.read()?;
        if self.buffer.is_empty() {
            return Err(LoadError::Empty { path: self.path.clone() });
        }

        let outcome = decode_records(&self.buffer, &mut self.records);
        self.records.sort_by_key(Record::sort_key);
        self.loaded = !self.records.is_empty();

        match outcome {
            Ok(()) if self.loaded => {
                info!("Loaded {} records from {:?}", self.records.len(), self.path);
                Ok(())
            }
            Ok(()) => Err(LoadError::NoRecords { path: self.path.clone() }),
            Err(source) => {
                warn!("Could not parse {:?} past record {}: {}", self.path, self.records.len(), source);
                Err(LoadError::Decode { path: self.path.clone(), recovered: self.records.len(), source })
            }
        }
    }

    fn read(&self) -> Result<Vec<u8>, LoadError> {
        let raw = fs::read(&self.path).map_err(|source| LoadError::Io { path: self.path.clone(), source })?;
        if !self.is_compressed() {
            return Ok(raw);
        }
        match bz2::decompress(&raw) {
            Ok(out) => Ok(out),
            Err(DecompressError::Truncated { partial }) => {
                warn!("{:?}: bzip2 content is corrupt, decoding {} recovered bytes", self.path, partial.len());
                Ok(partial)
            }
            Err(source) => Err(LoadError::Decompress { path: self.path.clone(), source }),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Payload bytes of a record produced by this reader.
    pub fn payload(&self, record: &Record) -> &[u8] {
        record.span.slice(&self.buffer)
    }

    pub fn get(&self, index: usize) -> Option<RecordRef<'_>> {
        self.records.get(index).map(|r| RecordRef::new(*r, self.payload(r)))
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordRef<'_>> + '_ {
        self.records.iter().map(|r| RecordRef::new(*r, self.payload(r)))
    }
}

/// Decode every frame of `buf` into `out`, stopping at the first bad frame.
fn decode_records(buf: &[u8], out: &mut Vec<Record>) -> Result<(), DecodeError> {
    for frame in FrameCursor::new(buf) {
        let frame = frame?;
        let record = Record {
            timestamp: frame.log_mono_time,
            kind: frame.kind,
            presentation: false,
            span: frame.payload,
        };
        out.push(record);
        if frame.kind.is_encode_index() {
            // Video is sent at the frame's SOF/EOF, the index at its log time.
            let timestamp = match bincode::deserialize::<EncodeIndex>(frame.payload.slice(buf)) {
                Ok(idx) => idx.presentation_time(frame.log_mono_time),
                Err(e) => {
                    debug!("undecodable {} payload at t={}: {}", frame.kind, frame.log_mono_time, e);
                    frame.log_mono_time
                }
            };
            out.push(Record { timestamp, presentation: true, ..record });
        }
    }
    Ok(())
}
