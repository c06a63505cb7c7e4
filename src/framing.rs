//! Length + CRC framing for log files.
//!
//! Every record is stored as
//!
//! ```text
//! [len: u32 LE][crc32: u32 LE][body: len bytes]
//! body = [log_mono_time: u64 LE][kind: u16 LE][payload]
//! ```
//!
//! [`FrameCursor`] walks frame boundaries over a fully decompressed buffer
//! without copying payloads; [`write_frame`] and [`LogWriter`] produce the
//! same layout.
use crate::error::DecodeError;
use crate::record::{RecordKind, Span};
use bzip2::Compression;
use bzip2::write::BzEncoder;
use crc32fast::Hasher as Crc32;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// `len` + `crc32`.
pub const FRAME_HEADER_LEN: usize = 8;
/// `log_mono_time` + `kind` at the start of every body.
pub const BODY_HEADER_LEN: usize = 10;

/// One frame located in a buffer. The payload is referenced by [`Span`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub log_mono_time: u64,
    pub kind: RecordKind,
    pub payload: Span,
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

/// Take the frame starting at `offset`. Returns the frame and the offset of
/// the next one.
pub fn next_frame(buf: &[u8], offset: usize) -> Result<(RawFrame, usize), DecodeError> {
    let available = buf.len().saturating_sub(offset);
    if available < FRAME_HEADER_LEN {
        return Err(DecodeError::Truncated { offset, needed: FRAME_HEADER_LEN, available });
    }
    let len = read_u32(buf, offset) as usize;
    let crc_on_file = read_u32(buf, offset + 4);
    if len < BODY_HEADER_LEN {
        return Err(DecodeError::BadLength { offset, len });
    }
    let body_start = offset + FRAME_HEADER_LEN;
    if available - FRAME_HEADER_LEN < len {
        return Err(DecodeError::Truncated {
            offset,
            needed: FRAME_HEADER_LEN + len,
            available,
        });
    }
    let body = &buf[body_start..body_start + len];
    let mut hasher = Crc32::new();
    hasher.update(body);
    let crc_calc = hasher.finalize();
    if crc_calc != crc_on_file {
        return Err(DecodeError::CrcMismatch { offset, expected: crc_on_file, actual: crc_calc });
    }

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&body[0..8]);
    let mut tag = [0u8; 2];
    tag.copy_from_slice(&body[8..10]);
    let frame = RawFrame {
        log_mono_time: u64::from_le_bytes(ts),
        kind: RecordKind::from_tag(u16::from_le_bytes(tag)),
        payload: Span { offset: body_start + BODY_HEADER_LEN, len: len - BODY_HEADER_LEN },
    };
    Ok((frame, body_start + len))
}

/// Iterator over consecutive frames. Yields at most one error, after which
/// it is exhausted.
pub struct FrameCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Offset of the next unread frame.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Iterator for FrameCursor<'_> {
    type Item = Result<RawFrame, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        match next_frame(self.buf, self.pos) {
            Ok((frame, next)) => {
                self.pos = next;
                Some(Ok(frame))
            }
            Err(e) => {
                self.pos = self.buf.len();
                Some(Err(e))
            }
        }
    }
}

pub fn write_frame<W: Write>(w: &mut W, log_mono_time: u64, kind: RecordKind, payload: &[u8]) -> io::Result<()> {
    let mut body = Vec::with_capacity(BODY_HEADER_LEN + payload.len());
    body.extend_from_slice(&log_mono_time.to_le_bytes());
    body.extend_from_slice(&kind.tag().to_le_bytes());
    body.extend_from_slice(payload);

    let mut hasher = Crc32::new();
    hasher.update(&body);
    let crc = hasher.finalize();

    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record body exceeds u32::MAX"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&body)?;
    Ok(())
}

/// In-memory builder for log files, used by tooling and fixtures.
#[derive(Debug, Default)]
pub struct LogWriter {
    buf: Vec<u8>,
    count: usize,
}

impl LogWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_raw(&mut self, log_mono_time: u64, kind: RecordKind, payload: &[u8]) -> io::Result<()> {
        write_frame(&mut self.buf, log_mono_time, kind, payload)?;
        self.count += 1;
        Ok(())
    }

    /// Append a record whose payload is `value` encoded with bincode.
    pub fn push<T: Serialize>(&mut self, log_mono_time: u64, kind: RecordKind, value: &T) -> io::Result<()> {
        let payload = bincode::serialize(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.push_raw(log_mono_time, kind, &payload)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write the log to `path`, bzip2-compressed when `compress` is set.
    pub fn write_to(&self, path: &Path, compress: bool) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::with_capacity(1 << 20, file);
        if compress {
            let mut enc = BzEncoder::new(&mut w, Compression::default());
            enc.write_all(&self.buf)?;
            enc.finish()?;
        } else {
            w.write_all(&self.buf)?;
        }
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut w = LogWriter::new();
        w.push_raw(100, RecordKind::Can, b"abc").unwrap();
        w.push_raw(50, RecordKind::RadarState, b"").unwrap();
        assert_eq!(w.len(), 2);
        w.into_bytes()
    }

    #[test]
    fn walks_frame_boundaries() {
        let buf = sample();
        let frames: Vec<_> = FrameCursor::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].log_mono_time, 100);
        assert_eq!(frames[0].kind, RecordKind::Can);
        assert_eq!(frames[0].payload.slice(&buf), b"abc");
        assert_eq!(frames[1].kind, RecordKind::RadarState);
        assert_eq!(frames[1].payload.len, 0);
    }

    #[test]
    fn crc_mismatch_detected() {
        let mut buf = sample();
        // flip a payload byte of the first frame
        buf[FRAME_HEADER_LEN + BODY_HEADER_LEN] ^= 0xff;
        let mut cur = FrameCursor::new(&buf);
        match cur.next() {
            Some(Err(DecodeError::CrcMismatch { offset: 0, .. })) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(cur.next().is_none());
    }

    #[test]
    fn truncated_tail_keeps_prefix() {
        let buf = sample();
        let cut = &buf[..buf.len() - 3];
        let mut cur = FrameCursor::new(cut);
        assert!(cur.next().unwrap().is_ok());
        match cur.next() {
            Some(Err(DecodeError::Truncated { .. })) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(cur.next().is_none());
    }

    #[test]
    fn short_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        assert_eq!(next_frame(&buf, 0).unwrap_err(), DecodeError::BadLength { offset: 0, len: 4 });
    }

    #[test]
    fn unknown_tag_survives() {
        let mut w = LogWriter::new();
        w.push_raw(1, RecordKind::Other(999), b"x").unwrap();
        let buf = w.into_bytes();
        let (frame, next) = next_frame(&buf, 0).unwrap();
        assert_eq!(frame.kind, RecordKind::Other(999));
        assert_eq!(next, buf.len());
    }
}
