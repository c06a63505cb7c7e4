//! Record model: kind tags, zero-copy record views and the payload schema.
//!
//! A [`Record`] is a small `Copy` value describing one entry of a decoded log:
//! its monotonic timestamp, its [`RecordKind`] tag, whether it is a synthetic
//! presentation record, and the span of its payload inside the owning
//! reader's buffer. [`RecordRef`] pairs a record with the borrowed payload
//! bytes and is what listeners receive during replay.
//!
//! Payloads that the engine itself needs to look at ([`EncodeIndex`]) and a
//! couple of commonly consumed ones ([`CanFrame`], [`RadarState`]) are plain
//! `serde` structs encoded with `bincode`.
use crate::error::DecodeError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Discriminant tag of a record. Ordering follows the numeric tag.
#[derive(Debug, Clone, Copy)]
pub enum RecordKind {
    InitData,
    Can,
    Sendcan,
    CarState,
    CarControl,
    ControlsState,
    RadarState,
    ModelV2,
    GpsLocation,
    RoadEncodeIdx,
    DriverEncodeIdx,
    WideRoadEncodeIdx,
    RoadCameraState,
    DriverCameraState,
    WideRoadCameraState,
    LiveCalibration,
    DeviceState,
    Sentinel,
    /// Tag written by a newer recorder; kept as-is. Kinds compare by tag, so
    /// `Other` holding a known tag is the same kind as the named variant and
    /// is named and displayed as it.
    Other(u16),
}

impl RecordKind {
    /// Every named kind, in tag order.
    pub const KNOWN: [RecordKind; 18] = [
        RecordKind::InitData,
        RecordKind::Can,
        RecordKind::Sendcan,
        RecordKind::CarState,
        RecordKind::CarControl,
        RecordKind::ControlsState,
        RecordKind::RadarState,
        RecordKind::ModelV2,
        RecordKind::GpsLocation,
        RecordKind::RoadEncodeIdx,
        RecordKind::DriverEncodeIdx,
        RecordKind::WideRoadEncodeIdx,
        RecordKind::RoadCameraState,
        RecordKind::DriverCameraState,
        RecordKind::WideRoadCameraState,
        RecordKind::LiveCalibration,
        RecordKind::DeviceState,
        RecordKind::Sentinel,
    ];

    pub fn from_tag(tag: u16) -> Self {
        Self::KNOWN
            .get(tag as usize)
            .copied()
            .unwrap_or(RecordKind::Other(tag))
    }

    /// Named variant for a known tag, `Other` only for tags past [`Self::KNOWN`].
    pub fn canonical(self) -> Self {
        Self::from_tag(self.tag())
    }

    pub fn tag(self) -> u16 {
        match self {
            RecordKind::InitData => 0,
            RecordKind::Can => 1,
            RecordKind::Sendcan => 2,
            RecordKind::CarState => 3,
            RecordKind::CarControl => 4,
            RecordKind::ControlsState => 5,
            RecordKind::RadarState => 6,
            RecordKind::ModelV2 => 7,
            RecordKind::GpsLocation => 8,
            RecordKind::RoadEncodeIdx => 9,
            RecordKind::DriverEncodeIdx => 10,
            RecordKind::WideRoadEncodeIdx => 11,
            RecordKind::RoadCameraState => 12,
            RecordKind::DriverCameraState => 13,
            RecordKind::WideRoadCameraState => 14,
            RecordKind::LiveCalibration => 15,
            RecordKind::DeviceState => 16,
            RecordKind::Sentinel => 17,
            RecordKind::Other(tag) => tag,
        }
    }

    /// Name as used in log schemas and on the command line.
    pub fn name(self) -> &'static str {
        match self.canonical() {
            RecordKind::InitData => "initData",
            RecordKind::Can => "can",
            RecordKind::Sendcan => "sendcan",
            RecordKind::CarState => "carState",
            RecordKind::CarControl => "carControl",
            RecordKind::ControlsState => "controlsState",
            RecordKind::RadarState => "radarState",
            RecordKind::ModelV2 => "modelV2",
            RecordKind::GpsLocation => "gpsLocation",
            RecordKind::RoadEncodeIdx => "roadEncodeIdx",
            RecordKind::DriverEncodeIdx => "driverEncodeIdx",
            RecordKind::WideRoadEncodeIdx => "wideRoadEncodeIdx",
            RecordKind::RoadCameraState => "roadCameraState",
            RecordKind::DriverCameraState => "driverCameraState",
            RecordKind::WideRoadCameraState => "wideRoadCameraState",
            RecordKind::LiveCalibration => "liveCalibration",
            RecordKind::DeviceState => "deviceState",
            RecordKind::Sentinel => "sentinel",
            RecordKind::Other(_) => "other",
        }
    }

    /// Encode-index records get a presentation duplicate during decode.
    pub fn is_encode_index(self) -> bool {
        matches!(
            self.canonical(),
            RecordKind::RoadEncodeIdx | RecordKind::DriverEncodeIdx | RecordKind::WideRoadEncodeIdx
        )
    }
}

impl PartialEq for RecordKind {
    fn eq(&self, other: &Self) -> bool {
        self.tag() == other.tag()
    }
}

impl Eq for RecordKind {}

impl Hash for RecordKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
    }
}

impl PartialOrd for RecordKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag().cmp(&other.tag())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical() {
            RecordKind::Other(tag) => write!(f, "other({tag})"),
            k => f.write_str(k.name()),
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    /// Accepts a kind name (case-insensitive) or a numeric tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(tag) = s.parse::<u16>() {
            return Ok(RecordKind::from_tag(tag));
        }
        RecordKind::KNOWN
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown record kind: {s}"))
    }
}

/// Byte range of a payload inside a reader's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
}

impl Span {
    pub fn slice<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        buf.get(self.offset..self.offset + self.len).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Monotonic nanoseconds; for presentation records, the frame's SOF/EOF.
    pub timestamp: u64,
    pub kind: RecordKind,
    /// Synthetic duplicate of an encode-index record used to schedule frames.
    pub presentation: bool,
    pub span: Span,
}

impl Record {
    /// Key of the `(timestamp, kind)` ordering every reader maintains.
    pub fn sort_key(&self) -> (u64, RecordKind) {
        (self.timestamp, self.kind)
    }
}

/// A record together with its payload bytes, borrowed from the reader.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    pub record: Record,
    pub payload: &'a [u8],
}

impl<'a> RecordRef<'a> {
    pub fn new(record: Record, payload: &'a [u8]) -> Self {
        Self { record, payload }
    }

    pub fn timestamp(&self) -> u64 {
        self.record.timestamp
    }

    pub fn kind(&self) -> RecordKind {
        self.record.kind
    }

    pub fn is_presentation(&self) -> bool {
        self.record.presentation
    }

    /// Decode the payload as `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        Ok(bincode::deserialize(self.payload)?)
    }

    /// Encode-index payload, if this is an encode-index record and it decodes.
    pub fn encode_index(&self) -> Option<EncodeIndex> {
        if !self.kind().is_encode_index() {
            return None;
        }
        self.decode().ok()
    }
}

/// One control-bus message. `Can`/`Sendcan` payloads are `Vec<CanFrame>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    pub address: u32,
    pub bus_time: u16,
    pub dat: Vec<u8>,
    pub src: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarState {
    pub car_state_mono_time: u64,
    pub radar_errors: Vec<String>,
    pub lead_distances: Vec<f32>,
}

/// Position of an encoded video frame within its route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeIndex {
    /// Frame number counted from the start of the route.
    pub frame_id: u32,
    pub encode_type: u8,
    /// Segment the frame was written to.
    pub segment_num: i32,
    /// Frame number within that segment.
    pub segment_id: u32,
    pub timestamp_sof: u64,
    pub timestamp_eof: u64,
}

impl EncodeIndex {
    /// Presentation time: SOF when set, else EOF, else `fallback`.
    /// Some cameras only stamp EOF and older routes stamp neither.
    pub fn presentation_time(&self, fallback: u64) -> u64 {
        if self.timestamp_sof > 0 {
            self.timestamp_sof
        } else if self.timestamp_eof > 0 {
            self.timestamp_eof
        } else {
            fallback
        }
    }
}
