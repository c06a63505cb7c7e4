//! Route identifiers, segment layout and segment discovery.
//!
//! A route lives on disk as
//!
//! ```text
//! <data_dir>/<device_id>/<route_name>--<segment_index>/{qlog.bz2,rlog.bz2,qcamera.ts,...}
//! ```
use crate::error::{DiscoveryError, ParseError};
use crate::log_reader::LogReader;
use crate::record::RecordKind;
use crate::video::{Camera, FrameReader};
use log::{debug, info};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::PrimitiveDateTime;
use time::macros::format_description;

/// Compact-tier log names, preferred first.
pub const QLOG_NAMES: [&str; 2] = ["qlog.bz2", "qlog"];
/// Full-tier log names, preferred first.
pub const RLOG_NAMES: [&str; 2] = ["rlog.bz2", "rlog"];

/// `<device_id>|<route_name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteId {
    pub device_id: String,
    pub name: String,
}

impl RouteId {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { device_id: device_id.into(), name: name.into() }
    }

    /// Directory holding this route's segment directories.
    pub fn device_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.device_id)
    }

    /// Wall-clock start encoded in names like `2023-07-27--13-01-19`.
    pub fn started_at(&self) -> Option<PrimitiveDateTime> {
        let fmt = format_description!("[year]-[month]-[day]--[hour]-[minute]-[second]");
        PrimitiveDateTime::parse(&self.name, &fmt).ok()
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.device_id, self.name)
    }
}

impl FromStr for RouteId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_route_name(s)
    }
}

/// Split `<device_id>|<route_name>` on the first `|`.
pub fn parse_route_name(input: &str) -> Result<RouteId, ParseError> {
    let (device, route) = input
        .split_once('|')
        .ok_or_else(|| ParseError::MissingDeviceSeparator(input.to_string()))?;
    Ok(RouteId::new(device, route))
}

/// Split `<route_name>--<index>` on the last `--`.
pub fn parse_segment_name(input: &str) -> Result<(String, u32), ParseError> {
    let (route, index) = input
        .rsplit_once("--")
        .ok_or_else(|| ParseError::MissingSegmentSeparator(input.to_string()))?;
    let index = index.parse::<u32>().map_err(|_| ParseError::InvalidSegmentIndex {
        name: input.to_string(),
        index: index.to_string(),
    })?;
    Ok((route.to_string(), index))
}

/// One chunk of a route and the resources found in its directory.
#[derive(Debug)]
pub struct Segment {
    route: String,
    index: u32,
    dir: PathBuf,
    pub qlog: Option<LogReader>,
    pub rlog: Option<LogReader>,
    pub qcamera: Option<FrameReader>,
    pub fcamera: Option<FrameReader>,
    pub dcamera: Option<FrameReader>,
    pub ecamera: Option<FrameReader>,
}

impl Segment {
    /// Empty segment; resources are attached by [`Segment::scan`].
    pub fn new(route: impl Into<String>, index: u32, dir: impl Into<PathBuf>) -> Self {
        Self {
            route: route.into(),
            index,
            dir: dir.into(),
            qlog: None,
            rlog: None,
            qcamera: None,
            fcamera: None,
            dcamera: None,
            ecamera: None,
        }
    }

    /// Build a segment from the recognized files in `dir`. Other files are
    /// ignored.
    pub fn scan(route: impl Into<String>, index: u32, dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let mut segment = Self::new(route, index, dir);
        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(&segment.dir)? {
            let entry = entry?;
            // follows symlinks
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        let pick = |candidates: &[&str]| -> Option<PathBuf> {
            candidates
                .iter()
                .find(|c| names.iter().any(|n| n == *c))
                .map(|c| segment.dir.join(c))
        };

        let qlog = pick(&QLOG_NAMES[..]).map(LogReader::new);
        let rlog = pick(&RLOG_NAMES[..]).map(LogReader::new);
        let mut cameras = Vec::new();
        for camera in Camera::ALL {
            if let Some(path) = pick(camera.file_names()) {
                cameras.push(FrameReader::new(path, camera));
            }
        }
        segment.qlog = qlog;
        segment.rlog = rlog;
        for reader in cameras {
            let camera = reader.camera();
            *segment.camera_slot(camera) = Some(reader);
        }
        Ok(segment)
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn camera_slot(&mut self, camera: Camera) -> &mut Option<FrameReader> {
        match camera {
            Camera::QRoad => &mut self.qcamera,
            Camera::Road => &mut self.fcamera,
            Camera::Driver => &mut self.dcamera,
            Camera::WideRoad => &mut self.ecamera,
        }
    }

    pub fn camera(&self, camera: Camera) -> Option<&FrameReader> {
        match camera {
            Camera::QRoad => self.qcamera.as_ref(),
            Camera::Road => self.fcamera.as_ref(),
            Camera::Driver => self.dcamera.as_ref(),
            Camera::WideRoad => self.ecamera.as_ref(),
        }
    }

    pub fn camera_mut(&mut self, camera: Camera) -> Option<&mut FrameReader> {
        self.camera_slot(camera).as_mut()
    }

    /// Log replayed for this segment: the full tier when requested and
    /// present, else the compact tier.
    pub fn active_log(&self, full: bool) -> Option<&LogReader> {
        match (full, self.rlog.as_ref()) {
            (true, Some(rlog)) => Some(rlog),
            _ => self.qlog.as_ref(),
        }
    }

    pub fn active_log_mut(&mut self, full: bool) -> Option<&mut LogReader> {
        if full && self.rlog.is_some() {
            self.rlog.as_mut()
        } else {
            self.qlog.as_mut()
        }
    }

    /// Camera delivering frames for an encode-index kind. Road frames come
    /// from `fcamera` when it is open and fall back to `qcamera`.
    pub fn frame_reader_for(&mut self, kind: RecordKind) -> Option<&mut FrameReader> {
        match kind {
            RecordKind::RoadEncodeIdx => {
                if self.fcamera.as_ref().is_some_and(FrameReader::is_loaded) {
                    self.fcamera.as_mut()
                } else {
                    self.qcamera.as_mut()
                }
            }
            RecordKind::DriverEncodeIdx => self.dcamera.as_mut(),
            RecordKind::WideRoadEncodeIdx => self.ecamera.as_mut(),
            _ => None,
        }
    }
}

/// Find every segment of `route` under `data_dir`, ordered by index.
///
/// Any directory starting with the route name must parse as
/// `<route>--<index>`; one that does not fails the whole discovery.
pub fn discover_segments(data_dir: &Path, route: &RouteId) -> Result<Vec<Segment>, DiscoveryError> {
    let device_dir = route.device_dir(data_dir);
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DiscoveryError::Io { path, source }
    };

    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&device_dir).map_err(io_err(&device_dir))? {
        let entry = entry.map_err(io_err(&device_dir))?;
        let path = entry.path();
        // follows symlinks; dangling links are skipped
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&route.name) {
            continue;
        }
        let (segment_route, index) = parse_segment_name(&name).map_err(|source| {
            DiscoveryError::BadSegmentName { path: path.clone(), source }
        })?;
        if segment_route != route.name {
            debug!("Skipping {:?}: belongs to route {}", path, segment_route);
            continue;
        }
        found.push((index, path));
    }

    found.sort_by_key(|(index, _)| *index);
    for pair in found.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(DiscoveryError::DuplicateSegment {
                index: pair[0].0,
                first: pair[0].1.clone(),
                second: pair[1].1.clone(),
            });
        }
    }

    let mut segments = Vec::with_capacity(found.len());
    for (index, path) in found {
        let segment = Segment::scan(route.name.clone(), index, &path).map_err(io_err(&path))?;
        segments.push(segment);
    }
    info!("Discovered {} segments for route {}", segments.len(), route);
    Ok(segments)
}
