//! Route replay engine.
//!
//! [`Player`] discovers the segments of a route, preloads their logs and
//! cameras, and then replays every record one [`Player::tick`] at a time.
//! Records are dispatched to at most one event listener and one frame
//! listener per [`RecordKind`]. Presentation records additionally resolve
//! the video frame they point at before their frame listener runs.
//!
//! Ordering is per segment: segments are replayed back to back in index
//! order, each in its own `(timestamp, kind)` order.
use crate::error::DiscoveryError;
use crate::log_reader::LogReader;
use crate::record::{EncodeIndex, Record, RecordKind, RecordRef};
use crate::route::{RouteId, Segment, discover_segments};
use crate::video::{Camera, FrameBackend, Image, NoVideoBackend};
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use once_cell::unsync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// 60 s segments recorded at 20 fps.
pub const FRAMES_PER_SEGMENT: u64 = 1200;

pub type EventListener = Box<dyn FnMut(&RecordRef<'_>)>;
pub type FrameListener = Box<dyn FnMut(&RecordRef<'_>, &Image)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerOptions {
    /// Replay the full-tier log and load every camera.
    pub full: bool,
    /// Frames per segment, used to turn route frame ids into segment-local
    /// positions.
    pub frames_per_segment: u64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self { full: false, frames_per_segment: FRAMES_PER_SEGMENT }
    }
}

/// Result of a preload pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PreloadReport {
    /// Segments whose replay log is loaded.
    pub loaded: usize,
    /// Segments with no usable replay log.
    pub failed: usize,
    /// Segments not visited because preload was cancelled.
    pub skipped: usize,
}

/// Cursor position: index into [`Player::segments`] and into that
/// segment's record list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub segment: usize,
    pub record: usize,
}

pub struct Player {
    route: RouteId,
    options: PlayerOptions,
    backend: Box<dyn FrameBackend>,
    segments: Vec<Segment>,
    segment_pos: usize,
    record_index: usize,
    records_seen: u64,
    route_start: OnceCell<u64>,
    event_listeners: HashMap<RecordKind, EventListener>,
    frame_listeners: HashMap<RecordKind, FrameListener>,
}

impl Player {
    /// Discover `route` under `data_dir`. Fails without a partial route if
    /// any segment directory is malformed.
    pub fn open(data_dir: impl AsRef<Path>, route: RouteId, options: PlayerOptions) -> Result<Self, DiscoveryError> {
        let segments = discover_segments(data_dir.as_ref(), &route)?;
        Ok(Self::from_segments(route, segments, options))
    }

    /// Player over already discovered segments, which must be sorted by index.
    pub fn from_segments(route: RouteId, segments: Vec<Segment>, options: PlayerOptions) -> Self {
        Self {
            route,
            options,
            backend: Box::new(NoVideoBackend),
            segments,
            segment_pos: 0,
            record_index: 0,
            records_seen: 0,
            route_start: OnceCell::new(),
            event_listeners: HashMap::new(),
            frame_listeners: HashMap::new(),
        }
    }

    /// Video backend used to open camera files during preload.
    pub fn with_backend(mut self, backend: impl FrameBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self
    }

    pub fn route(&self) -> &RouteId {
        &self.route
    }

    pub fn options(&self) -> PlayerOptions {
        self.options
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment being replayed, `None` once exhausted.
    pub fn current_segment(&self) -> Option<&Segment> {
        self.segments.get(self.segment_pos)
    }

    pub fn position(&self) -> Position {
        Position { segment: self.segment_pos, record: self.record_index }
    }

    pub fn is_exhausted(&self) -> bool {
        self.segment_pos >= self.segments.len()
    }

    /// Records dispatched so far.
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    /// Timestamp of the first record replayed.
    pub fn route_start(&self) -> Option<u64> {
        self.route_start.get().copied()
    }

    /// Replace the listener for `kind`.
    pub fn register_event_listener(&mut self, kind: RecordKind, listener: impl FnMut(&RecordRef<'_>) + 'static) {
        self.event_listeners.insert(kind, Box::new(listener));
    }

    /// Replace the frame listener for `kind`. It runs for presentation
    /// records of that kind with the resolved (possibly empty) image.
    pub fn register_frame_listener(
        &mut self,
        kind: RecordKind,
        listener: impl FnMut(&RecordRef<'_>, &Image) + 'static,
    ) {
        self.frame_listeners.insert(kind, Box::new(listener));
    }

    pub fn clear_listeners(&mut self) {
        self.event_listeners.clear();
        self.frame_listeners.clear();
    }

    /// Load the replay log and cameras of every segment, in order.
    pub fn preload(&mut self) -> PreloadReport {
        let mut report = PreloadReport::default();
        for segment in &mut self.segments {
            if load_segment(segment, self.options.full, self.backend.as_ref()) {
                report.loaded += 1;
            } else {
                report.failed += 1;
            }
        }
        info!("Preloaded route {}: {:?}", self.route, report);
        report
    }

    /// Like [`Player::preload`], spread over `workers` threads. Segments not
    /// yet started when `cancel` is set are skipped. A worker that panics is
    /// logged and every segment it did not report on counts as failed.
    pub fn preload_parallel(&mut self, workers: usize, cancel: &AtomicBool) -> PreloadReport {
        let total = self.segments.len();
        let full = self.options.full;
        let backend = self.backend.as_ref();
        let (tx, rx) = unbounded::<&mut Segment>();
        for segment in self.segments.iter_mut() {
            // rx is alive, send cannot fail
            let _ = tx.send(segment);
        }
        drop(tx);

        let mut report = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers.max(1))
                .map(|_| {
                    let rx = rx.clone();
                    s.spawn(move || {
                        let mut report = PreloadReport::default();
                        for segment in rx.iter() {
                            if cancel.load(Ordering::Relaxed) {
                                report.skipped += 1;
                            } else if load_segment(segment, full, backend) {
                                report.loaded += 1;
                            } else {
                                report.failed += 1;
                            }
                        }
                        report
                    })
                })
                .collect();
            handles.into_iter().fold(PreloadReport::default(), |acc, h| {
                let r = h.join().unwrap_or_else(|panic| {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|m| m.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    warn!("Preload worker panicked: {msg}");
                    PreloadReport::default()
                });
                PreloadReport {
                    loaded: acc.loaded + r.loaded,
                    failed: acc.failed + r.failed,
                    skipped: acc.skipped + r.skipped,
                }
            })
        });
        let reported = report.loaded + report.failed + report.skipped;
        report.failed += total.saturating_sub(reported);
        info!("Preloaded route {} on {} workers: {:?}", self.route, workers.max(1), report);
        report
    }

    /// Replay one record. Returns `false` once every segment is exhausted,
    /// and on every call after that.
    pub fn tick(&mut self) -> bool {
        let full = self.options.full;
        loop {
            let Some(segment) = self.segments.get_mut(self.segment_pos) else {
                return false;
            };
            let seg_index = segment.index();
            let Some(reader) = segment.active_log_mut(full) else {
                debug!("Segment {seg_index} has no log, skipping");
                self.advance_segment();
                continue;
            };
            if !reader.is_loaded() {
                if let Err(e) = reader.load() {
                    warn!("Segment {seg_index}: {e}");
                }
            }
            let Some(record) = reader.records().get(self.record_index).copied() else {
                self.advance_segment();
                continue;
            };
            let encode_index = if record.presentation && self.frame_listeners.contains_key(&record.kind) {
                RecordRef::new(record, reader.payload(&record)).encode_index()
            } else {
                None
            };
            self.route_start.get_or_init(|| record.timestamp);

            if record.presentation {
                if let Some(listener) = self.frame_listeners.get_mut(&record.kind) {
                    let image = match encode_index {
                        Some(idx) => resolve_frame(&mut self.segments, &idx, record.kind, self.options.frames_per_segment),
                        None => Image::empty(),
                    };
                    let payload = replay_payload(&self.segments[self.segment_pos], full, &record);
                    listener(&RecordRef::new(record, payload), &image);
                }
            }

            self.record_index += 1;
            self.records_seen += 1;

            if let Some(listener) = self.event_listeners.get_mut(&record.kind) {
                let payload = replay_payload(&self.segments[self.segment_pos], full, &record);
                listener(&RecordRef::new(record, payload));
            }
            return true;
        }
    }

    /// Tick until exhausted; returns the number of records replayed.
    pub fn run(&mut self) -> u64 {
        let mut n = 0;
        while self.tick() {
            n += 1;
        }
        n
    }

    fn advance_segment(&mut self) {
        self.segment_pos += 1;
        self.record_index = 0;
    }
}

/// Load what replay needs from one segment. True if its replay log loaded.
fn load_segment(segment: &mut Segment, full: bool, backend: &dyn FrameBackend) -> bool {
    let index = segment.index();
    let mut logs: Vec<&mut LogReader> = Vec::new();
    if let Some(q) = segment.qlog.as_mut() {
        logs.push(q);
    }
    if full {
        if let Some(r) = segment.rlog.as_mut() {
            logs.push(r);
        }
    }
    for log in logs {
        if let Err(e) = log.load() {
            warn!("Segment {index}: {e}");
        }
    }
    for camera in Camera::ALL {
        if camera.is_full_fidelity() && !full {
            continue;
        }
        if let Some(reader) = segment.camera_mut(camera) {
            if let Err(e) = reader.load(backend) {
                debug!("Segment {index}: {e}");
            }
        }
    }
    segment.active_log(full).is_some_and(LogReader::is_loaded)
}

fn replay_payload<'a>(segment: &'a Segment, full: bool, record: &Record) -> &'a [u8] {
    segment.active_log(full).map(|log| log.payload(record)).unwrap_or_default()
}

/// Frame referenced by an encode index. The frame id counts from the start
/// of the route, so the position inside the referenced segment is
/// `frame_id - segment_num * frames_per_segment`, read from that segment's
/// camera. Anything missing yields an empty image.
fn resolve_frame(segments: &mut [Segment], idx: &EncodeIndex, kind: RecordKind, frames_per_segment: u64) -> Image {
    let Ok(segment_num) = u32::try_from(idx.segment_num) else {
        return Image::empty();
    };
    let Some(position) = u64::from(idx.frame_id).checked_sub(u64::from(segment_num).saturating_mul(frames_per_segment)) else {
        debug!("Frame {} lies before segment {}", idx.frame_id, segment_num);
        return Image::empty();
    };
    let Ok(slot) = segments.binary_search_by_key(&segment_num, Segment::index) else {
        return Image::empty();
    };
    match segments[slot].frame_reader_for(kind) {
        Some(reader) => reader.get(position as usize),
        None => Image::empty(),
    }
}
