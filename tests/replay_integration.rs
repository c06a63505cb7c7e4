use bzip2::Compression;
use bzip2::write::BzEncoder;
use crc32fast::Hasher as Crc32;
use route_replay::error::DiscoveryError;
use route_replay::record::{CanFrame, EncodeIndex, RadarState, RecordKind};
use route_replay::{LogReader, Player, PlayerOptions, RouteId};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const DEVICE: &str = "a2a0ccea32023010";
const ROUTE: &str = "2023-07-27--13-01-19";
const T0: u64 = 1_000_000_000;

fn write_frame<W: Write, T: Serialize>(w: &mut W, ts: u64, kind: RecordKind, value: &T) {
    let mut body = Vec::new();
    body.extend_from_slice(&ts.to_le_bytes());
    body.extend_from_slice(&kind.tag().to_le_bytes());
    body.extend_from_slice(&bincode::serialize(value).unwrap());
    let mut hasher = Crc32::new();
    hasher.update(&body);
    let crc = hasher.finalize();
    w.write_all(&(body.len() as u32).to_le_bytes()).unwrap();
    w.write_all(&crc.to_le_bytes()).unwrap();
    w.write_all(&body).unwrap();
}

fn can(address: u32) -> CanFrame {
    CanFrame { address, bus_time: 0, dat: vec![0, 1, 2, 3, 4, 5, 6, 7], src: 0 }
}

/// One segment shaped like a minute of driving: 12356 can, 232 radarState,
/// and 1200 road encode indices (each replayed twice).
fn write_reference_segment(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let mut enc = BzEncoder::new(File::create(dir.join("qlog.bz2")).unwrap(), Compression::default());

    let first: Vec<CanFrame> = (0..41).map(can).collect();
    write_frame(&mut enc, T0, RecordKind::Can, &first);
    for i in 1..12_356u64 {
        write_frame(&mut enc, T0 + i * 4_850_000, RecordKind::Can, &vec![can(i as u32)]);
    }
    for i in 0..232u64 {
        let radar = RadarState {
            car_state_mono_time: T0 + i * 250_000_000,
            radar_errors: Vec::new(),
            lead_distances: vec![30.0, 42.5],
        };
        write_frame(&mut enc, T0 + 1 + i * 250_000_000, RecordKind::RadarState, &radar);
    }
    for i in 0..1200u32 {
        let ts = T0 + 2 + u64::from(i) * 50_000_000;
        let idx = EncodeIndex {
            frame_id: i,
            encode_type: 1,
            segment_num: 0,
            segment_id: i,
            timestamp_sof: ts + 5000,
            timestamp_eof: ts + 6000,
        };
        write_frame(&mut enc, ts, RecordKind::RoadEncodeIdx, &idx);
    }
    enc.finish().unwrap();
    fs::write(dir.join("qcamera.ts"), b"").unwrap();
}

fn reference_route() -> (tempfile::TempDir, RouteId, PathBuf) {
    let data = tempfile::tempdir().unwrap();
    let route = RouteId::new(DEVICE, ROUTE);
    let dir = route.device_dir(data.path()).join(format!("{ROUTE}--0"));
    write_reference_segment(&dir);
    (data, route, dir)
}

#[test]
fn reads_reference_log() {
    let (_data, _route, dir) = reference_route();
    let mut reader = LogReader::new(dir.join("qlog.bz2"));
    reader.load().unwrap();
    assert_eq!(reader.len(), 14_988);

    let first = reader.get(0).unwrap();
    assert_eq!(first.kind(), RecordKind::Can);
    assert_eq!(first.decode::<Vec<CanFrame>>().unwrap().len(), 41);

    let keys: Vec<_> = reader.records().iter().map(|r| r.sort_key()).collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    let presentation = reader.records().iter().filter(|r| r.presentation).count();
    assert_eq!(presentation, 1200);
}

#[test]
fn replays_reference_route() {
    let (data, route, _dir) = reference_route();
    assert!(route.started_at().is_some());

    let mut player = Player::open(data.path(), route, PlayerOptions::default()).unwrap();
    assert_eq!(player.segments().len(), 1);
    assert_eq!(player.preload().loaded, 1);

    let counts: Rc<RefCell<HashMap<RecordKind, usize>>> = Rc::default();
    for kind in [RecordKind::Can, RecordKind::RadarState, RecordKind::RoadEncodeIdx] {
        let c = counts.clone();
        player.register_event_listener(kind, move |_| *c.borrow_mut().entry(kind).or_default() += 1);
    }
    let frames = Rc::new(RefCell::new(0usize));
    let f = frames.clone();
    player.register_frame_listener(RecordKind::RoadEncodeIdx, move |r, img| {
        assert!(r.is_presentation());
        // no decoder plugged in
        assert!(img.is_empty());
        *f.borrow_mut() += 1;
    });

    let mut ticks = 0;
    while player.tick() {
        ticks += 1;
    }
    assert_eq!(ticks, 14_988);
    assert!(!player.tick());

    let counts = counts.borrow();
    assert_eq!(counts[&RecordKind::Can], 12_356);
    assert_eq!(counts[&RecordKind::RadarState], 232);
    assert_eq!(counts[&RecordKind::RoadEncodeIdx], 2400);
    assert_eq!(*frames.borrow(), 1200);
    assert_eq!(player.route_start(), Some(T0));
}

#[test]
fn segments_replay_in_index_order() {
    let data = tempfile::tempdir().unwrap();
    let route = RouteId::new(DEVICE, ROUTE);
    // written out of order, with a gap
    for (index, ts) in [(3u32, 10u64), (0, 500), (1, 200)] {
        let dir = route.device_dir(data.path()).join(format!("{ROUTE}--{index}"));
        fs::create_dir_all(&dir).unwrap();
        let mut f = File::create(dir.join("qlog")).unwrap();
        write_frame(&mut f, ts, RecordKind::CarState, &());
        write_frame(&mut f, ts + 1, RecordKind::CarState, &());
    }
    // another route on the same device is ignored
    fs::create_dir_all(route.device_dir(data.path()).join("2023-07-28--09-00-00--0")).unwrap();

    let mut player = Player::open(data.path(), route, PlayerOptions::default()).unwrap();
    let indices: Vec<u32> = player.segments().iter().map(|s| s.index()).collect();
    assert_eq!(indices, vec![0, 1, 3]);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    player.register_event_listener(RecordKind::CarState, move |r| s.borrow_mut().push(r.timestamp()));
    assert_eq!(player.run(), 6);
    assert_eq!(*seen.borrow(), vec![500, 501, 200, 201, 10, 11]);
}

#[test]
fn malformed_segment_dir_fails_discovery() {
    let data = tempfile::tempdir().unwrap();
    let route = RouteId::new(DEVICE, ROUTE);
    write_reference_segment(&route.device_dir(data.path()).join(format!("{ROUTE}--0")));
    fs::create_dir_all(route.device_dir(data.path()).join(format!("{ROUTE}--x"))).unwrap();

    match Player::open(data.path(), route, PlayerOptions::default()) {
        Err(DiscoveryError::BadSegmentName { path, .. }) => assert!(path.ends_with(format!("{ROUTE}--x"))),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("discovery should fail"),
    }
}

#[test]
fn missing_device_dir_is_an_error() {
    let data = tempfile::tempdir().unwrap();
    let route = RouteId::new(DEVICE, ROUTE);
    assert!(matches!(
        Player::open(data.path(), route, PlayerOptions::default()),
        Err(DiscoveryError::Io { .. })
    ));
}

#[test]
fn corrupt_segment_replays_what_decoded() {
    let data = tempfile::tempdir().unwrap();
    let route = RouteId::new(DEVICE, ROUTE);
    let dir = route.device_dir(data.path()).join(format!("{ROUTE}--0"));
    fs::create_dir_all(&dir).unwrap();
    let mut bytes = Vec::new();
    for ts in [3u64, 1, 2] {
        write_frame(&mut bytes, ts, RecordKind::Can, &vec![can(1)]);
    }
    // flip a payload byte of a fourth frame
    write_frame(&mut bytes, 4, RecordKind::Can, &vec![can(2)]);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(dir.join("qlog"), &bytes).unwrap();

    let mut player = Player::open(data.path(), route, PlayerOptions::default()).unwrap();
    assert_eq!(player.preload().loaded, 1);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    player.register_event_listener(RecordKind::Can, move |r| s.borrow_mut().push(r.timestamp()));
    assert_eq!(player.run(), 3);
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
}

#[cfg(unix)]
#[test]
fn replays_symlinked_segment_and_log() {
    use std::os::unix::fs::symlink;

    let cache = tempfile::tempdir().unwrap();
    let mut f = File::create(cache.path().join("qlog")).unwrap();
    write_frame(&mut f, 7, RecordKind::Can, &vec![can(1)]);
    drop(f);
    let real_seg = cache.path().join("segment");
    fs::create_dir_all(&real_seg).unwrap();
    symlink(cache.path().join("qlog"), real_seg.join("qlog")).unwrap();

    let data = tempfile::tempdir().unwrap();
    let route = RouteId::new(DEVICE, ROUTE);
    fs::create_dir_all(route.device_dir(data.path())).unwrap();
    symlink(&real_seg, route.device_dir(data.path()).join(format!("{ROUTE}--0"))).unwrap();

    let mut player = Player::open(data.path(), route, PlayerOptions::default()).unwrap();
    assert_eq!(player.segments().len(), 1);
    assert!(player.segments()[0].qlog.is_some());
    assert_eq!(player.run(), 1);
    assert_eq!(player.route_start(), Some(7));
}
