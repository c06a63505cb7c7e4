use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use log::{LevelFilter, info, warn};
use route_replay::record::{CanFrame, RadarState, RecordKind};
use route_replay::{Player, PlayerOptions, RouteId};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(version, about = "Replay a recorded route segment by segment")]
struct Args {
    /// Data directory containing <device_id>/<route>--<segment> folders
    #[arg(long, short = 'd', env = "DATA_DIR")]
    data: PathBuf,

    /// Route to replay, e.g. a2a0ccea32023010|2023-07-27--13-01-19
    #[arg(long, short = 'r', env = "ROUTE")]
    route: RouteId,

    /// Replay full-tier logs (rlog) and load every camera
    #[arg(long, env = "FULL_REPLAY", default_value_t = false)]
    full: bool,

    /// Frames per segment used to locate video frames
    #[arg(long, default_value_t = route_replay::player::FRAMES_PER_SEGMENT)]
    frames_per_segment: u64,

    /// Preload segments on this many threads
    #[arg(long, env = "PRELOAD_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Print every record of these kinds (name or numeric tag)
    #[arg(long, short = 'p', value_delimiter = ',')]
    print: Vec<RecordKind>,

    /// Wait time (ms) between records; 0 replays as fast as possible
    #[arg(long, short = 'w', default_value_t = 0)]
    wait: u64,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = env_logger::builder().filter_level(level).parse_default_env().try_init();
}

fn describe(kind: RecordKind, payload: &route_replay::RecordRef<'_>) -> String {
    match kind {
        RecordKind::Can | RecordKind::Sendcan => match payload.decode::<Vec<CanFrame>>() {
            Ok(frames) => format!("{} frames", frames.len()),
            Err(e) => format!("<{e}>"),
        },
        RecordKind::RadarState => match payload.decode::<RadarState>() {
            Ok(r) => format!(
                "car_state_mono_time={} leads={:?}",
                r.car_state_mono_time, r.lead_distances
            ),
            Err(e) => format!("<{e}>"),
        },
        k if k.is_encode_index() => match payload.encode_index() {
            Some(idx) => format!(
                "frame={} segment={} sof={} eof={}",
                idx.frame_id, idx.segment_num, idx.timestamp_sof, idx.timestamp_eof
            ),
            None => "<undecodable encode index>".to_string(),
        },
        _ => format!("{} bytes", payload.payload.len()),
    }
}

fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();
    let args = Args::parse();
    init_logging(args.verbose);

    if !args.data.is_dir() {
        anyhow::bail!("data directory {:?} does not exist", args.data);
    }
    let options = PlayerOptions { full: args.full, frames_per_segment: args.frames_per_segment };
    let mut player = Player::open(&args.data, args.route.clone(), options)
        .with_context(|| format!("discover route {}", args.route))?;
    if let Some(start) = args.route.started_at() {
        info!("Route {} recorded at {}", args.route, start);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || stop_handler.store(true, Ordering::Relaxed)).ok();

    let report = player.preload_parallel(args.workers, &stop);
    if report.failed > 0 {
        warn!("{} of {} segments have no usable log", report.failed, player.segments().len());
    }

    let counts: Rc<RefCell<BTreeMap<RecordKind, u64>>> = Rc::default();
    for kind in RecordKind::KNOWN {
        let counts = counts.clone();
        let print = args.print.contains(&kind);
        player.register_event_listener(kind, move |r| {
            *counts.borrow_mut().entry(kind).or_default() += 1;
            if print {
                let tag = if r.is_presentation() { " [frame]" } else { "" };
                println!("{} {}{} {}", r.timestamp(), kind, tag, describe(kind, r));
            }
        });
    }

    while !stop.load(Ordering::Relaxed) && player.tick() {
        if args.wait > 0 {
            std::thread::sleep(Duration::from_millis(args.wait));
        }
    }

    let start = player.route_start().unwrap_or(0);
    eprintln!(
        "Replayed {} records from {} segments (route start t={}).",
        player.records_seen(),
        player.segments().len(),
        start
    );
    for (kind, n) in counts.borrow().iter() {
        eprintln!("{:>24} {:>8}", kind.to_string(), n);
    }
    Ok(())
}
