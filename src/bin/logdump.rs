use anyhow::{Context, Result, bail};
use clap::Parser;
use route_replay::error::LoadError;
use route_replay::framing::FrameCursor;
use route_replay::record::{RecordKind, RecordRef};
use route_replay::{LogReader, bz2};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Decode a recorded qlog/rlog and print its records")]
struct Args {
    /// Input log to read (qlog, rlog, optionally .bz2)
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Only print per-kind counts
    #[arg(long, default_value_t = false)]
    summary: bool,

    /// Only print records of these kinds (name or numeric tag)
    #[arg(long, short = 'k', value_delimiter = ',')]
    kind: Vec<RecordKind>,

    /// Stop after this many records
    #[arg(long)]
    limit: Option<usize>,

    /// Walk frames in file order with byte offsets instead of replay order
    #[arg(long, default_value_t = false)]
    raw: bool,
}

fn print_record(r: &RecordRef<'_>) {
    let mark = if r.is_presentation() { "*" } else { " " };
    match r.encode_index() {
        Some(idx) => println!(
            "{:>20}{} {:<20} frame={} segment={}",
            r.timestamp(),
            mark,
            r.kind().to_string(),
            idx.frame_id,
            idx.segment_num
        ),
        None => println!("{:>20}{} {:<20} {} bytes", r.timestamp(), mark, r.kind().to_string(), r.payload.len()),
    }
}

fn dump_raw(args: &Args) -> Result<()> {
    let data = std::fs::read(&args.input).with_context(|| format!("open {:?}", args.input))?;
    let data = if args.input.to_string_lossy().contains(".bz2") { bz2::decompress_lossy(&data) } else { data };
    let mut cursor = FrameCursor::new(&data);
    let mut frames = 0usize;
    let mut offset = cursor.position();
    while let Some(frame) = cursor.next() {
        let frame = frame.with_context(|| format!("frame {frames}"))?;
        if args.limit.is_some_and(|l| frames >= l) {
            break;
        }
        if args.kind.is_empty() || args.kind.contains(&frame.kind) {
            println!("{:>10} {:>20} {:<20} {} bytes", offset, frame.log_mono_time, frame.kind.to_string(), frame.payload.len);
        }
        frames += 1;
        offset = cursor.position();
    }
    eprintln!("Done. Frames: {} ({} bytes)", frames, data.len());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.raw {
        return dump_raw(&args);
    }

    let mut reader = LogReader::new(&args.input);
    match reader.load() {
        Ok(()) => {}
        Err(e @ LoadError::Decode { .. }) => eprintln!("warning: {e}"),
        Err(e) => bail!(e),
    }

    let mut counts: BTreeMap<RecordKind, usize> = BTreeMap::new();
    let mut printed = 0usize;
    for r in reader.iter() {
        if !args.kind.is_empty() && !args.kind.contains(&r.kind()) {
            continue;
        }
        if args.limit.is_some_and(|l| printed >= l) {
            break;
        }
        *counts.entry(r.kind()).or_default() += 1;
        printed += 1;
        if !args.summary {
            print_record(&r);
        }
    }

    if args.summary {
        for (kind, n) in &counts {
            println!("{:<24} {:>8}", kind.to_string(), n);
        }
    }
    let first = reader.records().first().map_or(0, |r| r.timestamp);
    let last = reader.records().last().map_or(0, |r| r.timestamp);
    eprintln!(
        "Done. Records: {} (printed {}), span {:.3}s",
        reader.len(),
        printed,
        last.saturating_sub(first) as f64 / 1e9
    );
    Ok(())
}
