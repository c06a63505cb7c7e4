//! Route recording replay library.
//!
//! This crate provides the core types and logic used by the `route_replay`
//! binary and the `logdump` tool:
//!
//! - `record`: record kinds, zero-copy record views and payload schema
//! - `framing`: length + CRC32 framed log layout (reader cursor and writer)
//! - `bz2`: whole-buffer bzip2 decompression with truncation reporting
//! - `log_reader`: one log file decoded into a `(timestamp, kind)` ordered
//!   record list, with presentation records for video frames
//! - `video`: camera channels and the pluggable frame decoder boundary
//! - `route`: route/segment naming and on-disk segment discovery
//! - `player`: the tick-driven replay engine with per-kind listeners
//!
//! Failures surface as the typed errors in `error`; per-segment decode
//! problems degrade to fewer records instead of stopping replay.
pub mod bz2;
pub mod error;
pub mod framing;
pub mod log_reader;
pub mod player;
pub mod record;
pub mod route;
pub mod video;

pub use error::{DecodeError, DecompressError, DiscoveryError, LoadError, ParseError, VideoError};
pub use log_reader::LogReader;
pub use player::{Player, PlayerOptions, PreloadReport};
pub use record::{Record, RecordKind, RecordRef};
pub use route::{RouteId, Segment, parse_route_name, parse_segment_name};
