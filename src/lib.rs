#![doc(html_root_url = "https://docs.rs/tsdemux/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsdemux - MPEG-2 Transport Stream demultiplexer
//!
//! `tsdemux` reads MPEG-2 transport streams, as found in broadcast captures and
//! on Blu-ray discs, and hands out the elementary stream payloads they carry
//! together with their presentation and decoding timestamps.
//!
//! ## Features
//!
//! ### Framing
//! - Plain 188-byte TS, 192-byte M2TS, 204-byte DVB and 208-byte ATSC packets
//! - Resynchronisation on the sync byte after corrupt data
//!
//! ### Tables and Streams
//! - PAT/PMT parsing with version tracking and optional CRC checks
//! - MPEG-2, H.264 and VC-1 video; AC-3, DTS, TrueHD, DTS-HD, AAC and HDMV LPCM audio
//! - Language and registration descriptors
//!
//! ### Timing
//! - PCR based clock recovery and bitrate estimation
//! - Duration probing from the first and last PCR
//! - Time based seeking with iterative refinement
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tsdemux = "0.1.0"
//! ```
//!
//! ### Reading Payloads
//!
//! ```rust,no_run
//! use tsdemux::format::ts::{TSDemuxer, TransportType};
//! use std::fs::File;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut demuxer = TSDemuxer::new();
//!     demuxer.open(File::open("capture.ts")?, TransportType::Ts)?;
//!
//!     while let Some(payload) = demuxer.get_payload() {
//!         let kind = demuxer.stream_by_id(payload.stream_id).map(|s| s.kind);
//!         println!("{:?} pts={:.3} size={}", kind, payload.pts, payload.size());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: Stream classification and the payload type handed to callers
//!
//! - `format`: Container demuxers
//!   - TS packet, PSI and PES parsing
//!   - Program clocks, duration probing and seeking
//!
//! - `config`: Process-wide defaults loaded from the environment and `tsdemux.toml`
//!
//! - `error`: Error handling types and utilities
//!   - `DemuxError` for every failure scenario
//!   - Result type alias for convenience
//!
//! - `utils`: Common utilities and helper functions
//!   - Bitstream reading
//!   - CRC calculations
//!
/// Stream classification and payload types
pub mod av;

/// Error types and utilities
pub mod error;

/// Media format implementations
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{DemuxError, Result};
