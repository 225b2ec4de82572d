//! # MPEG Transport Stream (TS) Demultiplexing
//!
//! This module turns an MPEG-2 transport stream into timestamped elementary
//! stream payloads. It supports:
//!
//! - 188-byte TS, 192-byte M2TS (Blu-ray BDAV), 204-byte DVB and 208-byte ATSC framing
//! - Program Specific Information: PAT and PMT sections with version tracking
//! - Packetized Elementary Stream reassembly, bounded and unbounded
//! - HDMV LPCM format probing
//! - PCR clock recovery, duration probing and time based seeking
//!
//! ## Architecture
//!
//! Every PID with something to decode has a [`Filter`] in the
//! [`FilterRegistry`]. The PAT filter on PID 0 creates programs and registers
//! PMT filters; each PMT filter registers an [`ElementaryStreamFilter`] per
//! supported stream. Completed payloads are queued and handed out by
//! [`TSDemuxer::get_payload`].
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::fs::File;
//! use tsdemux::format::ts::{TSDemuxer, TransportType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut demuxer = TSDemuxer::new();
//! demuxer.open(File::open("00000.m2ts")?, TransportType::M2ts)?;
//!
//! for program in demuxer.transport_stream().programs() {
//!     for stream in program.streams() {
//!         println!("0x{:04x}: {} [{}]", stream.id(), stream.element_type, stream.language);
//!     }
//! }
//!
//! let reached = demuxer.seek_time(60.0)?;
//! while let Some(payload) = demuxer.get_payload() {
//!     assert!(payload.pts >= reached - 1.0);
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

/// Growable buffer collecting one payload
pub mod accumulator;

/// PCR based program clock
pub mod clock;

/// Top-level transport stream demuxer
pub mod demuxer;

/// Input abstraction the demuxer reads from
pub mod input;

/// Programs and elementary streams discovered from PSI
pub mod model;

/// Low-level TS packet parsing utilities
pub mod parser;

/// PES packet reassembly and header parsing
pub mod pes;

/// PAT/PMT section filters
pub mod psi;

/// PID-indexed filter and clock tables
pub mod registry;

/// Core TS types and constants
pub mod types;

pub use accumulator::PayloadAccumulator;
pub use clock::ProgramClock;
pub use demuxer::{DemuxState, TSDemuxer};
pub use input::{InputStream, Sequential};
pub use model::{ElementaryStream, PropertyValue, TSProgram, TransportStream};
pub use pes::{ElementaryStreamFilter, LpcmFormat, PESHeader, PESParser, PESVariant};
pub use psi::{classify, PatParser, PmtParser, SectionFilter, SectionParser};
pub use registry::{Filter, FilterContext, FilterRegistry};
pub use types::{StreamType, TSHeader, TransportType, PID_PAT, TS_PACKET_SIZE};
