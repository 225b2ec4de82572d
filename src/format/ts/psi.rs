use super::model::*;
use super::pes::{ElementaryStreamFilter, PESParser, PESVariant};
use super::registry::{Filter, FilterContext};
use super::types::*;
use crate::av::{AudioCodec, StreamKind, VideoCodec};
use crate::error::{DemuxError, Result};
use crate::utils::{BitReader, Crc32Mpeg2};
use log::{debug, info, trace, warn};
use std::collections::HashMap;

const SECTION_PREFIX_SIZE: usize = 3;
const LONG_HEADER_SIZE: usize = 8;
const CRC_SIZE: usize = 4;
const STUFFING_BYTE: u8 = 0xFF;

/// A tag/length/value descriptor from a PMT descriptor loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

pub fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    let mut pos = 0;

    while pos + 2 <= data.len() {
        let tag = data[pos];
        let length = data[pos + 1] as usize;
        pos += 2;

        if pos + length > data.len() {
            return Err(DemuxError::InvalidData("Descriptor data too short".into()));
        }

        descriptors.push(Descriptor {
            tag,
            data: data[pos..pos + length].to_vec(),
        });
        pos += length;
    }

    Ok(descriptors)
}

/// Fixed part of a long-form PSI section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub table_id: u8,
    /// Full section size, including the 3 leading bytes and the CRC.
    pub section_size: usize,
    /// transport_stream_id for a PAT, program_number for a PMT.
    pub table_id_extension: u16,
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

impl SectionHeader {
    pub fn parse(section: &[u8]) -> Result<SectionHeader> {
        let mut reader = BitReader::new(section);
        let table_id = reader.read_u8(8)?;
        reader.skip_bits(4)?; // syntax indicator, '0', reserved
        let section_size = reader.read_u16(12)? as usize + SECTION_PREFIX_SIZE;
        let table_id_extension = reader.read_u16(16)?;
        reader.skip_bits(2)?;
        let version = reader.read_u8(5)?;
        let current_next = reader.read_bit()?;
        let section_number = reader.read_u8(8)?;
        let last_section_number = reader.read_u8(8)?;

        if section_size < LONG_HEADER_SIZE + CRC_SIZE || section_size > section.len() {
            return Err(DemuxError::InvalidData(format!(
                "Invalid section length {} for table 0x{:02x}",
                section_size, table_id
            )));
        }

        Ok(SectionHeader {
            table_id,
            section_size,
            table_id_extension,
            version,
            current_next,
            section_number,
            last_section_number,
        })
    }

    /// Bytes between the fixed header and the CRC.
    pub fn body<'a>(&self, section: &'a [u8]) -> &'a [u8] {
        &section[LONG_HEADER_SIZE..self.section_size - CRC_SIZE]
    }
}

/// Tracks the last committed version of a table.
///
/// A version commits on the last section of the table. Sections of the
/// committed version are re-deliveries and are ignored, as are sections
/// that are not yet current.
#[derive(Debug, Default, Clone, Copy)]
pub struct VersionGate {
    committed: Option<u8>,
}

impl VersionGate {
    pub fn accepts(&self, header: &SectionHeader) -> bool {
        header.current_next && self.committed != Some(header.version)
    }

    pub fn commit(&mut self, header: &SectionHeader) {
        if header.section_number == header.last_section_number {
            self.committed = Some(header.version);
        }
    }

    pub fn committed(&self) -> Option<u8> {
        self.committed
    }
}

/// Decoder for complete sections of one table type.
pub trait SectionParser {
    /// Handles one complete section, from table_id through the CRC.
    fn parse_section(&mut self, section: &[u8], ctx: &mut FilterContext<'_>) -> Result<()>;
}

/// Reassembles PSI sections from packet payloads and hands them to a [`SectionParser`].
pub struct SectionFilter<P> {
    parser: P,
    buffer: Vec<u8>,
    synced: bool,
    crc: Option<Crc32Mpeg2>,
}

impl<P: SectionParser> SectionFilter<P> {
    pub fn new(parser: P, verify_crc: bool) -> Self {
        Self {
            parser,
            buffer: Vec::new(),
            synced: false,
            crc: verify_crc.then(Crc32Mpeg2::new),
        }
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// Appends bytes to the section in progress, dispatching it once complete.
    /// Returns the number of bytes used.
    fn collect(&mut self, data: &[u8], ctx: &mut FilterContext<'_>) -> usize {
        let mut pos = 0;
        if self.buffer.len() < SECTION_PREFIX_SIZE {
            let take = (SECTION_PREFIX_SIZE - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            pos += take;
            if self.buffer.len() < SECTION_PREFIX_SIZE {
                return pos;
            }
        }

        let section_size =
            ((((self.buffer[1] & 0x0F) as usize) << 8) | self.buffer[2] as usize) + SECTION_PREFIX_SIZE;
        let take = (section_size - self.buffer.len()).min(data.len() - pos);
        self.buffer.extend_from_slice(&data[pos..pos + take]);
        pos += take;

        if self.buffer.len() == section_size {
            let section = std::mem::take(&mut self.buffer);
            self.dispatch(&section, ctx);
        }
        pos
    }

    fn dispatch(&mut self, section: &[u8], ctx: &mut FilterContext<'_>) {
        if let Some(crc) = &self.crc {
            if !crc.verify(section) {
                warn!(target: ctx.log_target(),
                    "PID 0x{:04x}: dropping section with bad CRC", ctx.pid);
                return;
            }
        }
        if let Err(e) = self.parser.parse_section(section, ctx) {
            debug!(target: ctx.log_target(), "PID 0x{:04x}: dropping section: {}", ctx.pid, e);
        }
    }
}

impl<P: SectionParser> Filter for SectionFilter<P> {
    fn add(&mut self, data: &[u8], payload_unit_start: bool, ctx: &mut FilterContext<'_>) -> usize {
        if !payload_unit_start {
            if self.synced && !self.buffer.is_empty() {
                self.collect(data, ctx);
            }
            return data.len();
        }

        let Some((&pointer, rest)) = data.split_first() else {
            return 0;
        };
        let pointer = pointer as usize;
        if pointer > rest.len() {
            debug!(target: ctx.log_target(), "PID 0x{:04x}: pointer_field past packet end", ctx.pid);
            self.buffer.clear();
            return data.len();
        }

        // The bytes before the pointed-to section finish the previous one
        if self.synced && !self.buffer.is_empty() {
            self.collect(&rest[..pointer], ctx);
            if !self.buffer.is_empty() {
                debug!(target: ctx.log_target(),
                    "PID 0x{:04x}: section cut short by a new one", ctx.pid);
                self.buffer.clear();
            }
        }
        self.synced = true;

        let mut pos = pointer;
        while pos < rest.len() && rest[pos] != STUFFING_BYTE {
            pos += self.collect(&rest[pos..], ctx);
            if !self.buffer.is_empty() {
                break;
            }
        }
        data.len()
    }
}

/// Program Association Table: creates programs and the PMT filters for them.
#[derive(Debug, Default)]
pub struct PatParser {
    version: VersionGate,
}

impl PatParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SectionParser for PatParser {
    fn parse_section(&mut self, section: &[u8], ctx: &mut FilterContext<'_>) -> Result<()> {
        let header = SectionHeader::parse(section)?;
        if header.table_id != TABLE_ID_PAT {
            return Err(DemuxError::Parser(format!(
                "Unexpected table 0x{:02x} on PAT PID",
                header.table_id
            )));
        }
        if !self.version.accepts(&header) {
            trace!(target: ctx.log_target(), "PAT version {} already handled", header.version);
            return Ok(());
        }

        ctx.transport_stream.transport_stream_id = header.table_id_extension;
        for entry in header.body(section).chunks_exact(4) {
            let program_number = u16::from_be_bytes([entry[0], entry[1]]);
            let pid = u16::from_be_bytes([entry[2] & 0x1F, entry[3]]);
            if program_number == 0 {
                debug!(target: ctx.log_target(), "PAT: network PID 0x{:04x}", pid);
                continue;
            }

            let index = ctx.transport_stream.add_program(TSProgram::new(program_number, pid));
            let filter = SectionFilter::new(PmtParser::new(index), ctx.config.verify_crc);
            ctx.registry.register_filter(pid, Box::new(filter), true);
            info!(target: ctx.log_target(),
                "PAT v{}: program {} on PMT PID 0x{:04x}", header.version, program_number, pid);
        }

        self.version.commit(&header);
        Ok(())
    }
}

/// Program Map Table of one program: discovers its streams and wires up their filters.
#[derive(Debug)]
pub struct PmtParser {
    program_index: usize,
    version: VersionGate,
}

impl PmtParser {
    pub fn new(program_index: usize) -> Self {
        Self {
            program_index,
            version: VersionGate::default(),
        }
    }

    pub fn program_index(&self) -> usize {
        self.program_index
    }
}

impl SectionParser for PmtParser {
    fn parse_section(&mut self, section: &[u8], ctx: &mut FilterContext<'_>) -> Result<()> {
        let header = SectionHeader::parse(section)?;
        if header.table_id != TABLE_ID_PMT {
            debug!(target: ctx.log_target(),
                "PID 0x{:04x}: skipping unsupported table 0x{:02x}", ctx.pid, header.table_id);
            return Ok(());
        }
        if !self.version.accepts(&header) {
            trace!(target: ctx.log_target(), "PMT version {} already handled", header.version);
            return Ok(());
        }

        let body = header.body(section);
        if body.len() < 4 {
            return Err(DemuxError::InvalidData("PMT too short".into()));
        }
        let pcr_pid = u16::from_be_bytes([body[0] & 0x1F, body[1]]);
        let program_info_length = (((body[2] & 0x0F) as usize) << 8) | body[3] as usize;
        let mut pos = 4;
        if pos + program_info_length > body.len() {
            return Err(DemuxError::InvalidData("Program info data too short".into()));
        }

        let program_index = self.program_index;
        let Some(program) = ctx.transport_stream.program_mut(program_index) else {
            return Err(DemuxError::Parser(format!("No program at index {}", program_index)));
        };

        if pcr_pid != PID_MAX {
            if let Some(previous) = program.pcr_pid.filter(|&p| p != pcr_pid) {
                ctx.registry.unregister_clock(previous);
            }
            program.pcr_pid = Some(pcr_pid);
            ctx.registry.register_clock(pcr_pid, program_index);
        }

        for descriptor in parse_descriptors(&body[pos..pos + program_info_length])? {
            match descriptor.tag {
                DESCRIPTOR_REGISTRATION if descriptor.data.len() >= 4 => {
                    debug!(target: ctx.log_target(), "PMT: program registration '{}'",
                        String::from_utf8_lossy(&descriptor.data[..4]));
                }
                tag => trace!(target: ctx.log_target(), "PMT: skipping descriptor 0x{:02x}", tag),
            }
        }
        pos += program_info_length;

        while pos + 5 <= body.len() {
            let stream_type = StreamType::from(body[pos]);
            let pid = u16::from_be_bytes([body[pos + 1] & 0x1F, body[pos + 2]]);
            let es_info_length = (((body[pos + 3] & 0x0F) as usize) << 8) | body[pos + 4] as usize;
            pos += 5;

            if pos + es_info_length > body.len() {
                return Err(DemuxError::InvalidData("ES info data too short".into()));
            }
            let descriptors: HashMap<u8, Vec<u8>> =
                parse_descriptors(&body[pos..pos + es_info_length])?
                    .into_iter()
                    .map(|d| (d.tag, d.data))
                    .collect();
            pos += es_info_length;

            let Some((element_type, kind)) = classify(stream_type, &descriptors) else {
                debug!(target: ctx.log_target(),
                    "PMT: dropping PID 0x{:04x}, {}", pid, stream_type);
                continue;
            };
            add_stream(ctx, program_index, pid, element_type, kind, &descriptors);
        }

        self.version.commit(&header);
        Ok(())
    }
}

fn add_stream(
    ctx: &mut FilterContext<'_>,
    program_index: usize,
    pid: u16,
    element_type: StreamType,
    kind: StreamKind,
    descriptors: &HashMap<u8, Vec<u8>>,
) {
    let mut stream = ElementaryStream::new(pid, element_type, kind);
    if let Some(language) = descriptors
        .get(&DESCRIPTOR_ISO_639_LANGUAGE)
        .filter(|data| data.len() >= 4)
    {
        stream.language = language[..3].iter().map(|&b| b as char).collect();
    }
    if let Some(fourcc) = descriptors.get(&DESCRIPTOR_REGISTRATION).filter(|data| data.len() >= 4) {
        let value = i32::from_be_bytes([fourcc[0], fourcc[1], fourcc[2], fourcc[3]]);
        stream.set_property(PROP_FOURCC, PropertyValue::Int32(value));
    }

    let Some(program) = ctx.transport_stream.program_mut(program_index) else {
        return;
    };
    let unchanged = program
        .stream(pid)
        .is_some_and(|existing| existing.element_type == element_type);
    program.add_stream(stream);

    if unchanged && ctx.registry.has_filter(pid) {
        return;
    }
    let variant = match element_type {
        StreamType::Lpcm => PESVariant::Lpcm,
        _ => PESVariant::Standard,
    };
    let parser = PESParser::new(pid, variant, ctx.config.unbounded_initial_capacity);
    ctx.registry
        .register_filter(pid, Box::new(ElementaryStreamFilter::new(parser)), true);
    info!(target: ctx.log_target(), "PMT: stream PID 0x{:04x}, {}", pid, element_type);
}

/// Maps a PMT stream type and its descriptors to the stream the demuxer exposes.
///
/// Returns `None` for streams that are not handled. User-private streams are
/// reclassified: an HDMV registration makes them LPCM, an AC-3 descriptor AC-3.
pub fn classify(
    stream_type: StreamType,
    descriptors: &HashMap<u8, Vec<u8>>,
) -> Option<(StreamType, StreamKind)> {
    let kind = match stream_type {
        StreamType::Mpeg2Video => StreamKind::Video(VideoCodec::Mpeg2),
        StreamType::H264 => StreamKind::Video(VideoCodec::H264),
        StreamType::Vc1 => StreamKind::Video(VideoCodec::Vc1),
        StreamType::Ac3 => StreamKind::Audio(AudioCodec::Ac3),
        StreamType::Dts => StreamKind::Audio(AudioCodec::Dts),
        StreamType::TrueHd => StreamKind::Audio(AudioCodec::TrueHd),
        StreamType::DtsHd => StreamKind::Audio(AudioCodec::DtsHd),
        StreamType::DtsHdMaster => StreamKind::Audio(AudioCodec::DtsHdMaster),
        StreamType::Aac => StreamKind::Audio(AudioCodec::Aac),
        StreamType::Lpcm => StreamKind::Audio(AudioCodec::Lpcm),
        StreamType::UserPrivate => {
            let hdmv = descriptors
                .get(&DESCRIPTOR_REGISTRATION)
                .is_some_and(|data| data.starts_with(FORMAT_IDENTIFIER_HDMV));
            if hdmv {
                return Some((StreamType::Lpcm, StreamKind::Audio(AudioCodec::Lpcm)));
            }
            if descriptors.contains_key(&DESCRIPTOR_AC3) || descriptors.contains_key(&DESCRIPTOR_ATSC_AC3) {
                return Some((StreamType::Ac3, StreamKind::Audio(AudioCodec::Ac3)));
            }
            return None;
        }
        StreamType::PrivateSection | StreamType::PrivateData | StreamType::Other(_) => return None,
    };
    Some((stream_type, kind))
}
