use super::accumulator::PayloadAccumulator;
use super::model::*;
use super::registry::{Filter, FilterContext};
use super::types::*;
use crate::av::ParserPayload;
use crate::error::{DemuxError, Result};
use crate::utils::BitReader;
use log::{debug, error, trace, warn};

const LPCM_HEADER_SIZE: usize = 4;
const LPCM_CHANNEL_COUNTS: [u8; 16] = [0, 1, 0, 2, 3, 3, 4, 4, 5, 6, 7, 8, 0, 0, 0, 0];

/// Decoded Packetized Elementary Stream header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PESHeader {
    /// Stream identifier indicating content type (video/audio/etc.)
    pub stream_id: u8,
    /// Length of the PES packet after this field; zero means unbounded
    pub packet_length: u16,
    pub scrambling_control: u8,
    pub priority: bool,
    pub data_alignment: bool,
    pub copyright: bool,
    pub original: bool,
    /// Flags indicating presence of PTS/DTS fields
    pub pts_dts_flags: u8,
    pub escr_flag: bool,
    pub es_rate_flag: bool,
    pub dsm_trick_mode_flag: bool,
    pub additional_copy_info_flag: bool,
    pub crc_flag: bool,
    pub extension_flag: bool,
    /// Length of the optional header area following the fixed 9 bytes
    pub header_data_length: u8,
    /// Presentation Time Stamp (33 bits, 90 kHz)
    pub pts: Option<u64>,
    /// Decoding Time Stamp (33 bits, 90 kHz)
    pub dts: Option<u64>,
    /// stream_id_extension carried by extended (0xFD) streams
    pub extension_stream_id: Option<u8>,
}

impl PESHeader {
    /// Total header size in bytes, i.e. the offset of the payload.
    pub fn size(&self) -> usize {
        if is_system_stream(self.stream_id) {
            PES_FIXED_HEADER_SIZE
        } else {
            PES_HEADER_SIZE + self.header_data_length as usize
        }
    }

    /// Decodes a complete PES header.
    pub fn parse(data: &[u8]) -> Result<PESHeader> {
        let mut reader = BitReader::new(data);

        if reader.read_u32(24)? != PES_START_CODE {
            return Err(DemuxError::Parser("Invalid PES start code".into()));
        }

        let mut header = PESHeader {
            stream_id: reader.read_u8(8)?,
            packet_length: reader.read_u16(16)?,
            ..Default::default()
        };
        if is_system_stream(header.stream_id) {
            return Ok(header);
        }

        if reader.read_u8(2)? != 0b10 {
            return Err(DemuxError::Parser("Invalid PES marker bits".into()));
        }
        header.scrambling_control = reader.read_u8(2)?;
        header.priority = reader.read_bit()?;
        header.data_alignment = reader.read_bit()?;
        header.copyright = reader.read_bit()?;
        header.original = reader.read_bit()?;

        header.pts_dts_flags = reader.read_u8(2)?;
        header.escr_flag = reader.read_bit()?;
        header.es_rate_flag = reader.read_bit()?;
        header.dsm_trick_mode_flag = reader.read_bit()?;
        header.additional_copy_info_flag = reader.read_bit()?;
        header.crc_flag = reader.read_bit()?;
        header.extension_flag = reader.read_bit()?;
        header.header_data_length = reader.read_u8(8)?;

        if reader.bytes_left() < header.header_data_length as usize {
            return Err(DemuxError::Parser("PES header truncated".into()));
        }
        // Only the declared optional area belongs to the header
        let optional = &reader.remaining()[..header.header_data_length as usize];
        let mut reader = BitReader::new(optional);

        match header.pts_dts_flags {
            0b10 => header.pts = Some(read_timestamp(&mut reader)?),
            0b11 => {
                header.pts = Some(read_timestamp(&mut reader)?);
                header.dts = Some(read_timestamp(&mut reader)?);
            }
            0b01 => return Err(DemuxError::Parser("Forbidden PTS_DTS_flags value".into())),
            _ => {}
        }

        if header.escr_flag {
            reader.skip_bytes(6)?;
        }
        if header.es_rate_flag {
            reader.skip_bytes(3)?;
        }
        if header.dsm_trick_mode_flag {
            reader.skip_bytes(1)?;
        }
        if header.additional_copy_info_flag {
            reader.skip_bytes(1)?;
        }
        if header.crc_flag {
            reader.skip_bytes(2)?;
        }

        if header.extension_flag {
            let private_data = reader.read_bit()?;
            let pack_header = reader.read_bit()?;
            let sequence_counter = reader.read_bit()?;
            let p_std_buffer = reader.read_bit()?;
            reader.skip_bits(3)?;
            let extension2 = reader.read_bit()?;

            if private_data {
                reader.skip_bytes(16)?;
            }
            if pack_header {
                let pack_field_length = reader.read_u8(8)?;
                reader.skip_bytes(pack_field_length as usize)?;
            }
            if sequence_counter {
                reader.skip_bytes(2)?;
            }
            if p_std_buffer {
                reader.skip_bytes(2)?;
            }
            if extension2 {
                reader.skip_bits(1)?; // marker
                let field_length = reader.read_u8(7)?;
                if field_length > 0 && header.stream_id == STREAM_ID_EXTENDED {
                    let extension_flag = reader.read_bit()?;
                    let stream_id_extension = reader.read_u8(7)?;
                    if !extension_flag {
                        header.extension_stream_id = Some(stream_id_extension);
                    }
                }
            }
        }

        Ok(header)
    }
}

fn read_timestamp(reader: &mut BitReader<'_>) -> Result<u64> {
    let bytes = reader.remaining();
    if bytes.len() < 5 {
        return Err(DemuxError::Parser("PES timestamp truncated".into()));
    }
    let field = [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]];
    reader.skip_bytes(5)?;
    Ok(decode_timestamp(&field))
}

pub fn is_system_stream(stream_id: u8) -> bool {
    SYSTEM_STREAM_IDS.contains(&stream_id)
}

/// Framing of the payloads a [`PESParser`] handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PESVariant {
    /// Payload follows the PES header directly.
    Standard,
    /// HDMV LPCM: a 4-byte audio sub-header sits between the PES header and the samples.
    Lpcm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingFirstUnit,
    Header,
    Body,
    Complete,
    /// The current unit is unusable; ignore data until the next unit starts.
    Skipping,
}

/// Reassembles the PES packets of one elementary stream into timestamped payloads.
pub struct PESParser {
    pid: u16,
    variant: PESVariant,
    state: State,
    header: [u8; MAX_PES_HEADER_SIZE],
    header_len: usize,
    header_needed: usize,
    header_done: bool,
    payload: PayloadAccumulator,
    lpcm_header: [u8; LPCM_HEADER_SIZE],
    lpcm_header_len: usize,
    lpcm_probed: bool,
}

impl PESParser {
    pub fn new(pid: u16, variant: PESVariant, initial_capacity: usize) -> Self {
        Self {
            pid,
            variant,
            state: State::AwaitingFirstUnit,
            header: [0; MAX_PES_HEADER_SIZE],
            header_len: 0,
            header_needed: PES_FIXED_HEADER_SIZE,
            header_done: false,
            payload: PayloadAccumulator::new(initial_capacity),
            lpcm_header: [0; LPCM_HEADER_SIZE],
            lpcm_header_len: 0,
            lpcm_probed: false,
        }
    }

    pub fn variant(&self) -> PESVariant {
        self.variant
    }

    /// Feeds the payload of one transport packet. Always consumes all of
    /// `data`; bytes beyond the declared PES length are reported and dropped.
    pub fn add(&mut self, data: &[u8], payload_unit_start: bool, ctx: &mut FilterContext<'_>) -> usize {
        if payload_unit_start {
            match self.state {
                State::Body if self.payload.is_unbounded() => self.complete_payload(ctx),
                State::Header | State::Body => {
                    debug!(target: ctx.log_target(),
                        "PID 0x{:04x}: dropping incomplete PES packet ({} bytes)",
                        self.pid, self.payload.len());
                    self.payload.discard();
                }
                _ => {}
            }
            self.header_len = 0;
            self.header_needed = PES_FIXED_HEADER_SIZE;
            self.header_done = false;
            self.lpcm_header_len = 0;
            self.state = State::Header;
        } else if matches!(self.state, State::AwaitingFirstUnit | State::Skipping) {
            return data.len();
        } else if self.state == State::Complete {
            trace!(target: ctx.log_target(),
                "PID 0x{:04x}: {} bytes after complete PES packet", self.pid, data.len());
            return data.len();
        }

        let mut pos = 0;
        if self.state == State::Header {
            pos += self.fill_header(data);
            if !self.header_done {
                if self.state == State::Skipping {
                    debug!(target: ctx.log_target(),
                        "PID 0x{:04x}: bad PES start code, skipping unit", self.pid);
                }
                return data.len();
            }
            if !self.begin_payload(ctx) {
                return data.len();
            }
        }

        if self.variant == PESVariant::Lpcm && self.lpcm_header_len < LPCM_HEADER_SIZE {
            let take = (LPCM_HEADER_SIZE - self.lpcm_header_len).min(data.len() - pos);
            self.lpcm_header[self.lpcm_header_len..self.lpcm_header_len + take]
                .copy_from_slice(&data[pos..pos + take]);
            self.lpcm_header_len += take;
            pos += take;
            if self.lpcm_header_len < LPCM_HEADER_SIZE {
                return data.len();
            }
            if !self.lpcm_probed {
                self.lpcm_probed = self.probe_lpcm(ctx);
            }
        }

        let (used, done) = self.payload.add_data(&data[pos..]);
        pos += used;
        if done {
            self.complete_payload(ctx);
        }

        if pos < data.len() {
            error!(target: ctx.log_target(),
                "PID 0x{:04x}: PES size mismatch, {} bytes left over", self.pid, data.len() - pos);
        }
        data.len()
    }

    /// Copies header bytes until the full header is known, growing the target
    /// from the fixed part to the optional area as length fields arrive.
    fn fill_header(&mut self, data: &[u8]) -> usize {
        let mut pos = 0;
        loop {
            let take = (self.header_needed - self.header_len).min(data.len() - pos);
            self.header[self.header_len..self.header_len + take]
                .copy_from_slice(&data[pos..pos + take]);
            self.header_len += take;
            pos += take;
            if self.header_len < self.header_needed {
                return pos;
            }

            if self.header_needed == PES_FIXED_HEADER_SIZE {
                if self.header[..3] != [0x00, 0x00, 0x01] {
                    self.state = State::Skipping;
                    return pos;
                }
                if is_system_stream(self.header[3]) {
                    self.header_done = true;
                    return pos;
                }
                self.header_needed = PES_HEADER_SIZE;
            } else if self.header_needed == PES_HEADER_SIZE && self.header[8] != 0 {
                self.header_needed = PES_HEADER_SIZE + self.header[8] as usize;
            } else {
                self.header_done = true;
                return pos;
            }
        }
    }

    fn begin_payload(&mut self, ctx: &FilterContext<'_>) -> bool {
        let packet_length = u16::from_be_bytes([self.header[4], self.header[5]]) as usize;
        let sub_header = match self.variant {
            PESVariant::Standard => 0,
            PESVariant::Lpcm => LPCM_HEADER_SIZE,
        };

        if packet_length == 0 {
            self.payload.start_payload_unbounded();
        } else {
            let total = packet_length + PES_FIXED_HEADER_SIZE;
            if total < self.header_len + sub_header {
                warn!(target: ctx.log_target(),
                    "PID 0x{:04x}: PES length {} shorter than its header", self.pid, packet_length);
                self.state = State::Skipping;
                return false;
            }
            self.payload.start_payload(total - self.header_len - sub_header);
        }
        self.state = State::Body;
        true
    }

    fn complete_payload(&mut self, ctx: &mut FilterContext<'_>) {
        let data = self.payload.detach();
        self.state = State::Complete;

        let header = match PESHeader::parse(&self.header[..self.header_len]) {
            Ok(header) => header,
            Err(e) => {
                debug!(target: ctx.log_target(), "PID 0x{:04x}: dropping PES packet: {}", self.pid, e);
                return;
            }
        };

        // Only one sub-stream per PID is exposed: drop the core companion of
        // TrueHD / DTS-HD extended streams.
        if header.extension_stream_id == Some(EXTENDED_ID_CORE_SUBSTREAM) {
            trace!(target: ctx.log_target(), "PID 0x{:04x}: skipping core sub-stream", self.pid);
            return;
        }

        if data.is_empty() {
            trace!(target: ctx.log_target(), "PID 0x{:04x}: empty PES payload", self.pid);
            return;
        }

        let pts = header.pts.map(pts_to_seconds).unwrap_or(0.0);
        let dts = header.dts.map(pts_to_seconds).unwrap_or(pts);
        trace!(target: ctx.log_target(),
            "PID 0x{:04x}: payload of {} bytes, pts {:.3}", self.pid, data.len(), pts);
        ctx.payloads
            .push_back(ParserPayload::new(data, self.pid).with_pts(pts).with_dts(dts));
    }

    /// Reads the format of an HDMV LPCM stream from its audio sub-header and
    /// publishes it on the stream.
    fn probe_lpcm(&self, ctx: &mut FilterContext<'_>) -> bool {
        let Some(format) = LpcmFormat::parse(&self.lpcm_header) else {
            debug!(target: ctx.log_target(),
                "PID 0x{:04x}: unsupported LPCM header {:02x?}", self.pid, self.lpcm_header);
            return false;
        };

        let Some(stream) = ctx.transport_stream.stream_mut(self.pid) else {
            return false;
        };
        stream.set_property(PROP_CHANNELS, PropertyValue::Int32(format.channels as i32));
        stream.set_property(PROP_BIT_DEPTH, PropertyValue::Int32(format.bit_depth as i32));
        stream.set_property(PROP_SAMPLE_RATE, PropertyValue::Int32(format.sample_rate as i32));
        stream.set_property(PROP_FRAME_SIZE, PropertyValue::Int32(format.frame_size() as i32));
        stream.set_property(PROP_BITRATE, PropertyValue::Int32(format.bitrate() as i32));
        debug!(target: ctx.log_target(),
            "PID 0x{:04x}: LPCM {} ch, {} Hz, {} bit", self.pid,
            format.channels, format.sample_rate, format.bit_depth);
        true
    }

    /// Completes an unbounded payload still open at end of input. Bounded
    /// payloads that never reached their length stay incomplete.
    pub fn finish(&mut self, ctx: &mut FilterContext<'_>) {
        if self.state == State::Body && self.payload.is_unbounded() {
            self.complete_payload(ctx);
        }
    }

    /// Drops any partial packet; data is ignored until the next unit start.
    pub fn flush(&mut self) {
        self.payload.discard();
        self.header_len = 0;
        self.header_done = false;
        self.state = State::AwaitingFirstUnit;
    }
}

/// Audio format carried in the HDMV LPCM sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LpcmFormat {
    /// Size of the audio data following the sub-header.
    pub payload_size: u16,
    pub channels: u32,
    pub sample_rate: u32,
    pub bit_depth: u32,
}

impl LpcmFormat {
    pub fn parse(header: &[u8; LPCM_HEADER_SIZE]) -> Option<Self> {
        let channels = LPCM_CHANNEL_COUNTS[(header[2] >> 4) as usize] as u32;
        if channels == 0 {
            return None;
        }
        let sample_rate = match header[2] & 0x0F {
            1 => 48_000,
            4 => 96_000,
            5 => 192_000,
            _ => return None,
        };
        let bit_depth = match header[3] & 0xC0 {
            0x40 => 16,
            0x80 => 24,
            0xC0 => 32,
            _ => return None,
        };
        Some(Self {
            payload_size: u16::from_be_bytes([header[0], header[1]]),
            channels,
            sample_rate,
            bit_depth,
        })
    }

    /// Bytes per sample frame across all channels.
    pub fn frame_size(&self) -> u32 {
        (self.bit_depth >> 3) * self.channels
    }

    pub fn bitrate(&self) -> u32 {
        self.sample_rate * self.channels * self.bit_depth
    }
}

/// Filter for a PID carrying an elementary stream.
pub struct ElementaryStreamFilter {
    parser: PESParser,
}

impl ElementaryStreamFilter {
    pub fn new(parser: PESParser) -> Self {
        Self { parser }
    }
}

impl Filter for ElementaryStreamFilter {
    fn add(&mut self, data: &[u8], payload_unit_start: bool, ctx: &mut FilterContext<'_>) -> usize {
        self.parser.add(data, payload_unit_start, ctx)
    }

    fn flush(&mut self) {
        self.parser.flush();
    }

    fn finish(&mut self, ctx: &mut FilterContext<'_>) {
        self.parser.finish(ctx);
    }

    fn is_stream_filter(&self) -> bool {
        true
    }
}
