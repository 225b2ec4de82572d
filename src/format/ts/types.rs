use crate::error::Result;
use bytes::{BufMut, BytesMut};
use std::fmt;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_CAT: u16 = 0x0001;
pub const PID_NULL: u16 = 0x1FFF;
pub const PID_MAX: u16 = 0x1FFF;
pub const PID_COUNT: usize = 0x2000;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

// Descriptor tags
pub const DESCRIPTOR_REGISTRATION: u8 = 0x05;
pub const DESCRIPTOR_ISO_639_LANGUAGE: u8 = 0x0A;
pub const DESCRIPTOR_AC3: u8 = 0x6A;
pub const DESCRIPTOR_ATSC_AC3: u8 = 0x81;

/// Format identifier carried by Blu-ray registration descriptors.
pub const FORMAT_IDENTIFIER_HDMV: &[u8; 4] = b"HDMV";

// PES
pub const PES_START_CODE: u32 = 0x000001;
pub const PES_FIXED_HEADER_SIZE: usize = 6;
pub const PES_HEADER_SIZE: usize = 9;
/// Largest possible PES header: fixed part plus a 255-byte optional area.
pub const MAX_PES_HEADER_SIZE: usize = PES_HEADER_SIZE + 255;
pub const STREAM_ID_EXTENDED: u8 = 0xFD;
/// Extended stream id of the lossless core companion of TrueHD/DTS-HD streams.
pub const EXTENDED_ID_CORE_SUBSTREAM: u8 = 0x72;
/// Stream ids without the optional PES header (program_stream_map, padding, ...).
pub const SYSTEM_STREAM_IDS: [u8; 8] = [0xBC, 0xBE, 0xBF, 0xF0, 0xF1, 0xF2, 0xF8, 0xFF];

// Constants
pub const SYNC_BYTE: u8 = 0x47;
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const M2TS_TIMESTAMP_SIZE: usize = 4;
pub const PTS_HZ: u64 = 90_000;
pub const PCR_HZ: u64 = 27_000_000;
/// Period of the 33-bit PCR base expressed in 27 MHz ticks.
pub const PCR_WRAP: u64 = (1 << 33) * 300;

/// Framing of the transport stream being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportType {
    /// Plain 188-byte packets.
    #[default]
    Ts,
    /// 192-byte BDAV/HDMV packets with a leading 4-byte arrival timestamp.
    M2ts,
    /// 204-byte packets with trailing Reed-Solomon parity.
    Dvb,
    /// 208-byte packets with trailing parity.
    Atsc,
}

impl TransportType {
    pub fn packet_size(&self) -> usize {
        match self {
            TransportType::Ts => 188,
            TransportType::M2ts => 192,
            TransportType::Dvb => 204,
            TransportType::Atsc => 208,
        }
    }

    /// Offset of the sync byte inside a packet.
    pub fn sync_offset(&self) -> usize {
        match self {
            TransportType::M2ts => M2TS_TIMESTAMP_SIZE,
            _ => 0,
        }
    }
}

/// Elementary stream type as carried in a PMT (ISO/IEC 13818-1 Table 2-34
/// plus Blu-ray user-private values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Mpeg2Video,
    H264,
    Vc1,
    Ac3,
    Dts,
    TrueHd,
    DtsHd,
    DtsHdMaster,
    Aac,
    PrivateSection,
    PrivateData,
    UserPrivate,
    /// User-private stream identified as HDMV LPCM by its descriptors.
    Lpcm,
    Other(u8),
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x02 => StreamType::Mpeg2Video,
            0x05 => StreamType::PrivateSection,
            0x06 => StreamType::PrivateData,
            0x0F => StreamType::Aac,
            0x1B => StreamType::H264,
            0x80 => StreamType::UserPrivate,
            0x81 => StreamType::Ac3,
            0x83 => StreamType::TrueHd,
            0x85 => StreamType::DtsHd,
            0x86 => StreamType::DtsHdMaster,
            0x8A => StreamType::Dts,
            0xEA => StreamType::Vc1,
            other => StreamType::Other(other),
        }
    }
}

impl StreamType {
    /// Wire value of this stream type.
    pub fn value(&self) -> u8 {
        match self {
            StreamType::Mpeg2Video => 0x02,
            StreamType::PrivateSection => 0x05,
            StreamType::PrivateData => 0x06,
            StreamType::Aac => 0x0F,
            StreamType::H264 => 0x1B,
            StreamType::UserPrivate | StreamType::Lpcm => 0x80,
            StreamType::Ac3 => 0x81,
            StreamType::TrueHd => 0x83,
            StreamType::DtsHd => 0x85,
            StreamType::DtsHdMaster => 0x86,
            StreamType::Dts => 0x8A,
            StreamType::Vc1 => 0xEA,
            StreamType::Other(value) => *value,
        }
    }

    pub fn name(&self) -> String {
        match self {
            StreamType::Mpeg2Video => "MPEG-2 Video".into(),
            StreamType::H264 => "H.264/AVC Video".into(),
            StreamType::Vc1 => "VC-1 Video".into(),
            StreamType::Ac3 => "AC-3 Audio".into(),
            StreamType::Dts => "DTS Audio".into(),
            StreamType::TrueHd => "TrueHD Audio".into(),
            StreamType::DtsHd => "DTS-HD Audio".into(),
            StreamType::DtsHdMaster => "DTS-HD Master Audio".into(),
            StreamType::Aac => "AAC Audio".into(),
            StreamType::PrivateSection => "Private Sections".into(),
            StreamType::PrivateData => "Private PES Data".into(),
            StreamType::UserPrivate => "User Private".into(),
            StreamType::Lpcm => "HDMV LPCM Audio".into(),
            StreamType::Other(value) => format!("Unknown (0x{:02x})", value),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.value())
    }
}

/// Program clock reference as carried in an adaptation field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcr {
    /// 33-bit base in 90 kHz units
    pub base: u64,
    /// 9-bit extension in 27 MHz units
    pub extension: u16,
}

impl Pcr {
    /// 42-bit value in 27 MHz ticks.
    pub fn value(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    pub fn from_value(value: u64) -> Self {
        Pcr {
            base: value / 300,
            extension: (value % 300) as u16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptationField {
    pub length: usize,
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub pcr_flag: bool,
    pub opcr_flag: bool,
    pub splicing_point_flag: bool,
    pub private_data_flag: bool,
    pub extension_flag: bool,
    pub pcr: Option<Pcr>,
}

#[derive(Debug)]
pub struct TSHeader {
    pub sync_byte: u8, // Always 0x47
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

impl Default for TSHeader {
    fn default() -> Self {
        Self {
            sync_byte: SYNC_BYTE,
            transport_error: false,
            payload_unit_start: false,
            transport_priority: false,
            pid: 0,
            scrambling_control: 0,
            adaptation_field_exists: false,
            contains_payload: true,
            continuity_counter: 0,
        }
    }
}

impl TSHeader {
    /// Serialises the 4-byte packet header. The demuxer only reads headers;
    /// this is used by tests to build synthetic streams.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.sync_byte);

        let mut b1 = 0u8;
        if self.transport_error {
            b1 |= 0x80;
        }
        if self.payload_unit_start {
            b1 |= 0x40;
        }
        if self.transport_priority {
            b1 |= 0x20;
        }
        b1 |= ((self.pid >> 8) & 0x1f) as u8;
        buf.put_u8(b1);

        buf.put_u8((self.pid & 0xff) as u8);

        let mut b3 = self.scrambling_control << 6;
        if self.adaptation_field_exists {
            b3 |= 0x20;
        }
        if self.contains_payload {
            b3 |= 0x10;
        }
        b3 |= self.continuity_counter & 0x0f;
        buf.put_u8(b3);

        Ok(())
    }
}

/// Decodes a 33-bit PTS/DTS from its 5-byte marker-bit layout.
pub fn decode_timestamp(data: &[u8; 5]) -> u64 {
    ((data[0] as u64 & 0x0E) << 29)
        | ((data[1] as u64) << 22)
        | ((data[2] as u64 & 0xFE) << 14)
        | ((data[3] as u64) << 7)
        | ((data[4] as u64 & 0xFE) >> 1)
}

/// Encodes a 33-bit PTS/DTS with the given 4-bit prefix (`0x20` PTS only,
/// `0x30` PTS followed by DTS, `0x10` DTS).
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    let ts = ts & 0x1FFFFFFFF; // 33 bits
    let middle = (((ts >> 14) & 0xFFFE) | 0x01) as u16;
    let low = (((ts << 1) & 0xFFFE) | 0x01) as u16;
    [
        prefix | ((ts >> 29) & 0x0E) as u8 | 0x01,
        (middle >> 8) as u8,
        middle as u8,
        (low >> 8) as u8,
        low as u8,
    ]
}

pub fn pts_to_seconds(pts: u64) -> f64 {
    pts as f64 / PTS_HZ as f64
}

pub fn pcr_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / PCR_HZ as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_decode_known_timestamp() {
        // PTS of 1 second with the PTS-only prefix
        let field = [0x21, 0x00, 0x05, 0xBF, 0x21];
        assert_eq!(decode_timestamp(&field), 90_000);
        assert_eq!(pts_to_seconds(decode_timestamp(&field)), 1.0);
        assert_eq!(encode_timestamp(0x20, 90_000), field);
    }

    #[quickcheck]
    fn prop_timestamp_round_trip(value: u64) -> bool {
        let value = value & 0x1_FFFF_FFFF;
        let field = encode_timestamp(0x20, value);
        decode_timestamp(&field) == value
            && pts_to_seconds(decode_timestamp(&field)) == value as f64 / 90000.0
    }

    #[test]
    fn test_stream_type_values() {
        for value in [0x02u8, 0x05, 0x06, 0x0F, 0x1B, 0x80, 0x81, 0x83, 0x85, 0x86, 0x8A, 0xEA, 0x24] {
            assert_eq!(StreamType::from(value).value(), value);
        }
        assert_eq!(StreamType::from(0x24), StreamType::Other(0x24));
        assert_eq!(StreamType::from(0x24).name(), "Unknown (0x24)");
        assert_eq!(StreamType::Lpcm.value(), 0x80);
        assert_eq!(StreamType::H264.to_string(), "H.264/AVC Video (0x1b)");
    }

    #[test]
    fn test_transport_framing() {
        assert_eq!(TransportType::Ts.packet_size(), 188);
        assert_eq!(TransportType::M2ts.packet_size(), 192);
        assert_eq!(TransportType::M2ts.sync_offset(), 4);
        assert_eq!(TransportType::Dvb.packet_size(), 204);
        assert_eq!(TransportType::Atsc.packet_size(), 208);
        assert_eq!(TransportType::Atsc.sync_offset(), 0);
    }

    #[test]
    fn test_header_write() {
        let header = TSHeader {
            payload_unit_start: true,
            pid: 0x101,
            adaptation_field_exists: true,
            continuity_counter: 0x1F,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0x47, 0x41, 0x01, 0x3F]);
    }
}
