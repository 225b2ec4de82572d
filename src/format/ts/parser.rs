use super::types::*;
use crate::error::{DemuxError, Result};

/// Decoder for the fixed transport packet header and its adaptation field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TSPacketParser;

impl TSPacketParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses the 4-byte header at the start of `data` (which begins at the sync byte).
    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(DemuxError::InvalidData("TS packet too short".into()));
        }

        if data[0] != SYNC_BYTE {
            return Err(DemuxError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Parses the adaptation field starting at `offset` (its length byte).
    ///
    /// Returns `None` for a zero-length field, which carries no flags.
    pub fn parse_adaptation_field(
        &self,
        data: &[u8],
        offset: usize,
    ) -> Result<Option<AdaptationField>> {
        if data.len() <= offset {
            return Err(DemuxError::InvalidData("Adaptation field missing".into()));
        }

        let adaptation_field_length = data[offset] as usize;
        if adaptation_field_length == 0 {
            return Ok(None);
        }

        if data.len() < offset + adaptation_field_length + 1 {
            return Err(DemuxError::InvalidData("Adaptation field too short".into()));
        }

        let end = offset + 1 + adaptation_field_length;
        let flags = data[offset + 1];
        let mut field = AdaptationField {
            length: adaptation_field_length,
            discontinuity: (flags & 0x80) != 0,
            random_access: (flags & 0x40) != 0,
            es_priority: (flags & 0x20) != 0,
            pcr_flag: (flags & 0x10) != 0,
            opcr_flag: (flags & 0x08) != 0,
            splicing_point_flag: (flags & 0x04) != 0,
            private_data_flag: (flags & 0x02) != 0,
            extension_flag: (flags & 0x01) != 0,
            pcr: None,
        };

        // Fields past the PCR are not needed for demuxing
        if field.pcr_flag {
            let pos = offset + 2;
            if end < pos + 6 {
                return Err(DemuxError::InvalidData("PCR data too short".into()));
            }
            field.pcr = Some(parse_pcr(&data[pos..pos + 6]));
        }

        Ok(Some(field))
    }
}

/// Decodes a 6-byte PCR field: 33-bit base, 6 reserved bits, 9-bit extension.
fn parse_pcr(data: &[u8]) -> Pcr {
    let base = ((data[0] as u64) << 25)
        | ((data[1] as u64) << 17)
        | ((data[2] as u64) << 9)
        | ((data[3] as u64) << 1)
        | ((data[4] & 0x80) as u64 >> 7);
    let extension = (((data[4] & 0x01) as u16) << 8) | (data[5] as u16);
    Pcr { base, extension }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_ts_header() {
        let parser = TSPacketParser::new();
        let data = [
            0x47, // Sync byte
            0x41, // Payload unit start indicator set, PID high bits
            0x00, // PID low bits
            0x35, // Adaptation + payload, continuity counter 5
        ];

        let header = parser.parse_header(&data).unwrap();
        assert_eq!(header.sync_byte, 0x47);
        assert!(header.payload_unit_start);
        assert!(!header.transport_error);
        assert_eq!(header.pid, 0x100);
        assert!(header.adaptation_field_exists);
        assert!(header.contains_payload);
        assert_eq!(header.continuity_counter, 5);

        assert!(parser.parse_header(&[0x46, 0x00, 0x00, 0x10]).is_err());
        assert!(parser.parse_header(&[0x47, 0x00]).is_err());
    }

    #[test]
    fn test_parse_pcr() {
        let parser = TSPacketParser::new();
        // base = 0x1_0000_0001, extension = 0x155
        let packet = [
            0x47, 0x01, 0x00, 0x20, // header, adaptation only
            0x07, // adaptation field length
            0x90, // discontinuity + PCR flag
            0x80, 0x00, 0x00, 0x00, 0xFF, 0x55, // PCR
        ];

        let field = parser.parse_adaptation_field(&packet, 4).unwrap().unwrap();
        assert!(field.discontinuity);
        assert!(field.pcr_flag);
        let pcr = field.pcr.unwrap();
        assert_eq!(pcr.base, 0x1_0000_0001);
        assert_eq!(pcr.extension, 0x155);
        assert_eq!(pcr.value(), 0x1_0000_0001 * 300 + 0x155);
    }

    #[test]
    fn test_pcr_followed_by_opcr() {
        let parser = TSPacketParser::new();
        let packet = [
            0x47, 0x01, 0x00, 0x20, 0x0D, // adaptation only, 13 bytes
            0x18, // PCR + OPCR flags
            0x00, 0x00, 0x00, 0x01, 0x7E, 0x02, // PCR: base 2, extension 2
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // OPCR
        ];

        let field = parser.parse_adaptation_field(&packet, 4).unwrap().unwrap();
        assert!(field.opcr_flag);
        assert_eq!(field.pcr.unwrap().value(), 2 * 300 + 2);
    }

    #[test]
    fn test_adaptation_field_bounds() {
        let parser = TSPacketParser::new();
        let empty = [0x47, 0x01, 0x00, 0x30, 0x00];
        assert!(parser.parse_adaptation_field(&empty, 4).unwrap().is_none());

        // Claims a PCR but the field is only two bytes long
        let truncated = [0x47, 0x01, 0x00, 0x30, 0x01, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(parser.parse_adaptation_field(&truncated, 4).is_err());

        let overlong = [0x47, 0x01, 0x00, 0x30, 0x10, 0x00];
        assert!(parser.parse_adaptation_field(&overlong, 4).is_err());
    }
}
