#![allow(dead_code)]

use bytes::BytesMut;
use std::collections::HashMap;
use tsdemux::format::ts::types::{encode_timestamp, Pcr};
use tsdemux::format::ts::{TSHeader, TransportType, TS_PACKET_SIZE};
use tsdemux::utils::Crc32Mpeg2;

pub const PMT_PID: u16 = 0x100;
pub const VIDEO_PID: u16 = 0x101;
pub const AUDIO_PID: u16 = 0x102;

const PAYLOAD_SIZE: usize = TS_PACKET_SIZE - 4;

/// One PMT stream entry: stream type, PID and raw descriptor loop.
pub struct EsEntry {
    pub stream_type: u8,
    pub pid: u16,
    pub descriptors: Vec<u8>,
}

impl EsEntry {
    pub fn new(stream_type: u8, pid: u16) -> Self {
        Self {
            stream_type,
            pid,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, tag: u8, data: &[u8]) -> Self {
        self.descriptors.push(tag);
        self.descriptors.push(data.len() as u8);
        self.descriptors.extend_from_slice(data);
        self
    }
}

/// Builds synthetic transport streams packet by packet.
pub struct StreamBuilder {
    transport_type: TransportType,
    data: Vec<u8>,
    counters: HashMap<u16, u8>,
    packets: usize,
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self::with_type(TransportType::Ts)
    }

    pub fn with_type(transport_type: TransportType) -> Self {
        Self {
            transport_type,
            data: Vec::new(),
            counters: HashMap::new(),
            packets: 0,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Writes one packet and returns how many payload bytes it carried. The
    /// adaptation field pads short payloads and carries `pcr` when given.
    pub fn packet(&mut self, pid: u16, start: bool, pcr: Option<u64>, payload: &[u8]) -> usize {
        let reserved = if pcr.is_some() { 8 } else { 0 };
        let take = payload.len().min(PAYLOAD_SIZE - reserved);
        let adaptation = PAYLOAD_SIZE - take;

        let counter = self.counters.entry(pid).or_insert(0);
        let header = TSHeader {
            pid,
            payload_unit_start: start,
            adaptation_field_exists: adaptation > 0,
            contains_payload: take > 0,
            continuity_counter: *counter,
            ..Default::default()
        };
        if take > 0 {
            *counter = (*counter + 1) & 0x0F;
        }

        if self.transport_type == TransportType::M2ts {
            self.data
                .extend_from_slice(&(self.packets as u32 * 1000).to_be_bytes());
        }
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        header.write_to(&mut buf).unwrap();
        self.data.extend_from_slice(&buf);

        if adaptation > 0 {
            self.data.push((adaptation - 1) as u8);
            if adaptation > 1 {
                self.data.push(if pcr.is_some() { 0x10 } else { 0x00 });
                if let Some(value) = pcr {
                    self.data.extend_from_slice(&pcr_bytes(value));
                }
                let stuffing = adaptation - 2 - if pcr.is_some() { 6 } else { 0 };
                self.data.extend(std::iter::repeat(0xFF).take(stuffing));
            }
        }
        self.data.extend_from_slice(&payload[..take]);

        let tail = self.transport_type.packet_size() - TS_PACKET_SIZE - self.transport_type.sync_offset();
        self.data.extend(std::iter::repeat(0x00).take(tail));
        self.packets += 1;
        take
    }

    /// Writes a full-payload packet of `fill` bytes carrying the given error and
    /// scrambling bits. The continuity counter of `pid` is left untouched.
    pub fn flagged(&mut self, pid: u16, transport_error: bool, scrambling_control: u8, fill: u8) -> &mut Self {
        let header = TSHeader {
            pid,
            transport_error,
            scrambling_control,
            continuity_counter: self.counters.get(&pid).copied().unwrap_or(0),
            ..Default::default()
        };

        if self.transport_type == TransportType::M2ts {
            self.data
                .extend_from_slice(&(self.packets as u32 * 1000).to_be_bytes());
        }
        let mut buf = BytesMut::with_capacity(TS_PACKET_SIZE);
        header.write_to(&mut buf).unwrap();
        self.data.extend_from_slice(&buf);
        self.data.extend(std::iter::repeat(fill).take(PAYLOAD_SIZE));

        let tail = self.transport_type.packet_size() - TS_PACKET_SIZE - self.transport_type.sync_offset();
        self.data.extend(std::iter::repeat(0x00).take(tail));
        self.packets += 1;
        self
    }

    /// Splits `payload` over as many packets as needed, the first one starting a unit.
    pub fn unit(&mut self, pid: u16, payload: &[u8]) -> &mut Self {
        let mut pos = 0;
        let mut start = true;
        while start || pos < payload.len() {
            pos += self.packet(pid, start, None, &payload[pos..]);
            start = false;
        }
        self
    }

    pub fn section(&mut self, pid: u16, section: &[u8]) -> &mut Self {
        let mut payload = vec![0x00];
        payload.extend_from_slice(section);
        self.unit(pid, &payload)
    }

    pub fn pat(&mut self, version: u8, programs: &[(u16, u16)]) -> &mut Self {
        let section = pat_section(version, programs);
        self.section(0x0000, &section)
    }

    pub fn pmt(&mut self, pid: u16, version: u8, pcr_pid: u16, entries: &[EsEntry]) -> &mut Self {
        let section = pmt_section(version, pcr_pid, entries);
        self.section(pid, &section)
    }

    /// Bounded PES packet with an optional PTS.
    pub fn pes(&mut self, pid: u16, stream_id: u8, pts: Option<u64>, payload: &[u8]) -> &mut Self {
        let data = pes_bytes(stream_id, pts, payload, true);
        self.unit(pid, &data)
    }

    pub fn pcr(&mut self, pid: u16, value: u64) -> &mut Self {
        self.packet(pid, false, Some(value), &[]);
        self
    }

    pub fn null(&mut self) -> &mut Self {
        self.packet(0x1FFF, false, None, &[0xFF; PAYLOAD_SIZE]);
        self
    }

    /// Default single program: PAT for program 1 and a PMT with one MPEG-2 video stream.
    pub fn video_program(&mut self) -> &mut Self {
        self.pat(0, &[(1, PMT_PID)])
            .pmt(PMT_PID, 0, VIDEO_PID, &[EsEntry::new(0x02, VIDEO_PID)])
    }
}

pub fn pcr_bytes(value: u64) -> [u8; 6] {
    let pcr = Pcr::from_value(value);
    [
        (pcr.base >> 25) as u8,
        (pcr.base >> 17) as u8,
        (pcr.base >> 9) as u8,
        (pcr.base >> 1) as u8,
        ((pcr.base & 1) << 7) as u8 | 0x7E | (pcr.extension >> 8) as u8,
        pcr.extension as u8,
    ]
}

fn long_section(table_id: u8, extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let length = 5 + body.len() + 4;
    let mut out = vec![
        table_id,
        0xB0 | (length >> 8) as u8,
        length as u8,
        (extension >> 8) as u8,
        extension as u8,
        0xC1 | (version << 1),
        0x00,
        0x00,
    ];
    out.extend_from_slice(body);
    let crc = Crc32Mpeg2::new().calculate(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

pub fn pat_section(version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(number, pid) in programs {
        body.extend_from_slice(&number.to_be_bytes());
        body.extend_from_slice(&[0xE0 | (pid >> 8) as u8, pid as u8]);
    }
    long_section(0x00, 1, version, &body)
}

pub fn pmt_section(version: u8, pcr_pid: u16, entries: &[EsEntry]) -> Vec<u8> {
    let mut body = vec![0xE0 | (pcr_pid >> 8) as u8, pcr_pid as u8, 0xF0, 0x00];
    for entry in entries {
        body.extend_from_slice(&[
            entry.stream_type,
            0xE0 | (entry.pid >> 8) as u8,
            entry.pid as u8,
            0xF0 | (entry.descriptors.len() >> 8) as u8,
            entry.descriptors.len() as u8,
        ]);
        body.extend_from_slice(&entry.descriptors);
    }
    long_section(0x02, 1, version, &body)
}

pub fn pes_bytes(stream_id: u8, pts: Option<u64>, payload: &[u8], bounded: bool) -> Vec<u8> {
    let optional: Vec<u8> = pts
        .map(|pts| encode_timestamp(0x20, pts).to_vec())
        .unwrap_or_default();
    let flags = if pts.is_some() { 0x80 } else { 0x00 };
    let length = if bounded { 3 + optional.len() + payload.len() } else { 0 };

    let mut out = vec![0x00, 0x00, 0x01, stream_id];
    out.extend_from_slice(&(length as u16).to_be_bytes());
    out.extend_from_slice(&[0x80, flags, optional.len() as u8]);
    out.extend_from_slice(&optional);
    out.extend_from_slice(payload);
    out
}

/// Payload bytes that are easy to tell apart.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}
