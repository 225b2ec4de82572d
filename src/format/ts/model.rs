use super::clock::ProgramClock;
use super::types::StreamType;
use crate::av::StreamKind;
use std::collections::HashMap;

// Property keys published by stream probing.
pub const PROP_CHANNELS: &str = "channels";
pub const PROP_BIT_DEPTH: &str = "bit_depth";
pub const PROP_SAMPLE_RATE: &str = "sample_rate";
pub const PROP_FRAME_SIZE: &str = "frame_size";
pub const PROP_BITRATE: &str = "bitrate";
pub const PROP_FOURCC: &str = "fourcc";

/// Typed value stored in a stream's property bag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Char(char),
    Int32(i32),
    Float(f32),
}

impl PropertyValue {
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            PropertyValue::Int32(v) => Some(*v),
            _ => None,
        }
    }
}

/// One elementary stream of a program, identified by its PID.
#[derive(Debug, Clone)]
pub struct ElementaryStream {
    id: u16,
    pub element_type: StreamType,
    pub kind: StreamKind,
    /// ISO 639 language code, "und" when the PMT gives none.
    pub language: String,
    properties: HashMap<String, PropertyValue>,
}

impl ElementaryStream {
    pub fn new(id: u16, element_type: StreamType, kind: StreamKind) -> Self {
        Self {
            id,
            element_type,
            kind,
            language: String::from("und"),
            properties: HashMap::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn set_property(&mut self, key: &str, value: PropertyValue) {
        self.properties.insert(key.to_string(), value);
    }

    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.get(key).copied()
    }

    pub fn properties(&self) -> &HashMap<String, PropertyValue> {
        &self.properties
    }
}

/// A program: its elementary streams and the clock recovered from its PCR PID.
#[derive(Debug, Default)]
pub struct TSProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
    /// PID carrying this program's PCR, if the PMT named one.
    pub pcr_pid: Option<u16>,
    pub clock: ProgramClock,
    streams: Vec<ElementaryStream>,
}

impl TSProgram {
    pub fn new(program_number: u16, pmt_pid: u16) -> Self {
        Self {
            program_number,
            pmt_pid,
            ..Default::default()
        }
    }

    /// Adds a stream, replacing any existing stream with the same PID.
    pub fn add_stream(&mut self, stream: ElementaryStream) {
        match self.streams.iter_mut().find(|s| s.id == stream.id) {
            Some(existing) => *existing = stream,
            None => self.streams.push(stream),
        }
    }

    pub fn streams(&self) -> &[ElementaryStream] {
        &self.streams
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, pid: u16) -> Option<&ElementaryStream> {
        self.streams.iter().find(|s| s.id == pid)
    }

    pub fn stream_mut(&mut self, pid: u16) -> Option<&mut ElementaryStream> {
        self.streams.iter_mut().find(|s| s.id == pid)
    }
}

/// Root of the discovered entity graph: every program seen in a PAT.
#[derive(Debug, Default)]
pub struct TransportStream {
    pub transport_stream_id: u16,
    programs: Vec<TSProgram>,
}

impl TransportStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a program and returns its index.
    pub fn add_program(&mut self, program: TSProgram) -> usize {
        self.programs.push(program);
        self.programs.len() - 1
    }

    pub fn programs(&self) -> &[TSProgram] {
        &self.programs
    }

    pub fn program(&self, index: usize) -> Option<&TSProgram> {
        self.programs.get(index)
    }

    pub fn program_mut(&mut self, index: usize) -> Option<&mut TSProgram> {
        self.programs.get_mut(index)
    }

    pub fn last_program(&self) -> Option<&TSProgram> {
        self.programs.last()
    }

    pub fn last_program_mut(&mut self) -> Option<&mut TSProgram> {
        self.programs.last_mut()
    }

    /// Finds a stream by PID across all programs, most recent program first.
    pub fn stream(&self, pid: u16) -> Option<&ElementaryStream> {
        self.programs.iter().rev().find_map(|p| p.stream(pid))
    }

    pub fn stream_mut(&mut self, pid: u16) -> Option<&mut ElementaryStream> {
        self.programs.iter_mut().rev().find_map(|p| p.stream_mut(pid))
    }

    pub fn clear(&mut self) {
        self.programs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{AudioCodec, VideoCodec};

    #[test]
    fn test_add_stream_replaces_same_pid() {
        let mut program = TSProgram::new(1, 0x100);
        program.add_stream(ElementaryStream::new(
            0x101,
            StreamType::Mpeg2Video,
            StreamKind::Video(VideoCodec::Mpeg2),
        ));
        program.add_stream(ElementaryStream::new(
            0x101,
            StreamType::H264,
            StreamKind::Video(VideoCodec::H264),
        ));
        assert_eq!(program.stream_count(), 1);
        assert_eq!(program.stream(0x101).unwrap().element_type, StreamType::H264);
    }

    #[test]
    fn test_lookup_across_programs() {
        let mut ts = TransportStream::new();
        let first = ts.add_program(TSProgram::new(1, 0x100));
        let second = ts.add_program(TSProgram::new(2, 0x200));
        assert_eq!((first, second), (0, 1));

        let mut audio = ElementaryStream::new(
            0x201,
            StreamType::Ac3,
            StreamKind::Audio(AudioCodec::Ac3),
        );
        audio.set_property(PROP_CHANNELS, PropertyValue::Int32(6));
        ts.program_mut(second).unwrap().add_stream(audio);

        let stream = ts.stream(0x201).unwrap();
        assert_eq!(stream.property(PROP_CHANNELS).and_then(|v| v.as_i32()), Some(6));
        assert_eq!(stream.language, "und");
        assert!(ts.stream(0x101).is_none());
        assert_eq!(ts.last_program().unwrap().program_number, 2);
    }
}
