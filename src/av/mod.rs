//! Media-level types shared by the demuxer and its host: what kind of
//! elementary stream a PID carries and the timestamped payloads it yields.

/// Video codecs the demuxer recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    Mpeg2,
    H264,
    Vc1,
}

/// Audio codecs the demuxer recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Ac3,
    Dts,
    TrueHd,
    DtsHd,
    DtsHdMaster,
    Aac,
    /// HDMV (Blu-ray) linear PCM
    Lpcm,
}

/// Classification of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video(VideoCodec),
    Audio(AudioCodec),
}

impl StreamKind {
    pub fn is_video(&self) -> bool {
        matches!(self, StreamKind::Video(_))
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, StreamKind::Audio(_))
    }
}

mod packet;
pub use packet::*;
