use crate::av::ParserPayload;
use crate::Result;

pub mod ts;

/// Common trait for format demuxers, the seam a host player pulls media through.
pub trait Demuxer {
    /// Next payload in input order, `None` at end of stream.
    fn read_payload(&mut self) -> Option<ParserPayload>;

    /// Total duration in seconds, 0 when unknown.
    fn total_time(&self) -> f64;

    /// Seeks near `target` seconds and returns the time actually reached.
    fn seek_time(&mut self, target: f64) -> Result<f64>;
}

impl<R: ts::InputStream> Demuxer for ts::TSDemuxer<R> {
    fn read_payload(&mut self) -> Option<ParserPayload> {
        self.get_payload()
    }

    fn total_time(&self) -> f64 {
        ts::TSDemuxer::total_time(self)
    }

    fn seek_time(&mut self, target: f64) -> Result<f64> {
        ts::TSDemuxer::seek_time(self, target)
    }
}

pub use self::ts::TSDemuxer;
