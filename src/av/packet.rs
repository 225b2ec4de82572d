use bytes::Bytes;

/// A completed access unit handed out by the demuxer.
///
/// Timestamps are in seconds, converted from the 90 kHz PES clock. When a
/// PES header carries no DTS the DTS equals the PTS; when it carries neither
/// both are zero.
#[derive(Debug, PartialEq)]
pub struct ParserPayload {
    pub data: Bytes,
    pub pts: f64,
    pub dts: f64,
    /// PID of the elementary stream this payload belongs to.
    pub stream_id: u16,
}

impl ParserPayload {
    pub fn new(data: impl Into<Bytes>, stream_id: u16) -> Self {
        Self {
            data: data.into(),
            pts: 0.0,
            dts: 0.0,
            stream_id,
        }
    }

    pub fn with_pts(mut self, pts: f64) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: f64) -> Self {
        self.dts = dts;
        self
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Consumes the payload, transferring ownership of its bytes to the caller.
    pub fn detach(self) -> Bytes {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_moves_buffer() {
        let payload = ParserPayload::new(vec![1u8, 2, 3], 0x101)
            .with_pts(1.5)
            .with_dts(1.25);
        assert_eq!(payload.size(), 3);
        assert_eq!(payload.stream_id, 0x101);

        let buffer = payload.data.as_ptr();
        let data = payload.detach();
        assert_eq!(&data[..], &[1, 2, 3]);
        assert_eq!(data.as_ptr(), buffer);
    }
}
