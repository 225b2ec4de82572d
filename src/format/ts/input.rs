use std::io::{self, Read, Seek, SeekFrom};

/// Byte source the demuxer pulls transport packets from.
///
/// Every `Read + Seek` type (files, `Cursor`s) is an input stream. Pipes and
/// sockets can be wrapped in [`Sequential`], which disables duration probing
/// and seeking.
pub trait InputStream {
    /// Reads up to `buf.len()` bytes; 0 means end of input.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Total length in bytes, if known.
    fn length(&mut self) -> Option<u64>;

    /// Current read offset.
    fn position(&mut self) -> u64;

    fn is_eof(&mut self) -> bool;

    fn is_seekable(&self) -> bool;
}

impl<T: Read + Seek> InputStream for T {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn length(&mut self) -> Option<u64> {
        let position = self.stream_position().ok()?;
        let end = Seek::seek(self, SeekFrom::End(0)).ok()?;
        Seek::seek(self, SeekFrom::Start(position)).ok()?;
        Some(end)
    }

    fn position(&mut self) -> u64 {
        self.stream_position().unwrap_or(0)
    }

    fn is_eof(&mut self) -> bool {
        let position = InputStream::position(self);
        InputStream::length(self).is_some_and(|length| position >= length)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Forward-only input over any reader.
#[derive(Debug)]
pub struct Sequential<R> {
    inner: R,
    position: u64,
    eof: bool,
}

impl<R: Read> Sequential<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            position: 0,
            eof: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> InputStream for Sequential<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof = true;
        }
        self.position += n as u64;
        Ok(n)
    }

    /// Only reports the current offset; any actual move fails.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            SeekFrom::Start(offset) if offset == self.position => Ok(self.position),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "sequential input cannot seek",
            )),
        }
    }

    fn length(&mut self) -> Option<u64> {
        None
    }

    fn position(&mut self) -> u64 {
        self.position
    }

    fn is_eof(&mut self) -> bool {
        self.eof
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn test_cursor_is_input_stream() {
        let mut input = Cursor::new(vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(InputStream::read(&mut input, &mut buf).unwrap(), 2);
        assert_eq!(InputStream::length(&mut input), Some(5));
        assert_eq!(InputStream::position(&mut input), 2);
        assert!(!input.is_eof());

        InputStream::seek(&mut input, SeekFrom::End(0)).unwrap();
        assert!(input.is_eof());
        assert!(InputStream::is_seekable(&input));
    }

    #[test]
    fn test_sequential_refuses_to_seek() {
        let mut input = Sequential::new(&[1u8, 2, 3][..]);
        let mut buf = [0u8; 8];
        assert_eq!(input.read(&mut buf).unwrap(), 3);
        assert_eq!(input.seek(SeekFrom::Current(0)).unwrap(), 3);
        assert!(input.seek(SeekFrom::Start(0)).is_err());
        assert_eq!(input.length(), None);
        assert!(!input.is_seekable());

        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert!(input.is_eof());
    }
}
