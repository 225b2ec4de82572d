use crate::error::{DemuxError, Result};

/// A bit-level reader over a byte slice, used to decode PSI table fields.
///
/// Bits are consumed most-significant first. Every read is bounds checked:
/// running off the end of the buffer yields [`DemuxError::InvalidData`].
///
/// Example:
/// ```
/// use tsdemux::utils::BitReader;
///
/// let data = [0b1011_0011, 0xE1, 0x00];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);
/// assert_eq!(reader.read_u8(3).unwrap(), 0b011);
/// reader.skip_bits(7).unwrap();
/// assert_eq!(reader.read_u16(13).unwrap(), 0x0100);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a new BitReader from a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_offset >= self.data.len() {
            return Err(DemuxError::InvalidData("Reached end of data".into()));
        }

        let bit = (self.data[self.byte_offset] >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;

        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads n bits (n <= 64) and returns them as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u64> {
        if n > 64 {
            return Err(DemuxError::InvalidData("Too many bits requested".into()));
        }
        if n as usize > self.available_bits() {
            return Err(DemuxError::InvalidData("Reached end of data".into()));
        }

        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }

        Ok(value)
    }

    /// Reads up to 8 bits.
    pub fn read_u8(&mut self, n: u32) -> Result<u8> {
        Self::narrow(n, 8).and_then(|n| self.read_bits(n)).map(|v| v as u8)
    }

    /// Reads up to 16 bits.
    pub fn read_u16(&mut self, n: u32) -> Result<u16> {
        Self::narrow(n, 16).and_then(|n| self.read_bits(n)).map(|v| v as u16)
    }

    /// Reads up to 32 bits.
    pub fn read_u32(&mut self, n: u32) -> Result<u32> {
        Self::narrow(n, 32).and_then(|n| self.read_bits(n)).map(|v| v as u32)
    }

    /// Reads up to 64 bits.
    pub fn read_u64(&mut self, n: u32) -> Result<u64> {
        self.read_bits(n)
    }

    fn narrow(n: u32, width: u32) -> Result<u32> {
        if n > width {
            return Err(DemuxError::InvalidData(format!(
                "{} bits do not fit a {}-bit value",
                n, width
            )));
        }
        Ok(n)
    }

    /// Skips n bits in the stream.
    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if n > self.available_bits() {
            return Err(DemuxError::InvalidData("Skip past end of data".into()));
        }
        let bits = self.bit_offset as usize + n;
        self.byte_offset += bits / 8;
        self.bit_offset = (bits % 8) as u8;
        Ok(())
    }

    /// Skips whole bytes; the reader must be byte aligned.
    pub fn skip_bytes(&mut self, n: usize) -> Result<()> {
        self.skip_bits(n * 8)
    }

    /// Aligns reader to next byte boundary by skipping remaining bits in current byte.
    pub fn align_byte(&mut self) {
        if self.bit_offset != 0 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
    }

    /// Returns number of bits available to read.
    pub fn available_bits(&self) -> usize {
        (self.data.len() - self.byte_offset) * 8 - self.bit_offset as usize
    }

    /// Returns the number of whole bytes left, counting from the next byte boundary.
    pub fn bytes_left(&self) -> usize {
        let consumed = self.byte_offset + usize::from(self.bit_offset != 0);
        self.data.len().saturating_sub(consumed)
    }

    /// Returns the unread bytes, starting at the next byte boundary.
    ///
    /// Used to hand descriptor bodies to sub-parsers.
    pub fn remaining(&self) -> &'a [u8] {
        let start = (self.byte_offset + usize::from(self.bit_offset != 0)).min(self.data.len());
        &self.data[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_read_bits() {
        // Simple pattern within a byte
        let data = [0b10110011];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_u8(3).unwrap(), 0b101);
        assert_eq!(reader.read_u8(5).unwrap(), 0b10011);

        // Cross-byte boundary
        let data = [0b10110011, 0b01011010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_u8(3).unwrap(), 0b101);
        assert_eq!(reader.read_u8(8).unwrap(), 0b10011010);

        // Reading zero bits
        let data = [0b10101010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_u8(0).unwrap(), 0);

        // Width overflow
        let data = [0xFF, 0xFF, 0xFF];
        let mut reader = BitReader::new(&data);
        assert!(reader.read_u8(9).is_err());
        assert!(reader.read_u16(17).is_err());

        // Cross multiple byte boundaries
        let data = [0b10110011, 0b11001100, 0b10101010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_u32(20).unwrap(), 0b10110011110011001010);
    }

    #[test]
    fn test_pmt_entry_fields() {
        // stream_type, reserved(3) + PID(13), reserved(4) + ES_info_length(12)
        let data = [0x1B, 0xE1, 0x01, 0xF0, 0x06];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_u8(8).unwrap(), 0x1B);
        reader.skip_bits(3).unwrap();
        assert_eq!(reader.read_u16(13).unwrap(), 0x101);
        reader.skip_bits(4).unwrap();
        assert_eq!(reader.read_u16(12).unwrap(), 6);
        assert_eq!(reader.bytes_left(), 0);
    }

    #[test]
    fn test_remaining_and_bytes_left() {
        let data = [0x05, 0x04, b'H', b'D', b'M', b'V'];
        let mut reader = BitReader::new(&data);
        reader.skip_bytes(2).unwrap();
        assert_eq!(reader.bytes_left(), 4);
        assert_eq!(reader.remaining(), b"HDMV");

        reader.skip_bits(1).unwrap();
        assert_eq!(reader.bytes_left(), 3);
        assert_eq!(reader.remaining(), b"DMV");
    }

    #[test]
    fn test_error_cases() {
        // Reading past end of data
        let data = [0xFF];
        let mut reader = BitReader::new(&data);
        reader.read_u8(8).unwrap();
        assert!(reader.read_bit().is_err());

        // A failed multi-bit read consumes nothing
        let data = [0xAB];
        let mut reader = BitReader::new(&data);
        assert!(reader.read_u16(12).is_err());
        assert_eq!(reader.read_u8(8).unwrap(), 0xAB);

        assert!(BitReader::new(&data).skip_bits(9).is_err());

        // Byte alignment
        let data = [0xFF, 0x00];
        let mut reader = BitReader::new(&data);
        reader.read_u8(3).unwrap();
        assert_eq!(reader.bit_offset, 3);
        reader.align_byte();
        assert_eq!(reader.bit_offset, 0);
        assert_eq!(reader.byte_offset, 1);
    }

    #[quickcheck]
    fn prop_read_bits_matches_manual(data: Vec<u8>, n: u8) -> bool {
        let n = (n % 65) as usize;
        let mut reader = BitReader::new(&data);

        match reader.read_u64(n as u32) {
            Ok(result) => {
                let mut expected = 0u64;
                for i in 0..n {
                    let bit = (data[i / 8] >> (7 - (i % 8))) & 1;
                    expected = (expected << 1) | bit as u64;
                }
                result == expected
            }
            Err(_) => n > data.len() * 8,
        }
    }
}
