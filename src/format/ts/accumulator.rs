use bytes::Bytes;

/// Default starting capacity of an unbounded payload.
pub const UNBOUNDED_INITIAL_CAPACITY: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Bounded(usize),
    Unbounded,
}

/// Collects the fragments of one payload until it is complete.
///
/// A bounded payload completes when its declared length has been filled.
/// An unbounded payload never completes by itself; its owner finishes it
/// when the next payload starts. After [`detach`](Self::detach) the
/// accumulator keeps a fresh buffer of the same capacity so the next payload
/// of similar size needs no regrowth.
#[derive(Debug)]
pub struct PayloadAccumulator {
    buffer: Vec<u8>,
    capacity: usize,
    mode: Mode,
    initial_capacity: usize,
}

impl Default for PayloadAccumulator {
    fn default() -> Self {
        Self::new(UNBOUNDED_INITIAL_CAPACITY)
    }
}

impl PayloadAccumulator {
    /// `initial_capacity` is the starting size used by unbounded payloads.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            capacity: 0,
            mode: Mode::Idle,
            initial_capacity: initial_capacity.max(1),
        }
    }

    /// Starts a payload of exactly `len` bytes.
    pub fn start_payload(&mut self, len: usize) {
        self.buffer.clear();
        if self.capacity < len {
            self.buffer.reserve_exact(len);
            self.capacity = len;
        }
        self.mode = Mode::Bounded(len);
    }

    /// Starts a payload whose length is unknown until the next one begins.
    pub fn start_payload_unbounded(&mut self) {
        self.buffer.clear();
        if self.capacity < self.initial_capacity {
            self.buffer.reserve_exact(self.initial_capacity);
            self.capacity = self.initial_capacity;
        }
        self.mode = Mode::Unbounded;
    }

    /// Appends bytes from `data`, returning how many were consumed and
    /// whether a bounded payload is now complete.
    ///
    /// A bounded payload takes at most what it still needs; the caller keeps
    /// the rest. Unbounded payloads take everything and never report completion.
    pub fn add_data(&mut self, data: &[u8]) -> (usize, bool) {
        match self.mode {
            Mode::Idle => (0, false),
            Mode::Bounded(len) => {
                let take = data.len().min(len - self.buffer.len());
                self.buffer.extend_from_slice(&data[..take]);
                (take, self.buffer.len() == len)
            }
            Mode::Unbounded => {
                let needed = self.buffer.len() + data.len();
                if needed > self.capacity {
                    let mut capacity = self.capacity.max(self.initial_capacity);
                    while capacity < needed {
                        capacity *= 2;
                    }
                    self.buffer.reserve_exact(capacity - self.buffer.len());
                    self.capacity = capacity;
                }
                self.buffer.extend_from_slice(data);
                (data.len(), false)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode != Mode::Idle
    }

    pub fn is_unbounded(&self) -> bool {
        self.mode == Mode::Unbounded
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.mode, Mode::Bounded(len) if self.buffer.len() == len)
    }

    /// Bytes collected so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current buffer capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hands the collected bytes to the caller and re-arms with a fresh buffer
    /// of the same capacity.
    pub fn detach(&mut self) -> Bytes {
        let buffer = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity));
        self.mode = Mode::Idle;
        Bytes::from(buffer)
    }

    /// Drops the collected bytes without handing them out.
    pub fn discard(&mut self) {
        self.buffer.clear();
        self.mode = Mode::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_bounded_leaves_excess() {
        let mut acc = PayloadAccumulator::default();
        acc.start_payload(5);
        assert_eq!(acc.add_data(&[1, 2, 3]), (3, false));
        assert_eq!(acc.add_data(&[4, 5, 6, 7]), (2, true));
        assert!(acc.is_complete());
        assert_eq!(&acc.detach()[..], &[1, 2, 3, 4, 5]);
        assert!(!acc.is_active());
        assert_eq!(acc.capacity(), 5);
    }

    #[test]
    fn test_idle_consumes_nothing() {
        let mut acc = PayloadAccumulator::default();
        assert_eq!(acc.add_data(&[1, 2, 3]), (0, false));
    }

    #[test]
    fn test_unbounded_growth_doubles() {
        let mut acc = PayloadAccumulator::default();
        acc.start_payload_unbounded();
        assert_eq!(acc.capacity(), 131072);

        let chunk = vec![0xAA; 100_000];
        assert_eq!(acc.add_data(&chunk), (100_000, false));
        assert_eq!(acc.capacity(), 131072);
        acc.add_data(&chunk);
        assert_eq!(acc.capacity(), 262144);
        acc.add_data(&chunk);
        acc.add_data(&chunk);
        assert_eq!(acc.len(), 400_000);
        assert_eq!(acc.capacity(), 524288);

        let data = acc.detach();
        assert_eq!(data.len(), 400_000);
        assert_eq!(acc.capacity(), 524288);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_discard_resets() {
        let mut acc = PayloadAccumulator::new(16);
        acc.start_payload_unbounded();
        acc.add_data(&[1; 40]);
        assert_eq!(acc.capacity(), 64);
        acc.discard();
        assert!(!acc.is_active());
        assert!(acc.is_empty());
    }

    #[quickcheck]
    fn prop_bounded_completes_exactly_once(len: u16, chunks: Vec<u8>) -> bool {
        let len = len as usize % 4096 + 1;
        let mut acc = PayloadAccumulator::default();
        acc.start_payload(len);

        let mut supplied = 0usize;
        let mut completions = 0;
        let sizes = chunks.iter().map(|&c| c as usize + 1).chain(std::iter::repeat(len));
        for size in sizes {
            let data = vec![0u8; size];
            let (used, done) = acc.add_data(&data);
            let before = supplied;
            supplied += used;
            if done {
                completions += 1;
                // completes on the call that first reaches len, leftover stays with the caller
                if before >= len || before + size < len || used != len - before {
                    return false;
                }
                break;
            } else if used != size {
                return false;
            }
        }
        completions == 1 && supplied == len
    }

    #[quickcheck]
    fn prop_unbounded_round_trip(chunks: Vec<Vec<u8>>) -> bool {
        let mut acc = PayloadAccumulator::new(8);
        acc.start_payload_unbounded();

        let mut expected = Vec::new();
        for chunk in &chunks {
            let (used, done) = acc.add_data(chunk);
            if used != chunk.len() || done {
                return false;
            }
            expected.extend_from_slice(chunk);
        }

        let mut capacity = 8;
        while capacity < expected.len() {
            capacity *= 2;
        }
        acc.capacity() == capacity && acc.detach()[..] == expected[..]
    }
}
