use super::types::{pcr_to_seconds, Pcr, PCR_HZ};

/// Reference clock recovered from the PCRs of one program.
///
/// Every PCR-bearing packet on the program's PCR PID feeds
/// [`add_reference`](Self::add_reference) with the byte position of the
/// packet and its 27 MHz clock value. Elapsed time is measured from the first
/// reference; the transport bitrate is estimated from the last pair of
/// references.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramClock {
    last_reference_position: u64,
    last_reference_value: u64,
    first_reference_value: u64,
    last_delta_position: u64,
    last_delta: u64,
    last_bitrate: f64,
    valid: bool,
}

impl ProgramClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a PCR seen at byte `position`.
    ///
    /// Returns false when the clock went backwards, i.e. a discontinuity;
    /// the reference is still taken so later deltas are measured from it.
    pub fn add_reference(&mut self, position: u64, pcr: Pcr) -> bool {
        let value = pcr.value();
        if !self.valid {
            self.first_reference_value = value;
            self.last_reference_position = position;
            self.last_reference_value = value;
            self.valid = true;
            return true;
        }

        let monotonic = value >= self.last_reference_value;
        if monotonic && position > self.last_reference_position {
            self.last_delta_position = position - self.last_reference_position;
            self.last_delta = value - self.last_reference_value;
            if self.last_delta > 0 {
                self.last_bitrate = (self.last_delta_position * 8) as f64 * PCR_HZ as f64
                    / self.last_delta as f64;
            }
        }

        self.last_reference_position = position;
        self.last_reference_value = value;
        monotonic
    }

    /// Moves the clock to a new reference without touching the bitrate
    /// estimate or the first reference; used after a seek.
    pub fn reposition(&mut self, position: u64, pcr: Pcr) {
        if !self.valid {
            self.add_reference(position, pcr);
            return;
        }
        self.last_reference_position = position;
        self.last_reference_value = pcr.value();
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Seconds between the first and the last reference.
    pub fn elapsed_time(&self) -> f64 {
        if !self.valid {
            return 0.0;
        }
        self.elapsed_at(self.last_reference_value)
    }

    /// Seconds between the first reference and a clock value.
    pub fn elapsed_at(&self, value: u64) -> f64 {
        if !self.valid {
            return 0.0;
        }
        pcr_to_seconds(value.saturating_sub(self.first_reference_value))
    }

    /// Transport bitrate in bits per second estimated from the last two references.
    pub fn bitrate(&self) -> f64 {
        self.last_bitrate
    }

    pub fn last_reference_position(&self) -> u64 {
        self.last_reference_position
    }

    pub fn last_reference_value(&self) -> u64 {
        self.last_reference_value
    }

    pub fn first_reference_value(&self) -> u64 {
        self.first_reference_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn pcr(value: u64) -> Pcr {
        Pcr {
            base: value / 300,
            extension: (value % 300) as u16,
        }
    }

    #[test]
    fn test_first_reference() {
        let mut clock = ProgramClock::new();
        assert!(!clock.is_valid());
        assert_eq!(clock.elapsed_time(), 0.0);

        assert!(clock.add_reference(0, pcr(27_000_000)));
        assert!(clock.is_valid());
        assert_eq!(clock.elapsed_time(), 0.0);
        assert_eq!(clock.first_reference_value(), 27_000_000);
    }

    #[test]
    fn test_bitrate_estimate() {
        let mut clock = ProgramClock::new();
        clock.add_reference(0, pcr(0));
        // 188 * 1000 bytes in one second
        clock.add_reference(188_000, pcr(27_000_000));
        assert_eq!(clock.bitrate(), 1_504_000.0);
        assert_eq!(clock.elapsed_time(), 1.0);
    }

    #[test]
    fn test_discontinuity_detected() {
        let mut clock = ProgramClock::new();
        clock.add_reference(0, pcr(54_000_000));
        assert!(clock.add_reference(1000, pcr(81_000_000)));
        assert!(!clock.add_reference(2000, pcr(100)));
        assert_eq!(clock.last_reference_value(), 100);
        assert_eq!(clock.elapsed_time(), 0.0);
    }

    #[test]
    fn test_reposition_keeps_origin() {
        let mut clock = ProgramClock::new();
        clock.add_reference(0, pcr(27_000_000));
        clock.reposition(94_000, pcr(27_000_000 * 6));
        assert_eq!(clock.elapsed_time(), 5.0);
        assert_eq!(clock.last_reference_position(), 94_000);
        assert_eq!(clock.bitrate(), 0.0);
    }

    #[quickcheck]
    fn prop_elapsed_monotonic(steps: Vec<(u16, u32)>) -> bool {
        let mut clock = ProgramClock::new();
        let mut position = 0u64;
        let mut value = 1_000u64;
        let first = value;
        clock.add_reference(position, pcr(value));

        let mut previous = clock.elapsed_time();
        for (dp, dv) in steps {
            position += dp as u64 + 1;
            value += dv as u64 + 1;
            clock.add_reference(position, pcr(value));
            let elapsed = clock.elapsed_time();
            if elapsed < previous || elapsed != (value - first) as f64 / 27_000_000.0 {
                return false;
            }
            previous = elapsed;
        }
        true
    }
}
