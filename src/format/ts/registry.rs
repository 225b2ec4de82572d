use super::model::TransportStream;
use super::types::{PID_COUNT, PID_MAX};
use crate::av::ParserPayload;
use crate::config::DemuxConfig;
use std::collections::VecDeque;

/// Everything a filter may touch while it handles one packet payload.
pub struct FilterContext<'a> {
    /// PID the payload arrived on.
    pub pid: u16,
    /// Registry the filter may register further filters and clocks in. The
    /// filter being driven is detached from its slot for the duration of the call.
    pub registry: &'a mut FilterRegistry,
    pub transport_stream: &'a mut TransportStream,
    /// Completed payloads, drained by the demuxer.
    pub payloads: &'a mut VecDeque<ParserPayload>,
    pub config: &'a DemuxConfig,
}

impl FilterContext<'_> {
    pub fn log_target(&self) -> &str {
        &self.config.log_target
    }
}

/// Consumer of the payload bytes of every packet on one PID.
pub trait Filter {
    /// Handles the payload of one packet and returns the number of bytes consumed.
    fn add(&mut self, data: &[u8], payload_unit_start: bool, ctx: &mut FilterContext<'_>)
        -> usize;

    /// Drops any partially accumulated state, e.g. after a seek.
    fn flush(&mut self) {}

    /// Called once the input is exhausted, to hand out anything still open.
    fn finish(&mut self, _ctx: &mut FilterContext<'_>) {}

    /// True for filters that carry elementary stream data.
    fn is_stream_filter(&self) -> bool {
        false
    }
}

/// PID-indexed table of active filters and of the program clocks fed by PCR PIDs.
///
/// Clocks are owned by their program; the registry only stores the index of
/// the program in the [`TransportStream`].
pub struct FilterRegistry {
    filters: Vec<Option<Box<dyn Filter>>>,
    clocks: Vec<Option<usize>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn valid_pid(pid: u16) -> bool {
    pid & 0xE000 == 0
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self {
            filters: std::iter::repeat_with(|| None).take(PID_COUNT).collect(),
            clocks: vec![None; PID_COUNT],
        }
    }

    /// Installs `filter` on `pid`. An occupied slot is only overwritten when
    /// `replace` is set; otherwise the call fails and `filter` is dropped.
    pub fn register_filter(&mut self, pid: u16, filter: Box<dyn Filter>, replace: bool) -> bool {
        if !valid_pid(pid) {
            return false;
        }
        let slot = &mut self.filters[pid as usize];
        if slot.is_some() && !replace {
            return false;
        }
        *slot = Some(filter);
        true
    }

    /// Removes the filter on `pid` and hands it back; dropping it disposes of it.
    pub fn unregister_filter(&mut self, pid: u16) -> Option<Box<dyn Filter>> {
        if !valid_pid(pid) {
            return None;
        }
        self.filters[pid as usize].take()
    }

    pub fn unregister_all(&mut self) {
        self.filters.iter_mut().for_each(|slot| *slot = None);
        self.clocks.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn get_filter(&mut self, pid: u16) -> Option<&mut (dyn Filter + 'static)> {
        if !valid_pid(pid) {
            return None;
        }
        self.filters[pid as usize].as_deref_mut()
    }

    pub fn has_filter(&self, pid: u16) -> bool {
        valid_pid(pid) && self.filters[pid as usize].is_some()
    }

    /// Puts a filter taken with [`unregister_filter`](Self::unregister_filter)
    /// back, unless something else was registered on the PID meanwhile.
    pub(crate) fn restore_filter(&mut self, pid: u16, filter: Box<dyn Filter>) {
        if valid_pid(pid) && self.filters[pid as usize].is_none() {
            self.filters[pid as usize] = Some(filter);
        }
    }

    /// Routes PCRs seen on `pid` to the clock of program `program_index`.
    pub fn register_clock(&mut self, pid: u16, program_index: usize) -> bool {
        if !valid_pid(pid) || pid == PID_MAX {
            return false;
        }
        self.clocks[pid as usize] = Some(program_index);
        true
    }

    pub fn unregister_clock(&mut self, pid: u16) {
        if valid_pid(pid) {
            self.clocks[pid as usize] = None;
        }
    }

    /// Index of the program whose clock `pid` feeds.
    pub fn get_clock(&self, pid: u16) -> Option<usize> {
        if !valid_pid(pid) {
            return None;
        }
        self.clocks[pid as usize]
    }

    /// Flushes every elementary stream filter; table filters keep their state.
    pub fn flush_stream_filters(&mut self) {
        self.filters
            .iter_mut()
            .flatten()
            .filter(|filter| filter.is_stream_filter())
            .for_each(|filter| filter.flush());
    }
}
