use super::input::InputStream;
use super::model::{ElementaryStream, TransportStream};
use super::parser::TSPacketParser;
use super::psi::{PatParser, SectionFilter};
use super::registry::{FilterContext, FilterRegistry};
use super::types::*;
use crate::av::ParserPayload;
use crate::config::{self, DemuxConfig};
use crate::error::{DemuxError, Result};
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::io::{self, SeekFrom};

/// Packets read per chunk while scanning for PCRs.
const SCAN_CHUNK_PACKETS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    Unopened,
    SyncPat,
    SyncPmt,
    Steady,
    Closed,
}

/// A PCR found while scanning the input outside the packet loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PcrSample {
    pid: u16,
    value: u64,
    /// Byte offset of the packet carrying it.
    position: u64,
}

/// Per-PID continuity counter bookkeeping.
#[derive(Debug)]
struct ContinuityTracker {
    last: Vec<Option<u8>>,
    errors: u64,
}

impl ContinuityTracker {
    fn new() -> Self {
        Self {
            last: vec![None; PID_COUNT],
            errors: 0,
        }
    }

    /// Returns false on a gap. Repeated counters are allowed once as duplicates.
    fn check(&mut self, header: &TSHeader, discontinuity: bool) -> bool {
        let slot = &mut self.last[header.pid as usize];
        let cc = header.continuity_counter;
        let ok = match *slot {
            Some(last) if !discontinuity && header.contains_payload => {
                cc == last || cc == (last + 1) & 0x0F
            }
            Some(last) if !discontinuity => cc == last,
            _ => true,
        };
        *slot = Some(cc);
        if !ok {
            self.errors += 1;
        }
        ok
    }

    fn reset(&mut self) {
        self.last.iter_mut().for_each(|slot| *slot = None);
    }
}

/// Packet geometry of the open stream plus the PCR scanning used by duration
/// probing and seeking.
#[derive(Debug, Clone, Copy)]
struct Framing {
    packet_size: usize,
    sync_offset: usize,
    parser: TSPacketParser,
}

impl Framing {
    fn new(transport_type: TransportType) -> Self {
        Self {
            packet_size: transport_type.packet_size(),
            sync_offset: transport_type.sync_offset(),
            parser: TSPacketParser::new(),
        }
    }

    fn is_packet(&self, data: &[u8]) -> bool {
        data.len() >= self.packet_size && data[self.sync_offset] == SYNC_BYTE
    }

    /// The PID and PCR carried by a packet, if any.
    fn pcr_of(&self, packet: &[u8]) -> Option<(u16, u64)> {
        let ts = &packet[self.sync_offset..self.sync_offset + TS_PACKET_SIZE];
        let header = self.parser.parse_header(ts).ok()?;
        if header.transport_error || !header.adaptation_field_exists {
            return None;
        }
        let field = self.parser.parse_adaptation_field(ts, TS_HEADER_SIZE).ok()??;
        field.pcr.map(|pcr| (header.pid, pcr.value()))
    }

    /// Finds the first PCR at or after `from`, on `pid` if given. Gives up
    /// after `limit` bytes.
    fn scan_forward<R: InputStream>(
        &self,
        input: &mut R,
        from: u64,
        limit: u64,
        pid: Option<u16>,
    ) -> io::Result<Option<PcrSample>> {
        input.seek(SeekFrom::Start(from))?;
        let mut buf = vec![0u8; SCAN_CHUNK_PACKETS * self.packet_size];
        let mut len = 0;
        let mut base = from;

        loop {
            let n = read_full(input, &mut buf[len..])?;
            len += n;

            let mut pos = 0;
            while pos + self.packet_size <= len {
                if !self.is_packet(&buf[pos..]) {
                    pos += 1;
                    continue;
                }
                if let Some((found, value)) = self.pcr_of(&buf[pos..pos + self.packet_size]) {
                    if pid.map_or(true, |pid| pid == found) {
                        return Ok(Some(PcrSample {
                            pid: found,
                            value,
                            position: base + pos as u64,
                        }));
                    }
                }
                pos += self.packet_size;
            }

            base += pos as u64;
            if n == 0 || base - from >= limit {
                return Ok(None);
            }
            buf.copy_within(pos..len, 0);
            len -= pos;
        }
    }

    /// Walks whole packets backwards from the end of the input looking for a
    /// PCR on `pid`. `phase` is the offset of any packet boundary.
    fn scan_backward<R: InputStream>(
        &self,
        input: &mut R,
        length: u64,
        phase: u64,
        limit: u64,
        pid: u16,
    ) -> io::Result<Option<PcrSample>> {
        let packet_size = self.packet_size as u64;
        if length < phase + packet_size {
            return Ok(None);
        }
        let mut end = phase + (length - phase) / packet_size * packet_size;
        let mut lowest = phase.max(end.saturating_sub(limit));
        let misalignment = (lowest - phase) % packet_size;
        if misalignment != 0 {
            lowest += packet_size - misalignment;
        }
        let mut buf = vec![0u8; SCAN_CHUNK_PACKETS * self.packet_size];

        while end > lowest {
            let start = end
                .saturating_sub(buf.len() as u64)
                .max(lowest);
            let start = start + (end - start) % packet_size;
            let size = (end - start) as usize;
            input.seek(SeekFrom::Start(start))?;
            if read_full(input, &mut buf[..size])? < size {
                return Ok(None);
            }

            for offset in (0..size).step_by(self.packet_size).rev() {
                let packet = &buf[offset..offset + self.packet_size];
                if !self.is_packet(packet) {
                    continue;
                }
                if let Some((found, value)) = self.pcr_of(packet) {
                    if found == pid {
                        return Ok(Some(PcrSample {
                            pid,
                            value,
                            position: start + offset as u64,
                        }));
                    }
                }
            }
            end = start;
        }
        Ok(None)
    }
}

fn read_full<R: InputStream>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Pull-based MPEG-2 transport stream demultiplexer.
///
/// [`open`](Self::open) discovers the programs and streams from the PAT and
/// PMT; [`get_payload`](Self::get_payload) then yields the reassembled PES
/// payloads of every discovered stream, in input order.
///
/// ```no_run
/// use std::fs::File;
/// use tsdemux::format::ts::{TSDemuxer, TransportType};
///
/// # fn main() -> tsdemux::Result<()> {
/// let mut demuxer = TSDemuxer::new();
/// demuxer.open(File::open("movie.m2ts")?, TransportType::M2ts)?;
/// println!("duration: {:.1}s", demuxer.total_time());
///
/// while let Some(payload) = demuxer.get_payload() {
///     println!("PID 0x{:04x}: {} bytes @ {:.3}", payload.stream_id, payload.size(), payload.pts);
/// }
/// # Ok(())
/// # }
/// ```
pub struct TSDemuxer<R: InputStream> {
    input: Option<R>,
    config: DemuxConfig,
    state: DemuxState,
    framing: Framing,
    cache: Vec<u8>,
    cache_pos: usize,
    cache_len: usize,
    /// Input offset of `cache[0]`.
    cache_base: u64,
    registry: FilterRegistry,
    transport_stream: TransportStream,
    payloads: VecDeque<ParserPayload>,
    /// Set once stream filters were finished at end of input.
    finished: bool,
    continuity: ContinuityTracker,
    duration: f64,
    /// First PCR found by duration probing.
    start_pcr: Option<PcrSample>,
}

impl<R: InputStream> Default for TSDemuxer<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: InputStream> TSDemuxer<R> {
    /// Creates a demuxer using the process-wide configuration.
    pub fn new() -> Self {
        Self::with_config(config::current())
    }

    pub fn with_config(config: DemuxConfig) -> Self {
        Self {
            input: None,
            config,
            state: DemuxState::Unopened,
            framing: Framing::new(TransportType::Ts),
            cache: Vec::new(),
            cache_pos: 0,
            cache_len: 0,
            cache_base: 0,
            registry: FilterRegistry::new(),
            transport_stream: TransportStream::new(),
            payloads: VecDeque::new(),
            finished: false,
            continuity: ContinuityTracker::new(),
            duration: 0.0,
            start_pcr: None,
        }
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Starts demuxing `input`, reading until the first program's streams are known.
    ///
    /// Fails with [`DemuxError::NoProgram`] or [`DemuxError::NoStreams`] when
    /// the input ends before a PAT or a PMT has been seen.
    pub fn open(&mut self, mut input: R, transport_type: TransportType) -> Result<()> {
        self.reset();
        self.framing = Framing::new(transport_type);

        let origin = input.position();
        self.duration = self.probe_duration(&mut input, origin);
        if self.duration > 0.0 {
            info!(target: &self.config.log_target, "duration {:.3}s", self.duration);
        }

        self.cache = vec![0u8; self.framing.packet_size * self.config.cache_packets.max(1)];
        self.cache_base = origin;
        self.input = Some(input);
        self.fill_cache();

        let pat = SectionFilter::new(PatParser::new(), self.config.verify_crc);
        self.registry.register_filter(PID_PAT, Box::new(pat), true);

        self.state = DemuxState::SyncPat;
        while self.transport_stream.programs().is_empty() {
            if !self.process_next() {
                warn!(target: &self.config.log_target, "no PAT before end of input");
                self.close();
                return Err(DemuxError::NoProgram);
            }
        }

        self.state = DemuxState::SyncPmt;
        while self
            .transport_stream
            .last_program()
            .map_or(0, |program| program.stream_count())
            == 0
        {
            if !self.process_next() {
                warn!(target: &self.config.log_target, "no PMT before end of input");
                self.close();
                return Err(DemuxError::NoStreams);
            }
        }

        self.state = DemuxState::Steady;
        Ok(())
    }

    /// Releases the input and every filter, program and pending payload.
    pub fn close(&mut self) {
        self.reset();
        self.state = DemuxState::Closed;
    }

    fn reset(&mut self) {
        self.input = None;
        self.registry.unregister_all();
        self.transport_stream.clear();
        self.payloads.clear();
        self.finished = false;
        self.continuity = ContinuityTracker::new();
        self.cache = Vec::new();
        self.cache_pos = 0;
        self.cache_len = 0;
        self.cache_base = 0;
        self.duration = 0.0;
        self.start_pcr = None;
    }

    /// Next completed payload, or `None` at end of input.
    pub fn get_payload(&mut self) -> Option<ParserPayload> {
        if self.state != DemuxState::Steady {
            return None;
        }
        loop {
            if let Some(payload) = self.payloads.pop_front() {
                return Some(payload);
            }
            if !self.process_next() {
                if self.finished {
                    return None;
                }
                self.finished = true;
                self.finish_stream_filters();
            }
        }
    }

    /// Lets every elementary stream filter complete what it still holds.
    fn finish_stream_filters(&mut self) {
        for pid in 0..PID_COUNT as u16 {
            let is_stream = self
                .registry
                .get_filter(pid)
                .map_or(false, |filter| filter.is_stream_filter());
            if !is_stream {
                continue;
            }
            let Some(mut filter) = self.registry.unregister_filter(pid) else {
                continue;
            };
            let mut ctx = FilterContext {
                pid,
                registry: &mut self.registry,
                transport_stream: &mut self.transport_stream,
                payloads: &mut self.payloads,
                config: &self.config,
            };
            filter.finish(&mut ctx);
            self.registry.restore_filter(pid, filter);
        }
    }

    pub fn transport_stream(&self) -> &TransportStream {
        &self.transport_stream
    }

    pub fn stream_by_id(&self, pid: u16) -> Option<&ElementaryStream> {
        self.transport_stream.stream(pid)
    }

    /// Duration in seconds found by probing; 0 when unknown.
    pub fn total_time(&self) -> f64 {
        self.duration
    }

    /// Continuity counter gaps seen so far.
    pub fn continuity_errors(&self) -> u64 {
        self.continuity.errors
    }

    /// Slides unread bytes to the front of the cache and refills the rest.
    /// Returns the number of bytes read.
    fn fill_cache(&mut self) -> usize {
        let Some(input) = self.input.as_mut() else {
            return 0;
        };
        self.cache.copy_within(self.cache_pos..self.cache_len, 0);
        self.cache_base += self.cache_pos as u64;
        self.cache_len -= self.cache_pos;
        self.cache_pos = 0;

        match read_full(input, &mut self.cache[self.cache_len..]) {
            Ok(n) => {
                self.cache_len += n;
                n
            }
            Err(e) => {
                error!(target: &self.config.log_target, "input read failed: {}", e);
                0
            }
        }
    }

    /// Offset in the cache of the next synchronized packet.
    fn next_packet(&mut self) -> Option<usize> {
        loop {
            while self.cache_pos + self.framing.packet_size <= self.cache_len {
                if self.framing.is_packet(&self.cache[self.cache_pos..self.cache_len]) {
                    let start = self.cache_pos;
                    self.cache_pos += self.framing.packet_size;
                    return Some(start);
                }
                self.cache_pos += 1;
            }
            if self.fill_cache() == 0 {
                return None;
            }
        }
    }

    /// Reads packets until one is handed to a filter. Returns false once the
    /// input is exhausted.
    pub fn process_next(&mut self) -> bool {
        loop {
            let Some(start) = self.next_packet() else {
                return false;
            };
            let target = self.config.log_target.as_str();
            let position = self.cache_base + start as u64;
            let ts_start = start + self.framing.sync_offset;
            let packet = &self.cache[ts_start..ts_start + TS_PACKET_SIZE];

            let header = match self.framing.parser.parse_header(packet) {
                Ok(header) => header,
                Err(e) => {
                    trace!(target: target, "skipping packet at {}: {}", position, e);
                    continue;
                }
            };
            if header.transport_error {
                trace!(target: target, "PID 0x{:04x}: transport error", header.pid);
                continue;
            }
            if header.pid == PID_NULL {
                continue;
            }
            if header.scrambling_control != 0 && !self.registry.has_filter(PID_CAT) {
                trace!(target: target, "PID 0x{:04x}: scrambled packet skipped", header.pid);
                continue;
            }

            let mut offset = TS_HEADER_SIZE;
            let mut discontinuity = false;
            if header.adaptation_field_exists {
                match self.framing.parser.parse_adaptation_field(packet, offset) {
                    Ok(Some(field)) => {
                        discontinuity = field.discontinuity;
                        if discontinuity {
                            debug!(target: target, "PID 0x{:04x}: discontinuity indicator", header.pid);
                        }
                        let clock = field.pcr.zip(self.registry.get_clock(header.pid));
                        if let Some((pcr, index)) = clock {
                            if let Some(program) = self.transport_stream.program_mut(index) {
                                if !program.clock.add_reference(position, pcr) {
                                    debug!(target: target,
                                        "PID 0x{:04x}: PCR went backwards at {}", header.pid, position);
                                }
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        debug!(target: target, "PID 0x{:04x}: {}", header.pid, e);
                        continue;
                    }
                }
                offset += packet[offset] as usize + 1;
            }
            if !header.contains_payload || offset >= TS_PACKET_SIZE {
                continue;
            }

            let Some(mut filter) = self.registry.unregister_filter(header.pid) else {
                continue;
            };
            if !self.continuity.check(&header, discontinuity) {
                debug!(target: target,
                    "PID 0x{:04x}: continuity gap at counter {}", header.pid, header.continuity_counter);
            }

            let mut ctx = FilterContext {
                pid: header.pid,
                registry: &mut self.registry,
                transport_stream: &mut self.transport_stream,
                payloads: &mut self.payloads,
                config: &self.config,
            };
            filter.add(&packet[offset..], header.payload_unit_start, &mut ctx);
            self.registry.restore_filter(header.pid, filter);
            return true;
        }
    }

    /// Finds the first and last PCR of one PID to compute the duration, then
    /// returns `input` to `origin`. Any failure yields 0.
    fn probe_duration(&mut self, input: &mut R, origin: u64) -> f64 {
        let target = self.config.log_target.as_str();
        if !input.is_seekable() {
            debug!(target: target, "input not seekable, duration unknown");
            return 0.0;
        }
        let Some(length) = input.length() else {
            return 0.0;
        };

        let framing = self.framing;
        let limit = self.config.probe_limit;
        let probe = framing.scan_forward(input, 0, limit, None).and_then(|start| {
            let Some(start) = start else {
                return Ok(None);
            };
            let phase = start.position % framing.packet_size as u64;
            let end = framing.scan_backward(input, length, phase, limit, start.pid)?;
            Ok(end.map(|end| (start, end)))
        });
        if let Err(e) = input.seek(SeekFrom::Start(origin)) {
            error!(target: target, "cannot return to {} after probing: {}", origin, e);
        }

        match probe {
            Ok(Some((start, end))) => {
                self.start_pcr = Some(start);
                let mut end_value = end.value;
                if end_value < start.value {
                    end_value += PCR_WRAP;
                }
                pcr_to_seconds(end_value - start.value)
            }
            Ok(None) => {
                debug!(target: target, "no PCR found, duration unknown");
                0.0
            }
            Err(e) => {
                debug!(target: target, "duration probe failed: {}", e);
                0.0
            }
        }
    }

    /// Moves playback near `target` seconds and returns the time actually reached.
    ///
    /// Positioning uses the clock of the last program: a proportional jump
    /// followed by refinement passes, each moving half the remaining distance,
    /// until a PCR within the configured tolerance is found. Pending payloads
    /// and partially assembled PES packets are discarded.
    pub fn seek_time(&mut self, target: f64) -> Result<f64> {
        if self.state != DemuxState::Steady {
            return Err(DemuxError::NotOpen);
        }
        let log_target = self.config.log_target.clone();
        let framing = self.framing;
        let limit = self.config.probe_limit;
        let tolerance = self.config.seek_tolerance;
        let start_pcr = self.start_pcr;

        let input = self.input.as_mut().ok_or(DemuxError::NotOpen)?;
        if !input.is_seekable() {
            return Err(DemuxError::NotSeekable);
        }
        let length = input.length().ok_or(DemuxError::NotSeekable)?;
        let program = self
            .transport_stream
            .last_program_mut()
            .ok_or(DemuxError::NoProgram)?;

        if !program.clock.is_valid() {
            let sample = start_pcr.ok_or_else(|| {
                DemuxError::InvalidData("no program clock reference known".into())
            })?;
            program.clock.add_reference(sample.position, Pcr::from_value(sample.value));
        }
        let pcr_pid = program
            .pcr_pid
            .or(start_pcr.map(|sample| sample.pid))
            .ok_or_else(|| DemuxError::InvalidData("program has no PCR PID".into()))?;

        let clock = &program.clock;
        let rate = if self.duration > 0.0 {
            length as f64 / self.duration
        } else {
            clock.bitrate() / 8.0
        };
        if rate <= 0.0 {
            return Err(DemuxError::InvalidData("byte rate unknown".into()));
        }
        let target = if self.duration > 0.0 {
            target.clamp(0.0, self.duration)
        } else {
            target.max(0.0)
        };

        let packet_size = framing.packet_size as u64;
        let phase = clock.last_reference_position() % packet_size;
        let last_start = length.saturating_sub(packet_size);
        let align = |position: f64| -> u64 {
            let position = (position.max(0.0) as u64).min(last_start);
            if position < phase {
                return phase.min(last_start);
            }
            position - (position - phase) % packet_size
        };
        let elapsed_of = |value: u64| {
            let value = if value < clock.first_reference_value() {
                value + PCR_WRAP
            } else {
                value
            };
            clock.elapsed_at(value)
        };

        let resume = self.cache_base + self.cache_len as u64;
        let mut position =
            align(clock.last_reference_position() as f64 + (target - clock.elapsed_time()) * rate);
        let mut best: Option<(PcrSample, f64)> = None;

        for _ in 0..self.config.seek_max_iterations.max(1) {
            let sample = match framing.scan_forward(input, position, limit, Some(pcr_pid)) {
                Ok(Some(sample)) => sample,
                Ok(None) if position > 0 => {
                    // Ran off the end; retry from halfway back
                    position = align(position as f64 / 2.0);
                    continue;
                }
                Ok(None) => break,
                Err(e) => {
                    error!(target: &log_target, "seek scan failed: {}", e);
                    break;
                }
            };

            let elapsed = elapsed_of(sample.value);
            trace!(target: &log_target,
                "seek to {:.3}: PCR at {} is {:.3}", target, sample.position, elapsed);
            if best.map_or(true, |(_, e)| (elapsed - target).abs() < (e - target).abs()) {
                best = Some((sample, elapsed));
            }
            if (elapsed - target).abs() <= tolerance {
                break;
            }
            position = align(sample.position as f64 + (target - elapsed) * rate / 2.0);
        }

        let Some((sample, elapsed)) = best else {
            input.seek(SeekFrom::Start(resume))?;
            return Err(DemuxError::InvalidData(format!(
                "no PCR on PID 0x{:04x} near {:.3}s",
                pcr_pid, target
            )));
        };

        input.seek(SeekFrom::Start(sample.position))?;
        program.clock.reposition(sample.position, Pcr::from_value(sample.value));
        self.cache_base = sample.position;
        self.cache_pos = 0;
        self.cache_len = 0;
        self.payloads.clear();
        self.finished = false;
        self.registry.flush_stream_filters();
        self.continuity.reset();
        self.fill_cache();

        debug!(target: &log_target, "seek to {:.3}s reached {:.3}s", target, elapsed);
        Ok(elapsed)
    }
}
