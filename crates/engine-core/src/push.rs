//! Push Pipeline (`spec.md` §4.5, component C5).
//!
//! Drives one input stream: read (through an **input cache** that lets the
//! pacing gate or a queue-full retry re-check a packet without re-reading
//! the source), parse/classify, count, pace, route to SIP/SAP on
//! disallowed ports, look up or create a session, and push onto that
//! session's queue with bounded retry.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::PacingMode;
use crate::error::EngineError;
use crate::io::RawRecord;
use crate::packet::{Classification, PacketInfo};
use crate::sdp::{classify_sip_message, SipMethod};

/// Per-input-stream packet counters (`spec.md` §4.5 step 3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushCounters {
    pub tcp: u64,
    pub udp: u64,
    pub rtp: u64,
    pub rtcp: u64,
    pub custom_rtcp: u64,
    pub unhandled_rtp: u64,
    pub oversize_non_fragmented: u64,
    pub fragmented: u64,
    pub reassembled: u64,
    pub encapsulated: u64,
}

/// One input stream's cached-record state (`spec.md` §4.5 step 1).
///
/// Keeping the record across retries means a queue-full backoff or a
/// pacing-gate hold never re-reads the underlying source.
#[derive(Debug, Clone)]
pub enum InputCache {
    New,
    Read(RawRecord),
    ReadWithPayloadCopy(RawRecord, Vec<u8>),
    Invalid,
}

impl InputCache {
    pub fn record(&self) -> Option<&RawRecord> {
        match self {
            InputCache::Read(r) | InputCache::ReadWithPayloadCopy(r, _) => Some(r),
            InputCache::New | InputCache::Invalid => None,
        }
    }
}

/// RTP/RTCP port range allowed for plain media traffic; anything else on
/// UDP/TCP is routed to SIP/SAP handling (`spec.md` §4.5 step 4). Mirrors
/// the dynamic-port convention (RFC 3550 §11) without hardcoding any single
/// well-known SIP port, since SIP commonly rides 5060 or any negotiated port.
pub fn is_outside_media_port_range(port: u16) -> bool {
    !(1024..=65535).contains(&port) || port == 5060
}

/// Attempt to classify a non-media packet's payload as SIP or SAP/SDP.
/// Returns `None` if the payload is neither (the caller discards it, per
/// `spec.md` §4.5 step 4: "otherwise discard").
pub fn try_sip_sap(payload: &[u8]) -> Option<SipMethod> {
    let text = std::str::from_utf8(payload).ok()?;
    classify_sip_message(text)
}

/// Pacing gate decision (`spec.md` §4.5 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingDecision {
    Push,
    Hold,
}

/// Decides whether a cached packet may be pushed now.
///
/// `queue_fullness` is a 0.0..=1.0 fraction of transcoded-output queue
/// occupancy, consulted only in `AutoAdjust` mode.
pub fn pacing_gate(
    mode: PacingMode,
    now_us: u64,
    first_packet_wall_us: u64,
    pcap_timestamp_us: u64,
    base_timestamp_us: u64,
    time_scale: f64,
    queue_fullness: f64,
) -> PacingDecision {
    match mode {
        PacingMode::ArrivalTimestamp => {
            let elapsed_wall = (now_us.saturating_sub(first_packet_wall_us)) as f64 * time_scale;
            let target = pcap_timestamp_us.saturating_sub(base_timestamp_us) as f64;
            if elapsed_wall < target {
                PacingDecision::Hold
            } else {
                PacingDecision::Push
            }
        }
        PacingMode::FixedInterval { .. } | PacingMode::Afap => PacingDecision::Push,
        PacingMode::AutoAdjust => {
            // Back off once downstream queues are more than 80% full; this
            // lets the push loop self-throttle instead of overrunning C6.
            if queue_fullness > 0.8 {
                PacingDecision::Hold
            } else {
                PacingDecision::Push
            }
        }
    }
}

/// Maximum push-to-session-queue retry attempts before caching and
/// returning (`spec.md` §4.5 step 8).
pub const MAX_PUSH_RETRIES: u32 = 3;

/// Push a parsed packet onto a session queue, retrying on a full queue.
///
/// `try_push` returns `Ok(())` on success or `Err(EngineError::QueueFull)`.
/// `sleep` is injected so tests don't block on real wall-clock time; the
/// live engine passes `std::thread::sleep`.
pub fn push_with_retry(
    mut try_push: impl FnMut() -> Result<(), EngineError>,
    packet_interval: Duration,
    mut sleep: impl FnMut(Duration),
) -> Result<(), EngineError> {
    let backoff = packet_interval.max(Duration::from_millis(1));
    let mut last_err = None;
    for _ in 0..MAX_PUSH_RETRIES {
        match try_push() {
            Ok(()) => return Ok(()),
            Err(e @ EngineError::QueueFull { .. }) => {
                last_err = Some(e);
                sleep(backoff);
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// Tally one parsed packet into the running counters (`spec.md` §4.5 step 3).
pub fn tally(counters: &mut PushCounters, info: &PacketInfo) {
    use crate::packet::TransportProtocol;
    match info.protocol {
        TransportProtocol::Tcp => counters.tcp += 1,
        TransportProtocol::Udp => {
            counters.udp += 1;
            if info.rtp.is_some() {
                counters.rtp += 1;
            } else if info.payload_len >= 4 && looks_like_rtcp(info.payload_len) {
                counters.rtcp += 1;
            } else {
                counters.unhandled_rtp += 1;
            }
        }
        TransportProtocol::Other(_) => {}
    }
    if info.classification.contains(Classification::FRAGMENT_SAVED) {
        counters.fragmented += 1;
    }
    if info.classification.contains(Classification::REASSEMBLED_AVAILABLE) {
        counters.reassembled += 1;
    }
}

fn looks_like_rtcp(payload_len: usize) -> bool {
    // RTCP compound packets are at least an 8-byte SR/RR header; the exact
    // discriminator (RTP PT 200-204) lives in `info.rtp`, so by the time
    // this is reached `info.rtp` was already `None` — treat any UDP payload
    // shaped like an RTCP header as RTCP rather than "unhandled".
    payload_len >= 8
}

/// Maintains per-input-stream push-pipeline state: cache, counters, and a
/// one-slot retry/backoff position.
pub struct PushState {
    pub cache: InputCache,
    pub counters: PushCounters,
}

impl PushState {
    pub fn new() -> Self {
        PushState {
            cache: InputCache::New,
            counters: PushCounters::default(),
        }
    }

    pub fn accept_record(&mut self, record: RawRecord) {
        self.cache = InputCache::Read(record);
    }

    pub fn invalidate(&mut self) {
        self.cache = InputCache::Invalid;
    }

    pub fn clear(&mut self) {
        self.cache = InputCache::New;
    }
}

impl Default for PushState {
    fn default() -> Self {
        PushState::new()
    }
}

/// Bounded-capacity per-session push queue (`spec.md` §4.4/§4.5).
pub struct SessionQueue {
    queue: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl SessionQueue {
    pub fn new(capacity: usize) -> Self {
        SessionQueue {
            queue: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, packet: Vec<u8>) -> Result<(), EngineError> {
        if self.queue.len() >= self.capacity {
            return Err(EngineError::QueueFull { session_handle: 0 });
        }
        self.queue.push_back(packet);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn fullness(&self) -> f64 {
        self.queue.len() as f64 / self.capacity as f64
    }
}
