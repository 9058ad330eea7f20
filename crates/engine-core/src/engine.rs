//! Top-level orchestrator tying every component together (`spec.md` §5).
//!
//! Grounded in the teacher's `server::Server`: a thin `Arc<AtomicBool>`
//! running flag plus a `parking_lot::Mutex`-guarded shared state, with
//! `thread::spawn` used for background work and `tracing` for lifecycle
//! logging. Where the teacher's `Server` owns one `SessionManager` behind an
//! `Arc<RwLock<_>>` shared by every connection handler, `EngineState` instead
//! owns everything the push/worker/pull pipelines touch in one place — this
//! engine's concurrency model puts workers in their own OS threads but keeps
//! the shared session/queue state behind a single lock, trading the
//! teacher's finer-grained per-connection locking for the simpler shape a
//! batch media processor needs (`spec.md` §5: "single cooperative app-thread
//! event loop" driving ingestion, "parallel worker pool" draining it).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec::{self, CodecType, DetectedCodec};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::group::{ContributorFrame, GroupFlags, StreamGroupEngine};
use crate::history::{Direction, HistoryLog, HistoryRecord, DEFAULT_CAPACITY};
use crate::io::RawRecord;
use crate::jitter::{ContentFlags, JitterBuffer};
use crate::packet::headers;
use crate::packet::{self, DuplicateWindow, FragmentTable, PacketFingerprint, PacketInfo, TransportProtocol};
use crate::pull::{self, PullMode, PullQueueKind, PullQueues};
use crate::push::{self, PushState, SessionQueue};
use crate::registry::{StreamKey, StreamKeyRegistry};
use crate::sdp::{SdpDatabase, SipMethod};
use crate::session::termination::{EndpointFlags, TerminationEndpoint};
use crate::session::{RtpPacketShape, SessionHandle, SessionManager};
use crate::worker::{self, WorkerIterationOutcome};

/// Pack an RTP-derived envelope (seq, timestamp, content flags, payload)
/// into the flat byte form `push::SessionQueue` carries, since that queue
/// only moves raw bytes across the push/worker boundary.
fn encode_envelope(seq: u16, timestamp: u32, content_flags: ContentFlags, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&content_flags.bits().to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_envelope(buf: &[u8]) -> Option<(u16, u32, ContentFlags, &[u8])> {
    if buf.len() < 8 {
        return None;
    }
    let seq = u16::from_be_bytes([buf[0], buf[1]]);
    let timestamp = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
    let content_flags = ContentFlags::from_bits_truncate(u16::from_be_bytes([buf[6], buf[7]]));
    Some((seq, timestamp, content_flags, &buf[8..]))
}

/// One session's bookkeeping beyond what `session::SessionManager` owns:
/// its queues, jitter buffer, and group membership, keyed by handle.
struct SessionRuntime {
    push_queue: SessionQueue,
    jitter: JitterBuffer,
    pull_queues: PullQueues,
    codec: CodecType,
    ptime_ms: u32,
    sample_rate_hz: u32,
    group_id: Option<String>,
    contributor_index: usize,
    worker: usize,
    /// SSRC of the RTP stream that created this session, carried onto every
    /// output `HistoryRecord` so input/output correlate by SSRC (`spec.md`
    /// §4.9).
    ssrc: u32,
    /// Output-direction sequence counter; distinct from the input stream's
    /// RTP sequence since decode can merge/repair/drop frames.
    output_seq: u16,
}

/// Everything the push, worker, and pull pipelines share, guarded by one
/// lock (`spec.md` §5). Stream keys resolve to session handles via
/// `registry`; `index_to_handle` bridges the registry's plain `usize` slot
/// back to the handle `SessionManager` actually addresses sessions by.
struct EngineState {
    registry: StreamKeyRegistry,
    index_to_handle: HashMap<usize, SessionHandle>,
    sessions: SessionManager,
    runtimes: HashMap<SessionHandle, SessionRuntime>,
    sdp: SdpDatabase,
    push_states: HashMap<String, PushState>,
    groups: HashMap<String, StreamGroupEngine>,
    history: HistoryLog,
    worker_loads: Vec<usize>,
    /// Per-input-stream IPv4 fragment reassembly tables (`spec.md` §4.1,
    /// §9). Keyed by `stream_id` rather than by stream key since a fragment
    /// hasn't exposed ports yet — the stream key isn't known until reassembly
    /// hands back a full UDP datagram.
    fragment_tables: HashMap<String, FragmentTable>,
    /// Per-input-stream duplicate-packet windows (`spec.md` §4.1). Distinct
    /// from the jitter buffer's own RFC 7198 lookback: this catches exact
    /// wire-level replays before a session even exists.
    dedup_windows: HashMap<String, DuplicateWindow>,
}

impl EngineState {
    fn new(config: &EngineConfig) -> Self {
        EngineState {
            registry: StreamKeyRegistry::default(),
            index_to_handle: HashMap::new(),
            sessions: SessionManager::new(),
            runtimes: HashMap::new(),
            sdp: SdpDatabase::new(),
            push_states: HashMap::new(),
            groups: HashMap::new(),
            history: HistoryLog::new(DEFAULT_CAPACITY),
            worker_loads: vec![0; config.clamped_worker_count()],
            fragment_tables: HashMap::new(),
            dedup_windows: HashMap::new(),
        }
    }
}

/// The RTP media processing engine: owns every worker thread and the shared
/// state they drain, and is the only type `engine-cli` talks to directly
/// (`spec.md` §5, §6).
pub struct Engine {
    state: Arc<Mutex<EngineState>>,
    config: EngineConfig,
    running: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let state = EngineState::new(&config);
        Engine {
            state: Arc::new(Mutex::new(state)),
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ingest one raw captured record from input stream `stream_id`
    /// (`spec.md` §4.5, the Push Pipeline's per-packet steps).
    pub fn ingest_record(&self, stream_id: &str, record: RawRecord) -> Result<(), EngineError> {
        let info = match packet::parse(&record.data, record.link_layer)? {
            Some(info) => info,
            None => return Ok(()), // non-IP link layer; tagged and ignored upstream
        };

        let mut state = self.state.lock();

        if info.classification.contains(packet::Classification::FRAGMENT_SAVED) {
            return self.handle_fragment(&mut state, stream_id, &record.data, &info);
        }

        self.ingest_parsed(&mut state, stream_id, &record.data, &info)
    }

    /// Save one IPv4 fragment into this stream's reassembly table and, once
    /// the train completes, re-dispatch the reassembled datagram through the
    /// normal RTP path (`spec.md` §4.1, §9). A fragment never reaches
    /// `ingest_parsed` directly — it has no UDP ports until reassembly hands
    /// back a full datagram.
    fn handle_fragment(
        &self,
        state: &mut EngineState,
        stream_id: &str,
        data: &[u8],
        info: &PacketInfo,
    ) -> Result<(), EngineError> {
        let ip = headers::Ipv4Header {
            header_len: info.ip_header_len,
            total_len: 0,
            identification: info.ip_identification,
            flags_more_fragments: info.ip_more_fragments,
            fragment_offset: info.ip_fragment_offset,
            protocol: protocol_number(info.protocol),
            src: info.src_addr,
            dst: info.dst_addr,
        };
        let payload = &data[info.payload_offset..info.payload_offset + info.payload_len];

        let table = state
            .fragment_tables
            .entry(stream_id.to_string())
            .or_insert_with(FragmentTable::default);
        if !table.insert(&ip, payload) {
            return Ok(());
        }

        let key = FragmentTable::key_for(&ip);
        let Some(reassembled) = table.take_reassembled(&key) else {
            return Ok(());
        };
        let Some(reassembled_info) = packet::parse_reassembled_udp(&reassembled, ip.src, ip.dst)? else {
            return Ok(());
        };
        self.ingest_parsed(state, stream_id, &reassembled, &reassembled_info)
    }

    /// The shared tail of `ingest_record`: tally, dedup, route to RTP/non-RTP
    /// handling. `data` backs `info`'s offsets — either the original captured
    /// buffer, or a reassembled fragment train.
    fn ingest_parsed(
        &self,
        state: &mut EngineState,
        stream_id: &str,
        data: &[u8],
        info: &PacketInfo,
    ) -> Result<(), EngineError> {
        let counters = &mut state
            .push_states
            .entry(stream_id.to_string())
            .or_insert_with(PushState::new)
            .counters;
        push::tally(counters, info);

        let Some(rtp) = info.rtp.clone() else {
            return self.handle_non_rtp(state, stream_id, data, info);
        };

        let payload = &data[info.payload_offset..info.payload_offset + info.payload_len];
        if packet::is_no_data_payload(payload.len()) {
            // No-transmission event: never creates a session (spec.md §3).
            return Ok(());
        }

        let fingerprint = PacketFingerprint::new(info.src_port, info.dst_port, rtp.sequence, payload);
        let is_duplicate = state
            .dedup_windows
            .entry(stream_id.to_string())
            .or_insert_with(DuplicateWindow::default)
            .check_and_record(fingerprint);
        if is_duplicate {
            tracing::debug!(stream = stream_id, seq = rtp.sequence, "discarding duplicate packet");
            return Ok(());
        }

        let is_dtmf = packet::is_dtmf_event_payload(payload.len());
        let key = if is_dtmf {
            StreamKey::without_payload_type(info.src_addr, info.dst_addr, info.src_port, info.dst_port)
        } else {
            StreamKey::new(info.src_addr, info.dst_addr, info.src_port, info.dst_port, rtp.payload_type)
        };

        let (is_new, index) = state.registry.find_or_insert(key)?;
        let handle = if is_new {
            let handle = self.create_session(state, stream_id, info, &rtp)?;
            state.index_to_handle.insert(index, handle);
            handle
        } else {
            state.index_to_handle[&index]
        };

        let content_flags = if is_dtmf { ContentFlags::DTMF } else { ContentFlags::MEDIA };
        let envelope = encode_envelope(rtp.sequence, rtp.timestamp, content_flags, payload);

        let packet_interval = Duration::from_secs_f64((self.config.push_interval_ms.max(0.0)) / 1_000.0);
        let result = push::push_with_retry(
            || {
                let runtime = state
                    .runtimes
                    .get_mut(&handle)
                    .ok_or(EngineError::SessionNotFound { handle: handle.0 })?;
                runtime.push_queue.push(envelope.clone())
            },
            packet_interval,
            |d| thread::sleep(d),
        );
        if let Err(ref e) = result {
            tracing::warn!(session = handle.0, error = %e, "dropping packet after push retries exhausted");
        }

        state.history.append(HistoryRecord {
            ssrc: rtp.ssrc,
            seq: rtp.sequence,
            timestamp: rtp.timestamp,
            content_flags,
            direction: Direction::Input,
            channel: 0,
        });

        Ok(())
    }

    fn handle_non_rtp(
        &self,
        state: &mut EngineState,
        stream_id: &str,
        data: &[u8],
        info: &PacketInfo,
    ) -> Result<(), EngineError> {
        if !matches!(info.protocol, TransportProtocol::Udp | TransportProtocol::Tcp) {
            return Ok(());
        }
        if !push::is_outside_media_port_range(info.dst_port) {
            return Ok(());
        }
        let payload = &data[info.payload_offset..info.payload_offset + info.payload_len];
        let Some(method) = push::try_sip_sap(payload) else {
            return Ok(()); // neither SIP nor SAP: discard (spec.md §4.5 step 4)
        };
        let text = std::str::from_utf8(payload).unwrap_or("");
        match method {
            SipMethod::Invite | SipMethod::Ok => {
                if let Some(body_start) = text.find("\r\n\r\n") {
                    let stream_sdp_mode = self
                        .config
                        .options
                        .contains(crate::config::EngineOptions::ENABLE_STREAM_SDP_INFO);
                    state.sdp.ingest_if_enabled(stream_id, &text[body_start + 4..], stream_sdp_mode);
                }
            }
            SipMethod::Bye => {
                let bye_termination_enabled = !self
                    .config
                    .options
                    .contains(crate::config::EngineOptions::DISABLE_TERMINATE_STREAM_ON_BYE);
                state.sdp.mark_terminated(stream_id, bye_termination_enabled);
            }
            SipMethod::Other => {}
        }
        Ok(())
    }

    /// Create a session for a newly observed stream key: detect its codec,
    /// build a default termination endpoint, and register queues/buffers for
    /// it (`spec.md` §4.2, §4.4).
    fn create_session(
        &self,
        state: &mut EngineState,
        stream_id: &str,
        info: &PacketInfo,
        rtp: &crate::packet::headers::RtpHeader,
    ) -> Result<SessionHandle, EngineError> {
        let payload = &[]; // bitrate-only re-detection at hint time needs no payload bytes
        let hint = state.sdp.rtpmap_hint(stream_id, rtp.payload_type);
        let detected: DetectedCodec = codec::detect(rtp.payload_type, payload, hint);

        let shape = RtpPacketShape {
            version: rtp.version,
            rtp_header_len: rtp.header_len,
            payload_len: info.payload_len,
            payload_type: rtp.payload_type,
        };
        let term1 = TerminationEndpoint {
            codec: detected.codec,
            bitrate_bps: detected.bitrate_bps,
            sample_rate_in_hz: if detected.sample_rate_hz > 0 { detected.sample_rate_hz } else { 8_000 },
            sample_rate_decode_hz: if detected.sample_rate_hz > 0 { detected.sample_rate_hz } else { 8_000 },
            ptime_ms: 20,
            jitter_buffer: self.config.jitter_buffer,
            payload_type: rtp.payload_type,
            flags: EndpointFlags::default(),
            addr: info.src_addr,
            port: info.src_port,
        };
        let sample_rate_hz = term1.sample_rate_in_hz;
        let ptime_ms = term1.ptime_ms;
        let codec = term1.codec;

        let timestamp_match_mode = self
            .config
            .options
            .contains(crate::config::EngineOptions::ENABLE_TIMESTAMP_MATCH_MODE);
        let handle = state.sessions.create(shape, term1, None, None, None, timestamp_match_mode)?;

        let worker_id = worker::assign_worker(
            self.config.allocation_mode,
            self.config.clamped_worker_count(),
            state.runtimes.len(),
            &state.worker_loads,
        );
        state.worker_loads[worker_id] += 1;

        state.runtimes.insert(
            handle,
            SessionRuntime {
                push_queue: SessionQueue::new(queue_capacity_for(&self.config)),
                jitter: JitterBuffer::new(self.config.jitter_buffer),
                pull_queues: PullQueues::new(),
                codec,
                ptime_ms,
                sample_rate_hz,
                group_id: None,
                contributor_index: 0,
                worker: worker_id,
                ssrc: rtp.ssrc,
                output_seq: 0,
            },
        );

        tracing::info!(session = handle.0, stream = stream_id, codec = ?codec, "session created");
        Ok(handle)
    }

    /// Spawn the worker pool: each thread repeatedly drains its shard of
    /// sessions' push queues into their jitter buffers, decodes the next
    /// eligible slot, and routes the result onward (`spec.md` §4.6).
    pub fn spawn_workers(&self) -> Vec<thread::JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let worker_count = self.config.clamped_worker_count();
        (0..worker_count)
            .map(|worker_id| {
                let state = self.state.clone();
                let running = self.running.clone();
                let threshold_ms = self.config.energy_saver_threshold_ms;
                let sleep_us = self.config.energy_saver_sleep_us;
                thread::spawn(move || {
                    let mut idle_ms: u64 = 0;
                    while running.load(Ordering::SeqCst) {
                        let did_work = Self::run_worker_iteration(&state, worker_id);
                        idle_ms = if did_work { 0 } else { idle_ms + 1 };
                        if let Some(sleep_for) = worker::energy_saver_sleep_duration(idle_ms, threshold_ms, sleep_us) {
                            thread::sleep(sleep_for);
                        }
                    }
                })
            })
            .collect()
    }

    /// One worker's pass over every session assigned to it. Returns whether
    /// any session produced output, driving the energy-saver idle counter.
    fn run_worker_iteration(state: &Arc<Mutex<EngineState>>, worker_id: usize) -> bool {
        let mut guard = state.lock();
        let handles: Vec<SessionHandle> = guard
            .runtimes
            .iter()
            .filter(|(_, rt)| rt.worker == worker_id)
            .map(|(&h, _)| h)
            .collect();

        let mut did_work = false;
        for handle in handles {
            while let Some(raw) = guard.runtimes.get_mut(&handle).and_then(|rt| rt.push_queue.pop()) {
                let Some((seq, timestamp, content_flags, payload)) = decode_envelope(&raw) else {
                    continue;
                };
                if let Some(rt) = guard.runtimes.get_mut(&handle) {
                    rt.jitter.insert(seq, timestamp, payload.to_vec(), content_flags);
                }
            }

            let outcome = {
                let rt = match guard.runtimes.get_mut(&handle) {
                    Some(rt) => rt,
                    None => continue,
                };
                worker::process_session(handle, &mut rt.jitter, rt.codec, rt.ptime_ms, rt.sample_rate_hz)
            };

            match outcome {
                WorkerIterationOutcome::Decoded(frame) => {
                    did_work = true;
                    let pcm_bytes: Vec<u8> = frame.pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
                    let timestamp_us = frame.timestamp as u64;
                    let (group_id, contributor_index, ssrc, output_seq) = {
                        let rt = guard.runtimes.get_mut(&handle).unwrap();
                        let output_seq = rt.output_seq;
                        rt.output_seq = rt.output_seq.wrapping_add(1);
                        (rt.group_id.clone(), rt.contributor_index, rt.ssrc, output_seq)
                    };
                    if let Some(group_id) = group_id {
                        if let Some(group) = guard.groups.get_mut(&group_id) {
                            group.align(ContributorFrame {
                                contributor_index,
                                timestamp_us,
                                pcm: frame.pcm.clone(),
                            });
                        }
                    }
                    if let Some(rt) = guard.runtimes.get_mut(&handle) {
                        rt.pull_queues.push(PullQueueKind::TranscodedOutput, pcm_bytes, timestamp_us);
                    }
                    guard.history.append(HistoryRecord {
                        ssrc,
                        seq: output_seq,
                        timestamp: frame.timestamp,
                        content_flags: frame.content_flags,
                        direction: Direction::Output,
                        channel: 0,
                    });
                }
                WorkerIterationOutcome::Repaired { .. } | WorkerIterationOutcome::Loss { .. } => {
                    did_work = true;
                }
                WorkerIterationOutcome::Idle => {}
            }
        }
        did_work
    }

    /// Pull up to the mode-determined count of packets from one session's
    /// output queue (`spec.md` §4.8).
    pub fn pull(&self, handle: SessionHandle, kind: PullQueueKind, mode: PullMode) -> Vec<(Vec<u8>, u64)> {
        let mut state = self.state.lock();
        match state.runtimes.get_mut(&handle) {
            Some(rt) => pull::pull(&mut rt.pull_queues, kind, mode),
            None => Vec::new(),
        }
    }

    /// Assign a session to a stream group, creating the group's merge engine
    /// on first reference (`spec.md` §4.4 "Group assignment", §4.7).
    pub fn join_group(&self, handle: SessionHandle, group_id: &str, contributor_index: usize) {
        let mut state = self.state.lock();
        state
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| StreamGroupEngine::new(20, 8_000, contributor_index + 1, GroupFlags::default()));
        if let Some(rt) = state.runtimes.get_mut(&handle) {
            rt.group_id = Some(group_id.to_string());
            rt.contributor_index = contributor_index;
        }
    }

    /// Stop every worker thread at the next iteration boundary (`spec.md` §5).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("engine stopping");
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Every session handle currently known, for CLI-side output draining.
    pub fn session_handles(&self) -> Vec<SessionHandle> {
        self.state.lock().runtimes.keys().copied().collect()
    }

    /// Run the packet-history analyzer over everything logged so far
    /// (`spec.md` §4.9). Cheap enough to call at run end; not intended for
    /// the hot path.
    pub fn history_views(&self, ooo_window: u16) -> crate::history::HistoryViews {
        let state = self.state.lock();
        let records: Vec<&HistoryRecord> = state.history.iter().collect();
        crate::history::organize(&records, ooo_window)
    }
}

/// Per-session push-queue depth: generous enough to absorb one jitter
/// buffer's worth of max-delay packets without spurious `QueueFull` retries.
fn queue_capacity_for(config: &EngineConfig) -> usize {
    (config.jitter_buffer.max_ptimes as usize + 1) * 8
}

/// Recover the raw IP protocol number from a classified `TransportProtocol`,
/// needed to rebuild an `Ipv4Header` for `FragmentTable` from a `PacketInfo`.
fn protocol_number(protocol: TransportProtocol) -> u8 {
    match protocol {
        TransportProtocol::Tcp => headers::ip_proto::TCP,
        TransportProtocol::Udp => headers::ip_proto::UDP,
        TransportProtocol::Other(p) => p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::headers::LinkLayerKind;

    fn build_udp_rtp_ethernet(pt: u8, seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 14];
        buf[12] = 0x08;
        buf[13] = 0x00;

        let udp_len = 8 + 12 + payload.len();
        let total_len = 20 + udp_len;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[9] = crate::packet::headers::ip_proto::UDP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        buf.extend_from_slice(&ip);

        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&5000u16.to_be_bytes());
        udp[2..4].copy_from_slice(&6000u16.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        buf.extend_from_slice(&udp);

        let mut rtp = vec![0u8; 12];
        rtp[0] = 2 << 6;
        rtp[1] = pt;
        rtp[2..4].copy_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&rtp);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn envelope_round_trips() {
        let payload = [1, 2, 3, 4];
        let encoded = encode_envelope(42, 1000, ContentFlags::MEDIA, &payload);
        let (seq, ts, flags, body) = decode_envelope(&encoded).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(ts, 1000);
        assert_eq!(flags, ContentFlags::MEDIA);
        assert_eq!(body, &payload);
    }

    #[test]
    fn ingesting_first_rtp_packet_creates_a_session() {
        let engine = Engine::new(EngineConfig::default());
        let buf = build_udp_rtp_ethernet(0, 1, &[0xFF; 160]);
        let record = RawRecord {
            data: buf,
            timestamp_us: 0,
            link_layer: LinkLayerKind::Ethernet,
        };
        engine.ingest_record("stream-a", record).unwrap();
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn repeated_stream_key_reuses_the_same_session() {
        let engine = Engine::new(EngineConfig::default());
        for seq in 1..=3u16 {
            let buf = build_udp_rtp_ethernet(0, seq, &[0xFF; 160]);
            let record = RawRecord {
                data: buf,
                timestamp_us: 0,
                link_layer: LinkLayerKind::Ethernet,
            };
            engine.ingest_record("stream-a", record).unwrap();
        }
        assert_eq!(engine.session_count(), 1);
    }

    #[test]
    fn non_ip_frame_is_ignored_without_error() {
        let engine = Engine::new(EngineConfig::default());
        let mut buf = vec![0u8; 32];
        buf[12] = 0x08;
        buf[13] = 0x06; // ARP
        let record = RawRecord {
            data: buf,
            timestamp_us: 0,
            link_layer: LinkLayerKind::Ethernet,
        };
        assert!(engine.ingest_record("stream-a", record).is_ok());
        assert_eq!(engine.session_count(), 0);
    }

    /// Build two Ethernet/IPv4 fragments of one UDP/RTP datagram, split at a
    /// byte offset that is a multiple of 8 (the minimum IPv4 fragment
    /// granularity).
    fn build_fragmented_udp_rtp_ethernet(seq: u16, ssrc: u32, payload: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut rtp = vec![0u8; 12];
        rtp[0] = 2 << 6;
        rtp[2..4].copy_from_slice(&seq.to_be_bytes());
        rtp[8..12].copy_from_slice(&ssrc.to_be_bytes());

        let mut l4 = vec![0u8; 8];
        let udp_len = 8 + rtp.len() + payload.len();
        l4[0..2].copy_from_slice(&5000u16.to_be_bytes());
        l4[2..4].copy_from_slice(&6000u16.to_be_bytes());
        l4[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        l4.extend_from_slice(&rtp);
        l4.extend_from_slice(payload);

        let split_at = 16; // UDP header + RTP header, a multiple of 8
        let (first_chunk, second_chunk) = l4.split_at(split_at);

        let frame = |chunk: &[u8], offset: u16, more_fragments: bool| {
            let mut buf = vec![0u8; 14];
            buf[12] = 0x08;
            buf[13] = 0x00;
            let mut ip = vec![0u8; 20];
            ip[0] = 0x45;
            ip[2..4].copy_from_slice(&((20 + chunk.len()) as u16).to_be_bytes());
            ip[4..6].copy_from_slice(&0x1234u16.to_be_bytes()); // identification
            let mut flags_and_offset = offset / 8;
            if more_fragments {
                flags_and_offset |= 0x2000;
            }
            ip[6..8].copy_from_slice(&flags_and_offset.to_be_bytes());
            ip[9] = crate::packet::headers::ip_proto::UDP;
            ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
            ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
            buf.extend_from_slice(&ip);
            buf.extend_from_slice(chunk);
            buf
        };

        (frame(first_chunk, 0, true), frame(second_chunk, split_at as u16, false))
    }

    #[test]
    fn fragmented_rtp_packet_reassembles_and_creates_a_session() {
        let engine = Engine::new(EngineConfig::default());
        let (frag1, frag2) = build_fragmented_udp_rtp_ethernet(7, 0xABCD_1234, &[0xFF; 160]);

        engine
            .ingest_record(
                "stream-a",
                RawRecord { data: frag1, timestamp_us: 0, link_layer: LinkLayerKind::Ethernet },
            )
            .unwrap();
        assert_eq!(engine.session_count(), 0, "reassembly is incomplete after one fragment");

        engine
            .ingest_record(
                "stream-a",
                RawRecord { data: frag2, timestamp_us: 0, link_layer: LinkLayerKind::Ethernet },
            )
            .unwrap();
        assert_eq!(engine.session_count(), 1, "the completed train re-enters the RTP path");

        let views = engine.history_views(16);
        assert!(views.by_ssrc.contains_key(&0xABCD_1234), "reassembled packet keeps its real SSRC");
    }

    #[test]
    fn exact_duplicate_packet_is_discarded_before_enqueuing() {
        let engine = Engine::new(EngineConfig::default());
        let buf = build_udp_rtp_ethernet(0, 1, &[0xFF; 160]);
        let record = |data: Vec<u8>| RawRecord { data, timestamp_us: 0, link_layer: LinkLayerKind::Ethernet };

        engine.ingest_record("stream-a", record(buf.clone())).unwrap();
        engine.ingest_record("stream-a", record(buf)).unwrap();

        let views = engine.history_views(16);
        let stats = views.by_ssrc.get(&0).expect("at least one input record");
        assert_eq!(stats.duplicates, 0, "the duplicate never reached history as a second record");
    }

    #[test]
    fn bye_without_prior_invite_does_not_panic() {
        let mut state = EngineState::new(&EngineConfig::default());
        let bye_body = "BYE sip:bob@example.com SIP/2.0\r\nContent-Length: 0\r\n\r\n";
        let info = PacketInfo {
            ip_version: 4,
            ip_header_len: 20,
            protocol: TransportProtocol::Udp,
            src_addr: "10.0.0.1".parse().unwrap(),
            dst_addr: "10.0.0.2".parse().unwrap(),
            src_port: 5070,
            dst_port: 5060,
            rtp: None,
            payload_offset: 0,
            payload_len: bye_body.len(),
            classification: crate::packet::Classification::VALID,
            ip_identification: 0,
            ip_fragment_offset: 0,
            ip_more_fragments: false,
        };
        let record = RawRecord {
            data: bye_body.as_bytes().to_vec(),
            timestamp_us: 0,
            link_layer: LinkLayerKind::Ethernet,
        };
        let engine = Engine::new(EngineConfig::default());
        engine.handle_non_rtp(&mut state, "stream-a", &record.data, &info).unwrap();
        assert!(state.sdp.is_pending_termination("stream-a"));
    }
}
