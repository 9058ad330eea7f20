//! Worker Thread Pool (`spec.md` §4.6, component C6).
//!
//! Each worker owns a fixed shard of sessions and, per iteration, drains
//! each session's push queue into its jitter buffer, releases the next
//! eligible packet (real, repaired, or reported as loss), decodes it, and
//! hands the PCM frame onward — to the session's own transcoded output and,
//! for group contributors, to the Stream-Group Engine (`crate::group`).
//! Allocation across workers and the energy-saver inactivity sleep are
//! computed here as pure functions so the thread-spawning glue in
//! `engine.rs` stays thin.

use std::time::Duration;

use crate::codec::CodecType;
use crate::config::{EngineConfig, WorkerAllocationMode};
use crate::jitter::{ContentFlags, JitterBuffer, ReleaseEvent};
use crate::session::SessionHandle;

/// One decoded frame ready for group hand-off or per-session transcode.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub session: SessionHandle,
    pub timestamp: u32,
    pub pcm: Vec<i16>,
    pub content_flags: ContentFlags,
}

/// Outcome of processing one session for one worker iteration
/// (`spec.md` §4.6 steps 2-5).
#[derive(Debug, Clone)]
pub enum WorkerIterationOutcome {
    Decoded(DecodedFrame),
    Repaired { session: SessionHandle, seq: u16 },
    Loss { session: SessionHandle, from_seq: u16, count: u32 },
    Idle,
}

/// Decode one payload into PCM for the given codec.
///
/// A real deployment links an external codec library per termination type;
/// here G.711 is decoded directly (the only codec whose decode is a pure
/// table lookup) and every other codec produces silence of the correct
/// frame length, which is sufficient to exercise the pipeline end to end
/// without vendoring a codec SDK.
pub fn decode(codec: CodecType, payload: &[u8], ptime_ms: u32, sample_rate_hz: u32) -> Vec<i16> {
    match codec {
        CodecType::G711Mu => payload.iter().map(|&b| g711_ulaw_decode(b)).collect(),
        CodecType::G711A => payload.iter().map(|&b| g711_alaw_decode(b)).collect(),
        _ => {
            let samples = (ptime_ms as u64 * sample_rate_hz as u64 / 1000) as usize;
            vec![0i16; samples.max(1)]
        }
    }
}

fn g711_ulaw_decode(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = u & 0x0F;
    let mut sample = ((mantissa as i32) << 3) + 0x84;
    sample <<= exponent;
    sample -= 0x84;
    if sign != 0 {
        -(sample as i16)
    } else {
        sample as i16
    }
}

fn g711_alaw_decode(byte: u8) -> i16 {
    let a = byte ^ 0x55;
    let sign = a & 0x80;
    let exponent = (a >> 4) & 0x07;
    let mantissa = a & 0x0F;
    let mut sample = ((mantissa as i32) << 4) + 0x08;
    if exponent != 0 {
        sample += 0x100;
        sample <<= exponent - 1;
    }
    if sign == 0 {
        -(sample as i16)
    } else {
        sample as i16
    }
}

/// Process one session's jitter buffer for one worker iteration
/// (`spec.md` §4.6 steps 1-5; queue drain is the caller's responsibility —
/// this operates on a buffer already fed by the push pipeline).
pub fn process_session(
    session: SessionHandle,
    jitter: &mut JitterBuffer,
    codec: CodecType,
    ptime_ms: u32,
    sample_rate_hz: u32,
) -> WorkerIterationOutcome {
    match jitter.release_next() {
        ReleaseEvent::Media(slot) => {
            let pcm = decode(codec, &slot.payload, ptime_ms, sample_rate_hz);
            WorkerIterationOutcome::Decoded(DecodedFrame {
                session,
                timestamp: slot.timestamp,
                pcm,
                content_flags: slot.content_flags,
            })
        }
        ReleaseEvent::Repair { seq } => WorkerIterationOutcome::Repaired { session, seq },
        ReleaseEvent::Loss { from_seq, count } => WorkerIterationOutcome::Loss {
            session,
            from_seq,
            count,
        },
        ReleaseEvent::Empty => WorkerIterationOutcome::Idle,
    }
}

/// Assign `session_count` sessions to `worker_count` workers per the
/// configured allocation mode (`spec.md` §4.6).
pub fn assign_worker(
    mode: WorkerAllocationMode,
    worker_count: usize,
    session_index: usize,
    sessions_per_worker_so_far: &[usize],
) -> usize {
    let worker_count = worker_count.max(1);
    match mode {
        WorkerAllocationMode::RoundRobin => session_index % worker_count,
        WorkerAllocationMode::FillFirst => sessions_per_worker_so_far
            .iter()
            .enumerate()
            .min_by_key(|(_, &count)| count)
            .map(|(idx, _)| idx)
            .unwrap_or(0),
    }
}

/// Energy-saver suspension: when a worker has been idle for at least
/// `threshold_ms`, sleep in `sleep_us` granules rather than busy-spinning
/// (`spec.md` §4.6 "Suspension points").
pub fn energy_saver_sleep_duration(
    idle_ms: u64,
    threshold_ms: u64,
    sleep_us: u64,
) -> Option<Duration> {
    if idle_ms >= threshold_ms {
        Some(Duration::from_micros(sleep_us))
    } else {
        None
    }
}

/// Resolve the sleep/decode parameters a worker needs for one session from
/// the engine config (`spec.md` §4.6).
pub fn worker_count_for(config: &EngineConfig) -> usize {
    config.clamped_worker_count()
}
