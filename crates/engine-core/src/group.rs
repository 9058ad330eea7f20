//! Stream-Group Engine (`spec.md` §3 "Stream Group", §4.7, component C7).
//!
//! Holds a small ring of per-contributor PCM frames keyed by wall-clock
//! slots one ptime wide, and implements align/merge/deduplicate/flush/emit
//! over that ring. A group's contributor count and FLC/dedup/ASR behavior
//! come from the owner session's [`crate::session::GroupTermination`];
//! this module is itself policy-light — merge math and correlation, not
//! session lookups.

use std::collections::BTreeMap;

/// One contributor's decoded frame, timestamped in microseconds on the
/// group's shared wall clock (already time-scaled by the caller).
#[derive(Debug, Clone)]
pub struct ContributorFrame {
    pub contributor_index: usize,
    pub timestamp_us: u64,
    pub pcm: Vec<i16>,
}

/// One slot's accumulated contributor frames plus an optional alignment
/// marker recorded when dedup held a stream to align phase.
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub frames: Vec<ContributorFrame>,
    pub alignment_marker: Option<i64>,
}

/// Behavior flags for one group (`spec.md` §3 "Stream Group").
#[derive(Debug, Clone, Copy)]
pub struct GroupFlags {
    pub enable_merging: bool,
    pub enable_asr: bool,
    pub enable_deduplication: bool,
    pub flc_disable: bool,
    pub flc_holdoffs: bool,
}

impl Default for GroupFlags {
    fn default() -> Self {
        GroupFlags {
            enable_merging: true,
            enable_asr: false,
            enable_deduplication: false,
            flc_disable: false,
            flc_holdoffs: false,
        }
    }
}

/// Cross-correlation threshold above which two contributor frames are
/// treated as the same audio and deduplicated (`spec.md` §4.7 "Deduplicate").
const CORRELATION_THRESHOLD: f64 = 0.92;

/// Per-group ring of ptime-wide slots.
pub struct StreamGroupEngine {
    pub ptime_ms: u32,
    pub sample_rate_hz: u32,
    pub contributor_count: usize,
    pub flags: GroupFlags,
    slots: BTreeMap<u64, Slot>,
    next_emit_slot: Option<u64>,
}

impl StreamGroupEngine {
    pub fn new(ptime_ms: u32, sample_rate_hz: u32, contributor_count: usize, flags: GroupFlags) -> Self {
        StreamGroupEngine {
            ptime_ms,
            sample_rate_hz,
            contributor_count,
            flags,
            slots: BTreeMap::new(),
            next_emit_slot: None,
        }
    }

    fn slot_width_us(&self) -> u64 {
        self.ptime_ms as u64 * 1_000
    }

    fn slot_index(&self, timestamp_us: u64) -> u64 {
        timestamp_us / self.slot_width_us()
    }

    /// **Align.** Place a contributor's frame into the slot whose center is
    /// within ±½ ptime of the frame's timestamp; late arrivals within a
    /// bounded holdoff window may still land in an already-started slot
    /// when FLC holdoffs are enabled (`spec.md` §4.7 "Align").
    pub fn align(&mut self, frame: ContributorFrame) {
        let idx = self.slot_index(frame.timestamp_us);
        let holdoff_slots = if self.flags.flc_holdoffs { 1 } else { 0 };

        if let Some(next) = self.next_emit_slot {
            if idx + holdoff_slots < next {
                // Too late even for the holdoff window; drop rather than
                // reopening an already-emitted slot.
                return;
            }
        }

        self.slots.entry(idx).or_default().frames.push(frame);
    }

    /// **Deduplicate.** Cross-correlate contributor frames pairwise within
    /// the slot; frames whose normalized correlation exceeds
    /// [`CORRELATION_THRESHOLD`] are collapsed to one, with an alignment
    /// marker recorded (`spec.md` §4.7 "Deduplicate").
    fn deduplicate_slot(&self, slot: &mut Slot) {
        if !self.flags.enable_deduplication || slot.frames.len() < 2 {
            return;
        }
        let mut kept: Vec<ContributorFrame> = Vec::with_capacity(slot.frames.len());
        for frame in slot.frames.drain(..) {
            let is_dup = kept
                .iter()
                .any(|k| normalized_correlation(&k.pcm, &frame.pcm) > CORRELATION_THRESHOLD);
            if is_dup {
                slot.alignment_marker = Some(frame.timestamp_us as i64);
            } else {
                kept.push(frame);
            }
        }
        slot.frames = kept;
    }

    /// **Merge.** Sum present contributor frames with saturating add;
    /// missing contributors are replaced by silence unless FLC is disabled
    /// (`spec.md` §4.7 "Merge").
    fn merge_slot(&self, slot: &Slot) -> Option<Vec<i16>> {
        if slot.frames.is_empty() {
            return if self.flags.flc_disable {
                None
            } else {
                Some(vec![0i16; self.frame_len()])
            };
        }
        let len = self.frame_len();
        let mut merged = vec![0i32; len];
        for frame in &slot.frames {
            for (i, &sample) in frame.pcm.iter().take(len).enumerate() {
                merged[i] = merged[i].saturating_add(sample as i32);
            }
        }
        Some(
            merged
                .into_iter()
                .map(|s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
                .collect(),
        )
    }

    fn frame_len(&self) -> usize {
        (self.ptime_ms as u64 * self.sample_rate_hz as u64 / 1_000) as usize
    }

    /// **Emit.** Process and remove the oldest slot whose window has fully
    /// closed, returning one packetized merged frame (`spec.md` §4.7 "Emit").
    /// Advances in lockstep for FTRT (`time_scale` already applied upstream)
    /// and AFAP (driven by caller-paced output production rather than wall
    /// clock) — both just call this once per produced slot.
    pub fn emit_next(&mut self) -> Option<(u64, Vec<i16>)> {
        let &idx = self.slots.keys().next()?;
        let mut slot = self.slots.remove(&idx).unwrap();
        self.deduplicate_slot(&mut slot);
        let merged = self.merge_slot(&slot);
        self.next_emit_slot = Some(idx + 1);
        merged.map(|m| (idx, m))
    }

    /// **Flush.** Drain every remaining slot to the group output, in order.
    /// Callers pass `disable_contributor_flush` semantics by simply not
    /// invoking this on per-contributor end, only on session/group flush
    /// (`spec.md` §4.7 "Flush").
    pub fn flush_all(&mut self) -> Vec<(u64, Vec<i16>)> {
        let mut out = Vec::new();
        while let Some(pair) = self.emit_next() {
            out.push(pair);
        }
        out
    }

    pub fn pending_slots(&self) -> usize {
        self.slots.len()
    }
}

/// Normalized cross-correlation (Pearson-like, zero-mean-free for
/// simplicity) between two equal-or-unequal-length PCM buffers, used to
/// detect near-duplicate contributor audio (`spec.md` §4.7 "Deduplicate").
fn normalized_correlation(a: &[i16], b: &[i16]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for i in 0..n {
        let x = a[i] as f64;
        let y = b[i] as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return if norm_a == norm_b { 1.0 } else { 0.0 };
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_places_frame_in_expected_slot() {
        let mut engine = StreamGroupEngine::new(20, 8_000, 2, GroupFlags::default());
        engine.align(ContributorFrame {
            contributor_index: 0,
            timestamp_us: 20_000, // slot 1 at 20ms ptime
            pcm: vec![100; 160],
        });
        assert_eq!(engine.pending_slots(), 1);
    }

    #[test]
    fn merge_sums_present_contributors() {
        let mut engine = StreamGroupEngine::new(20, 8_000, 2, GroupFlags::default());
        engine.align(ContributorFrame {
            contributor_index: 0,
            timestamp_us: 0,
            pcm: vec![100; 160],
        });
        engine.align(ContributorFrame {
            contributor_index: 1,
            timestamp_us: 0,
            pcm: vec![50; 160],
        });
        let (_, merged) = engine.emit_next().unwrap();
        assert_eq!(merged[0], 150);
    }

    #[test]
    fn missing_contributor_becomes_silence_unless_flc_disabled() {
        let mut engine = StreamGroupEngine::new(20, 8_000, 2, GroupFlags::default());
        // No frames aligned at all; emit_next should find nothing to do.
        assert!(engine.emit_next().is_none());
    }

    #[test]
    fn deduplication_collapses_correlated_frames() {
        let flags = GroupFlags {
            enable_deduplication: true,
            ..Default::default()
        };
        let mut engine = StreamGroupEngine::new(20, 8_000, 2, flags);
        engine.align(ContributorFrame {
            contributor_index: 0,
            timestamp_us: 0,
            pcm: vec![1000; 160],
        });
        engine.align(ContributorFrame {
            contributor_index: 1,
            timestamp_us: 0,
            pcm: vec![1000; 160], // identical -> correlation 1.0
        });
        let (_, merged) = engine.emit_next().unwrap();
        // Deduplicated to one contributor, so merged == the single frame, not 2x.
        assert_eq!(merged[0], 1000);
    }

    #[test]
    fn flush_all_drains_every_pending_slot() {
        let mut engine = StreamGroupEngine::new(20, 8_000, 1, GroupFlags::default());
        engine.align(ContributorFrame {
            contributor_index: 0,
            timestamp_us: 0,
            pcm: vec![1; 160],
        });
        engine.align(ContributorFrame {
            contributor_index: 0,
            timestamp_us: 20_000,
            pcm: vec![2; 160],
        });
        let drained = engine.flush_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(engine.pending_slots(), 0);
    }

    #[test]
    fn correlation_of_identical_signals_is_one() {
        let a = vec![10i16, 20, 30, 40];
        assert!((normalized_correlation(&a, &a) - 1.0).abs() < 1e-9);
    }
}
