//! Per-endpoint jitter buffer (`spec.md` §3 "Jitter Buffer", §4.6 steps 1-3).
//!
//! A lazy sequence of `{seq, timestamp, payload}` slots keyed by an
//! RFC 3550 Appendix A.1-style *extended* sequence number (cycle count *
//! 65536 + wire seq), so 16-bit wraparound never confuses ordering.
//! Packets are accepted in any arrival order; [`JitterBuffer::release_next`]
//! emits them in strict sequence order, synthesizing a repair slot across
//! small gaps and reporting loss across large ones.

use std::collections::BTreeMap;

use crate::config::JitterBufferConfig;

bitflags::bitflags! {
    /// Per-packet content classification carried alongside jitter buffer
    /// slots into the packet-history log (`spec.md` §3 "Packet-history Record").
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContentFlags: u16 {
        const MEDIA = 1 << 0;
        const SID = 1 << 1;
        const SID_REUSE = 1 << 2;
        const SID_NODATA = 1 << 3;
        const DTMF = 1 << 4;
        const DTMF_END = 1 << 5;
        const REPAIR = 1 << 6;
    }
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub seq: u16,
    pub timestamp: u32,
    pub payload: Vec<u8>,
    pub content_flags: ContentFlags,
}

/// What [`JitterBuffer::release_next`] produced on one call.
#[derive(Debug, Clone)]
pub enum ReleaseEvent {
    /// A real packet, in order.
    Media(Slot),
    /// A synthesized repair packet filling a bounded gap.
    Repair { seq: u16 },
    /// A gap larger than the repair cap; reported as loss, not synthesized.
    Loss { from_seq: u16, count: u32 },
    /// Nothing eligible yet (buffer empty or waiting on target delay).
    Empty,
}

/// Outcome of [`JitterBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Accepted,
    /// Rejected: duplicate of an already-buffered or already-released packet
    /// within the RFC 7198 lookback window.
    Duplicate,
    /// Rejected: older than everything already released (arrived too late).
    TooOld,
}

/// Lazy, wrap-aware, per-endpoint jitter buffer.
pub struct JitterBuffer {
    config: JitterBufferConfig,
    slots: BTreeMap<u64, Slot>,
    last_seq: Option<u16>,
    cycles: u32,
    next_expected_ext: Option<u64>,
    released_count: u64,
    repaired_count: u64,
    lost_count: u64,
}

impl JitterBuffer {
    pub fn new(config: JitterBufferConfig) -> Self {
        JitterBuffer {
            config,
            slots: BTreeMap::new(),
            last_seq: None,
            cycles: 0,
            next_expected_ext: None,
            released_count: 0,
            repaired_count: 0,
            lost_count: 0,
        }
    }

    /// Extend a 16-bit wire sequence number into a monotonic u64, detecting
    /// wraparound the way RFC 3550 Appendix A.1's `update_seq` does: a large
    /// backward jump (> half the sequence space) means the counter wrapped.
    fn extend(&mut self, seq: u16) -> u64 {
        match self.last_seq {
            None => {
                self.last_seq = Some(seq);
                seq as u64
            }
            Some(last) => {
                if last > 0xC000 && seq < 0x4000 {
                    self.cycles += 1;
                }
                self.last_seq = Some(seq);
                (self.cycles as u64) * 65_536 + seq as u64
            }
        }
    }

    /// Insert one packet. Accepts out-of-order arrivals within the
    /// configured lookback; rejects duplicates and packets older than
    /// everything already released.
    pub fn insert(&mut self, seq: u16, timestamp: u32, payload: Vec<u8>, content_flags: ContentFlags) -> InsertOutcome {
        let ext = self.extend(seq);

        if let Some(next_expected) = self.next_expected_ext {
            if ext < next_expected {
                return InsertOutcome::TooOld;
            }
        }
        if self.slots.contains_key(&ext) {
            return InsertOutcome::Duplicate;
        }

        self.slots.insert(
            ext,
            Slot {
                seq,
                timestamp,
                payload,
                content_flags,
            },
        );
        if self.next_expected_ext.is_none() {
            self.next_expected_ext = Some(ext);
        }
        InsertOutcome::Accepted
    }

    /// Release the next eligible packet, synthesizing repair or reporting
    /// loss across gaps per `spec.md` §4.6 steps 2-3.
    pub fn release_next(&mut self) -> ReleaseEvent {
        let Some(next_expected) = self.next_expected_ext else {
            return ReleaseEvent::Empty;
        };

        if let Some(slot) = self.slots.remove(&next_expected) {
            self.next_expected_ext = Some(next_expected + 1);
            self.released_count += 1;
            return ReleaseEvent::Media(slot);
        }

        let Some(&smallest) = self.slots.keys().next() else {
            return ReleaseEvent::Empty;
        };
        let gap = smallest - next_expected;

        let max_repair = self.config.max_ptimes as u64;
        if gap <= max_repair {
            self.next_expected_ext = Some(next_expected + 1);
            self.repaired_count += 1;
            return ReleaseEvent::Repair {
                seq: (next_expected % 65_536) as u16,
            };
        }

        // Buffer occupancy at/over max delay: stop waiting on the hole and
        // jump to the next available packet, reporting the skipped span as
        // loss rather than synthesizing an unboundedly long repair run.
        if self.slots.len() as u64 >= self.config.max_ptimes as u64 {
            self.next_expected_ext = Some(smallest);
            self.lost_count += gap;
            return ReleaseEvent::Loss {
                from_seq: (next_expected % 65_536) as u16,
                count: gap as u32,
            };
        }

        ReleaseEvent::Empty
    }

    pub fn occupancy(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> (u64, u64, u64) {
        (self.released_count, self.repaired_count, self.lost_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> JitterBufferConfig {
        JitterBufferConfig::default()
    }

    #[test]
    fn out_of_order_arrival_still_emits_in_order() {
        let mut jb = JitterBuffer::new(cfg());
        jb.insert(2, 200, vec![2], ContentFlags::MEDIA);
        jb.insert(1, 100, vec![1], ContentFlags::MEDIA);
        jb.insert(3, 300, vec![3], ContentFlags::MEDIA);

        let first = jb.release_next();
        assert!(matches!(first, ReleaseEvent::Media(Slot { seq: 1, .. })));
        let second = jb.release_next();
        assert!(matches!(second, ReleaseEvent::Media(Slot { seq: 2, .. })));
        let third = jb.release_next();
        assert!(matches!(third, ReleaseEvent::Media(Slot { seq: 3, .. })));
    }

    #[test]
    fn duplicate_seq_rejected() {
        let mut jb = JitterBuffer::new(cfg());
        assert_eq!(
            jb.insert(1, 100, vec![1], ContentFlags::MEDIA),
            InsertOutcome::Accepted
        );
        assert_eq!(
            jb.insert(1, 100, vec![1], ContentFlags::MEDIA),
            InsertOutcome::Duplicate
        );
    }

    #[test]
    fn small_gap_synthesizes_repair() {
        let mut jb = JitterBuffer::new(cfg()); // max_ptimes default 7
        jb.insert(1, 100, vec![1], ContentFlags::MEDIA);
        jb.insert(3, 300, vec![3], ContentFlags::MEDIA); // gap of 1 at seq 2
        assert!(matches!(
            jb.release_next(),
            ReleaseEvent::Media(Slot { seq: 1, .. })
        ));
        assert!(matches!(jb.release_next(), ReleaseEvent::Repair { seq: 2 }));
        assert!(matches!(
            jb.release_next(),
            ReleaseEvent::Media(Slot { seq: 3, .. })
        ));
    }

    #[test]
    fn sequence_wraparound_handled() {
        let mut jb = JitterBuffer::new(cfg());
        jb.insert(65_535, 100, vec![1], ContentFlags::MEDIA);
        jb.insert(0, 200, vec![2], ContentFlags::MEDIA);
        assert!(matches!(
            jb.release_next(),
            ReleaseEvent::Media(Slot { seq: 65_535, .. })
        ));
        assert!(matches!(
            jb.release_next(),
            ReleaseEvent::Media(Slot { seq: 0, .. })
        ));
    }

    #[test]
    fn too_old_packet_rejected_after_release() {
        let mut jb = JitterBuffer::new(cfg());
        jb.insert(1, 100, vec![1], ContentFlags::MEDIA);
        jb.release_next();
        assert_eq!(
            jb.insert(1, 100, vec![1], ContentFlags::MEDIA),
            InsertOutcome::TooOld
        );
    }

    #[test]
    fn empty_buffer_returns_empty_event() {
        let mut jb = JitterBuffer::new(cfg());
        assert!(matches!(jb.release_next(), ReleaseEvent::Empty));
    }
}
