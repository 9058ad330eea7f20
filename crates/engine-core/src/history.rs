//! Packet-History Log & Analyzer (`spec.md` §4.9, component C9).
//!
//! Each worker appends a fixed-size [`HistoryRecord`] to its own
//! [`HistoryLog`] at push time and pull time; once a run ends, the logs are
//! merged and analyzed offline by the functions in this module: SSRC
//! discovery, optional collation, per-SSRC statistics, input-vs-output
//! correlation, and channel/group views. None of this runs on the hot path —
//! it mirrors the teacher's own post-run reporting shape (`output::Stats`)
//! but against per-packet history instead of aggregate counters.

use std::collections::{BTreeMap, VecDeque};

use crate::jitter::ContentFlags;

/// Default per-thread capacity (`spec.md` §4.9: "bounded ~300k records").
pub const DEFAULT_CAPACITY: usize = 300_000;

/// Whether a record was appended at push time (engine input) or pull time
/// (engine output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// One fixed-size packet-history entry.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub ssrc: u32,
    pub seq: u16,
    pub timestamp: u32,
    pub content_flags: ContentFlags,
    pub direction: Direction,
    pub channel: usize,
}

/// Bounded circular buffer of history records for one worker thread.
/// Oldest records are overwritten once `capacity` is reached, matching
/// "bounded ~300k records per thread" rather than growing unbounded over a
/// long-running capture.
pub struct HistoryLog {
    records: VecDeque<HistoryRecord>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        HistoryLog {
            records: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&mut self, record: HistoryRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.iter()
    }

    /// Merge several per-thread logs into one arrival-ordered sequence,
    /// preserving each log's internal order (`spec.md` §4.9, pre-analysis
    /// merge step — collation proper is a separate, optional pass below).
    pub fn merge<'a>(logs: impl IntoIterator<Item = &'a HistoryLog>) -> Vec<&'a HistoryRecord> {
        logs.into_iter().flat_map(|log| log.iter()).collect()
    }
}

/// One SSRC discovered within the look-ahead window, with its first-seen
/// sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsrcFirst {
    pub ssrc: u32,
    pub first_seq: u16,
}

/// SSRC discovery: scan the first `window` records (`spec.md` §4.9 step 1
/// default: 30), and for each distinct SSRC seen there, record the smallest
/// sequence number as its "first" packet. Streams that only start after the
/// window closes are still discovered, just not backdated.
pub fn discover_ssrcs(records: &[&HistoryRecord], window: usize) -> Vec<SsrcFirst> {
    let mut order: Vec<u32> = Vec::new();
    let mut mins: BTreeMap<u32, u16> = BTreeMap::new();
    for record in records.iter().take(window) {
        mins.entry(record.ssrc)
            .and_modify(|min| {
                if seq_is_smaller(record.seq, *min) {
                    *min = record.seq;
                }
            })
            .or_insert_with(|| {
                order.push(record.ssrc);
                record.seq
            });
    }
    order
        .into_iter()
        .map(|ssrc| SsrcFirst {
            ssrc,
            first_seq: mins[&ssrc],
        })
        .collect()
}

/// RFC 3550-style "is a smaller than b" comparison on 16-bit sequence space,
/// used only to pick a look-ahead window's minimum, not for ordering a full
/// stream (that needs the jitter buffer's extended sequence numbers).
fn seq_is_smaller(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// Collation (`spec.md` §4.9 step 2, optional): rearrange records by SSRC,
/// preserving each SSRC's relative arrival order.
pub fn collate_by_ssrc<'a>(records: &[&'a HistoryRecord]) -> BTreeMap<u32, Vec<&'a HistoryRecord>> {
    let mut by_ssrc: BTreeMap<u32, Vec<&HistoryRecord>> = BTreeMap::new();
    for &record in records {
        by_ssrc.entry(record.ssrc).or_default().push(record);
    }
    by_ssrc
}

/// Per-SSRC statistics (`spec.md` §4.9 step 3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SsrcStats {
    pub out_of_order: u32,
    pub duplicates: u32,
    pub missing: u32,
    pub max_consecutive_missing: u32,
    pub sid: u32,
    pub sid_reuse: u32,
    pub sid_nodata: u32,
    pub dtmf: u32,
    pub repaired_media: u32,
    pub repaired_sid: u32,
    pub wraps: u32,
}

/// Compute one SSRC's stats from its records in arrival order.
///
/// `ooo_window` bounds how far back a smaller sequence number is still
/// counted as out-of-order rather than a wrap or a stale retransmission
/// (`spec.md` §4.9: "ooo via ±window search").
pub fn ssrc_stats(records: &[&HistoryRecord], ooo_window: u16) -> SsrcStats {
    let mut stats = SsrcStats::default();
    if records.is_empty() {
        return stats;
    }

    let mut last_seq: Option<u16> = None;
    let mut seen_sorted: Vec<u16> = Vec::with_capacity(records.len());
    let mut consecutive_missing = 0u32;

    for record in records {
        let flags = record.content_flags;

        if flags.contains(ContentFlags::SID) {
            stats.sid += 1;
        }
        if flags.contains(ContentFlags::SID_REUSE) {
            stats.sid_reuse += 1;
        }
        if flags.contains(ContentFlags::SID_NODATA) {
            stats.sid_nodata += 1;
        }
        if flags.contains(ContentFlags::DTMF) {
            stats.dtmf += 1;
        }
        if flags.contains(ContentFlags::REPAIR) {
            if flags.intersects(ContentFlags::SID | ContentFlags::SID_REUSE | ContentFlags::SID_NODATA) {
                stats.repaired_sid += 1;
            } else {
                stats.repaired_media += 1;
            }
        }

        if let Some(prev) = last_seq {
            let delta = record.seq.wrapping_sub(prev) as i16;
            if delta == 0 && !flags.contains(ContentFlags::DTMF) {
                // Two consecutive identical seqs; DTMF events replay the
                // same seq across key-down/up and don't count.
                stats.duplicates += 1;
            } else if delta < 0 && (-delta as u16) <= ooo_window {
                stats.out_of_order += 1;
            } else if delta.unsigned_abs() > 0x8000 {
                stats.wraps += 1;
            }
        }
        last_seq = Some(record.seq);
        seen_sorted.push(record.seq);
    }

    seen_sorted.sort_unstable();
    seen_sorted.dedup();
    for window in seen_sorted.windows(2) {
        let gap = window[1].wrapping_sub(window[0]);
        if gap > 1 && gap < 0x8000 {
            let missing = (gap - 1) as u32;
            stats.missing += missing;
            consecutive_missing = consecutive_missing.max(missing);
        }
    }
    stats.max_consecutive_missing = consecutive_missing;

    stats
}

/// Result of correlating one input/output SSRC pair (`spec.md` §4.9 step 4).
#[derive(Debug, Clone, Default)]
pub struct CorrelationResult {
    pub dropped: Vec<u16>,
    pub duplicated: Vec<u16>,
    pub timestamp_mismatches: Vec<u16>,
}

/// Correlate one input stream's records against the corresponding output
/// stream's records, compensating for SID-reuse-synthesized frames (which
/// exist in the output but never arrived on the input, so they must not
/// count as spuriously duplicated).
pub fn correlate(input: &[&HistoryRecord], output: &[&HistoryRecord]) -> CorrelationResult {
    let mut input_seen: BTreeMap<u16, u32> = BTreeMap::new();
    let mut input_timestamp: BTreeMap<u16, u32> = BTreeMap::new();
    for record in input {
        *input_seen.entry(record.seq).or_insert(0) += 1;
        input_timestamp.insert(record.seq, record.timestamp);
    }

    let mut output_seen: BTreeMap<u16, u32> = BTreeMap::new();
    for record in output {
        if record.content_flags.contains(ContentFlags::SID_REUSE) {
            continue;
        }
        *output_seen.entry(record.seq).or_insert(0) += 1;
    }

    let mut result = CorrelationResult::default();
    for (&seq, &count) in &input_seen {
        match output_seen.get(&seq) {
            None => result.dropped.push(seq),
            Some(&out_count) if out_count > count => result.duplicated.push(seq),
            _ => {}
        }
    }
    for record in output {
        if record.content_flags.contains(ContentFlags::SID_REUSE) {
            continue;
        }
        if let Some(&in_ts) = input_timestamp.get(&record.seq) {
            if in_ts != record.timestamp && !result.timestamp_mismatches.contains(&record.seq) {
                result.timestamp_mismatches.push(record.seq);
            }
        }
    }
    result
}

/// Greedy 1:1 SSRC-group mapping between an input set and an output set
/// (`spec.md` §4.9 step 4): SSRCs present in both are paired directly;
/// anything left over is paired in first-seen order, covering the
/// transcoded-SSRC-rewrite case where the output SSRC differs from input.
pub fn map_ssrc_groups(input_ssrcs: &[u32], output_ssrcs: &[u32]) -> Vec<(u32, u32)> {
    let mut pairs = Vec::new();
    let mut remaining_out: Vec<u32> = output_ssrcs.to_vec();

    let mut leftover_in = Vec::new();
    for &in_ssrc in input_ssrcs {
        if let Some(pos) = remaining_out.iter().position(|&o| o == in_ssrc) {
            pairs.push((in_ssrc, remaining_out.remove(pos)));
        } else {
            leftover_in.push(in_ssrc);
        }
    }
    for (in_ssrc, out_ssrc) in leftover_in.into_iter().zip(remaining_out.into_iter()) {
        pairs.push((in_ssrc, out_ssrc));
    }
    pairs
}

/// Organized output views (`spec.md` §4.9 step 5).
#[derive(Debug, Clone, Default)]
pub struct HistoryViews {
    pub by_ssrc: BTreeMap<u32, SsrcStats>,
    pub by_channel: BTreeMap<usize, Vec<u32>>,
}

/// Build the by-SSRC and by-channel views over one direction's records.
pub fn organize(records: &[&HistoryRecord], ooo_window: u16) -> HistoryViews {
    let mut views = HistoryViews::default();
    let grouped = collate_by_ssrc(records);
    for (&ssrc, group) in &grouped {
        views.by_ssrc.insert(ssrc, ssrc_stats(group, ooo_window));
    }
    for &record in records {
        let entry = views.by_channel.entry(record.channel).or_default();
        if !entry.contains(&record.ssrc) {
            entry.push(record.ssrc);
        }
    }
    views
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(ssrc: u32, seq: u16, flags: ContentFlags, direction: Direction) -> HistoryRecord {
        HistoryRecord {
            ssrc,
            seq,
            timestamp: seq as u32 * 160,
            content_flags: flags,
            direction,
            channel: 0,
        }
    }

    #[test]
    fn circular_buffer_evicts_oldest_past_capacity() {
        let mut log = HistoryLog::new(2);
        log.append(rec(1, 1, ContentFlags::MEDIA, Direction::Input));
        log.append(rec(1, 2, ContentFlags::MEDIA, Direction::Input));
        log.append(rec(1, 3, ContentFlags::MEDIA, Direction::Input));
        assert_eq!(log.len(), 2);
        assert_eq!(log.iter().next().unwrap().seq, 2);
    }

    #[test]
    fn discover_ssrcs_within_window_records_smallest_seq() {
        let records = vec![
            rec(1, 5, ContentFlags::MEDIA, Direction::Input),
            rec(1, 3, ContentFlags::MEDIA, Direction::Input),
            rec(2, 10, ContentFlags::MEDIA, Direction::Input),
        ];
        let refs: Vec<&HistoryRecord> = records.iter().collect();
        let found = discover_ssrcs(&refs, 30);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], SsrcFirst { ssrc: 1, first_seq: 3 });
    }

    #[test]
    fn ssrc_stats_counts_missing_and_duplicates() {
        let records = vec![
            rec(1, 1, ContentFlags::MEDIA, Direction::Input),
            rec(1, 1, ContentFlags::MEDIA, Direction::Input), // duplicate
            rec(1, 4, ContentFlags::MEDIA, Direction::Input), // gap of 2 missing (2,3)
        ];
        let refs: Vec<&HistoryRecord> = records.iter().collect();
        let stats = ssrc_stats(&refs, 16);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.missing, 2);
        assert_eq!(stats.max_consecutive_missing, 2);
    }

    #[test]
    fn dtmf_duplicate_seq_is_not_counted() {
        let records = vec![
            rec(1, 1, ContentFlags::DTMF, Direction::Input),
            rec(1, 1, ContentFlags::DTMF, Direction::Input),
        ];
        let refs: Vec<&HistoryRecord> = records.iter().collect();
        let stats = ssrc_stats(&refs, 16);
        assert_eq!(stats.duplicates, 0);
    }

    #[test]
    fn sid_reuse_output_excluded_from_correlation_duplicates() {
        let input = vec![rec(1, 1, ContentFlags::MEDIA, Direction::Input)];
        let output = vec![
            rec(1, 1, ContentFlags::MEDIA, Direction::Output),
            rec(1, 1, ContentFlags::SID_REUSE, Direction::Output),
        ];
        let in_refs: Vec<&HistoryRecord> = input.iter().collect();
        let out_refs: Vec<&HistoryRecord> = output.iter().collect();
        let result = correlate(&in_refs, &out_refs);
        assert!(result.duplicated.is_empty());
        assert!(result.dropped.is_empty());
    }

    #[test]
    fn correlate_reports_dropped_and_duplicated() {
        let input = vec![
            rec(1, 1, ContentFlags::MEDIA, Direction::Input),
            rec(1, 2, ContentFlags::MEDIA, Direction::Input),
        ];
        let output = vec![
            rec(1, 1, ContentFlags::MEDIA, Direction::Output),
            rec(1, 1, ContentFlags::MEDIA, Direction::Output),
        ];
        let in_refs: Vec<&HistoryRecord> = input.iter().collect();
        let out_refs: Vec<&HistoryRecord> = output.iter().collect();
        let result = correlate(&in_refs, &out_refs);
        assert_eq!(result.dropped, vec![2]);
        assert_eq!(result.duplicated, vec![1]);
    }

    #[test]
    fn map_ssrc_groups_prefers_direct_match_then_leftover_order() {
        let pairs = map_ssrc_groups(&[10, 20], &[20, 99]);
        assert_eq!(pairs, vec![(20, 20), (10, 99)]);
    }

    #[test]
    fn organize_groups_by_ssrc_and_channel() {
        let records = vec![
            rec(1, 1, ContentFlags::MEDIA, Direction::Input),
            rec(2, 1, ContentFlags::MEDIA, Direction::Input),
        ];
        let refs: Vec<&HistoryRecord> = records.iter().collect();
        let views = organize(&refs, 16);
        assert_eq!(views.by_ssrc.len(), 2);
        assert_eq!(views.by_channel.len(), 1);
        assert_eq!(views.by_channel[&0].len(), 2);
    }
}
