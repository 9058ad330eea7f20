//! Pull Pipeline (`spec.md` §4.8, component C8).
//!
//! Three logical per-session queues — jitter-buffer-output,
//! transcoded-output, group-output — drained by `pull(session, queue,
//! flags)`: one packet at a time in timed modes, all available in untimed
//! modes. Output bytes are routed to a pcap/wav/bitstream [`PacketSink`];
//! the H.26x bitstream route reverses the teacher's `media::h264`
//! FU-A/single-NAL framing back into an Annex B byte stream.

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::EngineError;
use crate::io::PacketSink;

/// Which of a session's three output queues is being pulled
/// (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullQueueKind {
    JitterBufferOutput,
    TranscodedOutput,
    GroupOutput,
}

/// How many packets one `pull` call may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullMode {
    /// Timed modes: exactly one packet per cycle.
    Timed,
    /// Untimed (AFAP/analytics) modes: drain everything currently queued.
    Untimed,
}

/// One session's three output queues.
#[derive(Default)]
pub struct PullQueues {
    pub jitter_buffer_output: VecDeque<(Vec<u8>, u64)>,
    pub transcoded_output: VecDeque<(Vec<u8>, u64)>,
    pub group_output: VecDeque<(Vec<u8>, u64)>,
}

impl PullQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, kind: PullQueueKind) -> &mut VecDeque<(Vec<u8>, u64)> {
        match kind {
            PullQueueKind::JitterBufferOutput => &mut self.jitter_buffer_output,
            PullQueueKind::TranscodedOutput => &mut self.transcoded_output,
            PullQueueKind::GroupOutput => &mut self.group_output,
        }
    }

    pub fn push(&mut self, kind: PullQueueKind, payload: Vec<u8>, timestamp_us: u64) {
        self.queue_mut(kind).push_back((payload, timestamp_us));
    }

    pub fn is_empty(&self, kind: PullQueueKind) -> bool {
        match kind {
            PullQueueKind::JitterBufferOutput => self.jitter_buffer_output.is_empty(),
            PullQueueKind::TranscodedOutput => self.transcoded_output.is_empty(),
            PullQueueKind::GroupOutput => self.group_output.is_empty(),
        }
    }
}

/// Pull up to the mode-determined count of packets from one queue
/// (`spec.md` §4.8: "receiving up to N packets at a time — 1 in timed
/// modes, all-available in untimed").
pub fn pull(queues: &mut PullQueues, kind: PullQueueKind, mode: PullMode) -> Vec<(Vec<u8>, u64)> {
    let queue = queues.queue_mut(kind);
    match mode {
        PullMode::Timed => queue.pop_front().into_iter().collect(),
        PullMode::Untimed => queue.drain(..).collect(),
    }
}

/// Retry bound for arrival-timed stream-group pull (`spec.md` §4.8).
pub const MAX_PULL_RETRIES: u32 = 8;
pub const PULL_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Pull the group-output queue with the arrival-timed retry policy: if a
/// cycle where output was expected returns empty, sleep 1ms and retry up to
/// 8 times, counting each retry as a "missed interval" (`spec.md` §4.8).
pub fn pull_group_output_timed(
    queues: &mut PullQueues,
    missed_interval_count: &mut u64,
    mut sleep: impl FnMut(Duration),
) -> Vec<(Vec<u8>, u64)> {
    for attempt in 0..=MAX_PULL_RETRIES {
        let result = pull(queues, PullQueueKind::GroupOutput, PullMode::Timed);
        if !result.is_empty() {
            return result;
        }
        if attempt < MAX_PULL_RETRIES {
            *missed_interval_count += 1;
            sleep(PULL_RETRY_INTERVAL);
        }
    }
    Vec::new()
}

/// Output routing target for one session's pulled packets (`spec.md` §4.8).
pub enum OutputRoute<'a> {
    Pcap(&'a mut dyn PacketSink),
    Wav(&'a mut dyn PacketSink),
    BitstreamH26x(&'a mut dyn PacketSink),
}

/// Write one pulled packet to its routed sink. For the H.26x bitstream
/// route, `payload` is first reassembled from RTP framing (single-NAL or
/// FU-A) back into an Annex B NAL with a start code.
pub fn route_packet(route: &mut OutputRoute, payload: &[u8], timestamp_us: u64) -> Result<(), EngineError> {
    match route {
        OutputRoute::Pcap(sink) | OutputRoute::Wav(sink) => sink.write_packet(payload, timestamp_us),
        OutputRoute::BitstreamH26x(sink) => {
            if let Some(nal) = reassemble_h264_nal(payload) {
                let mut annex_b = vec![0, 0, 0, 1];
                annex_b.extend_from_slice(&nal);
                sink.write_packet(&annex_b, timestamp_us)
            } else {
                Ok(())
            }
        }
    }
}

/// Reverse of the teacher's `media::h264::H264Packetizer` framing: strips
/// the RTP payload header (single NAL unit, or FU-A fragment) and returns
/// the raw NAL bytes, or `None` for a fragment that isn't a FU-A start+end
/// (multi-packet reassembly is the caller's job — this handles one fragment
/// at a time per `spec.md` §4.8's "strips RTP fragmentation").
fn reassemble_h264_nal(rtp_payload: &[u8]) -> Option<Vec<u8>> {
    if rtp_payload.is_empty() {
        return None;
    }
    let nal_type = rtp_payload[0] & 0x1F;
    if nal_type == 28 {
        // FU-A: [FU indicator][FU header][fragment data...]
        if rtp_payload.len() < 2 {
            return None;
        }
        let fu_indicator = rtp_payload[0];
        let fu_header = rtp_payload[1];
        let nri = fu_indicator & 0x60;
        let original_type = fu_header & 0x1F;
        let start = fu_header & 0x80 != 0;
        if !start {
            // Only a start fragment carries enough to reconstruct a NAL
            // header standalone; continuation fragments are appended by
            // the caller's own reassembly buffer, out of scope here.
            return Some(rtp_payload[2..].to_vec());
        }
        let mut nal = vec![nri | original_type];
        nal.extend_from_slice(&rtp_payload[2..]);
        Some(nal)
    } else {
        Some(rtp_payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySink;

    #[test]
    fn timed_pull_takes_one_packet() {
        let mut queues = PullQueues::new();
        queues.push(PullQueueKind::JitterBufferOutput, vec![1], 0);
        queues.push(PullQueueKind::JitterBufferOutput, vec![2], 0);
        let pulled = pull(&mut queues, PullQueueKind::JitterBufferOutput, PullMode::Timed);
        assert_eq!(pulled.len(), 1);
        assert_eq!(queues.jitter_buffer_output.len(), 1);
    }

    #[test]
    fn untimed_pull_drains_everything() {
        let mut queues = PullQueues::new();
        queues.push(PullQueueKind::TranscodedOutput, vec![1], 0);
        queues.push(PullQueueKind::TranscodedOutput, vec![2], 0);
        let pulled = pull(&mut queues, PullQueueKind::TranscodedOutput, PullMode::Untimed);
        assert_eq!(pulled.len(), 2);
        assert!(queues.is_empty(PullQueueKind::TranscodedOutput));
    }

    #[test]
    fn group_pull_retries_and_counts_missed_intervals() {
        let mut queues = PullQueues::new();
        let mut missed = 0;
        let mut sleeps = 0;
        let result = pull_group_output_timed(&mut queues, &mut missed, |_| sleeps += 1);
        assert!(result.is_empty());
        assert_eq!(missed, MAX_PULL_RETRIES);
        assert_eq!(sleeps, MAX_PULL_RETRIES as usize);
    }

    #[test]
    fn group_pull_returns_immediately_once_available() {
        let mut queues = PullQueues::new();
        queues.push(PullQueueKind::GroupOutput, vec![9], 0);
        let mut missed = 0;
        let result = pull_group_output_timed(&mut queues, &mut missed, |_| {});
        assert_eq!(result.len(), 1);
        assert_eq!(missed, 0);
    }

    #[test]
    fn single_nal_route_passes_through_with_start_code() {
        let mut sink = MemorySink::default();
        let mut route = OutputRoute::BitstreamH26x(&mut sink);
        route_packet(&mut route, &[0x65, 0xAA, 0xBB], 0).unwrap();
        assert_eq!(sink.packets[0].0, vec![0, 0, 0, 1, 0x65, 0xAA, 0xBB]);
    }

    #[test]
    fn fu_a_start_fragment_reconstructs_nal_header() {
        let mut sink = MemorySink::default();
        let mut route = OutputRoute::BitstreamH26x(&mut sink);
        // FU indicator: NRI=0x60, type=28; FU header: start=1, type=5 (IDR)
        let payload = [0x7C, 0x85, 0xAA, 0xBB];
        route_packet(&mut route, &payload, 0).unwrap();
        assert_eq!(sink.packets[0].0[4], 0x65); // reconstructed NAL header
    }
}
