//! Termination endpoint and group-termination types (`spec.md` §3 "Session").

use std::net::Ipv4Addr;

use bitflags::bitflags;

use crate::codec::CodecType;
use crate::config::JitterBufferConfig;

bitflags! {
    /// Per-endpoint behavior flags (`spec.md` §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EndpointFlags: u16 {
        const DTX_ENABLE = 1 << 0;
        const SID_REPAIR = 1 << 1;
        const PACKET_REPAIR = 1 << 2;
        const OVERRUN_SYNC = 1 << 3;
        const OOO_HOLDOFF = 1 << 4;
        const DORMANT_SESSION_DETECTION = 1 << 5;
        const BIDIRECTIONAL_EXPECTED = 1 << 6;
    }
}

/// One of a session's two termination endpoints (ingress or egress).
#[derive(Debug, Clone)]
pub struct TerminationEndpoint {
    pub codec: CodecType,
    pub bitrate_bps: u32,
    pub sample_rate_in_hz: u32,
    pub sample_rate_decode_hz: u32,
    pub ptime_ms: u32,
    pub jitter_buffer: JitterBufferConfig,
    pub payload_type: u8,
    pub flags: EndpointFlags,
    pub addr: Ipv4Addr,
    pub port: u16,
}

/// Describes a stream group's merged-output encoding, owned by the group's
/// owner session (`spec.md` §3 "Session", "Stream Group").
#[derive(Debug, Clone)]
pub struct GroupTermination {
    pub codec: CodecType,
    pub sample_rate_hz: u32,
    pub ptime_ms: u32,
}

impl Default for GroupTermination {
    /// Default merged output: 20 ms, 8 kHz G.711 mu-law (`spec.md` §3).
    fn default() -> Self {
        GroupTermination {
            codec: CodecType::G711Mu,
            sample_rate_hz: 8_000,
            ptime_ms: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_termination_default_is_g711_20ms() {
        let gt = GroupTermination::default();
        assert_eq!(gt.codec, CodecType::G711Mu);
        assert_eq!(gt.sample_rate_hz, 8_000);
        assert_eq!(gt.ptime_ms, 20);
    }

    #[test]
    fn endpoint_flags_combine() {
        let flags = EndpointFlags::DTX_ENABLE | EndpointFlags::PACKET_REPAIR;
        assert!(flags.contains(EndpointFlags::DTX_ENABLE));
        assert!(flags.contains(EndpointFlags::PACKET_REPAIR));
        assert!(!flags.contains(EndpointFlags::OOO_HOLDOFF));
    }
}
