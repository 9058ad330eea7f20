//! Codec Auto-Detector (`spec.md` §4.2, component C2).
//!
//! Estimates codec type and bitrate from one RTP payload: static payload
//! types are looked up directly; dynamic payload types are run through a
//! cascade of size/bit-pattern heuristics (video NAL probe, AMR compact,
//! AMR octet-aligned, EVS), with an SDP hint able to short-circuit straight
//! to a bitrate computation. Mirrors the teacher's codec-module layout in
//! `media/{h264,h265}.rs` — there a *packetizer* per codec, here a
//! *detector* per codec family, sharing this module's top-level dispatch.

pub mod amr;
pub mod evs;
pub mod video;

use crate::sdp::RtpMapEntry;

/// Codec family identified for one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    G711Mu,
    G711A,
    G729,
    G726,
    G723,
    L16,
    AmrNb,
    AmrWb,
    Evs,
    H264,
    H265,
    Unknown,
}

/// Result of one detection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedCodec {
    pub codec: CodecType,
    pub bitrate_bps: u32,
    pub sample_rate_hz: u32,
}

impl DetectedCodec {
    fn unknown() -> Self {
        DetectedCodec {
            codec: CodecType::Unknown,
            bitrate_bps: 0,
            sample_rate_hz: 0,
        }
    }
}

/// Static (IANA-assigned) RTP payload types with deterministic codec/rate
/// (`spec.md` §4.2, RFC 3551 §6).
fn static_payload_type(pt: u8, payload_len: usize) -> Option<DetectedCodec> {
    match pt {
        0 => Some(DetectedCodec {
            codec: CodecType::G711Mu,
            bitrate_bps: 64_000,
            sample_rate_hz: 8_000,
        }),
        8 => Some(DetectedCodec {
            codec: CodecType::G711A,
            bitrate_bps: 64_000,
            sample_rate_hz: 8_000,
        }),
        18 => Some(DetectedCodec {
            codec: CodecType::G729,
            bitrate_bps: 8_000,
            sample_rate_hz: 8_000,
        }),
        4 => Some(DetectedCodec {
            codec: CodecType::G723,
            bitrate_bps: if payload_len <= 20 { 5_300 } else { 6_300 },
            sample_rate_hz: 8_000,
        }),
        2 => Some(DetectedCodec {
            codec: CodecType::G726,
            bitrate_bps: g726_rate_from_size(payload_len),
            sample_rate_hz: 8_000,
        }),
        11 => Some(DetectedCodec {
            codec: CodecType::L16,
            // RFC 3551 assumes a 2048 Hz reference sample rate for PT 11 (L16, mono).
            bitrate_bps: 2048 * 16,
            sample_rate_hz: 2048,
        }),
        _ => None,
    }
}

/// G.726 packs 2/3/4/5 bits/sample depending on rate (16/24/32/40 kbps);
/// with a fixed 20ms ptime that maps directly onto payload size in bytes.
fn g726_rate_from_size(payload_len: usize) -> u32 {
    match payload_len {
        0..=40 => 16_000,
        41..=60 => 24_000,
        61..=80 => 32_000,
        _ => 40_000,
    }
}

/// Detect the codec for one RTP payload (`spec.md` §4.2).
///
/// `sdp_hint`, when present, pins the codec type from an already-parsed
/// `a=rtpmap`/`a=fmtp` pair; in that case this function only computes
/// bitrate, never re-runs the heuristic cascade (idempotent, per-spec).
pub fn detect(payload_type: u8, payload: &[u8], sdp_hint: Option<&RtpMapEntry>) -> DetectedCodec {
    if let Some(hint) = sdp_hint {
        return bitrate_for_hint(hint, payload.len());
    }

    if let Some(known) = static_payload_type(payload_type, payload.len()) {
        return known;
    }

    if payload.len() < 2 {
        return DetectedCodec::unknown();
    }

    // Cat 0: video probe, only attempted for payloads with room for a NAL header
    // plus a few bytes of lookahead for escape-sequence disambiguation.
    if payload.len() >= 10 {
        if let Some(video) = video::probe(payload) {
            return video;
        }
    }

    // Cat 1/2: AMR compact and octet-aligned signatures.
    if let Some(amr) = amr::probe(payload) {
        return amr;
    }

    // Cat 4: EVS, dispatched by payload size with ToC/CMR disambiguation.
    if let Some(evs) = evs::probe(payload) {
        return evs;
    }

    DetectedCodec::unknown()
}

fn bitrate_for_hint(hint: &RtpMapEntry, payload_len: usize) -> DetectedCodec {
    let codec = codec_type_from_name(&hint.codec_name);
    let bitrate_bps = match codec {
        CodecType::G711Mu | CodecType::G711A => 64_000,
        CodecType::G729 => 8_000,
        CodecType::G723 => {
            if payload_len <= 20 {
                5_300
            } else {
                6_300
            }
        }
        CodecType::G726 => g726_rate_from_size(payload_len),
        CodecType::L16 => hint.clock_rate_hz * 16,
        CodecType::AmrNb => amr::bitrate_from_size(payload_len, false),
        CodecType::AmrWb => amr::bitrate_from_size(payload_len, true),
        CodecType::Evs => evs::bitrate_from_size(payload_len),
        _ => 0,
    };
    DetectedCodec {
        codec,
        bitrate_bps,
        sample_rate_hz: hint.clock_rate_hz,
    }
}

fn codec_type_from_name(name: &str) -> CodecType {
    match name.to_ascii_uppercase().as_str() {
        "PCMU" => CodecType::G711Mu,
        "PCMA" => CodecType::G711A,
        "G729" => CodecType::G729,
        "G726-32" | "G726" => CodecType::G726,
        "G723" => CodecType::G723,
        "L16" => CodecType::L16,
        "AMR" => CodecType::AmrNb,
        "AMR-WB" => CodecType::AmrWb,
        "EVS" => CodecType::Evs,
        "H264" => CodecType::H264,
        "H265" => CodecType::H265,
        _ => CodecType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_g711u_is_deterministic() {
        let d = detect(0, &[0xFF; 160], None);
        assert_eq!(d.codec, CodecType::G711Mu);
        assert_eq!(d.bitrate_bps, 64_000);
    }

    #[test]
    fn static_g729_is_deterministic() {
        let d = detect(18, &[0x00; 10], None);
        assert_eq!(d.codec, CodecType::G729);
    }

    #[test]
    fn sdp_hint_short_circuits_heuristics() {
        let hint = RtpMapEntry {
            payload_type: 96,
            codec_name: "AMR-WB".to_string(),
            clock_rate_hz: 16_000,
        };
        let d = detect(96, &[0xF1, 0x00, 0x00, 0x00, 0x00, 0x00], Some(&hint));
        assert_eq!(d.codec, CodecType::AmrWb);
    }

    #[test]
    fn unknown_dynamic_payload_returns_none() {
        // Size doesn't correspond to any AMR/EVS/video table entry.
        let d = detect(99, &[0x00; 3], None);
        assert_eq!(d.codec, CodecType::Unknown);
    }

    #[test]
    fn g726_rate_from_size_buckets() {
        assert_eq!(g726_rate_from_size(40), 16_000);
        assert_eq!(g726_rate_from_size(60), 24_000);
        assert_eq!(g726_rate_from_size(80), 32_000);
        assert_eq!(g726_rate_from_size(100), 40_000);
    }
}
