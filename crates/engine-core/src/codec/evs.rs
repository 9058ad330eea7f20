//! Cat 4 — EVS (`spec.md` §4.2). Dispatches by payload size into a rate
//! table; the 13.2 kbps compact frame (33 bytes) collides with the AMR-NB
//! 12.2 kbps octet-aligned frame plus CMR byte, so this probe only fires
//! after the AMR cascade has passed on the payload, and further narrows the
//! hypothesis using the ToC header-type bit (`spec.md`: "inspecting the ToC
//! F-bit and CMR fields exposed by the codec payload-info probe").

use super::{CodecType, DetectedCodec};

/// EVS primary-mode compact frame sizes (20ms, bytes incl. ToC) to bitrate.
const EVS_SIZES: &[(usize, u32)] = &[
    (7, 2_800),
    (18, 7_200),
    (20, 8_000),
    (24, 9_600),
    (33, 13_200),
    (41, 16_400),
    (61, 24_400),
    (80, 32_000),
    (120, 48_000),
    (160, 64_000),
    (240, 96_000),
    (320, 128_000),
];

/// Header-full frames carry the EVS ToC's H-bit set (bit 7 of the first
/// byte); compact frames never set it. A header-full frame at a size this
/// probe recognizes is AMR-WB IO, not primary EVS, so decline.
fn is_header_full(lead: u8) -> bool {
    lead & 0x80 != 0
}

pub fn probe(payload: &[u8]) -> Option<DetectedCodec> {
    if is_header_full(payload[0]) {
        return None;
    }

    let (_, rate) = *EVS_SIZES.iter().find(|&&(sz, _)| sz == payload.len())?;

    Some(DetectedCodec {
        codec: CodecType::Evs,
        bitrate_bps: rate,
        sample_rate_hz: 16_000,
    })
}

pub fn bitrate_from_size(payload_len: usize) -> u32 {
    EVS_SIZES
        .iter()
        .find(|&&(sz, _)| sz == payload_len)
        .map(|&(_, rate)| rate)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_size_maps_to_rate() {
        let payload = vec![0x00u8; 20];
        let d = probe(&payload).unwrap();
        assert_eq!(d.codec, CodecType::Evs);
        assert_eq!(d.bitrate_bps, 8_000);
    }

    #[test]
    fn header_full_bit_declines_primary_hypothesis() {
        let mut payload = vec![0x80u8];
        payload.extend(vec![0u8; 19]);
        assert!(probe(&payload).is_none());
    }

    #[test]
    fn unmatched_size_returns_none() {
        let payload = vec![0x00u8; 3];
        assert!(probe(&payload).is_none());
    }

    #[test]
    fn colliding_size_33_resolves_via_header_bit() {
        let payload = vec![0x00u8; 33]; // compact, not header-full
        assert_eq!(probe(&payload).unwrap().codec, CodecType::Evs);
    }
}
