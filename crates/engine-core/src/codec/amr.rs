//! Cat 1/2 — AMR compact and octet-aligned signatures (`spec.md` §4.2,
//! RFC 4867 §4.3/§4.4 framing, frame sizes per RFC 4867 Table 1a/b).

use super::{CodecType, DetectedCodec};

/// AMR-NB mode rows: (octet-aligned frame size incl. CMR+ToC, bitrate bps).
const AMR_NB_SIZES: &[(usize, u32)] = &[
    (13, 4_750),
    (14, 5_150),
    (16, 5_900),
    (18, 6_700),
    (20, 7_400),
    (21, 7_950),
    (27, 10_200),
    (32, 12_200),
    (6, 1_800), // SID
];

/// AMR-WB mode rows, same layout.
const AMR_WB_SIZES: &[(usize, u32)] = &[
    (18, 6_600),
    (24, 8_850),
    (27, 12_650),
    (31, 14_250),
    (37, 15_850),
    (41, 18_250),
    (47, 19_850),
    (51, 23_050),
    (59, 23_850),
    (7, 1_800), // SID
];

/// Bandwidth-efficient (compact) mode CMR/ToC lead bytes named in
/// `spec.md` §4.2: 0xF1/0x21 select AMR-NB, 0xF4/0x24 select AMR-WB.
fn compact_variant(lead: u8) -> Option<bool /* is_wb */> {
    match lead {
        0xF1 | 0x21 => Some(false),
        0xF4 | 0x24 => Some(true),
        _ => None,
    }
}

pub fn probe(payload: &[u8]) -> Option<DetectedCodec> {
    let lead = payload[0];

    if let Some(is_wb) = compact_variant(lead) {
        let bitrate = bitrate_from_size(payload.len(), is_wb);
        if bitrate > 0 {
            return Some(DetectedCodec {
                codec: if is_wb { CodecType::AmrWb } else { CodecType::AmrNb },
                bitrate_bps: bitrate,
                sample_rate_hz: if is_wb { 16_000 } else { 8_000 },
            });
        }
    }

    // Cat 2 — octet-aligned: CMR byte 0xF0 plus an exact size match against
    // one of the known frame tables (spec.md: "CMR = 0xF0 plus exact-size match").
    if lead == 0xF0 {
        if let Some(&(_, rate)) = AMR_NB_SIZES.iter().find(|&&(sz, _)| sz == payload.len()) {
            return Some(DetectedCodec {
                codec: CodecType::AmrNb,
                bitrate_bps: rate,
                sample_rate_hz: 8_000,
            });
        }
        if let Some(&(_, rate)) = AMR_WB_SIZES.iter().find(|&&(sz, _)| sz == payload.len()) {
            return Some(DetectedCodec {
                codec: CodecType::AmrWb,
                bitrate_bps: rate,
                sample_rate_hz: 16_000,
            });
        }
    }

    None
}

/// Bitrate lookup used both by the probe and by the SDP-hint fast path.
pub fn bitrate_from_size(payload_len: usize, is_wb: bool) -> u32 {
    let table = if is_wb { AMR_WB_SIZES } else { AMR_NB_SIZES };
    table
        .iter()
        .find(|&&(sz, _)| sz == payload_len)
        .map(|&(_, rate)| rate)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_nb_signature_detected() {
        let mut payload = vec![0xF1u8];
        payload.extend(vec![0; 31]); // total 32 -> 12.2kbps row
        let d = probe(&payload).unwrap();
        assert_eq!(d.codec, CodecType::AmrNb);
        assert_eq!(d.bitrate_bps, 12_200);
    }

    #[test]
    fn compact_wb_signature_detected() {
        let mut payload = vec![0xF4u8];
        payload.extend(vec![0; 46]); // total 47 -> 19.85kbps row
        let d = probe(&payload).unwrap();
        assert_eq!(d.codec, CodecType::AmrWb);
        assert_eq!(d.bitrate_bps, 19_850);
    }

    #[test]
    fn octet_aligned_exact_size_match() {
        let mut payload = vec![0xF0u8];
        payload.extend(vec![0; 13]); // total 14 -> AMR-NB 5.15kbps
        let d = probe(&payload).unwrap();
        assert_eq!(d.codec, CodecType::AmrNb);
        assert_eq!(d.bitrate_bps, 5_150);
    }

    #[test]
    fn octet_aligned_no_size_match_returns_none() {
        let mut payload = vec![0xF0u8];
        payload.extend(vec![0; 2]);
        assert!(probe(&payload).is_none());
    }

    #[test]
    fn unrelated_lead_byte_returns_none() {
        let payload = vec![0x12u8; 20];
        assert!(probe(&payload).is_none());
    }
}
