//! Packet Parser / Fragment Reassembler (`spec.md` §4.1, component C1).
//!
//! Decodes link/IP/UDP/RTP headers, reassembles IPv4 fragments, and
//! classifies the result with [`Classification`]. Non-IP frames and
//! malformed buffers are reported, never panicked on — parse failures are
//! counted by the caller (`crate::push`) rather than propagated as hard
//! errors, per `spec.md` §7.

pub mod dedup;
pub mod fragment;
pub mod headers;

use std::net::Ipv4Addr;

use bitflags::bitflags;

use crate::error::EngineError;
pub use dedup::{DuplicateWindow, PacketFingerprint};
pub use fragment::{FragmentKey, FragmentTable};
pub use headers::{ip_proto, LinkLayerKind, RtpHeader};

bitflags! {
    /// Classification bitmask returned by [`parse`] (`spec.md` §4.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Classification: u8 {
        const VALID = 1 << 0;
        const MALFORMED = 1 << 1;
        const FRAGMENT_SAVED = 1 << 2;
        const REASSEMBLED_AVAILABLE = 1 << 3;
        const DUPLICATE = 1 << 4;
    }
}

/// Transport-layer protocol observed above IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Other(u8),
}

/// Everything the rest of the pipeline needs from one parsed packet.
#[derive(Debug, Clone)]
pub struct PacketInfo {
    pub ip_version: u8,
    pub ip_header_len: usize,
    pub protocol: TransportProtocol,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub rtp: Option<RtpHeader>,
    /// Payload after the RTP header (if RTP was recognized), else after UDP/TCP header.
    pub payload_offset: usize,
    pub payload_len: usize,
    pub classification: Classification,
    /// IPv4 identification field; only meaningful when `FRAGMENT_SAVED` is
    /// set, where it is part of the fragment train's key.
    pub ip_identification: u16,
    /// Fragment offset in bytes; only meaningful when `FRAGMENT_SAVED` is set.
    pub ip_fragment_offset: u16,
    /// IPv4 "more fragments" flag; only meaningful when `FRAGMENT_SAVED` is set.
    pub ip_more_fragments: bool,
}

/// Parse one captured buffer. `link` selects how to find the IP header.
///
/// Returns `Ok(None)` for frames that are recognized-but-irrelevant (non-IP
/// link layer) rather than an error, matching `spec.md`'s "tagged non-IP and
/// ignored upstream" wording.
pub fn parse(buf: &[u8], link: LinkLayerKind) -> Result<Option<PacketInfo>, EngineError> {
    let Some(ip_offset) = headers::link_layer_payload_offset(buf, link) else {
        return Ok(None);
    };
    let ip_buf = &buf[ip_offset..];
    let ip = headers::parse_ipv4(ip_buf)?;

    let is_fragment = ip.flags_more_fragments || ip.fragment_offset != 0;
    if is_fragment {
        return Ok(Some(PacketInfo {
            ip_version: 4,
            ip_header_len: ip.header_len,
            protocol: transport_of(ip.protocol),
            src_addr: ip.src,
            dst_addr: ip.dst,
            src_port: 0,
            dst_port: 0,
            rtp: None,
            payload_offset: ip_offset + ip.header_len,
            payload_len: ip_buf.len().saturating_sub(ip.header_len),
            classification: Classification::VALID | Classification::FRAGMENT_SAVED,
            ip_identification: ip.identification,
            ip_fragment_offset: ip.fragment_offset,
            ip_more_fragments: ip.flags_more_fragments,
        }));
    }

    let l4_buf = &ip_buf[ip.header_len..];

    match ip.protocol {
        ip_proto::UDP => parse_udp_packet(&ip, ip_offset, l4_buf),
        ip_proto::TCP => Ok(Some(PacketInfo {
            ip_version: 4,
            ip_header_len: ip.header_len,
            protocol: TransportProtocol::Tcp,
            src_addr: ip.src,
            dst_addr: ip.dst,
            src_port: l4_buf.get(0..2).map(u16_be).unwrap_or(0),
            dst_port: l4_buf.get(2..4).map(u16_be).unwrap_or(0),
            rtp: None,
            payload_offset: ip_offset + ip.header_len,
            payload_len: l4_buf.len(),
            classification: Classification::VALID,
            ip_identification: 0,
            ip_fragment_offset: 0,
            ip_more_fragments: false,
        })),
        other => Ok(Some(PacketInfo {
            ip_version: 4,
            ip_header_len: ip.header_len,
            protocol: TransportProtocol::Other(other),
            src_addr: ip.src,
            dst_addr: ip.dst,
            src_port: 0,
            dst_port: 0,
            rtp: None,
            payload_offset: ip_offset + ip.header_len,
            payload_len: l4_buf.len(),
            classification: Classification::VALID,
            ip_identification: 0,
            ip_fragment_offset: 0,
            ip_more_fragments: false,
        })),
    }
}

fn u16_be(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn transport_of(proto: u8) -> TransportProtocol {
    match proto {
        ip_proto::TCP => TransportProtocol::Tcp,
        ip_proto::UDP => TransportProtocol::Udp,
        other => TransportProtocol::Other(other),
    }
}

fn parse_udp_packet(
    ip: &headers::Ipv4Header,
    ip_offset: usize,
    l4_buf: &[u8],
) -> Result<Option<PacketInfo>, EngineError> {
    let udp = headers::parse_udp(l4_buf)?;
    let udp_payload = &l4_buf[8..];

    // RTP is attempted only when payload length >= 12 and version field == 2
    // (spec.md 4.1). Anything else is still a valid UDP packet, just not RTP.
    let rtp = if udp_payload.len() >= 12 {
        headers::parse_rtp(udp_payload).ok()
    } else {
        None
    };

    let (payload_offset, payload_len) = match &rtp {
        Some(r) => (
            ip_offset + ip.header_len + 8 + r.header_len,
            udp_payload.len() - r.header_len,
        ),
        None => (ip_offset + ip.header_len + 8, udp_payload.len()),
    };

    Ok(Some(PacketInfo {
        ip_version: 4,
        ip_header_len: ip.header_len,
        protocol: TransportProtocol::Udp,
        src_addr: ip.src,
        dst_addr: ip.dst,
        src_port: udp.src_port,
        dst_port: udp.dst_port,
        rtp,
        payload_offset,
        payload_len,
        classification: Classification::VALID,
        ip_identification: 0,
        ip_fragment_offset: 0,
        ip_more_fragments: false,
    }))
}

/// Re-parse a reassembled IPv4 fragment train as a UDP datagram. The train
/// carries no IP header of its own — `src`/`dst` come from the fragment key
/// that identified the train — so this re-enters the RTP path exactly as
/// `parse_udp_packet` would for a packet that arrived whole (`spec.md` §4.1,
/// §9: reassembly feeds the same parser the unfragmented path uses).
pub fn parse_reassembled_udp(
    buf: &[u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Result<Option<PacketInfo>, EngineError> {
    let synthetic_ip = headers::Ipv4Header {
        header_len: 0,
        total_len: 0,
        identification: 0,
        flags_more_fragments: false,
        fragment_offset: 0,
        protocol: ip_proto::UDP,
        src,
        dst,
    };
    parse_udp_packet(&synthetic_ip, 0, buf)
}

/// Per-payload-type-size DTMF/no-data detection (`spec.md` §3, §4.5):
/// DTMF-event packets (payload size == 4) omit payload type from the
/// stream-key match; size-2 packets are "no-data"/"no-transmission" and
/// never create a session.
pub fn is_dtmf_event_payload(payload_len: usize) -> bool {
    payload_len == 4
}

pub fn is_no_data_payload(payload_len: usize) -> bool {
    payload_len == 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_udp_rtp_ethernet(pt: u8, seq: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 14];
        buf[12] = 0x08;
        buf[13] = 0x00;

        // IPv4 header, 20 bytes, no options.
        let udp_len = 8 + 12 + payload.len();
        let total_len = 20 + udp_len;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[9] = ip_proto::UDP;
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
    fn parses_full_ethernet_udp_rtp_packet() {
        let buf = build_udp_rtp_ethernet(0, 42, &[0xAA; 160]);
        let info = parse(&buf, LinkLayerKind::Ethernet).unwrap().unwrap();
        assert_eq!(info.protocol, TransportProtocol::Udp);
        assert_eq!(info.src_port, 5000);
        assert_eq!(info.dst_port, 6000);
        let rtp = info.rtp.unwrap();
        assert_eq!(rtp.payload_type, 0);
        assert_eq!(rtp.sequence, 42);
        assert_eq!(info.payload_len, 160);
        assert!(info.classification.contains(Classification::VALID));
    }

    #[test]
    fn non_ip_ethernet_returns_none() {
        let mut buf = vec![0u8; 32];
        buf[12] = 0x08;
        buf[13] = 0x06; // ARP
        assert!(parse(&buf, LinkLayerKind::Ethernet).unwrap().is_none());
    }

    #[test]
    fn dtmf_and_no_data_size_detection() {
        assert!(is_dtmf_event_payload(4));
        assert!(!is_dtmf_event_payload(5));
        assert!(is_no_data_payload(2));
        assert!(!is_no_data_payload(3));
    }
}
