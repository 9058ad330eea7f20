//! Link/IP/UDP/RTP header parsing.
//!
//! Mirrors the wire-diagram-commented, explicit byte-offset style of the
//! teacher's `media::rtp::RtpHeader` (there, a *builder*; here, a *parser*).

use std::net::Ipv4Addr;

use crate::error::{EngineError, InvalidPacketKind};

/// Link-layer framing of a captured buffer, needed to find the IP header offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayerKind {
    /// No link layer; buffer starts at the IP header (rtpdump-style captures).
    Raw,
    /// Standard 14-byte Ethernet II header.
    Ethernet,
    /// Linux "cooked" capture header (16 bytes), used for `any` interface captures.
    LinuxSll,
}

impl LinkLayerKind {
    fn header_len(self) -> usize {
        match self {
            LinkLayerKind::Raw => 0,
            LinkLayerKind::Ethernet => 14,
            LinkLayerKind::LinuxSll => 16,
        }
    }
}

/// Parsed IPv4 header fields relevant to fragment reassembly and transport dispatch.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header {
    pub header_len: usize,
    pub total_len: u16,
    pub identification: u16,
    pub flags_more_fragments: bool,
    pub fragment_offset: u16,
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// IP protocol numbers the engine cares about.
pub mod ip_proto {
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// Ethernet frame types; anything else is tagged non-IP and ignored upstream
/// (`spec.md` §4.1: "ARP, 802.2 LLC, Wireshark capture meta").
const ETHERTYPE_IPV4: u16 = 0x0800;

/// Parse the Ethernet (or other link-layer) header and return the offset of
/// the payload (IP header) within `buf`, or `None` if this is a non-IP frame.
pub fn link_layer_payload_offset(buf: &[u8], link: LinkLayerKind) -> Option<usize> {
    let header_len = link.header_len();
    if buf.len() < header_len {
        return None;
    }
    match link {
        LinkLayerKind::Ethernet => {
            if buf.len() < 14 {
                return None;
            }
            let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
            if ethertype != ETHERTYPE_IPV4 {
                return None;
            }
            Some(header_len)
        }
        LinkLayerKind::LinuxSll => {
            if buf.len() < 16 {
                return None;
            }
            let ethertype = u16::from_be_bytes([buf[14], buf[15]]);
            if ethertype != ETHERTYPE_IPV4 {
                return None;
            }
            Some(header_len)
        }
        LinkLayerKind::Raw => Some(0),
    }
}

/// Parse an IPv4 header starting at `buf[0]`.
pub fn parse_ipv4(buf: &[u8]) -> Result<Ipv4Header, EngineError> {
    if buf.len() < 20 {
        return Err(EngineError::InvalidPacket {
            kind: InvalidPacketKind::Truncated,
        });
    }
    let version = buf[0] >> 4;
    if version != 4 {
        return Err(EngineError::InvalidPacket {
            kind: InvalidPacketKind::Truncated,
        });
    }
    let ihl = (buf[0] & 0x0F) as usize * 4;
    if ihl < 20 || buf.len() < ihl {
        return Err(EngineError::InvalidPacket {
            kind: InvalidPacketKind::Truncated,
        });
    }
    let total_len = u16::from_be_bytes([buf[2], buf[3]]);
    let identification = u16::from_be_bytes([buf[4], buf[5]]);
    let flags_and_offset = u16::from_be_bytes([buf[6], buf[7]]);
    let flags_more_fragments = (flags_and_offset & 0x2000) != 0;
    let fragment_offset = (flags_and_offset & 0x1FFF) * 8;
    let protocol = buf[9];
    let src = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
    let dst = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);

    Ok(Ipv4Header {
        header_len: ihl,
        total_len,
        identification,
        flags_more_fragments,
        fragment_offset,
        protocol,
        src,
        dst,
    })
}

/// Parsed UDP header.
#[derive(Debug, Clone, Copy)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
}

/// Parse a UDP header starting at `buf[0]`.
pub fn parse_udp(buf: &[u8]) -> Result<UdpHeader, EngineError> {
    if buf.len() < 8 {
        return Err(EngineError::InvalidPacket {
            kind: InvalidPacketKind::Truncated,
        });
    }
    Ok(UdpHeader {
        src_port: u16::from_be_bytes([buf[0], buf[1]]),
        dst_port: u16::from_be_bytes([buf[2], buf[3]]),
        length: u16::from_be_bytes([buf[4], buf[5]]),
    })
}

/// Parsed RTP fixed header (RFC 3550 §5.1). See `crate::codec` for payload
/// classification and `crate::packet` for the classification bitmask this
/// feeds into.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Byte offset of the payload within the buffer passed to `parse_rtp`.
    pub header_len: usize,
}

/// Parse an RTP fixed header. Per `spec.md` §4.1, RTP parsing is attempted
/// only when the UDP payload length is >= 12 and the putative version field
/// reads 2; this function performs that check and returns
/// `InvalidPacketKind::BadRtpVersion` otherwise so the caller can fall back
/// to "unhandled RTP" counting rather than treating it as a hard parse error.
pub fn parse_rtp(buf: &[u8]) -> Result<RtpHeader, EngineError> {
    if buf.len() < 12 {
        return Err(EngineError::InvalidPacket {
            kind: InvalidPacketKind::Truncated,
        });
    }
    let version = buf[0] >> 6;
    if version != 2 {
        return Err(EngineError::InvalidPacket {
            kind: InvalidPacketKind::BadRtpVersion,
        });
    }
    let padding = (buf[0] & 0x20) != 0;
    let extension = (buf[0] & 0x10) != 0;
    let csrc_count = buf[0] & 0x0F;
    let marker = (buf[1] & 0x80) != 0;
    let payload_type = buf[1] & 0x7F;
    let sequence = u16::from_be_bytes([buf[2], buf[3]]);
    let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    let mut header_len = 12 + 4 * csrc_count as usize;
    if extension {
        if buf.len() < header_len + 4 {
            return Err(EngineError::InvalidPacket {
                kind: InvalidPacketKind::Truncated,
            });
        }
        let ext_len_words = u16::from_be_bytes([buf[header_len + 2], buf[header_len + 3]]) as usize;
        header_len += 4 + ext_len_words * 4;
    }
    if header_len == 0 || buf.len() < header_len {
        return Err(EngineError::InvalidPacket {
            kind: InvalidPacketKind::BadRtpHeaderLength,
        });
    }

    Ok(RtpHeader {
        version,
        padding,
        extension,
        csrc_count,
        marker,
        payload_type,
        sequence,
        timestamp,
        ssrc,
        header_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_rtp(pt: u8, seq: u16, ssrc: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf[0] = 2 << 6;
        buf[1] = pt & 0x7F;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&0u32.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf
    }

    #[test]
    fn parses_basic_rtp_header() {
        let buf = make_rtp(0, 1000, 0xdeadbeef);
        let hdr = parse_rtp(&buf).unwrap();
        assert_eq!(hdr.version, 2);
        assert_eq!(hdr.payload_type, 0);
        assert_eq!(hdr.sequence, 1000);
        assert_eq!(hdr.ssrc, 0xdeadbeef);
        assert_eq!(hdr.header_len, 12);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut buf = make_rtp(0, 1, 1);
        buf[0] = 1 << 6;
        let err = parse_rtp(&buf).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidPacket {
                kind: InvalidPacketKind::BadRtpVersion
            }
        ));
    }

    #[test]
    fn rejects_truncated() {
        let buf = [0u8; 4];
        assert!(parse_rtp(&buf).is_err());
    }

    #[test]
    fn csrc_extends_header() {
        let mut buf = make_rtp(0, 1, 1);
        buf[0] |= 0x02; // CC = 2
        buf.extend_from_slice(&[0u8; 8]);
        let hdr = parse_rtp(&buf).unwrap();
        assert_eq!(hdr.csrc_count, 2);
        assert_eq!(hdr.header_len, 20);
    }

    #[test]
    fn ethernet_ipv4_offset() {
        let mut buf = vec![0u8; 16];
        buf[12] = 0x08;
        buf[13] = 0x00;
        assert_eq!(
            link_layer_payload_offset(&buf, LinkLayerKind::Ethernet),
            Some(14)
        );
    }

    #[test]
    fn ethernet_non_ip_rejected() {
        let mut buf = vec![0u8; 16];
        buf[12] = 0x08;
        buf[13] = 0x06; // ARP
        assert_eq!(link_layer_payload_offset(&buf, LinkLayerKind::Ethernet), None);
    }
}
