//! Input/output boundary traits (`spec.md` §4.5, §4.8).
//!
//! [`PacketSource`] abstracts over pcap files, live captures, and
//! DER-encapsulated streams for the Push Pipeline; [`PacketSink`]
//! abstracts over pcap/wav/raw-bitstream outputs for the Pull Pipeline.
//! Grounded in the teacher's `transport::{udp, tcp}` modules, which keep
//! transport deliberately address-only and ignorant of session state — the
//! same separation applies here: sources/sinks move bytes, nothing more.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::EngineError;
use crate::packet::headers::LinkLayerKind;

/// One raw captured record: bytes plus capture metadata needed for pacing.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub data: Vec<u8>,
    /// Capture timestamp in microseconds since an arbitrary input-local epoch
    /// (`spec.md` §4.5 pacing gate: `pcap_timestamp - base_timestamp`).
    pub timestamp_us: u64,
    pub link_layer: LinkLayerKind,
}

/// A source of raw captured records (`spec.md` §4.5).
///
/// Implementors back the Push Pipeline's **input cache**: one record is
/// held until the caller has successfully dispatched it, so a transient
/// queue-full condition can retry without re-reading.
pub trait PacketSource: Send {
    /// Read the next record, or `Ok(None)` at end of stream.
    fn read_next(&mut self) -> Result<Option<RawRecord>, EngineError>;

    /// Whether this source rewinds on exhaustion (`-d` repeat-inputs flag).
    fn is_repeatable(&self) -> bool {
        false
    }

    /// Rewind to the start. Only called when [`Self::is_repeatable`] is true.
    fn rewind(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Logical name used for group-id derivation and packet-history labeling.
    fn logical_name(&self) -> &str;
}

/// A sink for processed output (`spec.md` §4.8): jitter-buffer-output
/// diagnostics, per-session transcoded output, or group merged output.
pub trait PacketSink: Send {
    /// Write one packet (already encoded for this sink's target format).
    fn write_packet(&mut self, payload: &[u8], timestamp_us: u64) -> Result<(), EngineError>;

    /// Flush and finalize (e.g. pcap file trailer, wav header backpatch).
    fn finalize(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// An in-memory [`PacketSource`] over pre-captured records, used by tests
/// and by the `--cut` truncated-run mode.
pub struct MemorySource {
    name: String,
    records: Vec<RawRecord>,
    cursor: usize,
    repeat: bool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, records: Vec<RawRecord>, repeat: bool) -> Self {
        MemorySource {
            name: name.into(),
            records,
            cursor: 0,
            repeat,
        }
    }
}

impl PacketSource for MemorySource {
    fn read_next(&mut self) -> Result<Option<RawRecord>, EngineError> {
        if self.cursor >= self.records.len() {
            return Ok(None);
        }
        let record = self.records[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(record))
    }

    fn is_repeatable(&self) -> bool {
        self.repeat
    }

    fn rewind(&mut self) -> Result<(), EngineError> {
        self.cursor = 0;
        Ok(())
    }

    fn logical_name(&self) -> &str {
        &self.name
    }
}

/// An in-memory [`PacketSink`] used by tests and by the pull pipeline's
/// in-process staging before a real file sink is opened.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub packets: Vec<(Vec<u8>, u64)>,
    pub finalized: bool,
}

impl PacketSink for MemorySink {
    fn write_packet(&mut self, payload: &[u8], timestamp_us: u64) -> Result<(), EngineError> {
        self.packets.push((payload.to_vec(), timestamp_us));
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), EngineError> {
        self.finalized = true;
        Ok(())
    }
}

/// Classic pcap magic number (native byte order); the swapped form
/// `0xd4c3b2a1` (`spec.md` §6) indicates the opposite endianness and is
/// rejected here rather than silently byte-swapped, since every capture this
/// engine is expected to read originates on a little-endian host.
const PCAP_MAGIC: u32 = 0xa1b2c3d4;

/// libpcap `LINKTYPE_*` values this engine understands (`spec.md` §6).
mod linktype {
    pub const ETHERNET: u32 = 1;
    pub const RAW: u32 = 101;
    pub const LINUX_SLL: u32 = 113;
}

fn linklayer_from_network(network: u32) -> LinkLayerKind {
    match network {
        linktype::ETHERNET => LinkLayerKind::Ethernet,
        linktype::LINUX_SLL => LinkLayerKind::LinuxSll,
        _ => LinkLayerKind::Raw,
    }
}

fn network_from_linklayer(link: LinkLayerKind) -> u32 {
    match link {
        LinkLayerKind::Ethernet => linktype::ETHERNET,
        LinkLayerKind::LinuxSll => linktype::LINUX_SLL,
        LinkLayerKind::Raw => linktype::RAW,
    }
}

/// A [`PacketSource`] reading classic-format pcap files (`spec.md` §6: magic
/// `0xa1b2c3d4`). pcapng and rtpdump formats are out of scope for this
/// reader; the teacher's own I/O layer is similarly one-format-per-type
/// rather than a universal demuxer.
pub struct PcapFileSource {
    name: String,
    reader: BufReader<File>,
    link_layer: LinkLayerKind,
    repeat: bool,
}

impl PcapFileSource {
    pub fn open(path: impl AsRef<Path>, repeat: bool) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EngineError::OutputOpenFailed(format!("{}: {e}", path.display())))?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; 24];
        reader
            .read_exact(&mut header)
            .map_err(|e| EngineError::OutputOpenFailed(format!("{}: truncated pcap header: {e}", path.display())))?;
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != PCAP_MAGIC {
            return Err(EngineError::OutputOpenFailed(format!(
                "{}: unrecognized pcap magic 0x{magic:08x}",
                path.display()
            )));
        }
        let network = u32::from_le_bytes(header[20..24].try_into().unwrap());

        Ok(PcapFileSource {
            name: path.display().to_string(),
            reader,
            link_layer: linklayer_from_network(network),
            repeat,
        })
    }
}

impl PacketSource for PcapFileSource {
    fn read_next(&mut self) -> Result<Option<RawRecord>, EngineError> {
        let mut record_header = [0u8; 16];
        match self.reader.read_exact(&mut record_header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(EngineError::Io(e)),
        }
        let ts_sec = u32::from_le_bytes(record_header[0..4].try_into().unwrap());
        let ts_usec = u32::from_le_bytes(record_header[4..8].try_into().unwrap());
        let incl_len = u32::from_le_bytes(record_header[8..12].try_into().unwrap()) as usize;

        let mut data = vec![0u8; incl_len];
        self.reader.read_exact(&mut data).map_err(EngineError::Io)?;

        Ok(Some(RawRecord {
            data,
            timestamp_us: ts_sec as u64 * 1_000_000 + ts_usec as u64,
            link_layer: self.link_layer,
        }))
    }

    fn is_repeatable(&self) -> bool {
        self.repeat
    }

    fn logical_name(&self) -> &str {
        &self.name
    }
}

/// A [`PacketSink`] writing classic-format pcap files.
pub struct PcapFileSink {
    writer: BufWriter<File>,
}

impl PcapFileSink {
    pub fn create(path: impl AsRef<Path>, link_layer: LinkLayerKind) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| EngineError::OutputOpenFailed(format!("{}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);

        let mut header = Vec::with_capacity(24);
        header.extend_from_slice(&PCAP_MAGIC.to_le_bytes());
        header.extend_from_slice(&2u16.to_le_bytes()); // version major
        header.extend_from_slice(&4u16.to_le_bytes()); // version minor
        header.extend_from_slice(&0i32.to_le_bytes()); // thiszone
        header.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        header.extend_from_slice(&65_535u32.to_le_bytes()); // snaplen
        header.extend_from_slice(&network_from_linklayer(link_layer).to_le_bytes());
        writer.write_all(&header).map_err(EngineError::Io)?;

        Ok(PcapFileSink { writer })
    }
}

impl PacketSink for PcapFileSink {
    fn write_packet(&mut self, payload: &[u8], timestamp_us: u64) -> Result<(), EngineError> {
        let ts_sec = (timestamp_us / 1_000_000) as u32;
        let ts_usec = (timestamp_us % 1_000_000) as u32;
        let incl_len = payload.len() as u32;

        let mut record_header = Vec::with_capacity(16);
        record_header.extend_from_slice(&ts_sec.to_le_bytes());
        record_header.extend_from_slice(&ts_usec.to_le_bytes());
        record_header.extend_from_slice(&incl_len.to_le_bytes());
        record_header.extend_from_slice(&incl_len.to_le_bytes());

        self.writer.write_all(&record_header).map_err(EngineError::Io)?;
        self.writer.write_all(payload).map_err(EngineError::Io)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), EngineError> {
        self.writer.flush().map_err(EngineError::Io)
    }
}
