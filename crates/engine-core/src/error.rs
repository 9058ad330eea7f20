//! Error types for the RTP media processing engine.
//!
//! Variants map 1:1 to the error kinds enumerated by the engine's error
//! handling design:
//!
//! - **Parse-time**: [`InvalidPacket`](Self::InvalidPacket),
//!   [`FragmentIncomplete`](Self::FragmentIncomplete),
//!   [`DuplicatePacket`](Self::DuplicatePacket) — counted and discarded by
//!   the caller, never propagated out of the packet parser.
//! - **Codec**: [`UnknownCodec`](Self::UnknownCodec),
//!   [`CodecCreateFailed`](Self::CodecCreateFailed).
//! - **Session/registry**: [`SessionTableFull`](Self::SessionTableFull),
//!   [`ReservedPort`](Self::ReservedPort),
//!   [`DisallowedPayloadType`](Self::DisallowedPayloadType),
//!   [`SDPPayloadTypeNotDeclared`](Self::SDPPayloadTypeNotDeclared),
//!   [`StreamTerminatedByBye`](Self::StreamTerminatedByBye).
//! - **Queues**: [`QueueFull`](Self::QueueFull), [`QueueTimeout`](Self::QueueTimeout).
//! - **Input/output**: [`InputExhausted`](Self::InputExhausted),
//!   [`InputRepeatable`](Self::InputRepeatable),
//!   [`InputReadError`](Self::InputReadError),
//!   [`OutputOpenFailed`](Self::OutputOpenFailed).
//! - **Scheduling**: [`ThreadPreempted`](Self::ThreadPreempted).
//! - **Fatal**: [`CriticalInit`](Self::CriticalInit).
use std::fmt;

/// Errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Packet failed structural validation (bad IP/UDP/RTP header).
    #[error("invalid packet: {kind}")]
    InvalidPacket { kind: InvalidPacketKind },

    /// Codec auto-detection could not classify the payload.
    #[error("unknown codec for payload type {payload_type} (size {payload_len})")]
    UnknownCodec { payload_type: u8, payload_len: usize },

    /// Stream Key Registry table is at capacity; no new session can be created.
    #[error("stream key registry full (capacity {capacity})")]
    SessionTableFull { capacity: usize },

    /// A per-session push or pull queue is full.
    #[error("queue full for session {session_handle}")]
    QueueFull { session_handle: u64 },

    /// A bounded wait for queue space/data elapsed.
    #[error("queue operation timed out for session {session_handle}")]
    QueueTimeout { session_handle: u64 },

    /// An input stream has no more records and is not in repeat mode.
    #[error("input stream {stream_id} exhausted")]
    InputExhausted { stream_id: u32 },

    /// An input stream was exhausted but is configured to rewind.
    #[error("input stream {stream_id} exhausted, rewinding")]
    InputRepeatable { stream_id: u32 },

    /// Underlying I/O error reading an input stream.
    #[error("input read error on stream {stream_id}: {source}")]
    InputReadError {
        stream_id: u32,
        #[source]
        source: std::io::Error,
    },

    /// An IPv4 fragment train has not been fully reassembled.
    #[error("incomplete fragment train for id {fragment_id}")]
    FragmentIncomplete { fragment_id: u32 },

    /// A packet was identified as a duplicate of one already processed.
    #[error("duplicate packet (seq {seq})")]
    DuplicatePacket { seq: u16 },

    /// A UDP/TCP packet arrived on a port reserved for SIP/SAP signaling.
    #[error("reserved port {port} used for media traffic")]
    ReservedPort { port: u16 },

    /// RTP payload type is not permitted by current session configuration.
    #[error("disallowed payload type {payload_type}")]
    DisallowedPayloadType { payload_type: u8 },

    /// Dynamic session creation requires SDP info for this payload type but none is present.
    #[error("payload type {payload_type} not declared in SDP")]
    SDPPayloadTypeNotDeclared { payload_type: u8 },

    /// Codec construction failed during dynamic session creation.
    #[error("codec create failed for payload type {payload_type}: {reason}")]
    CodecCreateFailed { payload_type: u8, reason: String },

    /// Failed to open an output sink (pcap/wav/bitstream file).
    #[error("failed to open output: {0}")]
    OutputOpenFailed(String),

    /// The stream was terminated by a SIP BYE message.
    #[error("stream terminated by BYE: {stream_id}")]
    StreamTerminatedByBye { stream_id: u32 },

    /// No session exists for the given handle, or it is past `DELETED`.
    #[error("no such session: {handle}")]
    SessionNotFound { handle: u64 },

    /// A worker thread missed its scheduling budget.
    #[error("worker thread {worker_id} preempted for {elapsed_ms}ms")]
    ThreadPreempted { worker_id: usize, elapsed_ms: u64 },

    /// Unrecoverable initialization failure (e.g. no usable input).
    #[error("critical initialization failure: {0}")]
    CriticalInit(String),

    /// Underlying I/O error not otherwise classified above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Specific kind of structural packet-parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPacketKind {
    /// Buffer shorter than the minimum Ethernet+IP+UDP header size.
    Truncated,
    /// RTP version field is not 2.
    BadRtpVersion,
    /// RTP header length computed as zero or negative.
    BadRtpHeaderLength,
    /// UDP/RTP payload length is zero.
    EmptyPayload,
    /// RTP payload type is negative/out of the 7-bit range.
    BadPayloadType,
    /// Non-IP link-layer type (ARP, 802.2 LLC, capture metadata); ignored upstream.
    NonIp,
}

impl fmt::Display for InvalidPacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated buffer"),
            Self::BadRtpVersion => write!(f, "RTP version != 2"),
            Self::BadRtpHeaderLength => write!(f, "non-positive RTP header length"),
            Self::EmptyPayload => write!(f, "empty payload"),
            Self::BadPayloadType => write!(f, "out-of-range payload type"),
            Self::NonIp => write!(f, "non-IP link layer type"),
        }
    }
}

/// Convenience alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;
