//! # sigflow-engine-core — a multithreaded RTP media processing engine
//!
//! Ingests captured RTP/RTCP traffic (pcap, or any [`io::PacketSource`]),
//! discovers streams, jitter-buffers and decodes each one, optionally merges
//! contributor streams into stream groups, and emits pcap/wav/bitstream
//! output while logging a queryable packet history. Built for offline and
//! near-real-time batch processing of telecom media capture, not for live
//! call signaling — `engine-cli` and any SIP/RTSP stack sit above this
//! crate, which starts at "bytes off the wire" and ends at "decoded/merged
//! audio plus per-stream statistics".
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ engine-cli — argv parsing, process lifecycle        │
//! ├────────────────────────────────────────────────────┤
//! │ engine    — thread orchestration, app-thread loop   │
//! ├────────────────────────────────────────────────────┤
//! │ packet    — C1 parse/reassemble   codec  — C2 detect│
//! │ registry  — C3 stream keys        session — C4 table│
//! │ push      — C5 ingest pipeline    worker  — C6 pool │
//! │ group     — C7 stream-group merge pull    — C8 drain│
//! │ history   — C9 packet-history log sdp     — C10 db  │
//! ├────────────────────────────────────────────────────┤
//! │ io        — pcap/memory source & sink traits         │
//! │ config    — CLI-flag counterpart, validated          │
//! │ error     — EngineError                              │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate layout
//!
//! - [`packet`] — link/IP/UDP/RTP parsing, IPv4 fragment reassembly, duplicate detection.
//! - [`codec`] — static-payload-type and heuristic codec auto-detection.
//! - [`registry`] — lock-free stream-key-to-session lookup table.
//! - [`session`] — session lifecycle state machine and termination config.
//! - [`push`] — input classification, pacing, and session-queue hand-off.
//! - [`jitter`] — per-endpoint sequence-ordered release buffer.
//! - [`worker`] — decode and worker-to-session allocation.
//! - [`group`] — stream-group align/merge/deduplicate/emit.
//! - [`pull`] — output queue draining and sink routing.
//! - [`history`] — packet-history log and post-run analysis.
//! - [`sdp`] — SDP database and SIP/SAP classification.
//! - [`io`] — [`io::PacketSource`]/[`io::PacketSink`] and their pcap/memory implementations.
//! - [`config`] — [`config::EngineConfig`], the validated counterpart of CLI flags.
//! - [`engine`] — [`engine::Engine`], the orchestrator tying every component together.
//! - [`error`] — [`error::EngineError`] and [`error::Result`].

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod history;
pub mod io;
pub mod jitter;
pub mod packet;
pub mod pull;
pub mod push;
pub mod registry;
pub mod sdp;
pub mod session;
pub mod worker;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
