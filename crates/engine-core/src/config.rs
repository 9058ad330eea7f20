//! Engine-wide configuration: the `-d` option bitfield, pacing/jitter/lookback
//! numeric flags, and defaults shared by the push, worker, and group engines.
//!
//! `EngineConfig` is the parsed, validated counterpart of the CLI flags
//! consumed by the core (`spec.md` §6); `engine-cli` is responsible for
//! turning `clap` output into this struct — the core never parses argv
//! itself.

use bitflags::bitflags;

bitflags! {
    /// The `-dN` option bitfield (`spec.md` §6), supplemented with the full
    /// enumeration from the original `cmd_line_options_flags.h`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EngineOptions: u64 {
        /// Dynamically create sessions as new stream keys appear.
        const DYNAMIC_SESSIONS = 1 << 0;
        /// Combine all input specs into one multistream.
        const COMBINE_INPUT_SPECS = 1 << 1;
        /// Enable stream group deduplication (cross-correlation alignment).
        const ENABLE_STREAM_GROUP_DEDUPLICATION = 1 << 2;
        /// Enable ASR-oriented processing on stream group output.
        const ENABLE_STREAM_GROUP_ASR = 1 << 3;
        /// Use packet arrival timestamps to pace the push loop.
        const USE_PACKET_ARRIVAL_TIMES = 1 << 4;
        /// Repeat inputs (rewind on exhaustion) rather than closing the stream.
        const REPEAT_INPUTS = 1 << 5;
        /// Enable random wait before a repeating input thread restarts.
        const ENABLE_RANDOM_WAIT = 1 << 6;
        /// Enable stream groups (merge + time-align contributor sessions).
        const ENABLE_STREAM_GROUPS = 1 << 7;
        /// Enable wav file output for stream group processing.
        const ENABLE_WAV_OUTPUT = 1 << 8;
        /// Allocate sessions to worker threads round-robin instead of fill-first.
        const ROUND_ROBIN_SESSION_ALLOCATION = 1 << 9;
        /// Never split a stream group across worker threads.
        const WHOLE_GROUP_THREAD_ALLOCATE = 1 << 10;
        /// Analytics mode: FTRT pacing plus ptime-interval push/pull.
        const ANALYTICS_MODE = 1 << 11;
        /// Automatically adjust push rate from queue fullness.
        const AUTO_ADJUST_PUSH_RATE = 1 << 12;
        /// Force L16 128kbps transcoded output regardless of termination config.
        const ENABLE_TIMESTAMP_MATCH_MODE = 1 << 13;
        /// Disable DTX/SID handling (enabled by default).
        const DISABLE_DTX_HANDLING = 1 << 14;
        /// Disable stream-group frame loss concealment (enabled by default).
        const DISABLE_FLC = 1 << 15;
        /// Enable FLC holdoffs (ignored unless FLC is enabled).
        const ENABLE_FLC_HOLDOFFS = 1 << 16;
        /// Disable jitter-buffer packet repair (enabled by default).
        const DISABLE_PACKET_REPAIR = 1 << 17;
        /// Disable per-contributor jitter buffer flush on slow contribution.
        const DISABLE_CONTRIB_PACKET_FLUSH = 1 << 18;
        /// Disable dormant session detection/flush.
        const DISABLE_DORMANT_SESSION_DETECTION = 1 << 19;
        /// Extend the dormant-session detection window.
        const SLOW_DORMANT_SESSION_DETECTION = 1 << 20;
        /// Write per-session jitter-buffer-output pcap files.
        const ENABLE_JITTER_BUFFER_OUTPUT_PCAPS = 1 << 21;
        /// Populate the per-stream SDP database from inline SIP/SAP traffic.
        const ENABLE_STREAM_SDP_INFO = 1 << 22;
        /// Disable automatic stream termination on SIP BYE.
        const DISABLE_TERMINATE_STREAM_ON_BYE = 1 << 23;
        /// Accept RTP packets with undeclared trailing padding bytes.
        const ALLOW_OUTOFSPEC_RTP_PADDING = 1 << 24;
        /// Show live packet arrival rate statistics on the console.
        const SHOW_PACKET_ARRIVAL_STATS = 1 << 25;
        /// Enable verbose debug statistics (thread/merge/DER internals).
        const ENABLE_DEBUG_STATS = 1 << 26;
        /// Start worker threads before any static session is created.
        const START_THREADS_FIRST = 1 << 27;
        /// Exercise energy-saver mode with an initial push delay (test aid).
        const ENERGY_SAVER_TEST = 1 << 28;
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions::DYNAMIC_SESSIONS
    }
}

/// Worker-to-session allocation strategy (`spec.md` §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerAllocationMode {
    /// Fill each worker to capacity before moving to the next.
    #[default]
    FillFirst,
    /// Spread sessions evenly across workers.
    RoundRobin,
}

/// Packetization pacing strategy for the push pipeline (`spec.md` §4.5, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    /// Hold packets until wall-clock catches up to their capture timestamp.
    ArrivalTimestamp,
    /// Push at a fixed interval (milliseconds), independent of capture timing.
    FixedInterval { interval_ms: u32 },
    /// As-fast-as-possible: no gate except queue backpressure.
    Afap,
    /// Auto-adjust the per-interval push count from queue fullness.
    AutoAdjust,
}

/// Jitter buffer target/max/min delay, expressed as ptime multiples
/// (`spec.md` §3, packed CLI encoding `target | (max << 8)` per `-jN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterBufferConfig {
    pub target_ptimes: u8,
    pub max_ptimes: u8,
    pub min_ptimes: u8,
    /// RFC 7198 lookback depth (0..=8) for duplicate retransmission collapse.
    pub rfc7198_lookback: u8,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        JitterBufferConfig {
            target_ptimes: 3,
            max_ptimes: 7,
            min_ptimes: 1,
            rfc7198_lookback: 0,
        }
    }
}

impl JitterBufferConfig {
    /// Decode the packed `-jN` CLI form: `target | (max << 8)`.
    pub fn from_packed(packed: u32) -> Self {
        let target = (packed & 0xFF) as u8;
        let max = ((packed >> 8) & 0xFF) as u8;
        JitterBufferConfig {
            target_ptimes: target.max(1),
            max_ptimes: max.max(target.max(1)),
            ..Default::default()
        }
    }

    pub fn with_lookback(mut self, lookback: u8) -> Self {
        self.rfc7198_lookback = lookback.min(8);
        self
    }
}

/// Top-level engine configuration, the validated counterpart of the CLI
/// flags in `spec.md` §6.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Input files (`-iFILE`, repeated).
    pub inputs: Vec<String>,
    /// Output files (`-oFILE`, repeated).
    pub outputs: Vec<String>,
    /// Static session config file (`-CFILE`).
    pub static_config_path: Option<String>,
    /// Packet-history log path (`-LFILE`); `Some` enables run-end analysis.
    pub history_log_path: Option<String>,
    /// Push interval in milliseconds; `0` means AFAP (`-rN`).
    pub push_interval_ms: f64,
    /// Jitter buffer target/max delay (`-jN`).
    pub jitter_buffer: JitterBufferConfig,
    /// Input-reuse count for stress testing (`-nN`).
    pub input_reuse_count: u32,
    /// Repeat-N-times; `0` means infinite (`-RN`).
    pub repeat_count: u32,
    /// Option bitfield (`-dN`).
    pub options: EngineOptions,
    /// Worker pool size, 1..=10.
    pub worker_count: usize,
    /// Session-to-worker allocation mode.
    pub allocation_mode: WorkerAllocationMode,
    /// Group pcap output path (`--group_pcap`).
    pub group_pcap_path: Option<String>,
    /// Group pcap written without copying contributor packets (`--group_pcap_nocopy`).
    pub group_pcap_nocopy: bool,
    /// Cut point in packets for truncated runs (`--cut N`).
    pub cut_packets: Option<u64>,
    /// Wav output path (`-gPATH`).
    pub wav_output_path: Option<String>,
    /// Time scale for FTRT pacing (`>1` accelerates; `1` is real-time).
    pub time_scale: f64,
    /// Worker inactivity threshold (ms) before entering energy-saver sleep.
    pub energy_saver_threshold_ms: u64,
    /// Energy-saver sleep granularity (µs).
    pub energy_saver_sleep_us: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            inputs: Vec::new(),
            outputs: Vec::new(),
            static_config_path: None,
            history_log_path: None,
            push_interval_ms: 20.0,
            jitter_buffer: JitterBufferConfig::default(),
            input_reuse_count: 1,
            repeat_count: 1,
            options: EngineOptions::default(),
            worker_count: 1,
            allocation_mode: WorkerAllocationMode::default(),
            group_pcap_path: None,
            group_pcap_nocopy: false,
            cut_packets: None,
            wav_output_path: None,
            time_scale: 1.0,
            energy_saver_threshold_ms: 500,
            energy_saver_sleep_us: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn pacing_mode(&self) -> PacingMode {
        if self.options.contains(EngineOptions::USE_PACKET_ARRIVAL_TIMES) {
            PacingMode::ArrivalTimestamp
        } else if self.options.contains(EngineOptions::AUTO_ADJUST_PUSH_RATE) {
            PacingMode::AutoAdjust
        } else if self.push_interval_ms <= 0.0 {
            PacingMode::Afap
        } else {
            PacingMode::FixedInterval {
                interval_ms: self.push_interval_ms as u32,
            }
        }
    }

    /// Clamp worker count to the supported 1..=10 range (`spec.md` §4.6).
    pub fn clamped_worker_count(&self) -> usize {
        self.worker_count.clamp(1, 10)
    }
}
