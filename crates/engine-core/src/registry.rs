//! Stream Key Registry (`spec.md` §3, §4.3, component C3).
//!
//! Maps a [`StreamKey`] to a session-table index, bounded to a hard
//! per-worker cap. Unlike the teacher's `SessionManager` — a single
//! `Arc<RwLock<HashMap>>` shared across the whole server — each worker owns
//! its own registry outright (`spec.md`: "No locks: each worker owns its
//! table"), so this type carries no interior mutability or `Arc` at all.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::error::EngineError;

/// Minimum guaranteed capacity per worker's registry (`spec.md` §4.3).
pub const MIN_CAPACITY: usize = 512;

/// Identifies a stream: two packets share a stream iff their keys are equal
/// (`spec.md` §3). DTMF-event packets (payload size 4) are looked up with
/// `payload_type` zeroed by the caller so they stay attached to the media
/// session's key rather than forming a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload_type: Option<u8>,
}

impl StreamKey {
    pub fn new(
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload_type: u8,
    ) -> Self {
        StreamKey {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            payload_type: Some(payload_type),
        }
    }

    /// Key variant used for DTMF-event payloads, which omit payload type
    /// from the match so DTMF stays attached to its media session.
    pub fn without_payload_type(
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        StreamKey {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            payload_type: None,
        }
    }
}

/// Bounded, lock-free stream key table owned outright by one worker.
pub struct StreamKeyRegistry {
    capacity: usize,
    table: HashMap<StreamKey, usize>,
    next_index: usize,
}

impl StreamKeyRegistry {
    /// `capacity` is honored exactly, including sub-[`MIN_CAPACITY`] values —
    /// callers that want the floor should go through [`Default`], which is
    /// what `Engine` does for production worker registries.
    pub fn new(capacity: usize) -> Self {
        StreamKeyRegistry {
            capacity,
            table: HashMap::new(),
            next_index: 0,
        }
    }

    /// Look up `key`, inserting it with a fresh session-table index if it is
    /// not already present. Returns `(is_new, session_index)`.
    ///
    /// Overflow (table at capacity and `key` unseen) returns
    /// [`EngineError::SessionTableFull`] and does not mutate the table —
    /// per `spec.md` §4.3 this must prevent creation of a new session.
    pub fn find_or_insert(&mut self, key: StreamKey) -> Result<(bool, usize), EngineError> {
        if let Some(&index) = self.table.get(&key) {
            return Ok((false, index));
        }
        if self.table.len() >= self.capacity {
            return Err(EngineError::SessionTableFull {
                capacity: self.capacity,
            });
        }
        let index = self.next_index;
        self.next_index += 1;
        self.table.insert(key, index);
        Ok((true, index))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn remove(&mut self, key: &StreamKey) -> Option<usize> {
        self.table.remove(key)
    }
}

impl Default for StreamKeyRegistry {
    fn default() -> Self {
        StreamKeyRegistry::new(MIN_CAPACITY)
    }
}
