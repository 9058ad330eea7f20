//! IPv4 fragment reassembly (`spec.md` §4.1, §9).
//!
//! A bounded table keyed by `(src, dst, id, proto)`; the final fragment
//! (the one with `more_fragments == false`) triggers reassembly. Entries
//! evict oldest-first when the table is full, and self-expire after
//! `FRAGMENT_TIMEOUT` of wall time without a new fragment.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use super::headers::Ipv4Header;

/// Default bound on concurrently-tracked fragment trains.
pub const DEFAULT_TABLE_CAPACITY: usize = 256;

/// Entries older than this are evicted even if incomplete.
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub id: u16,
    pub proto: u8,
}

struct FragmentEntry {
    /// (fragment_offset, data) pairs, in arrival order.
    pieces: Vec<(u16, Vec<u8>)>,
    total_len: Option<u16>,
    last_seen: Instant,
    insertion_order: u64,
}

/// Bounded, self-expiring IPv4 fragment reassembly table.
pub struct FragmentTable {
    capacity: usize,
    entries: HashMap<FragmentKey, FragmentEntry>,
    next_insertion_order: u64,
}

impl FragmentTable {
    pub fn new(capacity: usize) -> Self {
        FragmentTable {
            capacity,
            entries: HashMap::new(),
            next_insertion_order: 0,
        }
    }

    /// Insert a fragment. Returns `true` when this fragment completed a train
    /// (last fragment seen and all bytes contiguous from offset 0).
    pub fn insert(&mut self, ip: &Ipv4Header, payload: &[u8]) -> bool {
        self.evict_expired();

        let key = FragmentKey {
            src: ip.src,
            dst: ip.dst,
            id: ip.identification,
            proto: ip.protocol,
        };

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        let order = self.next_insertion_order;
        self.next_insertion_order += 1;

        let entry = self.entries.entry(key).or_insert_with(|| FragmentEntry {
            pieces: Vec::new(),
            total_len: None,
            last_seen: Instant::now(),
            insertion_order: order,
        });

        entry.last_seen = Instant::now();
        entry.pieces.push((ip.fragment_offset, payload.to_vec()));
        if !ip.flags_more_fragments {
            entry.total_len = Some(ip.fragment_offset + payload.len() as u16);
        }

        self.is_complete(&key)
    }

    fn is_complete(&self, key: &FragmentKey) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return false;
        };
        let Some(total_len) = entry.total_len else {
            return false;
        };
        let mut covered = vec![false; total_len as usize];
        for (offset, data) in &entry.pieces {
            let start = *offset as usize;
            let end = start + data.len();
            if end > covered.len() {
                return false;
            }
            for slot in &mut covered[start..end] {
                *slot = true;
            }
        }
        covered.iter().all(|c| *c)
    }

    /// Remove and return the reassembled payload for a completed train, if present.
    pub fn take_reassembled(&mut self, key: &FragmentKey) -> Option<Vec<u8>> {
        if !self.is_complete(key) {
            return None;
        }
        let entry = self.entries.remove(key)?;
        let total_len = entry.total_len?;
        let mut buf = vec![0u8; total_len as usize];
        for (offset, data) in entry.pieces {
            let start = offset as usize;
            buf[start..start + data.len()].copy_from_slice(&data);
        }
        Some(buf)
    }

    pub fn key_for(ip: &Ipv4Header) -> FragmentKey {
        FragmentKey {
            src: ip.src,
            dst: ip.dst,
            id: ip.identification,
            proto: ip.protocol,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest_key) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.insertion_order)
            .map(|(k, _)| *k)
        {
            self.entries.remove(&oldest_key);
        }
    }

    fn evict_expired(&mut self) {
        let now = Instant::now();
        self.entries
            .retain(|_, e| now.duration_since(e.last_seen) < FRAGMENT_TIMEOUT);
    }
}

impl Default for FragmentTable {
    fn default() -> Self {
        FragmentTable::new(DEFAULT_TABLE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip_frag(id: u16, offset: u16, more: bool) -> Ipv4Header {
        Ipv4Header {
            header_len: 20,
            total_len: 0,
            identification: id,
            flags_more_fragments: more,
            fragment_offset: offset,
            protocol: 17,
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
        }
    }

    #[test]
    fn reassembles_two_fragments() {
        let mut table = FragmentTable::new(16);
        let ip1 = ip_frag(42, 0, true);
        let ip2 = ip_frag(42, 8, false);

        assert!(!table.insert(&ip1, &[1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(table.insert(&ip2, &[9, 10, 11, 12]));

        let key = FragmentTable::key_for(&ip1);
        let reassembled = table.take_reassembled(&key).unwrap();
        assert_eq!(reassembled, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(table.is_empty());
    }

    #[test]
    fn out_of_order_fragments_reassemble() {
        let mut table = FragmentTable::new(16);
        let ip2 = ip_frag(7, 4, false);
        let ip1 = ip_frag(7, 0, true);

        assert!(!table.insert(&ip2, &[5, 6, 7, 8]));
        assert!(table.insert(&ip1, &[1, 2, 3, 4]));

        let key = FragmentTable::key_for(&ip1);
        assert_eq!(table.take_reassembled(&key).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut table = FragmentTable::new(1);
        let ip1 = ip_frag(1, 0, true);
        let ip2 = ip_frag(2, 0, true);

        table.insert(&ip1, &[1, 2, 3, 4]);
        assert_eq!(table.len(), 1);
        table.insert(&ip2, &[5, 6, 7, 8]);
        assert_eq!(table.len(), 1);
        assert!(table.take_reassembled(&FragmentTable::key_for(&ip1)).is_none());
        assert!(table.take_reassembled(&FragmentTable::key_for(&ip2)).is_some());
    }

    #[test]
    fn distinct_keys_tracked_independently() {
        let mut table = FragmentTable::new(16);
        let a = ip_frag(1, 0, true);
        let mut b = ip_frag(2, 0, true);
        b.src = Ipv4Addr::new(10, 0, 0, 9);

        table.insert(&a, &[1, 2]);
        table.insert(&b, &[3, 4]);
        assert_eq!(table.len(), 2);
    }
}
