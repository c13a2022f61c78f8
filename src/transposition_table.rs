//! Fixed size caches from 64-bit position keys to single byte values
//!
//! Both tables have a prime number of slots and store only the low bytes of
//! every key. A key is recovered from its slot index and its partial key as
//! long as it is smaller than `slots * 2^(8 * key_bytes)`, so a lookup never
//! returns the value stored for a different key.

use std::sync::{atomic::*, Arc};

/// The storage interface used by the solver
///
/// A value of 0 means that nothing is stored for a key.
pub trait TranspositionStore {
    fn get(&self, key: u64) -> u8;
    fn put(&mut self, key: u64, value: u8);
    fn reset(&mut self);
}

const fn has_factor(n: u64, min: u64, max: u64) -> bool {
    let mut factor = min;
    while factor < max && factor * factor <= n {
        if n % factor == 0 {
            return true;
        }
        factor += 1;
    }
    false
}

/// The smallest prime greater than or equal to `n`
pub const fn next_prime(n: u64) -> u64 {
    let mut candidate = n;
    while candidate < 2 || has_factor(candidate, 2, candidate) {
        candidate += 1;
    }
    candidate
}

/// Number of slots of a table with `2^log_size` nominal entries
pub const fn table_size(log_size: u32) -> usize {
    next_prime(1 << log_size) as usize
}

/// A single-owner transposition table with replace-always slots
#[derive(Clone)]
pub struct TranspositionTable {
    keys: Vec<u32>,
    values: Vec<u8>,
    key_bytes: usize,
    log_size: u32,
}

impl TranspositionTable {
    /// Creates a table with `next_prime(2^log_size)` slots and 4-byte partial keys
    pub fn new(log_size: u32) -> Self {
        Self::with_key_bytes(log_size, 4)
    }

    /// Creates a table storing `key_bytes` (1, 2 or 4) low bytes of every key
    pub fn with_key_bytes(log_size: u32, key_bytes: usize) -> Self {
        assert!(matches!(key_bytes, 1 | 2 | 4), "unsupported partial key size");
        let size = table_size(log_size);
        Self {
            keys: vec![0; size],
            values: vec![0; size],
            key_bytes,
            log_size,
        }
    }

    /// Rebuilds a table from its raw slots, as stored in an opening book file
    pub(crate) fn from_parts(
        log_size: u32,
        key_bytes: usize,
        keys: Vec<u32>,
        values: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(keys.len(), table_size(log_size));
        debug_assert_eq!(values.len(), keys.len());
        Self {
            keys,
            values,
            key_bytes,
            log_size,
        }
    }

    pub fn key_bytes(&self) -> usize {
        self.key_bytes
    }

    pub fn log_size(&self) -> u32 {
        self.log_size
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn keys(&self) -> &[u32] {
        &self.keys
    }

    pub(crate) fn values(&self) -> &[u8] {
        &self.values
    }

    fn partial_key(&self, key: u64) -> u32 {
        match self.key_bytes {
            1 => key as u8 as u32,
            2 => key as u16 as u32,
            _ => key as u32,
        }
    }

    fn index(&self, key: u64) -> usize {
        (key % self.keys.len() as u64) as usize
    }
}

impl TranspositionStore for TranspositionTable {
    fn get(&self, key: u64) -> u8 {
        let i = self.index(key);
        if self.keys[i] == self.partial_key(key) {
            self.values[i]
        } else {
            0
        }
    }

    fn put(&mut self, key: u64, value: u8) {
        let i = self.index(key);
        self.keys[i] = self.partial_key(key);
        self.values[i] = value;
    }

    fn reset(&mut self) {
        self.keys.iter_mut().for_each(|key| *key = 0);
        self.values.iter_mut().for_each(|value| *value = 0);
    }
}

struct SharedEntry {
    key: AtomicU32,
    value: AtomicU8,
}

impl SharedEntry {
    pub fn new() -> Self {
        Self {
            key: AtomicU32::new(0),
            value: AtomicU8::new(0),
        }
    }
    pub fn store(&self, key: u32, value: u8) {
        self.key.store(key, Ordering::Relaxed);
        self.value.store(value, Ordering::Relaxed);
    }
}

/// A lock-free transposition table that can be written from several threads
///
/// Clones share the same slots. The stored key is xor-ed with the value, so a
/// slot torn by two concurrent writes fails the key check instead of pairing
/// a key with another position's value.
#[derive(Clone)]
pub struct SharedTranspositionTable {
    entries: Arc<Vec<SharedEntry>>,
}

impl SharedTranspositionTable {
    pub fn new(log_size: u32) -> Self {
        let size = table_size(log_size);
        let mut entries = Vec::with_capacity(size);
        for _ in 0..size {
            entries.push(SharedEntry::new());
        }
        Self {
            entries: Arc::new(entries),
        }
    }

    fn index(&self, key: u64) -> usize {
        (key % self.entries.len() as u64) as usize
    }
}

impl TranspositionStore for SharedTranspositionTable {
    fn get(&self, key: u64) -> u8 {
        let entry = &self.entries[self.index(key)];
        let data = entry.value.load(Ordering::Relaxed);
        if entry.key.load(Ordering::Relaxed) == key as u32 ^ data as u32 {
            data
        } else {
            0
        }
    }

    fn put(&mut self, key: u64, value: u8) {
        let i = self.index(key);
        self.entries[i].store(key as u32 ^ value as u32, value);
    }

    fn reset(&mut self) {
        for entry in self.entries.iter() {
            entry.store(0, 0);
        }
    }
}
