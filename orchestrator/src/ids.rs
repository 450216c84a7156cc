//! Identifier and clock services (C1).
//!
//! A time-ordered id generator modeled on the teacher's UUID6 implementation
//! (good locality for append-only stores), a content hash for cache keys and
//! the audit chain, and a `Clock` abstraction injected everywhere a component
//! would otherwise call `SystemTime::now()` directly, so workflow tests can
//! run with a fixed or manually-advanced clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Time-ordered 128-bit id, formatted like a UUID. Later calls to [`new_id`]
/// sort after earlier ones even within the same wall-clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    bytes: [u8; 16],
}

impl Id {
    fn from_parts(timestamp: u64, node: u64, clock_seq: u16) -> Self {
        let time_high_and_mid = (timestamp >> 12) & 0xFFFF_FFFF_FFFF;
        let time_low = timestamp & 0x0FFF;

        let mut int_val: u128 = (time_high_and_mid as u128) << 80;
        int_val |= (time_low as u128) << 64;
        int_val |= ((clock_seq & 0x3FFF) as u128) << 48;
        int_val |= (node & 0xFFFF_FFFF_FFFF) as u128;

        // RFC 4122 variant.
        int_val &= !(0xC000_u128 << 48);
        int_val |= 0x8000_u128 << 48;
        // Version 6 (time-ordered).
        int_val &= !(0xF000_u128 << 64);
        int_val |= 6_u128 << 76;

        Self {
            bytes: int_val.to_be_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3],
            self.bytes[4], self.bytes[5],
            self.bytes[6], self.bytes[7],
            self.bytes[8], self.bytes[9],
            self.bytes[10], self.bytes[11], self.bytes[12], self.bytes[13], self.bytes[14], self.bytes[15],
        )
    }
}

/// Generates a new time-ordered [`Id`], monotonic even under rapid concurrent calls.
pub fn new_id() -> Id {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    const UUID_EPOCH_OFFSET: u64 = 0x01b2_1dd2_1381_4000;
    let mut ts = nanos / 100 + UUID_EPOCH_OFFSET;

    loop {
        let last = LAST_TIMESTAMP.load(Ordering::SeqCst);
        if ts <= last {
            ts = last + 1;
        }
        match LAST_TIMESTAMP.compare_exchange(last, ts, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => break,
            Err(_) => continue,
        }
    }

    let node = uuid::Uuid::new_v4().as_u128() as u64 & 0xFFFF_FFFF_FFFF;
    let clock_seq = (uuid::Uuid::new_v4().as_u128() >> 48) as u16 & 0x3FFF;
    Id::from_parts(ts, node, clock_seq)
}

/// A content hash, used as a cache key component and as the audit chain's hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn genesis() -> Self {
        Self([0u8; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", blake3::Hash::from_bytes(self.0).to_hex())
    }
}

/// Hashes arbitrary bytes with BLAKE3.
pub fn content_hash(bytes: &[u8]) -> Hash {
    Hash(*blake3::hash(bytes).as_bytes())
}

/// Hashes the concatenation of a previous hash and a record's canonical bytes,
/// for the audit chain's `hash = H(prev_hash || canonical(record_minus_hash))`.
pub fn chained_hash(prev: &Hash, record_bytes: &[u8]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&prev.0);
    hasher.update(record_bytes);
    Hash(*hasher.finalize().as_bytes())
}

/// Wall-clock and elapsed-time abstraction, injected so tests are deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

/// Real wall-clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// Fixed point in time; every call to `now()` returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub chrono::DateTime<chrono::Utc>);

impl Clock for FixedClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.0
    }
}

/// A clock that advances only when told to, for simulating elapsed time in tests.
pub struct ManualClock {
    current: std::sync::Mutex<chrono::DateTime<chrono::Utc>>,
}

impl ManualClock {
    pub fn new(start: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            current: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.current.lock().unwrap();
        *guard += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        *self.current.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_id_is_monotonic_and_unique() {
        let ids: Vec<String> = (0..200).map(|_| new_id().to_string()).collect();
        let unique: HashSet<_> = ids.iter().cloned().collect();
        assert_eq!(unique.len(), ids.len());
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids, "ids should already be in sorted order");
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = content_hash(b"hello");
        let b = content_hash(b"hello");
        assert_eq!(a, b);
        let c = content_hash(b"world");
        assert_ne!(a, c);
    }

    #[test]
    fn chained_hash_depends_on_prev() {
        let genesis = Hash::genesis();
        let h1 = chained_hash(&genesis, b"record-1");
        let h2 = chained_hash(&h1, b"record-2");
        let h2_from_genesis = chained_hash(&genesis, b"record-2");
        assert_ne!(h2, h2_from_genesis);
    }

    #[test]
    fn fixed_clock_never_advances() {
        let t = chrono::Utc::now();
        let clock = FixedClock(t);
        assert_eq!(clock.now(), t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn manual_clock_advances_on_command() {
        let t0 = chrono::Utc::now();
        let clock = ManualClock::new(t0);
        assert_eq!(clock.now(), t0);
        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(clock.now(), t0 + chrono::Duration::seconds(60));
    }
}
