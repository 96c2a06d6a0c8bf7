//! Layer 0: Time primitives
//!
//! WallClock for audit timestamps (not ordering).
//! LedgerStamp for "earliest bid wins" tie-breaks: total order by the
//! ledger's append counter, so the ordering survives wall-clock
//! regressions between appends. The wall half is audit data.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Wall clock in unix milliseconds. A measurement, not an ordering key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WallClock(pub u64);

impl WallClock {
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }
}

/// Creation stamp assigned at ledger append.
///
/// `seq` is the monotonic append counter and the primary ordering key;
/// a bid appended later can never sort earlier, whatever the wall
/// clock did in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerStamp {
    pub wall_ms: u64,
    pub seq: u64,
}

impl LedgerStamp {
    pub fn new(wall_ms: u64, seq: u64) -> Self {
        Self { wall_ms, seq }
    }
}

impl PartialOrd for LedgerStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LedgerStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.wall_ms.cmp(&other.wall_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_orders_by_append_seq() {
        let a = LedgerStamp::new(10, 5);
        let b = LedgerStamp::new(10, 6);
        let c = LedgerStamp::new(11, 7);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn clock_regression_cannot_reorder_appends() {
        // The wall clock stepped backwards between two appends; the
        // later append must still sort later.
        let before = LedgerStamp::new(2_000, 1);
        let after = LedgerStamp::new(1_000, 2);
        assert!(before < after);
    }
}
