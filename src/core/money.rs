//! Layer 0: Money primitive
//!
//! Amount: fixed-point minor currency units (cents). Unsigned by
//! construction - aggregates never go negative through checked paths.

use std::fmt;
use std::iter::Sum;

use serde::{Deserialize, Serialize};

use super::error::{CoreError, ValidationError};

/// Monetary amount in minor currency units.
///
/// Zero is representable (aggregates start there); the ledger boundary
/// uses [`Amount::positive`] so a zero or missing bid amount is
/// unrepresentable past validation.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Wrap a raw minor-unit value. Zero allowed (aggregate seed).
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Boundary constructor: rejects zero.
    pub fn positive(raw: u64) -> Result<Self, CoreError> {
        if raw == 0 {
            Err(ValidationError {
                field: "amount",
                reason: "must be positive".into(),
            }
            .into())
        } else {
            Ok(Self(raw))
        }
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Subtraction that clamps at zero. Underflow here means cached
    /// aggregates drifted; callers log it and leave repair to backfill.
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        // Aggregate sums saturate rather than wrap; u64 headroom makes
        // saturation unreachable for realistic ledgers.
        iter.fold(Amount::ZERO, |acc, a| {
            Amount(acc.0.saturating_add(a.0))
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_rejects_zero() {
        assert!(Amount::positive(0).is_err());
        assert_eq!(Amount::positive(500).unwrap().raw(), 500);
    }

    #[test]
    fn checked_sub_refuses_underflow() {
        let a = Amount::new(100);
        let b = Amount::new(300);
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(b.checked_sub(a), Some(Amount::new(200)));
        assert_eq!(a.saturating_sub(b), Amount::ZERO);
    }

    #[test]
    fn sum_over_iterator() {
        let total: Amount = [100, 250, 50].into_iter().map(Amount::new).sum();
        assert_eq!(total, Amount::new(400));
    }
}
