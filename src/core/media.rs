//! Layer 3: Media and user entities.
//!
//! Media carries the one cross-party cache (`global_aggregate`)
//! plus a reference set of global-scope bids - kept separate so
//! party-scoped and global-scope contributions are never mixed up at
//! the storage level.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::identity::{BidId, MediaId, UserId};
use super::money::Amount;

/// A content item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub id: MediaId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Sum of contributing bids across all non-global parties plus
    /// global-scope bids. Cached; truth lives in the ledger.
    pub global_aggregate: Amount,
    /// Bids placed through the Global Party against this media.
    pub global_bids: BTreeSet<BidId>,
}

impl Media {
    pub fn new(id: MediaId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            artist: None,
            cover_url: None,
            duration_ms: None,
            global_aggregate: Amount::ZERO,
            global_bids: BTreeSet::new(),
        }
    }
}

/// Bidder identity record. Referenced by bids, never owned by them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
