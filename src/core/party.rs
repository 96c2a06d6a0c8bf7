//! Layer 3: Party entity and its cached aggregate buckets.
//!
//! A bucket is the cached aggregate record for one (party, media)
//! pair. Buckets are caches, never truth: everything here must be
//! restorable from the ledger alone (backfill), and every mutation
//! bumps the bucket revision so concurrent top comparisons can detect
//! staleness.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::identity::{BidId, MediaId, PartyId, UserId};
use super::money::Amount;
use super::time::LedgerStamp;

/// Party classification.
///
/// The Global Party is found by this tag, never by a well-known
/// identifier. It owns no buckets; its view is computed on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    Standard,
    Global,
}

/// Cached "highest single bid" holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopBid {
    pub amount: Amount,
    pub user: UserId,
    pub bid: BidId,
    pub placed: LedgerStamp,
}

impl TopBid {
    /// Earliest-wins max rule: strictly greater amount replaces;
    /// an equal amount only wins with a strictly earlier stamp.
    pub fn beats(&self, incumbent: &TopBid) -> bool {
        self.amount > incumbent.amount
            || (self.amount == incumbent.amount && self.placed < incumbent.placed)
    }
}

/// Cached "highest per-user summed total" holder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopUserAggregate {
    pub amount: Amount,
    pub user: UserId,
    /// Stamp of the user's earliest qualifying bid; the tie-break key.
    pub earliest: LedgerStamp,
}

impl TopUserAggregate {
    pub fn beats(&self, incumbent: &TopUserAggregate) -> bool {
        self.amount > incumbent.amount
            || (self.amount == incumbent.amount && self.earliest < incumbent.earliest)
    }
}

/// The pair of cached top fields kept at bucket and party level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tops {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_bid: Option<TopBid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_user_aggregate: Option<TopUserAggregate>,
}

impl Tops {
    /// Offer a single-bid candidate; true if the cache changed.
    pub fn offer_bid(&mut self, candidate: TopBid) -> bool {
        match &self.top_bid {
            Some(incumbent) if !candidate.beats(incumbent) => false,
            _ => {
                self.top_bid = Some(candidate);
                true
            }
        }
    }

    /// Offer a per-user-total candidate; true if the cache changed.
    ///
    /// Same user with a new total always replaces its own entry (the
    /// running total moved), otherwise the earliest-wins max rule.
    pub fn offer_user_aggregate(&mut self, candidate: TopUserAggregate) -> bool {
        match &self.top_user_aggregate {
            Some(incumbent) if incumbent.user == candidate.user => {
                if *incumbent == candidate {
                    false
                } else {
                    self.top_user_aggregate = Some(candidate);
                    true
                }
            }
            Some(incumbent) if !candidate.beats(incumbent) => false,
            _ => {
                self.top_user_aggregate = Some(candidate);
                true
            }
        }
    }

    /// Fold another tops pair in under the earliest-wins max rule.
    /// Party-level fields are the merge of all bucket-level fields.
    pub fn merge_max(&mut self, other: &Tops) {
        if let Some(candidate) = &other.top_bid {
            self.offer_bid(candidate.clone());
        }
        if let Some(candidate) = &other.top_user_aggregate {
            match &self.top_user_aggregate {
                Some(incumbent) if !candidate.beats(incumbent) => {}
                _ => self.top_user_aggregate = Some(candidate.clone()),
            }
        }
    }

    /// Whether a bid id currently holds the top-bid slot.
    pub fn held_by_bid(&self, bid: BidId) -> bool {
        self.top_bid.as_ref().is_some_and(|t| t.bid == bid)
    }

    /// Whether a user currently holds the top-user-aggregate slot.
    pub fn held_by_user(&self, user: UserId) -> bool {
        self.top_user_aggregate
            .as_ref()
            .is_some_and(|t| t.user == user)
    }
}

/// Per-user running total inside one bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTotal {
    pub total: Amount,
    /// Earliest qualifying bid stamp; the top-user tie-break key. Kept as a
    /// lower bound under removals; exact value restored on recompute.
    pub earliest: LedgerStamp,
}

/// Cached aggregates for one (party, media) pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Sum of contributing party-scoped bid amounts.
    pub aggregate: Amount,
    pub tops: Tops,
    /// Per-user running totals feeding the top-user comparison.
    pub user_totals: BTreeMap<UserId, UserTotal>,
    /// Bumped on every mutation; the CAS key for top comparisons.
    pub revision: u64,
    /// Set when the cached tops may no longer name the true holder
    /// (an inverse delta removed them). Cleared by single-bucket
    /// recompute on the next read.
    pub tops_stale: bool,
}

impl Bucket {
    pub fn new() -> Self {
        Self {
            aggregate: Amount::ZERO,
            tops: Tops::default(),
            user_totals: BTreeMap::new(),
            revision: 0,
            tops_stale: false,
        }
    }

    /// A bucket with no contributions and no history can be dropped.
    pub fn is_empty(&self) -> bool {
        self.aggregate.is_zero() && self.user_totals.is_empty()
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

/// A listening session.
///
/// `entries` is presentation order (queue); the engine stores it but
/// never interprets it. Buckets are keyed by media.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub name: String,
    pub kind: PartyKind,
    pub entries: Vec<MediaId>,
    pub buckets: BTreeMap<MediaId, Bucket>,
    /// Max over this party's buckets.
    pub tops: Tops,
    pub tops_stale: bool,
    /// Party-level revision for CAS on party tops.
    pub revision: u64,
}

impl Party {
    pub fn new(id: PartyId, name: impl Into<String>, kind: PartyKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            entries: Vec::new(),
            buckets: BTreeMap::new(),
            tops: Tops::default(),
            tops_stale: false,
            revision: 0,
        }
    }

    pub fn is_global(&self) -> bool {
        self.kind == PartyKind::Global
    }
}
