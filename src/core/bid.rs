//! Layer 2: The bid event record.
//!
//! Append-mostly: the only post-creation mutations are status
//! transitions and Sweeper repairs (reassignment/snapshot restubbing).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::InvalidTransition;
use super::identity::{BidId, MediaId, PartyId, UserId};
use super::money::Amount;
use super::time::LedgerStamp;

/// Bid lifecycle status.
///
/// `refunded` is terminal. `played` cannot return to `active` but may
/// still be refunded or vetoed. `vetoed` is reversible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Active,
    Played,
    Vetoed,
    Refunded,
}

impl BidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Played => "played",
            Self::Vetoed => "vetoed",
            Self::Refunded => "refunded",
        }
    }

    /// Whether a bid in this status counts toward aggregates.
    pub fn contributes(&self) -> bool {
        matches!(self, Self::Active | Self::Played)
    }

    /// Validate `self -> to`. Same-status is legal (callers treat it as
    /// a no-op and emit no delta).
    pub fn validate_transition(self, id: BidId, to: BidStatus) -> Result<(), InvalidTransition> {
        let legal = match (self, to) {
            (from, to) if from == to => true,
            (Self::Refunded, _) => false,
            (Self::Played, Self::Active) => false,
            _ => true,
        };
        if legal {
            Ok(())
        } else {
            Err(InvalidTransition { id, from: self, to })
        }
    }
}

impl fmt::Display for BidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bid was placed. Immutable after creation except by
/// Sweeper reassignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidScope {
    /// Placed inside an ordinary party; counted in that party's bucket.
    Party,
    /// Placed through the Global Party; media-level aggregate only.
    Global,
}

impl BidScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Party => "party",
            Self::Global => "global",
        }
    }
}

/// Display fields captured once at placement time.
///
/// Never retroactively updated except by the Sweeper (restubbing after
/// entity deletion) and the Backfill Engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidSnapshot {
    pub username: String,
    pub party_name: String,
    pub media_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_duration_ms: Option<u64>,
}

/// One ledger record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub user: UserId,
    pub party: PartyId,
    pub media: MediaId,
    pub amount: Amount,
    pub status: BidStatus,
    pub scope: BidScope,
    pub created: LedgerStamp,
    pub snapshot: BidSnapshot,
}

impl Bid {
    /// Whether this bid currently counts toward aggregates.
    pub fn contributes(&self) -> bool {
        self.status.contributes()
    }

    /// Whether this bid counts toward a given bucket.
    pub fn contributes_to_bucket(&self, party: PartyId, media: MediaId) -> bool {
        self.contributes()
            && self.scope == BidScope::Party
            && self.party == party
            && self.media == media
    }

    /// Whether this bid counts toward a media's global aggregate:
    /// party-scoped bids from any party, plus global-scope bids.
    pub fn contributes_to_media(&self, media: MediaId) -> bool {
        self.contributes() && self.media == media
    }
}
