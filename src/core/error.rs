//! Core capability errors (validation, resolution, transition, contention).
//!
//! These are bounded and stable: core errors represent domain/refusal
//! states, not library implementation details.

use thiserror::Error;

use crate::error::{Effect, Transience};

use super::bid::BidStatus;
use super::identity::{BidId, MediaId, PartyId, UserId};

/// Bad input rejected before any write.
#[derive(Debug, Error, Clone)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

/// A supplied identifier did not resolve at call time.
///
/// Resolution is the collaborator's job; the ledger only refuses to
/// record identifiers it cannot see.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ReferenceError {
    #[error("user {0} does not resolve")]
    User(UserId),
    #[error("party {0} does not resolve")]
    Party(PartyId),
    #[error("media {0} does not resolve")]
    Media(MediaId),
}

/// Illegal status change. Nothing was mutated.
#[derive(Debug, Error, Clone)]
#[error("bid {id}: cannot transition {from} -> {to}")]
pub struct InvalidTransition {
    pub id: BidId,
    pub from: BidStatus,
    pub to: BidStatus,
}

/// A top-field comparison was computed against a stale bucket revision
/// and the bounded retry budget ran out.
///
/// The bid is already durable in the ledger when this surfaces; drift
/// repair (backfill) reconciles the cached tops.
#[derive(Debug, Error, Clone)]
#[error(
    "bucket ({party}, {media}): top comparison stale after {retries} retries (bid {bid} recorded)"
)]
pub struct StaleTopComparison {
    pub party: PartyId,
    pub media: MediaId,
    pub bid: BidId,
    pub retries: u32,
}

/// Lookup miss on an entity the caller named directly.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum NotFound {
    #[error("bid {0} not found")]
    Bid(BidId),
    #[error("party {0} not found")]
    Party(PartyId),
    #[error("media {0} not found")]
    Media(MediaId),
    #[error("no bucket for ({party}, {media})")]
    Bucket { party: PartyId, media: MediaId },
    #[error("no global party registered")]
    GlobalParty,
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error(transparent)]
    StaleTop(#[from] StaleTopComparison),
    #[error(transparent)]
    NotFound(#[from] NotFound),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        match self {
            // Pure domain/input refusals.
            CoreError::Validation(_)
            | CoreError::Reference(_)
            | CoreError::InvalidTransition(_)
            | CoreError::NotFound(_) => Transience::Permanent,
            // Contention: the same call can succeed once writers settle.
            CoreError::StaleTop(_) => Transience::Retryable,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // Rejected before any write.
            CoreError::Validation(_)
            | CoreError::Reference(_)
            | CoreError::InvalidTransition(_)
            | CoreError::NotFound(_) => Effect::None,
            // The ledger append already committed; only top propagation
            // is unsettled.
            CoreError::StaleTop(_) => Effect::Some,
        }
    }
}
