#![forbid(unsafe_code)]

//! Bid aggregation and consistency engine for listening parties.
//!
//! An append-mostly bid ledger is the system of record; everything
//! else - per-(party, media) buckets, party-level tops, media-level
//! global aggregates - is a cache maintained incrementally on each bid
//! event, recomputable in full from the ledger, and repairable after
//! entity deletions.

pub mod api;
pub mod backfill;
pub mod config;
pub mod core;
pub mod error;
pub mod maintain;
pub mod store;
pub mod sweep;
pub mod telemetry;
pub mod view;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::api::{BucketAggregates, Engine, MediaInput, PartyAggregates};
pub use crate::backfill::{BackfillReport, BackfillScope};
pub use crate::config::EngineConfig;
pub use crate::core::{
    Amount, Bid, BidId, BidScope, BidSnapshot, BidStatus, CoreError, LedgerStamp, Media, MediaId,
    Party, PartyId, PartyKind, User, UserId,
};
pub use crate::sweep::SweepReport;
pub use crate::view::{GlobalMediaEntry, GlobalViewSort};
