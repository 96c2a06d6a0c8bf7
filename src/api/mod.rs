//! The engine facade consumed by the (excluded) HTTP/auth layer.
//!
//! Callers arrive with a verified user identity, persisted party/media
//! identifiers, and a currency-validated amount; everything after that
//! point - ledger append, delta application, repair jobs - lives here.
//!
//! A successful `place_bid` always means the bid is durably recorded,
//! even if top-field propagation is still settling; aggregate reads
//! are eventually consistent within the bounded retry window.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::backfill::{Backfill, BackfillReport, BackfillScope};
use crate::config::EngineConfig;
use crate::core::{
    Amount, Bid, BidId, BidScope, BidSnapshot, BidStatus, CoreError, InvalidTransition, Media,
    MediaId, NotFound, Party, PartyId, PartyKind, Tops, User, UserId,
};
use crate::maintain::Maintainer;
use crate::store::Store;
use crate::sweep::{SweepReport, Sweeper};
use crate::view::{GlobalMediaEntry, GlobalViewSort, Projector};
use crate::{Error, Result};

/// Media attributes supplied at registration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MediaInput {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl MediaInput {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Bucket-level read shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketAggregates {
    pub aggregate: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_bid: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_bid_user: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_user_aggregate: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_user_aggregate_user: Option<UserId>,
}

/// Party-level read shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyAggregates {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_bid: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_bid_user: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_user_aggregate: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_user_aggregate_user: Option<UserId>,
}

fn flatten_tops(tops: &Tops) -> PartyAggregates {
    PartyAggregates {
        top_bid: tops.top_bid.as_ref().map(|t| t.amount),
        top_bid_user: tops.top_bid.as_ref().map(|t| t.user),
        top_user_aggregate: tops.top_user_aggregate.as_ref().map(|t| t.amount),
        top_user_aggregate_user: tops.top_user_aggregate.as_ref().map(|t| t.user),
    }
}

/// The bid aggregation engine.
///
/// Cheap to clone (shared store); every method is safe under
/// concurrent callers per the bucket-revision contract.
#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
    config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            store: Arc::new(Store::new()),
            config: Arc::new(config),
        }
    }

    fn maintainer(&self) -> Maintainer<'_> {
        Maintainer::new(&self.store, self.config.top_retry_limit)
    }

    // =========================================================================
    // Entity lifecycle (collaborator surface)
    // =========================================================================

    pub fn create_user(&self, name: impl Into<String>) -> UserId {
        let user = User::new(UserId::generate(), name);
        let id = user.id;
        self.store.insert_user(user);
        id
    }

    pub fn delete_user(&self, id: UserId) -> bool {
        self.store.remove_user(id).is_some()
    }

    pub fn create_party(&self, name: impl Into<String>) -> PartyId {
        let party = Party::new(PartyId::generate(), name, PartyKind::Standard);
        let id = party.id;
        self.store.insert_party(party);
        id
    }

    pub fn delete_party(&self, id: PartyId) -> bool {
        self.store.remove_party(id).is_some()
    }

    /// The Global Party, created on first demand. Resolved by kind
    /// tag; there is no well-known identifier to migrate around.
    pub fn ensure_global_party(&self) -> PartyId {
        if let Some(id) = self.store.global_party_id() {
            return id;
        }
        let party = Party::new(PartyId::generate(), "Global", PartyKind::Global);
        let id = party.id;
        self.store.insert_party(party);
        id
    }

    pub fn create_media(&self, input: MediaInput) -> MediaId {
        let mut media = Media::new(MediaId::generate(), input.title);
        media.artist = input.artist;
        media.cover_url = input.cover_url;
        media.duration_ms = input.duration_ms;
        let id = media.id;
        self.store.insert_media(media);
        id
    }

    pub fn delete_media(&self, id: MediaId) -> bool {
        self.store.remove_media(id).is_some()
    }

    // =========================================================================
    // Bid placement and lifecycle
    // =========================================================================

    /// Append a bid to the ledger and apply its delta.
    ///
    /// Validation and resolution happen before any write; after the
    /// append commits, the first maintainer application is part of the
    /// same unit of work - a [`StaleTopComparison`] failure therefore
    /// reports a bid that IS recorded.
    ///
    /// [`StaleTopComparison`]: crate::core::StaleTopComparison
    #[instrument(skip(self))]
    pub fn place_bid(
        &self,
        user: UserId,
        party: PartyId,
        media: MediaId,
        amount: u64,
    ) -> Result<BidId> {
        let amount = Amount::positive(amount).map_err(CoreError::from)?;
        let bidder = self.store.resolve_user(user).map_err(CoreError::from)?;
        let party_kind = self
            .store
            .resolve_party_kind(party)
            .map_err(CoreError::from)?;
        let target = self.store.resolve_media(media).map_err(CoreError::from)?;
        let party_name = self
            .store
            .party(party)
            .map(|p| p.name)
            .unwrap_or_default();

        // The scope tag is fixed by the target party's kind at
        // placement time.
        let scope = match party_kind {
            PartyKind::Global => BidScope::Global,
            PartyKind::Standard => BidScope::Party,
        };

        let bid = Bid {
            id: BidId::generate(),
            user,
            party,
            media,
            amount,
            status: BidStatus::Active,
            scope,
            created: self.store.next_stamp(),
            snapshot: BidSnapshot {
                username: bidder.name,
                party_name,
                media_title: target.title,
                media_artist: target.artist,
                media_cover_url: target.cover_url,
                media_duration_ms: target.duration_ms,
            },
        };
        let id = bid.id;

        if scope == BidScope::Party {
            // Queue order is presentation-only; the engine just keeps
            // the entry list consistent with funded buckets. Done
            // before the append so a vanished party leaves no record.
            self.store
                .push_party_entry(party, media)
                .map_err(CoreError::from)?;
        }
        self.store.insert_bid(bid.clone());
        self.maintainer().apply(&bid)?;
        Ok(id)
    }

    /// Status transition: the only mutation after creation (outside
    /// Sweeper repairs). Re-setting the current status is a no-op.
    #[instrument(skip(self))]
    pub fn set_bid_status(&self, bid: BidId, status: BidStatus) -> Result<()> {
        // Validation and the status write share one ledger critical
        // section: of two racing identical transitions, exactly one
        // observes the old status, so the delta is emitted once.
        let transitioned = self
            .store
            .update_bid(bid, |record| -> std::result::Result<Option<(Bid, bool)>, InvalidTransition> {
                record.status.validate_transition(bid, status)?;
                if record.status == status {
                    return Ok(None);
                }
                let was = record.status.contributes();
                record.status = status;
                Ok(Some((record.clone(), was)))
            })
            .map_err(CoreError::from)?
            .map_err(CoreError::from)?;
        let Some((record, was)) = transitioned else {
            return Ok(());
        };

        // The ledger already reflects the new status, so any recompute
        // triggered below sees the truth this delta is converging on.
        let now = status.contributes();
        if was && !now {
            self.maintainer().unapply(&record)?;
        } else if !was && now {
            self.maintainer().apply(&record)?;
        }
        Ok(())
    }

    pub fn bid(&self, id: BidId) -> Option<Bid> {
        self.store.bid(id)
    }

    // =========================================================================
    // Aggregate reads
    // =========================================================================

    /// Bucket-level aggregates; recomputes first if an inverse delta
    /// left the cached tops stale (bounded to this one bucket).
    pub fn get_bucket_aggregates(
        &self,
        party: PartyId,
        media: MediaId,
    ) -> Result<BucketAggregates> {
        let p = self
            .store
            .party(party)
            .ok_or_else(|| CoreError::from(NotFound::Party(party)))?;
        let Some(bucket) = p.buckets.get(&media) else {
            // No bucket means no bids yet; zeroes, not an error.
            return Ok(BucketAggregates::default());
        };

        let bucket = if bucket.tops_stale {
            self.maintainer().recompute_bucket(party, media)?
        } else {
            bucket.clone()
        };

        let tops = flatten_tops(&bucket.tops);
        Ok(BucketAggregates {
            aggregate: bucket.aggregate,
            top_bid: tops.top_bid,
            top_bid_user: tops.top_bid_user,
            top_user_aggregate: tops.top_user_aggregate,
            top_user_aggregate_user: tops.top_user_aggregate_user,
        })
    }

    /// Party-level top fields, the max over its buckets.
    pub fn get_party_aggregates(&self, party: PartyId) -> Result<PartyAggregates> {
        let p = self
            .store
            .party(party)
            .ok_or_else(|| CoreError::from(NotFound::Party(party)))?;
        let tops = if p.tops_stale {
            self.maintainer().refresh_party_tops(party)?
        } else {
            p.tops
        };
        Ok(flatten_tops(&tops))
    }

    /// The Global Party's computed view, never stored.
    pub fn get_global_media_view(
        &self,
        limit: Option<usize>,
        sort: GlobalViewSort,
    ) -> Vec<GlobalMediaEntry> {
        Projector::new(&self.store).global_media_view(limit, sort)
    }

    // =========================================================================
    // Repair jobs
    // =========================================================================

    pub fn run_sweep(&self, dry_run: bool) -> Result<SweepReport> {
        Sweeper::new(&self.store, &self.config)
            .run(dry_run)
            .map_err(Error::from)
    }

    pub fn run_backfill(
        &self,
        dry_run: bool,
        scope: Option<BackfillScope>,
    ) -> Result<BackfillReport> {
        Backfill::new(&self.store).run(dry_run, scope).map_err(Error::from)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
