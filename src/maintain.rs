//! Aggregation Maintainer: applies one bid event's delta to the three
//! cache layers (bucket, party, media) without recomputing from
//! scratch.
//!
//! Sum updates are unconditional increments. Top-field updates are
//! computed against a revision snapshot and written with a
//! compare-and-set; a lost race retries up to the configured bound and
//! then surfaces [`StaleTopComparison`] - the bid itself is already
//! durable at that point, and backfill reconciles the tops.
//!
//! Inverse deltas (refund/veto) never attempt incremental
//! un-maximization: if the removed bid held a cached top slot, the slot
//! is marked stale and the true next-highest is recomputed on demand,
//! bounded to that single bucket.

use tracing::{debug, warn};

use crate::core::{
    Amount, Bid, BidScope, Bucket, CoreError, MediaId, NotFound, PartyId, StaleTopComparison,
    TopBid, TopUserAggregate, Tops, UserTotal,
};
use crate::store::{RevisionConflict, Store};

pub struct Maintainer<'a> {
    store: &'a Store,
    retry_limit: u32,
}

impl<'a> Maintainer<'a> {
    pub fn new(store: &'a Store, retry_limit: u32) -> Self {
        Self { store, retry_limit }
    }

    /// Apply a bid's forward delta. Used on placement and on
    /// reactivation (`vetoed -> active`); both add the same
    /// contribution back.
    pub fn apply(&self, bid: &Bid) -> Result<(), CoreError> {
        match bid.scope {
            BidScope::Global => {
                // The Global Party owns no buckets; only the media-level
                // aggregate and the global reference set move.
                self.store.media_add_global(bid.media, bid.amount)?;
                self.store.media_track_global_bid(bid.media, bid.id)?;
                debug!(bid = %bid.id, media = %bid.media, amount = %bid.amount, "applied global-scope delta");
                Ok(())
            }
            BidScope::Party => {
                self.store
                    .bucket_add(bid.party, bid.media, bid.user, bid.amount, bid.created)?;
                self.store.media_add_global(bid.media, bid.amount)?;

                let bid_candidate = TopBid {
                    amount: bid.amount,
                    user: bid.user,
                    bid: bid.id,
                    placed: bid.created,
                };

                let user_candidate = self.offer_bucket_tops(bid, &bid_candidate)?;
                self.offer_party_tops(bid, &bid_candidate, user_candidate.as_ref())?;
                debug!(bid = %bid.id, party = %bid.party, media = %bid.media, amount = %bid.amount,
                    "applied party-scope delta");
                Ok(())
            }
        }
    }

    /// Apply a bid's inverse delta (refund/veto): subtract from the
    /// sums, mark cached tops stale where the bid held them.
    pub fn unapply(&self, bid: &Bid) -> Result<(), CoreError> {
        match bid.scope {
            BidScope::Global => {
                self.store.media_sub_global(bid.media, bid.amount)?;
                Ok(())
            }
            BidScope::Party => {
                let removal =
                    self.store
                        .bucket_sub(bid.party, bid.media, bid.user, bid.id, bid.amount)?;
                self.store.media_sub_global(bid.media, bid.amount)?;
                if removal.tops_invalidated {
                    debug!(bid = %bid.id, party = %bid.party, media = %bid.media,
                        "removed bid held a top slot; bucket tops marked stale");
                }
                Ok(())
            }
        }
    }

    /// The user-total candidate is derived from the same snapshot the
    /// CAS guards: a writer delayed past a concurrent increment offers
    /// the newer total, never its own stale one.
    ///
    /// Returns the candidate that stood when the write (or the no-op
    /// comparison) settled, for the party-level merge.
    fn offer_bucket_tops(
        &self,
        bid: &Bid,
        bid_candidate: &TopBid,
    ) -> Result<Option<TopUserAggregate>, CoreError> {
        for attempt in 0..=self.retry_limit {
            let snap = self
                .store
                .bucket_tops_snapshot(bid.party, bid.media, bid.user)?;
            let user_candidate = snap.user_total.as_ref().map(|t| TopUserAggregate {
                amount: t.total,
                user: bid.user,
                earliest: t.earliest,
            });
            let mut tops = snap.tops.clone();
            let mut changed = tops.offer_bid(bid_candidate.clone());
            if let Some(candidate) = &user_candidate {
                changed |= tops.offer_user_aggregate(candidate.clone());
            }
            if !changed {
                return Ok(user_candidate);
            }
            match self
                .store
                .bucket_set_tops(bid.party, bid.media, snap.revision, tops)?
            {
                Ok(()) => return Ok(user_candidate),
                Err(RevisionConflict) => {
                    warn!(bid = %bid.id, attempt, "bucket top comparison raced; retrying");
                }
            }
        }
        Err(StaleTopComparison {
            party: bid.party,
            media: bid.media,
            bid: bid.id,
            retries: self.retry_limit,
        }
        .into())
    }

    fn offer_party_tops(
        &self,
        bid: &Bid,
        bid_candidate: &TopBid,
        user_candidate: Option<&TopUserAggregate>,
    ) -> Result<(), CoreError> {
        for _attempt in 0..=self.retry_limit {
            let snap = self.store.party_tops_snapshot(bid.party)?;
            // merge_max folds under the same earliest-wins rule the
            // buckets use; a no-op merge means the party tops already
            // dominate this bid's candidates. A lower same-user total
            // never beats the incumbent, so a delayed merge cannot
            // regress the party slot either.
            let mut merged = snap.tops.clone();
            merged.merge_max(&Tops {
                top_bid: Some(bid_candidate.clone()),
                top_user_aggregate: user_candidate.cloned(),
            });
            if merged == snap.tops {
                return Ok(());
            }
            match self.store.party_set_tops(bid.party, snap.revision, merged)? {
                Ok(()) => return Ok(()),
                Err(RevisionConflict) => continue,
            }
        }
        Err(StaleTopComparison {
            party: bid.party,
            media: bid.media,
            bid: bid.id,
            retries: self.retry_limit,
        }
        .into())
    }

    // =========================================================================
    // On-demand stale recompute (single bucket / single party)
    // =========================================================================

    /// Rebuild one bucket's cached fields from the ledger. Bounded to
    /// that bucket's bids; never scans the whole ledger's other homes.
    pub fn recompute_bucket(&self, party: PartyId, media: MediaId) -> Result<Bucket, CoreError> {
        let bids = self
            .store
            .bids_where(|b| b.contributes_to_bucket(party, media));
        let bucket = rebuild_bucket(bids.iter());
        self.store.replace_bucket(party, media, bucket.clone())?;
        debug!(%party, %media, "recomputed stale bucket tops");
        Ok(bucket)
    }

    /// Rebuild a party's top fields as the max over its buckets,
    /// recomputing any stale bucket first.
    pub fn refresh_party_tops(&self, party: PartyId) -> Result<Tops, CoreError> {
        let p = self.store.party(party).ok_or(NotFound::Party(party))?;
        let mut tops = Tops::default();
        for (media, bucket) in &p.buckets {
            let bucket_tops = if bucket.tops_stale {
                self.recompute_bucket(party, *media)?.tops
            } else {
                bucket.tops.clone()
            };
            tops.merge_max(&bucket_tops);
        }
        self.store.replace_party_tops(party, tops.clone())?;
        Ok(tops)
    }
}

/// Deterministic bucket reconstruction from its contributing bids.
///
/// Shared by the stale recompute and the Backfill Engine: both derive
/// truth from the ledger alone, independent of arrival order.
pub fn rebuild_bucket<'b>(bids: impl Iterator<Item = &'b Bid>) -> Bucket {
    let mut bucket = Bucket::new();
    for bid in bids {
        bucket.aggregate = bucket
            .aggregate
            .checked_add(bid.amount)
            .unwrap_or(Amount::new(u64::MAX));
        bucket
            .user_totals
            .entry(bid.user)
            .and_modify(|t| {
                t.total = t.total.checked_add(bid.amount).unwrap_or(t.total);
                if bid.created < t.earliest {
                    t.earliest = bid.created;
                }
            })
            .or_insert(UserTotal {
                total: bid.amount,
                earliest: bid.created,
            });
        bucket.tops.offer_bid(TopBid {
            amount: bid.amount,
            user: bid.user,
            bid: bid.id,
            placed: bid.created,
        });
    }
    // Per-user totals settle only after the full pass; derive the top
    // user aggregate from the finished map.
    let mut best: Option<TopUserAggregate> = None;
    for (user, total) in &bucket.user_totals {
        let candidate = TopUserAggregate {
            amount: total.total,
            user: *user,
            earliest: total.earliest,
        };
        match &best {
            Some(incumbent) if !candidate.beats(incumbent) => {}
            _ => best = Some(candidate),
        }
    }
    bucket.tops.top_user_aggregate = best;
    bucket
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BidId, BidSnapshot, BidStatus, LedgerStamp, UserId};

    fn bid(party: PartyId, media: MediaId, user: UserId, amount: u64, seq: u64) -> Bid {
        Bid {
            id: BidId::generate(),
            user,
            party,
            media,
            amount: Amount::new(amount),
            status: BidStatus::Active,
            scope: BidScope::Party,
            created: LedgerStamp::new(100, seq),
            snapshot: BidSnapshot::default(),
        }
    }

    #[test]
    fn rebuild_is_order_independent() {
        let party = PartyId::generate();
        let media = MediaId::generate();
        let u1 = UserId::generate();
        let u2 = UserId::generate();
        let bids = vec![
            bid(party, media, u1, 500, 1),
            bid(party, media, u2, 300, 2),
            bid(party, media, u2, 400, 3),
        ];
        let forward = rebuild_bucket(bids.iter());
        let reverse = rebuild_bucket(bids.iter().rev());
        assert_eq!(forward, reverse);
        assert_eq!(forward.aggregate, Amount::new(1200));
        // u2 total 700 beats u1 total 500.
        assert_eq!(
            forward.tops.top_user_aggregate.as_ref().unwrap().user,
            u2
        );
        assert_eq!(forward.tops.top_bid.as_ref().unwrap().amount, Amount::new(500));
    }

    #[test]
    fn rebuild_breaks_amount_ties_by_earliest() {
        let party = PartyId::generate();
        let media = MediaId::generate();
        let u1 = UserId::generate();
        let u2 = UserId::generate();
        let first = bid(party, media, u1, 500, 1);
        let first_id = first.id;
        let bids = vec![first, bid(party, media, u2, 500, 2)];
        let forward = rebuild_bucket(bids.iter());
        let reverse = rebuild_bucket(bids.iter().rev());
        assert_eq!(forward.tops.top_bid.as_ref().unwrap().bid, first_id);
        assert_eq!(reverse.tops.top_bid.as_ref().unwrap().bid, first_id);
        // Same totals, same tie: earliest user wins the aggregate slot.
        assert_eq!(forward.tops.top_user_aggregate.as_ref().unwrap().user, u1);
    }
}
