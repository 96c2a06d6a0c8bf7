//! Shared entity store: registries (users, parties, media) plus the
//! bid ledger, with the atomic conditional operations the Aggregation
//! Maintainer is built on.
//!
//! Contract: sum updates are unconditional increments applied under the
//! lock (never read-outside/mutate/write-back); top-field updates go
//! through a compare-and-set keyed on the bucket (or party) revision,
//! so a comparison computed against a stale read fails instead of
//! silently losing an update.
//!
//! Bulk rewrites (whole-bucket replacement, aggregate overwrite) are
//! reserved for the Sweeper and the Backfill Engine, which serialize
//! against each other through the maintenance mutex.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use crate::core::{
    Amount, Bid, BidId, Bucket, LedgerStamp, Media, MediaId, NotFound, Party, PartyId,
    PartyKind, ReferenceError, Tops, User, UserId, UserTotal, WallClock,
};

/// Post-increment levels returned by [`Store::bucket_add`]; the inputs
/// for the caller's top-candidate comparison.
#[derive(Clone, Debug)]
pub struct BucketLevels {
    pub aggregate: Amount,
    pub user_total: UserTotal,
    pub revision: u64,
}

/// Outcome of an inverse delta on a bucket.
#[derive(Clone, Debug)]
pub struct BucketRemoval {
    /// The removed holder was the cached top bid or top user aggregate;
    /// the bucket's tops were marked stale.
    pub tops_invalidated: bool,
    /// The party-level tops referenced the same holder and were marked
    /// stale too.
    pub party_tops_invalidated: bool,
}

/// Snapshot for a revision-guarded top comparison.
///
/// Bucket snapshots also carry the acting user's running total, read
/// in the same critical section as the revision: a candidate derived
/// from it is exactly as fresh as the CAS that guards the write.
#[derive(Clone, Debug)]
pub struct TopsSnapshot {
    pub revision: u64,
    pub tops: Tops,
    pub stale: bool,
    pub user_total: Option<UserTotal>,
}

/// CAS failure: the revision moved between snapshot and write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevisionConflict;

pub struct Store {
    users: RwLock<BTreeMap<UserId, User>>,
    media: RwLock<BTreeMap<MediaId, Media>>,
    parties: RwLock<BTreeMap<PartyId, Party>>,
    bids: RwLock<BTreeMap<BidId, Bid>>,
    /// Ledger append counter; the seq half of every [`LedgerStamp`].
    seq: AtomicU64,
    /// Serializes Sweeper and Backfill runs. Bid placement never takes
    /// this - both jobs derive truth from the ledger and tolerate
    /// concurrent incremental deltas.
    maintenance: Mutex<()>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
            media: RwLock::new(BTreeMap::new()),
            parties: RwLock::new(BTreeMap::new()),
            bids: RwLock::new(BTreeMap::new()),
            seq: AtomicU64::new(0),
            maintenance: Mutex::new(()),
        }
    }

    pub fn maintenance_guard(&self) -> MutexGuard<'_, ()> {
        self.maintenance.lock().expect("maintenance lock poisoned")
    }

    // =========================================================================
    // Registries
    // =========================================================================

    pub fn insert_user(&self, user: User) {
        self.users
            .write()
            .expect("user registry lock poisoned")
            .insert(user.id, user);
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.users
            .read()
            .expect("user registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn remove_user(&self, id: UserId) -> Option<User> {
        self.users
            .write()
            .expect("user registry lock poisoned")
            .remove(&id)
    }

    pub fn resolve_user(&self, id: UserId) -> Result<User, ReferenceError> {
        self.user(id).ok_or(ReferenceError::User(id))
    }

    pub fn insert_media(&self, media: Media) {
        self.media
            .write()
            .expect("media registry lock poisoned")
            .insert(media.id, media);
    }

    pub fn media(&self, id: MediaId) -> Option<Media> {
        self.media
            .read()
            .expect("media registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn remove_media(&self, id: MediaId) -> Option<Media> {
        self.media
            .write()
            .expect("media registry lock poisoned")
            .remove(&id)
    }

    pub fn resolve_media(&self, id: MediaId) -> Result<Media, ReferenceError> {
        self.media(id).ok_or(ReferenceError::Media(id))
    }

    pub fn media_ids(&self) -> Vec<MediaId> {
        self.media
            .read()
            .expect("media registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    pub fn insert_party(&self, party: Party) {
        self.parties
            .write()
            .expect("party registry lock poisoned")
            .insert(party.id, party);
    }

    pub fn party(&self, id: PartyId) -> Option<Party> {
        self.parties
            .read()
            .expect("party registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn remove_party(&self, id: PartyId) -> Option<Party> {
        self.parties
            .write()
            .expect("party registry lock poisoned")
            .remove(&id)
    }

    pub fn resolve_party_kind(&self, id: PartyId) -> Result<PartyKind, ReferenceError> {
        self.parties
            .read()
            .expect("party registry lock poisoned")
            .get(&id)
            .map(|p| p.kind)
            .ok_or(ReferenceError::Party(id))
    }

    pub fn party_ids(&self) -> Vec<PartyId> {
        self.parties
            .read()
            .expect("party registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// The Global Party, resolved by kind tag - never by a well-known
    /// identifier.
    pub fn global_party_id(&self) -> Option<PartyId> {
        self.parties
            .read()
            .expect("party registry lock poisoned")
            .values()
            .find(|p| p.is_global())
            .map(|p| p.id)
    }

    pub fn party_contains_entry(&self, party: PartyId, media: MediaId) -> bool {
        self.parties
            .read()
            .expect("party registry lock poisoned")
            .get(&party)
            .is_some_and(|p| p.entries.contains(&media))
    }

    pub fn push_party_entry(&self, party: PartyId, media: MediaId) -> Result<(), NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        if !p.entries.contains(&media) {
            p.entries.push(media);
        }
        Ok(())
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Assign the next creation stamp. Monotonic seq; the wall half is
    /// audit only.
    pub fn next_stamp(&self) -> LedgerStamp {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        LedgerStamp::new(WallClock::now().0, seq)
    }

    pub fn insert_bid(&self, bid: Bid) {
        self.bids
            .write()
            .expect("ledger lock poisoned")
            .insert(bid.id, bid);
    }

    pub fn bid(&self, id: BidId) -> Option<Bid> {
        self.bids
            .read()
            .expect("ledger lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn remove_bid(&self, id: BidId) -> Option<Bid> {
        self.bids.write().expect("ledger lock poisoned").remove(&id)
    }

    /// Mutate one ledger record in place. Status transitions and
    /// Sweeper repairs only.
    pub fn update_bid<T>(
        &self,
        id: BidId,
        f: impl FnOnce(&mut Bid) -> T,
    ) -> Result<T, NotFound> {
        let mut bids = self.bids.write().expect("ledger lock poisoned");
        let bid = bids.get_mut(&id).ok_or(NotFound::Bid(id))?;
        Ok(f(bid))
    }

    /// Clone the whole ledger for a scan. Sweeper/backfill/projector
    /// read path; bounded by ledger size, never taken per placement.
    pub fn bids_snapshot(&self) -> Vec<Bid> {
        self.bids
            .read()
            .expect("ledger lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Bids matching a predicate, cloned out under the read lock.
    pub fn bids_where(&self, mut pred: impl FnMut(&Bid) -> bool) -> Vec<Bid> {
        self.bids
            .read()
            .expect("ledger lock poisoned")
            .values()
            .filter(|b| pred(b))
            .cloned()
            .collect()
    }

    // =========================================================================
    // Bucket atomics backing the maintainer incremental path
    // =========================================================================

    /// Unconditional increments: bucket aggregate and the bidder's
    /// running total, one critical section, revision bumped once.
    /// Creates the bucket lazily (self-healing `BucketNotFound`).
    pub fn bucket_add(
        &self,
        party: PartyId,
        media: MediaId,
        user: UserId,
        amount: Amount,
        stamp: LedgerStamp,
    ) -> Result<BucketLevels, NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        let bucket = p.buckets.entry(media).or_default();

        bucket.aggregate = bucket
            .aggregate
            .checked_add(amount)
            .unwrap_or_else(|| {
                tracing::warn!(%party, %media, "bucket aggregate saturated");
                Amount::new(u64::MAX)
            });
        let total = bucket
            .user_totals
            .entry(user)
            .and_modify(|t| {
                t.total = t.total.checked_add(amount).unwrap_or(t.total);
                if stamp < t.earliest {
                    t.earliest = stamp;
                }
            })
            .or_insert(UserTotal {
                total: amount,
                earliest: stamp,
            })
            .clone();
        bucket.revision += 1;

        Ok(BucketLevels {
            aggregate: bucket.aggregate,
            user_total: total,
            revision: bucket.revision,
        })
    }

    /// Inverse delta: subtract from the bucket aggregate and the user's
    /// running total; mark tops stale if the removed holder was cached
    /// at bucket or party level.
    pub fn bucket_sub(
        &self,
        party: PartyId,
        media: MediaId,
        user: UserId,
        bid: BidId,
        amount: Amount,
    ) -> Result<BucketRemoval, NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        let bucket = p
            .buckets
            .get_mut(&media)
            .ok_or(NotFound::Bucket { party, media })?;

        if bucket.aggregate.checked_sub(amount).is_none() {
            tracing::warn!(%party, %media, "bucket aggregate underflow; drift left for backfill");
        }
        bucket.aggregate = bucket.aggregate.saturating_sub(amount);
        if let Some(total) = bucket.user_totals.get_mut(&user) {
            total.total = total.total.saturating_sub(amount);
            if total.total.is_zero() {
                bucket.user_totals.remove(&user);
            }
        }

        let tops_invalidated = bucket.tops.held_by_bid(bid) || bucket.tops.held_by_user(user);
        if tops_invalidated {
            bucket.tops_stale = true;
        }
        bucket.revision += 1;

        let party_tops_invalidated = p.tops.held_by_bid(bid) || p.tops.held_by_user(user);
        if party_tops_invalidated {
            p.tops_stale = true;
            p.revision += 1;
        }

        Ok(BucketRemoval {
            tops_invalidated,
            party_tops_invalidated,
        })
    }

    pub fn bucket_tops_snapshot(
        &self,
        party: PartyId,
        media: MediaId,
        user: UserId,
    ) -> Result<TopsSnapshot, NotFound> {
        let parties = self.parties.read().expect("party registry lock poisoned");
        let p = parties.get(&party).ok_or(NotFound::Party(party))?;
        let bucket = p
            .buckets
            .get(&media)
            .ok_or(NotFound::Bucket { party, media })?;
        Ok(TopsSnapshot {
            revision: bucket.revision,
            tops: bucket.tops.clone(),
            stale: bucket.tops_stale,
            user_total: bucket.user_totals.get(&user).cloned(),
        })
    }

    /// Conditional write of the bucket's top fields: succeeds only if
    /// the revision still matches the snapshot the comparison was
    /// computed against.
    pub fn bucket_set_tops(
        &self,
        party: PartyId,
        media: MediaId,
        expected_revision: u64,
        tops: Tops,
    ) -> Result<Result<(), RevisionConflict>, NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        let bucket = p
            .buckets
            .get_mut(&media)
            .ok_or(NotFound::Bucket { party, media })?;
        if bucket.revision != expected_revision {
            return Ok(Err(RevisionConflict));
        }
        bucket.tops = tops;
        bucket.revision += 1;
        Ok(Ok(()))
    }

    pub fn party_tops_snapshot(&self, party: PartyId) -> Result<TopsSnapshot, NotFound> {
        let parties = self.parties.read().expect("party registry lock poisoned");
        let p = parties.get(&party).ok_or(NotFound::Party(party))?;
        Ok(TopsSnapshot {
            revision: p.revision,
            tops: p.tops.clone(),
            stale: p.tops_stale,
            user_total: None,
        })
    }

    pub fn party_set_tops(
        &self,
        party: PartyId,
        expected_revision: u64,
        tops: Tops,
    ) -> Result<Result<(), RevisionConflict>, NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        if p.revision != expected_revision {
            return Ok(Err(RevisionConflict));
        }
        p.tops = tops;
        p.revision += 1;
        Ok(Ok(()))
    }

    // =========================================================================
    // Media-level global aggregate
    // =========================================================================

    pub fn media_add_global(&self, id: MediaId, amount: Amount) -> Result<(), NotFound> {
        let mut media = self.media.write().expect("media registry lock poisoned");
        let m = media.get_mut(&id).ok_or(NotFound::Media(id))?;
        m.global_aggregate = m.global_aggregate.checked_add(amount).unwrap_or_else(|| {
            tracing::warn!(media = %id, "global aggregate saturated");
            Amount::new(u64::MAX)
        });
        Ok(())
    }

    pub fn media_sub_global(&self, id: MediaId, amount: Amount) -> Result<(), NotFound> {
        let mut media = self.media.write().expect("media registry lock poisoned");
        let m = media.get_mut(&id).ok_or(NotFound::Media(id))?;
        if m.global_aggregate.checked_sub(amount).is_none() {
            tracing::warn!(media = %id, "global aggregate underflow; drift left for backfill");
        }
        m.global_aggregate = m.global_aggregate.saturating_sub(amount);
        Ok(())
    }

    pub fn media_track_global_bid(&self, id: MediaId, bid: BidId) -> Result<(), NotFound> {
        let mut media = self.media.write().expect("media registry lock poisoned");
        let m = media.get_mut(&id).ok_or(NotFound::Media(id))?;
        m.global_bids.insert(bid);
        Ok(())
    }

    pub fn media_untrack_global_bid(&self, id: MediaId, bid: BidId) {
        let mut media = self.media.write().expect("media registry lock poisoned");
        if let Some(m) = media.get_mut(&id) {
            m.global_bids.remove(&bid);
        }
    }

    // =========================================================================
    // Bulk rewrites (Sweeper / Backfill only)
    // =========================================================================

    /// Replace a bucket wholesale with recomputed state. Clears the
    /// stale flag and bumps the revision so in-flight CAS writers lose.
    pub fn replace_bucket(
        &self,
        party: PartyId,
        media: MediaId,
        mut bucket: Bucket,
    ) -> Result<(), NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        let revision = p.buckets.get(&media).map(|b| b.revision).unwrap_or(0);
        bucket.revision = revision + 1;
        bucket.tops_stale = false;
        p.buckets.insert(media, bucket);
        Ok(())
    }

    pub fn drop_bucket(&self, party: PartyId, media: MediaId) -> Result<(), NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        p.buckets.remove(&media);
        Ok(())
    }

    pub fn replace_party_tops(&self, party: PartyId, tops: Tops) -> Result<(), NotFound> {
        let mut parties = self.parties.write().expect("party registry lock poisoned");
        let p = parties.get_mut(&party).ok_or(NotFound::Party(party))?;
        p.tops = tops;
        p.tops_stale = false;
        p.revision += 1;
        Ok(())
    }

    pub fn replace_media_global(&self, id: MediaId, aggregate: Amount) -> Result<(), NotFound> {
        let mut media = self.media.write().expect("media registry lock poisoned");
        let m = media.get_mut(&id).ok_or(NotFound::Media(id))?;
        m.global_aggregate = aggregate;
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
