//! Referential Integrity Sweeper: finds ledger records whose user,
//! party, or media no longer resolve, and repairs them.
//!
//! Policy:
//!  (a) missing party only: reassign to the Global Party, retag
//!      scope=global, restub the snapshot, re-apply the delta at the
//!      new home;
//!  (b) missing user AND missing media: delete the bid and unwind its
//!      contribution wherever it was still counted;
//!  (c) missing user only, or missing media only: keep the bid,
//!      restub the affected snapshot fields.
//!
//! Orphans are never request-time errors; this job runs post-hoc and
//! is idempotent - a second pass over repaired state changes nothing.
//! Runs serialize against Backfill through the store's maintenance
//! mutex; ordinary placements may proceed concurrently.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::{Bid, BidId, BidScope, CoreError, NotFound, PartyId};
use crate::store::Store;

/// What the sweeper did (or would do, in dry-run) to one bid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SweepAction {
    /// Missing party: bid moved to the Global Party.
    Reassign { bid: BidId, from_party: PartyId },
    /// Missing user and media: bid removed, contribution unwound.
    Delete { bid: BidId },
    /// Missing user or media: snapshot fields restubbed in place.
    Restub { bid: BidId },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub scanned: usize,
    pub reassigned: usize,
    pub deleted: usize,
    pub restubbed: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub actions: Vec<SweepAction>,
}

pub struct Sweeper<'a> {
    store: &'a Store,
    config: &'a EngineConfig,
}

impl<'a> Sweeper<'a> {
    pub fn new(store: &'a Store, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn run(&self, dry_run: bool) -> Result<SweepReport, CoreError> {
        let _guard = self.store.maintenance_guard();

        let mut report = SweepReport {
            dry_run,
            ..SweepReport::default()
        };

        let bids = self.store.bids_snapshot();
        report.scanned = bids.len();

        for batch in bids.chunks(self.config.sweep_batch_size.max(1)) {
            for bid in batch {
                // The snapshot may lag concurrent writers; re-read.
                let Some(current) = self.store.bid(bid.id) else {
                    continue;
                };
                self.sweep_one(&current, dry_run, &mut report)?;
            }
        }

        info!(
            dry_run,
            scanned = report.scanned,
            reassigned = report.reassigned,
            deleted = report.deleted,
            restubbed = report.restubbed,
            "sweep finished"
        );
        Ok(report)
    }

    fn sweep_one(
        &self,
        bid: &Bid,
        dry_run: bool,
        report: &mut SweepReport,
    ) -> Result<(), CoreError> {
        let user_ok = self.store.user(bid.user).is_some();
        let media_ok = self.store.media(bid.media).is_some();
        let party_ok = self.store.party(bid.party).is_some();

        if !user_ok && !media_ok {
            // (b) Unrecoverable: no entity can own its contribution.
            report.deleted += 1;
            report.actions.push(SweepAction::Delete { bid: bid.id });
            if !dry_run {
                self.delete_orphan(bid);
            }
            return Ok(());
        }

        if !party_ok {
            // (a) Recoverable: rehome on the Global Party.
            report.reassigned += 1;
            report.actions.push(SweepAction::Reassign {
                bid: bid.id,
                from_party: bid.party,
            });
            if !dry_run {
                self.reassign_to_global(bid)?;
            }
            return Ok(());
        }

        // (c) Entities resolve except user or media; the record stays,
        // only its snapshot goes stale.
        let restub = self.restubbed_snapshot(bid, user_ok, media_ok);
        if let Some(snapshot) = restub {
            report.restubbed += 1;
            report.actions.push(SweepAction::Restub { bid: bid.id });
            if !dry_run {
                self.store.update_bid(bid.id, |b| b.snapshot = snapshot)?;
            }
        }
        Ok(())
    }

    /// New snapshot if stubbing would change anything, else None (the
    /// idempotence check).
    fn restubbed_snapshot(
        &self,
        bid: &Bid,
        user_ok: bool,
        media_ok: bool,
    ) -> Option<crate::core::BidSnapshot> {
        if user_ok && media_ok {
            return None;
        }
        let mut snapshot = bid.snapshot.clone();
        if !user_ok {
            snapshot.username = self.config.deleted_user_label.clone();
        }
        if !media_ok {
            snapshot.media_title = self.config.deleted_media_label.clone();
            snapshot.media_artist = None;
            snapshot.media_cover_url = None;
            snapshot.media_duration_ms = None;
        }
        if snapshot == bid.snapshot {
            None
        } else {
            Some(snapshot)
        }
    }

    /// Policy (b): unwind the contribution wherever it still counts,
    /// then drop the record.
    fn delete_orphan(&self, bid: &Bid) {
        if bid.contributes() {
            if bid.scope == BidScope::Party && self.store.party(bid.party).is_some() {
                if let Err(e) =
                    self.store
                        .bucket_sub(bid.party, bid.media, bid.user, bid.id, bid.amount)
                {
                    // Bucket may already be gone; nothing left to unwind.
                    debug!(bid = %bid.id, error = %e, "orphan delete: no bucket to unwind");
                }
            }
            // Media is gone here by definition of (b); its aggregate
            // died with it.
        }
        self.store.media_untrack_global_bid(bid.media, bid.id);
        self.store.remove_bid(bid.id);
        debug!(bid = %bid.id, "deleted unrecoverable orphan");
    }

    /// Policy (a): inverse delta at the old home, retag, forward delta
    /// at the new one. For party-scoped orphans the media's global
    /// aggregate already counted the bid, so the sub/add pair
    /// nets to zero there - no double count.
    fn reassign_to_global(&self, bid: &Bid) -> Result<(), CoreError> {
        let global_party = self.store.global_party_id().ok_or(NotFound::GlobalParty)?;
        let global_name = self
            .store
            .party(global_party)
            .map(|p| p.name)
            .unwrap_or_default();

        let was_party_scoped = bid.scope == BidScope::Party;
        if bid.contributes() && was_party_scoped {
            // Old party is gone (its buckets with it); only the media
            // aggregate still carries the party-scope contribution.
            if let Err(e) = self.store.media_sub_global(bid.media, bid.amount) {
                warn!(bid = %bid.id, error = %e, "reassign: old contribution already gone");
            }
        }

        let user = self.store.user(bid.user);
        let media = self.store.media(bid.media);
        let contributes = bid.contributes();

        self.store.update_bid(bid.id, |b| {
            b.party = global_party;
            b.scope = BidScope::Global;
            b.snapshot.party_name = global_name.clone();
            b.snapshot.username = user
                .as_ref()
                .map(|u| u.name.clone())
                .unwrap_or_else(|| self.config.deleted_user_label.clone());
            match &media {
                Some(m) => {
                    b.snapshot.media_title = m.title.clone();
                    b.snapshot.media_artist = m.artist.clone();
                    b.snapshot.media_cover_url = m.cover_url.clone();
                    b.snapshot.media_duration_ms = m.duration_ms;
                }
                None => {
                    b.snapshot.media_title = self.config.deleted_media_label.clone();
                    b.snapshot.media_artist = None;
                    b.snapshot.media_cover_url = None;
                    b.snapshot.media_duration_ms = None;
                }
            }
        })?;

        if media.is_some() {
            self.store.media_track_global_bid(bid.media, bid.id)?;
            if contributes && was_party_scoped {
                // Forward delta at the new home.
                self.store.media_add_global(bid.media, bid.amount)?;
            }
        }
        debug!(bid = %bid.id, %global_party, "reassigned orphan to global party");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Amount, BidSnapshot, BidStatus, Media, MediaId, Party, PartyKind, User, UserId,
    };

    fn engine_parts() -> (Store, EngineConfig) {
        (Store::new(), EngineConfig::default())
    }

    fn raw_bid(store: &Store, party: PartyId, media: MediaId, user: UserId, amount: u64) -> Bid {
        Bid {
            id: BidId::generate(),
            user,
            party,
            media,
            amount: Amount::new(amount),
            status: BidStatus::Active,
            scope: BidScope::Party,
            created: store.next_stamp(),
            snapshot: BidSnapshot {
                username: "ada".into(),
                party_name: "friday".into(),
                media_title: "song".into(),
                ..BidSnapshot::default()
            },
        }
    }

    #[test]
    fn clean_ledger_sweeps_to_nothing() {
        let (store, config) = engine_parts();
        let user = UserId::generate();
        store.insert_user(User::new(user, "ada"));
        let media = MediaId::generate();
        store.insert_media(Media::new(media, "song"));
        let party = Party::new(PartyId::generate(), "friday", PartyKind::Standard);
        let party_id = party.id;
        store.insert_party(party);
        store.insert_bid(raw_bid(&store, party_id, media, user, 500));

        let report = Sweeper::new(&store, &config).run(false).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.reassigned + report.deleted + report.restubbed, 0);
    }

    #[test]
    fn missing_user_only_restubs_and_is_idempotent() {
        let (store, config) = engine_parts();
        let media = MediaId::generate();
        store.insert_media(Media::new(media, "song"));
        let party = Party::new(PartyId::generate(), "friday", PartyKind::Standard);
        let party_id = party.id;
        store.insert_party(party);
        let bid = raw_bid(&store, party_id, media, UserId::generate(), 500);
        let bid_id = bid.id;
        store.insert_bid(bid);

        let sweeper = Sweeper::new(&store, &config);
        let first = sweeper.run(false).unwrap();
        assert_eq!(first.restubbed, 1);
        assert_eq!(first.deleted, 0);
        assert_eq!(
            store.bid(bid_id).unwrap().snapshot.username,
            "Deleted User"
        );

        let second = sweeper.run(false).unwrap();
        assert_eq!(second.restubbed, 0);
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let (store, config) = engine_parts();
        // user and media both unresolvable: candidate for deletion
        let party = Party::new(PartyId::generate(), "friday", PartyKind::Standard);
        let party_id = party.id;
        store.insert_party(party);
        let bid = raw_bid(&store, party_id, MediaId::generate(), UserId::generate(), 500);
        let bid_id = bid.id;
        store.insert_bid(bid);

        let report = Sweeper::new(&store, &config).run(true).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.bid(bid_id).is_some(), "dry run must not delete");
    }
}
