//! Backfill/Recompute Engine: full, deterministic reconstruction of
//! every cached aggregate directly from the ledger, ignoring current
//! cache values entirely.
//!
//! Used for migration, drift repair, and schema evolution. Dry-run
//! computes and reports diffs without writing; a live run restores
//! the same rules the maintainer enforces, so running it twice in a row diffs to nothing.
//! Serializes against the Sweeper through the maintenance mutex;
//! concurrent placements are safe - their incremental deltas land on
//! top of ledger-derived truth.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::{Amount, Bid, BidScope, Bucket, CoreError, MediaId, PartyId, Tops};
use crate::maintain::rebuild_bucket;
use crate::store::Store;

/// Restrict a run to one party's buckets or one media's aggregates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillScope {
    Party(PartyId),
    Media(MediaId),
}

/// One cached field that disagrees with ledger-derived truth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackfillDiff {
    pub entity: String,
    pub field: String,
    pub cached: Value,
    pub recomputed: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub dry_run: bool,
    pub buckets_rewritten: usize,
    pub media_rewritten: usize,
    pub parties_rewritten: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub diffs: Vec<BackfillDiff>,
}

pub struct Backfill<'a> {
    store: &'a Store,
}

impl<'a> Backfill<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn run(
        &self,
        dry_run: bool,
        scope: Option<BackfillScope>,
    ) -> Result<BackfillReport, CoreError> {
        let _guard = self.store.maintenance_guard();

        let mut report = BackfillReport {
            dry_run,
            ..BackfillReport::default()
        };

        let bids = self.store.bids_snapshot();

        match scope {
            None => {
                for party in self.store.party_ids() {
                    self.backfill_party(party, &bids, dry_run, &mut report)?;
                }
                for media in self.store.media_ids() {
                    self.backfill_media(media, &bids, dry_run, &mut report)?;
                }
            }
            Some(BackfillScope::Party(party)) => {
                self.backfill_party(party, &bids, dry_run, &mut report)?;
            }
            Some(BackfillScope::Media(media)) => {
                self.backfill_media(media, &bids, dry_run, &mut report)?;
            }
        }

        info!(
            dry_run,
            buckets = report.buckets_rewritten,
            media = report.media_rewritten,
            parties = report.parties_rewritten,
            diffs = report.diffs.len(),
            "backfill finished"
        );
        Ok(report)
    }

    /// Rebuild every bucket of one party plus its party-level tops.
    fn backfill_party(
        &self,
        party_id: PartyId,
        bids: &[Bid],
        dry_run: bool,
        report: &mut BackfillReport,
    ) -> Result<(), CoreError> {
        let Some(party) = self.store.party(party_id) else {
            return Ok(());
        };
        if party.is_global() {
            // The Global Party owns no buckets; its view is computed.
            return Ok(());
        }

        let mut by_media: BTreeMap<MediaId, Vec<&Bid>> = BTreeMap::new();
        for bid in bids {
            if bid.contributes() && bid.scope == BidScope::Party && bid.party == party_id {
                by_media.entry(bid.media).or_default().push(bid);
            }
        }

        // Every media the cache knows about or the ledger mentions.
        let mut media_ids: BTreeSet<MediaId> = party.buckets.keys().copied().collect();
        media_ids.extend(by_media.keys().copied());

        let mut party_tops = Tops::default();
        for media_id in media_ids {
            let expected = match by_media.get(&media_id) {
                Some(group) => rebuild_bucket(group.iter().copied()),
                None => Bucket::new(),
            };
            party_tops.merge_max(&expected.tops);

            let cached = party.buckets.get(&media_id);
            let dirty = match cached {
                Some(cached) => !buckets_equal(cached, &expected),
                // A bucket the cache never materialized and the ledger
                // doesn't fund either needs no write.
                None => !expected.is_empty(),
            };
            if dirty {
                diff_bucket(
                    &format!("bucket({party_id}, {media_id})"),
                    cached,
                    &expected,
                    report,
                );
                report.buckets_rewritten += 1;
                if !dry_run {
                    self.store.replace_bucket(party_id, media_id, expected)?;
                    debug!(party = %party_id, media = %media_id, "bucket rewritten");
                }
            }
        }

        if party.tops != party_tops || party.tops_stale {
            if party.tops != party_tops {
                diff_tops(&format!("party({party_id})"), &party.tops, &party_tops, report);
            }
            report.parties_rewritten += 1;
            if !dry_run {
                self.store.replace_party_tops(party_id, party_tops)?;
            }
        }
        Ok(())
    }

    /// Rebuild one media's global aggregate and global-bid refs.
    fn backfill_media(
        &self,
        media_id: MediaId,
        bids: &[Bid],
        dry_run: bool,
        report: &mut BackfillReport,
    ) -> Result<(), CoreError> {
        let Some(media) = self.store.media(media_id) else {
            return Ok(());
        };

        let expected: Amount = bids
            .iter()
            .filter(|b| b.contributes_to_media(media_id))
            .map(|b| b.amount)
            .sum();
        let expected_refs: BTreeSet<_> = bids
            .iter()
            .filter(|b| b.media == media_id && b.scope == BidScope::Global)
            .map(|b| b.id)
            .collect();

        if media.global_aggregate != expected {
            report.diffs.push(BackfillDiff {
                entity: format!("media({media_id})"),
                field: "global_aggregate".into(),
                cached: to_value(&media.global_aggregate),
                recomputed: to_value(&expected),
            });
        }
        if media.global_aggregate != expected || media.global_bids != expected_refs {
            report.media_rewritten += 1;
            if !dry_run {
                self.store.replace_media_global(media_id, expected)?;
                for bid in expected_refs.difference(&media.global_bids) {
                    self.store.media_track_global_bid(media_id, *bid)?;
                }
                for bid in media.global_bids.difference(&expected_refs) {
                    self.store.media_untrack_global_bid(media_id, *bid);
                }
            }
        }
        Ok(())
    }
}

/// Cache comparison that ignores bookkeeping (revision, stale flag).
fn buckets_equal(cached: &Bucket, expected: &Bucket) -> bool {
    !cached.tops_stale
        && cached.aggregate == expected.aggregate
        && cached.tops == expected.tops
        && cached.user_totals == expected.user_totals
}

fn diff_bucket(entity: &str, cached: Option<&Bucket>, expected: &Bucket, report: &mut BackfillReport) {
    let cached_aggregate = cached.map(|b| b.aggregate).unwrap_or(Amount::ZERO);
    if cached_aggregate != expected.aggregate {
        report.diffs.push(BackfillDiff {
            entity: entity.to_string(),
            field: "aggregate".into(),
            cached: to_value(&cached_aggregate),
            recomputed: to_value(&expected.aggregate),
        });
    }
    let cached_tops = cached.map(|b| b.tops.clone()).unwrap_or_default();
    if cached_tops != expected.tops {
        diff_tops(entity, &cached_tops, &expected.tops, report);
    }
}

fn diff_tops(entity: &str, cached: &Tops, expected: &Tops, report: &mut BackfillReport) {
    if cached.top_bid != expected.top_bid {
        report.diffs.push(BackfillDiff {
            entity: entity.to_string(),
            field: "top_bid".into(),
            cached: to_value(&cached.top_bid),
            recomputed: to_value(&expected.top_bid),
        });
    }
    if cached.top_user_aggregate != expected.top_user_aggregate {
        report.diffs.push(BackfillDiff {
            entity: entity.to_string(),
            field: "top_user_aggregate".into(),
            cached: to_value(&cached.top_user_aggregate),
            recomputed: to_value(&expected.top_user_aggregate),
        });
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
