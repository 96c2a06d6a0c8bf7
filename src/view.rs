//! Global View Projector: the Global Party's apparent content and
//! aggregates, computed on demand from the ledger - never persisted as
//! a duplicate of party-media buckets.
//!
//! Consistency with the stored aggregates holds by construction: every number here is
//! derived from the same ledger scan, at the cost of work proportional
//! to the number of bids on each media. Global reads are rare next to
//! bid writes, so the scan is the right trade.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Amount, Bid, MediaId, TopBid, TopUserAggregate, Tops, UserTotal};
use crate::store::Store;

/// Ranking key for the global media view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalViewSort {
    /// By global aggregate, descending (the leaderboard default).
    #[default]
    Aggregate,
    /// By highest single bid, descending.
    TopBid,
}

/// One row of the computed global view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMediaEntry {
    pub media: MediaId,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    pub global_aggregate: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_bid: Option<TopBid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_user_aggregate: Option<TopUserAggregate>,
}

pub struct Projector<'a> {
    store: &'a Store,
}

impl<'a> Projector<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// All media with at least one contributing bid anywhere, ranked.
    ///
    /// Ties order by `MediaId` so re-queries over unchanged data return
    /// the same sequence.
    pub fn global_media_view(
        &self,
        limit: Option<usize>,
        sort: GlobalViewSort,
    ) -> Vec<GlobalMediaEntry> {
        let bids = self
            .store
            .bids_where(|b| b.contributes());

        let mut grouped: BTreeMap<MediaId, Vec<Bid>> = BTreeMap::new();
        for bid in bids {
            grouped.entry(bid.media).or_default().push(bid);
        }

        let mut rows: Vec<GlobalMediaEntry> = grouped
            .into_iter()
            .map(|(media_id, bids)| {
                let (aggregate, tops) = project_media(&bids);
                let (title, artist) = match self.store.media(media_id) {
                    Some(m) => (m.title, m.artist),
                    // Media deleted after its bids landed; the Sweeper
                    // owns repair, the view just labels it.
                    None => ("Deleted Media".to_string(), None),
                };
                GlobalMediaEntry {
                    media: media_id,
                    title,
                    artist,
                    global_aggregate: aggregate,
                    top_bid: tops.top_bid,
                    top_user_aggregate: tops.top_user_aggregate,
                }
            })
            .collect();

        rows.sort_by(|a, b| match sort {
            GlobalViewSort::Aggregate => b
                .global_aggregate
                .cmp(&a.global_aggregate)
                .then_with(|| a.media.cmp(&b.media)),
            GlobalViewSort::TopBid => {
                let amount = |row: &GlobalMediaEntry| {
                    row.top_bid.as_ref().map(|t| t.amount).unwrap_or(Amount::ZERO)
                };
                amount(b).cmp(&amount(a)).then_with(|| a.media.cmp(&b.media))
            }
        });

        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        rows
    }
}

/// Global-scope projection for one media: sum and top fields over the
/// union of its party-scoped bids (any party) and global-scope bids.
fn project_media(bids: &[Bid]) -> (Amount, Tops) {
    let aggregate: Amount = bids.iter().map(|b| b.amount).sum();

    let mut tops = Tops::default();
    let mut user_totals: BTreeMap<_, UserTotal> = BTreeMap::new();
    for bid in bids {
        tops.offer_bid(TopBid {
            amount: bid.amount,
            user: bid.user,
            bid: bid.id,
            placed: bid.created,
        });
        user_totals
            .entry(bid.user)
            .and_modify(|t: &mut UserTotal| {
                t.total = t.total.checked_add(bid.amount).unwrap_or(t.total);
                if bid.created < t.earliest {
                    t.earliest = bid.created;
                }
            })
            .or_insert(UserTotal {
                total: bid.amount,
                earliest: bid.created,
            });
    }
    let mut best: Option<TopUserAggregate> = None;
    for (user, total) in &user_totals {
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
    tops.top_user_aggregate = best;

    (aggregate, tops)
}
