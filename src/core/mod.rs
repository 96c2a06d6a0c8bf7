//! Domain layer: identity atoms, money/time primitives, entities, and
//! the core error taxonomy.

pub mod bid;
pub mod error;
pub mod identity;
pub mod media;
pub mod money;
pub mod party;
pub mod time;

pub use bid::{Bid, BidScope, BidSnapshot, BidStatus};
pub use error::{
    CoreError, InvalidTransition, NotFound, ReferenceError, StaleTopComparison, ValidationError,
};
pub use identity::{BidId, MediaId, PartyId, UserId};
pub use media::{Media, User};
pub use money::Amount;
pub use party::{Bucket, Party, PartyKind, TopBid, TopUserAggregate, Tops, UserTotal};
pub use time::{LedgerStamp, WallClock};
