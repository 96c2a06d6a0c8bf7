//! Layer 1: Identity atoms
//!
//! UserId: bidder identity (referenced, never owned)
//! PartyId: listening session identifier
//! MediaId: content item identifier
//! BidId: ledger record identifier

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id! {
    /// Bidder identity. The engine references users, it never owns them.
    UserId
}

uuid_id! {
    /// Listening session identifier.
    PartyId
}

uuid_id! {
    /// Content item identifier.
    MediaId
}

uuid_id! {
    /// Ledger record identifier. Only the ledger generates new ones.
    BidId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(BidId::generate(), BidId::generate());
        assert_ne!(PartyId::generate(), PartyId::generate());
    }

    #[test]
    fn display_is_bare_uuid_debug_is_wrapped() {
        let raw = Uuid::from_bytes([7u8; 16]);
        let id = MediaId::new(raw);
        assert_eq!(id.to_string(), raw.to_string());
        assert!(format!("{id:?}").starts_with("MediaId("));
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId::new(Uuid::from_bytes([3u8; 16]));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
