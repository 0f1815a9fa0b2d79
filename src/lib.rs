//! Perun payment channels anchored on an Internet Computer canister.
//!
//! The crate contains everything between the generic channel client and the
//! canister: canonical encodings for channel IDs, funding memos and state
//! signatures, the funding handshake, the dispute/conclude/withdraw client
//! and the subscription turning polled canister events into typed events.

pub mod encoding {
    mod error;
    mod hashing;
    mod ser;

    pub mod types;

    pub use error::{Error, Result};
    pub use hashing::{digest_prefix, to_hash, truncate, Sha512Writer};
    pub use ser::{to_bytes, to_writer, Serializer, Writer};
    pub use types::{as_le, as_le_array};

    #[cfg(test)]
    mod tests;
}

pub mod adjudicator;
pub mod cancel;
pub mod canister;
pub mod channel;
pub mod config;
pub mod connector;
pub mod funder;
pub mod ledger;
pub mod sig;
pub mod sim;
pub mod subscription;
pub mod wire;

pub use adjudicator::Adjudicator;
pub use connector::Connector;
pub use encoding::types::{AccountId, Address, Hash, Signature, U256};
pub use funder::Funder;
pub use subscription::EventSubscription;
