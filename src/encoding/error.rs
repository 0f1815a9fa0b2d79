//! Error type and Return values used by the canonical encoding.

use serde::ser;

/// Represents all possible errors that can happen while building or writing
/// the canonical encoding of channel data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A participant identity (or another fixed-width value) did not have the
    /// expected number of bytes.
    #[error("identity has {actual} bytes, expected {expected}")]
    IdentityLengthMismatch { expected: usize, actual: usize },
    /// The nonce does not fit into 256 bit.
    #[error("nonce does not fit into 32 bytes")]
    NonceOutOfRange,
    /// Number of balances/signatures does not match the number of
    /// participants.
    #[error("allocation has {balances} entries for {participants} participants")]
    AllocationIncompatible { balances: usize, participants: usize },
    /// The channel is not a single-asset, two-party channel without locked
    /// funds or app data.
    #[error("incompatible state: {0}")]
    IncompatibleState(&'static str),
    /// A balance is negative or exceeds [MAX_BALANCE](crate::channel::MAX_BALANCE).
    #[error("balance {0} out of range")]
    BalanceOutOfRange(i128),
    /// The value could not be parsed as hex.
    #[error("invalid hex string")]
    InvalidHex,
    /// The digest is shorter than the requested truncation.
    #[error("hash output has {actual} bytes, need {needed}")]
    HashTooShort { needed: usize, actual: usize },
    /// The struct contains a type that has no fixed-width representation,
    /// for example floats, strings or maps.
    #[error("type is not representable in the canonical encoding: {0}")]
    TypeNotRepresentable(&'static str),
    /// Raised through [ser::Error::custom].
    #[error("{0}")]
    Custom(String),
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::Custom(msg.to_string())
    }
}

/// Alias for `Result` using the [Error] of the encoding.
pub type Result<T> = core::result::Result<T, Error>;
