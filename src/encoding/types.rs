use core::fmt::Debug;

use rand::{distributions::Standard, prelude::Distribution};
use serde::Serialize;
use uint::construct_uint;

use super::Error;

macro_rules! impl_hex_debug {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }
    };
}

macro_rules! bytesN {
    ( $(#[$meta:meta])* $T:ident, $N:literal ) => {
        $(#[$meta])*
        #[derive(PartialEq, Eq, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl $T {
            pub const LEN: usize = $N;

            /// Converts a byte slice of exactly `LEN` bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
                let arr: [u8; $N] =
                    bytes
                        .try_into()
                        .map_err(|_| Error::IdentityLengthMismatch {
                            expected: $N,
                            actual: bytes.len(),
                        })?;
                Ok(Self(arr))
            }

            /// Parses a hex string, with or without `0x` prefix.
            pub fn from_hex(s: &str) -> Result<Self, Error> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(|_| Error::InvalidHex)?;
                Self::from_slice(&bytes)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                $T(rng.gen())
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl AsRef<[u8]> for $T {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl_hex_debug!($T);
    };
}

bytesN!(Hash, 32);

bytesN!(
    /// Off-chain identity of a channel participant (ed25519 public key).
    Address,
    32
);
bytesN!(
    /// ed25519 signature over a canonical encoding.
    Signature,
    64
);
bytesN!(
    /// Ledger account identifier (receiver of transfers and withdrawals).
    AccountId,
    32
);

// Same reasoning as in go-perun: nonces and balances are big integers. The
// canonical encoding writes them with a fixed width, so a 256 bit integer is
// wide enough for everything the canister accepts.
construct_uint! {
    pub struct U256(4);
}

/// Width of a single encoded balance.
pub const BALANCE_WIDTH: usize = 32;

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Nonces are written big-endian. Balances use the `as_le` wrapper.
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        serializer.serialize_bytes(&bytes)
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

/// Serde helper writing a [U256] as fixed-width little-endian integer.
///
/// The bytes are the reversal of the big-endian representation, which is
/// what the canister recomputes when checking signatures.
pub mod as_le {
    use super::{U256, BALANCE_WIDTH};
    use serde::Serializer;

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&to_le_bytes(value))
    }

    pub fn to_le_bytes(value: &U256) -> [u8; BALANCE_WIDTH] {
        let mut bytes = [0u8; BALANCE_WIDTH];
        value.to_big_endian(&mut bytes);
        bytes.reverse();
        bytes
    }
}

/// Serde helper for fixed-size arrays of [U256] balances.
pub mod as_le_array {
    use super::{as_le, U256};
    use serde::{ser::SerializeTuple, Serialize, Serializer};

    struct Le<'a>(&'a U256);

    impl<'a> Serialize for Le<'a> {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            as_le::serialize(self.0, serializer)
        }
    }

    pub fn serialize<S, const N: usize>(value: &[U256; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut tup = serializer.serialize_tuple(N)?;
        for v in value {
            tup.serialize_element(&Le(v))?;
        }
        tup.end()
    }
}

/// Parses a nonce from its big-endian bytes.
///
/// Leading zero bytes are ignored, anything wider than 256 bit is rejected.
pub fn nonce_from_be_bytes(bytes: &[u8]) -> Result<U256, Error> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.len() > 32 {
        return Err(Error::NonceOutOfRange);
    }
    Ok(U256::from_big_endian(significant))
}
