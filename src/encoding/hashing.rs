use super::{to_writer, types::Hash, Error, Writer};

use serde::Serialize;
use sha2::{digest::Output, Digest, Sha512};

#[derive(Default)]
pub struct Sha512Writer {
    hasher: Sha512,
}

impl Writer for Sha512Writer {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

impl Sha512Writer {
    pub fn finalize(self) -> Output<Sha512> {
        self.hasher.finalize()
    }
}

/// Copies the first `N` bytes of a digest, failing if it is too short.
pub fn truncate<const N: usize>(digest: &[u8]) -> Result<[u8; N], Error> {
    digest
        .get(..N)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or(Error::HashTooShort {
            needed: N,
            actual: digest.len(),
        })
}

/// SHA-512 over the canonical encoding of `value`, truncated to 32 bytes.
pub fn to_hash<T>(value: &T) -> Result<Hash, Error>
where
    T: Serialize,
{
    let mut writer = Sha512Writer::default();
    to_writer(value, &mut writer)?;
    Ok(Hash(truncate(&writer.finalize())?))
}

/// SHA-512 over the concatenation of `parts`, truncated to `N` bytes.
pub fn digest_prefix<const N: usize>(parts: &[&[u8]]) -> Result<[u8; N], Error> {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    truncate(&hasher.finalize())
}
