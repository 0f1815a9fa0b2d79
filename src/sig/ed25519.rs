//! Signer using the ed25519-dalek crate, the scheme the canister verifies.

use std::path::Path;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::{CryptoRng, RngCore};

use crate::{
    channel::{IcpState, State},
    encoding::{
        self,
        types::{Address, Signature},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not read key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("key file must contain a hex encoded 32 byte seed")]
    InvalidKey,
}

#[derive(Debug)]
pub struct Signer {
    key: SigningKey,
    addr: Address,
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        Address(key.to_bytes())
    }
}

impl Signer {
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_key(SigningKey::generate(rng))
    }

    /// Deterministic signer from a 32 byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_key(SigningKey::from_bytes(&seed))
    }

    /// Loads the seed from a file containing it hex encoded (surrounding
    /// whitespace and a `0x` prefix are ignored).
    pub fn from_key_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        let content = content.trim();
        let content = content.strip_prefix("0x").unwrap_or(content);
        let bytes = hex::decode(content).map_err(|_| Error::InvalidKey)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidKey)?;
        Ok(Self::from_seed(seed))
    }

    fn from_key(key: SigningKey) -> Self {
        let addr = key.verifying_key().into();
        Self { key, addr }
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature(self.key.sign(msg).to_bytes())
    }

    /// Signs the canonical encoding of `state`.
    pub fn sign_state(&self, state: &State) -> Result<Signature, encoding::Error> {
        self.sign_icp_state(&IcpState::try_from(state)?)
    }

    pub fn sign_icp_state(&self, state: &IcpState) -> Result<Signature, encoding::Error> {
        Ok(self.sign(&state.encode()?))
    }
}

pub(super) fn verify(addr: &Address, msg: &[u8], sig: &Signature) -> bool {
    let key = match VerifyingKey::from_bytes(&addr.0) {
        Ok(key) => key,
        Err(_) => return false,
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig.0);
    key.verify(msg, &sig).is_ok()
}
