use serde::Serialize;

use super::ChannelId;
use crate::encoding::{self, digest_prefix, types::Address};

/// Correlation tag attached to a ledger transfer.
pub type Memo = u64;

/// A participant's share of a channel: `(channel, participant)`.
///
/// Holdings on the canister are addressed by funding, and the memo of the
/// ledger transfer is derived from it.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Funding {
    pub channel: ChannelId,
    pub participant: Address,
}

impl Funding {
    pub fn new(channel: ChannelId, participant: Address) -> Self {
        Self {
            channel,
            participant,
        }
    }

    /// First 8 bytes of `SHA-512(channel || participant)`, read little-endian.
    pub fn memo(&self) -> Result<Memo, encoding::Error> {
        let prefix: [u8; 8] = digest_prefix(&[&self.channel.0, &self.participant.0])?;
        Ok(u64::from_le_bytes(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::types::Hash;
    use sha2::{Digest, Sha512};

    #[test]
    fn memo_matches_manual_digest() {
        let funding = Funding::new(Hash([3; 32]), Address([4; 32]));

        let mut hasher = Sha512::new();
        hasher.update([3u8; 32]);
        hasher.update([4u8; 32]);
        let digest = hasher.finalize();
        let expected = u64::from_le_bytes(digest[..8].try_into().unwrap());

        assert_eq!(funding.memo().unwrap(), expected);
        // Deterministic.
        assert_eq!(funding.memo().unwrap(), funding.memo().unwrap());
    }

    #[test]
    fn memo_differs_per_participant() {
        let channel = Hash([9; 32]);
        let a = Funding::new(channel, Address([1; 32])).memo().unwrap();
        let b = Funding::new(channel, Address([2; 32])).memo().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn memo_differs_per_channel() {
        let part = Address([1; 32]);
        let a = Funding::new(Hash([1; 32]), part).memo().unwrap();
        let b = Funding::new(Hash([2; 32]), part).memo().unwrap();
        assert_ne!(a, b);
    }
}
