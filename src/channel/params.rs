use serde::Serialize;

use super::{ChannelId, PartIdx};
use crate::encoding::{
    self,
    types::{nonce_from_be_bytes, Address, U256},
};

/// Parameters of a channel, fixed for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    pub nonce: U256,
    pub participants: Vec<Address>,
    /// Challenge duration in seconds.
    pub challenge_duration: u64,
    /// App of the channel. Payment channels have none, and the app is not
    /// part of the channel ID.
    pub app: Option<Address>,
}

/// Borrowed view used for ID derivation. Field order is the encoding order.
#[derive(Serialize)]
struct IdPreimage<'a> {
    nonce: &'a U256,
    participants: &'a [Address],
    challenge_duration: u64,
}

impl Params {
    pub fn new(nonce: U256, participants: Vec<Address>, challenge_duration: u64) -> Self {
        Self {
            nonce,
            participants,
            challenge_duration,
            app: None,
        }
    }

    /// Builds params from wire data, checking the identity widths and nonce
    /// range.
    pub fn from_raw(
        nonce: &[u8],
        participants: &[Vec<u8>],
        challenge_duration: u64,
    ) -> Result<Self, encoding::Error> {
        let participants = participants
            .iter()
            .map(|p| Address::from_slice(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(
            nonce_from_be_bytes(nonce)?,
            participants,
            challenge_duration,
        ))
    }

    /// Canonical encoding of the parameters.
    pub fn encode(&self) -> Result<Vec<u8>, encoding::Error> {
        encoding::to_bytes(&self.preimage())
    }

    pub fn channel_id(&self) -> Result<ChannelId, encoding::Error> {
        encoding::to_hash(&self.preimage())
    }

    pub fn participant_index(&self, addr: &Address) -> Option<PartIdx> {
        self.participants.iter().position(|p| p == addr)
    }

    fn preimage(&self) -> IdPreimage<'_> {
        IdPreimage {
            nonce: &self.nonce,
            participants: &self.participants,
            challenge_duration: self.challenge_duration,
        }
    }
}

/// Calculates the channel ID of `params`.
pub fn calc_id(params: &Params) -> Result<ChannelId, encoding::Error> {
    params.channel_id()
}
