//! Fixed two-party, single-asset representation of channel data as the
//! canister sees it.
//!
//! These types are what gets encoded for hashing and signing. Converting the
//! host model ([Params], [State]) into them performs all validation, so
//! anything that made it into an [IcpState] can be encoded.

use serde::Serialize;

use super::{make_balance, Amount, ChannelId, Params, State, PARTICIPANTS};
use crate::encoding::{
    self, as_le_array,
    types::{Address, U256},
};

/// Parameters with exactly two participants.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcpParams {
    pub nonce: U256,
    pub participants: [Address; PARTICIPANTS],
    pub challenge_duration: u64,
}

/// State with exactly two balances and no app data.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcpState {
    pub channel: ChannelId,
    pub version: u64,
    #[serde(with = "as_le_array")]
    pub allocation: [U256; PARTICIPANTS],
    pub finalized: bool,
}

impl IcpParams {
    pub fn channel_id(&self) -> Result<ChannelId, encoding::Error> {
        encoding::to_hash(self)
    }
}

impl IcpState {
    /// Canonical encoding, which is also the signing payload.
    pub fn encode(&self) -> Result<Vec<u8>, encoding::Error> {
        encoding::to_bytes(self)
    }

    /// Allocation as ledger amounts. Balances are bounded by
    /// [MAX_BALANCE](super::MAX_BALANCE) so this never truncates.
    pub fn amounts(&self) -> [Amount; PARTICIPANTS] {
        self.allocation.map(|b| b.low_u64())
    }

    pub fn from_amounts(
        channel: ChannelId,
        version: u64,
        amounts: [Amount; PARTICIPANTS],
        finalized: bool,
    ) -> Self {
        Self {
            channel,
            version,
            allocation: amounts.map(U256::from),
            finalized,
        }
    }
}

impl TryFrom<&Params> for IcpParams {
    type Error = encoding::Error;

    fn try_from(value: &Params) -> Result<Self, Self::Error> {
        let participants: [Address; PARTICIPANTS] = value
            .participants
            .as_slice()
            .try_into()
            .map_err(|_| encoding::Error::IncompatibleState("only two-party channels are supported"))?;
        Ok(Self {
            nonce: value.nonce,
            participants,
            challenge_duration: value.challenge_duration,
        })
    }
}

impl From<IcpParams> for Params {
    fn from(value: IcpParams) -> Self {
        Params::new(
            value.nonce,
            value.participants.to_vec(),
            value.challenge_duration,
        )
    }
}

impl TryFrom<&State> for IcpState {
    type Error = encoding::Error;

    fn try_from(value: &State) -> Result<Self, Self::Error> {
        let alloc = &value.allocation;
        if alloc.assets.len() != 1 || alloc.balances.len() != 1 {
            return Err(encoding::Error::IncompatibleState(
                "only single-asset channels are supported",
            ));
        }
        if !alloc.locked.is_empty() {
            return Err(encoding::Error::IncompatibleState(
                "locked funds are not supported",
            ));
        }
        if !value.app_data.is_empty() {
            return Err(encoding::Error::IncompatibleState(
                "app data is not supported",
            ));
        }
        let bals = &alloc.balances[0];
        if bals.len() != PARTICIPANTS {
            return Err(encoding::Error::IncompatibleState(
                "only two-party channels are supported",
            ));
        }

        Ok(Self {
            channel: value.id,
            version: value.version,
            allocation: [make_balance(bals[0])?, make_balance(bals[1])?],
            finalized: value.is_final,
        })
    }
}

impl From<IcpState> for State {
    fn from(value: IcpState) -> Self {
        State {
            id: value.channel,
            version: value.version,
            allocation: super::Allocation::new(
                value.amounts().iter().map(|a| *a as i128).collect(),
            ),
            app_data: vec![],
            is_final: value.finalized,
        }
    }
}

/// Canonical encoding of a host state.
pub fn encode_state(state: &State) -> Result<Vec<u8>, encoding::Error> {
    IcpState::try_from(state)?.encode()
}

/// Canonical encoding of host params (the channel ID preimage).
pub fn encode_params(params: &Params) -> Result<Vec<u8>, encoding::Error> {
    params.encode()
}
