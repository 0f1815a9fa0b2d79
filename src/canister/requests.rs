use serde::Serialize;

use super::Timestamp;
use crate::{
    channel::{ChannelId, Funding, IcpParams, IcpState, PARTICIPANTS},
    encoding::{
        self,
        types::{AccountId, Address, Signature},
    },
    sig,
};

/// Dispute or conclusion request: a state with the signatures of all
/// participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjudicatorRequest {
    pub params: IcpParams,
    pub state: IcpState,
    pub sigs: [Signature; PARTICIPANTS],
}

impl AdjudicatorRequest {
    /// Whether the params hash to the channel ID of the state.
    pub fn is_consistent(&self) -> Result<bool, encoding::Error> {
        Ok(self.params.channel_id()? == self.state.channel)
    }

    /// Whether every participant signed the state.
    pub fn is_fully_signed(&self) -> Result<bool, encoding::Error> {
        let payload = self.state.encode()?;
        Ok(self
            .params
            .participants
            .iter()
            .zip(self.sigs.iter())
            .all(|(addr, sig)| sig::verify_bytes(addr, &payload, sig)))
    }
}

/// Signed payload of a withdrawal.
#[derive(Serialize, Debug, Copy, Clone)]
struct WithdrawalAuth {
    channel: ChannelId,
    participant: Address, // Off-chain channel identity
    receiver: AccountId,  // On-chain receiver of funds on withdrawal
    time: Timestamp,
}

/// Request to pay out a participant's share of a concluded channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalRequest {
    pub funding: Funding,
    pub receiver: AccountId,
    pub time: Timestamp,
    pub signature: Signature,
}

impl WithdrawalRequest {
    /// Bytes the participant signs: `channel || participant || receiver ||
    /// time` with the time little-endian.
    pub fn payload(
        funding: &Funding,
        receiver: &AccountId,
        time: Timestamp,
    ) -> Result<Vec<u8>, encoding::Error> {
        encoding::to_bytes(&WithdrawalAuth {
            channel: funding.channel,
            participant: funding.participant,
            receiver: *receiver,
            time,
        })
    }

    pub fn verify(&self) -> Result<bool, encoding::Error> {
        let payload = Self::payload(&self.funding, &self.receiver, self.time)?;
        Ok(sig::verify_bytes(
            &self.funding.participant,
            &payload,
            &self.signature,
        ))
    }
}
