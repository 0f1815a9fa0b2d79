use super::{Balance, ChannelId, Params, PartIdx};
use crate::encoding;

/// The single asset supported by this backend: the ledger's native token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Asset;

/// Locked funds of a sub-channel. Not supported on-chain, only carried so
/// that incompatible states can be detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAlloc {
    pub id: ChannelId,
    pub balances: Vec<Balance>,
}

/// Distribution of the channel funds, indexed by `[asset][participant]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allocation {
    pub assets: Vec<Asset>,
    pub balances: Vec<Vec<Balance>>,
    pub locked: Vec<SubAlloc>,
}

impl Allocation {
    /// Single-asset allocation with one balance per participant.
    pub fn new(balances: Vec<Balance>) -> Self {
        Self {
            assets: vec![Asset],
            balances: vec![balances],
            locked: vec![],
        }
    }

    /// Balance of `idx` in the (single) asset.
    pub fn balance_of(&self, idx: PartIdx) -> Option<Balance> {
        self.balances.first().and_then(|b| b.get(idx)).copied()
    }

    pub fn total(&self) -> Balance {
        self.balances.iter().flatten().sum()
    }
}

/// Stores the complete state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub id: ChannelId,
    pub version: u64,
    pub allocation: Allocation,
    pub app_data: Vec<u8>,
    pub is_final: bool,
}

impl State {
    /// Initial state (version 0) of the channel described by `params`.
    pub fn new(params: &Params, init_bals: Allocation) -> Result<Self, encoding::Error> {
        Ok(State {
            id: params.channel_id()?,
            version: 0,
            allocation: init_bals,
            app_data: vec![],
            is_final: false,
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.id
    }

    /// Create a new state that will replace this state.
    pub fn make_next_state(&self) -> Self {
        State {
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Checks that the balances match the participants of `params`.
    pub fn check_params(&self, params: &Params) -> Result<(), encoding::Error> {
        for bals in &self.allocation.balances {
            if bals.len() != params.participants.len() {
                return Err(encoding::Error::AllocationIncompatible {
                    balances: bals.len(),
                    participants: params.participants.len(),
                });
            }
        }
        Ok(())
    }
}
