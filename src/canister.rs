//! Interface of the Perun canister and the request types it accepts.

mod requests;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    channel::{Amount, ChannelId, Funding, Memo, RegisteredState, PARTICIPANTS},
    ledger::BlockHeight,
};

pub use requests::*;

/// Canister time in nanoseconds since the unix epoch.
pub type Timestamp = u64;

/// Rejection reasons reported by the canister.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("signature verification failed")]
    AuthenticationFailed,
    #[error("invalid input")]
    InvalidInput,
    #[error("channel is not concluded")]
    NotFinalized,
    #[error("a newer or equal state is already registered")]
    OutdatedState,
    #[error("channel already concluded with another state")]
    AlreadyConcluded,
    #[error("insufficient funding")]
    InsufficientFunding,
    #[error("unknown ledger transaction")]
    UnknownTransaction,
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    pub fn name(&self) -> &str {
        match self {
            ContractError::AuthenticationFailed => "AuthenticationFailed",
            ContractError::InvalidInput => "InvalidInput",
            ContractError::NotFinalized => "NotFinalized",
            ContractError::OutdatedState => "OutdatedState",
            ContractError::AlreadyConcluded => "AlreadyConcluded",
            ContractError::InsufficientFunding => "InsufficientFunding",
            ContractError::UnknownTransaction => "UnknownTransaction",
            ContractError::Other(msg) => msg,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "AuthenticationFailed" => ContractError::AuthenticationFailed,
            "InvalidInput" => ContractError::InvalidInput,
            "NotFinalized" => ContractError::NotFinalized,
            "OutdatedState" => ContractError::OutdatedState,
            "AlreadyConcluded" => ContractError::AlreadyConcluded,
            "InsufficientFunding" => ContractError::InsufficientFunding,
            "UnknownTransaction" => ContractError::UnknownTransaction,
            other => ContractError::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CanisterError {
    #[error("canister rejected call: {0}")]
    Rejected(#[from] ContractError),
    #[error("canister transport: {0}")]
    Transport(String),
    #[error("could not decode canister reply: {0}")]
    Decode(String),
}

/// Event as stored by the canister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEvent {
    pub channel: ChannelId,
    pub version: u64,
    pub finalized: bool,
    pub alloc: [Amount; PARTICIPANTS],
    pub timeout: Timestamp,
    pub timestamp: Timestamp,
}

/// Reply of `query_events`. Transports that can decode the canister's
/// reply into events return them structured, the CLI transport returns the
/// raw text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventLog {
    Text(String),
    Structured(Vec<ChainEvent>),
}

#[async_trait]
pub trait Canister: Send + Sync {
    /// Moves funds credited for the funding's memo into its holdings.
    async fn deposit(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError>;

    /// Like `deposit`, with the memo of the ledger transfer given explicitly.
    async fn deposit_memo(
        &self,
        funding: &Funding,
        memo: Memo,
    ) -> Result<Option<Amount>, CanisterError>;

    async fn withdraw(&self, req: &WithdrawalRequest) -> Result<Amount, CanisterError>;

    async fn conclude(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError>;

    async fn dispute(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError>;

    async fn query_holdings(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError>;

    async fn query_state(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<RegisteredState>, CanisterError>;

    async fn query_events(
        &self,
        channel: &ChannelId,
        since: Timestamp,
    ) -> Result<EventLog, CanisterError>;

    /// Tells the canister about a ledger transfer to it. Returns the amount
    /// credited to the transfer's memo.
    async fn transaction_notification(
        &self,
        block: BlockHeight,
    ) -> Result<Option<Amount>, CanisterError>;
}

#[async_trait]
impl<T: Canister + ?Sized> Canister for Arc<T> {
    async fn deposit(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        (**self).deposit(funding).await
    }

    async fn deposit_memo(
        &self,
        funding: &Funding,
        memo: Memo,
    ) -> Result<Option<Amount>, CanisterError> {
        (**self).deposit_memo(funding, memo).await
    }

    async fn withdraw(&self, req: &WithdrawalRequest) -> Result<Amount, CanisterError> {
        (**self).withdraw(req).await
    }

    async fn conclude(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        (**self).conclude(req).await
    }

    async fn dispute(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        (**self).dispute(req).await
    }

    async fn query_holdings(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        (**self).query_holdings(funding).await
    }

    async fn query_state(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<RegisteredState>, CanisterError> {
        (**self).query_state(channel).await
    }

    async fn query_events(
        &self,
        channel: &ChannelId,
        since: Timestamp,
    ) -> Result<EventLog, CanisterError> {
        (**self).query_events(channel, since).await
    }

    async fn transaction_notification(
        &self,
        block: BlockHeight,
    ) -> Result<Option<Amount>, CanisterError> {
        (**self).transaction_notification(block).await
    }
}
