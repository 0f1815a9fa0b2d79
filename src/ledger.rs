//! Interface of the token ledger used to fund channels.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    channel::{Amount, Memo},
    encoding::types::AccountId,
};

/// Index of the ledger block containing a transfer.
pub type BlockHeight = u64;

/// Default fee of the ICP ledger.
pub const DEFAULT_FEE: Amount = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferArgs {
    pub memo: Memo,
    pub amount: Amount,
    pub fee: Amount,
    pub to: AccountId,
    /// Creation time in nanoseconds since the unix epoch. Part of the
    /// ledger's deduplication key.
    pub created_at_time: u64,
}

/// Rejections by the ledger. None of them is transient, retrying the same
/// transfer fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("bad fee, expected {expected_fee}")]
    BadFee { expected_fee: Amount },
    #[error("insufficient funds, balance is {balance}")]
    InsufficientFunds { balance: Amount },
    #[error("transaction too old, allowed window is {allowed_window_nanos}ns")]
    TxTooOld { allowed_window_nanos: u64 },
    #[error("transaction created in the future")]
    TxCreatedInFuture,
    #[error("duplicate of transaction in block {duplicate_of}")]
    TxDuplicate { duplicate_of: BlockHeight },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("ledger transport: {0}")]
    Transport(String),
    #[error("could not decode ledger reply: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Transfers funds from the caller's account, returning the block the
    /// transfer was recorded in.
    async fn transfer(&self, args: TransferArgs) -> Result<BlockHeight, LedgerError>;
}

#[async_trait]
impl<T: Ledger + ?Sized> Ledger for Arc<T> {
    async fn transfer(&self, args: TransferArgs) -> Result<BlockHeight, LedgerError> {
        (**self).transfer(args).await
    }
}
