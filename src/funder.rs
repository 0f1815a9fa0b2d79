//! Deposits a participant's share into a channel and waits until the
//! canister credits it.

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelToken,
    canister::{Canister, CanisterError},
    channel::{make_amount, Allocation, Amount, Funding, Params, PartIdx, State},
    connector::Connector,
    encoding,
    ledger::{Ledger, LedgerError},
};

/// Default bound of the whole funding handshake.
pub const DEFAULT_FUNDING_TIMEOUT: Duration = Duration::from_secs(60);
/// Default pause between two confirmation rounds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum FundingError {
    #[error("channel was not funded in time")]
    NotFundedInTime,
    #[error("funding transfer failed: {0}")]
    FundTransferFailed(#[source] LedgerError),
    #[error("{op} failed: {source}")]
    Canister {
        op: &'static str,
        #[source]
        source: CanisterError,
    },
    #[error("state does not belong to the channel of the params")]
    FundingReqIncompatible,
    #[error("participant index {0} out of range")]
    InvalidParticipant(PartIdx),
    #[error(transparent)]
    Encoding(#[from] encoding::Error),
    #[error("funding was cancelled")]
    Cancelled,
}

/// Request to fund our part of a (ledger) channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRequest {
    pub part_idx: PartIdx,
    pub funding_agreement: Allocation,
    pub params: Params,
    pub state: State,
}

impl FundingRequest {
    /// Funding of the requesting participant.
    pub fn funding(&self) -> Result<Funding, FundingError> {
        let participant = self
            .params
            .participants
            .get(self.part_idx)
            .ok_or(FundingError::InvalidParticipant(self.part_idx))?;
        Ok(Funding::new(self.state.id, *participant))
    }

    /// Amount the participant agreed to deposit.
    pub fn amount(&self) -> Result<Amount, FundingError> {
        let bal = self
            .funding_agreement
            .balance_of(self.part_idx)
            .ok_or(FundingError::InvalidParticipant(self.part_idx))?;
        Ok(make_amount(bal)?)
    }

    fn check(&self) -> Result<(), FundingError> {
        self.state.check_params(&self.params)?;
        if self.params.channel_id()? != self.state.id {
            return Err(FundingError::FundingReqIncompatible);
        }
        Ok(())
    }
}

fn ctx(op: &'static str) -> impl FnOnce(CanisterError) -> FundingError {
    move |source| FundingError::Canister { op, source }
}

/// Executes the funding handshake of one participant identity.
#[derive(Debug)]
pub struct Funder<C, L> {
    conn: Arc<Connector<C, L>>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<C: Canister, L: Ledger> Funder<C, L> {
    pub fn new(conn: Arc<Connector<C, L>>) -> Self {
        Self {
            conn,
            timeout: DEFAULT_FUNDING_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn connector(&self) -> &Arc<Connector<C, L>> {
        &self.conn
    }

    /// Deposits the agreed amount and returns once the canister holds it.
    ///
    /// Fails with [FundingError::NotFundedInTime] if the holdings do not
    /// cover the amount before the funding timeout, and with
    /// [FundingError::Cancelled] as soon as `cancel` fires.
    pub async fn fund(
        &self,
        req: &FundingRequest,
        cancel: &CancelToken,
    ) -> Result<Amount, FundingError> {
        req.check()?;
        let deadline = Instant::now() + self.timeout;

        tokio::select! {
            res = timeout_at(deadline, self.handshake(req)) => {
                res.map_err(|_| {
                    warn!(channel = ?req.state.id, "funding timed out");
                    FundingError::NotFundedInTime
                })?
            }
            _ = cancel.cancelled() => Err(FundingError::Cancelled),
        }
    }

    async fn handshake(&self, req: &FundingRequest) -> Result<Amount, FundingError> {
        let funding = req.funding()?;
        let amount = req.amount()?;
        let memo = funding.memo()?;

        let holdings = self
            .conn
            .query_holdings(&funding)
            .await
            .map_err(ctx("query_holdings"))?
            .unwrap_or(0);
        if holdings >= amount {
            info!(channel = ?funding.channel, holdings, amount, "already funded");
            return Ok(holdings);
        }

        let block = self
            .conn
            .transfer(memo, amount - holdings)
            .await
            .map_err(FundingError::FundTransferFailed)?;
        info!(channel = ?funding.channel, block, memo, "funds transferred");

        let mut round = 0u32;
        loop {
            round += 1;
            // Best effort: the ledger may not have propagated the block yet.
            match self.conn.transaction_notification(block).await {
                Ok(credited) => debug!(block, ?credited, round, "notified canister"),
                Err(e) => warn!(block, round, error = %e, "notification failed"),
            }

            self.conn
                .deposit_memo(&funding, memo)
                .await
                .map_err(ctx("deposit_memo"))?;

            let holdings = self
                .conn
                .query_holdings(&funding)
                .await
                .map_err(ctx("query_holdings"))?
                .unwrap_or(0);
            if holdings >= amount {
                info!(channel = ?funding.channel, holdings, round, "funding confirmed");
                return Ok(holdings);
            }
            debug!(holdings, amount, round, "funding not yet visible");
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cancel::cancel_pair,
        ledger::TransferError,
        sig::Signer,
        sim::{SimLedger, SimulatedChain},
        U256,
    };

    fn setup(
        seed: u8,
    ) -> (
        Arc<SimulatedChain>,
        Funder<Arc<SimulatedChain>, SimLedger>,
        FundingRequest,
    ) {
        let chain = Arc::new(SimulatedChain::new());
        let alice = Signer::from_seed([seed; 32]);
        let bob = Signer::from_seed([seed + 1; 32]);
        let account = SimulatedChain::account_of(&alice.address());
        chain.mint(account, 1_000_000);

        let params = Params::new(
            U256::from(7u64),
            vec![alice.address(), bob.address()],
            60,
        );
        let alloc = Allocation::new(vec![50_000, 30_000]);
        let state = State::new(&params, alloc.clone()).unwrap();
        let req = FundingRequest {
            part_idx: 0,
            funding_agreement: alloc,
            params,
            state,
        };

        let conn = Connector::new(
            chain.clone(),
            chain.ledger(account),
            alice,
            chain.canister_account(),
        );
        let funder = Funder::new(Arc::new(conn))
            .with_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(100));
        (chain, funder, req)
    }

    #[tokio::test]
    async fn funds_and_confirms() {
        let (chain, funder, req) = setup(1);
        let held = funder.fund(&req, &CancelToken::never()).await.unwrap();
        assert_eq!(held, 50_000);
        assert_eq!(
            chain.holdings(&req.funding().unwrap()),
            Some(50_000)
        );
    }

    #[tokio::test]
    async fn second_fund_does_not_transfer_again() {
        let (chain, funder, req) = setup(3);
        funder.fund(&req, &CancelToken::never()).await.unwrap();
        let blocks = chain.block_count();
        funder.fund(&req, &CancelToken::never()).await.unwrap();
        assert_eq!(chain.block_count(), blocks);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_notifications_are_retried() {
        let (chain, funder, req) = setup(5);
        chain.drop_notifications(2);
        let held = funder.fund(&req, &CancelToken::never()).await.unwrap();
        assert_eq!(held, 50_000);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_transfer_times_out() {
        let (chain, funder, req) = setup(7);
        chain.stall_transfers(true);
        let err = funder.fund(&req, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, FundingError::NotFundedInTime), "{err}");
    }

    #[tokio::test]
    async fn transfer_errors_are_not_retried() {
        let (chain, funder, req) = setup(9);
        chain.burn(SimulatedChain::account_of(&req.params.participants[0]));
        let err = funder.fund(&req, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(
            err,
            FundingError::FundTransferFailed(LedgerError::Transfer(
                TransferError::InsufficientFunds { .. }
            ))
        ));
        assert_eq!(chain.block_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_the_wait() {
        let (chain, funder, req) = setup(11);
        chain.drop_notifications(usize::MAX);
        let (canceller, token) = cancel_pair();
        let fund = funder.fund(&req, &token);
        tokio::pin!(fund);
        tokio::select! {
            _ = &mut fund => panic!("funding must not complete"),
            _ = sleep(Duration::from_secs(1)) => canceller.cancel(),
        }
        assert!(matches!(fund.await, Err(FundingError::Cancelled)));
    }

    #[tokio::test]
    async fn zero_amount_needs_no_transfer() {
        let (chain, funder, mut req) = setup(13);
        req.funding_agreement = Allocation::new(vec![0, 30_000]);
        assert_eq!(funder.fund(&req, &CancelToken::never()).await.unwrap(), 0);
        assert_eq!(chain.block_count(), 0);
    }

    #[tokio::test]
    async fn rejects_foreign_state() {
        let (_, funder, mut req) = setup(15);
        req.state.id = crate::Hash([1; 32]);
        let err = funder.fund(&req, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, FundingError::FundingReqIncompatible));
    }

    #[tokio::test]
    async fn rejects_out_of_range_index() {
        let (_, funder, mut req) = setup(17);
        req.part_idx = 2;
        let err = funder.fund(&req, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, FundingError::InvalidParticipant(2)));
    }
}
