use core::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::{
    canister::{
        AdjudicatorRequest, Canister, CanisterError, EventLog, Timestamp, WithdrawalRequest,
    },
    channel::{Amount, ChannelId, Funding, Memo, RegisteredState},
    encoding::types::{AccountId, Address},
    ledger::{BlockHeight, Ledger, LedgerError, TransferArgs, DEFAULT_FEE},
    sig::Signer,
};

/// Exclusive-access guard of a connection: at most one call is in flight.
///
/// The ledger and the canister order requests per caller. Issuing two calls
/// of the same identity concurrently could reorder them (or trip the
/// ledger's deduplication), so every call of a [Connector] holds the only
/// permit of this guard until it returns.
#[derive(Debug)]
pub struct CallGuard {
    slot: Semaphore,
}

impl Default for CallGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl CallGuard {
    pub fn new() -> Self {
        Self {
            slot: Semaphore::new(1),
        }
    }

    /// Runs `call` while holding the permit.
    pub async fn run<F>(&self, op: &'static str, call: F) -> F::Output
    where
        F: Future,
    {
        let _permit = self
            .slot
            .acquire()
            .await
            .expect("the call guard semaphore is never closed");
        trace!(op, "call started");
        let res = call.await;
        trace!(op, "call finished");
        res
    }

    /// Whether a call currently holds the permit.
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }
}

/// Connection of one participant identity to the canister and the ledger.
///
/// All outgoing calls are serialized through a [CallGuard]. Funder,
/// Adjudicator and event subscriptions share a connector via `Arc`.
///
/// Note: An application will usually have only one transport type, thus using
/// dynamic dispatch here doesn't make much sense.
#[derive(Debug)]
pub struct Connector<C, L> {
    canister: C,
    ledger: L,
    signer: Signer,
    canister_account: AccountId,
    fee: Amount,
    guard: CallGuard,
}

impl<C: Canister, L: Ledger> Connector<C, L> {
    /// Creates a connector sending ledger transfers to `canister_account`
    /// with the default ledger fee.
    pub fn new(canister: C, ledger: L, signer: Signer, canister_account: AccountId) -> Self {
        Connector {
            canister,
            ledger,
            signer,
            canister_account,
            fee: DEFAULT_FEE,
            guard: CallGuard::new(),
        }
    }

    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = fee;
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn guard(&self) -> &CallGuard {
        &self.guard
    }

    pub fn fee(&self) -> Amount {
        self.fee
    }

    /// Transfers `amount` to the canister's ledger account, tagged with
    /// `memo`.
    pub async fn transfer(&self, memo: Memo, amount: Amount) -> Result<BlockHeight, LedgerError> {
        let args = TransferArgs {
            memo,
            amount,
            fee: self.fee,
            to: self.canister_account,
            created_at_time: now_nanos(),
        };
        debug!(memo, amount, "ledger transfer");
        self.guard.run("transfer", self.ledger.transfer(args)).await
    }

    pub async fn transaction_notification(
        &self,
        block: BlockHeight,
    ) -> Result<Option<Amount>, CanisterError> {
        debug!(block, "transaction notification");
        self.guard
            .run(
                "transaction_notification",
                self.canister.transaction_notification(block),
            )
            .await
    }

    pub async fn deposit(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        self.guard
            .run("deposit", self.canister.deposit(funding))
            .await
    }

    pub async fn deposit_memo(
        &self,
        funding: &Funding,
        memo: Memo,
    ) -> Result<Option<Amount>, CanisterError> {
        debug!(channel = ?funding.channel, memo, "deposit");
        self.guard
            .run("deposit_memo", self.canister.deposit_memo(funding, memo))
            .await
    }

    pub async fn query_holdings(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        self.guard
            .run("query_holdings", self.canister.query_holdings(funding))
            .await
    }

    pub async fn dispute(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        debug!(channel = ?req.state.channel, version = req.state.version, "dispute");
        self.guard
            .run("dispute", self.canister.dispute(req))
            .await
    }

    pub async fn conclude(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        debug!(channel = ?req.state.channel, version = req.state.version, "conclude");
        self.guard
            .run("conclude", self.canister.conclude(req))
            .await
    }

    pub async fn withdraw(&self, req: &WithdrawalRequest) -> Result<Amount, CanisterError> {
        debug!(channel = ?req.funding.channel, "withdraw");
        self.guard
            .run("withdraw", self.canister.withdraw(req))
            .await
    }

    pub async fn query_state(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<RegisteredState>, CanisterError> {
        self.guard
            .run("query_state", self.canister.query_state(channel))
            .await
    }

    pub async fn query_events(
        &self,
        channel: &ChannelId,
        since: Timestamp,
    ) -> Result<EventLog, CanisterError> {
        self.guard
            .run("query_events", self.canister.query_events(channel, since))
            .await
    }
}

/// Wall clock time in nanoseconds since the unix epoch.
pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn guard_allows_one_call_at_a_time() {
        let guard = Arc::new(CallGuard::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let guard = guard.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .run("test", async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!guard.is_busy());
    }

    #[tokio::test]
    async fn guard_reports_busy_while_running() {
        let guard = CallGuard::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = guard.run("blocked", async {
            rx.await.unwrap();
        });
        tokio::pin!(run);

        // Poll once so the call acquires the permit.
        assert!(futures_poll_once(run.as_mut()).await.is_none());
        assert!(guard.is_busy());
        tx.send(()).unwrap();
        run.await;
        assert!(!guard.is_busy());
    }

    async fn futures_poll_once<F: Future + Unpin>(fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            out = fut => Some(out),
            _ = tokio::task::yield_now() => None,
        }
    }
}
