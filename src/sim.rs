//! In-process ledger and Perun canister.
//!
//! [SimulatedChain] applies the same rules as the deployed canister
//! (signature checks, version monotonicity, challenge timeouts,
//! memo-correlated crediting) against a manually advanced clock. It backs
//! the tests and local experiments, and can inject the failures the client
//! has to tolerate.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    canister::{
        AdjudicatorRequest, Canister, CanisterError, ChainEvent, ContractError, EventLog,
        Timestamp, WithdrawalRequest,
    },
    channel::{
        Amount, ChannelId, DisputePhase, Funding, IcpParams, Memo, RegisteredState, PARTICIPANTS,
    },
    connector::now_nanos,
    encoding::types::{AccountId, Address},
    ledger::{BlockHeight, Ledger, LedgerError, TransferArgs, TransferError, DEFAULT_FEE},
    wire::text,
};

/// Account the canister receives deposits on.
pub const CANISTER_ACCOUNT: AccountId = AccountId([0xca; 32]);
/// How long the ledger accepts a transfer after its creation time.
pub const TX_WINDOW_NANOS: u64 = 24 * 60 * 60 * 1_000_000_000;
/// How far a transfer's creation time may be ahead of the ledger clock.
pub const PERMITTED_DRIFT_NANOS: u64 = 60 * 1_000_000_000;

/// How `query_events` replies are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFormat {
    /// Printed IDL text, as the command line transport sees it.
    #[default]
    Text,
    Structured,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    to: AccountId,
    memo: Memo,
    amount: Amount,
}

#[derive(Debug, Clone)]
struct Channel {
    params: IcpParams,
    reg: RegisteredState,
    withdrawn: [bool; PARTICIPANTS],
}

#[derive(Debug, Default)]
struct World {
    now: Timestamp,
    balances: HashMap<AccountId, Amount>,
    blocks: Vec<Block>,
    seen: HashMap<(AccountId, TransferArgs), BlockHeight>,
    notified: HashSet<BlockHeight>,
    credits: HashMap<Memo, Amount>,
    holdings: HashMap<Funding, Amount>,
    channels: HashMap<ChannelId, Channel>,
    events: Vec<ChainEvent>,
    drop_notifications: usize,
    stall_transfers: bool,
    fail_event_queries: bool,
    format: EventFormat,
}

impl World {
    /// Appends an event stamped with the current time. The clock ticks once
    /// per event so that timestamps are unique.
    fn emit(&mut self, reg: &RegisteredState) {
        let ev = ChainEvent {
            channel: reg.state.channel,
            version: reg.state.version,
            finalized: reg.phase == DisputePhase::Conclude,
            alloc: reg.state.amounts(),
            timeout: reg.timeout,
            timestamp: self.now,
        };
        self.now += 1;
        self.events.push(ev);
    }
}

#[derive(Debug)]
pub struct SimulatedChain {
    world: Mutex<World>,
    fee: Amount,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

fn reject<T>(e: ContractError) -> Result<T, CanisterError> {
    Err(CanisterError::Rejected(e))
}

impl SimulatedChain {
    /// Creates an empty chain whose clock starts at the current wall time.
    pub fn new() -> Self {
        Self {
            world: Mutex::new(World {
                now: now_nanos(),
                ..Default::default()
            }),
            fee: DEFAULT_FEE,
        }
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ledger account of a participant. The simulated ledger identifies
    /// accounts by the participant's public key.
    pub fn account_of(addr: &Address) -> AccountId {
        AccountId(addr.0)
    }

    pub fn canister_account(&self) -> AccountId {
        CANISTER_ACCOUNT
    }

    /// Ledger handle transferring from `account`.
    pub fn ledger(self: &Arc<Self>, account: AccountId) -> SimLedger {
        SimLedger {
            chain: self.clone(),
            account,
        }
    }

    pub fn mint(&self, account: AccountId, amount: Amount) {
        *self.lock().balances.entry(account).or_default() += amount;
    }

    /// Empties a ledger account.
    pub fn burn(&self, account: AccountId) {
        self.lock().balances.remove(&account);
    }

    pub fn balance(&self, account: &AccountId) -> Amount {
        self.lock().balances.get(account).copied().unwrap_or(0)
    }

    pub fn holdings(&self, funding: &Funding) -> Option<Amount> {
        self.lock().holdings.get(funding).copied()
    }

    pub fn block_count(&self) -> usize {
        self.lock().blocks.len()
    }

    pub fn now(&self) -> Timestamp {
        self.lock().now
    }

    pub fn advance(&self, by: Duration) {
        let mut w = self.lock();
        w.now = w.now.saturating_add(by.as_nanos() as u64);
    }

    /// Fails the next `count` transaction notifications with a transport
    /// error.
    pub fn drop_notifications(&self, count: usize) {
        self.lock().drop_notifications = count;
    }

    /// Makes ledger transfers hang until disabled again.
    pub fn stall_transfers(&self, stall: bool) {
        self.lock().stall_transfers = stall;
    }

    /// Makes `query_events` fail with a transport error.
    pub fn fail_event_queries(&self, fail: bool) {
        self.lock().fail_event_queries = fail;
    }

    pub fn set_event_format(&self, format: EventFormat) {
        self.lock().format = format;
    }

    fn transfer_from(
        &self,
        from: AccountId,
        args: TransferArgs,
    ) -> Result<BlockHeight, TransferError> {
        let mut w = self.lock();
        if args.fee != self.fee {
            return Err(TransferError::BadFee {
                expected_fee: self.fee,
            });
        }
        if args.created_at_time.saturating_add(TX_WINDOW_NANOS) < w.now {
            return Err(TransferError::TxTooOld {
                allowed_window_nanos: TX_WINDOW_NANOS,
            });
        }
        if args.created_at_time > w.now.saturating_add(PERMITTED_DRIFT_NANOS) {
            return Err(TransferError::TxCreatedInFuture);
        }
        if let Some(block) = w.seen.get(&(from, args)) {
            return Err(TransferError::TxDuplicate {
                duplicate_of: *block,
            });
        }
        let balance = w.balances.get(&from).copied().unwrap_or(0);
        let total = args.amount.saturating_add(args.fee);
        if balance < total {
            return Err(TransferError::InsufficientFunds { balance });
        }

        w.balances.insert(from, balance - total);
        *w.balances.entry(args.to).or_default() += args.amount;
        let height = w.blocks.len() as BlockHeight;
        w.blocks.push(Block {
            to: args.to,
            memo: args.memo,
            amount: args.amount,
        });
        w.seen.insert((from, args), height);
        debug!(height, memo = args.memo, amount = args.amount, "ledger block");
        Ok(height)
    }

    fn check_request(req: &AdjudicatorRequest) -> Result<(), ContractError> {
        if !req
            .is_consistent()
            .map_err(|_| ContractError::InvalidInput)?
        {
            return Err(ContractError::InvalidInput);
        }
        if !req
            .is_fully_signed()
            .map_err(|_| ContractError::InvalidInput)?
        {
            return Err(ContractError::AuthenticationFailed);
        }
        Ok(())
    }
}

#[async_trait]
impl Canister for SimulatedChain {
    async fn deposit(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        let memo = funding
            .memo()
            .map_err(|_| ContractError::InvalidInput)?;
        self.deposit_memo(funding, memo).await
    }

    async fn deposit_memo(
        &self,
        funding: &Funding,
        memo: Memo,
    ) -> Result<Option<Amount>, CanisterError> {
        if funding.memo().ok() != Some(memo) {
            return reject(ContractError::InvalidInput);
        }
        let mut w = self.lock();
        if let Some(credit) = w.credits.remove(&memo).filter(|c| *c > 0) {
            *w.holdings.entry(*funding).or_default() += credit;
            debug!(channel = ?funding.channel, credit, "deposited");
        }
        Ok(w.holdings.get(funding).copied())
    }

    async fn withdraw(&self, req: &WithdrawalRequest) -> Result<Amount, CanisterError> {
        if !req.verify().map_err(|_| ContractError::InvalidInput)? {
            return reject(ContractError::AuthenticationFailed);
        }
        let mut w = self.lock();
        let now = w.now;
        let Some(ch) = w.channels.get(&req.funding.channel).cloned() else {
            return reject(ContractError::NotFinalized);
        };
        if !ch.reg.is_concluded_at(now) {
            return reject(ContractError::NotFinalized);
        }
        let Some(idx) = ch
            .params
            .participants
            .iter()
            .position(|p| *p == req.funding.participant)
        else {
            return reject(ContractError::InvalidInput);
        };
        if ch.withdrawn[idx] {
            return Ok(0);
        }

        let held: Amount = ch
            .params
            .participants
            .iter()
            .map(|p| {
                w.holdings
                    .get(&Funding::new(ch.reg.state.channel, *p))
                    .copied()
                    .unwrap_or(0)
            })
            .sum();
        let alloc = ch.reg.state.amounts();
        if held < alloc.iter().sum::<Amount>() {
            return reject(ContractError::InsufficientFunding);
        }

        let amount = alloc[idx];
        if let Some(ch) = w.channels.get_mut(&req.funding.channel) {
            ch.withdrawn[idx] = true;
        }
        *w.balances.entry(req.receiver).or_default() += amount;
        debug!(channel = ?req.funding.channel, idx, amount, "withdrawn");
        Ok(amount)
    }

    async fn conclude(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        Self::check_request(req)?;
        let mut w = self.lock();
        let now = w.now;
        let channel = req.state.channel;

        if let Some(ch) = w.channels.get(&channel) {
            if ch.reg.is_concluded_at(now) {
                if ch.reg.state != req.state {
                    return reject(ContractError::AlreadyConcluded);
                }
                if ch.reg.phase == DisputePhase::Conclude {
                    return Ok(());
                }
                // Challenge period is over, settle the registered state.
            } else if ch.reg.state.version >= req.state.version && ch.reg.state != req.state {
                return reject(ContractError::OutdatedState);
            } else if !req.state.finalized {
                return reject(ContractError::NotFinalized);
            }
        } else if !req.state.finalized {
            return reject(ContractError::NotFinalized);
        }

        let reg = RegisteredState {
            phase: DisputePhase::Conclude,
            state: req.state,
            timeout: now,
        };
        let withdrawn = w
            .channels
            .get(&channel)
            .map(|ch| ch.withdrawn)
            .unwrap_or_default();
        w.channels.insert(
            channel,
            Channel {
                params: req.params,
                reg,
                withdrawn,
            },
        );
        w.emit(&reg);
        debug!(?channel, version = req.state.version, "concluded");
        Ok(())
    }

    async fn dispute(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        Self::check_request(req)?;
        let mut w = self.lock();
        let now = w.now;
        let channel = req.state.channel;

        let phase = match w.channels.get(&channel) {
            Some(ch) if ch.reg.is_concluded_at(now) || ch.reg.state.finalized => {
                return reject(ContractError::AlreadyConcluded)
            }
            // Final states are settled through conclude only.
            _ if req.state.finalized => return reject(ContractError::InvalidInput),
            Some(ch) if ch.reg.state.version >= req.state.version => {
                return reject(ContractError::OutdatedState)
            }
            Some(_) => DisputePhase::Progress,
            None => DisputePhase::Register,
        };
        let challenge = Duration::from_secs(req.params.challenge_duration);
        let reg = RegisteredState {
            phase,
            state: req.state,
            timeout: now.saturating_add(challenge.as_nanos() as u64),
        };
        w.channels.insert(
            channel,
            Channel {
                params: req.params,
                reg,
                withdrawn: [false; PARTICIPANTS],
            },
        );
        w.emit(&reg);
        debug!(?channel, version = req.state.version, ?phase, "disputed");
        Ok(())
    }

    async fn query_holdings(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        Ok(self.holdings(funding))
    }

    async fn query_state(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<RegisteredState>, CanisterError> {
        Ok(self.lock().channels.get(channel).map(|ch| ch.reg))
    }

    async fn query_events(
        &self,
        channel: &ChannelId,
        since: Timestamp,
    ) -> Result<EventLog, CanisterError> {
        let w = self.lock();
        if w.fail_event_queries {
            return Err(CanisterError::Transport("event query failed".into()));
        }
        let events: Vec<_> = w
            .events
            .iter()
            .filter(|ev| ev.channel == *channel && ev.timestamp >= since)
            .copied()
            .collect();
        Ok(match w.format {
            EventFormat::Text => EventLog::Text(text::events(&events).to_string()),
            EventFormat::Structured => EventLog::Structured(events),
        })
    }

    async fn transaction_notification(
        &self,
        block: BlockHeight,
    ) -> Result<Option<Amount>, CanisterError> {
        let mut w = self.lock();
        if w.drop_notifications > 0 {
            w.drop_notifications -= 1;
            return Err(CanisterError::Transport("notification dropped".into()));
        }
        let Some(b) = w.blocks.get(block as usize).copied() else {
            return reject(ContractError::UnknownTransaction);
        };
        if b.to != CANISTER_ACCOUNT {
            return reject(ContractError::UnknownTransaction);
        }
        if w.notified.insert(block) {
            *w.credits.entry(b.memo).or_default() += b.amount;
        }
        Ok(w.credits.get(&b.memo).copied())
    }
}

/// Ledger view of one account of a [SimulatedChain].
#[derive(Debug, Clone)]
pub struct SimLedger {
    chain: Arc<SimulatedChain>,
    account: AccountId,
}

impl SimLedger {
    pub fn account(&self) -> AccountId {
        self.account
    }
}

#[async_trait]
impl Ledger for SimLedger {
    async fn transfer(&self, args: TransferArgs) -> Result<BlockHeight, LedgerError> {
        let stalled = self.chain.lock().stall_transfers;
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(self.chain.transfer_from(self.account, args)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::IcpState, sig::Signer, U256};

    fn args(amount: Amount, created_at_time: u64) -> TransferArgs {
        TransferArgs {
            memo: 1,
            amount,
            fee: DEFAULT_FEE,
            to: CANISTER_ACCOUNT,
            created_at_time,
        }
    }

    #[tokio::test]
    async fn ledger_classifies_transfers() {
        let chain = Arc::new(SimulatedChain::new());
        let acc = AccountId([1; 32]);
        chain.mint(acc, 100_000);
        let ledger = chain.ledger(acc);
        let now = chain.now();

        let ok = args(50_000, now);
        assert_eq!(ledger.transfer(ok).await, Ok(0));
        assert_eq!(chain.balance(&acc), 100_000 - 50_000 - DEFAULT_FEE);
        assert_eq!(chain.balance(&CANISTER_ACCOUNT), 50_000);
        assert_eq!(
            ledger.transfer(ok).await,
            Err(TransferError::TxDuplicate { duplicate_of: 0 }.into())
        );
        assert_eq!(
            ledger.transfer(TransferArgs { fee: 1, ..ok }).await,
            Err(TransferError::BadFee {
                expected_fee: DEFAULT_FEE
            }
            .into())
        );
        assert_eq!(
            ledger.transfer(args(1, now + 2 * PERMITTED_DRIFT_NANOS)).await,
            Err(TransferError::TxCreatedInFuture.into())
        );
        assert_eq!(
            ledger.transfer(args(1, now - 2 * TX_WINDOW_NANOS)).await,
            Err(TransferError::TxTooOld {
                allowed_window_nanos: TX_WINDOW_NANOS
            }
            .into())
        );
        assert_eq!(
            ledger.transfer(args(1_000_000, now + 1)).await,
            Err(TransferError::InsufficientFunds { balance: 40_000 }.into())
        );
        assert_eq!(chain.block_count(), 1);
    }

    #[tokio::test]
    async fn notification_credits_once() {
        let chain = Arc::new(SimulatedChain::new());
        let signer = Signer::from_seed([4; 32]);
        let acc = SimulatedChain::account_of(&signer.address());
        chain.mint(acc, 100_000);
        let funding = Funding::new(crate::Hash([8; 32]), signer.address());
        let memo = funding.memo().unwrap();

        let block = chain
            .ledger(acc)
            .transfer(TransferArgs {
                memo,
                ..args(20_000, chain.now())
            })
            .await
            .unwrap();
        assert_eq!(
            chain.transaction_notification(block).await,
            Ok(Some(20_000))
        );
        assert_eq!(
            chain.transaction_notification(block).await,
            Ok(Some(20_000))
        );
        assert_eq!(chain.deposit(&funding).await, Ok(Some(20_000)));
        // Credits are moved only once.
        assert_eq!(chain.deposit(&funding).await, Ok(Some(20_000)));
        assert_eq!(
            chain.transaction_notification(block + 1).await,
            Err(CanisterError::Rejected(ContractError::UnknownTransaction))
        );
        assert_eq!(
            chain.deposit_memo(&funding, memo ^ 1).await,
            Err(CanisterError::Rejected(ContractError::InvalidInput))
        );
    }

    #[tokio::test]
    async fn dispute_rules() {
        let chain = SimulatedChain::new();
        let a = Signer::from_seed([1; 32]);
        let b = Signer::from_seed([2; 32]);
        let params = IcpParams {
            nonce: U256::one(),
            participants: [a.address(), b.address()],
            challenge_duration: 10,
        };
        let id = params.channel_id().unwrap();
        let req = |version, finalized| {
            let state = IcpState::from_amounts(id, version, [1, 2], finalized);
            AdjudicatorRequest {
                params,
                state,
                sigs: [
                    a.sign_icp_state(&state).unwrap(),
                    b.sign_icp_state(&state).unwrap(),
                ],
            }
        };

        chain.dispute(&req(1, false)).await.unwrap();
        assert_eq!(
            chain.query_state(&id).await.unwrap().unwrap().phase,
            DisputePhase::Register
        );
        assert_eq!(
            chain.dispute(&req(1, false)).await,
            Err(CanisterError::Rejected(ContractError::OutdatedState))
        );
        chain.dispute(&req(2, false)).await.unwrap();
        assert_eq!(
            chain.query_state(&id).await.unwrap().unwrap().phase,
            DisputePhase::Progress
        );

        assert_eq!(
            chain.dispute(&req(3, true)).await,
            Err(CanisterError::Rejected(ContractError::InvalidInput))
        );
        assert_eq!(chain.query_state(&id).await.unwrap().unwrap().state.version, 2);

        let mut forged = req(3, false);
        forged.sigs[1] = forged.sigs[0];
        assert_eq!(
            chain.dispute(&forged).await,
            Err(CanisterError::Rejected(ContractError::AuthenticationFailed))
        );
        assert_eq!(
            chain.conclude(&req(3, false)).await,
            Err(CanisterError::Rejected(ContractError::NotFinalized))
        );

        // After the challenge period the registered state can be settled.
        chain.advance(Duration::from_secs(11));
        assert_eq!(
            chain.dispute(&req(4, false)).await,
            Err(CanisterError::Rejected(ContractError::AlreadyConcluded))
        );
        chain.conclude(&req(2, false)).await.unwrap();
        let reg = chain.query_state(&id).await.unwrap().unwrap();
        assert_eq!(reg.phase, DisputePhase::Conclude);
        assert_eq!(reg.state.version, 2);
        assert_eq!(
            chain.conclude(&req(5, true)).await,
            Err(CanisterError::Rejected(ContractError::AlreadyConcluded))
        );

        match chain.query_events(&id, 0).await.unwrap() {
            EventLog::Text(text) => {
                assert!(text.contains("version = 1 : nat64"));
                assert!(text.contains("finalized = true"));
            }
            other => panic!("unexpected log {other:?}"),
        }
        chain.set_event_format(EventFormat::Structured);
        match chain.query_events(&id, 0).await.unwrap() {
            EventLog::Structured(evs) => {
                let versions: Vec<_> = evs.iter().map(|e| e.version).collect();
                assert_eq!(versions, vec![1, 2, 2]);
                assert!(evs.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
                let since = evs[2].timestamp;
                match chain.query_events(&id, since).await.unwrap() {
                    EventLog::Structured(evs) => assert_eq!(evs.len(), 1),
                    other => panic!("unexpected log {other:?}"),
                }
            }
            other => panic!("unexpected log {other:?}"),
        }
    }

    #[tokio::test]
    async fn final_state_is_never_replaced_by_a_dispute() {
        let chain = SimulatedChain::new();
        let a = Signer::from_seed([3; 32]);
        let b = Signer::from_seed([4; 32]);
        let params = IcpParams {
            nonce: U256::from(7u64),
            participants: [a.address(), b.address()],
            challenge_duration: 10,
        };
        let id = params.channel_id().unwrap();
        let req = |version, finalized| {
            let state = IcpState::from_amounts(id, version, [4, 6], finalized);
            AdjudicatorRequest {
                params,
                state,
                sigs: [
                    a.sign_icp_state(&state).unwrap(),
                    b.sign_icp_state(&state).unwrap(),
                ],
            }
        };

        assert_eq!(
            chain.dispute(&req(5, true)).await,
            Err(CanisterError::Rejected(ContractError::InvalidInput))
        );
        assert_eq!(chain.query_state(&id).await.unwrap(), None);

        chain.conclude(&req(5, true)).await.unwrap();
        assert_eq!(
            chain.dispute(&req(6, false)).await,
            Err(CanisterError::Rejected(ContractError::AlreadyConcluded))
        );
        let reg = chain.query_state(&id).await.unwrap().unwrap();
        assert_eq!(reg.phase, DisputePhase::Conclude);
        assert_eq!(reg.state.version, 5);
        assert!(reg.state.finalized);
    }
}
