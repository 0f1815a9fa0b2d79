//! Register, dispute, conclude and withdraw against the Perun canister.
//!
//! The canister tracks a channel through the phases `Register`, `Progress`
//! and `Conclude`. A successful withdrawal is the implicit final step, the
//! canister has no phase for it.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info};

use crate::{
    canister::{
        AdjudicatorRequest, Canister, CanisterError, ContractError, Timestamp, WithdrawalRequest,
    },
    channel::{
        Amount, ChannelId, DisputePhase, Funding, IcpParams, IcpState, Params, PartIdx,
        RegisteredState, State, PARTICIPANTS,
    },
    connector::{now_nanos, Connector},
    encoding::{
        self,
        types::{AccountId, Signature},
    },
    ledger::Ledger,
    sig::Signer,
    subscription::EventSubscription,
};

/// Default interval of event subscriptions created by [Adjudicator::subscribe].
pub const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum AdjudicatorError {
    #[error("request version {requested} is not newer than the registered state")]
    RequestVersionTooLow { requested: u64 },
    #[error("channel was concluded with another state than version {requested}")]
    ConcludedDifferentVersion { requested: u64 },
    #[error("params do not belong to the channel of the state")]
    AdjudicatorReqIncompatible,
    #[error("channel is not concluded")]
    NotConcluded,
    #[error("state is not final")]
    NotFinal,
    #[error("participant {0} is not the connected identity")]
    WrongSigner(PartIdx),
    #[error("{op} failed: {source}")]
    Canister {
        op: &'static str,
        #[source]
        source: CanisterError,
    },
    #[error(transparent)]
    Encoding(#[from] encoding::Error),
}

/// A state with the signatures of all participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub state: State,
    pub sigs: Vec<Signature>,
}

/// Request of participant `idx` concerning the channel of `tx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjudicatorReq {
    pub params: Params,
    /// Ledger account receiving the funds on withdrawal.
    pub acc: AccountId,
    pub tx: Transaction,
    pub idx: PartIdx,
}

/// Creates a signed withdrawal of `funding` to `receiver`.
pub fn make_withdrawal_request(
    signer: &Signer,
    funding: Funding,
    receiver: AccountId,
    time: Timestamp,
) -> Result<WithdrawalRequest, encoding::Error> {
    let payload = WithdrawalRequest::payload(&funding, &receiver, time)?;
    Ok(WithdrawalRequest {
        funding,
        receiver,
        time,
        signature: signer.sign(&payload),
    })
}

fn rejection(op: &'static str, requested: u64) -> impl FnOnce(CanisterError) -> AdjudicatorError {
    move |source| match source {
        CanisterError::Rejected(ContractError::OutdatedState) => {
            AdjudicatorError::RequestVersionTooLow { requested }
        }
        CanisterError::Rejected(ContractError::AlreadyConcluded) => {
            AdjudicatorError::ConcludedDifferentVersion { requested }
        }
        CanisterError::Rejected(ContractError::NotFinalized) => AdjudicatorError::NotConcluded,
        source => AdjudicatorError::Canister { op, source },
    }
}

/// Adjudicator client of one participant identity.
#[derive(Debug)]
pub struct Adjudicator<C, L> {
    conn: Arc<Connector<C, L>>,
    poll_interval: Duration,
}

impl<C: Canister, L: Ledger> Adjudicator<C, L> {
    pub fn new(conn: Arc<Connector<C, L>>) -> Self {
        Self {
            conn,
            poll_interval: DEFAULT_EVENT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn connector(&self) -> &Arc<Connector<C, L>> {
        &self.conn
    }

    /// Validates `req` and converts it into the canister's request format.
    pub fn request(&self, req: &AdjudicatorReq) -> Result<AdjudicatorRequest, AdjudicatorError> {
        let params = IcpParams::try_from(&req.params)?;
        let state = IcpState::try_from(&req.tx.state)?;
        if params.channel_id()? != state.channel {
            return Err(AdjudicatorError::AdjudicatorReqIncompatible);
        }
        let sigs: [Signature; PARTICIPANTS] =
            req.tx.sigs.as_slice().try_into().map_err(|_| {
                encoding::Error::AllocationIncompatible {
                    balances: req.tx.sigs.len(),
                    participants: PARTICIPANTS,
                }
            })?;
        if params.participants.get(req.idx) != Some(&self.conn.address()) {
            return Err(AdjudicatorError::WrongSigner(req.idx));
        }
        Ok(AdjudicatorRequest {
            params,
            state,
            sigs,
        })
    }

    /// Registers the state of `req` as the channel's dispute state.
    ///
    /// Registering the state that is already registered is a no-op. A
    /// different state needs a higher version than the registered one.
    /// Final states are concluded directly.
    pub async fn register(&self, req: &AdjudicatorReq) -> Result<(), AdjudicatorError> {
        let r = self.request(req)?;
        let version = r.state.version;

        if let Some(reg) = self.query_state(&r.state.channel).await? {
            if reg.state == r.state {
                debug!(channel = ?r.state.channel, version, phase = reg.phase.name(), "already registered");
                return Ok(());
            }
            if reg.phase == DisputePhase::Conclude {
                return Err(AdjudicatorError::ConcludedDifferentVersion { requested: version });
            }
            if reg.state.version >= version {
                return Err(AdjudicatorError::RequestVersionTooLow { requested: version });
            }
        }

        if r.state.finalized {
            self.submit_conclude(&r).await
        } else {
            self.submit_dispute(&r).await
        }
    }

    /// Progresses the registered state to the state of `req`, which must
    /// have a strictly higher version. A final state concludes the channel
    /// instead, it is never registered as disputable.
    pub async fn dispute(&self, req: &AdjudicatorReq) -> Result<(), AdjudicatorError> {
        let r = self.request(req)?;
        let version = r.state.version;
        if let Some(reg) = self.query_state(&r.state.channel).await? {
            if reg.phase == DisputePhase::Conclude || reg.state.finalized {
                return Err(AdjudicatorError::ConcludedDifferentVersion { requested: version });
            }
            if reg.state.version >= version {
                return Err(AdjudicatorError::RequestVersionTooLow { requested: version });
            }
        }
        if r.state.finalized {
            self.submit_conclude(&r).await
        } else {
            self.submit_dispute(&r).await
        }
    }

    /// Concludes the channel with the state of `req`. The state must be
    /// final, or be the registered state after its challenge period.
    /// Concluding with the already concluded state is a no-op.
    pub async fn conclude(&self, req: &AdjudicatorReq) -> Result<(), AdjudicatorError> {
        let r = self.request(req)?;
        if let Some(reg) = self.query_state(&r.state.channel).await? {
            if reg.phase == DisputePhase::Conclude {
                if reg.state == r.state {
                    debug!(channel = ?r.state.channel, "already concluded");
                    return Ok(());
                }
                return Err(AdjudicatorError::ConcludedDifferentVersion {
                    requested: r.state.version,
                });
            }
        }
        self.submit_conclude(&r).await
    }

    /// Withdraws the share of participant `req.idx` to `req.acc`,
    /// concluding the channel first if needed. Returns the paid out amount.
    pub async fn withdraw(&self, req: &AdjudicatorReq) -> Result<Amount, AdjudicatorError> {
        let r = self.request(req)?;
        let concluded = matches!(
            self.query_state(&r.state.channel).await?,
            Some(reg) if reg.phase == DisputePhase::Conclude
        );
        if !concluded {
            self.conclude(req).await?;
        }

        let funding = Funding::new(r.state.channel, r.params.participants[req.idx]);
        let wreq = make_withdrawal_request(self.conn.signer(), funding, req.acc, now_nanos())?;
        let amount = self
            .conn
            .withdraw(&wreq)
            .await
            .map_err(rejection("withdraw", r.state.version))?;
        info!(channel = ?funding.channel, idx = req.idx, amount, "withdrawn");
        Ok(amount)
    }

    pub async fn query_state(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<RegisteredState>, AdjudicatorError> {
        self.conn
            .query_state(channel)
            .await
            .map_err(|source| AdjudicatorError::Canister {
                op: "query_state",
                source,
            })
    }

    async fn submit_dispute(&self, r: &AdjudicatorRequest) -> Result<(), AdjudicatorError> {
        self.conn
            .dispute(r)
            .await
            .map_err(rejection("dispute", r.state.version))?;
        info!(channel = ?r.state.channel, version = r.state.version, "dispute registered");
        Ok(())
    }

    async fn submit_conclude(&self, r: &AdjudicatorRequest) -> Result<(), AdjudicatorError> {
        self.conn.conclude(r).await.map_err(|e| match e {
            CanisterError::Rejected(ContractError::NotFinalized) => AdjudicatorError::NotFinal,
            e => rejection("conclude", r.state.version)(e),
        })?;
        info!(channel = ?r.state.channel, version = r.state.version, "concluded");
        Ok(())
    }
}

impl<C: Canister + 'static, L: Ledger + 'static> Adjudicator<C, L> {
    /// Subscribes to the adjudicator events of `channel`.
    pub fn subscribe(&self, channel: ChannelId) -> EventSubscription {
        EventSubscription::new(self.conn.clone(), channel, self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::Allocation,
        sim::{SimLedger, SimulatedChain},
        U256,
    };

    struct Party {
        adj: Adjudicator<Arc<SimulatedChain>, SimLedger>,
        idx: PartIdx,
    }

    struct Setup {
        chain: Arc<SimulatedChain>,
        signers: [Signer; 2],
        parties: [Party; 2],
        params: Params,
    }

    fn setup() -> Setup {
        let chain = Arc::new(SimulatedChain::new());
        let seeds = [[31u8; 32], [32u8; 32]];
        let signers = seeds.map(Signer::from_seed);
        let params = Params::new(
            U256::from(99u64),
            signers.iter().map(|s| s.address()).collect(),
            60,
        );
        let parties = [0, 1].map(|idx| {
            let signer = Signer::from_seed(seeds[idx]);
            let account = SimulatedChain::account_of(&signer.address());
            let conn = Connector::new(
                chain.clone(),
                chain.ledger(account),
                signer,
                chain.canister_account(),
            );
            Party {
                adj: Adjudicator::new(Arc::new(conn)),
                idx,
            }
        });
        Setup {
            chain,
            signers,
            parties,
            params,
        }
    }

    impl Setup {
        fn req(&self, party: usize, version: u64, bals: [i128; 2], is_final: bool) -> AdjudicatorReq {
            let mut state = State::new(&self.params, Allocation::new(bals.to_vec())).unwrap();
            state.version = version;
            state.is_final = is_final;
            let sigs = self
                .signers
                .iter()
                .map(|s| s.sign_state(&state).unwrap())
                .collect();
            AdjudicatorReq {
                params: self.params.clone(),
                acc: AccountId([0xa0 + party as u8; 32]),
                tx: Transaction { state, sigs },
                idx: self.parties[party].idx,
            }
        }

        fn channel(&self) -> ChannelId {
            self.params.channel_id().unwrap()
        }
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let s = setup();
        let adj = &s.parties[0].adj;
        let req = s.req(0, 0, [10, 20], false);
        adj.register(&req).await.unwrap();
        let before = adj.query_state(&s.channel()).await.unwrap().unwrap();
        adj.register(&req).await.unwrap();
        let after = adj.query_state(&s.channel()).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(after.phase, DisputePhase::Register);
    }

    #[tokio::test]
    async fn versions_must_increase() {
        let s = setup();
        let adj = &s.parties[0].adj;
        adj.register(&s.req(0, 0, [10, 20], false)).await.unwrap();
        adj.register(&s.req(0, 1, [11, 19], false)).await.unwrap();
        assert_eq!(
            adj.query_state(&s.channel()).await.unwrap().unwrap().phase,
            DisputePhase::Progress
        );
        assert!(matches!(
            adj.register(&s.req(0, 0, [10, 20], false)).await,
            Err(AdjudicatorError::RequestVersionTooLow { requested: 0 })
        ));
        assert!(matches!(
            adj.dispute(&s.req(0, 1, [11, 19], false)).await,
            Err(AdjudicatorError::RequestVersionTooLow { requested: 1 })
        ));
        // The other participant may progress too.
        s.parties[1]
            .adj
            .dispute(&s.req(1, 2, [12, 18], false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conclude_rules() {
        let s = setup();
        let adj = &s.parties[0].adj;
        assert!(matches!(
            adj.conclude(&s.req(0, 1, [10, 20], false)).await,
            Err(AdjudicatorError::NotFinal)
        ));
        adj.conclude(&s.req(0, 2, [10, 20], true)).await.unwrap();
        // Same state again is fine, a different one is not.
        adj.conclude(&s.req(0, 2, [10, 20], true)).await.unwrap();
        s.parties[1]
            .adj
            .register(&s.req(1, 2, [10, 20], true))
            .await
            .unwrap();
        assert!(matches!(
            adj.conclude(&s.req(0, 3, [15, 15], true)).await,
            Err(AdjudicatorError::ConcludedDifferentVersion { requested: 3 })
        ));
        assert!(matches!(
            adj.register(&s.req(0, 4, [15, 15], false)).await,
            Err(AdjudicatorError::ConcludedDifferentVersion { requested: 4 })
        ));
    }

    #[tokio::test]
    async fn timed_out_dispute_can_be_concluded() {
        let s = setup();
        let adj = &s.parties[0].adj;
        let req = s.req(0, 3, [10, 20], false);
        adj.register(&req).await.unwrap();
        assert!(matches!(adj.conclude(&req).await, Err(AdjudicatorError::NotFinal)));
        s.chain.advance(Duration::from_secs(61));
        adj.conclude(&req).await.unwrap();
        assert_eq!(
            adj.query_state(&s.channel()).await.unwrap().unwrap().phase,
            DisputePhase::Conclude
        );
    }

    #[tokio::test]
    async fn rejects_inconsistent_requests() {
        let s = setup();
        let adj = &s.parties[0].adj;

        let mut req = s.req(0, 0, [10, 20], false);
        req.params.challenge_duration = 61;
        assert!(matches!(
            adj.register(&req).await,
            Err(AdjudicatorError::AdjudicatorReqIncompatible)
        ));

        let mut req = s.req(0, 0, [10, 20], false);
        req.tx.sigs.pop();
        assert!(matches!(
            adj.register(&req).await,
            Err(AdjudicatorError::Encoding(
                encoding::Error::AllocationIncompatible { .. }
            ))
        ));

        let mut req = s.req(0, 0, [10, 20], false);
        req.idx = 1;
        assert!(matches!(
            adj.register(&req).await,
            Err(AdjudicatorError::WrongSigner(1))
        ));

        let mut req = s.req(0, 0, [10, 20], false);
        req.tx.sigs.swap(0, 1);
        assert!(matches!(
            adj.register(&req).await,
            Err(AdjudicatorError::Canister {
                op: "dispute",
                source: CanisterError::Rejected(ContractError::AuthenticationFailed)
            })
        ));
    }

    #[tokio::test]
    async fn disputing_a_final_state_concludes_the_channel() {
        let s = setup();
        let adj = &s.parties[0].adj;
        adj.dispute(&s.req(0, 5, [10, 20], true)).await.unwrap();
        let reg = adj.query_state(&s.channel()).await.unwrap().unwrap();
        assert_eq!(reg.phase, DisputePhase::Conclude);
        assert_eq!(reg.state.version, 5);

        for party in 0..2 {
            assert!(matches!(
                s.parties[party].adj.dispute(&s.req(party, 6, [11, 19], false)).await,
                Err(AdjudicatorError::ConcludedDifferentVersion { requested: 6 })
            ));
        }
        let reg = adj.query_state(&s.channel()).await.unwrap().unwrap();
        assert_eq!(reg.phase, DisputePhase::Conclude);
        assert_eq!(reg.state.version, 5);
        assert!(reg.state.finalized);
    }

    #[tokio::test]
    async fn withdraw_requires_conclusion() {
        let s = setup();
        let adj = &s.parties[0].adj;
        let req = s.req(0, 1, [10, 20], false);
        adj.register(&req).await.unwrap();
        assert!(matches!(
            adj.withdraw(&req).await,
            Err(AdjudicatorError::NotFinal)
        ));
    }

    #[test]
    fn withdrawal_request_is_signed_by_participant() {
        let signer = Signer::from_seed([5; 32]);
        let funding = Funding::new(crate::Hash([1; 32]), signer.address());
        let req = make_withdrawal_request(&signer, funding, AccountId([2; 32]), 77).unwrap();
        assert!(req.verify().unwrap());
        let tampered = WithdrawalRequest {
            receiver: AccountId([3; 32]),
            ..req
        };
        assert!(!tampered.verify().unwrap());
    }
}
