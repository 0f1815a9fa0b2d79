//! Binary transport for canister calls.
//!
//! Every call and reply is a protobuf message prefixed with its length as a
//! 2 byte big-endian integer. [ProtoCanister] encodes calls for any
//! [CallTransport], [ProtoService] decodes them and executes them on a
//! [Canister].

use async_trait::async_trait;
use prost::{bytes::BufMut, Message};
use tracing::{debug, warn};

use crate::{
    canister::{
        AdjudicatorRequest, Canister, CanisterError, ChainEvent, ContractError, EventLog,
        Timestamp, WithdrawalRequest,
    },
    channel::{
        Amount, ChannelId, DisputePhase, Funding, IcpParams, IcpState, Memo, RegisteredState,
        PARTICIPANTS,
    },
    encoding::types::{nonce_from_be_bytes, AccountId, Address, Hash, Signature},
    ledger::BlockHeight,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("frame of {0} bytes does not fit the length prefix")]
    FrameTooLarge(usize),
    #[error("truncated frame")]
    Truncated,
    #[error("expected field {0}")]
    ExpectedSome(&'static str),
    #[error("wrong byte length for {0}")]
    ByteLengthMismatch(&'static str),
    #[error("expected two entries in {0}")]
    ParticipantSizeMismatch(&'static str),
    #[error("unknown dispute phase {0}")]
    UnknownPhase(i32),
    #[error("nonce out of range")]
    NonceOutOfRange,
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
    #[error(transparent)]
    Encode(#[from] prost::EncodeError),
}

impl From<ProtoError> for CanisterError {
    fn from(e: ProtoError) -> Self {
        CanisterError::Decode(e.to_string())
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct FundingMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub participant: Vec<u8>,
    #[prost(uint64, optional, tag = "3")]
    pub memo: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ParamsMsg {
    /// 32 bytes, big-endian.
    #[prost(bytes = "vec", tag = "1")]
    pub nonce: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub participants: Vec<Vec<u8>>,
    #[prost(uint64, tag = "3")]
    pub challenge_duration: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(uint64, repeated, tag = "3")]
    pub allocation: Vec<u64>,
    #[prost(bool, tag = "4")]
    pub finalized: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct AdjudicatorRequestMsg {
    #[prost(message, optional, tag = "1")]
    pub params: Option<ParamsMsg>,
    #[prost(message, optional, tag = "2")]
    pub state: Option<StateMsg>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub sigs: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WithdrawalRequestMsg {
    #[prost(message, optional, tag = "1")]
    pub funding: Option<FundingMsg>,
    #[prost(bytes = "vec", tag = "2")]
    pub receiver: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub time: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Phase {
    Register = 0,
    Progress = 1,
    Conclude = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct RegisteredStateMsg {
    #[prost(enumeration = "Phase", tag = "1")]
    pub phase: i32,
    #[prost(message, optional, tag = "2")]
    pub state: Option<StateMsg>,
    #[prost(uint64, tag = "3")]
    pub timeout: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct EventMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(bool, tag = "3")]
    pub finalized: bool,
    #[prost(uint64, repeated, tag = "4")]
    pub alloc: Vec<u64>,
    #[prost(uint64, tag = "5")]
    pub timeout: u64,
    #[prost(uint64, tag = "6")]
    pub timestamp: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct EventsQueryMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub since: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Call {
    #[prost(oneof = "call::Msg", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub msg: Option<call::Msg>,
}

pub mod call {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "1")]
        Deposit(super::FundingMsg),
        #[prost(message, tag = "2")]
        DepositMemo(super::FundingMsg),
        #[prost(message, tag = "3")]
        Withdraw(super::WithdrawalRequestMsg),
        #[prost(message, tag = "4")]
        Conclude(super::AdjudicatorRequestMsg),
        #[prost(message, tag = "5")]
        Dispute(super::AdjudicatorRequestMsg),
        #[prost(message, tag = "6")]
        QueryHoldings(super::FundingMsg),
        #[prost(bytes = "vec", tag = "7")]
        QueryState(Vec<u8>),
        #[prost(message, tag = "8")]
        QueryEvents(super::EventsQueryMsg),
        #[prost(uint64, tag = "9")]
        TransactionNotification(u64),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, Message)]
pub struct AmountMsg {
    #[prost(uint64, optional, tag = "1")]
    pub amount: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StateReplyMsg {
    #[prost(message, optional, tag = "1")]
    pub state: Option<RegisteredStateMsg>,
}

#[derive(Clone, PartialEq, Message)]
pub struct EventsMsg {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<EventMsg>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Reply {
    #[prost(oneof = "reply::Outcome", tags = "1, 2, 3, 4, 5, 6")]
    pub outcome: Option<reply::Outcome>,
}

pub mod reply {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Outcome {
        #[prost(message, tag = "1")]
        Done(super::Empty),
        #[prost(message, tag = "2")]
        Amount(super::AmountMsg),
        #[prost(message, tag = "3")]
        State(super::StateReplyMsg),
        #[prost(message, tag = "4")]
        Events(super::EventsMsg),
        /// Name of the [ContractError](crate::canister::ContractError).
        #[prost(string, tag = "5")]
        Rejected(String),
        #[prost(string, tag = "6")]
        Failed(String),
    }
}

/// Encodes `msg` with a 2 byte big-endian length prefix.
pub fn encode_frame<M: Message>(msg: &M) -> Result<Vec<u8>, ProtoError> {
    // The prefix is a u16, not the LEB128 varint of
    // `encode_length_delimited`.
    let len = msg.encoded_len();
    if len > u16::MAX as usize {
        return Err(ProtoError::FrameTooLarge(len));
    }
    let mut buf = Vec::with_capacity(2 + len);
    buf.put_slice(&(len as u16).to_be_bytes());
    msg.encode(&mut buf)?;
    Ok(buf)
}

pub fn decode_frame<M: Message + Default>(frame: &[u8]) -> Result<M, ProtoError> {
    let [hi, lo, body @ ..] = frame else {
        return Err(ProtoError::Truncated);
    };
    if u16::from_be_bytes([*hi, *lo]) as usize != body.len() {
        return Err(ProtoError::Truncated);
    }
    Ok(M::decode(body)?)
}

fn fixed<T, E>(
    bytes: &[u8],
    name: &'static str,
    from_slice: impl Fn(&[u8]) -> Result<T, E>,
) -> Result<T, ProtoError> {
    from_slice(bytes).map_err(|_| ProtoError::ByteLengthMismatch(name))
}

fn two<T, U>(
    items: Vec<T>,
    name: &'static str,
    f: impl Fn(T) -> Result<U, ProtoError>,
) -> Result<[U; PARTICIPANTS], ProtoError> {
    let [a, b]: [T; PARTICIPANTS] = items
        .try_into()
        .map_err(|_| ProtoError::ParticipantSizeMismatch(name))?;
    Ok([f(a)?, f(b)?])
}

impl From<&Funding> for FundingMsg {
    fn from(value: &Funding) -> Self {
        Self {
            channel: value.channel.0.to_vec(),
            participant: value.participant.0.to_vec(),
            memo: None,
        }
    }
}

impl TryFrom<FundingMsg> for Funding {
    type Error = ProtoError;

    fn try_from(value: FundingMsg) -> Result<Self, Self::Error> {
        Ok(Funding::new(
            fixed(&value.channel, "channel", Hash::from_slice)?,
            fixed(&value.participant, "participant", Address::from_slice)?,
        ))
    }
}

impl From<&IcpParams> for ParamsMsg {
    fn from(value: &IcpParams) -> Self {
        let mut nonce = vec![0u8; 32];
        value.nonce.to_big_endian(&mut nonce);
        Self {
            nonce,
            participants: value.participants.iter().map(|p| p.0.to_vec()).collect(),
            challenge_duration: value.challenge_duration,
        }
    }
}

impl TryFrom<ParamsMsg> for IcpParams {
    type Error = ProtoError;

    fn try_from(value: ParamsMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            nonce: nonce_from_be_bytes(&value.nonce).map_err(|_| ProtoError::NonceOutOfRange)?,
            participants: two(value.participants, "participants", |p| {
                fixed(&p, "participant", Address::from_slice)
            })?,
            challenge_duration: value.challenge_duration,
        })
    }
}

impl From<&IcpState> for StateMsg {
    fn from(value: &IcpState) -> Self {
        Self {
            channel: value.channel.0.to_vec(),
            version: value.version,
            allocation: value.amounts().to_vec(),
            finalized: value.finalized,
        }
    }
}

impl TryFrom<StateMsg> for IcpState {
    type Error = ProtoError;

    fn try_from(value: StateMsg) -> Result<Self, Self::Error> {
        Ok(IcpState::from_amounts(
            fixed(&value.channel, "channel", Hash::from_slice)?,
            value.version,
            two(value.allocation, "allocation", Ok)?,
            value.finalized,
        ))
    }
}

impl From<&AdjudicatorRequest> for AdjudicatorRequestMsg {
    fn from(value: &AdjudicatorRequest) -> Self {
        Self {
            params: Some((&value.params).into()),
            state: Some((&value.state).into()),
            sigs: value.sigs.iter().map(|s| s.0.to_vec()).collect(),
        }
    }
}

impl TryFrom<AdjudicatorRequestMsg> for AdjudicatorRequest {
    type Error = ProtoError;

    fn try_from(value: AdjudicatorRequestMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            params: value
                .params
                .ok_or(ProtoError::ExpectedSome("params"))?
                .try_into()?,
            state: value
                .state
                .ok_or(ProtoError::ExpectedSome("state"))?
                .try_into()?,
            sigs: two(value.sigs, "sigs", |s| {
                fixed(&s, "signature", Signature::from_slice)
            })?,
        })
    }
}

impl From<&WithdrawalRequest> for WithdrawalRequestMsg {
    fn from(value: &WithdrawalRequest) -> Self {
        Self {
            funding: Some((&value.funding).into()),
            receiver: value.receiver.0.to_vec(),
            time: value.time,
            signature: value.signature.0.to_vec(),
        }
    }
}

impl TryFrom<WithdrawalRequestMsg> for WithdrawalRequest {
    type Error = ProtoError;

    fn try_from(value: WithdrawalRequestMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            funding: value
                .funding
                .ok_or(ProtoError::ExpectedSome("funding"))?
                .try_into()?,
            receiver: fixed(&value.receiver, "receiver", AccountId::from_slice)?,
            time: value.time,
            signature: fixed(&value.signature, "signature", Signature::from_slice)?,
        })
    }
}

impl From<DisputePhase> for Phase {
    fn from(value: DisputePhase) -> Self {
        match value {
            DisputePhase::Register => Phase::Register,
            DisputePhase::Progress => Phase::Progress,
            DisputePhase::Conclude => Phase::Conclude,
        }
    }
}

impl From<Phase> for DisputePhase {
    fn from(value: Phase) -> Self {
        match value {
            Phase::Register => DisputePhase::Register,
            Phase::Progress => DisputePhase::Progress,
            Phase::Conclude => DisputePhase::Conclude,
        }
    }
}

impl From<&RegisteredState> for RegisteredStateMsg {
    fn from(value: &RegisteredState) -> Self {
        Self {
            phase: Phase::from(value.phase) as i32,
            state: Some((&value.state).into()),
            timeout: value.timeout,
        }
    }
}

impl TryFrom<RegisteredStateMsg> for RegisteredState {
    type Error = ProtoError;

    fn try_from(value: RegisteredStateMsg) -> Result<Self, Self::Error> {
        let phase = Phase::from_i32(value.phase).ok_or(ProtoError::UnknownPhase(value.phase))?;
        Ok(Self {
            phase: phase.into(),
            state: value
                .state
                .ok_or(ProtoError::ExpectedSome("state"))?
                .try_into()?,
            timeout: value.timeout,
        })
    }
}

impl From<&ChainEvent> for EventMsg {
    fn from(value: &ChainEvent) -> Self {
        Self {
            channel: value.channel.0.to_vec(),
            version: value.version,
            finalized: value.finalized,
            alloc: value.alloc.to_vec(),
            timeout: value.timeout,
            timestamp: value.timestamp,
        }
    }
}

impl TryFrom<EventMsg> for ChainEvent {
    type Error = ProtoError;

    fn try_from(value: EventMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            channel: fixed(&value.channel, "channel", Hash::from_slice)?,
            version: value.version,
            finalized: value.finalized,
            alloc: two(value.alloc, "alloc", Ok)?,
            timeout: value.timeout,
            timestamp: value.timestamp,
        })
    }
}

/// Carries an encoded [Call] frame to the canister and returns the encoded
/// [Reply] frame.
#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn call(&self, frame: Vec<u8>) -> Result<Vec<u8>, CanisterError>;
}

#[async_trait]
impl<T: CallTransport + ?Sized> CallTransport for std::sync::Arc<T> {
    async fn call(&self, frame: Vec<u8>) -> Result<Vec<u8>, CanisterError> {
        (**self).call(frame).await
    }
}

/// Client side of the binary transport.
#[derive(Debug, Clone)]
pub struct ProtoCanister<T> {
    transport: T,
}

impl<T: CallTransport> ProtoCanister<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn roundtrip(&self, msg: call::Msg) -> Result<reply::Outcome, CanisterError> {
        let frame = encode_frame(&Call { msg: Some(msg) })?;
        let reply: Reply = decode_frame(&self.transport.call(frame).await?)?;
        match reply.outcome {
            Some(reply::Outcome::Rejected(name)) => {
                Err(CanisterError::Rejected(ContractError::from_name(&name)))
            }
            Some(reply::Outcome::Failed(msg)) => Err(CanisterError::Transport(msg)),
            Some(outcome) => Ok(outcome),
            None => Err(ProtoError::ExpectedSome("outcome").into()),
        }
    }

    async fn amount(&self, msg: call::Msg) -> Result<Option<Amount>, CanisterError> {
        match self.roundtrip(msg).await? {
            reply::Outcome::Amount(a) => Ok(a.amount),
            _ => Err(unexpected()),
        }
    }

    async fn done(&self, msg: call::Msg) -> Result<(), CanisterError> {
        match self.roundtrip(msg).await? {
            reply::Outcome::Done(_) => Ok(()),
            _ => Err(unexpected()),
        }
    }
}

fn unexpected() -> CanisterError {
    CanisterError::Decode("unexpected reply type".into())
}

#[async_trait]
impl<T: CallTransport> Canister for ProtoCanister<T> {
    async fn deposit(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        self.amount(call::Msg::Deposit(funding.into())).await
    }

    async fn deposit_memo(
        &self,
        funding: &Funding,
        memo: Memo,
    ) -> Result<Option<Amount>, CanisterError> {
        let mut msg = FundingMsg::from(funding);
        msg.memo = Some(memo);
        self.amount(call::Msg::DepositMemo(msg)).await
    }

    async fn withdraw(&self, req: &WithdrawalRequest) -> Result<Amount, CanisterError> {
        self.amount(call::Msg::Withdraw(req.into()))
            .await?
            .ok_or_else(|| ProtoError::ExpectedSome("amount").into())
    }

    async fn conclude(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        self.done(call::Msg::Conclude(req.into())).await
    }

    async fn dispute(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        self.done(call::Msg::Dispute(req.into())).await
    }

    async fn query_holdings(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        self.amount(call::Msg::QueryHoldings(funding.into())).await
    }

    async fn query_state(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<RegisteredState>, CanisterError> {
        match self
            .roundtrip(call::Msg::QueryState(channel.0.to_vec()))
            .await?
        {
            reply::Outcome::State(s) => Ok(s.state.map(RegisteredState::try_from).transpose()?),
            _ => Err(unexpected()),
        }
    }

    async fn query_events(
        &self,
        channel: &ChannelId,
        since: Timestamp,
    ) -> Result<EventLog, CanisterError> {
        let query = EventsQueryMsg {
            channel: channel.0.to_vec(),
            since,
        };
        match self.roundtrip(call::Msg::QueryEvents(query)).await? {
            reply::Outcome::Events(evs) => Ok(EventLog::Structured(
                evs.events
                    .into_iter()
                    .map(ChainEvent::try_from)
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(unexpected()),
        }
    }

    async fn transaction_notification(
        &self,
        block: BlockHeight,
    ) -> Result<Option<Amount>, CanisterError> {
        self.amount(call::Msg::TransactionNotification(block)).await
    }
}

/// Executes encoded calls on a [Canister].
#[derive(Debug, Clone)]
pub struct ProtoService<C> {
    canister: C,
}

fn amount_reply(a: Option<Amount>) -> reply::Outcome {
    reply::Outcome::Amount(AmountMsg { amount: a })
}

impl<C: Canister> ProtoService<C> {
    pub fn new(canister: C) -> Self {
        Self { canister }
    }

    /// Decodes a [Call] frame, executes it and encodes the [Reply]. Calls
    /// that cannot be decoded are answered with a failure reply.
    pub async fn handle(&self, frame: &[u8]) -> Result<Vec<u8>, ProtoError> {
        let outcome = match self.dispatch(frame).await {
            Ok(outcome) => outcome,
            Err(CanisterError::Rejected(e)) => reply::Outcome::Rejected(e.name().to_string()),
            Err(e) => {
                warn!(error = %e, "call failed");
                reply::Outcome::Failed(e.to_string())
            }
        };
        encode_frame(&Reply {
            outcome: Some(outcome),
        })
    }

    async fn dispatch(&self, frame: &[u8]) -> Result<reply::Outcome, CanisterError> {
        let call: Call = decode_frame(frame)?;
        let msg = call.msg.ok_or(ProtoError::ExpectedSome("msg"))?;
        let c = &self.canister;
        Ok(match msg {
            call::Msg::Deposit(f) => amount_reply(c.deposit(&f.try_into()?).await?),
            call::Msg::DepositMemo(f) => {
                let memo = f.memo.ok_or(ProtoError::ExpectedSome("memo"))?;
                amount_reply(c.deposit_memo(&f.try_into()?, memo).await?)
            }
            call::Msg::Withdraw(req) => amount_reply(Some(c.withdraw(&req.try_into()?).await?)),
            call::Msg::Conclude(req) => {
                c.conclude(&req.try_into()?).await?;
                reply::Outcome::Done(Empty {})
            }
            call::Msg::Dispute(req) => {
                c.dispute(&req.try_into()?).await?;
                reply::Outcome::Done(Empty {})
            }
            call::Msg::QueryHoldings(f) => amount_reply(c.query_holdings(&f.try_into()?).await?),
            call::Msg::QueryState(channel) => {
                let channel = fixed(&channel, "channel", Hash::from_slice)?;
                reply::Outcome::State(StateReplyMsg {
                    state: c.query_state(&channel).await?.as_ref().map(Into::into),
                })
            }
            call::Msg::QueryEvents(q) => {
                let channel = fixed(&q.channel, "channel", Hash::from_slice)?;
                let events: Vec<EventMsg> = match c.query_events(&channel, q.since).await? {
                    EventLog::Structured(evs) => evs.iter().map(Into::into).collect(),
                    EventLog::Text(text) => {
                        debug!(%text, "canister returned a textual event log");
                        return Err(CanisterError::Decode(
                            "textual event log on binary transport".into(),
                        ));
                    }
                };
                reply::Outcome::Events(EventsMsg { events })
            }
            call::Msg::TransactionNotification(block) => {
                amount_reply(c.transaction_notification(block).await?)
            }
        })
    }
}

#[async_trait]
impl<C: Canister> CallTransport for ProtoService<C> {
    async fn call(&self, frame: Vec<u8>) -> Result<Vec<u8>, CanisterError> {
        Ok(self.handle(&frame).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{Ledger, TransferArgs, DEFAULT_FEE},
        sig::Signer,
        sim::{EventFormat, SimulatedChain},
        U256,
    };
    use std::sync::Arc;

    fn setup() -> (Arc<SimulatedChain>, ProtoCanister<ProtoService<Arc<SimulatedChain>>>) {
        let chain = Arc::new(SimulatedChain::new());
        chain.set_event_format(EventFormat::Structured);
        let canister = ProtoCanister::new(ProtoService::new(chain.clone()));
        (chain, canister)
    }

    fn request(a: &Signer, b: &Signer, version: u64, finalized: bool) -> AdjudicatorRequest {
        let params = IcpParams {
            nonce: U256::MAX,
            participants: [a.address(), b.address()],
            challenge_duration: 10,
        };
        let state =
            IcpState::from_amounts(params.channel_id().unwrap(), version, [7, 8], finalized);
        AdjudicatorRequest {
            params,
            state,
            sigs: [
                a.sign_icp_state(&state).unwrap(),
                b.sign_icp_state(&state).unwrap(),
            ],
        }
    }

    #[test]
    fn frames_carry_a_big_endian_length() {
        let msg = Call {
            msg: Some(call::Msg::TransactionNotification(300)),
        };
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(frame[..2], (msg.encoded_len() as u16).to_be_bytes());
        assert_eq!(decode_frame::<Call>(&frame).unwrap(), msg);

        assert!(matches!(
            decode_frame::<Call>(&frame[..frame.len() - 1]),
            Err(ProtoError::Truncated)
        ));
        assert!(matches!(decode_frame::<Call>(&[0]), Err(ProtoError::Truncated)));

        let huge = EventsMsg {
            events: vec![
                EventMsg {
                    channel: vec![0xff; 32],
                    version: u64::MAX,
                    ..Default::default()
                };
                2048
            ],
        };
        assert!(matches!(
            encode_frame(&huge),
            Err(ProtoError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn malformed_messages_are_rejected() {
        let mut msg = AdjudicatorRequestMsg::from(&request(
            &Signer::from_seed([1; 32]),
            &Signer::from_seed([2; 32]),
            1,
            false,
        ));
        msg.sigs.pop();
        assert!(matches!(
            AdjudicatorRequest::try_from(msg.clone()),
            Err(ProtoError::ParticipantSizeMismatch("sigs"))
        ));
        msg.state = None;
        assert!(matches!(
            AdjudicatorRequest::try_from(msg),
            Err(ProtoError::ExpectedSome("state"))
        ));

        let reg = RegisteredStateMsg {
            phase: 7,
            ..Default::default()
        };
        assert!(matches!(
            RegisteredState::try_from(reg),
            Err(ProtoError::UnknownPhase(7))
        ));
    }

    #[tokio::test]
    async fn undecodable_calls_get_a_failure_reply() {
        let service = ProtoService::new(Arc::new(SimulatedChain::new()));
        let reply: Reply = decode_frame(&service.handle(&[0, 1, 0xff]).await.unwrap()).unwrap();
        assert!(matches!(reply.outcome, Some(reply::Outcome::Failed(_))));
    }

    #[tokio::test]
    async fn canister_calls_survive_the_binary_transport() {
        let (chain, canister) = setup();
        let a = Signer::from_seed([51; 32]);
        let b = Signer::from_seed([52; 32]);
        let req = request(&a, &b, 1, false);
        let channel = req.state.channel;

        assert_eq!(canister.query_state(&channel).await.unwrap(), None);
        canister.dispute(&req).await.unwrap();
        let reg = canister.query_state(&channel).await.unwrap().unwrap();
        assert_eq!(reg.state, req.state);
        assert_eq!(reg.phase, DisputePhase::Register);
        assert_eq!(
            canister.dispute(&req).await,
            Err(CanisterError::Rejected(ContractError::OutdatedState))
        );

        match canister.query_events(&channel, 0).await.unwrap() {
            EventLog::Structured(evs) => {
                assert_eq!(evs.len(), 1);
                assert_eq!(evs[0].version, 1);
                assert_eq!(evs[0].alloc, [7, 8]);
            }
            other => panic!("unexpected log {other:?}"),
        }

        // Fund participant a through the ledger and the notification call.
        let acc = SimulatedChain::account_of(&a.address());
        chain.mint(acc, 1_000_000);
        let funding = Funding::new(channel, a.address());
        let memo = funding.memo().unwrap();
        let block = chain
            .ledger(acc)
            .transfer(TransferArgs {
                memo,
                amount: 7,
                fee: DEFAULT_FEE,
                to: chain.canister_account(),
                created_at_time: chain.now(),
            })
            .await
            .unwrap();
        assert_eq!(canister.query_holdings(&funding).await.unwrap(), None);
        assert_eq!(
            canister.transaction_notification(block).await.unwrap(),
            Some(7)
        );
        assert_eq!(canister.deposit_memo(&funding, memo).await.unwrap(), Some(7));
        assert_eq!(canister.query_holdings(&funding).await.unwrap(), Some(7));
        assert_eq!(
            canister.transaction_notification(block + 100).await,
            Err(CanisterError::Rejected(ContractError::UnknownTransaction))
        );
    }

    #[tokio::test]
    async fn textual_event_logs_are_not_forwarded() {
        let (chain, canister) = setup();
        chain.set_event_format(EventFormat::Text);
        assert!(matches!(
            canister.query_events(&Hash([3; 32]), 0).await,
            Err(CanisterError::Transport(_))
        ));
    }
}
