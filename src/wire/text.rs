//! Conversion between canister/ledger types and their textual IDL form.
//!
//! Field names follow the canister interface. Calls that can be rejected
//! reply with `variant { Ok = ... }` or `variant { Err = variant { Name } }`.

use super::idl::{IdlError, IdlValue};
use crate::{
    canister::{
        AdjudicatorRequest, CanisterError, ChainEvent, ContractError, Timestamp,
        WithdrawalRequest,
    },
    channel::{
        Amount, ChannelId, DisputePhase, Funding, IcpParams, IcpState, Memo, RegisteredState,
    },
    encoding::types::{AccountId, Address, Hash, Signature, U256},
    ledger::{BlockHeight, LedgerError, TransferArgs, TransferError},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextError {
    #[error(transparent)]
    Idl(#[from] IdlError),
    #[error("missing field {0}")]
    Missing(&'static str),
    #[error("invalid value for {0}")]
    Invalid(&'static str),
    #[error("unexpected reply shape")]
    Shape,
}

impl From<TextError> for CanisterError {
    fn from(e: TextError) -> Self {
        CanisterError::Decode(e.to_string())
    }
}

impl From<TextError> for LedgerError {
    fn from(e: TextError) -> Self {
        LedgerError::Decode(e.to_string())
    }
}

fn blob(bytes: &[u8]) -> IdlValue {
    IdlValue::Blob(bytes.to_vec())
}

fn nat64(n: u64) -> IdlValue {
    IdlValue::Nat64(n)
}

fn field<'a>(v: &'a IdlValue, name: &'static str) -> Result<&'a IdlValue, TextError> {
    v.field(name).ok_or(TextError::Missing(name))
}

fn u64_field(v: &IdlValue, name: &'static str) -> Result<u64, TextError> {
    field(v, name)?.as_u64().ok_or(TextError::Invalid(name))
}

fn bool_field(v: &IdlValue, name: &'static str) -> Result<bool, TextError> {
    field(v, name)?.as_bool().ok_or(TextError::Invalid(name))
}

fn bytes_field(v: &IdlValue, name: &'static str) -> Result<Vec<u8>, TextError> {
    field(v, name)?.as_blob().ok_or(TextError::Invalid(name))
}

macro_rules! fixed_field {
    ($fn:ident, $T:ty) => {
        fn $fn(v: &IdlValue, name: &'static str) -> Result<$T, TextError> {
            <$T>::from_slice(&bytes_field(v, name)?).map_err(|_| TextError::Invalid(name))
        }
    };
}

fixed_field!(hash_field, Hash);
fixed_field!(address_field, Address);
fixed_field!(account_field, AccountId);

fn pair<T>(
    v: &IdlValue,
    name: &'static str,
    f: impl Fn(&IdlValue) -> Option<T>,
) -> Result<[T; 2], TextError> {
    let items = field(v, name)?.as_vec().ok_or(TextError::Invalid(name))?;
    match items {
        [a, b] => Ok([
            f(a).ok_or(TextError::Invalid(name))?,
            f(b).ok_or(TextError::Invalid(name))?,
        ]),
        _ => Err(TextError::Invalid(name)),
    }
}

pub fn funding(funding: &Funding) -> IdlValue {
    IdlValue::record([
        ("channel", blob(&funding.channel.0)),
        ("participant", blob(&funding.participant.0)),
    ])
}

pub fn funding_memo(funding: &Funding, memo: Memo) -> IdlValue {
    IdlValue::record([
        ("channel", blob(&funding.channel.0)),
        ("participant", blob(&funding.participant.0)),
        ("memo", nat64(memo)),
    ])
}

pub fn decode_funding_memo(v: &IdlValue) -> Result<(Funding, Memo), TextError> {
    Ok((decode_funding(v)?, u64_field(v, "memo")?))
}

pub fn decode_funding(v: &IdlValue) -> Result<Funding, TextError> {
    Ok(Funding::new(
        hash_field(v, "channel")?,
        address_field(v, "participant")?,
    ))
}

pub fn params(params: &IcpParams) -> IdlValue {
    let mut nonce = [0u8; 32];
    params.nonce.to_big_endian(&mut nonce);
    IdlValue::record([
        ("nonce", blob(&nonce)),
        (
            "participants",
            IdlValue::Vec(params.participants.iter().map(|p| blob(&p.0)).collect()),
        ),
        ("challenge_duration", nat64(params.challenge_duration)),
    ])
}

pub fn decode_params(v: &IdlValue) -> Result<IcpParams, TextError> {
    let nonce = bytes_field(v, "nonce")?;
    if nonce.len() != 32 {
        return Err(TextError::Invalid("nonce"));
    }
    Ok(IcpParams {
        nonce: U256::from_big_endian(&nonce),
        participants: pair(v, "participants", |p| {
            p.as_blob().and_then(|b| Address::from_slice(&b).ok())
        })?,
        challenge_duration: u64_field(v, "challenge_duration")?,
    })
}

pub fn state(state: &IcpState) -> IdlValue {
    IdlValue::record([
        ("channel", blob(&state.channel.0)),
        ("version", nat64(state.version)),
        (
            "allocation",
            IdlValue::Vec(
                state
                    .amounts()
                    .iter()
                    .map(|a| IdlValue::Nat(*a as u128))
                    .collect(),
            ),
        ),
        ("finalized", IdlValue::Bool(state.finalized)),
    ])
}

pub fn decode_state(v: &IdlValue) -> Result<IcpState, TextError> {
    Ok(IcpState::from_amounts(
        hash_field(v, "channel")?,
        u64_field(v, "version")?,
        pair(v, "allocation", IdlValue::as_u64)?,
        bool_field(v, "finalized")?,
    ))
}

pub fn adjudicator_request(req: &AdjudicatorRequest) -> IdlValue {
    IdlValue::record([
        ("params", params(&req.params)),
        ("state", state(&req.state)),
        (
            "sigs",
            IdlValue::Vec(req.sigs.iter().map(|s| blob(&s.0)).collect()),
        ),
    ])
}

pub fn decode_adjudicator_request(v: &IdlValue) -> Result<AdjudicatorRequest, TextError> {
    Ok(AdjudicatorRequest {
        params: decode_params(field(v, "params")?)?,
        state: decode_state(field(v, "state")?)?,
        sigs: pair(v, "sigs", |s| {
            s.as_blob().and_then(|b| Signature::from_slice(&b).ok())
        })?,
    })
}

pub fn withdrawal_request(req: &WithdrawalRequest) -> IdlValue {
    IdlValue::record([
        ("funding", funding(&req.funding)),
        ("receiver", blob(&req.receiver.0)),
        ("time", nat64(req.time)),
        ("signature", blob(&req.signature.0)),
    ])
}

pub fn decode_withdrawal_request(v: &IdlValue) -> Result<WithdrawalRequest, TextError> {
    let signature = bytes_field(v, "signature")?;
    Ok(WithdrawalRequest {
        funding: decode_funding(field(v, "funding")?)?,
        receiver: account_field(v, "receiver")?,
        time: u64_field(v, "time")?,
        signature: Signature::from_slice(&signature).map_err(|_| TextError::Invalid("signature"))?,
    })
}

pub fn registered_state(reg: &RegisteredState) -> IdlValue {
    IdlValue::record([
        ("phase", IdlValue::variant(reg.phase.name(), IdlValue::Null)),
        ("state", state(&reg.state)),
        ("timeout", nat64(reg.timeout)),
    ])
}

pub fn decode_registered_state(v: &IdlValue) -> Result<RegisteredState, TextError> {
    let phase = field(v, "phase")?
        .as_variant()
        .and_then(|(tag, _)| DisputePhase::from_name(tag))
        .ok_or(TextError::Invalid("phase"))?;
    Ok(RegisteredState {
        phase,
        state: decode_state(field(v, "state")?)?,
        timeout: u64_field(v, "timeout")?,
    })
}

pub fn event(ev: &ChainEvent) -> IdlValue {
    IdlValue::record([
        ("channel", blob(&ev.channel.0)),
        ("version", nat64(ev.version)),
        ("finalized", IdlValue::Bool(ev.finalized)),
        (
            "alloc",
            IdlValue::Vec(ev.alloc.iter().map(|a| IdlValue::Nat(*a as u128)).collect()),
        ),
        ("timeout", nat64(ev.timeout)),
        ("timestamp", nat64(ev.timestamp)),
    ])
}

/// Arguments of `query_events`: the channel and the earliest timestamp.
pub fn events_query(channel: &ChannelId, since: Timestamp) -> IdlValue {
    IdlValue::Tuple(vec![blob(&channel.0), nat64(since)])
}

pub fn decode_events_query(v: &IdlValue) -> Result<(ChannelId, Timestamp), TextError> {
    match v {
        IdlValue::Tuple(items) => match items.as_slice() {
            [channel, since] => Ok((
                channel
                    .as_blob()
                    .and_then(|b| ChannelId::from_slice(&b).ok())
                    .ok_or(TextError::Invalid("channel"))?,
                since.as_u64().ok_or(TextError::Invalid("since"))?,
            )),
            _ => Err(TextError::Shape),
        },
        _ => Err(TextError::Shape),
    }
}

/// Reply of `query_events` as the command line prints it.
pub fn events(events: &[ChainEvent]) -> IdlValue {
    IdlValue::Tuple(vec![IdlValue::Vec(events.iter().map(event).collect())])
}

pub fn amount_opt(amount: Option<Amount>) -> IdlValue {
    IdlValue::opt(amount.map(|a| IdlValue::Nat(a as u128)))
}

pub fn decode_amount_opt(v: &IdlValue) -> Result<Option<Amount>, TextError> {
    match v.as_opt().ok_or(TextError::Shape)? {
        Some(a) => Ok(Some(a.as_u64().ok_or(TextError::Invalid("amount"))?)),
        None => Ok(None),
    }
}

pub fn decode_amount(v: &IdlValue) -> Result<Amount, TextError> {
    v.as_u64().ok_or(TextError::Invalid("amount"))
}

pub fn registered_state_opt(reg: Option<&RegisteredState>) -> IdlValue {
    IdlValue::opt(reg.map(registered_state))
}

pub fn decode_registered_state_opt(v: &IdlValue) -> Result<Option<RegisteredState>, TextError> {
    match v.as_opt().ok_or(TextError::Shape)? {
        Some(reg) => Ok(Some(decode_registered_state(reg)?)),
        None => Ok(None),
    }
}

/// `variant { Ok = value }` or `variant { Err = variant { Name } }`.
pub fn contract_result(res: Result<IdlValue, &ContractError>) -> IdlValue {
    match res {
        Ok(v) => IdlValue::variant("Ok", v),
        Err(ContractError::Other(msg)) => {
            IdlValue::variant("Err", IdlValue::Text(msg.clone()))
        }
        Err(e) => IdlValue::variant("Err", IdlValue::variant(e.name(), IdlValue::Null)),
    }
}

/// Decodes the printed reply of a canister call that reports success as a
/// result variant.
pub fn decode_contract_reply(reply: &str) -> Result<IdlValue, CanisterError> {
    let v = IdlValue::parse(reply).map_err(TextError::from)?.into_single();
    match v.as_variant() {
        Some(("Ok", ok)) => Ok(ok.clone()),
        Some(("Err", err)) => Err(CanisterError::Rejected(match err {
            IdlValue::Variant(name, _) => ContractError::from_name(name),
            IdlValue::Text(msg) => ContractError::from_name(msg),
            _ => return Err(TextError::Shape.into()),
        })),
        _ => Err(TextError::Shape.into()),
    }
}

/// Decodes the printed reply of a query, which has no result variant.
pub fn decode_query_reply(reply: &str) -> Result<IdlValue, CanisterError> {
    Ok(IdlValue::parse(reply).map_err(TextError::from)?.into_single())
}

fn tokens(e8s: u64) -> IdlValue {
    IdlValue::record([("e8s", nat64(e8s))])
}

fn tokens_field(v: &IdlValue, name: &'static str) -> Result<u64, TextError> {
    u64_field(field(v, name)?, "e8s")
}

/// Argument of the ledger's `transfer` method.
pub fn transfer_args(args: &TransferArgs) -> IdlValue {
    IdlValue::record([
        ("memo", nat64(args.memo)),
        ("amount", tokens(args.amount)),
        ("fee", tokens(args.fee)),
        ("from_subaccount", IdlValue::opt(None)),
        ("to", blob(&args.to.0)),
        (
            "created_at_time",
            IdlValue::opt(Some(IdlValue::record([(
                "timestamp_nanos",
                nat64(args.created_at_time),
            )]))),
        ),
    ])
}

pub fn decode_transfer_args(v: &IdlValue) -> Result<TransferArgs, TextError> {
    let created_at_time = field(v, "created_at_time")?
        .as_opt()
        .ok_or(TextError::Invalid("created_at_time"))?
        .map(|t| u64_field(t, "timestamp_nanos"))
        .transpose()?
        .unwrap_or_default();
    Ok(TransferArgs {
        memo: u64_field(v, "memo")?,
        amount: tokens_field(v, "amount")?,
        fee: tokens_field(v, "fee")?,
        to: account_field(v, "to")?,
        created_at_time,
    })
}

pub fn transfer_result(res: &Result<BlockHeight, TransferError>) -> IdlValue {
    let err = |tag: &str, v: IdlValue| IdlValue::variant("Err", IdlValue::variant(tag, v));
    match res {
        Ok(block) => IdlValue::variant("Ok", nat64(*block)),
        Err(TransferError::BadFee { expected_fee }) => err(
            "BadFee",
            IdlValue::record([("expected_fee", tokens(*expected_fee))]),
        ),
        Err(TransferError::InsufficientFunds { balance }) => err(
            "InsufficientFunds",
            IdlValue::record([("balance", tokens(*balance))]),
        ),
        Err(TransferError::TxTooOld {
            allowed_window_nanos,
        }) => err(
            "TxTooOld",
            IdlValue::record([("allowed_window_nanos", nat64(*allowed_window_nanos))]),
        ),
        Err(TransferError::TxCreatedInFuture) => err("TxCreatedInFuture", IdlValue::Null),
        Err(TransferError::TxDuplicate { duplicate_of }) => err(
            "TxDuplicate",
            IdlValue::record([("duplicate_of", nat64(*duplicate_of))]),
        ),
    }
}

/// Decodes the printed reply of the ledger's `transfer` method.
pub fn decode_transfer_reply(reply: &str) -> Result<BlockHeight, LedgerError> {
    let v = IdlValue::parse(reply).map_err(TextError::from)?.into_single();
    let (tag, inner) = v.as_variant().ok_or(TextError::Shape)?;
    match tag {
        "Ok" => Ok(inner.as_u64().ok_or(TextError::Invalid("block"))?),
        "Err" => {
            let (kind, detail) = inner.as_variant().ok_or(TextError::Shape)?;
            let err = match kind {
                "BadFee" => TransferError::BadFee {
                    expected_fee: tokens_field(detail, "expected_fee")?,
                },
                "InsufficientFunds" => TransferError::InsufficientFunds {
                    balance: tokens_field(detail, "balance")?,
                },
                "TxTooOld" => TransferError::TxTooOld {
                    allowed_window_nanos: u64_field(detail, "allowed_window_nanos")?,
                },
                "TxCreatedInFuture" => TransferError::TxCreatedInFuture,
                "TxDuplicate" => TransferError::TxDuplicate {
                    duplicate_of: u64_field(detail, "duplicate_of")?,
                },
                _ => return Err(TextError::Invalid("transfer error").into()),
            };
            Err(err.into())
        }
        _ => Err(TextError::Shape.into()),
    }
}
