//! Canister and ledger access through the `dfx` command line.
//!
//! Arguments are printed as IDL text and replies are parsed back with the
//! IDL codec. `query_events` hands the printed reply to the caller
//! unparsed, the event subscription decodes it.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    idl::IdlValue,
    text::{self, TextError},
};
use crate::{
    canister::{
        AdjudicatorRequest, Canister, CanisterError, ContractError, EventLog, Timestamp,
        WithdrawalRequest,
    },
    channel::{Amount, ChannelId, Funding, Memo, RegisteredState},
    ledger::{BlockHeight, Ledger, LedgerError, TransferArgs},
};

/// Something that executes a textual canister call and returns the printed
/// reply.
#[async_trait]
pub trait TextTransport: Send + Sync {
    async fn call(
        &self,
        canister: &str,
        method: &str,
        args: &str,
        query: bool,
    ) -> Result<String, CanisterError>;
}

/// Runs `dfx canister call --network <url> <canister> <method> <args>`.
#[derive(Debug, Clone)]
pub struct DfxCli {
    binary: PathBuf,
    network: String,
}

impl DfxCli {
    pub fn new(binary: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            network: network.into(),
        }
    }
}

#[async_trait]
impl TextTransport for DfxCli {
    async fn call(
        &self,
        canister: &str,
        method: &str,
        args: &str,
        query: bool,
    ) -> Result<String, CanisterError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["canister", "call", "--network", &self.network]);
        if query {
            cmd.arg("--query");
        }
        cmd.args([canister, method, args]);
        // A dropped call must not leave a transfer running in the background.
        cmd.kill_on_drop(true);
        trace!(canister, method, args, "dfx call");

        let out = cmd
            .output()
            .await
            .map_err(|e| CanisterError::Transport(format!("running dfx: {e}")))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(CanisterError::Transport(format!(
                "dfx exited with {}: {}",
                out.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

#[async_trait]
impl<T: TextTransport + ?Sized> TextTransport for std::sync::Arc<T> {
    async fn call(
        &self,
        canister: &str,
        method: &str,
        args: &str,
        query: bool,
    ) -> Result<String, CanisterError> {
        (**self).call(canister, method, args, query).await
    }
}

fn args(values: Vec<IdlValue>) -> String {
    IdlValue::Tuple(values).to_string()
}

/// The Perun canister behind a [TextTransport].
#[derive(Debug, Clone)]
pub struct DfxCanister<T = DfxCli> {
    transport: T,
    canister_id: String,
}

impl<T: TextTransport> DfxCanister<T> {
    pub fn new(transport: T, canister_id: impl Into<String>) -> Self {
        Self {
            transport,
            canister_id: canister_id.into(),
        }
    }

    /// Calls a method that replies with a result variant.
    async fn update(&self, method: &str, arg: IdlValue) -> Result<IdlValue, CanisterError> {
        let reply = self
            .transport
            .call(&self.canister_id, method, &args(vec![arg]), false)
            .await?;
        debug!(method, %reply, "canister reply");
        text::decode_contract_reply(&reply)
    }

    async fn query(&self, method: &str, argv: Vec<IdlValue>) -> Result<String, CanisterError> {
        self.transport
            .call(&self.canister_id, method, &args(argv), true)
            .await
    }
}

#[async_trait]
impl<T: TextTransport> Canister for DfxCanister<T> {
    async fn deposit(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        let v = self.update("deposit", text::funding(funding)).await?;
        Ok(text::decode_amount_opt(&v)?)
    }

    async fn deposit_memo(
        &self,
        funding: &Funding,
        memo: Memo,
    ) -> Result<Option<Amount>, CanisterError> {
        let v = self
            .update("deposit_memo", text::funding_memo(funding, memo))
            .await?;
        Ok(text::decode_amount_opt(&v)?)
    }

    async fn withdraw(&self, req: &WithdrawalRequest) -> Result<Amount, CanisterError> {
        let v = self
            .update("withdraw", text::withdrawal_request(req))
            .await?;
        Ok(text::decode_amount(&v)?)
    }

    async fn conclude(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        self.update("conclude", text::adjudicator_request(req))
            .await
            .map(|_| ())
    }

    async fn dispute(&self, req: &AdjudicatorRequest) -> Result<(), CanisterError> {
        self.update("dispute", text::adjudicator_request(req))
            .await
            .map(|_| ())
    }

    async fn query_holdings(&self, funding: &Funding) -> Result<Option<Amount>, CanisterError> {
        let reply = self
            .query("query_holdings", vec![text::funding(funding)])
            .await?;
        Ok(text::decode_amount_opt(&text::decode_query_reply(&reply)?)?)
    }

    async fn query_state(
        &self,
        channel: &ChannelId,
    ) -> Result<Option<RegisteredState>, CanisterError> {
        let reply = self
            .query("query_state", vec![IdlValue::Blob(channel.0.to_vec())])
            .await?;
        Ok(text::decode_registered_state_opt(
            &text::decode_query_reply(&reply)?,
        )?)
    }

    async fn query_events(
        &self,
        channel: &ChannelId,
        since: Timestamp,
    ) -> Result<EventLog, CanisterError> {
        let argv = match text::events_query(channel, since) {
            IdlValue::Tuple(items) => items,
            other => vec![other],
        };
        Ok(EventLog::Text(self.query("query_events", argv).await?))
    }

    async fn transaction_notification(
        &self,
        block: BlockHeight,
    ) -> Result<Option<Amount>, CanisterError> {
        let v = self
            .update("transaction_notification", IdlValue::Nat64(block))
            .await?;
        Ok(text::decode_amount_opt(&v)?)
    }
}

/// The token ledger behind a [TextTransport].
#[derive(Debug, Clone)]
pub struct DfxLedger<T = DfxCli> {
    transport: T,
    ledger_id: String,
}

impl<T: TextTransport> DfxLedger<T> {
    pub fn new(transport: T, ledger_id: impl Into<String>) -> Self {
        Self {
            transport,
            ledger_id: ledger_id.into(),
        }
    }
}

#[async_trait]
impl<T: TextTransport> Ledger for DfxLedger<T> {
    async fn transfer(&self, targs: TransferArgs) -> Result<BlockHeight, LedgerError> {
        let reply = self
            .transport
            .call(
                &self.ledger_id,
                "transfer",
                &args(vec![text::transfer_args(&targs)]),
                false,
            )
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        debug!(%reply, "ledger reply");
        text::decode_transfer_reply(&reply)
    }
}

/// Serves textual calls from a [Canister] and a [Ledger]: the receiving end
/// of [DfxCanister] and [DfxLedger] for tests and local setups.
#[derive(Debug, Clone)]
pub struct TextService<C, L> {
    canister: C,
    ledger: L,
}

impl<C: Canister, L: Ledger> TextService<C, L> {
    pub fn new(canister: C, ledger: L) -> Self {
        Self { canister, ledger }
    }

    /// Executes `method` with the printed `args` and prints the reply.
    pub async fn handle(&self, method: &str, args: &str) -> Result<String, CanisterError> {
        let argv = IdlValue::parse(args).map_err(TextError::from)?;
        let arg = argv.clone().into_single();
        let c = &self.canister;

        fn reply<T>(
            res: Result<T, CanisterError>,
            f: impl FnOnce(T) -> IdlValue,
        ) -> Result<IdlValue, CanisterError> {
            match res {
                Ok(v) => Ok(text::contract_result(Ok(f(v)))),
                Err(CanisterError::Rejected(e)) => Ok(text::contract_result(Err(&e))),
                Err(e) => Err(e),
            }
        }

        let out = match method {
            "transfer" => {
                let res = self.ledger.transfer(text::decode_transfer_args(&arg)?).await;
                match res {
                    Ok(block) => text::transfer_result(&Ok(block)),
                    Err(LedgerError::Transfer(e)) => text::transfer_result(&Err(e)),
                    Err(e) => return Err(CanisterError::Transport(e.to_string())),
                }
            }
            "deposit" => reply(
                c.deposit(&text::decode_funding(&arg)?).await,
                text::amount_opt,
            )?,
            "deposit_memo" => {
                let (funding, memo) = text::decode_funding_memo(&arg)?;
                reply(c.deposit_memo(&funding, memo).await, text::amount_opt)?
            }
            "withdraw" => reply(
                c.withdraw(&text::decode_withdrawal_request(&arg)?).await,
                |a| IdlValue::Nat(a as u128),
            )?,
            "conclude" => reply(
                c.conclude(&text::decode_adjudicator_request(&arg)?).await,
                |_| IdlValue::Null,
            )?,
            "dispute" => reply(
                c.dispute(&text::decode_adjudicator_request(&arg)?).await,
                |_| IdlValue::Null,
            )?,
            "transaction_notification" => {
                let block = arg.as_u64().ok_or(TextError::Invalid("block"))?;
                reply(c.transaction_notification(block).await, text::amount_opt)?
            }
            "query_holdings" => {
                text::amount_opt(c.query_holdings(&text::decode_funding(&arg)?).await?)
            }
            "query_state" => {
                let channel = arg
                    .as_blob()
                    .and_then(|b| ChannelId::from_slice(&b).ok())
                    .ok_or(TextError::Invalid("channel"))?;
                text::registered_state_opt(c.query_state(&channel).await?.as_ref())
            }
            "query_events" => {
                let (channel, since) = text::decode_events_query(&argv)?;
                return match c.query_events(&channel, since).await? {
                    EventLog::Text(t) => Ok(t),
                    EventLog::Structured(evs) => Ok(text::events(&evs).to_string()),
                };
            }
            _ => {
                return Err(CanisterError::Rejected(ContractError::Other(format!(
                    "no method {method}"
                ))))
            }
        };
        Ok(IdlValue::Tuple(vec![out]).to_string())
    }
}

#[async_trait]
impl<C: Canister, L: Ledger> TextTransport for TextService<C, L> {
    async fn call(
        &self,
        _canister: &str,
        method: &str,
        args: &str,
        _query: bool,
    ) -> Result<String, CanisterError> {
        self.handle(method, args).await
    }
}
