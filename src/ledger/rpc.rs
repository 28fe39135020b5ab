use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ethabi::{Hash, RawLog, Token};
use log::{debug, trace, warn};
use rocket::serde::json::{json, serde_json, Value};
use rocket::tokio::time::{sleep, Instant};
use serde::{Deserialize, Serialize};

use super::abi::{self, ElectionAbi};
use super::{LedgerClient, LedgerError, LedgerWrite, TxFailure};
use crate::model::{
    Address, Candidate, CandidateId, ElectionId, ElectionRecord, ElectionStatus, TxHash,
    VoteCastEvent,
};

/// How writes are followed to finality.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptPolling {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcFault>,
}

#[derive(Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcLog {
    topics: Vec<Hash>,
    data: String,
}

#[derive(Deserialize)]
struct RpcReceipt {
    status: Option<String>,
}

/// A [`LedgerClient`] talking Ethereum JSON-RPC to a node that holds the
/// signing account.
pub struct EthRpcLedger {
    http: reqwest::Client,
    rpc_url: String,
    contract: Address,
    account: Option<Address>,
    abi: ElectionAbi,
    next_id: AtomicU64,
    receipts: ReceiptPolling,
}

impl EthRpcLedger {
    pub fn new(
        rpc_url: impl Into<String>,
        contract: Address,
        account: Option<Address>,
        receipts: ReceiptPolling,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            contract,
            account,
            abi: ElectionAbi::load()?,
            next_id: AtomicU64::new(1),
            receipts,
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        trace!("-> {method} #{}", request.id);
        let response: RpcResponse = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match response.error {
            Some(fault) => Err(LedgerError::Rpc {
                code: fault.code,
                message: fault.message,
            }),
            None => Ok(response.result),
        }
    }

    /// Run a view function and return its decoded outputs.
    async fn call(&self, function: &'static str, args: &[Token]) -> Result<Vec<Token>, LedgerError> {
        let function = self.abi.function(function)?;
        let data = function.encode_input(args)?;
        let params = json!([{ "to": self.contract, "data": to_hex(&data) }, "latest"]);
        let result = self.rpc("eth_call", params).await?;
        let bytes = from_hex(&result)?;
        Ok(function.decode_output(&bytes)?)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn from_hex(value: &Value) -> Result<Vec<u8>, LedgerError> {
    let text = value
        .as_str()
        .ok_or_else(|| LedgerError::Malformed(format!("expected hex string, got {value}")))?;
    hex::decode(text.trim_start_matches("0x"))
        .map_err(|e| LedgerError::Malformed(format!("bad hex {text:?}: {e}")))
}

#[rocket::async_trait]
impl LedgerClient for EthRpcLedger {
    async fn admin(&self) -> Result<Address, LedgerError> {
        abi::decode_address("admin", self.call("admin", &[]).await?)
    }

    async fn is_approved_voter(&self, voter: Address) -> Result<bool, LedgerError> {
        let tokens = self.call("approvedVoters", &[Token::Address(voter)]).await?;
        abi::decode_bool("approvedVoters", tokens)
    }

    async fn election_status(&self) -> Result<ElectionStatus, LedgerError> {
        abi::decode_status(self.call("getElectionStatus", &[]).await?)
    }

    async fn current_election_id(&self) -> Result<ElectionId, LedgerError> {
        abi::decode_uint("currentElectionId", self.call("currentElectionId", &[]).await?)
    }

    async fn candidate_count(&self) -> Result<u64, LedgerError> {
        abi::decode_uint("getCandidateCount", self.call("getCandidateCount", &[]).await?)
    }

    async fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, LedgerError> {
        abi::decode_candidate(self.call("candidates", &[Token::Uint(id.into())]).await?)
    }

    async fn active_candidate_count(&self) -> Result<u64, LedgerError> {
        let tokens = self.call("getActiveCandidateCount", &[]).await?;
        abi::decode_uint("getActiveCandidateCount", tokens)
    }

    async fn total_elections(&self) -> Result<u64, LedgerError> {
        abi::decode_uint("getTotalElections", self.call("getTotalElections", &[]).await?)
    }

    async fn election_history(
        &self,
        id: ElectionId,
    ) -> Result<Option<ElectionRecord>, LedgerError> {
        let tokens = self
            .call("getElectionHistory", &[Token::Uint(id.into())])
            .await?;
        abi::decode_election_record(tokens)
    }

    async fn has_voted(&self, voter: Address) -> Result<bool, LedgerError> {
        abi::decode_bool("hasVoted", self.call("hasVoted", &[Token::Address(voter)]).await?)
    }

    async fn all_voters(&self) -> Result<Vec<Address>, LedgerError> {
        abi::decode_addresses("getAllVoters", self.call("getAllVoters", &[]).await?)
    }

    async fn vote_cast_events(
        &self,
        voter: Address,
        election_id: ElectionId,
    ) -> Result<Vec<VoteCastEvent>, LedgerError> {
        let event = self.abi.vote_cast()?;
        let filter = json!([{
            "address": self.contract,
            "fromBlock": "0x0",
            "toBlock": "latest",
            "topics": [
                event.signature(),
                Hash::from(voter),
                Hash::from_low_u64_be(election_id),
            ],
        }]);
        let logs: Vec<RpcLog> = serde_json::from_value(self.rpc("eth_getLogs", filter).await?)?;
        logs.into_iter()
            .map(|log| {
                let raw = RawLog {
                    topics: log.topics,
                    data: from_hex(&Value::String(log.data))?,
                };
                abi::decode_vote_cast(event.parse_log(raw)?)
            })
            .collect()
    }

    async fn submit(&self, write: &LedgerWrite) -> Result<TxHash, TxFailure> {
        let from = self
            .account
            .ok_or_else(|| TxFailure::Rejected("no signing account configured".to_string()))?;
        let (name, args) = abi::encode_write(write);
        let data = self
            .abi
            .function(name)
            .and_then(|function| Ok(function.encode_input(&args)?))
            .map_err(|e| TxFailure::Rejected(e.to_string()))?;
        let params = json!([{ "from": from, "to": self.contract, "data": to_hex(&data) }]);
        let result = self
            .rpc("eth_sendTransaction", params)
            .await
            .map_err(|e| TxFailure::Rejected(e.to_string()))?;
        let tx: TxHash =
            serde_json::from_value(result).map_err(|e| TxFailure::Rejected(e.to_string()))?;
        debug!("Submitted {write} as {tx:?}");
        Ok(tx)
    }

    async fn confirm(&self, tx: TxHash) -> Result<TxHash, TxFailure> {
        let deadline = Instant::now() + self.receipts.timeout;
        loop {
            match self.rpc("eth_getTransactionReceipt", json!([tx])).await {
                Ok(Value::Null) => trace!("{tx:?} not mined yet"),
                Ok(value) => match serde_json::from_value::<RpcReceipt>(value) {
                    Ok(receipt) if receipt.status.as_deref() == Some("0x0") => {
                        return Err(TxFailure::Reverted(tx))
                    }
                    Ok(_) => return Ok(tx),
                    Err(e) => warn!("Unreadable receipt for {tx:?}: {e}"),
                },
                Err(e) => warn!("Failed to fetch receipt for {tx:?}: {e}"),
            }
            if Instant::now() + self.receipts.interval > deadline {
                return Err(TxFailure::TimedOut(tx, self.receipts.timeout.as_secs()));
            }
            sleep(self.receipts.interval).await;
        }
    }
}
