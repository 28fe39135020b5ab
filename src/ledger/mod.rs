//! The gateway to the election contract.
//!
//! Everything read from the ledger is decoded into the typed DTOs of
//! [`crate::model`] before it leaves this module; nothing downstream ever
//! sees a positional tuple.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::model::{
    Address, Candidate, CandidateId, ElectionId, ElectionRecord, ElectionStatus, NewCandidate,
    TxHash, VoteCastEvent,
};

pub mod abi;
#[cfg(test)]
pub mod fake;
mod rpc;

pub use rpc::{EthRpcLedger, ReceiptPolling};

/// A failed read. These are always treated as transient.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error(transparent)]
    Abi(#[from] ethabi::Error),
    #[error(transparent)]
    Json(#[from] rocket::serde::json::serde_json::Error),
    #[error("Malformed ledger response: {0}")]
    Malformed(String),
}

/// Terminal outcome of a write that did not go through. Writes are never
/// retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxFailure {
    /// The write never reached the ledger, e.g. the wallet refused to sign.
    #[error("Transaction rejected: {0}")]
    Rejected(String),
    #[error("Transaction {0:?} reverted")]
    Reverted(TxHash),
    #[error("Transaction {0:?} not confirmed within {1} seconds")]
    TimedOut(TxHash, u64),
}

/// Every state-changing call the contract offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerWrite {
    StartElection { duration_minutes: u64 },
    EndElection,
    Vote { candidate_id: CandidateId },
    ApproveVoter(Address),
    RemoveVoter(Address),
    RemoveAllVoters,
    AddCandidate(NewCandidate),
    RemoveCandidate(CandidateId),
}

impl Display for LedgerWrite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartElection { duration_minutes } => {
                write!(f, "startElection({duration_minutes})")
            }
            Self::EndElection => write!(f, "endElection()"),
            Self::Vote { candidate_id } => write!(f, "vote({candidate_id})"),
            Self::ApproveVoter(voter) => write!(f, "approveVoter({voter:?})"),
            Self::RemoveVoter(voter) => write!(f, "removeVoter({voter:?})"),
            Self::RemoveAllVoters => write!(f, "removeAllVoters()"),
            Self::AddCandidate(candidate) => write!(f, "addCandidate({:?})", candidate.name),
            Self::RemoveCandidate(id) => write!(f, "removeCandidate({id})"),
        }
    }
}

/// Typed access to the election contract.
///
/// Reads have no side effects. Writes are split into [`submit`](Self::submit),
/// which hands the transaction to the ledger, and [`confirm`](Self::confirm),
/// which waits for it to reach finality.
#[rocket::async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    async fn admin(&self) -> Result<Address, LedgerError>;

    async fn is_approved_voter(&self, voter: Address) -> Result<bool, LedgerError>;

    async fn election_status(&self) -> Result<ElectionStatus, LedgerError>;

    /// The id of the election `election_status` describes (0 before the first).
    async fn current_election_id(&self) -> Result<ElectionId, LedgerError>;

    async fn candidate_count(&self) -> Result<u64, LedgerError>;

    /// `None` for ids the ledger does not know.
    async fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, LedgerError>;

    async fn active_candidate_count(&self) -> Result<u64, LedgerError>;

    async fn total_elections(&self) -> Result<u64, LedgerError>;

    /// `None` when the ledger answers with its "not found" record.
    async fn election_history(&self, id: ElectionId)
        -> Result<Option<ElectionRecord>, LedgerError>;

    /// Whether `voter` has voted in the current election.
    async fn has_voted(&self, voter: Address) -> Result<bool, LedgerError>;

    async fn all_voters(&self) -> Result<Vec<Address>, LedgerError>;

    /// `VoteCast` entries for this voter and election. The log can lag
    /// behind the write that produced it, so an empty answer proves nothing.
    async fn vote_cast_events(
        &self,
        voter: Address,
        election_id: ElectionId,
    ) -> Result<Vec<VoteCastEvent>, LedgerError>;

    async fn submit(&self, write: &LedgerWrite) -> Result<TxHash, TxFailure>;

    async fn confirm(&self, tx: TxHash) -> Result<TxHash, TxFailure>;
}
