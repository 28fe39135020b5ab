use serde::{Deserialize, Serialize};

use super::{CandidateId, ElectionRecord, RankedEntry, TxHash};

/// Body of `POST /vote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: CandidateId,
}

/// Body of `POST /admin/election/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartElectionRequest {
    pub duration_minutes: u64,
}

/// Body of `POST /admin/voters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRequest {
    pub address: String,
}

/// Returned once a write has been confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
}

/// A finalized election together with its ranked results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalTally {
    #[serde(flatten)]
    pub record: ElectionRecord,
    pub ranked: Vec<RankedEntry>,
}
