use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Address, CandidateId, ElectionId};

/// Public gateway used to resolve `ipfs://` logo references.
const IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

/// The ledger's view of the current election. Read fresh on every poll and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStatus {
    /// Whether the ledger still flags the election as open.
    pub is_active: bool,
    /// When voting opened.
    pub start_time: DateTime<Utc>,
    /// The voting deadline.
    pub end_time: DateTime<Utc>,
    /// Votes cast so far.
    pub total_votes: u64,
}

impl ElectionStatus {
    /// Has the voting deadline passed?
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }

    /// Whole seconds until the deadline, or zero once it has passed.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.end_time - now).num_seconds()).unwrap_or(0)
    }
}

/// An election status together with the id of the election it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub election_id: ElectionId,
    #[serde(flatten)]
    pub status: ElectionStatus,
}

/// A candidate as stored on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub name: String,
    pub party: String,
    pub tagline: String,
    /// Usually an `ipfs://` URI.
    pub logo_ref: String,
    pub vote_count: u64,
    /// Removed candidates stay on the ledger with this cleared.
    pub is_active: bool,
}

impl Candidate {
    /// Drop the empty tuple the ledger hands back for ids it does not know.
    pub fn found(self) -> Option<Self> {
        (self.id != 0 && !self.name.is_empty()).then_some(self)
    }

    /// A URL a browser can fetch the logo from.
    pub fn logo_url(&self) -> Option<String> {
        logo_url(&self.logo_ref)
    }
}

/// Turn a stored logo reference into a fetchable URL.
pub(crate) fn logo_url(logo_ref: &str) -> Option<String> {
    if logo_ref.is_empty() {
        None
    } else if let Some(cid) = logo_ref.strip_prefix("ipfs://") {
        Some(format!("{IPFS_GATEWAY}{cid}"))
    } else {
        Some(logo_ref.to_string())
    }
}

/// The details an administrator supplies for a new candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCandidate {
    pub name: String,
    pub party: String,
    pub tagline: String,
    pub logo_ref: String,
}

/// One candidate's final count within an [`ElectionRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub candidate_id: CandidateId,
    pub candidate_name: String,
    pub party: String,
    pub vote_count: u64,
}

/// A finalized election, as kept in the ledger's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionRecord {
    pub id: ElectionId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_votes: u64,
    pub results: Vec<CandidateResult>,
}

impl ElectionRecord {
    /// Records with id 0 mean "no such election".
    pub fn found(self) -> Option<Self> {
        (self.id != 0).then_some(self)
    }
}

/// A `VoteCast` log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCastEvent {
    pub voter: Address,
    pub election_id: ElectionId,
    pub candidate_id: CandidateId,
}
