use serde::{Deserialize, Serialize};

use super::{Address, CandidateId, ElectionId};

/// The candidate a voter picked, with whatever display details are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenCandidate {
    pub candidate_id: CandidateId,
    pub name: Option<String>,
    pub party: Option<String>,
}

/// What we can say about a voter's ballot in one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VoterChoice {
    /// The voter has voted. The candidate is filled in once the vote-cast
    /// log catches up.
    Voted { candidate: Option<ChosenCandidate> },
    /// The ledger says the voter has not voted.
    NotVoted,
    /// Neither the ledger flag nor the log could settle it.
    Unknown,
}

/// Voter-specific details attached to the read model for the account the
/// service acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterAnnotation {
    pub voter: Address,
    pub election_id: ElectionId,
    /// `None` when the eligibility read failed.
    pub approved: Option<bool>,
    pub choice: VoterChoice,
}

/// On-demand lookup of a single voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterInfo {
    pub address: Address,
    pub approved: bool,
    pub has_voted: bool,
    pub choice: Option<VoterChoice>,
}
