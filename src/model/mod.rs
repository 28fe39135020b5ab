mod api;
mod election;
mod lifecycle;
mod read_model;
mod tally;
mod voter;

pub use api::{HistoricalTally, StartElectionRequest, TxReceipt, VoteRequest, VoterRequest};
pub use election::{
    Candidate, CandidateResult, ElectionRecord, ElectionStatus, NewCandidate, StatusSnapshot,
    VoteCastEvent,
};
pub use lifecycle::LifecycleState;
pub use read_model::ReadModel;
pub use tally::RankedEntry;
pub use voter::{ChosenCandidate, VoterAnnotation, VoterChoice, VoterInfo};

/// Ledger account addresses.
pub type Address = ethabi::Address;
/// Transaction hashes returned by ledger writes.
pub type TxHash = ethabi::Hash;
/// Election ids are assigned sequentially by the ledger, starting at 1.
pub type ElectionId = u64;
/// Candidate ids are assigned sequentially by the ledger, starting at 1.
pub type CandidateId = u64;
