use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    Address, Candidate, ElectionId, ElectionRecord, ElectionStatus, LifecycleState, RankedEntry,
    VoterAnnotation,
};

/// Everything presentation needs, rebuilt as each poller reports in.
/// Components never share state directly; they only write their own fields
/// of this snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadModel {
    pub lifecycle_state: LifecycleState,
    /// The election `status` describes.
    pub election_id: Option<ElectionId>,
    /// Last known good status.
    pub status: Option<ElectionStatus>,
    pub status_refreshed_at: Option<DateTime<Utc>>,
    /// Countdown to the deadline as of the last status read.
    pub seconds_remaining: u64,
    /// Live tally while an election runs, otherwise the latest final result.
    pub ranked_candidates: Vec<RankedEntry>,
    /// Active candidates, i.e. the current ballot options.
    pub candidates: Vec<Candidate>,
    pub voter_annotation: Option<VoterAnnotation>,
    /// Finalized elections, most recent first.
    pub history: Vec<ElectionRecord>,
    pub voters: Vec<Address>,
    pub admin: Option<Address>,
    /// An expired election waiting for somebody to issue the finalizing write.
    pub finalize_pending: Option<ElectionId>,
}
