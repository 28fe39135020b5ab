use std::collections::HashMap;

use log::{debug, warn};

use crate::ledger::LedgerClient;
use crate::model::{Address, CandidateId, ChosenCandidate, ElectionId, VoterChoice};

/// Works out which candidate a voter picked.
///
/// `hasVoted` is the only authority on *whether* somebody voted. The vote
/// log is consulted for *which* candidate, and since it can lag behind the
/// vote itself, a missing entry never counts as evidence of anything.
#[derive(Debug, Default)]
pub struct VoterChoiceResolver {
    /// Choices already seen in the log. Log entries are never retracted.
    confirmed: HashMap<(Address, ElectionId), CandidateId>,
}

impl VoterChoiceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A choice already found in the log, if any.
    pub fn cached(&self, voter: Address, election_id: ElectionId) -> Option<CandidateId> {
        self.confirmed.get(&(voter, election_id)).copied()
    }

    /// `is_current` says whether `election_id` is the election `hasVoted`
    /// refers to; for any other election the flag is meaningless.
    pub async fn resolve<F>(
        &mut self,
        ledger: &dyn LedgerClient,
        voter: Address,
        election_id: ElectionId,
        is_current: bool,
        describe: F,
    ) -> VoterChoice
    where
        F: Fn(CandidateId) -> ChosenCandidate,
    {
        if let Some(candidate_id) = self.cached(voter, election_id) {
            return VoterChoice::Voted {
                candidate: Some(describe(candidate_id)),
            };
        }

        match ledger.vote_cast_events(voter, election_id).await {
            Ok(events) => {
                let found = events
                    .iter()
                    .find(|event| event.voter == voter && event.election_id == election_id);
                if let Some(event) = found {
                    self.confirmed
                        .insert((voter, election_id), event.candidate_id);
                    return VoterChoice::Voted {
                        candidate: Some(describe(event.candidate_id)),
                    };
                }
                debug!("No vote log yet for {voter:?} in election {election_id}");
            }
            Err(e) => warn!("Failed to read vote log for {voter:?}: {e}"),
        }

        if !is_current {
            return VoterChoice::Unknown;
        }
        match ledger.has_voted(voter).await {
            Ok(true) => VoterChoice::Voted { candidate: None },
            Ok(false) => VoterChoice::NotVoted,
            Err(e) => {
                warn!("Failed to read hasVoted for {voter:?}: {e}");
                VoterChoice::Unknown
            }
        }
    }
}
