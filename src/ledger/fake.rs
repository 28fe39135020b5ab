//! An in-memory ledger for tests, following the contract's rules closely
//! enough to drive the engine end to end.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, TimeZone, Utc};

use super::{LedgerClient, LedgerError, LedgerWrite, TxFailure};
use crate::model::{
    Address, Candidate, CandidateId, CandidateResult, ElectionId, ElectionRecord, ElectionStatus,
    TxHash, VoteCastEvent,
};

#[derive(Debug)]
struct FakeState {
    admin: Address,
    account: Address,
    status: ElectionStatus,
    election_id: ElectionId,
    total_elections: u64,
    candidates: Vec<Candidate>,
    records: BTreeMap<ElectionId, ElectionRecord>,
    voters: Vec<Address>,
    voted: HashSet<Address>,
    events: Vec<VoteCastEvent>,
    /// Events are only visible after this many more log queries.
    log_lag: usize,
    failing_reads: usize,
    revert_writes: bool,
    reject_writes: bool,
    hold_writes: bool,
    pending: Vec<(TxHash, LedgerWrite)>,
    writes: Vec<LedgerWrite>,
    next_tx: u64,
}

#[derive(Debug, Clone)]
pub struct FakeLedger {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLedger {
    /// No election has ever run; two candidates are registered.
    pub fn example() -> Self {
        let admin = Address::from_low_u64_be(0xAD);
        let account = Address::from_low_u64_be(0xA1);
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let state = FakeState {
            admin,
            account,
            status: ElectionStatus {
                is_active: false,
                start_time: epoch,
                end_time: epoch,
                total_votes: 0,
            },
            election_id: 0,
            total_elections: 0,
            candidates: vec![Candidate::example(1, 0), Candidate::example(2, 0)],
            records: BTreeMap::new(),
            voters: vec![account],
            voted: HashSet::new(),
            events: Vec::new(),
            log_lag: 0,
            failing_reads: 0,
            revert_writes: false,
            reject_writes: false,
            hold_writes: false,
            pending: Vec::new(),
            writes: Vec::new(),
            next_tx: 1,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Election 2 is running with counts 10, 10 and 5; election 1 is in history.
    pub fn active_example() -> Self {
        let ledger = Self::example();
        {
            let mut state = ledger.state();
            let now = Utc::now();
            state.candidates = vec![
                Candidate::example(1, 10),
                Candidate::example(2, 10),
                Candidate::example(3, 5),
            ];
            state.status = ElectionStatus {
                is_active: true,
                start_time: now - Duration::minutes(5),
                end_time: now + Duration::hours(1),
                total_votes: 25,
            };
            state.election_id = 2;
            state.records.insert(1, ElectionRecord::example(1));
            // The contract pre-allocates a record for the running election.
            let mut provisional = ElectionRecord::example(2);
            provisional.results.clear();
            provisional.total_votes = 0;
            state.records.insert(2, provisional);
            state.total_elections = 2;
        }
        ledger
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> Result<MutexGuard<'_, FakeState>, LedgerError> {
        let mut state = self.state();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(LedgerError::Rpc {
                code: -32000,
                message: "node unavailable".to_string(),
            });
        }
        Ok(state)
    }

    /// The account the service signs with.
    pub fn account(&self) -> Address {
        self.state().account
    }

    pub fn admin_address(&self) -> Address {
        self.state().admin
    }

    /// Move the deadline of the running election into the past.
    pub fn expire(&self) {
        self.state().status.end_time = Utc::now() - Duration::seconds(1);
    }

    /// Put the running election's deadline `after` from now.
    pub fn end_in(&self, after: Duration) {
        self.state().status.end_time = Utc::now() + after;
    }

    pub fn insert_record(&self, record: ElectionRecord) {
        self.state().records.insert(record.id, record);
    }

    pub fn set_total_elections(&self, total: u64) {
        self.state().total_elections = total;
    }

    pub fn fail_next_reads(&self, count: usize) {
        self.state().failing_reads = count;
    }

    pub fn set_log_lag(&self, queries: usize) {
        self.state().log_lag = queries;
    }

    pub fn revert_writes(&self, revert: bool) {
        self.state().revert_writes = revert;
    }

    pub fn reject_writes(&self, reject: bool) {
        self.state().reject_writes = reject;
    }

    /// Accept writes without mining them. Confirming one times out until
    /// [`mine_pending`](Self::mine_pending) is called.
    pub fn hold_writes(&self, hold: bool) {
        self.state().hold_writes = hold;
    }

    /// Apply every held write, in submission order.
    pub fn mine_pending(&self) {
        let mut state = self.state();
        let pending = std::mem::take(&mut state.pending);
        for (_, write) in pending {
            let _ = Self::apply(&mut state, &write);
        }
    }

    /// Record a vote as if it had been cast by `voter`.
    pub fn cast_vote(&self, voter: Address, candidate_id: CandidateId) {
        let mut state = self.state();
        Self::apply_vote(&mut state, voter, candidate_id);
    }

    /// Every write that reached the ledger, in order.
    pub fn writes(&self) -> Vec<LedgerWrite> {
        self.state().writes.clone()
    }

    pub fn end_election_writes(&self) -> usize {
        self.writes()
            .iter()
            .filter(|write| **write == LedgerWrite::EndElection)
            .count()
    }

    fn apply_vote(state: &mut FakeState, voter: Address, candidate_id: CandidateId) {
        if let Some(candidate) = state.candidates.iter_mut().find(|c| c.id == candidate_id) {
            candidate.vote_count += 1;
        }
        state.status.total_votes += 1;
        state.voted.insert(voter);
        let election_id = state.election_id;
        state.events.push(VoteCastEvent {
            voter,
            election_id,
            candidate_id,
        });
    }

    /// Apply a write under the contract's rules, or explain why it reverts.
    fn apply(state: &mut FakeState, write: &LedgerWrite) -> Result<(), &'static str> {
        let now = Utc::now();
        match write {
            LedgerWrite::StartElection { duration_minutes } => {
                if state.status.is_active {
                    return Err("election already active");
                }
                if *duration_minutes == 0 {
                    return Err("duration must be positive");
                }
                state.election_id += 1;
                state.total_elections = state.election_id;
                state.status = ElectionStatus {
                    is_active: true,
                    start_time: now,
                    end_time: now + Duration::minutes(*duration_minutes as i64),
                    total_votes: 0,
                };
                for candidate in &mut state.candidates {
                    candidate.vote_count = 0;
                }
                state.voted.clear();
                // The contract allocates the history slot up front and only
                // fills in the results when the election ends.
                let placeholder = ElectionRecord {
                    id: state.election_id,
                    start_time: state.status.start_time,
                    end_time: state.status.end_time,
                    total_votes: 0,
                    results: Vec::new(),
                };
                state.records.insert(placeholder.id, placeholder);
            }
            LedgerWrite::EndElection => {
                if !state.status.is_active {
                    return Err("no active election");
                }
                state.status.is_active = false;
                let results = state
                    .candidates
                    .iter()
                    .filter(|c| c.is_active)
                    .map(|c| CandidateResult {
                        candidate_id: c.id,
                        candidate_name: c.name.clone(),
                        party: c.party.clone(),
                        vote_count: c.vote_count,
                    })
                    .collect();
                let record = ElectionRecord {
                    id: state.election_id,
                    start_time: state.status.start_time,
                    end_time: state.status.end_time.min(now),
                    total_votes: state.status.total_votes,
                    results,
                };
                state.records.insert(record.id, record);
            }
            LedgerWrite::Vote { candidate_id } => {
                let voter = state.account;
                if !state.status.is_active || state.status.end_time < now {
                    return Err("election not active");
                }
                if !state.voters.contains(&voter) {
                    return Err("not an approved voter");
                }
                if state.voted.contains(&voter) {
                    return Err("already voted");
                }
                if !state
                    .candidates
                    .iter()
                    .any(|c| c.id == *candidate_id && c.is_active)
                {
                    return Err("no such candidate");
                }
                Self::apply_vote(state, voter, *candidate_id);
            }
            LedgerWrite::ApproveVoter(voter) => {
                if !state.voters.contains(voter) {
                    state.voters.push(*voter);
                }
            }
            LedgerWrite::RemoveVoter(voter) => state.voters.retain(|v| v != voter),
            LedgerWrite::RemoveAllVoters => state.voters.clear(),
            LedgerWrite::AddCandidate(candidate) => {
                let id = state.candidates.len() as u64 + 1;
                state.candidates.push(Candidate {
                    id,
                    name: candidate.name.clone(),
                    party: candidate.party.clone(),
                    tagline: candidate.tagline.clone(),
                    logo_ref: candidate.logo_ref.clone(),
                    vote_count: 0,
                    is_active: true,
                });
            }
            LedgerWrite::RemoveCandidate(id) => {
                let candidate = state
                    .candidates
                    .iter_mut()
                    .find(|c| c.id == *id && c.is_active)
                    .ok_or("no such candidate")?;
                candidate.is_active = false;
            }
        }
        Ok(())
    }
}

#[rocket::async_trait]
impl LedgerClient for FakeLedger {
    async fn admin(&self) -> Result<Address, LedgerError> {
        Ok(self.read()?.admin)
    }

    async fn is_approved_voter(&self, voter: Address) -> Result<bool, LedgerError> {
        Ok(self.read()?.voters.contains(&voter))
    }

    async fn election_status(&self) -> Result<ElectionStatus, LedgerError> {
        Ok(self.read()?.status.clone())
    }

    async fn current_election_id(&self) -> Result<ElectionId, LedgerError> {
        Ok(self.read()?.election_id)
    }

    async fn candidate_count(&self) -> Result<u64, LedgerError> {
        Ok(self.read()?.candidates.len() as u64)
    }

    async fn candidate(&self, id: CandidateId) -> Result<Option<Candidate>, LedgerError> {
        Ok(self.read()?.candidates.iter().find(|c| c.id == id).cloned())
    }

    async fn active_candidate_count(&self) -> Result<u64, LedgerError> {
        Ok(self.read()?.candidates.iter().filter(|c| c.is_active).count() as u64)
    }

    async fn total_elections(&self) -> Result<u64, LedgerError> {
        Ok(self.read()?.total_elections)
    }

    async fn election_history(
        &self,
        id: ElectionId,
    ) -> Result<Option<ElectionRecord>, LedgerError> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    async fn has_voted(&self, voter: Address) -> Result<bool, LedgerError> {
        Ok(self.read()?.voted.contains(&voter))
    }

    async fn all_voters(&self) -> Result<Vec<Address>, LedgerError> {
        Ok(self.read()?.voters.clone())
    }

    async fn vote_cast_events(
        &self,
        voter: Address,
        election_id: ElectionId,
    ) -> Result<Vec<VoteCastEvent>, LedgerError> {
        let mut state = self.read()?;
        if state.log_lag > 0 {
            state.log_lag -= 1;
            return Ok(Vec::new());
        }
        Ok(state
            .events
            .iter()
            .filter(|e| e.voter == voter && e.election_id == election_id)
            .copied()
            .collect())
    }

    async fn submit(&self, write: &LedgerWrite) -> Result<TxHash, TxFailure> {
        let mut state = self.state();
        if state.reject_writes {
            return Err(TxFailure::Rejected("user denied transaction".to_string()));
        }
        let tx = TxHash::from_low_u64_be(state.next_tx);
        state.next_tx += 1;
        state.writes.push(write.clone());
        if state.revert_writes {
            return Err(TxFailure::Reverted(tx));
        }
        if state.hold_writes {
            state.pending.push((tx, write.clone()));
            return Ok(tx);
        }
        match Self::apply(&mut state, write) {
            Ok(()) => Ok(tx),
            Err(_) => Err(TxFailure::Reverted(tx)),
        }
    }

    async fn confirm(&self, tx: TxHash) -> Result<TxHash, TxFailure> {
        if self.state().pending.iter().any(|(held, _)| *held == tx) {
            return Err(TxFailure::TimedOut(tx, 300));
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rocket::async_test]
    async fn starting_an_election_resets_counts() {
        let ledger = FakeLedger::active_example();
        ledger.submit(&LedgerWrite::EndElection).await.unwrap();
        assert_eq!(ledger.election_history(2).await.unwrap().unwrap().total_votes, 25);

        ledger
            .submit(&LedgerWrite::StartElection { duration_minutes: 10 })
            .await
            .unwrap();
        assert_eq!(ledger.current_election_id().await.unwrap(), 3);
        assert_eq!(ledger.total_elections().await.unwrap(), 3);
        assert_eq!(ledger.candidate(1).await.unwrap().unwrap().vote_count, 0);
        assert!(ledger.election_status().await.unwrap().is_active);
        let placeholder = ledger.election_history(3).await.unwrap().unwrap();
        assert_eq!(placeholder.total_votes, 0);
        assert!(placeholder.results.is_empty());
    }

    #[rocket::async_test]
    async fn double_votes_revert() {
        let ledger = FakeLedger::active_example();
        let vote = LedgerWrite::Vote { candidate_id: 3 };
        ledger.submit(&vote).await.unwrap();
        assert!(matches!(ledger.submit(&vote).await, Err(TxFailure::Reverted(_))));
        assert!(ledger.has_voted(ledger.account()).await.unwrap());
        let events = ledger.vote_cast_events(ledger.account(), 2).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].candidate_id, 3);
    }

    #[rocket::async_test]
    async fn held_writes_time_out_until_mined() {
        let ledger = FakeLedger::active_example();
        ledger.hold_writes(true);
        let tx = ledger.submit(&LedgerWrite::EndElection).await.unwrap();
        assert!(matches!(ledger.confirm(tx).await, Err(TxFailure::TimedOut(..))));
        assert!(ledger.election_status().await.unwrap().is_active);

        ledger.mine_pending();
        assert_eq!(ledger.confirm(tx).await, Ok(tx));
        assert!(!ledger.election_status().await.unwrap().is_active);
    }

    #[rocket::async_test]
    async fn failing_reads_recover() {
        let ledger = FakeLedger::example();
        ledger.fail_next_reads(1);
        assert!(ledger.total_elections().await.is_err());
        assert_eq!(ledger.total_elections().await.unwrap(), 0);
    }
}
