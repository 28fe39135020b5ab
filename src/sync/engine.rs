use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use rocket::tokio::{
    self,
    sync::{watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use thiserror::Error;

use super::history::HistoryCache;
use super::poller::{PollOutcome, StatusPoller};
use super::reconciler::{Effect, LifecycleReconciler};
use super::tally;
use super::voter_choice::VoterChoiceResolver;
use crate::ledger::{LedgerClient, LedgerError, LedgerWrite, TxFailure};
use crate::model::{
    Address, Candidate, CandidateId, ChosenCandidate, ElectionId, ElectionRecord,
    HistoricalTally, LifecycleState, NewCandidate, ReadModel, StatusSnapshot, TxHash,
    VoterAnnotation, VoterInfo,
};
use crate::scheduled_task::{Liveness, ScheduledTask, Scheduler};

pub const STATUS_TASK: &str = "election-status";
pub const TALLY_TASK: &str = "live-tally";
pub const VOTER_TASK: &str = "voter-list";
pub const CHOICE_TASK: &str = "voter-choice";
pub const HISTORY_TASK: &str = "election-history";

/// How often each resource is polled, and who we act for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub status_interval: Duration,
    pub tally_interval: Duration,
    pub voter_interval: Duration,
    pub history_interval: Duration,
    /// Issue the finalizing write ourselves once an election expires.
    pub auto_finalize: bool,
    /// The voter whose choice is annotated in the read model.
    pub account: Option<Address>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(10),
            tally_interval: Duration::from_secs(5),
            voter_interval: Duration::from_secs(30),
            history_interval: Duration::from_secs(30),
            auto_finalize: false,
            account: None,
        }
    }
}

/// Why an action did not complete.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Refused locally; nothing was sent to the ledger.
    #[error("{0}")]
    Refused(String),
    /// A read needed to decide on the action failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The write reached the ledger but did not go through.
    #[error(transparent)]
    Failed(#[from] TxFailure),
}

/// A pending wake-up at an election's deadline.
type Deadline = ((ElectionId, DateTime<Utc>), ScheduledTask<()>);

struct Inner {
    ledger: Arc<dyn LedgerClient>,
    settings: EngineSettings,
    scheduler: Scheduler,
    status: StatusPoller<StatusSnapshot>,
    tally: StatusPoller<Vec<Candidate>>,
    voters: StatusPoller<Vec<Address>>,
    reconciler: Mutex<LifecycleReconciler>,
    history: AsyncMutex<HistoryCache>,
    choices: AsyncMutex<VoterChoiceResolver>,
    model: watch::Sender<ReadModel>,
    deadline: Mutex<Option<Deadline>>,
    finalizer: Mutex<Option<JoinHandle<()>>>,
    liveness: Liveness,
}

/// The election sync engine.
///
/// Owns one periodic task per ledger resource and folds their results into a
/// single [`ReadModel`]. Cloning is cheap; all clones share the same tasks.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Recompute the fields derived from what the pollers reported.
fn rederive(model: &mut ReadModel, now: DateTime<Utc>) {
    model.seconds_remaining = match (&model.status, model.lifecycle_state) {
        (Some(status), LifecycleState::Active) => status.seconds_remaining(now),
        _ => 0,
    };
    model.ranked_candidates = match model.lifecycle_state {
        LifecycleState::NoElection => model
            .history
            .first()
            .map(tally::historical)
            .unwrap_or_default(),
        state => tally::live(&model.candidates, state),
    };
}

async fn read_status(ledger: Arc<dyn LedgerClient>) -> Result<StatusSnapshot, LedgerError> {
    let election_id = ledger.current_election_id().await?;
    let status = ledger.election_status().await?;
    // Without this an election starting between the two reads would pair
    // the new id with the old status.
    let confirmed = ledger.current_election_id().await?;
    if confirmed != election_id {
        return Err(LedgerError::Malformed(format!(
            "election changed from {election_id} to {confirmed} during status read"
        )));
    }
    Ok(StatusSnapshot {
        election_id,
        status,
    })
}

async fn read_candidates(ledger: Arc<dyn LedgerClient>) -> Result<Vec<Candidate>, LedgerError> {
    let count = ledger.candidate_count().await?;
    let mut candidates = Vec::new();
    for id in 1..=count {
        if let Some(candidate) = ledger.candidate(id).await? {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

/// The election whose ballot we annotate and the names to show for it.
struct ChoiceTarget {
    election_id: ElectionId,
    names: HashMap<CandidateId, (String, String)>,
}

impl ChoiceTarget {
    fn describe(&self, candidate_id: CandidateId) -> ChosenCandidate {
        let known = self.names.get(&candidate_id);
        ChosenCandidate {
            candidate_id,
            name: known.map(|(name, _)| name.clone()),
            party: known.map(|(_, party)| party.clone()),
        }
    }
}

impl Inner {
    fn reconciler(&self) -> MutexGuard<'_, LifecycleReconciler> {
        lock(&self.reconciler)
    }

    fn update(&self, change: impl FnOnce(&mut ReadModel)) {
        if !self.liveness.is_alive() {
            trace!("Engine disposed, dropping read model update");
            return;
        }
        self.model.send_modify(|model| {
            change(model);
            rederive(model, Utc::now());
        });
    }

    fn trigger(&self, tasks: &[&'static str]) {
        for task in tasks {
            self.scheduler.trigger(task);
        }
    }

    fn lifecycle(&self) -> (LifecycleState, Option<ElectionId>) {
        let reconciler = self.reconciler();
        (reconciler.state(), reconciler.election_id())
    }

    /// Copy the reconciler's view and the last good status into the model.
    fn publish_lifecycle(&self) {
        let (state, pending) = {
            let reconciler = self.reconciler();
            (reconciler.state(), reconciler.pending_finalize())
        };
        let status = self.status.last_good();
        self.update(|model| {
            model.lifecycle_state = state;
            model.finalize_pending = pending;
            match status {
                Some(fresh) => {
                    model.election_id = Some(fresh.value.election_id).filter(|&id| id > 0);
                    model.status = Some(fresh.value.status);
                    model.status_refreshed_at = Some(fresh.refreshed_at);
                }
                None => model.election_id = None,
            }
        });
    }

    async fn status_tick(self: &Arc<Self>, liveness: &Liveness) {
        let first = self.status.last_good().is_none();
        let ledger = self.ledger.clone();
        let outcome = self.status.poll(|| read_status(ledger)).await;
        if !liveness.is_alive() {
            return;
        }
        if let PollOutcome::Applied(snapshot) = outcome {
            self.apply_status(snapshot, first).await;
        }
    }

    async fn apply_status(self: &Arc<Self>, snapshot: StatusSnapshot, first: bool) {
        let before = self.lifecycle();
        let outcome = self.reconciler().observe(&snapshot, Utc::now());
        if outcome.discarded {
            return;
        }
        self.arm_deadline(&snapshot);
        for effect in outcome.effects {
            match effect {
                Effect::Finalize(id) => self.on_expired(id),
                Effect::FetchRecord(id) => self.store_record(id).await,
            }
        }
        self.publish_lifecycle();

        let after = self.lifecycle();
        if after.1 != before.1 {
            // Candidate counts read for the previous election are useless now.
            self.tally.invalidate();
        }
        if first || after != before {
            self.trigger(&[TALLY_TASK, CHOICE_TASK, HISTORY_TASK]);
        }
    }

    /// Wake the status poll as soon as the running election's deadline passes.
    fn arm_deadline(self: &Arc<Self>, snapshot: &StatusSnapshot) {
        let status = &snapshot.status;
        let wanted = status
            .is_active
            .then_some((snapshot.election_id, status.end_time));
        let mut deadline = lock(&self.deadline);
        if deadline.as_ref().map(|(key, _)| *key) == wanted {
            return;
        }
        if let Some((_, task)) = deadline.take() {
            task.abort();
        }
        if let Some((id, end_time)) = wanted.filter(|(_, end_time)| *end_time > Utc::now()) {
            debug!("Election {id} deadline armed for {end_time}");
            let inner = Arc::downgrade(self);
            let wake = async move {
                if let Some(inner) = inner.upgrade() {
                    inner.trigger(&[STATUS_TASK]);
                }
            };
            let task = ScheduledTask::new(wake, end_time + chrono::Duration::seconds(1));
            *deadline = Some(((id, end_time), task));
        }
    }

    fn on_expired(self: &Arc<Self>, id: ElectionId) {
        if !self.settings.auto_finalize {
            warn!("Election {id} is past its deadline but still open; waiting for endElection");
            return;
        }
        info!("Election {id} is past its deadline, finalizing");
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = inner.finalize(id).await {
                warn!("Automatic finalization of election {id} failed: {e}");
            }
        });
        if let Some(previous) = lock(&self.finalizer).replace(handle) {
            if !previous.is_finished() {
                debug!("Previous finalizer still running alongside election {id}");
            }
        }
    }

    async fn store_record(&self, id: ElectionId) {
        match self.ledger.election_history(id).await {
            Ok(Some(record)) if record.id == id => {
                let records = {
                    let mut history = self.history.lock().await;
                    history.insert(record);
                    history.records()
                };
                self.reconciler().record_stored(id);
                info!("Election {id} finalized and added to history");
                self.update(|model| model.history = records);
            }
            Ok(_) => debug!("Record for election {id} not available yet"),
            Err(e) => warn!("Failed to fetch record for election {id}: {e}"),
        }
    }

    async fn tally_tick(&self, liveness: &Liveness) {
        let ledger = self.ledger.clone();
        let outcome = self.tally.poll(|| read_candidates(ledger)).await;
        if !liveness.is_alive() {
            return;
        }
        if let PollOutcome::Applied(candidates) = outcome {
            let active: Vec<Candidate> = candidates
                .into_iter()
                .filter(|candidate| candidate.is_active)
                .collect();
            trace!("Tally refreshed with {} active candidates", active.len());
            self.update(|model| model.candidates = active);
        }
    }

    async fn voter_tick(&self, liveness: &Liveness) {
        let ledger = self.ledger.clone();
        let outcome = self
            .voters
            .poll(|| async move { ledger.all_voters().await })
            .await;
        if !liveness.is_alive() {
            return;
        }
        if let PollOutcome::Applied(voters) = outcome {
            self.update(|model| model.voters = voters);
        }

        let admin_known = self.model.borrow().admin.is_some();
        if !admin_known {
            match self.ledger.admin().await {
                Ok(admin) if liveness.is_alive() => self.update(|model| model.admin = Some(admin)),
                Ok(_) => {}
                Err(e) => warn!("Failed to read contract admin: {e}"),
            }
        }
    }

    fn choice_target(&self) -> Option<ChoiceTarget> {
        let election_id = self
            .status
            .last_good()
            .map(|fresh| fresh.value.election_id)
            .filter(|&id| id > 0)?;
        let model = self.model.borrow();
        let mut names: HashMap<_, _> = model
            .candidates
            .iter()
            .map(|c| (c.id, (c.name.clone(), c.party.clone())))
            .collect();
        if let Some(record) = model.history.iter().find(|record| record.id == election_id) {
            for result in &record.results {
                names.insert(
                    result.candidate_id,
                    (result.candidate_name.clone(), result.party.clone()),
                );
            }
        }
        Some(ChoiceTarget { election_id, names })
    }

    async fn choice_tick(&self, liveness: &Liveness) {
        let voter = match self.settings.account {
            Some(voter) => voter,
            None => return,
        };
        let target = match self.choice_target() {
            Some(target) => target,
            None => return,
        };
        let approved = match self.ledger.is_approved_voter(voter).await {
            Ok(approved) => Some(approved),
            Err(e) => {
                warn!("Failed to read eligibility of {voter:?}: {e}");
                None
            }
        };
        // The latest election is the one `hasVoted` describes, running or not.
        let choice = self
            .choices
            .lock()
            .await
            .resolve(&*self.ledger, voter, target.election_id, true, |id| {
                target.describe(id)
            })
            .await;
        if !liveness.is_alive() {
            return;
        }
        self.update(|model| {
            model.voter_annotation = Some(VoterAnnotation {
                voter,
                election_id: target.election_id,
                approved,
                choice,
            })
        });
    }

    async fn history_tick(&self, liveness: &Liveness) {
        // The status poller's copy may predate an election that has just
        // started, so read the bound fresh.
        let finished_through = match read_status(self.ledger.clone()).await {
            Ok(snapshot) if snapshot.status.is_active => snapshot.election_id.saturating_sub(1),
            Ok(snapshot) => snapshot.election_id,
            Err(e) => {
                warn!("Failed to read election status for history refresh: {e}");
                return;
            }
        };
        let records = {
            let mut history = self.history.lock().await;
            match history.refresh(&*self.ledger, finished_through).await {
                Ok(stored) => trace!("History refreshed, {stored} records"),
                Err(e) => warn!("Failed to refresh election history: {e}"),
            }
            history.records()
        };
        if liveness.is_alive() {
            self.update(|model| model.history = records);
        }
    }

    /// Submit a write and wait for it to reach finality.
    async fn write(&self, write: LedgerWrite) -> Result<TxHash, TxFailure> {
        info!("Submitting {write}");
        let result = match self.ledger.submit(&write).await {
            Ok(tx) => self.ledger.confirm(tx).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(tx) => info!("{write} confirmed in {tx:?}"),
            Err(e) => error!("{write} failed: {e}"),
        }
        result
    }

    /// Issue the finalizing write for `id`, at most once.
    async fn finalize(self: &Arc<Self>, id: ElectionId) -> Result<TxHash, ActionError> {
        let claimed = self.reconciler().claim_finalize(id);
        if !claimed {
            return Err(ActionError::Refused(format!(
                "Election {id} is not awaiting finalization"
            )));
        }
        self.publish_lifecycle();

        let result = self.write(LedgerWrite::EndElection).await;
        match &result {
            Ok(_) => self.trigger(&[STATUS_TASK]),
            // Nothing is pending on the ledger, so somebody may try again.
            Err(TxFailure::Rejected(_) | TxFailure::Reverted(_)) => {
                self.reconciler().release_finalize(id, Utc::now());
                self.publish_lifecycle();
            }
            Err(TxFailure::TimedOut(..)) => {}
        }
        Ok(result?)
    }
}

impl Engine {
    pub fn new(ledger: Arc<dyn LedgerClient>, settings: EngineSettings) -> Self {
        let (model, _) = watch::channel(ReadModel::default());
        let inner = Inner {
            ledger,
            settings,
            scheduler: Scheduler::default(),
            status: StatusPoller::new("election status"),
            tally: StatusPoller::new("candidate tally"),
            voters: StatusPoller::new("voter list"),
            reconciler: Mutex::new(LifecycleReconciler::new()),
            history: AsyncMutex::new(HistoryCache::new()),
            choices: AsyncMutex::new(VoterChoiceResolver::new()),
            model,
            deadline: Mutex::new(None),
            finalizer: Mutex::new(None),
            liveness: Liveness::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    fn schedule<F, Fut>(&self, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<Inner>, Liveness) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule(name, period, move |liveness| {
            let run = inner.upgrade().map(|inner| tick(inner, liveness));
            async move {
                if let Some(run) = run {
                    run.await;
                }
            }
        });
    }

    /// Start polling. Every task runs once straight away.
    pub fn init(&self) {
        if !self.inner.liveness.is_alive() {
            warn!("Election sync was disposed and cannot be restarted");
            return;
        }
        let settings = &self.inner.settings;
        info!(
            "Starting election sync (status every {:?}, tally every {:?})",
            settings.status_interval, settings.tally_interval
        );
        self.schedule(STATUS_TASK, settings.status_interval, |inner, liveness| async move {
            inner.status_tick(&liveness).await
        });
        self.schedule(TALLY_TASK, settings.tally_interval, |inner, liveness| async move {
            inner.tally_tick(&liveness).await
        });
        self.schedule(VOTER_TASK, settings.voter_interval, |inner, liveness| async move {
            inner.voter_tick(&liveness).await
        });
        self.schedule(HISTORY_TASK, settings.history_interval, |inner, liveness| async move {
            inner.history_tick(&liveness).await
        });
        if settings.account.is_some() {
            self.schedule(CHOICE_TASK, settings.voter_interval, |inner, liveness| async move {
                inner.choice_tick(&liveness).await
            });
        }
    }

    /// Stop every task. Nothing is published afterwards, even by reads that
    /// were already in flight.
    pub fn dispose(&self) {
        if self.inner.liveness.is_alive() {
            info!("Stopping election sync");
        }
        self.inner.liveness.kill();
        self.inner.scheduler.cancel_all();
        self.inner.status.close();
        self.inner.tally.close();
        self.inner.voters.close();
        if let Some((_, task)) = lock(&self.inner.deadline).take() {
            task.abort();
        }
        if let Some(handle) = lock(&self.inner.finalizer).take() {
            handle.abort();
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadModel> {
        self.inner.model.subscribe()
    }

    pub fn read_model(&self) -> ReadModel {
        self.inner.model.borrow().clone()
    }

    /// Poll everything now instead of waiting for the next tick.
    pub fn refresh(&self) {
        self.inner.trigger(&[
            STATUS_TASK,
            TALLY_TASK,
            VOTER_TASK,
            CHOICE_TASK,
            HISTORY_TASK,
        ]);
    }

    pub fn history(&self) -> Vec<ElectionRecord> {
        self.inner.model.borrow().history.clone()
    }

    /// A finished election together with its final ranking.
    pub fn historical_tally(&self, id: ElectionId) -> Option<HistoricalTally> {
        let model = self.inner.model.borrow();
        let record = model.history.iter().find(|record| record.id == id)?;
        Some(HistoricalTally {
            ranked: tally::historical(record),
            record: record.clone(),
        })
    }

    /// Eligibility and ballot of any voter in the current election.
    pub async fn voter_info(&self, address: Address) -> Result<VoterInfo, LedgerError> {
        let inner = &self.inner;
        let approved = inner.ledger.is_approved_voter(address).await?;
        let has_voted = inner.ledger.has_voted(address).await?;
        let choice = match inner.choice_target() {
            Some(target) => Some(
                inner
                    .choices
                    .lock()
                    .await
                    .resolve(&*inner.ledger, address, target.election_id, true, |id| {
                        target.describe(id)
                    })
                    .await,
            ),
            None => None,
        };
        Ok(VoterInfo {
            address,
            approved,
            has_voted,
            choice,
        })
    }

    pub async fn vote(&self, candidate_id: CandidateId) -> Result<TxHash, ActionError> {
        let (state, on_ballot) = {
            let model = self.inner.model.borrow();
            let on_ballot = model.candidates.iter().any(|c| c.id == candidate_id);
            (self.inner.reconciler().state(), on_ballot)
        };
        if !state.accepts_votes() {
            return Err(ActionError::Refused(format!(
                "Votes are not accepted while the election is {state}"
            )));
        }
        if !on_ballot {
            return Err(ActionError::Refused(format!(
                "Candidate {candidate_id} is not on the ballot"
            )));
        }
        let tx = self.inner.write(LedgerWrite::Vote { candidate_id }).await?;
        self.inner.trigger(&[STATUS_TASK, TALLY_TASK, CHOICE_TASK]);
        Ok(tx)
    }

    pub async fn start_election(&self, duration_minutes: u64) -> Result<TxHash, ActionError> {
        if duration_minutes == 0 {
            return Err(ActionError::Refused(
                "Election duration must be at least one minute".to_string(),
            ));
        }
        let (state, _) = self.inner.lifecycle();
        if state.is_live() {
            return Err(ActionError::Refused(format!(
                "Cannot start an election while the current one is {state}"
            )));
        }
        if self.inner.ledger.active_candidate_count().await? == 0 {
            return Err(ActionError::Refused(
                "Cannot start an election without candidates".to_string(),
            ));
        }
        let tx = self
            .inner
            .write(LedgerWrite::StartElection { duration_minutes })
            .await?;
        self.refresh();
        Ok(tx)
    }

    /// End the running election, whether or not its deadline has passed.
    pub async fn end_election(&self) -> Result<TxHash, ActionError> {
        let (state, election_id) = self.inner.lifecycle();
        match (state, election_id) {
            (LifecycleState::Active | LifecycleState::Expired, Some(id)) => {
                self.inner.finalize(id).await
            }
            (LifecycleState::Finalizing, Some(id)) => Err(ActionError::Refused(format!(
                "Election {id} is already being finalized"
            ))),
            _ => Err(ActionError::Refused("No election is running".to_string())),
        }
    }

    pub async fn approve_voter(&self, voter: Address) -> Result<TxHash, ActionError> {
        let tx = self.inner.write(LedgerWrite::ApproveVoter(voter)).await?;
        self.inner.trigger(&[VOTER_TASK, CHOICE_TASK]);
        Ok(tx)
    }

    pub async fn remove_voter(&self, voter: Address) -> Result<TxHash, ActionError> {
        let tx = self.inner.write(LedgerWrite::RemoveVoter(voter)).await?;
        self.inner.trigger(&[VOTER_TASK, CHOICE_TASK]);
        Ok(tx)
    }

    pub async fn remove_all_voters(&self) -> Result<TxHash, ActionError> {
        let tx = self.inner.write(LedgerWrite::RemoveAllVoters).await?;
        self.inner.trigger(&[VOTER_TASK, CHOICE_TASK]);
        Ok(tx)
    }

    pub async fn add_candidate(&self, candidate: NewCandidate) -> Result<TxHash, ActionError> {
        if candidate.name.trim().is_empty() {
            return Err(ActionError::Refused("Candidate name is required".to_string()));
        }
        let tx = self.inner.write(LedgerWrite::AddCandidate(candidate)).await?;
        self.inner.trigger(&[TALLY_TASK]);
        Ok(tx)
    }

    pub async fn remove_candidate(&self, id: CandidateId) -> Result<TxHash, ActionError> {
        let on_ballot = self.inner.model.borrow().candidates.iter().any(|c| c.id == id);
        if !on_ballot {
            return Err(ActionError::Refused(format!(
                "Candidate {id} is not on the ballot"
            )));
        }
        let tx = self.inner.write(LedgerWrite::RemoveCandidate(id)).await?;
        self.inner.trigger(&[TALLY_TASK]);
        Ok(tx)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fake::FakeLedger;
    use crate::model::VoterChoice;

    #[ledger_test(active)]
    async fn active_election_is_published(ledger: FakeLedger, engine: Engine) {
        let model = engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::Active
                    && model.ranked_candidates.len() == 3
                    && model.history.len() == 1
                    && model.voter_annotation.is_some()
                    && model.admin.is_some()
            })
            .await;
        assert_eq!(model.election_id, Some(2));
        assert!(model.seconds_remaining > 0);
        let ranked: Vec<_> = model
            .ranked_candidates
            .iter()
            .map(|entry| (entry.candidate_id, entry.tied, entry.live))
            .collect();
        assert_eq!(ranked, vec![(1, true, true), (2, true, true), (3, false, true)]);
        // The running election's placeholder record stays out of history.
        assert_eq!(model.history[0].id, 1);
        assert_eq!(model.admin, Some(ledger.admin_address()));
        assert!(model.voters.contains(&ledger.account()));
        let annotation = model.voter_annotation.unwrap();
        assert_eq!(annotation.election_id, 2);
        assert_eq!(annotation.approved, Some(true));
        assert_eq!(annotation.choice, VoterChoice::NotVoted);
    }

    #[ledger_test(active)]
    async fn expiry_waits_for_finalization(ledger: FakeLedger, engine: Engine) {
        engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        ledger.expire();
        let model = engine
            .settled(|model| model.lifecycle_state == LifecycleState::Expired)
            .await;
        assert_eq!(model.finalize_pending, Some(2));
        assert_eq!(model.seconds_remaining, 0);
        assert!(model.ranked_candidates.iter().all(|entry| entry.live));
        assert_eq!(ledger.end_election_writes(), 0);
    }

    #[ledger_test(active)]
    async fn ending_moves_the_result_to_history(ledger: FakeLedger, engine: Engine) {
        engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        engine.end_election().await.unwrap();
        let model = engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::NoElection && model.history.len() == 2
            })
            .await;
        assert_eq!(model.history[0].id, 2);
        assert_eq!(model.history[0].total_votes, 25);
        assert!(model.ranked_candidates.iter().all(|entry| !entry.live));
        assert_eq!(model.ranked_candidates[0].vote_count, 10);
        assert!(engine.historical_tally(2).is_some());

        assert!(matches!(
            engine.end_election().await,
            Err(ActionError::Refused(_))
        ));
        assert_eq!(ledger.end_election_writes(), 1);
    }

    #[ledger_test(active)]
    async fn votes_are_confirmed_and_resolved(ledger: FakeLedger, engine: Engine) {
        engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::Active && model.candidates.len() == 3
            })
            .await;
        engine.vote(3).await.unwrap();
        let model = engine
            .settled(|model| {
                matches!(
                    model.voter_annotation.as_ref().map(|a| &a.choice),
                    Some(VoterChoice::Voted { candidate: Some(_) })
                )
            })
            .await;
        match model.voter_annotation.unwrap().choice {
            VoterChoice::Voted {
                candidate: Some(candidate),
            } => {
                assert_eq!(candidate.candidate_id, 3);
                assert_eq!(candidate.name.as_deref(), Some("Candidate 3"));
            }
            other => panic!("unexpected choice {other:?}"),
        }

        // The ledger refuses a second vote; the failure is reported, not retried.
        assert!(matches!(
            engine.vote(3).await,
            Err(ActionError::Failed(TxFailure::Reverted(_)))
        ));
        assert_eq!(
            ledger
                .writes()
                .iter()
                .filter(|write| matches!(write, LedgerWrite::Vote { .. }))
                .count(),
            2
        );
    }

    #[ledger_test]
    async fn votes_need_a_running_election(ledger: FakeLedger, engine: Engine) {
        engine.settled(|model| model.candidates.len() == 2).await;
        assert!(matches!(engine.vote(1).await, Err(ActionError::Refused(_))));
        assert!(ledger.writes().is_empty());
    }

    #[ledger_test]
    async fn starting_an_election(ledger: FakeLedger, engine: Engine) {
        engine.settled(|model| model.status.is_some()).await;
        assert!(matches!(
            engine.start_election(0).await,
            Err(ActionError::Refused(_))
        ));
        assert!(ledger.writes().is_empty());

        engine.start_election(30).await.unwrap();
        let model = engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::Active && model.election_id == Some(1)
            })
            .await;
        assert!(model.seconds_remaining > 29 * 60);
        assert!(matches!(
            engine.start_election(30).await,
            Err(ActionError::Refused(_))
        ));
    }

    #[ledger_test(active)]
    async fn rejected_end_can_be_retried(ledger: FakeLedger, engine: Engine) {
        engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        ledger.reject_writes(true);
        assert!(matches!(
            engine.end_election().await,
            Err(ActionError::Failed(TxFailure::Rejected(_)))
        ));
        assert_eq!(engine.read_model().lifecycle_state, LifecycleState::Active);

        ledger.reject_writes(false);
        engine.end_election().await.unwrap();
        engine
            .settled(|model| model.lifecycle_state == LifecycleState::NoElection)
            .await;
    }

    #[ledger_test]
    async fn election_started_elsewhere_stays_out_of_history(ledger: FakeLedger, engine: Engine) {
        engine.settled(|model| model.status.is_some()).await;
        // Another client starts an election before our status poll sees it.
        ledger
            .submit(&LedgerWrite::StartElection { duration_minutes: 30 })
            .await
            .unwrap();
        let mut receiver = engine.subscribe();
        let _ = receiver.borrow_and_update();
        engine.inner.trigger(&[HISTORY_TASK]);
        let _ = tokio::time::timeout(Duration::from_secs(1), receiver.changed()).await;
        engine.inner.trigger(&[STATUS_TASK]);

        let model = engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        assert!(model.history.iter().all(|record| record.id != 1));
    }

    #[ledger_test]
    async fn running_election_never_reaches_history(ledger: FakeLedger, engine: Engine) {
        let not_in_history = |model: &ReadModel| model.history.iter().all(|record| record.id != 1);
        engine.settled(|model| model.status.is_some()).await;
        engine.start_election(30).await.unwrap();
        let model = engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        assert!(not_in_history(&model));

        ledger.expire();
        let model = engine
            .settled(|model| model.lifecycle_state == LifecycleState::Expired)
            .await;
        assert!(not_in_history(&model));

        ledger.hold_writes(true);
        assert!(matches!(
            engine.end_election().await,
            Err(ActionError::Failed(TxFailure::TimedOut(..)))
        ));
        for _ in 0..3 {
            engine.refresh();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let model = engine.read_model();
        assert_eq!(model.lifecycle_state, LifecycleState::Finalizing);
        assert!(not_in_history(&model));

        ledger.mine_pending();
        let model = engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::NoElection && model.history.len() == 1
            })
            .await;
        assert_eq!(model.history[0].id, 1);
        assert_eq!(model.history[0].results.len(), 2);
    }

    #[ledger_test(active)]
    async fn timed_out_end_is_not_resubmitted(ledger: FakeLedger, engine: Engine) {
        engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        ledger.hold_writes(true);
        assert!(matches!(
            engine.end_election().await,
            Err(ActionError::Failed(TxFailure::TimedOut(..)))
        ));
        // The write may still be mined, so the claim stands.
        assert!(matches!(
            engine.end_election().await,
            Err(ActionError::Refused(_))
        ));
        engine.refresh();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.read_model().lifecycle_state, LifecycleState::Finalizing);
        assert_eq!(ledger.end_election_writes(), 1);

        ledger.mine_pending();
        engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::NoElection && model.history.len() == 2
            })
            .await;
        assert_eq!(ledger.end_election_writes(), 1);
    }

    #[ledger_test(active)]
    async fn deadline_wakes_the_status_poll(ledger: FakeLedger) {
        ledger.end_in(chrono::Duration::milliseconds(500));
        let engine = Engine::new(Arc::new(ledger.clone()), EngineSettings::for_tests());
        engine.init();
        // No refresh: the hour-long poll intervals leave only the deadline.
        let mut receiver = engine.subscribe();
        let expired = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if receiver.borrow_and_update().lifecycle_state == LifecycleState::Expired {
                    return;
                }
                if receiver.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        let model = engine.read_model();
        engine.dispose();
        assert!(expired.is_ok(), "never expired: {model:#?}");
        assert_eq!(model.finalize_pending, Some(2));
    }

    #[ledger_test(active)]
    async fn read_failures_keep_last_good_state(ledger: FakeLedger, engine: Engine) {
        let before = engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::Active && model.history.len() == 1
            })
            .await;
        ledger.fail_next_reads(usize::MAX);
        engine.refresh();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after = engine.read_model();
        assert_eq!(after.lifecycle_state, LifecycleState::Active);
        assert_eq!(after.status, before.status);
        assert_eq!(after.ranked_candidates, before.ranked_candidates);
        assert_eq!(after.history, before.history);
    }

    #[ledger_test(active)]
    async fn nothing_is_published_after_dispose(ledger: FakeLedger, engine: Engine) {
        engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        engine.dispose();
        ledger.expire();
        engine.refresh();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.read_model().lifecycle_state, LifecycleState::Active);
    }

    #[ledger_test(active)]
    async fn auto_finalize_ends_expired_elections_once(ledger: FakeLedger) {
        ledger.expire();
        let settings = EngineSettings {
            auto_finalize: true,
            ..EngineSettings::for_tests()
        };
        let engine = Engine::new(Arc::new(ledger.clone()), settings);
        engine.init();
        let model = engine
            .settled(|model| {
                model.lifecycle_state == LifecycleState::NoElection && model.history.len() == 2
            })
            .await;
        assert_eq!(model.finalize_pending, None);
        for _ in 0..3 {
            engine.refresh();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!engine.finalizer_running());
        assert_eq!(ledger.end_election_writes(), 1);
        engine.dispose();
    }

    #[ledger_test(active)]
    async fn voter_info_uses_the_ledger_flag(ledger: FakeLedger, engine: Engine) {
        engine
            .settled(|model| model.lifecycle_state == LifecycleState::Active)
            .await;
        let stranger = Address::from_low_u64_be(0x5EED);
        ledger.cast_vote(stranger, 1);
        ledger.set_log_lag(1);
        let info = engine.voter_info(stranger).await.unwrap();
        assert!(!info.approved);
        assert!(info.has_voted);
        // Whether or not the log has caught up, the flag rules out "not voted".
        assert!(matches!(info.choice, Some(VoterChoice::Voted { .. })));
    }

    #[ledger_test]
    async fn admin_writes_refresh_the_model(ledger: FakeLedger, engine: Engine) {
        engine.settled(|model| model.voters.len() == 1).await;
        let voter = Address::from_low_u64_be(0xB0B);
        engine.approve_voter(voter).await.unwrap();
        engine.settled(|model| model.voters.contains(&voter)).await;
        engine.remove_voter(voter).await.unwrap();
        engine.settled(|model| !model.voters.contains(&voter)).await;
        engine.remove_all_voters().await.unwrap();
        engine.settled(|model| model.voters.is_empty()).await;

        assert!(matches!(
            engine
                .add_candidate(NewCandidate {
                    name: "  ".to_string(),
                    party: String::new(),
                    tagline: String::new(),
                    logo_ref: String::new(),
                })
                .await,
            Err(ActionError::Refused(_))
        ));
        engine
            .add_candidate(NewCandidate {
                name: "Ada".to_string(),
                party: "Engines".to_string(),
                tagline: "Notes".to_string(),
                logo_ref: "ipfs://ada".to_string(),
            })
            .await
            .unwrap();
        engine.settled(|model| model.candidates.len() == 3).await;
        engine.remove_candidate(1).await.unwrap();
        let model = engine.settled(|model| model.candidates.len() == 2).await;
        assert!(model.candidates.iter().all(|candidate| candidate.id != 1));
        assert!(matches!(
            engine.remove_candidate(1).await,
            Err(ActionError::Refused(_))
        ));
        assert_eq!(ledger.writes().len(), 5);
    }
}
