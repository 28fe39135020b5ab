use crate::model::{Candidate, CandidateId, ElectionRecord, LifecycleState, RankedEntry};

struct Row {
    candidate_id: CandidateId,
    name: String,
    party: String,
    logo_url: Option<String>,
    vote_count: u64,
}

/// Rank the candidates of a running election. Removed candidates are left out.
pub fn live(candidates: &[Candidate], state: LifecycleState) -> Vec<RankedEntry> {
    let rows = candidates
        .iter()
        .filter(|candidate| candidate.is_active)
        .map(|candidate| Row {
            candidate_id: candidate.id,
            name: candidate.name.clone(),
            party: candidate.party.clone(),
            logo_url: candidate.logo_url(),
            vote_count: candidate.vote_count,
        })
        .collect();
    rank(rows, state.is_live())
}

/// Rank the final results of a finished election.
pub fn historical(record: &ElectionRecord) -> Vec<RankedEntry> {
    let rows = record
        .results
        .iter()
        .map(|result| Row {
            candidate_id: result.candidate_id,
            name: result.candidate_name.clone(),
            party: result.party.clone(),
            logo_url: None,
            vote_count: result.vote_count,
        })
        .collect();
    rank(rows, false)
}

/// Sort by count, highest first. Equal counts keep the ledger's order and
/// are flagged as tied instead of being broken.
fn rank(mut rows: Vec<Row>, live: bool) -> Vec<RankedEntry> {
    // `sort_by` is stable.
    rows.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));
    let counts: Vec<u64> = rows.iter().map(|row| row.vote_count).collect();
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let tied = (index > 0 && counts[index - 1] == row.vote_count)
                || counts.get(index + 1) == Some(&row.vote_count);
            let position = index + 1;
            RankedEntry {
                position,
                label: ordinal(position),
                candidate_id: row.candidate_id,
                name: row.name,
                party: row.party,
                logo_url: row.logo_url,
                vote_count: row.vote_count,
                tied,
                live,
            }
        })
        .collect()
}

fn ordinal(position: usize) -> String {
    let suffix = match (position % 10, position % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{position}{suffix}")
}
