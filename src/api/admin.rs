use rocket::{serde::json::Json, Route, State};

use super::common::{parse_address, receipt};
use crate::error::Result;
use crate::model::{CandidateId, NewCandidate, StartElectionRequest, TxReceipt, VoterRequest};
use crate::sync::Engine;

pub fn routes() -> Vec<Route> {
    routes![
        start_election,
        end_election,
        approve_voter,
        remove_voter,
        remove_all_voters,
        add_candidate,
        remove_candidate,
    ]
}

#[post("/admin/election/start", data = "<request>", format = "json")]
async fn start_election(
    request: Json<StartElectionRequest>,
    engine: &State<Engine>,
) -> Result<Json<TxReceipt>> {
    let tx_hash = engine.start_election(request.duration_minutes).await?;
    Ok(Json(receipt(tx_hash)))
}

/// Finalize the running election, before or after its deadline.
#[post("/admin/election/end")]
async fn end_election(engine: &State<Engine>) -> Result<Json<TxReceipt>> {
    let tx_hash = engine.end_election().await?;
    Ok(Json(receipt(tx_hash)))
}

#[post("/admin/voters", data = "<request>", format = "json")]
async fn approve_voter(
    request: Json<VoterRequest>,
    engine: &State<Engine>,
) -> Result<Json<TxReceipt>> {
    let voter = parse_address(&request.address)?;
    let tx_hash = engine.approve_voter(voter).await?;
    Ok(Json(receipt(tx_hash)))
}

#[delete("/admin/voters/<address>")]
async fn remove_voter(address: &str, engine: &State<Engine>) -> Result<Json<TxReceipt>> {
    let voter = parse_address(address)?;
    let tx_hash = engine.remove_voter(voter).await?;
    Ok(Json(receipt(tx_hash)))
}

#[delete("/admin/voters")]
async fn remove_all_voters(engine: &State<Engine>) -> Result<Json<TxReceipt>> {
    let tx_hash = engine.remove_all_voters().await?;
    Ok(Json(receipt(tx_hash)))
}

#[post("/admin/candidates", data = "<candidate>", format = "json")]
async fn add_candidate(
    candidate: Json<NewCandidate>,
    engine: &State<Engine>,
) -> Result<Json<TxReceipt>> {
    let tx_hash = engine.add_candidate(candidate.into_inner()).await?;
    Ok(Json(receipt(tx_hash)))
}

#[delete("/admin/candidates/<candidate_id>")]
async fn remove_candidate(
    candidate_id: CandidateId,
    engine: &State<Engine>,
) -> Result<Json<TxReceipt>> {
    let tx_hash = engine.remove_candidate(candidate_id).await?;
    Ok(Json(receipt(tx_hash)))
}
