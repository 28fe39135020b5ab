use rocket::{serde::json::Json, Route, State};

use super::common::receipt;
use crate::error::Result;
use crate::model::{TxReceipt, VoteRequest};
use crate::sync::Engine;

pub fn routes() -> Vec<Route> {
    routes![vote]
}

/// Cast a vote from the configured account. Responds once the transaction
/// is confirmed.
#[post("/vote", data = "<request>", format = "json")]
async fn vote(request: Json<VoteRequest>, engine: &State<Engine>) -> Result<Json<TxReceipt>> {
    let tx_hash = engine.vote(request.candidate_id).await?;
    Ok(Json(receipt(tx_hash)))
}
