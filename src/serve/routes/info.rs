use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::{
    serve::{AppState, error::ServeError, types::IndexerInfo},
    tables::hash_by_height::HashByHeightKV,
};

#[utoipa::path(
    tag = "Service",
    get,
    path = "/info",
    responses(
        (
            status = 200,
            description = "Service information",
            body = IndexerInfo,
            example = json!(EXAMPLE_RESPONSE)
        ),
        (status = 500, description = "Internal server error"),
    )
)]
/// Service Info
///
/// Returns the service version, the network it indexes and the last indexed block.
pub async fn info(State(state): State<AppState>) -> Result<impl IntoResponse, ServeError> {
    let tip = HashByHeightKV::tip(&state.db.reader()?)?;

    let out = IndexerInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        network: state.network,
        started_at: state.started_at.to_rfc3339(),
        chain_tip: tip.map(Into::into),
    };

    Ok((StatusCode::OK, Json(out)))
}

static EXAMPLE_RESPONSE: &str = r##"{
  "version": "0.1.0",
  "network": "testnet4",
  "started_at": "2025-07-21T09:12:44.052113+00:00",
  "chain_tip": {
    "block_hash": "00000000000000108a4cd9755381003a01bea7998ca2d770fe09b576753ac7ef",
    "block_height": 31633
  }
}"##;
