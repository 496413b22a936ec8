use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    serve::{AppState, error::ServeError, types::Balance},
    wallet::utxos,
};

use super::parse_wallet;

#[utoipa::path(
    tag = "Wallets",
    get,
    path = "/wallets/{wallet}/balance",
    params(
        ("wallet" = String, Path, description = "Wallet id, 64 hex characters"),
    ),
    responses(
        (
            status = 200,
            description = "Requested data",
            body = Balance,
            example = json!({ "balance": 125000 })
        ),
        (status = 400, description = "Malformed wallet id"),
        (status = 404, description = "Unknown wallet"),
        (status = 500, description = "Internal server error"),
    )
)]
/// Wallet Balance
///
/// Returns the sum of the wallet's unspent outputs in satoshis.
pub async fn wallets_balance(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ServeError> {
    let wallet = parse_wallet(&wallet)?;

    let balance = utxos::balance(&state.db.reader()?, &wallet)?;

    Ok((StatusCode::OK, Json(Balance { balance })))
}
