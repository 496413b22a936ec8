use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    serve::{AppState, error::ServeError, types::CreatedWallet},
    writer::tasks::{CreateWalletResult, WriterMethod},
};

use super::parse_wallet;

#[utoipa::path(
    tag = "Wallets",
    put,
    path = "/wallets/{wallet}",
    params(
        ("wallet" = String, Path, description = "Wallet id, 64 hex characters"),
    ),
    responses(
        (status = 201, description = "Wallet created", body = CreatedWallet),
        (status = 204, description = "Wallet already exists"),
        (status = 400, description = "Malformed wallet id"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 500, description = "Internal server error"),
    ),
    security(("bearer" = []))
)]
/// Create Wallet
///
/// Creates an empty wallet. Creating an existing wallet changes nothing.
pub async fn wallets_create_wallet(
    State(state): State<AppState>,
    Path(wallet_hex): Path<String>,
) -> Result<Response, ServeError> {
    let wallet = parse_wallet(&wallet_hex)?;

    let method = WriterMethod::CreateWallet(wallet);
    let priority = method.priority();

    let result = state.submitter.submit(method, priority).await?;
    let result: CreateWalletResult =
        serde_json::from_value(result).map_err(crate::Error::from)?;

    if result.created {
        let out = CreatedWallet {
            wallet_id: wallet_hex.to_lowercase(),
        };

        Ok((StatusCode::CREATED, Json(out)).into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}
