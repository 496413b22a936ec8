use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{
    serve::{
        AppState,
        error::ServeError,
        types::{ImportAddressesRequest, ImportedAddresses},
    },
    tables::types::AddressKey,
    wallet::utxos::require_wallet,
    writer::tasks::{ImportAddressesResult, WriterMethod},
};

use super::parse_wallet;

#[utoipa::path(
    tag = "Wallets",
    post,
    path = "/wallets/{wallet}/addresses",
    params(
        ("wallet" = String, Path, description = "Wallet id, 64 hex characters"),
    ),
    request_body(
        content = ImportAddressesRequest,
        description = "Addresses to import",
        content_type = "application/json"
    ),
    responses(
        (status = 201, description = "At least one address was new", body = ImportedAddresses),
        (status = 204, description = "Every address was already part of the wallet"),
        (status = 400, description = "Malformed wallet id or address"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Unknown wallet"),
        (status = 500, description = "Internal server error"),
    ),
    security(("bearer" = []))
)]
/// Import Addresses
///
/// Bulk version of the single address import. Nothing is imported if any address is invalid.
pub async fn wallets_import_addresses(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
    Json(request): Json<ImportAddressesRequest>,
) -> Result<Response, ServeError> {
    let wallet = parse_wallet(&wallet)?;

    for address in &request.addresses {
        AddressKey::parse(address, state.network.into())?;
    }

    require_wallet(&state.db.reader()?, &wallet)?;

    let method = WriterMethod::ImportAddresses {
        wallet,
        addresses: request.addresses,
    };
    let priority = method.priority();

    let result = state.submitter.submit(method, priority).await?;
    let result: ImportAddressesResult =
        serde_json::from_value(result).map_err(crate::Error::from)?;

    if result.addresses.values().any(|new| *new) {
        let out = ImportedAddresses {
            addresses: result.addresses,
        };

        Ok((StatusCode::CREATED, Json(out)).into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}
