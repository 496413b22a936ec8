use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    serve::{AppState, error::ServeError, types::ImportedAddress},
    tables::types::AddressKey,
    wallet::utxos::require_wallet,
    writer::tasks::{ImportAddressesResult, WriterMethod},
};

use super::parse_wallet;

#[utoipa::path(
    tag = "Wallets",
    put,
    path = "/wallets/{wallet}/addresses/{address}",
    params(
        ("wallet" = String, Path, description = "Wallet id, 64 hex characters"),
        ("address" = String, Path, description = "P2PKH or P2SH address of the configured network", example = "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn"),
    ),
    responses(
        (status = 201, description = "Address imported, its history is indexed", body = ImportedAddress),
        (status = 200, description = "Address already part of the wallet", body = ImportedAddress),
        (status = 400, description = "Malformed wallet id or address"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Unknown wallet"),
        (status = 500, description = "Internal server error"),
    ),
    security(("bearer" = []))
)]
/// Import Address
///
/// Adds an address to the wallet and indexes its history up to the indexed chain height.
pub async fn wallets_import_address(
    State(state): State<AppState>,
    Path((wallet, address)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServeError> {
    let wallet = parse_wallet(&wallet)?;

    AddressKey::parse(&address, state.network.into())?;
    require_wallet(&state.db.reader()?, &wallet)?;

    let method = WriterMethod::ImportAddresses {
        wallet,
        addresses: vec![address.clone()],
    };
    let priority = method.priority();

    let result = state.submitter.submit(method, priority).await?;
    let result: ImportAddressesResult =
        serde_json::from_value(result).map_err(crate::Error::from)?;

    let status = match result.addresses.get(&address) {
        Some(true) => StatusCode::CREATED,
        _ => StatusCode::OK,
    };

    Ok((status, Json(ImportedAddress { address })))
}
