use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    serve::{
        AppState,
        error::ServeError,
        types::{Utxo, UtxoParams},
    },
    wallet::utxos::list_utxos,
};

use super::parse_wallet;

#[utoipa::path(
    tag = "Wallets",
    get,
    path = "/wallets/{wallet}/utxos",
    params(
        ("wallet" = String, Path, description = "Wallet id, 64 hex characters"),
        ("sort" = inline(Option<crate::wallet::utxos::UtxoOrder>), Query, description = "Order by confirmation height (default) or by value"),
    ),
    responses(
        (
            status = 200,
            description = "Requested data",
            body = Vec<Utxo>,
            example = json!(EXAMPLE_RESPONSE)
        ),
        (status = 400, description = "Malformed query parameters"),
        (status = 404, description = "Unknown wallet"),
        (status = 500, description = "Internal server error"),
    )
)]
/// Wallet UTxOs
///
/// Returns the unspent outputs of the wallet, oldest or smallest first.
pub async fn wallets_utxos(
    State(state): State<AppState>,
    Query(params): Query<UtxoParams>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ServeError> {
    let wallet = parse_wallet(&wallet)?;

    let utxos = list_utxos(&state.db.reader()?, &wallet, params.sort)?
        .iter()
        .map(|utxo| Utxo::new(utxo, state.network))
        .collect::<Vec<_>>();

    Ok((StatusCode::OK, Json(utxos)))
}

static EXAMPLE_RESPONSE: &str = r##"[
  {
    "txid": "63937d48e35d15a7c5530469210c202104cc94a945cc848554f336b3f4f24121",
    "vout": 1,
    "height": 30562,
    "satoshis": 10000,
    "address": "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn"
  }
]"##;
