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
        types::{RangeParams, TransactionPage},
    },
    wallet::{pagination::get_latest_txids, utxos::require_wallet},
};

use super::{page_limit, parse_wallet, start_position};

#[utoipa::path(
    tag = "Wallets",
    get,
    path = "/wallets/{wallet}/transactions",
    params(
        ("wallet" = String, Path, description = "Wallet id, 64 hex characters"),
        ("height" = inline(Option<u32>), Query, description = "Start height, defaults to the indexed chain height"),
        ("index" = inline(Option<u32>), Query, description = "Start index within the height, defaults to the newest"),
        ("limit" = inline(Option<u32>), Query, description = "Page size, default 10, at most 500"),
    ),
    responses(
        (
            status = 200,
            description = "Requested data",
            body = TransactionPage,
        ),
        (status = 400, description = "Malformed query parameters"),
        (status = 404, description = "Unknown wallet"),
        (status = 500, description = "Internal server error"),
    )
)]
/// Wallet Transactions
///
/// Same paging as the txids route, each transaction expanded into the wallet's ledger entries.
/// Entries not stored yet are derived from the node.
pub async fn wallets_transactions(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ServeError> {
    let wallet = parse_wallet(&wallet)?;
    let limit = page_limit(&params)?;

    let page = {
        let reader = state.db.reader()?;
        require_wallet(&reader, &wallet)?;

        let start = start_position(&reader, &params)?;
        get_latest_txids(&reader, &wallet, start, limit)?
    };

    let mut transactions = vec![];

    for txid in &page.txids {
        transactions.extend(state.importer.wallet_transactions(wallet, *txid).await?);
    }

    let out = TransactionPage {
        transactions,
        start: page.start,
        end: page.end,
    };

    Ok((StatusCode::OK, Json(out)))
}
