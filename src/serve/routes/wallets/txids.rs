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
        types::{RangeParams, TxidPage},
    },
    wallet::{pagination::get_latest_txids, utxos::require_wallet},
};

use super::{page_limit, parse_wallet, start_position};

#[utoipa::path(
    tag = "Wallets",
    get,
    path = "/wallets/{wallet}/txids",
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
            body = TxidPage,
            example = json!(EXAMPLE_RESPONSE)
        ),
        (status = 400, description = "Malformed query parameters"),
        (status = 404, description = "Unknown wallet"),
        (status = 500, description = "Internal server error"),
    )
)]
/// Wallet Transaction IDs
///
/// Walks the wallet's history backwards from the start position. `end` is only present when the
/// page is full, in which case older entries may follow.
pub async fn wallets_txids(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ServeError> {
    let wallet = parse_wallet(&wallet)?;
    let limit = page_limit(&params)?;

    let reader = state.db.reader()?;
    require_wallet(&reader, &wallet)?;

    let start = start_position(&reader, &params)?;
    let page = get_latest_txids(&reader, &wallet, start, limit)?;

    let out = TxidPage {
        txids: page.txids.iter().map(ToString::to_string).collect(),
        start: page.start,
        end: page.end,
    };

    Ok((StatusCode::OK, Json(out)))
}

static EXAMPLE_RESPONSE: &str = r##"{
  "txids": [
    "c0345bb5906257a05cdc2d11b6580ce75fdfe8b7ac09b7b2711d435e2ba0a9b3",
    "63937d48e35d15a7c5530469210c202104cc94a945cc848554f336b3f4f24121"
  ],
  "start": { "height": 31633, "index": 4294967295 },
  "end": { "height": 30562, "index": 7 }
}"##;
