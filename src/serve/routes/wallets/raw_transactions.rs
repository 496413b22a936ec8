use std::collections::VecDeque;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bitcoin::Txid;
use futures::stream;
use tracing::error;

use crate::{
    error::Error,
    serve::{
        AppState,
        error::ServeError,
        types::{RangeParams, RawTransactionLine},
    },
    wallet::{import::TransactionImporter, pagination::TxidPager, utxos::require_wallet},
};

use super::{page_limit, parse_wallet, start_position};

#[utoipa::path(
    tag = "Wallets",
    get,
    path = "/wallets/{wallet}/rawtransactions",
    params(
        ("wallet" = String, Path, description = "Wallet id, 64 hex characters"),
        ("height" = inline(Option<u32>), Query, description = "Start height, defaults to the indexed chain height"),
        ("index" = inline(Option<u32>), Query, description = "Start index within the height, defaults to the newest"),
        ("limit" = inline(Option<u32>), Query, description = "Entries read per page, default 10, at most 500"),
    ),
    responses(
        (
            status = 200,
            description = "One JSON object per line, newest first",
            body = RawTransactionLine,
            content_type = "application/x-ndjson"
        ),
        (status = 400, description = "Malformed query parameters"),
        (status = 404, description = "Unknown wallet"),
        (status = 500, description = "Internal server error"),
    )
)]
/// Wallet Raw Transactions
///
/// Streams every transaction of the wallet's history from the start position backwards, fetching
/// the history one page at a time.
pub async fn wallets_raw_transactions(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
    Path(wallet): Path<String>,
) -> Result<impl IntoResponse, ServeError> {
    let wallet = parse_wallet(&wallet)?;
    let limit = page_limit(&params)?;

    let start = {
        let reader = state.db.reader()?;
        require_wallet(&reader, &wallet)?;

        start_position(&reader, &params)?
    };

    let pager = TxidPager::new(state.db.clone(), wallet, start, limit)?;
    let importer = state.importer.clone();

    let lines = stream::unfold(
        (pager, VecDeque::new()),
        move |(mut pager, mut queue): (TxidPager, VecDeque<Txid>)| {
            let importer = importer.clone();

            async move {
                loop {
                    if let Some(txid) = queue.pop_front() {
                        let line = raw_line(&importer, txid).await;
                        return Some((line, (pager, queue)));
                    }

                    // an error ends the pager, so it is the last item
                    match pager.next()? {
                        Ok(page) => queue.extend(page.txids),
                        Err(e) => {
                            error!(%wallet, "raw transaction stream failed: {e}");
                            return Some((Err(e), (pager, queue)));
                        }
                    }
                }
            }
        },
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    ))
}

async fn raw_line(importer: &TransactionImporter, txid: Txid) -> Result<String, Error> {
    let hex = importer.raw_hex(txid).await.inspect_err(|e| {
        error!(%txid, "failed to fetch raw transaction: {e}");
    })?;

    let line = RawTransactionLine {
        txid: txid.to_string(),
        hex,
    };

    let mut out = serde_json::to_string(&line)?;
    out.push('\n');

    Ok(out)
}
