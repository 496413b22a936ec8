pub mod balance;
pub mod create_wallet;
pub mod import_address;
pub mod import_addresses;
pub mod raw_transactions;
pub mod transactions;
pub mod txids;
pub mod utxos;

use std::str::FromStr;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::{
    error::Error,
    serve::{AppState, error::ServeError, require_token, types::RangeParams},
    storage::kv_store::Reader,
    tables::{hash_by_height::HashByHeightKV, types::WalletId},
    wallet::pagination::{DEFAULT_LIMIT, Position, check_limit},
};

pub fn router(state: AppState) -> Router<AppState> {
    let mutations = Router::new()
        .route("/{wallet}", put(create_wallet::wallets_create_wallet))
        .route(
            "/{wallet}/addresses",
            post(import_addresses::wallets_import_addresses),
        )
        .route(
            "/{wallet}/addresses/{address}",
            put(import_address::wallets_import_address),
        )
        .route_layer(middleware::from_fn_with_state(state, require_token));

    Router::new()
        .route("/{wallet}/balance", get(balance::wallets_balance))
        .route("/{wallet}/txids", get(txids::wallets_txids))
        .route(
            "/{wallet}/transactions",
            get(transactions::wallets_transactions),
        )
        .route(
            "/{wallet}/rawtransactions",
            get(raw_transactions::wallets_raw_transactions),
        )
        .route("/{wallet}/utxos", get(utxos::wallets_utxos))
        .merge(mutations)
}

pub fn parse_wallet(wallet: &str) -> Result<WalletId, ServeError> {
    Ok(WalletId::from_str(wallet)?)
}

/// Checked page size, before anything is read
pub fn page_limit(params: &RangeParams) -> Result<u32, ServeError> {
    Ok(check_limit(params.limit.unwrap_or(DEFAULT_LIMIT))?)
}

/// Requested start of a history walk, the newest indexed entry by default
pub fn start_position(reader: &Reader, params: &RangeParams) -> Result<Position, Error> {
    let height = match params.height {
        Some(height) => height,
        None => HashByHeightKV::tip(reader)?.map_or(u32::MAX, |tip| tip.height),
    };

    Ok(Position {
        height,
        index: params.index.unwrap_or(u32::MAX),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use bitcoin::OutPoint;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{
        error::Error,
        serve::{AppContext, app},
        shutdown::ShutdownSignal,
        storage::kv_store::{StorageHandler, tests::temp_store},
        sync::{
            Config, Network,
            engine::SyncEngine,
            engine::tests::{SimChain, block, build_chain, coinbase, p2pkh, spend},
        },
        tables::types::{AddressKey, AddressType},
        wallet::import::TransactionImporter,
        writer::{
            TaskSubmitter,
            protocol::new_task_id,
            tasks::{TaskRunner, WriterMethod},
        },
    };

    pub(crate) const TOKEN: &str = "secret";

    /// Runs tasks in process, on the same store the handlers read
    pub(crate) struct LocalWriter {
        engine: Mutex<SyncEngine<Arc<SimChain>>>,
        runner: TaskRunner,
    }

    impl LocalWriter {
        pub(crate) fn sync(&self) {
            self.engine.lock().unwrap().run().unwrap();
        }
    }

    #[async_trait::async_trait]
    impl TaskSubmitter for LocalWriter {
        async fn submit(&self, method: WriterMethod, _: i64) -> Result<Value, Error> {
            let task = method.into_task(new_task_id())?;
            let mut engine = self.engine.lock().unwrap();

            self.runner.run(&mut engine, &task)
        }
    }

    pub(crate) struct TestApp {
        pub _dir: tempfile::TempDir,
        pub db: StorageHandler,
        pub chain: Arc<SimChain>,
        pub writer: Arc<LocalWriter>,
        pub router: Router,
    }

    pub(crate) fn test_app() -> TestApp {
        let (dir, db) = temp_store();
        let chain = Arc::new(SimChain::default());
        chain.replace(build_chain(&[], 3, 0, &p2pkh(0xee)));

        let config = Config {
            start_height: Some(0),
            ..Default::default()
        };
        let engine =
            SyncEngine::new(chain.clone(), db.clone(), &config, ShutdownSignal::new()).unwrap();

        let writer = Arc::new(LocalWriter {
            engine: Mutex::new(engine),
            runner: TaskRunner::new(Network::Regtest, 100),
        });

        let importer = TransactionImporter::new(
            db.clone(),
            chain.clone(),
            writer.clone(),
            Network::Regtest,
            6,
        );

        let state = Arc::new(AppContext {
            db: db.clone(),
            importer,
            submitter: writer.clone(),
            network: Network::Regtest,
            started_at: chrono::Utc::now(),
            auth_token: Some(TOKEN.into()),
        });

        TestApp {
            _dir: dir,
            db,
            chain,
            writer,
            router: app(state),
        }
    }

    pub(crate) async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));

        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, bytes.to_vec())
    }

    pub(crate) fn json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    pub(crate) fn wallet_hex(byte: u8) -> String {
        hex::encode([byte; 32])
    }

    #[tokio::test]
    async fn mutations_require_the_token() {
        let app = test_app();
        let uri = format!("/wallets/{}", wallet_hex(1));

        let anonymous = Request::builder()
            .method("PUT")
            .uri(&uri)
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(anonymous).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app.router, "PUT", &uri, None).await;
        assert_eq!(status, StatusCode::CREATED);

        // reads are open
        let balance = Request::builder()
            .uri(format!("{uri}/balance"))
            .body(Body::empty())
            .unwrap();

        let response = app.router.clone().oneshot(balance).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn info_reports_network() {
        let app = test_app();

        let (status, body) = send(&app.router, "GET", "/info", None).await;
        let body = json(&body);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["network"], "regtest");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert!(body["chain_tip"].is_null());

        let (status, body) = send(&app.router, "GET", "/docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json(&body)["paths"]["/wallets/{wallet}/txids"].is_object());
    }

    #[tokio::test]
    async fn wallet_follows_chain() {
        let app = test_app();
        let wallet = format!("/wallets/{}", wallet_hex(2));
        let address = AddressKey {
            kind: AddressType::PubKeyHash,
            hash160: [1; 20],
        }
        .to_address(bitcoin::Network::Regtest)
        .to_string();

        let (status, _) = send(&app.router, "PUT", &wallet, None).await;
        assert_eq!(status, StatusCode::CREATED);

        let single = format!("{wallet}/addresses/{address}");
        let (status, body) = send(&app.router, "PUT", &single, None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json(&body)["address"], address.as_str());

        let (status, _) = send(&app.router, "PUT", &single, None).await;
        assert_eq!(status, StatusCode::OK);

        let bulk = format!("{wallet}/addresses");
        let request = serde_json::json!({ "addresses": [address] });
        let (status, _) = send(&app.router, "POST", &bulk, Some(request)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // pay the address at height 3, spend it at height 4 with change back
        let mut blocks = app.chain.blocks.lock().unwrap().clone();
        let funding = coinbase(3, 0, p2pkh(1), 5_000);
        let b3 = block(blocks[2].block_hash(), 0, vec![funding.clone()]);
        let payment = spend(
            OutPoint::new(funding.compute_txid(), 0),
            vec![(p2pkh(0x22), 3_000), (p2pkh(1), 1_500)],
        );
        let b4 = block(
            b3.block_hash(),
            0,
            vec![coinbase(4, 0, p2pkh(0xee), 1), payment.clone()],
        );
        blocks.extend([b3, b4]);
        app.chain.replace(blocks);
        app.writer.sync();

        let (_, body) = send(&app.router, "GET", &format!("{wallet}/balance"), None).await;
        assert_eq!(json(&body)["balance"], 1_500);

        let (_, body) = send(&app.router, "GET", &format!("{wallet}/txids"), None).await;
        let page = json(&body);
        assert_eq!(
            page["txids"],
            serde_json::json!([
                payment.compute_txid().to_string(),
                funding.compute_txid().to_string()
            ])
        );
        assert_eq!(page["start"], serde_json::json!({ "height": 4, "index": u32::MAX }));
        assert!(page.get("end").is_none());

        let (_, body) = send(&app.router, "GET", &format!("{wallet}/txids?limit=1"), None).await;
        assert_eq!(json(&body)["end"], serde_json::json!({ "height": 4, "index": 1 }));

        let uri = format!("{wallet}/transactions");
        let (status, body) = send(&app.router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let categories = json(&body)["transactions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| {
                let category = t["category"].as_str().unwrap().to_string();
                (category, t["satoshis"].as_u64().unwrap())
            })
            .collect::<Vec<_>>();

        assert_eq!(
            categories,
            vec![
                ("shared-receive".to_string(), 1_500),
                ("shared-send".to_string(), 5_000),
                ("fee".to_string(), 500),
                ("receive".to_string(), 5_000),
            ]
        );

        let (_, body) = send(&app.router, "GET", &format!("{wallet}/utxos"), None).await;
        let utxos = json(&body);
        assert_eq!(utxos.as_array().unwrap().len(), 1);
        assert_eq!(utxos[0]["txid"], payment.compute_txid().to_string());
        assert_eq!(utxos[0]["vout"], 1);
        assert_eq!(utxos[0]["address"], address.as_str());

        let (_, body) = send(&app.router, "GET", "/info", None).await;
        assert_eq!(json(&body)["chain_tip"]["block_height"], 4);
    }

    #[tokio::test]
    async fn unknown_wallet_and_bad_input() {
        let app = test_app();
        let wallet = format!("/wallets/{}", wallet_hex(9));

        let (status, body) = send(&app.router, "GET", &format!("{wallet}/balance"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json(&body)["error"].as_str().unwrap().contains("not found"));

        let (status, _) = send(&app.router, "GET", &format!("{wallet}/txids"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("{wallet}/txids?limit=501");
        let (status, _) = send(&app.router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app.router, "GET", "/wallets/zz/balance", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mainnet = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
        let uri = format!("{wallet}/addresses/{mainnet}");
        let (status, _) = send(&app.router, "PUT", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let regtest = AddressKey {
            kind: AddressType::PubKeyHash,
            hash160: [3; 20],
        }
        .to_address(bitcoin::Network::Regtest);
        let uri = format!("{wallet}/addresses/{regtest}");
        let (status, _) = send(&app.router, "PUT", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
