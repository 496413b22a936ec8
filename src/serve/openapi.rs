use super::{routes::*, types::*};
use crate::{
    sync::Network,
    tables::wallet_transaction::{Category, WalletTransactionJson},
    wallet::{pagination::Position, utxos::UtxoOrder},
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Symphony",
        version = "v0.1.0",
        description = "Wallet Symphony indexes the addresses of registered wallets against a Bitcoin full node and serves balances, transaction history and UTxOs per wallet, staying consistent through chain reorganizations.",
        license(
            name = "Apache 2.0",
            url = "https://www.apache.org/licenses/LICENSE-2.0.txt"
        )
    ),
    paths(
        info::info,
        wallets::balance::wallets_balance,
        wallets::txids::wallets_txids,
        wallets::transactions::wallets_transactions,
        wallets::raw_transactions::wallets_raw_transactions,
        wallets::utxos::wallets_utxos,
        wallets::create_wallet::wallets_create_wallet,
        wallets::import_address::wallets_import_address,
        wallets::import_addresses::wallets_import_addresses,
    ),
    components(schemas(
        IndexerInfo,
        ChainTip,
        Network,
        Position,
        UtxoOrder,
        Category,
        // --
        Balance,
        TxidPage,
        TransactionPage,
        WalletTransactionJson,
        RawTransactionLine,
        Utxo,
        CreatedWallet,
        ImportedAddress,
        ImportAddressesRequest,
        ImportedAddresses,
    )),
    modifiers(&BearerAuth),
)]
pub struct APIDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}
