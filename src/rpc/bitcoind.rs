use bitcoin::{Block, BlockHash, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi, jsonrpc};
use serde::Deserialize;
use serde_json::json;

use super::{AddressDelta, AddressUtxo, ChainSource, RawTransaction, RpcError};

/// One node endpoint of the pool
#[derive(Deserialize, Debug, Clone)]
pub struct NodeRpcConfig {
    pub address: String,
    pub user: String,
    pub pass: String,
}

impl NodeRpcConfig {
    pub fn connect(&self) -> Result<Client, RpcError> {
        let auth = Auth::UserPass(self.user.clone(), self.pass.clone());

        Client::new(&self.address, auth).map_err(RpcError::from)
    }
}

impl From<bitcoincore_rpc::Error> for RpcError {
    fn from(e: bitcoincore_rpc::Error) -> Self {
        match e {
            bitcoincore_rpc::Error::JsonRpc(jsonrpc::error::Error::Rpc(
                jsonrpc::error::RpcError { code, message, .. },
            )) => RpcError::with_code(code, message),
            other => RpcError::new(other),
        }
    }
}

impl ChainSource for Client {
    fn chain_height(&self) -> Result<u32, RpcError> {
        let count = self.get_block_count()?;

        u32::try_from(count).map_err(|_| RpcError::new(format!("block count {count} out of range")))
    }

    fn block_hash(&self, height: u32) -> Result<BlockHash, RpcError> {
        Ok(self.get_block_hash(height.into())?)
    }

    fn raw_block(&self, height: u32) -> Result<Block, RpcError> {
        let hash = self.get_block_hash(height.into())?;

        Ok(self.get_block(&hash)?)
    }

    fn raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError> {
        let info = self.get_raw_transaction_info(txid, None)?;

        let tx = info
            .transaction()
            .map_err(|e| RpcError::new(format!("undecodable transaction {txid}: {e}")))?;

        let block_height = match info.blockhash {
            Some(hash) => Some(self.get_block_header_info(&hash)?.height as u32),
            None => None,
        };

        Ok(RawTransaction {
            tx,
            confirmations: info.confirmations.unwrap_or(0),
            block_height,
        })
    }

    fn raw_transaction_hex(&self, txid: &Txid) -> Result<String, RpcError> {
        Ok(self.get_raw_transaction_hex(txid, None)?)
    }

    fn address_deltas(
        &self,
        addresses: &[String],
        start: u32,
        end: u32,
    ) -> Result<Vec<AddressDelta>, RpcError> {
        let params = json!({ "addresses": addresses, "start": start, "end": end });

        Ok(self.call("getaddressdeltas", &[params])?)
    }

    fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
        let params = json!({ "addresses": addresses });

        Ok(self.call("getaddressutxos", &[params])?)
    }
}
