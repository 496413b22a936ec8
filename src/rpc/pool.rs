use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use bitcoin::{Block, BlockHash, Txid};
use tracing::warn;

use super::{AddressDelta, AddressUtxo, ChainSource, RawTransaction, RpcError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Redundant node connections used round robin. Every attempt, including retries, moves the
/// cursor on by one so that consecutive attempts go to different nodes.
pub struct RpcPool<C> {
    clients: Vec<C>,
    cursor: AtomicUsize,
    max_attempts: u32,
    retry_delay: Duration,
}

impl<C: ChainSource> RpcPool<C> {
    pub fn new(clients: Vec<C>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            clients,
            cursor: AtomicUsize::new(0),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The client at the cursor, advancing the cursor
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Result<&C, RpcError> {
        if self.clients.is_empty() {
            return Err(RpcError::new("no rpc clients configured"));
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len();

        Ok(&self.clients[index])
    }

    /// One attempt per client, returning the first success or the last error
    pub fn try_all_clients<T>(
        &self,
        f: impl Fn(&C) -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let mut last_error = RpcError::new("no rpc clients configured");

        for _ in 0..self.clients.len() {
            match f(self.next()?) {
                Ok(x) => return Ok(x),
                Err(e) => {
                    warn!(error = %e, "rpc attempt failed, trying next client");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Up to `max_attempts` attempts with a fixed delay between them
    pub fn call<T>(&self, f: impl Fn(&C) -> Result<T, RpcError>) -> Result<T, RpcError> {
        let mut attempt = 1;

        loop {
            match f(self.next()?) {
                Ok(x) => return Ok(x),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!(error = %e, attempt, "rpc call failed, retrying");

                    std::thread::sleep(self.retry_delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl<C: ChainSource> ChainSource for RpcPool<C> {
    fn chain_height(&self) -> Result<u32, RpcError> {
        self.call(|c| c.chain_height())
    }

    fn block_hash(&self, height: u32) -> Result<BlockHash, RpcError> {
        self.call(|c| c.block_hash(height))
    }

    fn raw_block(&self, height: u32) -> Result<Block, RpcError> {
        self.call(|c| c.raw_block(height))
    }

    fn raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, RpcError> {
        self.call(|c| c.raw_transaction(txid))
    }

    fn raw_transaction_hex(&self, txid: &Txid) -> Result<String, RpcError> {
        self.call(|c| c.raw_transaction_hex(txid))
    }

    fn address_deltas(
        &self,
        addresses: &[String],
        start: u32,
        end: u32,
    ) -> Result<Vec<AddressDelta>, RpcError> {
        self.call(|c| c.address_deltas(addresses, start, end))
    }

    fn address_utxos(&self, addresses: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
        self.call(|c| c.address_utxos(addresses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Client answering `chain_height` with a fixed result, counting calls
    struct FixedClient {
        result: Result<u32, RpcError>,
        calls: AtomicU32,
    }

    impl FixedClient {
        fn ok(height: u32) -> Self {
            Self {
                result: Ok(height),
                calls: AtomicU32::new(0),
            }
        }

        fn failing(code: i32) -> Self {
            Self {
                result: Err(RpcError::with_code(code, "boom")),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChainSource for FixedClient {
        fn chain_height(&self) -> Result<u32, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }

        fn block_hash(&self, _: u32) -> Result<BlockHash, RpcError> {
            unimplemented!()
        }

        fn raw_block(&self, _: u32) -> Result<Block, RpcError> {
            unimplemented!()
        }

        fn raw_transaction(&self, _: &Txid) -> Result<RawTransaction, RpcError> {
            unimplemented!()
        }

        fn raw_transaction_hex(&self, _: &Txid) -> Result<String, RpcError> {
            unimplemented!()
        }

        fn address_deltas(
            &self,
            _: &[String],
            _: u32,
            _: u32,
        ) -> Result<Vec<AddressDelta>, RpcError> {
            unimplemented!()
        }

        fn address_utxos(&self, _: &[String]) -> Result<Vec<AddressUtxo>, RpcError> {
            unimplemented!()
        }
    }

    fn pool(clients: Vec<FixedClient>) -> RpcPool<FixedClient> {
        RpcPool::new(clients, 3, Duration::ZERO)
    }

    #[test]
    fn try_all_clients_stops_at_first_success() {
        let pool = pool(vec![
            FixedClient::failing(-1),
            FixedClient::failing(-2),
            FixedClient::ok(7),
        ]);

        assert_eq!(pool.try_all_clients(|c| c.chain_height()), Ok(7));
        assert!(pool.clients.iter().all(|c| c.calls() == 1));
    }

    #[test]
    fn try_all_clients_surfaces_last_error() {
        let pool = pool(vec![
            FixedClient::failing(-1),
            FixedClient::failing(-2),
            FixedClient::failing(-3),
        ]);

        let err = pool.try_all_clients(|c| c.chain_height()).unwrap_err();

        assert_eq!(err.code, Some(-3));
        assert!(pool.clients.iter().all(|c| c.calls() == 1));
    }

    #[test]
    fn next_walks_the_clients_in_turn() {
        let pool = pool(vec![FixedClient::ok(0), FixedClient::ok(1)]);

        let picked = (0..5)
            .map(|_| pool.next().unwrap().chain_height().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(picked, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn call_retries_on_the_next_client() {
        let pool = pool(vec![FixedClient::failing(-28), FixedClient::ok(3)]);

        assert_eq!(pool.chain_height(), Ok(3));
        assert_eq!(pool.clients[0].calls(), 1);
        assert_eq!(pool.clients[1].calls(), 1);
    }

    #[test]
    fn call_gives_up_after_max_attempts() {
        let pool = pool(vec![FixedClient::failing(-28)]);

        assert_eq!(pool.chain_height().unwrap_err().code, Some(-28));
        assert_eq!(pool.clients[0].calls(), 3);
    }

    #[test]
    fn empty_pool_errors() {
        let pool = pool(vec![]);

        assert!(pool.next().is_err());
        assert!(pool.try_all_clients(|c| c.chain_height()).is_err());
    }
}
