use std::{sync::Arc, time::Duration};

use bitcoin::BlockHash;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::{rpc::ChainSource, shutdown::ShutdownSignal};

/// Poll the source for its best block and wake `notify` whenever it changes
pub async fn watch_tip<C>(
    source: Arc<C>,
    poll_interval: Duration,
    notify: Arc<Notify>,
    shutdown: ShutdownSignal,
) where
    C: ChainSource + ?Sized + 'static,
{
    let mut last_seen: Option<BlockHash> = None;
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.triggered() => break,
        }

        let source = source.clone();

        let res = tokio::task::spawn_blocking(move || {
            let height = source.chain_height()?;
            source.block_hash(height).map(|hash| (height, hash))
        })
        .await;

        match res {
            Ok(Ok((height, hash))) => {
                if last_seen != Some(hash) {
                    debug!(height, %hash, "new chain tip");

                    last_seen = Some(hash);
                    notify.notify_one();
                }
            }
            Ok(Err(e)) => warn!(error = %e, "failed to poll chain tip"),
            Err(e) => error!(error = %e, "tip poll task failed"),
        }
    }

    debug!("tip watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::engine::tests::{SimChain, build_chain, p2pkh};

    #[tokio::test]
    async fn notifies_on_new_tip_only() {
        let chain = Arc::new(SimChain::default());
        chain.replace(build_chain(&[], 3, 0, &p2pkh(1)));

        let notify = Arc::new(Notify::new());
        let shutdown = ShutdownSignal::new();

        let watcher = tokio::spawn(watch_tip(
            chain.clone(),
            Duration::from_millis(10),
            notify.clone(),
            shutdown.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(5), notify.notified())
            .await
            .unwrap();

        // unchanged tip, no further notification
        assert!(
            tokio::time::timeout(Duration::from_millis(100), notify.notified())
                .await
                .is_err()
        );

        let longer = build_chain(&chain.blocks.lock().unwrap().clone(), 4, 0, &p2pkh(1));
        chain.replace(longer);

        tokio::time::timeout(Duration::from_secs(5), notify.notified())
            .await
            .unwrap();

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .unwrap()
            .unwrap();
    }
}
