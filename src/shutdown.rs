use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;
use tracing::{error, info};

/// Cooperative stop flag shared by every long running part of a process. Work loops check it
/// between units of work, nothing is interrupted mid unit.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
        }

        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested
    pub async fn triggered(&self) {
        loop {
            let notified = self.inner.notify.notified();

            if self.is_triggered() {
                return;
            }

            notified.await;
        }
    }

    /// Trigger on ctrl+c or SIGTERM
    pub fn listen_for_signals(&self) {
        let signal = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => signal.trigger(),
                Err(err) => error!("error listening for ctrl+c: {}", err),
            }
        });

        #[cfg(unix)]
        {
            let signal = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{SignalKind, signal as unix_signal};

                match unix_signal(SignalKind::terminate()) {
                    Ok(mut term) => {
                        term.recv().await;
                        signal.trigger();
                    }
                    Err(err) => error!("failed to install SIGTERM handler: {}", err),
                }
            });
        }
    }
}
