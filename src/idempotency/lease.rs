use crate::storage::CoordinationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

const MIN_RENEWAL_PERIOD: Duration = Duration::from_millis(1);

/// Background task extending a processing marker while its owner still holds it.
///
/// Stops on `stop`, on drop, when the caller's token is cancelled, or once the
/// marker is observed under another owner.
pub(crate) struct LeaseRenewal {
    stop: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl LeaseRenewal {
    pub(crate) fn spawn(
        store: Arc<dyn CoordinationStore>,
        key: String,
        owner: String,
        ttl: Duration,
        caller: &CancellationToken,
    ) -> Self {
        let stop = caller.child_token();
        let token = stop.clone();
        let period = (ttl / 2).max(MIN_RENEWAL_PERIOD);

        let join_handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !renew_once(store.as_ref(), &key, &owner, ttl).await {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            stop,
            join_handle: Some(join_handle),
        }
    }

    /// Cancels the task and waits for it to exit.
    pub(crate) async fn stop(mut self) {
        self.stop.cancel();
        if let Some(join_handle) = self.join_handle.take() {
            if let Err(err) = join_handle.await {
                event!(Level::WARN, error = %err, "lease renewal task join failed");
            }
        }
    }
}

impl Drop for LeaseRenewal {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Returns false once the lease is known to belong to someone else.
async fn renew_once(store: &dyn CoordinationStore, key: &str, owner: &str, ttl: Duration) -> bool {
    match store.get(key).await {
        Ok(Some(current)) if current == owner.as_bytes() => {
            match store.extend_ttl(key, ttl).await {
                Ok(true) => event!(Level::DEBUG, key = %key, "lease renewed"),
                Ok(false) => event!(Level::DEBUG, key = %key, "lease expired before renewal"),
                Err(err) => event!(Level::WARN, key = %key, error = %err, "lease renewal failed"),
            }
            true
        }
        Ok(_) => {
            event!(Level::WARN, key = %key, "lease no longer owned, renewal stopped");
            false
        }
        Err(err) => {
            event!(Level::WARN, key = %key, error = %err, "lease ownership check failed");
            true
        }
    }
}
