use super::lease::LeaseRenewal;
use crate::config::CoordinatorConfig;
use crate::core::{CoreError, Result};
use crate::storage::CoordinationStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Deduplicates side-effecting operations across client retries.
///
/// Two markers per key live in the coordination store: `processing` holds the
/// owner token of the execution in flight, `done` holds the cached result.
/// Executions under one key never overlap while the processing lease is
/// held. The done marker is written after the operation returns, so a crash
/// in between lets a retry run the operation again (at-least-once across
/// process failure).
#[derive(Clone)]
pub struct IdempotencyCoordinator {
    store: Arc<dyn CoordinationStore>,
    config: CoordinatorConfig,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn with_defaults(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            config: CoordinatorConfig::default(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Runs `operation` at most once at a time per `key` and replays its result.
    ///
    /// - A cached result for `key` is returned without running `operation`.
    /// - While another execution holds `key`, waits for its result, failing with
    ///   `LockTimeout` after the configured bound or `Cancelled` if `cancel` fires.
    /// - An error from `operation` is returned unchanged and nothing is cached,
    ///   so the next call with `key` runs `operation` again.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>>> + Send,
    {
        if key.trim().is_empty() {
            return Err(CoreError::InvalidInput("idempotency key is required".to_string()));
        }
        if ttl.is_zero() {
            return Err(CoreError::InvalidInput("idempotency ttl must be > 0".to_string()));
        }

        let span = info_span!("idempotency.execute", key = %key, ttl_ms = ttl.as_millis() as u64);
        self.execute_inner(key, ttl, cancel, operation)
            .instrument(span)
            .await
    }

    /// `execute` for operations producing a serializable value; the cached
    /// bytes are its JSON encoding.
    pub async fn execute_json<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let bytes = self
            .execute(key, ttl, cancel, || async move {
                let value = operation().await?;
                Ok(serde_json::to_vec(&value)?)
            })
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn execute_inner<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>>> + Send,
    {
        let done_key = self.config.done_key(key);
        if let Some(cached) = self.store.get(&done_key).await? {
            event!(Level::DEBUG, "idempotent replay from done marker");
            return Ok(cached);
        }

        let processing_key = self.config.processing_key(key);
        let owner = Uuid::new_v4().to_string();
        if !self
            .store
            .set_if_absent(&processing_key, owner.as_bytes(), ttl)
            .await?
        {
            event!(Level::DEBUG, "execution in flight elsewhere, waiting for result");
            return self.wait_for_result(key, &done_key, cancel).await;
        }

        let renewal = LeaseRenewal::spawn(
            Arc::clone(&self.store),
            processing_key.clone(),
            owner.clone(),
            ttl,
            cancel,
        );
        let outcome = operation().await;
        renewal.stop().await;

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                event!(Level::DEBUG, error = %err, "operation failed, nothing cached");
                self.release(&processing_key, &owner).await;
                return Err(err);
            }
        };

        if let Err(err) = self
            .store
            .set(&done_key, &result, self.config.done_ttl(ttl))
            .await
        {
            event!(Level::ERROR, error = %err, "failed to cache operation result");
            self.release(&processing_key, &owner).await;
            return Err(err);
        }

        self.release(&processing_key, &owner).await;
        event!(Level::DEBUG, bytes = result.len(), "operation result cached");
        Ok(result)
    }

    /// Polls the done marker with capped exponential backoff.
    async fn wait_for_result(
        &self,
        key: &str,
        done_key: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut backoff = self.config.initial_backoff;
        let mut waited = Duration::ZERO;

        loop {
            if let Some(cached) = self.store.get(done_key).await? {
                event!(Level::DEBUG, waited_ms = waited.as_millis() as u64, "in-flight result arrived");
                return Ok(cached);
            }
            if waited >= self.config.max_wait {
                event!(Level::WARN, waited_ms = waited.as_millis() as u64, "gave up waiting for in-flight execution");
                return Err(CoreError::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                _ = sleep(backoff) => {}
            }
            waited += backoff;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    /// Deletes the processing marker only while it still carries `owner`.
    async fn release(&self, processing_key: &str, owner: &str) {
        match self
            .store
            .compare_and_delete(processing_key, owner.as_bytes())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                event!(Level::WARN, "processing marker no longer owned at release");
            }
            Err(err) => {
                event!(Level::WARN, error = %err, "processing marker release failed");
            }
        }
    }
}
