//! EngineBuilder - wiring and start-up validation.
//!
//! Missing adapters and bad settings surface from `build()`, before any
//! message is accepted.

use std::sync::Arc;
use std::time::Duration;

use super::engine::QueueEngine;
use super::retry::RetryPolicy;
use crate::config::{ConfigError, HeraldConfig};
use crate::ports::{Clock, DeliveryTransport, IdGenerator, QueueStore, SystemClock, UlidGenerator};

/// Builds a `QueueEngine`.
///
/// ```ignore
/// let engine = EngineBuilder::new()
///     .store(InMemoryQueueStore::new())
///     .transport(twilio)
///     .config(HeraldConfig::load(None)?)
///     .build()?;
/// ```
///
/// The store and transport are required. Clock defaults to the system
/// clock, ids to ULIDs drawn from that clock, settings to
/// `HeraldConfig::default()`.
pub struct EngineBuilder {
    store: Option<Arc<dyn QueueStore>>,
    transport: Option<Arc<dyn DeliveryTransport>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: HeraldConfig,
    retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no queue store configured")]
    MissingStore,

    #[error("no delivery transport configured")]
    MissingTransport,

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            transport: None,
            clock: None,
            ids: None,
            config: HeraldConfig::default(),
            retry_policy: None,
        }
    }

    pub fn store(self, store: impl QueueStore + 'static) -> Self {
        self.shared_store(Arc::new(store))
    }

    pub fn shared_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(self, transport: impl DeliveryTransport + 'static) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    pub fn shared_transport(mut self, transport: Arc<dyn DeliveryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Replace all settings. Individual setters below override on top.
    pub fn config(mut self, config: HeraldConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.engine.max_retries = max_retries;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.engine.send_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Use `policy` instead of the one derived from `config.retry`.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<QueueEngine, BuildError> {
        self.config.validate()?;

        let store = self.store.ok_or(BuildError::MissingStore)?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let retry_policy = self
            .retry_policy
            .unwrap_or_else(|| RetryPolicy::from(&self.config.retry));

        Ok(QueueEngine::new(
            store,
            transport,
            clock,
            ids,
            retry_policy,
            self.config.engine.max_retries,
            self.config.send_timeout(),
        ))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
