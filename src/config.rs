use crate::core::{CoreError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Idempotency coordinator configuration
///
/// Defaults match the production contention policy: poll every 100ms,
/// doubling up to 500ms, give up after 30s.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Namespace prepended to every marker key
    pub key_prefix: String,

    /// First delay between polls of the done marker
    #[serde(with = "duration_ms", rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,

    /// Upper bound for the poll delay
    #[serde(with = "duration_ms", rename = "max_backoff_ms")]
    pub max_backoff: Duration,

    /// Total time a contending caller waits before `LockTimeout`
    #[serde(with = "duration_ms", rename = "max_wait_ms")]
    pub max_wait: Duration,

    /// Done marker retention as a multiple of the lock ttl
    pub done_ttl_multiplier: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "idem".to_string(),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            max_wait: Duration::from_secs(30),
            done_ttl_multiplier: 10,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the marker key namespace
    pub fn key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    /// Set the first poll delay
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the poll delay cap
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Set the contention wait bound
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = wait;
        self
    }

    /// Set the done marker retention multiplier
    pub fn done_ttl_multiplier(mut self, multiplier: u32) -> Self {
        self.done_ttl_multiplier = multiplier;
        self
    }

    pub fn processing_key(&self, key: &str) -> String {
        format!("{}:processing:{}", self.key_prefix, key)
    }

    pub fn done_key(&self, key: &str) -> String {
        format!("{}:done:{}", self.key_prefix, key)
    }

    pub fn done_ttl(&self, lock_ttl: Duration) -> Duration {
        lock_ttl.saturating_mul(self.done_ttl_multiplier)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.trim().is_empty() {
            return Err(invalid("key_prefix cannot be empty"));
        }
        if self.initial_backoff.is_zero() {
            return Err(invalid("initial_backoff must be > 0"));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(invalid("max_backoff cannot be below initial_backoff"));
        }
        if self.max_wait.is_zero() {
            return Err(invalid("max_wait must be > 0"));
        }
        if self.done_ttl_multiplier == 0 {
            return Err(invalid("done_ttl_multiplier must be > 0"));
        }
        Ok(())
    }
}

/// Membership synchronizer configuration
///
/// Names the two physical shapes of membership: the denormalized list field on
/// the parent and the normalized index subcollection under it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub parent_collection: String,
    pub member_list_field: String,
    pub index_collection: String,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            parent_collection: "sheets".to_string(),
            member_list_field: "member_ids".to_string(),
            index_collection: "members".to_string(),
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl MembershipConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent_collection(mut self, collection: &str) -> Self {
        self.parent_collection = collection.to_string();
        self
    }

    pub fn member_list_field(mut self, field: &str) -> Self {
        self.member_list_field = field.to_string();
        self
    }

    pub fn index_collection(mut self, collection: &str) -> Self {
        self.index_collection = collection.to_string();
        self
    }

    pub fn page_sizes(mut self, default_size: usize, max_size: usize) -> Self {
        self.default_page_size = default_size;
        self.max_page_size = max_size;
        self
    }

    /// Resolves a requested page size against the configured bounds.
    pub fn clamp_limit(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_page_size
        } else {
            requested.min(self.max_page_size)
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("parent_collection", &self.parent_collection),
            ("member_list_field", &self.member_list_field),
            ("index_collection", &self.index_collection),
        ] {
            if value.trim().is_empty() || value.contains('/') {
                return Err(invalid(&format!("{name} must be a single non-empty segment")));
            }
        }
        if self.default_page_size == 0 {
            return Err(invalid("default_page_size must be > 0"));
        }
        if self.default_page_size > self.max_page_size {
            return Err(invalid("default_page_size cannot exceed max_page_size"));
        }
        Ok(())
    }
}

/// Top-level configuration for the write-coordination core.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub coordinator: CoordinatorConfig,
    pub membership: MembershipConfig,
}

impl CoreConfig {
    /// Parse from a JSON document; absent keys keep their defaults.
    ///
    /// ```ignore
    /// let config = CoreConfig::from_json_str(r#"{"coordinator": {"max_wait_ms": 5000}}"#)?;
    /// ```
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| CoreError::InvalidInput(format!("parse config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        self.membership.validate()
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::InvalidInput(message.to_string())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
