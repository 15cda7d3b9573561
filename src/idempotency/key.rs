use crate::core::{CoreError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Method name fragments that mark an RPC as side-effecting.
const WRITE_METHOD_MARKERS: [&str; 9] = [
    "Create", "Update", "Delete", "Set", "AdminSet", "Close", "Reopen", "Join", "Leave",
];

const UNKNOWN_METHOD: &str = "unknown";

/// Whether an RPC method must carry an idempotency key.
pub fn is_write_method(method: &str) -> bool {
    WRITE_METHOD_MARKERS
        .iter()
        .any(|marker| method.starts_with(marker) || method.contains(marker))
}

/// Short stable digest of a request payload: SHA-256 of its JSON, first 8 bytes as hex.
pub fn payload_hash<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    let encoded = serde_json::to_vec(payload)?;
    let digest = Sha256::digest(&encoded);
    Ok(hex::encode(&digest[..8]))
}

/// Per-request idempotency scope: the called method and the caller's key, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotencyContext {
    method: Option<String>,
    explicit_key: Option<String>,
}

impl IdempotencyContext {
    pub fn new(method: &str) -> Self {
        let method = method.trim();
        Self {
            method: (!method.is_empty()).then(|| method.to_string()),
            explicit_key: None,
        }
    }

    /// Attaches the key sent by the caller. Blank keys count as absent.
    pub fn with_key(mut self, key: &str) -> Self {
        let key = key.trim();
        self.explicit_key = (!key.is_empty()).then(|| key.to_string());
        self
    }

    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or(UNKNOWN_METHOD)
    }

    pub fn explicit_key(&self) -> Option<&str> {
        self.explicit_key.as_deref()
    }

    /// Rejects write methods that arrive without a caller key.
    pub fn validate(&self) -> Result<()> {
        if self.explicit_key.is_none() && is_write_method(self.method()) {
            return Err(CoreError::InvalidInput(
                "missing idempotency key".to_string(),
            ));
        }
        Ok(())
    }

    /// The caller's key when present, otherwise `method[:parts...][:payload_hash]`.
    pub fn key_or_derive(&self, parts: &[&str], payload_hash: &str) -> String {
        if let Some(key) = &self.explicit_key {
            return key.clone();
        }

        let method = self.method();
        if parts.is_empty() && payload_hash.is_empty() {
            return method.to_string();
        }

        // Parts are joined as given, empty ones included, so positions stay stable.
        let joined = parts.join(":");
        match (joined.is_empty(), payload_hash.is_empty()) {
            (true, _) => format!("{method}:{payload_hash}"),
            (false, true) => format!("{method}:{joined}"),
            (false, false) => format!("{method}:{joined}:{payload_hash}"),
        }
    }
}
