// ── mdsaad Atoms: Error Types ──────────────────────────────────────────────
// Two layers of error:
//   • FabricError is the crate-wide enum, built with `thiserror`. Variants
//     are coarse-grained by domain (I/O, serialization, network, config).
//   • CallError is the dispatcher's taxonomy. The dispatcher is the only
//     point where provider-specific failures are unified into it; operation
//     adapters match on CallError to decide user-visible behavior.
// No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Dispatcher taxonomy ────────────────────────────────────────────────────

/// Why one candidate provider failed during a call. Collected so that an
/// exhausted failover can report every provider it tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub provider_id: String,
    pub reason: String,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider_id, self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// Caller-supplied argument failed validation. Not retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The capability has no enabled, configured provider.
    #[error("no providers available for '{capability}'")]
    NoProviders { capability: String },

    /// A proxy or provider throttled us. The caller may re-invoke later.
    #[error("rate limit exceeded, retry in {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// A non-429 4xx from upstream. Terminal: the fault is in the request
    /// and would be identical against every provider.
    #[error("upstream rejected the request ({status}): {message}")]
    Client { status: u16, message: String },

    /// Every candidate failed with a 5xx, network, TLS, or timeout error.
    #[error("all providers failed ({})", .reasons.len())]
    UpstreamUnavailable { reasons: Vec<AttemptFailure> },

    /// The operation's overall deadline expired mid-failover.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl CallError {
    /// Process exit code for this failure, per the CLI contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            CallError::InvalidInput(_) => 2,
            CallError::NoProviders { .. } | CallError::UpstreamUnavailable { .. } => 3,
            CallError::RateLimited { .. } => 4,
            CallError::Cancelled => 130,
            CallError::Client { .. } | CallError::DeadlineExceeded => 1,
        }
    }

    /// One-sentence remediation hint rendered beside the error line.
    pub fn hint(&self) -> &'static str {
        match self {
            CallError::InvalidInput(_) => "Check the command arguments and try again.",
            CallError::NoProviders { .. } => {
                "Configure a provider API key in ~/.mdsaad/config.json or via environment variables."
            }
            CallError::RateLimited { .. } => "Wait a moment before retrying.",
            CallError::Client { .. } => "Verify your API key and request parameters.",
            CallError::UpstreamUnavailable { .. } => {
                "All upstream services are unreachable; try again shortly."
            }
            CallError::DeadlineExceeded => "The operation timed out; retry or raise the timeout.",
            CallError::Cancelled => "The operation was interrupted.",
        }
    }
}

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FabricError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Upstream provider HTTP or API-level failure.
    #[error("provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// A dispatcher call failed with a classified error.
    #[error(transparent)]
    Call(#[from] CallError),

    /// Configuration is invalid or missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// A URL failed the transport policy (scheme, parse).
    #[error("rejected URL: {0}")]
    Url(String),

    /// Catch-all for errors without a dedicated variant. Prefer adding a
    /// specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl FabricError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Process exit code for the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            FabricError::Call(e) => e.exit_code(),
            FabricError::Config(_) | FabricError::Url(_) => 2,
            _ => 1,
        }
    }
}

impl From<String> for FabricError {
    fn from(s: String) -> Self {
        FabricError::Other(s)
    }
}

impl From<&str> for FabricError {
    fn from(s: &str) -> Self {
        FabricError::Other(s.to_string())
    }
}

/// All fabric operations return this type.
pub type FabricResult<T> = Result<T, FabricError>;
