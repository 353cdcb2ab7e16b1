// Custom error types for the hydration backend
//
// Using thiserror for ergonomic error definitions with:
// - Type-safe error matching (quota vs. upstream vs. store)
// - Source error chaining

use thiserror::Error;

use crate::core::types::ScanLimitKind;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown store backend '{0}' (expected 'memory' or 'supabase')")]
    UnknownStoreBackend(String),

    #[error("Supabase backend requires {0} to be set")]
    MissingSupabaseSetting(&'static str),

    #[error("Invalid analysis config: {0}")]
    InvalidAnalysisConfig(String),

    #[error("Invalid reminder config: {0}")]
    InvalidReminderConfig(String),

    #[error("LLM temperature must be in [0.0, 2.0], got {0}")]
    InvalidTemperature(f32),

    #[error("Invalid snapshot path: {0}")]
    InvalidSnapshotPath(String),
}

/// Errors raised by the external store (in-memory or hosted)
#[derive(Debug, Error)]
pub enum StoreError {
    /// Distinguished quota signal from the accounting procedure
    #[error("Daily scan limit exceeded")]
    LimitExceeded,

    #[error("Store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Store returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed store row: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Snapshot I/O failed for {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from remote services (vision, LLM, push delivery)
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{service} request failed: {source}")]
    Request {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response invalid: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },
}

/// Drink image analysis errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No image provided")]
    MissingImage,

    #[error("Daily scan limit of {limit} exceeded ({})", .kind.as_str())]
    LimitExceeded { kind: ScanLimitKind, limit: u32 },

    #[error("Visual feature extraction failed: {0}")]
    Vision(#[source] UpstreamError),

    #[error("Drink interpretation failed: {0}")]
    Interpretation(#[source] UpstreamError),

    #[error("Scan accounting failed: {0}")]
    Accounting(#[source] StoreError),
}

/// Reminder dispatch errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Fatal for the whole run
    #[error("Failed to list coaching users: {0}")]
    UserListing(#[source] StoreError),

    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Push delivery failed: {0}")]
    Push(#[from] UpstreamError),
}

// Convenience type aliases for Results
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type UpstreamResult<T> = Result<T, UpstreamError>;
pub type AnalyzeResult<T> = Result<T, AnalysisError>;
pub type DispatchResult<T> = Result<T, DispatchError>;
