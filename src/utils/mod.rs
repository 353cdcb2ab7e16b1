pub mod fingerprint;
pub mod metrics;

// Re-export commonly used items
pub use fingerprint::fingerprint;
pub use metrics::Metrics;
