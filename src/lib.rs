// Library exports for the hydration backend
//
// Two pipelines behind one HTTP server: drink photo analysis with a
// fingerprint cache and daily quota, and scheduled hydration reminders.

// Core modules
pub mod core;
pub mod http;
pub mod orchestration;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{AnalysisError, ConfigError, DispatchError, StoreError, UpstreamError},
    types::{AnalysisResult, ScanLimitKind, SubscriptionTier},
};

pub use orchestration::{DrinkAnalyzer, ReminderDispatcher};

pub use services::{ExpoPushClient, GoogleVisionClient, OpenAiInterpreter};

pub use storage::{MemoryStore, Store, SupabaseStore};

pub use utils::Metrics;
