pub mod analysis_pipeline;
pub mod reminder_dispatcher;

pub use analysis_pipeline::{AnalyzeRequest, DrinkAnalysis, DrinkAnalyzer};
pub use reminder_dispatcher::{DispatchDetail, DispatchReport, DispatchStatus, ReminderDispatcher};
