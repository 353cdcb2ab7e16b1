pub mod schedule;
pub mod templates;

pub use schedule::{is_due, local_clock, parse_slot_time, resolve_timezone, scheduled_time_key, LocalClock};
pub use templates::{fallback_message, render, select_template, ReminderContext, TemplateKind};
