pub mod drinks;
pub mod interpretation;
pub mod notifications;
pub mod push;
pub mod vision;

// Re-export commonly used services
pub use drinks::{categorize, DrinkCategory};
pub use interpretation::{InterpretationService, OpenAiInterpreter};
pub use push::{ExpoPushClient, PushMessage, PushOutcome, PushService};
pub use vision::{GoogleVisionClient, VisionService, VisualFeatures};
