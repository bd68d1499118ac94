pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod scraper;
pub mod server;
pub mod session;
pub mod transcript;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use orchestrator::{Orchestrator, ResponseKind, SkipReason, TurnOutcome};
pub use session::{ApiKey, Session, SessionStore};
pub use transcript::{Message, Role, Transcript};
