//! Result persistence and command orchestration for the Traverse runtime.

pub mod orchestrator;
pub mod persist;

pub use orchestrator::{Notifier, Orchestrator};
pub use persist::{OUTPUT_DIR, PersistError, persist};
