pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::ClarityConfig;
pub use error::{ClarityError, GenerationFailureKind, RemoteFailure, Result};
pub use events::EventBus;
pub use types::*;
