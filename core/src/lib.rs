pub mod args;
pub mod boundary;
pub mod config;
pub mod embedder;
pub mod error;
pub mod interpreter;
pub mod logging;
pub mod path;

#[cfg(test)]
mod test_helpers;

// Re-export the lifecycle API for convenience
pub use args::ArgumentVector;
pub use embedder::{Embedder, Phase, RunStatus, DEFAULT_EVENT_MESSAGE};
pub use error::EmbedError;
pub use interpreter::{Entry, Interpreter, Startup};
pub use logging::LogLevel;
