//! An out-of-the-box agent backed by a local Ollama server, with web
//! search, a clock, a calculator and optional long-term memory.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod error;
mod render;
#[cfg(feature = "cli")]
pub mod repl;
mod session;
pub mod tools;

pub use config::Config;
pub use error::{ConfigurationError, InitializationError, ValidationError};
pub use render::{Fragment, TranscriptRenderer};
pub use session::{Session, SessionBuilder, SessionConfig};

/// Re-exports of [`deep_agent_core`] crate.
pub mod core {
    pub use deep_agent_core::*;
}
