//! An abstraction layer for the model backends the agent can talk to.
//!
//! This crate establishes an unified protocol for the agent runtime to
//! interact with a model backend, so that the runtime can run against a
//! local Ollama server in production and a scripted model in tests
//! without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
