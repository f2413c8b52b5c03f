//! Runtime configuration and the invocation loop.

pub mod config;
pub mod invocation;
mod runner;

pub use config::{Config, ConfigError};
pub use invocation::{FetchRejected, Invocation};
pub use runner::{Cycle, Runtime, RuntimeError, TRACE_ID_ENV};
