//! api-mender library crate
//!
//! Exposes the validator, repairers and orchestrator so the CLI, the HTTP
//! server and the benchmarks share one implementation.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod repair;
pub mod report;
pub mod scan;
pub mod server;
pub mod staging;
pub mod syntax;
pub mod util;
pub mod workspace;

pub use config::Config;
pub use error::{MendError, Result};
pub use orchestrator::{FixType, Orchestrator};
