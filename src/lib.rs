//! Bootstrap a self-contained interpreter runtime under one application root
//! and supervise the backend process that runs on it.

pub mod archive;
pub mod backend;
pub mod config;
pub mod context;
pub mod deps;
pub mod download;
pub mod elevation;
pub mod error;
pub mod layout;
pub mod lock;
pub mod mirrors;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod progress;
pub mod repo;
pub mod toolchain;
pub mod utils;
pub mod vcs;

pub use context::Context;
pub use error::{BootError, Result};
pub use orchestrator::{BootstrapOptions, OperationResult, Orchestrator};
