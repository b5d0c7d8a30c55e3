//! APV backend HTTP service.
//!
//! Hosts the APV API behind a fixed request pipeline and a MongoDB connection
//! that must be verified before the listener is bound.
//!
//! # Pipeline
//!
//! ```text
//! origin admission -> maintenance gate -> JSON body -> access log -> dispatch
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`policy`]: Origin and maintenance decisions
//! - [`api`]: Request pipeline, handlers and routing
//! - [`database`]: MongoDB connection and health state
//! - [`bootstrap`]: Startup sequence
//! - [`faults`]: Process-wide fault observers
//! - [`metrics`]: Prometheus metrics
//! - [`utils`]: Utility functions

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod database;
pub mod error;
pub mod faults;
pub mod metrics;
pub mod policy;
pub mod utils;

pub use bootstrap::{Bootstrap, Phase, Running};
pub use config::Config;
pub use error::{ApiError, AppError, Result};
