//! Cluster API Provider Operator Library
//!
//! Installs and upgrades Cluster API providers from versioned manifest
//! ConfigMaps. Tests are included in the module files and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use capi_provider_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod apply;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod platform;
pub mod prelude;
pub mod provider;
pub mod runtime;
pub mod server;
