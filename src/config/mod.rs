//! # Configuration
//!
//! Operator configuration loaded once at startup from environment variables.

mod controller;

pub use controller::{parse_variable_list, ControllerConfig};
