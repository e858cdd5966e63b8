//! # Controller
//!
//! Core controller modules for the Cluster API provider operator.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `reconciler`: Core reconciliation logic

pub mod backoff;
pub mod reconciler;
