//! # Runtime
//!
//! Process bootstrap and the controller watch loop.
//!
//! - `initialization`: tracing, metrics, HTTP server, Kubernetes client and reconciler setup
//! - `watch_loop`: the `kube_runtime` controller over provider ConfigMaps
//! - `error_policy`: Fibonacci backoff for failed reconciles

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
