//! cluster-features: feature reconciliation engine for a Kubernetes
//! distribution's control-plane daemon
//!
//! Converges optional cluster capabilities (pod network, Gateway API,
//! ingress, load balancer, local storage, metrics-server, DNS) to a desired
//! configuration through chart releases and reports one status per feature.

pub mod chart;
pub mod config;
pub mod controller;
pub mod env;
pub mod error;
pub mod features;
pub mod kubernetes;
pub mod telemetry;

pub use crate::error::{Error, Result};
