//! Kernel-facing primitives
//!
//! - [`namespace`]: namespace-entry flag composition for the nsexec helper
//! - [`signal`]: process-tree termination on deadline expiry

pub mod namespace;
pub mod signal;
