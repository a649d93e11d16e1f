//! Observability
//!
//! Structured audit events for invocation lifecycle and forced kills.

pub mod audit;
