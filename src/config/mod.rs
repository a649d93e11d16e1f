//! Configuration and shared types
//!
//! Channel configuration, request/response types, and the error taxonomy.

pub mod config;
pub mod types;
