//! Execution pipeline stages
//!
//! Staging, permission normalization, transcript wrapping, deadline-bounded
//! execution, and response decoding.

pub mod decoder;
pub mod executor;
pub mod privilege;
pub mod recording;
pub mod stager;
