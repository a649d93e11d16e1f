//! nschannel: run packaged scripts inside the namespaces of a running process
//! Enters the PID/mount/network namespaces of a target through the `nsexec`
//! helper, records a terminal transcript, and returns a structured response.
//!
//! # Architecture
//!
//! ## Channel ([`channel`])
//! - [`channel::NamespaceChannel`]: pipeline orchestration, `run_script` / `run`
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::namespace`]: namespace-entry flags for the helper
//! - [`kernel::signal`]: process-tree termination on deadline expiry
//!
//! ## Execution Pipeline ([`exec`])
//! - [`exec::stager`]: package format check, extraction, entry point lookup
//! - [`exec::privilege`]: entry point permission normalization
//! - [`exec::recording`]: transcript recording wrapper
//! - [`exec::executor`]: deadline-bounded helper execution
//! - [`exec::decoder`]: response decoding with local fallback
//!
//! ## Process Inspection ([`inspect`])
//! - [`inspect::ProcessInspector`]: discovery/probing capability
//! - [`inspect::procfs`]: `/proc`-backed implementation
//! - [`inspect::fake`]: table-driven implementation for tests
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Structured audit events
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: Configuration loading and validation
//! - [`config::types`]: Requests, responses, and error types

// Kernel Primitives
pub mod kernel;

// Execution Pipeline
pub mod exec;

// Process Inspection
pub mod inspect;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Orchestration
pub mod channel;

// CLI entrypoint wiring for the nschannel binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use channel::NamespaceChannel;
pub use config::config::ChannelConfig;
pub use config::types::*;
