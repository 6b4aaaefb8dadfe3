//! Shared runtime configuration for the cavlock workspace: deterministic
//! random sources for exploration policies and tracing initialisation.

pub mod determinism;
pub mod tracing;
