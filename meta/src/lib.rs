//! The v2e `meta` orchestration core, exposed as a library for its own
//! integration tests under `tests/`. `main.rs` wires these same modules
//! into the running binary.

pub mod controllers;
pub mod core;
pub mod registration;
pub mod rpc_executor;
