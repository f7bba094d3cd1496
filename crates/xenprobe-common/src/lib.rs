//! Shared plumbing for the xenprobe workspace.
//!
//! Every collaborator in xenprobe (the hypervisor CLI, bridge control, the
//! route dump, the echo probe) is an external program. This crate provides
//! the one place where those programs are spawned and their failures are
//! turned into typed errors.

pub mod tool;

pub use tool::{describe, run_tool, ToolError, ToolOutput};
