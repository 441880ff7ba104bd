//! # System Interaction Layer
//!
//! Boundary between the orchestration core and the operating system.
//!
//! ## Modules
//!
//! - **`executor`**: spawns shell commands on the tokio runtime, captures or
//!   echoes their output, and kills them when the cancellation token is set.
//! - **`shell`**: script-file wrapping for commands whose text must stay
//!   hidden, the default shell, and terminal echo helpers.

pub mod executor;
pub mod shell;
