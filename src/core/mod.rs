// src/core/mod.rs

//! # Orchestration Core
//!
//! - **`task_runner`**: stable task ids, one live surface per id, one terminal
//!   record per run.
//! - **`provisioner`**: validates creation requests and provisions MCU, Yocto
//!   and autolinux projects.
//! - **`wizard`**: the cascading autolinux configuration state machine.
//! - **`backend`**: the workspace queries the wizard depends on.
//! - **`settings`**, **`paths`**, **`interpolator`**: persisted configuration
//!   and command templates.
//! - **`mcu_build`**, **`rev_pin`**: MCU build-and-copy and recipe revision pinning.

pub mod backend;
pub mod interpolator;
pub mod mcu_build;
pub mod paths;
pub mod provisioner;
pub mod rev_pin;
pub mod settings;
pub mod task_runner;
pub mod wizard;
