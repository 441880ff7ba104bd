//! `axon` provisions MCU, Yocto and autolinux build projects and drives the
//! shell tasks that build and flash them.

include!(concat!(env!("OUT_DIR"), "/translations.rs"));

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared cancellation flag. Setting it asks every long-running operation that
/// holds a clone to stop at its next check.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod protocol;
pub mod system;
