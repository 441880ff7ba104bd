// src/protocol/mod.rs

//! The dialog message protocol: JSON messages tagged by `command`, and the
//! per-dialog session that applies them.

pub mod messages;
pub mod session;
