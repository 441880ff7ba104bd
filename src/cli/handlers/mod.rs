// src/cli/handlers/mod.rs

// One module per top-level command, plus shared helpers.

pub mod commons;
pub mod config;
pub mod create;
pub mod info;
pub mod mcu_build;
pub mod pin_rev;
pub mod run;
pub mod serve;
