//! CLI commands

pub mod classify;
pub mod diff;
pub mod secrets;
pub mod template;
