//! CLI command implementations.

pub mod down;
pub mod run;
pub mod status;
