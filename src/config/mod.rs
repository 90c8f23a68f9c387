//! Configuration management module
//!
//! Loads the controller's TOML configuration file into nested,
//! per-concern structs.

mod configuration;

pub use configuration::*;
