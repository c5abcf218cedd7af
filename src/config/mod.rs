//! Configuration management module
//!
//! Loads the daemon's TOML configuration file into a typed tree with
//! serde defaults for every section.

mod config;

pub use config::*;
