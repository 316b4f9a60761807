//! Tash Settings Crate
//!
//! Handles configuration files: the executor and bus settings, loading and
//! saving them as JSON or TOML, and turning them into runtime configs.

pub mod config;
pub mod error;

pub use config::{BusSettings, Config, ExecutorSettings};
pub use error::{SettingsError, SettingsResult};
