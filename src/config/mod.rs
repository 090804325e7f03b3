//! Configuration module
//!
//! Parser and driver settings, loaded from TOML or YAML and validated once
//! before anything is constructed.

mod settings;

pub use settings::{save_toml, CommandTable, DriverConfig, ParserConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the configuration directory searched for `parser.toml` / `driver.toml`
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("org", "oceanlink", "Oceanlink").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Resolve a config file name: an existing path is used as is, otherwise it
/// is looked up in [`config_dir`]
pub fn resolve(name: &str) -> Option<PathBuf> {
    let path = PathBuf::from(name);
    if path.exists() {
        return Some(path);
    }
    config_dir().map(|dir| dir.join(name)).filter(|p| p.exists())
}
