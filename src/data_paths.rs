//! Purpose: Shared data-directory path resolution helpers.
//! Exports: `default_data_dir`.
//! Role: Keep CLI and library defaults aligned from one source.
//! Invariants: Default data directory remains `~/.fieldstore/data`.

use std::path::PathBuf;

pub(crate) fn default_data_dir() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".fieldstore").join("data")
}
