// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Resolves relative `database` / `schema_dir` against the config file's
///   directory.
/// - Checks for:
///   - pipeline sanity (`workers`, `batch_size`, cache size),
///   - unknown or self `after` references,
///   - dependency cycles,
///   - `skip` / `only` names that match no declared step.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw_config = load_from_path(path)?;

    let root = config_root_dir(path);
    raw_config.pipeline.database = root.join(&raw_config.pipeline.database);
    raw_config.pipeline.schema_dir = raw_config.pipeline.schema_dir.map(|dir| root.join(dir));

    ConfigFile::try_from(raw_config)
}

/// `Convoy.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Convoy.toml")
}

/// Directory relative paths in a config file are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "configs/Convoy.toml"),
///   that directory is used.
/// - For a bare filename like "Convoy.toml" (parent = ""), paths stay
///   relative to the current working directory.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::new(),
    }
}
