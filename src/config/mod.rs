// src/config/mod.rs

//! Configuration loading and validation for convoy.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate pipeline settings and the declared step graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, default_config_path, load_and_validate, load_from_path};
pub use model::{ConfigFile, PipelineSection, RawConfigFile, StepConfig};
pub use validate::validate_config;
