#![allow(dead_code)]

use std::path::Path;

use convoy::config::{ConfigFile, PipelineSection, RawConfigFile, StepConfig};
use convoy::convert::StepSettings;
use convoy::errors::Result;
use convoy::store::ConflictPolicy;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection::default(),
                step: Default::default(),
                settings: StepSettings::new(),
            },
        }
    }

    pub fn with_step(mut self, name: &str, step: StepConfig) -> Self {
        self.config.step.insert(name.to_string(), step);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.pipeline.workers = workers;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.pipeline.batch_size = batch_size;
        self
    }

    pub fn database(mut self, path: impl AsRef<Path>) -> Self {
        self.config.pipeline.database = path.as_ref().to_path_buf();
        self
    }

    pub fn schema_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.pipeline.schema_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn skip(mut self, name: &str) -> Self {
        self.config.pipeline.skip.push(name.to_string());
        self
    }

    pub fn only(mut self, name: &str) -> Self {
        self.config.pipeline.only.push(name.to_string());
        self
    }

    pub fn preserve_order(mut self, val: bool) -> Self {
        self.config.pipeline.preserve_order = val;
        self
    }

    pub fn conflict_policy(mut self, table: &str, policy: ConflictPolicy) -> Self {
        self.config
            .pipeline
            .conflict_policies
            .insert(table.to_string(), policy);
        self
    }

    pub fn setting(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.config.settings.insert(key.to_string(), value.into());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StepConfig`.
pub struct StepConfigBuilder {
    step: StepConfig,
}

impl StepConfigBuilder {
    pub fn new() -> Self {
        Self {
            step: StepConfig::default(),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.step.after.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.step.priority = Some(priority);
        self
    }

    pub fn build(self) -> StepConfig {
        self.step
    }
}

impl Default for StepConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
