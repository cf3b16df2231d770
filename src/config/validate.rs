// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::{self, canonical_name};
use crate::errors::{ConvoyError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ConvoyError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.pipeline, raw.step, raw.settings))
    }
}

/// Re-run validation on an already built config, e.g. after CLI overrides
/// changed `skip` / `only`.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    let raw = RawConfigFile {
        pipeline: cfg.pipeline.clone(),
        step: cfg.step.clone(),
        settings: cfg.settings.clone(),
    };
    validate_raw_config(&raw)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_pipeline(cfg)?;
    validate_step_names(cfg)?;
    validate_step_dependencies(cfg)?;
    validate_dag(cfg)?;
    validate_selection(cfg)?;
    Ok(())
}

fn validate_pipeline(cfg: &RawConfigFile) -> Result<()> {
    let p = &cfg.pipeline;
    if p.workers == 0 {
        return Err(ConvoyError::ConfigError(
            "[pipeline].workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if p.batch_size == 0 {
        return Err(ConvoyError::ConfigError(
            "[pipeline].batch_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if p.statement_cache_size == 0 {
        return Err(ConvoyError::ConfigError(
            "[pipeline].statement_cache_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

/// `[step.TopicUsers]` and `[step.topic_users]` name the same step.
fn validate_step_names(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for name in cfg.step.keys() {
        if !seen.insert(canonical_name(name)) {
            return Err(ConvoyError::ConfigError(format!(
                "step '{}' is declared more than once",
                canonical_name(name)
            )));
        }
    }
    Ok(())
}

fn validate_step_dependencies(cfg: &RawConfigFile) -> Result<()> {
    let known: HashSet<String> = cfg.step.keys().map(|n| canonical_name(n)).collect();
    for (name, step) in cfg.step.iter() {
        for dep in step.after.iter() {
            let dep = canonical_name(dep);
            if !known.contains(&dep) {
                return Err(ConvoyError::ConfigError(format!(
                    "step '{}' has unknown dependency '{}' in `after`",
                    name, dep
                )));
            }
            if dep == canonical_name(name) {
                return Err(ConvoyError::ConfigError(format!(
                    "step '{}' cannot depend on itself in `after`",
                    name
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawConfigFile) -> Result<()> {
    let descriptors: Vec<_> = cfg
        .step
        .iter()
        .map(|(name, step)| step.descriptor(name))
        .collect();
    dag::sort(&descriptors)?;
    Ok(())
}

/// `skip` / `only` must name declared steps. Without any `[step.*]`
/// sections the steps are only known once registered in code, so the check
/// is left to the converter.
fn validate_selection(cfg: &RawConfigFile) -> Result<()> {
    if cfg.step.is_empty() {
        return Ok(());
    }
    let descriptors: Vec<_> = cfg
        .step
        .iter()
        .map(|(name, step)| step.descriptor(name))
        .collect();
    dag::filter(&descriptors, &cfg.pipeline.skip, &cfg.pipeline.only)?;
    Ok(())
}
