#![allow(dead_code)]

//! Sample steps and jobs shared by the integration tests.
//!
//! The steps model a tiny forum import: `Users`, `TopicUsers` (depends on
//! `Users`) and `Categories` (priority 1). Their behaviour is driven by
//! `[settings]` keys so the same types serve serial and parallel runs.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::bail;
use convoy::convert::{StepDefinition, StepSettings};
use convoy::errors::Result;
use convoy::step::{ItemSource, Job, ProgressStats, Step, Tracker};
use convoy::store::StagedRecord;
use serde_json::json;

/// Schema files for the sample steps, relative to a schema directory.
pub const SAMPLE_SCHEMA: &[(&str, &str)] = &[
    (
        "001_users.sql",
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    ),
    (
        "002_categories.sql",
        "CREATE TABLE categories (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
    ),
    (
        "topics/001_topic_users.sql",
        "CREATE TABLE topic_users (
            user_id INTEGER NOT NULL,
            topic_id INTEGER NOT NULL,
            PRIMARY KEY (user_id, topic_id)
        );",
    ),
];

pub fn write_sample_schema(dir: &Path) -> io::Result<()> {
    for (relative, sql) in SAMPLE_SCHEMA {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, sql)?;
    }
    Ok(())
}

fn setting_u64(settings: &StepSettings, key: &str, default: u64) -> u64 {
    settings
        .get(key)
        .and_then(|v| v.as_integer())
        .map(|v| v as u64)
        .unwrap_or(default)
}

fn setting_list(settings: &StepSettings, key: &str) -> Vec<u64> {
    settings
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_integer())
                .map(|v| v as u64)
                .collect()
        })
        .unwrap_or_default()
}

/// Stages users `1..=user_count` (default 3).
///
/// - ids in `failing_users` return an error,
/// - ids in `panicking_users` panic,
/// - ids in `suspicious_users` log a warning but are still staged.
#[derive(Debug, Clone)]
pub struct Users {
    pub count: u64,
    pub failing: Vec<u64>,
    pub panicking: Vec<u64>,
    pub suspicious: Vec<u64>,
}

impl Users {
    pub fn from_settings(settings: &StepSettings) -> anyhow::Result<Self> {
        Ok(Self {
            count: setting_u64(settings, "user_count", 3),
            failing: setting_list(settings, "failing_users"),
            panicking: setting_list(settings, "panicking_users"),
            suspicious: setting_list(settings, "suspicious_users"),
        })
    }

    pub fn definition() -> StepDefinition<Self> {
        StepDefinition::new(Self::from_settings)
    }
}

impl Step for Users {
    type Item = u64;

    fn max_progress(&self) -> Option<u64> {
        Some(self.count)
    }

    fn items(&self) -> anyhow::Result<ItemSource<u64>> {
        Ok(Box::new(1..=self.count))
    }

    fn process_item(
        &mut self,
        id: u64,
        tracker: &mut Tracker,
    ) -> anyhow::Result<Vec<StagedRecord>> {
        if self.failing.contains(&id) {
            bail!("user {id} has no email address");
        }
        if self.panicking.contains(&id) {
            panic!("user {id} broke the converter");
        }
        if self.suspicious.contains(&id) {
            tracker.log_warning("suspicious user", None, Some(json!({ "id": id })));
        }
        Ok(vec![
            StagedRecord::new("users")
                .with("id", id as i64)
                .with("name", format!("user-{id}")),
        ])
    }
}

/// Stages one `topic_users` row per user for topic 1.
#[derive(Debug, Clone)]
pub struct TopicUsers {
    pub count: u64,
}

impl TopicUsers {
    pub fn definition() -> StepDefinition<Self> {
        StepDefinition::new(|settings| {
            Ok(Self {
                count: setting_u64(settings, "user_count", 3),
            })
        })
    }
}

impl Step for TopicUsers {
    type Item = (u64, u64);

    const DEPENDENCIES: &'static [&'static str] = &["Users"];

    fn items(&self) -> anyhow::Result<ItemSource<(u64, u64)>> {
        Ok(Box::new((1..=self.count).map(|user| (user, 1))))
    }

    fn process_item(
        &mut self,
        (user_id, topic_id): (u64, u64),
        _tracker: &mut Tracker,
    ) -> anyhow::Result<Vec<StagedRecord>> {
        Ok(vec![
            StagedRecord::new("topic_users")
                .with("user_id", user_id as i64)
                .with("topic_id", topic_id as i64),
        ])
    }
}

/// Stages categories `1..=category_count` (default 2). Runs before other
/// ready steps.
#[derive(Debug, Clone)]
pub struct Categories {
    pub count: u64,
}

impl Categories {
    pub fn definition() -> StepDefinition<Self> {
        StepDefinition::new(|settings| {
            Ok(Self {
                count: setting_u64(settings, "category_count", 2),
            })
        })
    }
}

impl Step for Categories {
    type Item = u64;

    const PRIORITY: Option<u32> = Some(1);

    fn title(&self) -> String {
        "Importing categories".to_string()
    }

    fn items(&self) -> anyhow::Result<ItemSource<u64>> {
        Ok(Box::new(1..=self.count))
    }

    fn process_item(
        &mut self,
        id: u64,
        tracker: &mut Tracker,
    ) -> anyhow::Result<Vec<StagedRecord>> {
        tracker.log_info("staging category", None, Some(json!({ "id": id })));
        Ok(vec![
            StagedRecord::new("categories")
                .with("id", id as i64)
                .with("name", format!("category-{id}")),
        ])
    }
}

/// A [`Job`] that appends one line per lifecycle event to a file, so tests
/// can observe what happened inside a forked worker.
///
/// Events: `setup`, `run <item>`, `cleanup`. Items in `fail_on` report an
/// error in their stats; reaching `exit_on` terminates the process.
#[derive(Debug, Clone)]
pub struct RecordingJob {
    pub events: PathBuf,
    pub fail_on: Vec<u64>,
    pub exit_on: Option<u64>,
}

impl RecordingJob {
    pub fn new(events: impl Into<PathBuf>) -> Self {
        Self {
            events: events.into(),
            fail_on: Vec::new(),
            exit_on: None,
        }
    }

    pub fn failing_on(mut self, items: &[u64]) -> Self {
        self.fail_on = items.to_vec();
        self
    }

    pub fn exiting_on(mut self, item: u64) -> Self {
        self.exit_on = Some(item);
        self
    }

    fn record(&self, event: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events)?;
        writeln!(file, "{event}")?;
        Ok(())
    }
}

impl Job for RecordingJob {
    type Item = u64;

    fn setup(&mut self) -> Result<()> {
        self.record("setup")
    }

    fn run(&mut self, item: u64) -> Result<ProgressStats> {
        if self.exit_on == Some(item) {
            std::process::exit(3);
        }
        self.record(&format!("run {item}"))?;
        let mut stats = ProgressStats::new();
        if self.fail_on.contains(&item) {
            stats.error_count = 1;
        }
        Ok(stats)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.record("cleanup")
    }
}

/// Lines written by a [`RecordingJob`]; empty if the file does not exist.
pub fn read_events(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
