use std::path::Path;

use convoy::convert::{ConvertOptions, Converter, StepReport, worker_store_path};
use convoy::errors::ConvoyError;
use convoy::step::LogKind;
use convoy::step::job::ITEM_FAILED_MESSAGE;
use convoy_test_utils::builders::ConfigFileBuilder;
use convoy_test_utils::steps::{Categories, TopicUsers, Users};

mod common;

use common::{Workspace, count_rows, files_with_prefix};

fn converter(ws: &Workspace, builder: ConfigFileBuilder) -> Converter {
    let cfg = builder
        .database(&ws.database)
        .schema_dir(&ws.schema)
        .build();
    let mut converter = Converter::from_config(&cfg);
    converter
        .register(Users::definition())
        .register(TopicUsers::definition())
        .register(Categories::definition());
    converter
}

fn report<'a>(reports: &'a [StepReport], name: &str) -> &'a StepReport {
    reports
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no report for {name}"))
}

#[test]
fn test_steps_register_under_canonical_names() {
    let ws = Workspace::new();
    let converter = converter(&ws, ConfigFileBuilder::new());
    assert_eq!(
        converter.step_names(),
        vec!["users", "topic_users", "categories"]
    );
    assert_eq!(converter.options().workers, 1);
}

#[test]
fn test_plan_orders_by_dependencies_then_priority() {
    let ws = Workspace::new();
    let converter = converter(&ws, ConfigFileBuilder::new());
    assert_eq!(
        converter.plan().unwrap(),
        vec!["categories", "users", "topic_users"]
    );
}

#[test]
fn test_plan_with_only_pulls_in_dependencies() {
    let ws = Workspace::new();
    let converter = converter(&ws, ConfigFileBuilder::new().only("TopicUsers"));
    assert_eq!(converter.plan().unwrap(), vec!["users", "topic_users"]);
}

#[test]
fn test_serial_run_stages_every_step() {
    let ws = Workspace::new();
    let converter = converter(
        &ws,
        ConfigFileBuilder::new()
            .setting("user_count", 4)
            .setting("failing_users", vec![2])
            .setting("suspicious_users", vec![3]),
    );

    let reports = converter.run().unwrap();
    let order: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(order, vec!["categories", "users", "topic_users"]);

    assert_eq!(count_rows(&ws.database, "categories"), 2);
    assert_eq!(count_rows(&ws.database, "users"), 3);
    assert_eq!(count_rows(&ws.database, "topic_users"), 4);

    let users = report(&reports, "users");
    assert_eq!(users.title, "Converting users");
    assert_eq!(users.items, 4);
    assert_eq!(users.totals.progress, 4);
    assert_eq!(users.totals.warning_count, 1);
    assert_eq!(users.totals.error_count, 1);
    assert!(users.has_errors());
    let kinds: Vec<LogKind> = users.log.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![LogKind::Error, LogKind::Warning]);
    assert_eq!(users.log[0].message, ITEM_FAILED_MESSAGE);

    // Info entries are not kept in reports.
    let categories = report(&reports, "categories");
    assert_eq!(categories.title, "Importing categories");
    assert!(categories.log.is_empty());
    assert!(!categories.has_errors());
}

#[test]
fn test_panicking_items_do_not_stop_the_step() {
    let ws = Workspace::new();
    let converter = converter(
        &ws,
        ConfigFileBuilder::new()
            .only("users")
            .setting("panicking_users", vec![1]),
    );

    let reports = converter.run().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].totals.error_count, 1);
    assert_eq!(count_rows(&ws.database, "users"), 2);
}

#[test]
fn test_skipped_dependency_is_treated_as_done() {
    let ws = Workspace::new();
    let converter = converter(&ws, ConfigFileBuilder::new().skip("Users"));

    assert_eq!(converter.plan().unwrap(), vec!["categories", "topic_users"]);

    let reports = converter.run().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(count_rows(&ws.database, "users"), 0);
    assert_eq!(count_rows(&ws.database, "topic_users"), 3);
}

#[test]
fn test_unknown_step_names_fail_before_the_store_is_opened() {
    let ws = Workspace::new();
    let mut converter = Converter::new(
        ConvertOptions {
            database: ws.database.clone(),
            schema_dir: Some(ws.schema.clone()),
            skip: vec!["badges".to_string()],
            ..ConvertOptions::default()
        },
        Default::default(),
    );
    converter.register(Users::definition());

    match converter.run() {
        Err(ConvoyError::UnknownSteps { missing, known }) => {
            assert_eq!(missing, vec!["badges"]);
            assert_eq!(known, vec!["users"]);
        }
        other => panic!("expected UnknownSteps, got {other:?}"),
    }
    assert!(!ws.database.exists());
}

#[test]
fn test_missing_registered_dependency_is_reported() {
    let ws = Workspace::new();
    let mut converter = Converter::new(
        ConvertOptions {
            database: ws.database.clone(),
            ..ConvertOptions::default()
        },
        Default::default(),
    );
    converter.register(TopicUsers::definition());

    assert!(matches!(
        converter.plan(),
        Err(ConvoyError::MissingDependency { .. })
    ));
}

#[test]
fn test_registering_a_step_twice_fails_planning() {
    let ws = Workspace::new();
    let mut converter = Converter::new(
        ConvertOptions {
            database: ws.database.clone(),
            schema_dir: Some(ws.schema.clone()),
            ..ConvertOptions::default()
        },
        Default::default(),
    );
    converter
        .register(Users::definition())
        .register(Users::definition());

    match converter.plan() {
        Err(ConvoyError::ConfigError(msg)) => assert!(msg.contains("more than once")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
    assert!(matches!(converter.run(), Err(ConvoyError::ConfigError(_))));
    assert!(!ws.database.exists());
}

#[test]
fn test_parallel_run_merges_worker_stores() {
    let _guard = common::fork_guard();
    let ws = Workspace::new();
    let converter = converter(
        &ws,
        ConfigFileBuilder::new()
            .workers(3)
            .setting("user_count", 20)
            .setting("failing_users", vec![5])
            .setting("suspicious_users", vec![7, 8]),
    );

    let reports = converter.run().unwrap();
    assert_eq!(reports.len(), 3);

    assert_eq!(count_rows(&ws.database, "categories"), 2);
    assert_eq!(count_rows(&ws.database, "users"), 19);
    assert_eq!(count_rows(&ws.database, "topic_users"), 20);

    let users = report(&reports, "users");
    assert_eq!(users.items, 20);
    assert_eq!(users.totals.error_count, 1);
    assert_eq!(users.totals.warning_count, 2);
    assert_eq!(users.log.len(), 3);
    assert!(
        users
            .log
            .iter()
            .any(|e| e.kind == LogKind::Error && e.message == ITEM_FAILED_MESSAGE)
    );

    // Worker store files are removed once merged.
    let worker_file = worker_store_path(&ws.database, 0);
    assert!(!worker_file.exists());
    assert!(files_with_prefix(ws.path(), "staging.sqlite3.worker-").is_empty());
}

#[test]
fn test_parallel_run_in_input_order() {
    let _guard = common::fork_guard();
    let ws = Workspace::new();
    let converter = converter(
        &ws,
        ConfigFileBuilder::new()
            .workers(2)
            .preserve_order(true)
            .only("users")
            .setting("user_count", 12)
            .setting("suspicious_users", vec![2, 9, 11]),
    );

    let reports = converter.run().unwrap();
    let details: Vec<i64> = reports[0]
        .log
        .iter()
        .filter_map(|e| e.details.as_ref()?.get("id")?.as_i64())
        .collect();
    assert_eq!(details, vec![2, 9, 11]);
    assert_eq!(count_rows(&ws.database, "users"), 12);
}

#[test]
fn test_worker_store_path_sits_next_to_the_main_store() {
    let path = worker_store_path(Path::new("/data/staging.sqlite3"), 2);
    assert_eq!(path, Path::new("/data/staging.sqlite3.worker-2"));
}
