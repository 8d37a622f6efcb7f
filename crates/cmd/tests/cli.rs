// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use cmd::{QueryArgs, plan_command, query_command, schema_command};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const STATIONS: &str = "\
id,name,elevation
S1,alpha,12
S2,beta,40
S3,gamma,7
";

const OBSERVATIONS: &str = "\
station,time,temperature,quality
S1,2024-01-01T00:00:00Z,11.5,good
S1,2024-01-01T01:00:00Z,12.5,good
S2,2024-01-01T00:00:00Z,9.25,suspect
";

fn setup(extra: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stations.csv"), STATIONS).unwrap();
    std::fs::write(dir.path().join("observations.csv"), OBSERVATIONS).unwrap();
    let config = dir.path().join("store.yaml");
    std::fs::write(
        &config,
        format!(
            "vector: stations.csv\nobservations: observations.csv\nfeature_id_column: id\nstation_attribute: id\n{extra}"
        ),
    )
    .unwrap();
    (dir, config)
}

fn capture(run: impl FnOnce(&mut dyn FnMut(&str)) -> anyhow::Result<()>) -> String {
    let mut output = String::new();
    run(&mut |s: &str| output.push_str(s)).unwrap();
    output
}

fn args(select: &str, time: Option<&str>) -> QueryArgs {
    QueryArgs {
        select: Some(select.to_string()),
        time: time.map(str::to_string),
        ..QueryArgs::default()
    }
}

fn run_query(config: &Path, args: &QueryArgs) -> String {
    capture(|handler| query_command(config, args, handler))
}

#[test]
fn test_schema_lists_both_origins() {
    let (_dir, config) = setup("");
    let output = capture(|handler| schema_command(&config, handler));

    let lines: Vec<&str> = output.lines().collect();
    assert!(lines[0].starts_with("NAME"));
    let names: Vec<&str> = lines[1..]
        .iter()
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    assert_eq!(
        names,
        vec!["id", "name", "elevation", "time", "temperature", "quality"]
    );
    assert!(output.contains("external time (time)"));
    assert!(output.contains("external quality (categorical)"));
}

#[test]
fn test_plan_for_join() {
    let (_dir, config) = setup("");
    let query = args("name,temperature", Some("2024-01-01T00:00:00Z"));
    let output = capture(|handler| plan_command(&config, &query, handler));
    assert!(output.starts_with("join vector [name, id]"), "{output}");
}

#[test]
fn test_query_left_join() {
    let (_dir, config) = setup("");
    let output = run_query(
        &config,
        &args("name,temperature,quality", Some("2024-01-01T00:00:00Z")),
    );

    let row = |name: &str| {
        output
            .lines()
            .find(|l| l.contains(name))
            .unwrap_or_else(|| panic!("no row for {name} in\n{output}"))
            .to_string()
    };
    assert!(row("alpha").contains("11.5"));
    assert!(row("alpha").contains("good"));
    assert!(row("beta").contains("9.25"));
    assert!(row("beta").contains("suspect"));
    assert!(!row("gamma").contains('.'));
}

#[test]
fn test_query_latest_by_default() {
    let (_dir, config) = setup("");
    let output = run_query(&config, &args("name,temperature", None));
    let alpha = output.lines().find(|l| l.contains("alpha")).unwrap();
    assert!(alpha.contains("12.5"), "{output}");
}

#[test]
fn test_query_rejects_missing_time() {
    let (_dir, config) = setup("missing_timestamp: reject\n");
    let mut sink = |_: &str| {};
    let err = query_command(&config, &args("name,temperature", None), &mut sink).unwrap_err();
    assert!(format!("{err:#}").contains("time"), "{err:#}");

    // Vector-only reads still work
    let output = run_query(&config, &args("name", None));
    assert!(output.contains("gamma"));
}

#[test]
fn test_query_time_only() {
    let (_dir, config) = setup("");
    let query = QueryArgs {
        select: Some("time".to_string()),
        from: Some("2024-01-01T00:30:00Z".to_string()),
        to: Some("2024-01-02T00:00:00Z".to_string()),
        ..QueryArgs::default()
    };
    let plan = capture(|handler| plan_command(&config, &query, handler));
    assert_eq!(plan.trim(), "timestamp-only");

    let output = run_query(&config, &query);
    assert!(output.contains("2024-01-01T01:00:00"), "{output}");
    assert!(!output.contains("2024-01-01T00:00:00"), "{output}");
}

#[test]
fn test_unknown_attribute() {
    let (_dir, config) = setup("");
    let mut sink = |_: &str| {};
    let err = query_command(&config, &args("salinity", None), &mut sink).unwrap_err();
    assert!(err.to_string().contains("salinity"));
}
