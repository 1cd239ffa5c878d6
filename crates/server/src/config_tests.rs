// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use super::*;

fn parse(args: &[&str]) -> Config {
    let mut argv = vec!["quay"];
    argv.extend_from_slice(args);
    Config::parse_from(argv)
}

#[test]
fn defaults_validate() {
    let config = parse(&[]);
    assert!(config.validate().is_ok());
    assert_eq!(config.port, 8080);
    assert_eq!(config.scrollback_lines, 50_000);
    assert_eq!(config.buffer_persist_interval_ms, 5_000);
    assert_eq!(config.max_shells, 400);
}

#[test]
fn rejects_unknown_log_level() {
    let config = parse(&["--log-level", "verbose"]);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_unknown_log_format() {
    let config = parse(&["--log-format", "xml"]);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_zero_scrollback() {
    let config = parse(&["--scrollback-lines", "0"]);
    assert!(config.validate().is_err());
}

#[test]
fn fatal_maps_to_error_level() {
    let config = parse(&["--log-level", "fatal"]);
    assert!(config.validate().is_ok());
    assert_eq!(config.tracing_level(), "error");
}

#[test]
fn cleanup_knobs_parse() {
    let config = parse(&[
        "--shell-idle-timeout-ms",
        "1000",
        "--max-shells",
        "5",
        "--shell-cleanup-interval-ms",
        "2000",
    ]);
    assert!(config.validate().is_ok());
    assert_eq!(config.shell_idle_timeout_ms, 1000);
    assert_eq!(config.max_shells, 5);
    assert_eq!(config.shell_cleanup_interval_ms, 2000);
}
