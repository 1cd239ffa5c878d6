// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use super::*;

fn detector() -> StatusDetector {
    StatusDetector::new(DetectorConfig::default()).unwrap()
}

fn custom(id: &str, regex: &str, status: ActivityStatus, priority: i32) -> PatternSpec {
    PatternSpec {
        id: id.to_owned(),
        name: id.to_owned(),
        shell: "all".to_owned(),
        pattern: regex.to_owned(),
        status,
        priority,
        enabled: true,
    }
}

#[test]
fn default_status_is_idle() {
    let detector = detector();
    assert_eq!(detector.get_status("ses_unknown"), ActivityStatus::Idle);
}

#[test]
fn invalid_regex_fails_construction() {
    let config = DetectorConfig {
        custom_patterns: vec![custom("bad", "([unclosed", ActivityStatus::Error, 1)],
        ..DetectorConfig::default()
    };
    assert!(StatusDetector::new(config).is_err());
}

#[test]
fn password_prompt_transitions_to_waiting() {
    let detector = detector();
    let event = detector.detect("ses_a", b"user@host's password: ").unwrap();
    assert_eq!(event.previous, ActivityStatus::Idle);
    assert_eq!(event.next, ActivityStatus::Waiting);
    assert_eq!(event.matched_pattern.as_deref(), Some("SSH password prompt"));
    assert_eq!(detector.get_status("ses_a"), ActivityStatus::Waiting);
}

#[test]
fn implicit_transition_to_working_after_waiting() {
    // Password prompt, then unmatched output: the program resumed.
    let detector = detector();
    detector.detect("ses_a", b"Password: ").unwrap();
    let event = detector.detect("ses_a", b"mypassword accepted\n").unwrap();
    assert_eq!(event.previous, ActivityStatus::Waiting);
    assert_eq!(event.next, ActivityStatus::Working);
    assert!(event.matched_pattern.is_none());
}

#[test]
fn no_transition_when_status_unchanged() {
    let detector = detector();
    assert!(detector.detect("ses_a", b"Password: ").is_some());
    // Same prompt again: first match targets the current status.
    assert!(detector.detect("ses_a", b"\nPassword: ").is_none());
}

#[test]
fn whitespace_output_does_not_trigger_implicit_working() {
    let detector = detector();
    detector.set_status("ses_a", ActivityStatus::Waiting);
    assert!(detector.detect("ses_a", b"  \t ").is_none());
    assert_eq!(detector.get_status("ses_a"), ActivityStatus::Waiting);
}

#[test]
fn ansi_sequences_are_stripped_before_matching() {
    let detector = detector();
    let event = detector.detect("ses_a", b"\x1b[1mPassword\x1b[0m: ").unwrap();
    assert_eq!(event.next, ActivityStatus::Waiting);
}

#[test]
fn higher_priority_pattern_wins() {
    // Both patterns match "some error message"; the high-priority one
    // decides the transition even though the other targets error.
    let config = DetectorConfig {
        custom_patterns: vec![
            custom("low-error", "error", ActivityStatus::Error, 1),
            custom("high-error", "error", ActivityStatus::Waiting, 500),
        ],
        ..DetectorConfig::default()
    };
    let detector = StatusDetector::new(config).unwrap();
    let event = detector.detect("ses_a", b"some error message").unwrap();
    assert_eq!(event.next, ActivityStatus::Waiting);
    assert_eq!(event.matched_pattern.as_deref(), Some("high-error"));
}

#[test]
fn priority_ties_resolve_by_insertion_order() {
    let config = DetectorConfig {
        custom_patterns: vec![
            custom("tie-first", "zebra", ActivityStatus::Working, 700),
            custom("tie-second", "zebra", ActivityStatus::Error, 700),
        ],
        ..DetectorConfig::default()
    };
    let detector = StatusDetector::new(config).unwrap();
    let event = detector.detect("ses_a", b"zebra").unwrap();
    assert_eq!(event.matched_pattern.as_deref(), Some("tie-first"));

    // Removing and re-adding the loser must not change the winner.
    assert!(detector.remove_pattern("tie-second"));
    detector.add_pattern(custom("tie-second", "zebra", ActivityStatus::Error, 700)).unwrap();
    detector.clear_session("ses_a");
    let event = detector.detect("ses_a", b"zebra").unwrap();
    assert_eq!(event.matched_pattern.as_deref(), Some("tie-first"));
}

#[test]
fn success_pattern_resets_error_state() {
    // A matching pattern forces its target even from a "worse" state.
    let detector = detector();
    detector.set_status("ses_a", ActivityStatus::Error);
    let event = detector.detect("ses_a", b"Done in 3s\n ").unwrap();
    assert_eq!(event.next, ActivityStatus::Idle);
}

#[test]
fn set_status_emits_only_on_change() {
    let detector = detector();
    assert!(detector.set_status("ses_a", ActivityStatus::Working).is_some());
    assert!(detector.set_status("ses_a", ActivityStatus::Working).is_none());
}

#[test]
fn add_pattern_replaces_same_id() {
    let detector = detector();
    detector.add_pattern(custom("mine", "alpha", ActivityStatus::Working, 900)).unwrap();
    detector.add_pattern(custom("mine", "beta", ActivityStatus::Error, 900)).unwrap();

    let specs = detector.get_patterns();
    let mine: Vec<_> = specs.iter().filter(|p| p.id == "mine").collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].pattern, "beta");
}

#[test]
fn remove_pattern_reports_presence() {
    let detector = detector();
    detector.add_pattern(custom("gone", "xyz", ActivityStatus::Working, 1)).unwrap();
    assert!(detector.remove_pattern("gone"));
    assert!(!detector.remove_pattern("gone"));
}

#[test]
fn disabled_patterns_do_not_match() {
    let config = DetectorConfig {
        disabled_patterns: vec!["ssh-password".to_owned()],
        ..DetectorConfig::default()
    };
    let detector = StatusDetector::new(config).unwrap();
    // Falls through to the generic trailing-colon pattern instead.
    let event = detector.detect("ses_a", b"Password: ").unwrap();
    assert_eq!(event.matched_pattern.as_deref(), Some("trailing colon prompt"));
}

#[test]
fn clear_session_resets_window_and_status() {
    let detector = detector();
    detector.detect("ses_a", b"Password: ").unwrap();
    detector.clear_session("ses_a");
    assert_eq!(detector.get_status("ses_a"), ActivityStatus::Idle);
}

#[test]
fn window_is_bounded() {
    let detector = detector();
    // Feed far more than the window size; detection still works on the tail.
    for _ in 0..50 {
        detector.detect("ses_a", &[b'x'; 200]);
    }
    let event = detector.detect("ses_a", b"\nPassword: ").unwrap();
    assert_eq!(event.next, ActivityStatus::Waiting);
}

#[test]
fn lookback_limits_matching_to_recent_lines() {
    let config = DetectorConfig { lookback_lines: 2, ..DetectorConfig::default() };
    let detector = StatusDetector::new(config).unwrap();
    detector.detect("ses_a", b"Password: ");
    // Push the prompt out of the two-line lookback with unmatched lines,
    // then confirm no stale match fires from the old content.
    detector.detect("ses_a", b"\nplain\n");
    assert!(detector.detect("ses_a", b"noise\nmore").is_none());
}
