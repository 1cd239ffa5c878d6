// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Activity-status inference over raw session output.
//!
//! A priority-ordered set of compiled regex patterns is matched against the
//! tail of a rolling, ANSI-stripped window of recent output. The first
//! (highest-priority) match decides: a differing target status emits a
//! transition, an equal one is a no-op. New output arriving while a session
//! is `waiting` implicitly flips it back to `working` even when no pattern
//! matches.

pub mod ansi;
pub mod defaults;

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::events::{now_ms, StatusChangeEvent};

/// Inferred semantic state of a session, decoupled from lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    #[default]
    Idle,
    Working,
    Waiting,
    Error,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Error => "error",
        }
    }
}

/// A registry entry: named regex with priority and target status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSpec {
    pub id: String,
    pub name: String,
    /// Shell kind this pattern applies to, or "all".
    #[serde(default = "all_shells")]
    pub shell: String,
    pub pattern: String,
    pub status: ActivityStatus,
    pub priority: i32,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn all_shells() -> String {
    "all".to_owned()
}

fn enabled() -> bool {
    true
}

struct CompiledPattern {
    spec: PatternSpec,
    regex: Regex,
    /// Monotonic insertion counter. Ties on priority resolve to the earlier
    /// insertion, stable across add/remove cycles.
    seq: u64,
}

/// Per-session rolling window and current status.
struct SessionState {
    window: String,
    current: ActivityStatus,
    last_eval: Option<Instant>,
    /// Shell kind, for patterns scoped to a specific shell.
    shell: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            window: String::new(),
            current: ActivityStatus::Idle,
            last_eval: None,
            shell: None,
        }
    }
}

/// Construction parameters for the detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Pattern ids from the default set to disable.
    pub disabled_patterns: Vec<String>,
    /// Additional patterns layered over the default set.
    pub custom_patterns: Vec<PatternSpec>,
    /// How many trailing lines of the window are matched.
    pub lookback_lines: usize,
    /// Whitespace-only appends inside this interval skip re-evaluation.
    pub debounce_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            disabled_patterns: Vec::new(),
            custom_patterns: Vec::new(),
            lookback_lines: 5,
            debounce_ms: 100,
        }
    }
}

/// Rolling window size in characters.
const WINDOW_CHARS: usize = 2000;

/// Status detector with a process-wide pattern registry and per-session
/// window state.
pub struct StatusDetector {
    patterns: RwLock<Vec<CompiledPattern>>,
    sessions: RwLock<HashMap<String, SessionState>>,
    next_seq: RwLock<u64>,
    lookback_lines: usize,
    debounce_ms: u64,
}

impl StatusDetector {
    /// Build a detector from the baked-in default set plus the given config.
    ///
    /// Every pattern is compiled up front; an invalid regex fails
    /// construction rather than the first match.
    pub fn new(config: DetectorConfig) -> anyhow::Result<Self> {
        let detector = Self {
            patterns: RwLock::new(Vec::new()),
            sessions: RwLock::new(HashMap::new()),
            next_seq: RwLock::new(0),
            lookback_lines: config.lookback_lines,
            debounce_ms: config.debounce_ms,
        };

        for mut spec in defaults::default_patterns() {
            if config.disabled_patterns.iter().any(|id| id == &spec.id) {
                spec.enabled = false;
            }
            detector.add_pattern(spec)?;
        }
        for spec in config.custom_patterns {
            detector.add_pattern(spec)?;
        }
        Ok(detector)
    }

    /// Feed raw output through the detection pipeline.
    ///
    /// Returns the transition to broadcast, or `None` when the status is
    /// unchanged. At most one transition is produced per call.
    pub fn detect(&self, session_id: &str, data: &[u8]) -> Option<StatusChangeEvent> {
        let stripped = ansi::strip(&String::from_utf8_lossy(data));

        let mut sessions = self.sessions.write();
        let state = sessions.entry(session_id.to_owned()).or_insert_with(SessionState::new);

        state.window.push_str(&stripped);
        trim_window(&mut state.window);

        // Whitespace-only appends inside the debounce interval cannot start
        // a transition; skip the regex pass.
        let now = Instant::now();
        let quiet = stripped.trim().is_empty();
        if quiet {
            if let Some(last) = state.last_eval {
                if last.elapsed().as_millis() < u128::from(self.debounce_ms) {
                    return None;
                }
            }
        }
        state.last_eval = Some(now);

        let tail = window_tail(&state.window, self.lookback_lines);

        let patterns = self.patterns.read();
        let first_match = patterns.iter().find(|p| {
            p.spec.enabled
                && (p.spec.shell == "all" || Some(p.spec.shell.as_str()) == state.shell.as_deref())
                && p.regex.is_match(&tail)
        });

        if let Some(matched) = first_match {
            if matched.spec.status == state.current {
                return None;
            }
            let previous = state.current;
            state.current = matched.spec.status;
            return Some(StatusChangeEvent {
                session_id: session_id.to_owned(),
                previous,
                next: matched.spec.status,
                matched_pattern: Some(matched.spec.name.clone()),
                timestamp: now_ms(),
            });
        }

        // Implicit transition: fresh output while waiting means the program
        // resumed doing something.
        if !quiet && state.current == ActivityStatus::Waiting {
            let previous = state.current;
            state.current = ActivityStatus::Working;
            return Some(StatusChangeEvent {
                session_id: session_id.to_owned(),
                previous,
                next: ActivityStatus::Working,
                matched_pattern: None,
                timestamp: now_ms(),
            });
        }

        None
    }

    /// Force a session's status. Emits a transition only when it differs.
    pub fn set_status(
        &self,
        session_id: &str,
        status: ActivityStatus,
    ) -> Option<StatusChangeEvent> {
        let mut sessions = self.sessions.write();
        let state = sessions.entry(session_id.to_owned()).or_insert_with(SessionState::new);
        if state.current == status {
            return None;
        }
        let previous = state.current;
        state.current = status;
        Some(StatusChangeEvent {
            session_id: session_id.to_owned(),
            previous,
            next: status,
            matched_pattern: None,
            timestamp: now_ms(),
        })
    }

    /// Record a session's shell kind so shell-scoped patterns apply to it.
    pub fn set_session_shell(&self, session_id: &str, shell: &str) {
        let mut sessions = self.sessions.write();
        let state = sessions.entry(session_id.to_owned()).or_insert_with(SessionState::new);
        state.shell = Some(shell.to_owned());
    }

    /// Current status for a session, `idle` when unknown.
    pub fn get_status(&self, session_id: &str) -> ActivityStatus {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.current)
            .unwrap_or_default()
    }

    /// Compile and insert a pattern, replacing any existing one with the
    /// same id, then re-sort by priority.
    pub fn add_pattern(&self, spec: PatternSpec) -> anyhow::Result<()> {
        let regex = Regex::new(&spec.pattern)
            .map_err(|e| anyhow::anyhow!("pattern {}: {e}", spec.id))?;

        let mut patterns = self.patterns.write();
        patterns.retain(|p| p.spec.id != spec.id);

        let seq = {
            let mut next = self.next_seq.write();
            let seq = *next;
            *next += 1;
            seq
        };
        patterns.push(CompiledPattern { spec, regex, seq });
        // Stable ordering: priority descending, then insertion order.
        patterns.sort_by(|a, b| b.spec.priority.cmp(&a.spec.priority).then(a.seq.cmp(&b.seq)));
        Ok(())
    }

    /// Remove a pattern by id. Returns whether one was removed.
    pub fn remove_pattern(&self, id: &str) -> bool {
        let mut patterns = self.patterns.write();
        let before = patterns.len();
        patterns.retain(|p| p.spec.id != id);
        patterns.len() != before
    }

    /// Snapshot of the registry without compiled regexes, in match order.
    pub fn get_patterns(&self) -> Vec<PatternSpec> {
        self.patterns.read().iter().map(|p| p.spec.clone()).collect()
    }

    /// Drop a session's window and status memory.
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }
}

/// Keep only the most recent `WINDOW_CHARS` characters.
fn trim_window(window: &mut String) {
    let count = window.chars().count();
    if count > WINDOW_CHARS {
        *window = window.chars().skip(count - WINDOW_CHARS).collect();
    }
}

/// The last `lookback` newline-separated lines of the window.
fn window_tail(window: &str, lookback: usize) -> String {
    let lines: Vec<&str> = window.split('\n').collect();
    let start = lines.len().saturating_sub(lookback);
    lines[start..].join("\n")
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
