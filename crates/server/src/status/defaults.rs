// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Default pattern set baked into the binary.
//!
//! Priorities reflect specificity: an SSH password prompt must beat the
//! generic trailing-colon prompt, and tool-specific working markers beat
//! shell prompts.

use super::{ActivityStatus, PatternSpec};

fn pattern(
    id: &str,
    name: &str,
    regex: &str,
    status: ActivityStatus,
    priority: i32,
) -> PatternSpec {
    PatternSpec {
        id: id.to_owned(),
        name: name.to_owned(),
        shell: "all".to_owned(),
        pattern: regex.to_owned(),
        status,
        priority,
        enabled: true,
    }
}

/// The built-in patterns, unsorted (the registry sorts on insert).
pub fn default_patterns() -> Vec<PatternSpec> {
    use ActivityStatus::{Error, Idle, Waiting, Working};

    vec![
        // SSH / auth prompts: highest specificity.
        pattern("ssh-password", "SSH password prompt", r"(?i)password\s*:\s*$", Waiting, 520),
        pattern(
            "ssh-passphrase",
            "SSH key passphrase prompt",
            r"(?i)enter passphrase for .*:\s*$",
            Waiting,
            520,
        ),
        pattern(
            "ssh-hostkey",
            "SSH host key confirmation",
            r"\(yes/no(?:/\[fingerprint\])?\)\??\s*$",
            Waiting,
            510,
        ),
        pattern(
            "ssh-mfa",
            "SSH verification code prompt",
            r"(?i)(?:verification|authentication|one-time) code\s*:?\s*$",
            Waiting,
            500,
        ),
        // Claude Code markers.
        pattern(
            "claude-working",
            "Claude Code working spinner",
            r"(?:✻|✼|✽|·|∴)\s+\w+…|\(esc to interrupt\)",
            Working,
            420,
        ),
        pattern("claude-thinking", "Claude Code thinking", r"Thinking…", Working, 410),
        pattern(
            "claude-awaiting",
            "Claude Code awaiting response",
            r"Awaiting response|\?\s+for shortcuts",
            Waiting,
            400,
        ),
        pattern(
            "claude-done",
            "Claude Code task finished",
            r"(?:✓\s+)?(?:Done|Completed|Finished)(?:\s+in\s+\S+)?\s*$",
            Idle,
            390,
        ),
        // Editors and pagers.
        pattern("vim-insert", "vim insert mode", r"-- INSERT --", Waiting, 320),
        pattern("nano-help", "nano help bar", r"\^G Get Help|\^X Exit", Waiting, 310),
        pattern("pager-end", "pager prompt", r"\(END\)|--More--", Waiting, 300),
        // Error phrases.
        pattern("err-permission", "permission denied", r"(?i)permission denied", Error, 260),
        pattern("err-not-found", "command not found", r"command not found", Error, 260),
        pattern("err-npm", "npm error output", r"npm ERR!", Error, 255),
        pattern("err-merge", "git merge conflict", r"(?i)merge conflict", Error, 255),
        pattern("err-rustc", "rustc error", r"error\[E\d{4}\]", Error, 255),
        // Package managers and build tools.
        pattern(
            "build-node",
            "node package manager activity",
            r"(?:npm|yarn|pnpm)\s+(?:install|run|build)|⸨+[░▒]*⸩|idealTree",
            Working,
            160,
        ),
        pattern(
            "build-cargo",
            "cargo build activity",
            r"^\s*(?:Compiling|Downloading|Updating|Checking)\s+\S+",
            Working,
            160,
        ),
        pattern(
            "build-pip",
            "pip install activity",
            r"Collecting\s+\S+|Installing collected packages",
            Working,
            160,
        ),
        pattern("build-go", "go module download", r"go: downloading", Working, 160),
        // Interactive question ending in a question mark.
        pattern("generic-question", "question prompt", r"\?\s*$", Waiting, 120),
        // Shell prompts: the session is sitting at a prompt.
        pattern("shell-prompt", "shell prompt", r"(?:[$#%❯➜]|\$\s?)\s*$", Idle, 100),
        // Catch-all prompt ending in a colon, below everything specific.
        pattern("generic-colon", "trailing colon prompt", r":\s*$", Waiting, 50),
    ]
}

#[cfg(test)]
#[path = "defaults_tests.rs"]
mod tests;
