// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Prefixed, URL-safe opaque identifiers.
//!
//! Every entity kind carries a stable prefix (`ses_`, `prj_`, ...) followed
//! by a random suffix drawn from `[A-Za-z0-9_-]`. The prefix makes ids
//! self-describing in logs and on the wire.

use rand::Rng;

/// Entity kinds with stable id prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Session,
    Project,
    Correlation,
    Pattern,
    Buffer,
    Terminal,
    Ssh,
    Layout,
    Node,
}

impl IdKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Session => "ses_",
            Self::Project => "prj_",
            Self::Correlation => "cor_",
            Self::Pattern => "pat_",
            Self::Buffer => "buf_",
            Self::Terminal => "term_",
            Self::Ssh => "ssh_",
            Self::Layout => "lay_",
            Self::Node => "node_",
        }
    }
}

const SUFFIX_LEN: usize = 16;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Generate a fresh identifier for the given kind.
pub fn generate(kind: IdKind) -> String {
    let mut rng = rand::rng();
    let mut out = String::with_capacity(kind.prefix().len() + SUFFIX_LEN);
    out.push_str(kind.prefix());
    for _ in 0..SUFFIX_LEN {
        let idx = rng.random_range(0..ALPHABET.len());
        out.push(ALPHABET[idx] as char);
    }
    out
}

/// Check that `s` is a well-formed id of the given kind: correct prefix,
/// at least 6 suffix characters, all from the URL-safe alphabet.
pub fn validate(kind: IdKind, s: &str) -> bool {
    let Some(suffix) = s.strip_prefix(kind.prefix()) else {
        return false;
    };
    suffix.len() >= 6
        && suffix.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
