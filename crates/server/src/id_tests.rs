// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use super::*;

#[test]
fn generated_ids_carry_prefix() {
    assert!(generate(IdKind::Session).starts_with("ses_"));
    assert!(generate(IdKind::Project).starts_with("prj_"));
    assert!(generate(IdKind::Correlation).starts_with("cor_"));
}

#[test]
fn generated_ids_validate() {
    for _ in 0..100 {
        let id = generate(IdKind::Session);
        assert!(validate(IdKind::Session, &id), "bad id: {id}");
    }
}

#[test]
fn ids_are_distinct() {
    let a = generate(IdKind::Buffer);
    let b = generate(IdKind::Buffer);
    assert_ne!(a, b);
}

#[test]
fn validate_rejects_wrong_prefix() {
    assert!(!validate(IdKind::Session, "prj_abcdefgh"));
}

#[test]
fn validate_rejects_short_suffix() {
    assert!(!validate(IdKind::Session, "ses_abc"));
}

#[test]
fn validate_rejects_bad_alphabet() {
    assert!(!validate(IdKind::Session, "ses_abc$defgh"));
    assert!(!validate(IdKind::Session, "ses_abc defgh"));
}
