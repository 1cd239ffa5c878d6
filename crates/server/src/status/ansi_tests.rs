// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

use super::*;

#[test]
fn plain_text_passes_through() {
    assert_eq!(strip("hello world"), "hello world");
}

#[test]
fn strips_color_codes() {
    assert_eq!(strip("\x1b[31mred\x1b[0m plain"), "red plain");
}

#[test]
fn strips_cursor_movement() {
    assert_eq!(strip("\x1b[2J\x1b[Hcleared"), "cleared");
}

#[test]
fn strips_osc_title_with_bel() {
    assert_eq!(strip("\x1b]0;window title\x07after"), "after");
}

#[test]
fn strips_osc_with_string_terminator() {
    assert_eq!(strip("\x1b]8;;http://x\x1b\\link"), "link");
}

#[test]
fn strips_two_byte_escape() {
    assert_eq!(strip("\x1b(Btext"), "text");
}

#[test]
fn preserves_newlines_and_carriage_returns() {
    assert_eq!(strip("a\r\nb\x1b[1mc\r"), "a\r\nbc\r");
}

#[test]
fn handles_truncated_sequence_at_end() {
    assert_eq!(strip("abc\x1b["), "abc");
}
