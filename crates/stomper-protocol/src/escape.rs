//! Header escaping.
//!
//! A header line is `key:value\n`, so keys and values can't contain a raw
//! colon or line break. Those bytes (and the backslash itself) are written as
//! two-character escapes:
//!
//! | byte | escape |
//! |------|--------|
//! | `\`  | `\\`   |
//! | LF   | `\n`   |
//! | CR   | `\r`   |
//! | `:`  | `\c`   |

use std::borrow::Cow;

use crate::ProtocolError;

fn needs_escape(c: char) -> bool {
    matches!(c, '\\' | '\n' | '\r' | ':')
}

/// Escapes a header key or value for the wire.
///
/// Borrows when nothing needs escaping, which is the common case.
pub fn escape(raw: &str) -> Cow<'_, str> {
    if !raw.contains(needs_escape) {
        return Cow::Borrowed(raw);
    }
    let mut out = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Reverses [`escape`].
///
/// # Errors
/// [`ProtocolError::InvalidEscape`] for a backslash followed by an
/// unrecognized character or by nothing at all.
pub fn unescape(escaped: &str) -> Result<Cow<'_, str>, ProtocolError> {
    if !escaped.contains('\\') {
        return Ok(Cow::Borrowed(escaped));
    }
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(ProtocolError::InvalidEscape(escaped.to_string())),
        }
    }
    Ok(Cow::Owned(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_plain_text_borrows() {
        assert!(matches!(escape("/queue/a"), Cow::Borrowed("/queue/a")));
    }

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(escape("a:b\nc\\d\re"), "a\\cb\\nc\\\\d\\re");
    }

    #[test]
    fn test_unescape_inverts_escape_for_awkward_values() {
        let values = [
            "",
            "\\",
            ":",
            "\n",
            "\\c",
            "\\\\n",
            "key:with:colons",
            "multi\nline\nvalue\\",
            "trailing backslash \\",
            "ünïcödé:\n\\",
        ];
        for v in values {
            let escaped = escape(v);
            assert!(!escaped.contains(':'), "{escaped:?} still has a raw colon");
            assert!(!escaped.contains('\n'), "{escaped:?} still has a raw newline");
            assert_eq!(unescape(&escaped).unwrap(), v);
        }
    }

    #[test]
    fn test_unescape_unknown_sequence_is_error() {
        assert!(matches!(
            unescape("bad\\t"),
            Err(ProtocolError::InvalidEscape(_))
        ));
    }

    #[test]
    fn test_unescape_dangling_backslash_is_error() {
        assert!(matches!(
            unescape("oops\\"),
            Err(ProtocolError::InvalidEscape(_))
        ));
    }
}
