//! Reversible escaping of characters that are significant to SQL text.
//!
//! Bound parameters never need this. It exists for the fragments that cannot be bound, mainly
//! table and column names interpolated by entity strategies and the select builder (see
//! [`identifier`]).

use std::borrow::Cow;

/// Metacharacter to token table. Every token is `~xx~`; the `~` lead character is itself escaped
/// so that any `~` in escaped text starts a token and unescaping is a single left-to-right scan.
const ESCAPE_TABLE: [(char, &str); 9] = [
    ('~', "~tl~"),
    ('"', "~dq~"),
    ('\'', "~sq~"),
    ('\\', "~bs~"),
    ('`', "~bt~"),
    ('´', "~ac~"),
    ('(', "~lp~"),
    (')', "~rp~"),
    ('%', "~pc~"),
];

fn token_for(c: char) -> Option<&'static str> {
    ESCAPE_TABLE
        .iter()
        .find(|(meta, _)| *meta == c)
        .map(|(_, token)| *token)
}

/// Replace every metacharacter with its token.
///
/// Returns a borrowed `Cow` when nothing needed escaping.
#[must_use]
pub fn escape(input: &str) -> Cow<'_, str> {
    let Some(first) = input.find(|c| token_for(c).is_some()) else {
        return Cow::Borrowed(input);
    };

    let mut out = String::with_capacity(input.len() + 8);
    out.push_str(&input[..first]);
    for c in input[first..].chars() {
        match token_for(c) {
            Some(token) => out.push_str(token),
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Reverse [`escape`]. Text that is not a known token passes through untouched.
#[must_use]
pub fn unescape(input: &str) -> Cow<'_, str> {
    if !input.contains('~') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('~') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match ESCAPE_TABLE
            .iter()
            .find(|(_, token)| tail.starts_with(token))
        {
            Some((meta, token)) => {
                out.push(*meta);
                rest = &tail[token.len()..];
            }
            None => {
                out.push('~');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Escape `name` for use as a table or column name, double-quoting it unless the escaped form
/// is a bare word.
///
/// Escaping removes every `"` first, so the quoted form cannot be terminated early.
#[must_use]
pub fn identifier(name: &str) -> Cow<'_, str> {
    let escaped = escape(name);
    if is_bare_word(&escaped) {
        escaped
    } else {
        Cow::Owned(format!("\"{escaped}\""))
    }
}

fn is_bare_word(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// True when `input` contains one of the escape tokens, i.e. it cannot round-trip.
#[must_use]
pub fn contains_token(input: &str) -> bool {
    ESCAPE_TABLE.iter().any(|(_, token)| input.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_borrowed() {
        assert!(matches!(escape("files"), Cow::Borrowed("files")));
        assert!(matches!(unescape("files"), Cow::Borrowed("files")));
    }

    #[test]
    fn every_metacharacter_round_trips() {
        let input = r#"a"b'c\d`e´f(g)h%i"#;
        let escaped = escape(input);
        for (meta, _) in ESCAPE_TABLE.iter().skip(1) {
            assert!(!escaped.contains(*meta), "{meta} survived escaping");
        }
        assert_eq!(unescape(&escaped), input);
        assert_eq!(escape(&unescape(&escaped)), escaped);
    }

    #[test]
    fn tildes_cannot_forge_a_token() {
        let input = "x~sq'";
        assert!(!contains_token(input));
        assert_eq!(escape(input), "x~tl~sq~sq~");
        assert_eq!(unescape(&escape(input)), input);
        assert_eq!(unescape(&escape("~tmp~ 100% (draft)")), "~tmp~ 100% (draft)");
    }

    #[test]
    fn identifiers_are_quoted_only_when_needed() {
        assert_eq!(identifier("files"), "files");
        assert_eq!(identifier("_t2"), "_t2");
        assert_eq!(identifier("sandbox files"), "\"sandbox files\"");
        assert_eq!(identifier("a\"b"), "\"a~dq~b\"");
    }

    #[test]
    fn tokens_are_detected() {
        assert!(contains_token("x~dq~y"));
        assert!(!contains_token("x~dqy"));
    }
}
