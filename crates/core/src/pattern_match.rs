//! LIKE / ILIKE pattern matching.
//!
//! Two wildcards are recognised:
//! - `%` matches zero or more characters
//! - `_` matches exactly one character
//!
//! A backslash makes the following character literal (`\%`, `\_`, `\\`).
//! Matching operates on Unicode scalar values. The same routine backs the
//! expression evaluator and the `like`/`ilike` index lookups, so both paths
//! agree on every pattern.

use alloc::vec::Vec;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Token {
    Any,
    One,
    Char(char),
}

fn tokenize(pattern: &str, fold_case: bool) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        let token = match ch {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => match chars.next() {
                Some(escaped) => Token::Char(fold(escaped, fold_case)),
                None => Token::Char('\\'),
            },
            other => Token::Char(fold(other, fold_case)),
        };
        // Consecutive `%` collapse into one.
        if token == Token::Any && tokens.last() == Some(&Token::Any) {
            continue;
        }
        tokens.push(token);
    }
    tokens
}

#[inline]
fn fold(ch: char, fold_case: bool) -> char {
    if fold_case {
        ch.to_lowercase().next().unwrap_or(ch)
    } else {
        ch
    }
}

fn close(tokens: &[Token], states: &mut [bool]) {
    for j in 0..tokens.len() {
        if states[j] && tokens[j] == Token::Any {
            states[j + 1] = true;
        }
    }
}

fn matches(value: &str, pattern: &str, fold_case: bool) -> bool {
    let tokens = tokenize(pattern, fold_case);
    let n = tokens.len();

    // states[j] is set when the first j tokens match the text consumed so far.
    let mut states = alloc::vec![false; n + 1];
    states[0] = true;
    close(&tokens, &mut states);

    for ch in value.chars().map(|c| fold(c, fold_case)) {
        let mut next = alloc::vec![false; n + 1];
        for j in 0..n {
            if !states[j] {
                continue;
            }
            match tokens[j] {
                Token::Any => next[j] = true,
                Token::One => next[j + 1] = true,
                Token::Char(expected) if expected == ch => next[j + 1] = true,
                Token::Char(_) => {}
            }
        }
        close(&tokens, &mut next);
        if !next.iter().any(|s| *s) {
            return false;
        }
        states = next;
    }

    states[n]
}

/// Case-sensitive LIKE.
///
/// ```
/// use strand_core::pattern_match::like;
/// assert!(like("hello", "h%o"));
/// assert!(like("hello", "_ello"));
/// assert!(!like("hello", "world"));
/// ```
pub fn like(value: &str, pattern: &str) -> bool {
    matches(value, pattern, false)
}

/// Case-insensitive LIKE.
///
/// ```
/// use strand_core::pattern_match::ilike;
/// assert!(ilike("Hello", "h%O"));
/// ```
pub fn ilike(value: &str, pattern: &str) -> bool {
    matches(value, pattern, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_exact() {
        assert!(like("hello", "hello"));
        assert!(!like("hello", "world"));
        assert!(!like("hello", "hell"));
    }

    #[test]
    fn like_percent() {
        assert!(like("hello", "%"));
        assert!(like("hello", "h%"));
        assert!(like("hello", "%o"));
        assert!(like("hello", "%ll%"));
        assert!(like("hello", "%%llo"));
        assert!(!like("hello", "%x%"));
    }

    #[test]
    fn like_underscore() {
        assert!(like("hello", "_ello"));
        assert!(like("hello", "h_llo"));
        assert!(!like("hello", "h_lo"));
    }

    #[test]
    fn like_combined() {
        assert!(like("hello", "h%_o"));
        assert!(like("hello world", "hello%"));
        assert!(like("abcabc", "%b_a%"));
    }

    #[test]
    fn like_empty() {
        assert!(like("", ""));
        assert!(like("", "%"));
        assert!(!like("", "_"));
        assert!(!like("a", ""));
    }

    #[test]
    fn like_escape() {
        assert!(like("100%", "100\\%"));
        assert!(!like("1000", "100\\%"));
        assert!(like("a_b", "a\\_b"));
        assert!(!like("axb", "a\\_b"));
    }

    #[test]
    fn ilike_folds_case() {
        assert!(ilike("HeLLo", "hello"));
        assert!(ilike("ÉCOLE", "%cole"));
        assert!(!like("HeLLo", "hello"));
    }
}
