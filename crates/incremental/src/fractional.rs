//! Fractional indices.
//!
//! A fractional index is a base-62 string whose digits `0-9A-Za-z` sort in
//! ASCII order. Keys never end in `0`, so for two distinct keys `a < b` a
//! key strictly between them always exists.

use alloc::string::String;
use alloc::vec::Vec;

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = DIGITS.len();

fn digit_value(byte: u8) -> usize {
    match byte {
        b'0'..=b'9' => (byte - b'0') as usize,
        b'A'..=b'Z' => (byte - b'A') as usize + 10,
        b'a'..=b'z' => (byte - b'a') as usize + 36,
        _ => 0,
    }
}

/// Returns a key sorting strictly between `before` and `after`.
///
/// `None` stands for the open end of the range: `key_between(None, None)`
/// is the first key ever handed out (`"V"`).
pub fn key_between(before: Option<&str>, after: Option<&str>) -> String {
    let a = before.unwrap_or("").as_bytes();
    let b = after.map(str::as_bytes);
    debug_assert!(
        b.map_or(true, |b| a < b),
        "fractional index bounds out of order"
    );
    let digits = midpoint(a, b);
    // DIGITS is ASCII
    digits.into_iter().map(char::from).collect()
}

/// Returns `n` ascending keys strictly between `before` and `after`.
pub fn keys_between(before: Option<&str>, after: Option<&str>, n: usize) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(n);
    for _ in 0..n {
        let prev = keys.last().map(String::as_str).or(before);
        let next = key_between(prev, after);
        keys.push(next);
    }
    keys
}

fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        // Shared prefix, with `a` padded by zeros
        let n = b
            .iter()
            .enumerate()
            .take_while(|&(i, &digit)| a.get(i).copied().unwrap_or(b'0') == digit)
            .count();
        if n > 0 {
            let mut out = b[..n].to_vec();
            out.extend(midpoint(a.get(n..).unwrap_or(&[]), Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().map_or(0, |&d| digit_value(d));
    let digit_b = b.and_then(|b| b.first()).map_or(BASE, |&d| digit_value(d));
    if digit_b.saturating_sub(digit_a) > 1 {
        return alloc::vec![DIGITS[(digit_a + digit_b + 1) / 2]];
    }
    match b {
        Some(b) if b.len() > 1 => b[..1].to_vec(),
        _ => {
            let mut out = alloc::vec![DIGITS[digit_a]];
            out.extend(midpoint(a.get(1..).unwrap_or(&[]), None));
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_key() {
        assert_eq!(key_between(None, None), "V");
    }

    #[test]
    fn test_append_and_prepend() {
        let first = key_between(None, None);
        let after = key_between(Some(&first), None);
        let before = key_between(None, Some(&first));
        assert!(before < first && first < after);
        assert_eq!(after, "l");
        assert_eq!(before, "G");
    }

    #[test]
    fn test_between_adjacent_digits() {
        let mid = key_between(Some("V"), Some("W"));
        assert!("V" < mid.as_str() && mid.as_str() < "W");
        assert_eq!(mid, "VV");
    }

    #[test]
    fn test_repeated_prepend_never_ends_in_zero() {
        let mut key = key_between(None, None);
        for _ in 0..200 {
            let next = key_between(None, Some(&key));
            assert!(next < key);
            assert!(!next.ends_with('0'));
            key = next;
        }
    }

    #[test]
    fn test_repeated_bisection() {
        let (mut lo, hi) = (key_between(None, None), String::from("W"));
        for _ in 0..100 {
            let mid = key_between(Some(&lo), Some(&hi));
            assert!(lo < mid && mid < hi, "{} {} {}", lo, mid, hi);
            assert!(!mid.ends_with('0'));
            lo = mid;
        }
    }

    #[test]
    fn test_keys_between_ascending() {
        let keys = keys_between(Some("A"), Some("B"), 5);
        assert_eq!(keys.len(), 5);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.iter().all(|k| "A" < k.as_str() && k.as_str() < "B"));
    }
}
