//! Natural version ordering
//!
//! Release tags in the wild are not reliably SemVer (`v1.2.10`, `2023.05`,
//! `curl-8_4_0`). Sorting therefore tokenizes tags into numeric and
//! non-numeric runs and compares numeric runs as numbers, so `v1.2.10`
//! sorts after `v1.2.9`.

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Number(&'a str),
    Text(&'a str),
}

fn tokenize(s: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = s.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let numeric = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == numeric {
            end += 1;
        }
        let run = &s[start..end];
        tokens.push(if numeric {
            Token::Number(run)
        } else {
            Token::Text(run)
        });
        start = end;
    }
    tokens
}

/// Compare two digit runs as numbers of arbitrary size
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        other => other,
    }
}

/// Natural-order comparison of two version-like strings
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_tokens = tokenize(a);
    let b_tokens = tokenize(b);

    for pair in a_tokens.iter().zip(b_tokens.iter()) {
        let ordering = match pair {
            (Token::Number(x), Token::Number(y)) => compare_numbers(x, y),
            (Token::Text(x), Token::Text(y)) => x.cmp(y),
            // numeric runs sort before text runs
            (Token::Number(_), Token::Text(_)) => Ordering::Less,
            (Token::Text(_), Token::Number(_)) => Ordering::Greater,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a_tokens.len().cmp(&b_tokens.len())
}

/// Sort strings in ascending natural order
pub fn natural_sort(items: &mut [String]) {
    items.sort_by(|a, b| natural_cmp(a, b));
}
