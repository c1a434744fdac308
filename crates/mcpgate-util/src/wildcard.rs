//! Wildcard pattern matching.
//!
//! Used for redirect URI allow-lists such as `http://localhost:*`.
//! `*` matches any sequence of characters (including empty); every other
//! character matches itself. Matching is case-sensitive.

/// Match a string against a wildcard pattern.
///
/// # Examples
///
/// ```
/// use mcpgate_util::wildcard::matches;
///
/// assert!(matches("http://localhost:*", "http://localhost:3000/callback"));
/// assert!(matches("http://127.0.0.1:*/cb", "http://127.0.0.1:9/cb"));
/// assert!(!matches("http://localhost:*", "https://localhost:3000"));
/// ```
pub fn matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    // Position of the last `*` seen and the text index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < text.len() {
        if pi < pattern.len() && pattern[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == text[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, star_ti)) = backtrack {
            // Let the last star swallow one more character.
            pi = star + 1;
            ti = star_ti + 1;
            backtrack = Some((star, star_ti + 1));
        } else {
            return false;
        }
    }

    pattern[pi..].iter().all(|&c| c == '*')
}

/// Return the first pattern that matches `text`, if any.
pub fn find_matching_pattern<'a, S: AsRef<str>>(patterns: &'a [S], text: &str) -> Option<&'a str> {
    patterns
        .iter()
        .map(AsRef::as_ref)
        .find(|p| matches(p, text))
}

/// Check whether any pattern matches `text`.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], text: &str) -> bool {
    find_matching_pattern(patterns, text).is_some()
}

/// Whether a pattern contains a wildcard at all.
pub fn is_literal(pattern: &str) -> bool {
    !pattern.contains('*')
}
