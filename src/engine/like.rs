// ============================================================================
// SQL LIKE pattern matching for the in-memory engine
// ============================================================================

use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use crate::core::{OrmError, Result};

const PATTERN_CACHE_SIZE: usize = 128;

lazy_static! {
    static ref PATTERN_CACHE: Mutex<LruCache<String, Arc<Regex>>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(PATTERN_CACHE_SIZE).unwrap()));
}

/// Match `text` against a SQL LIKE `pattern`.
///
/// `%` matches any run of characters, `_` matches exactly one, and `\`
/// escapes the following character. Common shapes (exact, prefix, suffix,
/// infix) are handled without touching the regex engine; everything else
/// compiles to a cached regex.
pub fn like_match(text: &str, pattern: &str) -> Result<bool> {
    if let Some(result) = fast_path(text, pattern) {
        return Ok(result);
    }

    let regex = compiled(pattern)?;
    Ok(regex.is_match(text))
}

/// Recognize patterns that need no regex. Patterns containing `_` or an
/// escape sequence always fall through to the compiled path.
fn fast_path(text: &str, pattern: &str) -> Option<bool> {
    if pattern.contains('_') || pattern.contains('\\') {
        return None;
    }

    let wildcards = pattern.matches('%').count();
    match wildcards {
        0 => Some(text == pattern),
        1 if pattern.ends_with('%') => {
            Some(text.starts_with(&pattern[..pattern.len() - 1]))
        }
        1 if pattern.starts_with('%') => Some(text.ends_with(&pattern[1..])),
        2 if pattern.starts_with('%') && pattern.ends_with('%') && pattern.len() >= 2 => {
            let inner = &pattern[1..pattern.len() - 1];
            if inner.contains('%') {
                None
            } else {
                Some(inner.is_empty() || text.contains(inner))
            }
        }
        _ => None,
    }
}

fn compiled(pattern: &str) -> Result<Arc<Regex>> {
    let mut cache = PATTERN_CACHE
        .lock()
        .map_err(|_| OrmError::Execution("pattern cache lock poisoned".to_string()))?;

    if let Some(regex) = cache.get(pattern) {
        return Ok(Arc::clone(regex));
    }

    let regex = Arc::new(compile_like(pattern)?);
    cache.put(pattern.to_string(), Arc::clone(&regex));
    Ok(regex)
}

/// Translate a LIKE pattern into an anchored regex.
fn compile_like(pattern: &str) -> Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');

    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => source.push_str(&regex::escape(&escaped.to_string())),
                None => {
                    return Err(OrmError::Execution(
                        "LIKE pattern ends with a dangling escape".to_string(),
                    ))
                }
            },
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }

    source.push('$');
    Regex::new(&source)
        .map_err(|e| OrmError::Execution(format!("invalid LIKE pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard_shapes() {
        assert!(like_match("alice", "alice").unwrap());
        assert!(!like_match("alice", "bob").unwrap());
        assert!(like_match("alice", "ali%").unwrap());
        assert!(like_match("alice", "%ice").unwrap());
        assert!(like_match("alice", "%lic%").unwrap());
        assert!(!like_match("alice", "%xyz%").unwrap());
    }

    #[test]
    fn test_underscore_and_mixed_patterns() {
        assert!(like_match("cat", "c_t").unwrap());
        assert!(!like_match("cart", "c_t").unwrap());
        assert!(like_match("user_42", "user%2").unwrap());
    }

    #[test]
    fn test_escaped_metacharacters() {
        assert!(like_match("100%", "100\\%").unwrap());
        assert!(!like_match("1000", "100\\%").unwrap());
        assert!(like_match("a_b", "a\\_b").unwrap());
        assert!(!like_match("axb", "a\\_b").unwrap());
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(like_match("a.b", "a.b").unwrap());
        assert!(!like_match("axb", "%a.b%").unwrap());
        assert!(like_match("(x)", "(x%").unwrap());
    }

    #[test]
    fn test_dangling_escape_is_an_error() {
        assert!(like_match("x", "abc\\").is_err());
    }

    #[test]
    fn test_empty_pattern_matches_only_empty_text() {
        assert!(like_match("", "").unwrap());
        assert!(!like_match("x", "").unwrap());
        assert!(like_match("anything", "%").unwrap());
    }
}
