//! Sibling name disambiguation.

use std::collections::HashMap;

/// Tracks, per base name, the highest numeric suffix handed out so far.
///
/// A name `rock_12` has base `rock` and suffix 12; a name without a
/// trailing `_<digits>` has suffix 0. Resolving a colliding name returns
/// `base_<max + 1>` without scanning siblings.
#[derive(Clone, Debug, Default)]
pub struct CollisionResolver {
    max_suffix: HashMap<String, u64>,
}

impl CollisionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a name now in use.
    pub fn add(&mut self, name: &str) {
        let (base, suffix) = split_suffix(name);
        let max = self.max_suffix.entry(base.to_string()).or_insert(0);
        *max = (*max).max(suffix);
    }

    /// Next free name derived from `name`. The result is recorded as used.
    pub fn resolve(&mut self, name: &str) -> String {
        let (base, _) = split_suffix(name);
        let max = self.max_suffix.entry(base.to_string()).or_insert(0);
        *max += 1;
        format!("{base}_{max}")
    }
}

/// Split a trailing `_<digits>` suffix off `name`.
fn split_suffix(name: &str) -> (&str, u64) {
    if let Some((base, digits)) = name.rsplit_once('_') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = digits.parse::<u64>() {
                if n < u64::MAX {
                    return (base, n);
                }
            }
        }
    }
    (name, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_suffix() {
        assert_eq!(split_suffix("rock"), ("rock", 0));
        assert_eq!(split_suffix("rock_12"), ("rock", 12));
        assert_eq!(split_suffix("rock_"), ("rock_", 0));
        assert_eq!(split_suffix("rock_a1"), ("rock_a1", 0));
        assert_eq!(split_suffix("a_1_2"), ("a_1", 2));
        assert_eq!(
            split_suffix("n_99999999999999999999999"),
            ("n_99999999999999999999999", 0)
        );
    }

    #[test]
    fn test_resolve_sequence() {
        let mut r = CollisionResolver::new();
        r.add("n");
        assert_eq!(r.resolve("n"), "n_1");
        assert_eq!(r.resolve("n"), "n_2");
        r.add("n_7");
        assert_eq!(r.resolve("n"), "n_8");
        assert_eq!(r.resolve("n_3"), "n_9");
    }
}
