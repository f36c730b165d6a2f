//! Topic patterns.
//!
//! A topic is a list of segments separated by `/`, eg. `sensors/kitchen/temp`.
//! A pattern is a topic which may also use wildcard segments:
//!
//! * `*` matches exactly one segment.
//! * `**` matches zero or more segments.
//!
//! Wildcards always occupy a whole segment; `temp*` is not a valid pattern.
use std::fmt;

/// Separates topic segments.
pub const SEPARATOR: char = '/';
/// Matches exactly one segment.
pub const WILDCARD: &str = "*";
/// Matches any number of segments, including none.
pub const SUPER_WILDCARD: &str = "**";

/// Check whether a character may appear in a topic pattern.
fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '*' | '@' | '$' | '_')
}

/// Check that a topic pattern is well-formed.
///
/// A valid pattern is non-empty, made only of alphanumerics, `_`, `@`, `$` and
/// the operators `/` and `*`, has no empty segments and doesn't mix wildcards
/// with other characters in a segment. `**/**` and `***` are rejected, since
/// they are redundant spellings of `**`.
pub fn is_valid_pattern(pattern: &str) -> bool {
    if pattern.is_empty() || !pattern.chars().all(is_allowed) {
        return false;
    }
    if pattern.starts_with(SEPARATOR) || pattern.ends_with(SEPARATOR) || pattern.contains("//") {
        return false;
    }
    if pattern.contains("**/**") || pattern.contains("***") {
        return false;
    }
    pattern
        .split(SEPARATOR)
        .all(|s| !s.contains('*') || s == WILDCARD || s == SUPER_WILDCARD)
}

fn segments(topic: &str) -> Vec<&str> {
    topic.split(SEPARATOR).collect()
}

/// Outcomes of matching a pattern suffix against a topic suffix, by offset.
///
/// Each `**` tries every alignment of what follows it, so without this a
/// pattern with many of them takes exponential time.
struct Memo {
    width: usize,
    results: Vec<Option<bool>>,
}

impl Memo {
    fn new(pattern: &[&str], topic: &[&str]) -> Self {
        let width = topic.len() + 1;

        Self {
            width,
            results: vec![None; (pattern.len() + 1) * width],
        }
    }

    fn get(&self, p: usize, t: usize) -> Option<bool> {
        self.results[p * self.width + t]
    }

    fn set(&mut self, p: usize, t: usize, result: bool) -> bool {
        self.results[p * self.width + t] = Some(result);
        result
    }
}

/// Check whether `pattern` matches `topic`.
///
/// A `**` segment may be followed by more segments, in which case every
/// possible alignment of the remainder is tried.
pub fn matches(pattern: &str, topic: &str) -> bool {
    let (pattern, topic) = (segments(pattern), segments(topic));
    let mut memo = Memo::new(&pattern, &topic);

    match_segments(&pattern, &topic, 0, 0, &mut memo)
}

fn match_segments(pattern: &[&str], topic: &[&str], p: usize, t: usize, memo: &mut Memo) -> bool {
    if let Some(result) = memo.get(p, t) {
        return result;
    }
    let result = match pattern.get(p) {
        None => t == topic.len(),
        Some(&SUPER_WILDCARD) if p + 1 == pattern.len() => true,
        Some(&SUPER_WILDCARD) => {
            (t..=topic.len()).any(|skip| match_segments(pattern, topic, p + 1, skip, memo))
        }
        Some(&WILDCARD) => t < topic.len() && match_segments(pattern, topic, p + 1, t + 1, memo),
        Some(literal) => {
            topic.get(t) == Some(literal) && match_segments(pattern, topic, p + 1, t + 1, memo)
        }
    };
    memo.set(p, t, result)
}

/// Check whether every topic matched by `candidate` is also matched by `top`.
///
/// Eg. `a/*` covers `a/b` and `a/*`, but not `a/**`, since `**` can span more
/// than one segment.
pub fn is_subtopic(top: &str, candidate: &str) -> bool {
    let (top, candidate) = (segments(top), segments(candidate));
    let mut memo = Memo::new(&top, &candidate);

    subtopic_segments(&top, &candidate, 0, 0, &mut memo)
}

fn subtopic_segments(
    top: &[&str],
    candidate: &[&str],
    p: usize,
    c: usize,
    memo: &mut Memo,
) -> bool {
    if let Some(result) = memo.get(p, c) {
        return result;
    }
    let result = match top.get(p) {
        None => c == candidate.len(),
        Some(&SUPER_WILDCARD) if p + 1 == top.len() => true,
        Some(&SUPER_WILDCARD) => {
            (c..=candidate.len()).any(|skip| subtopic_segments(top, candidate, p + 1, skip, memo))
        }
        Some(&WILDCARD) => match candidate.get(c) {
            Some(&SUPER_WILDCARD) | None => false,
            Some(_) => subtopic_segments(top, candidate, p + 1, c + 1, memo),
        },
        Some(literal) => {
            candidate.get(c) == Some(literal)
                && subtopic_segments(top, candidate, p + 1, c + 1, memo)
        }
    };
    memo.set(p, c, result)
}

/// Reduce a list of patterns to its top-level members.
///
/// A pattern is dropped if it is equal to, or covered by, a pattern that is
/// kept. Order of the patterns that remain is preserved.
pub fn deduplicate<T: AsRef<str>>(patterns: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut result: Vec<T> = Vec::new();

    for pattern in patterns {
        let new = pattern.as_ref();
        let mut top_level = true;

        result.retain(|existing| {
            let existing = existing.as_ref();

            if existing == new {
                top_level = false;
                true
            } else if is_subtopic(new, existing) {
                false
            } else {
                if is_subtopic(existing, new) {
                    top_level = false;
                }
                true
            }
        });

        if top_level {
            result.push(pattern);
        }
    }
    result
}

/// Difference between two sets of top-level patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    /// Patterns that only exist in the new set.
    pub added: Vec<T>,
    /// Patterns that only exist in the old set.
    pub removed: Vec<T>,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl<T: fmt::Display> fmt::Display for Diff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.added {
            write!(f, "+{t} ")?;
        }
        for t in &self.removed {
            write!(f, "-{t} ")?;
        }
        Ok(())
    }
}

/// Deduplicate both sets of patterns and compare what remains by value.
pub fn diff<T: AsRef<str>>(
    old: impl IntoIterator<Item = T>,
    new: impl IntoIterator<Item = T>,
) -> Diff<T> {
    let new = deduplicate(new);
    let (kept, removed): (Vec<T>, Vec<T>) = deduplicate(old)
        .into_iter()
        .partition(|o| new.iter().any(|n| n.as_ref() == o.as_ref()));
    let added = new
        .into_iter()
        .filter(|n| !kept.iter().any(|o| o.as_ref() == n.as_ref()))
        .collect();

    Diff { added, removed }
}
