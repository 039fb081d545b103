//! Sandbox name filters.
//!
//! The engine reports container names with a leading `/`, so every filter
//! is anchored on it. Bulk operations select sandboxes with a pattern of
//! the form `^/{prefix}{stem}\S+$`; a single sandbox is selected with an
//! exact-name pattern.

use crate::error::Result;
use regex::Regex;

/// A compiled predicate over engine-reported sandbox names.
#[derive(Debug, Clone)]
pub struct NameFilter {
    regex: Regex,
}

impl NameFilter {
    /// Match every sandbox whose name starts with `prefix` followed by
    /// `stem` and at least one more non-whitespace character.
    ///
    /// An empty `stem` selects the whole environment.
    pub fn prefixed(prefix: &str, stem: &str) -> Result<Self> {
        let pattern = format!(
            r"^/{}{}[^\s]+$",
            regex::escape(prefix),
            regex::escape(stem)
        );
        Ok(Self {
            regex: Regex::new(&pattern)?,
        })
    }

    /// Match exactly one sandbox name.
    pub fn exact(name: &str) -> Result<Self> {
        let pattern = format!("^/{}$", regex::escape(name.trim_start_matches('/')));
        Ok(Self {
            regex: Regex::new(&pattern)?,
        })
    }

    /// Check a name as reported by the engine (`/name` or `name`).
    pub fn matches(&self, name: &str) -> bool {
        if name.starts_with('/') {
            self.regex.is_match(name)
        } else {
            self.regex.is_match(&format!("/{name}"))
        }
    }

    /// The underlying regular expression.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl std::fmt::Display for NameFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.regex.as_str())
    }
}
