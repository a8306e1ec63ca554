//! Ignore list for stack-frame selection.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid ignore pattern {pattern:?}: {source}")]
pub struct IgnoreListError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// A set of compiled regexes; a location is ignored when any matches its
/// file. An invalid pattern fails construction, never matching.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<regex::Regex>,
}

impl IgnoreList {
    pub fn compile(patterns: &[String]) -> Result<Self, IgnoreListError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let re = regex::Regex::new(pattern).map_err(|source| IgnoreListError {
                pattern: pattern.clone(),
                source,
            })?;
            compiled.push(re);
        }
        Ok(Self { patterns: compiled })
    }

    pub fn is_ignored(&self, file: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(file))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_ignores_nothing() {
        let list = IgnoreList::default();
        assert!(!list.is_ignored("https://cdn.example/vendor.js"));
    }

    #[test]
    fn any_match_ignores() {
        let list =
            IgnoreList::compile(&["node_modules".to_owned(), r"\.min\.js$".to_owned()]).unwrap();
        assert!(list.is_ignored("webpack:///node_modules/react/index.js"));
        assert!(list.is_ignored("https://cdn.example/lib.min.js"));
        assert!(!list.is_ignored("src/app.ts"));
    }

    #[test]
    fn invalid_pattern_fails_construction() {
        let err = IgnoreList::compile(&["(".to_owned()]);
        assert!(err.is_err());
    }
}
