//! Target selection predicate.
//!
//! A watcher is configured with zero or more constraints; a browser
//! target matches when every configured constraint passes. Regex
//! constraints are compiled once up front so an invalid pattern is a
//! configuration error, not a per-event failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// One entry from the browser's `/json/list` endpoint (or the extension
/// bridge's equivalent feed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Raw match criteria as configured (and as stored in the registry).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid match regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        source: regex::Error,
    },
}

/// `TargetMatch` with its regexes compiled.
#[derive(Debug, Clone)]
pub struct CompiledMatch {
    raw: TargetMatch,
    url_regex: Option<regex::Regex>,
    title_regex: Option<regex::Regex>,
}

impl TargetMatch {
    pub fn compile(self) -> Result<CompiledMatch, MatchError> {
        let compile = |pattern: &Option<String>| -> Result<Option<regex::Regex>, MatchError> {
            match pattern {
                Some(p) => regex::Regex::new(p)
                    .map(Some)
                    .map_err(|source| MatchError::InvalidRegex {
                        pattern: p.clone(),
                        source,
                    }),
                None => Ok(None),
            }
        };
        let url_regex = compile(&self.url_regex)?;
        let title_regex = compile(&self.title_regex)?;
        Ok(CompiledMatch {
            raw: self,
            url_regex,
            title_regex,
        })
    }

    /// True when no constraint is configured (matches every target).
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Short human description for log file headers and status output.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(v) = &self.url {
            parts.push(format!("url~{v}"));
        }
        if let Some(v) = &self.title {
            parts.push(format!("title~{v}"));
        }
        if let Some(v) = &self.url_regex {
            parts.push(format!("urlRegex={v}"));
        }
        if let Some(v) = &self.title_regex {
            parts.push(format!("titleRegex={v}"));
        }
        if let Some(v) = &self.kind {
            parts.push(format!("type={v}"));
        }
        if let Some(v) = &self.origin {
            parts.push(format!("origin={v}"));
        }
        if let Some(v) = &self.target_id {
            parts.push(format!("targetId={v}"));
        }
        if let Some(v) = &self.parent {
            parts.push(format!("parent~{v}"));
        }
        if parts.is_empty() {
            "any".to_owned()
        } else {
            parts.join(" ")
        }
    }
}

impl CompiledMatch {
    pub fn raw(&self) -> &TargetMatch {
        &self.raw
    }

    /// All configured constraints must pass. The `parent` constraint is
    /// a substring over the parent target's URL, so the full target list
    /// is needed to resolve it.
    pub fn matches(&self, target: &TargetInfo, all: &[TargetInfo]) -> bool {
        if let Some(needle) = &self.raw.url
            && !target.url.contains(needle.as_str())
        {
            return false;
        }
        if let Some(needle) = &self.raw.title
            && !target.title.contains(needle.as_str())
        {
            return false;
        }
        if let Some(re) = &self.url_regex
            && !re.is_match(&target.url)
        {
            return false;
        }
        if let Some(re) = &self.title_regex
            && !re.is_match(&target.title)
        {
            return false;
        }
        if let Some(kind) = &self.raw.kind
            && target.kind != *kind
        {
            return false;
        }
        if let Some(origin) = &self.raw.origin
            && !origin_matches(origin, &target.url)
        {
            return false;
        }
        if let Some(id) = &self.raw.target_id
            && target.id != *id
        {
            return false;
        }
        if let Some(needle) = &self.raw.parent {
            let parent_url = target
                .parent_id
                .as_deref()
                .and_then(|pid| all.iter().find(|t| t.id == pid))
                .map(|t| t.url.as_str());
            match parent_url {
                Some(url) if url.contains(needle.as_str()) => {}
                _ => return false,
            }
        }
        true
    }

    /// Pick the matching target. Ties are broken by ordering on target
    /// id so repeated selection is stable.
    pub fn select<'a>(&self, targets: &'a [TargetInfo]) -> Option<&'a TargetInfo> {
        let mut matching: Vec<&TargetInfo> = targets
            .iter()
            .filter(|t| self.matches(t, targets))
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching.into_iter().next()
    }
}

/// Compare an `origin` constraint against a target URL's
/// protocol+host+port.
fn origin_matches(origin: &str, target_url: &str) -> bool {
    let Ok(url) = Url::parse(target_url) else {
        return false;
    };
    let target_origin = url.origin().ascii_serialization();
    target_origin == origin.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, kind: &str, title: &str, url: &str) -> TargetInfo {
        TargetInfo {
            id: id.to_owned(),
            kind: kind.to_owned(),
            title: title.to_owned(),
            url: url.to_owned(),
            web_socket_debugger_url: None,
            parent_id: None,
        }
    }

    #[test]
    fn empty_match_accepts_everything() {
        let m = TargetMatch::default().compile().unwrap();
        let t = target("A", "page", "Home", "https://example.com/");
        assert!(m.matches(&t, &[]));
    }

    #[test]
    fn url_substring() {
        let m = TargetMatch {
            url: Some("localhost:4000".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(m.matches(&target("A", "page", "", "http://localhost:4000/app"), &[]));
        assert!(!m.matches(&target("B", "page", "", "http://localhost:5000/app"), &[]));
    }

    #[test]
    fn title_regex() {
        let m = TargetMatch {
            title_regex: Some("^Dash(board)?$".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(m.matches(&target("A", "page", "Dashboard", "x"), &[]));
        assert!(!m.matches(&target("B", "page", "My Dashboard", "x"), &[]));
    }

    #[test]
    fn invalid_regex_is_config_error() {
        let err = TargetMatch {
            url_regex: Some("(".into()),
            ..Default::default()
        }
        .compile();
        assert!(matches!(err, Err(MatchError::InvalidRegex { .. })));
    }

    #[test]
    fn kind_is_exact() {
        let m = TargetMatch {
            kind: Some("page".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(m.matches(&target("A", "page", "", ""), &[]));
        assert!(!m.matches(&target("B", "iframe", "", ""), &[]));
    }

    #[test]
    fn origin_compares_scheme_host_port() {
        let m = TargetMatch {
            origin: Some("http://localhost:4000".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(m.matches(&target("A", "page", "", "http://localhost:4000/deep/path?q=1"), &[]));
        assert!(!m.matches(&target("B", "page", "", "https://localhost:4000/"), &[]));
        assert!(!m.matches(&target("C", "page", "", "not a url"), &[]));
    }

    #[test]
    fn parent_substring_resolves_through_list() {
        let parent = target("P", "page", "Host", "https://host.example/shell");
        let mut child = target("C", "iframe", "Widget", "https://cdn.example/widget");
        child.parent_id = Some("P".into());

        let m = TargetMatch {
            parent: Some("host.example".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();

        let all = vec![parent.clone(), child.clone()];
        assert!(m.matches(&child, &all));
        assert!(!m.matches(&parent, &all), "parent itself has no parent");
    }

    #[test]
    fn select_breaks_ties_by_id() {
        let m = TargetMatch {
            kind: Some("page".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        let targets = vec![
            target("ZZZ", "page", "", ""),
            target("AAA", "page", "", ""),
            target("MMM", "iframe", "", ""),
        ];
        assert_eq!(m.select(&targets).map(|t| t.id.as_str()), Some("AAA"));
    }

    #[test]
    fn select_none_when_nothing_matches() {
        let m = TargetMatch {
            url: Some("missing".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(m.select(&[target("A", "page", "", "http://x/")]).is_none());
    }

    #[test]
    fn combined_constraints_all_must_pass() {
        let m = TargetMatch {
            url: Some("example.com".into()),
            kind: Some("page".into()),
            ..Default::default()
        }
        .compile()
        .unwrap();
        assert!(m.matches(&target("A", "page", "", "https://example.com/"), &[]));
        assert!(!m.matches(&target("B", "iframe", "", "https://example.com/"), &[]));
        assert!(!m.matches(&target("C", "page", "", "https://other.com/"), &[]));
    }
}
