//! URL patterns used to classify requests.

use serde::{Deserialize, Serialize};
use url::Url;

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Exact URL match.
    Exact,
    /// Prefix match.
    Prefix,
    /// Suffix match.
    Suffix,
    /// Contains substring anywhere in the serialized URL.
    Contains,
    /// Host equals the pattern or is a subdomain of it.
    Host,
}

/// URL pattern for matching.
///
/// Serialized as `{ "type": "contains", "pattern": "unpkg.com" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    /// Pattern type.
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self::new(PatternType::Exact, url)
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self::new(PatternType::Prefix, prefix)
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self::new(PatternType::Suffix, suffix)
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::new(PatternType::Contains, substring)
    }

    /// Create a host pattern (matches the host and its subdomains).
    pub fn host(host: &str) -> Self {
        Self::new(PatternType::Host, host)
    }

    fn new(pattern_type: PatternType, pattern: &str) -> Self {
        Self {
            pattern_type,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.pattern_type {
            PatternType::Exact => url_str == self.pattern,
            PatternType::Prefix => url_str.starts_with(&self.pattern),
            PatternType::Suffix => url_str.ends_with(&self.pattern),
            PatternType::Contains => url_str.contains(&self.pattern),
            PatternType::Host => match url.host_str() {
                Some(host) => {
                    let pattern = self.pattern.to_ascii_lowercase();
                    host == pattern
                        || host
                            .strip_suffix(pattern.as_str())
                            .is_some_and(|rest| rest.ends_with('.'))
                }
                None => false,
            },
        }
    }
}

/// Whether any pattern in the list matches the URL.
pub fn matches_any(patterns: &[UrlPattern], url: &Url) -> bool {
    patterns.iter().any(|p| p.matches(url))
}
