//! Outbound host allowlist.
//!
//! Entries are exact host names (`api.example.com`) or wildcards
//! (`*.example.com`). A wildcard matches any subdomain of the suffix but
//! not the bare suffix itself. Matching is case-insensitive and ignores a
//! trailing dot.

use url::Url;

#[derive(Debug, Clone, Default)]
pub struct DomainAllowlist {
    exact: Vec<String>,
    suffixes: Vec<String>,
}

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainDenied {
    #[error("'{0}' is not a valid absolute http(s) URL")]
    InvalidUrl(String),

    #[error("host '{0}' is not in the allowed domains")]
    NotAllowed(String),
}

fn normalize(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

impl DomainAllowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for entry in entries {
            let entry = normalize(entry.as_ref());
            if entry.is_empty() {
                continue;
            }
            match entry.strip_prefix("*.") {
                Some(suffix) if !suffix.is_empty() => list.suffixes.push(format!(".{suffix}")),
                _ => list.exact.push(entry),
            }
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.suffixes.is_empty()
    }

    /// Whether `host` may be contacted.
    pub fn allows_host(&self, host: &str) -> bool {
        let host = normalize(host);
        self.exact.iter().any(|h| *h == host)
            || self.suffixes.iter().any(|suffix| host.ends_with(suffix.as_str()))
    }

    /// Check a full URL, returning its normalized host on success.
    pub fn check_url(&self, raw: &str) -> Result<String, DomainDenied> {
        let url = Url::parse(raw).map_err(|_| DomainDenied::InvalidUrl(raw.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DomainDenied::InvalidUrl(raw.to_string()));
        }
        let host = url
            .host_str()
            .map(normalize)
            .ok_or_else(|| DomainDenied::InvalidUrl(raw.to_string()))?;
        if self.allows_host(&host) {
            Ok(host)
        } else {
            Err(DomainDenied::NotAllowed(host))
        }
    }
}
