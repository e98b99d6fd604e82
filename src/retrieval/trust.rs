use std::collections::HashSet;

use url::{Host, Url};

use crate::model::Jurisdiction;

/// Immutable set of trusted hosts. Entries are either a literal host
/// (`www.gov.cn`) or a suffix beginning with `.` (`.gov.cn`) that matches any
/// subdomain but not the bare suffix itself.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    exact_hosts: HashSet<String>,
    suffixes: Vec<Vec<String>>,
    entries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    Exact(String),
    Suffix(String),
    Untrusted,
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        !matches!(self, Self::Untrusted)
    }
}

impl Allowlist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowlist = Self::default();
        for entry in entries {
            let raw = entry.as_ref().trim();
            let (is_suffix, host) = match raw.strip_prefix('.') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            let Some(host) = ascii_host(host) else {
                continue;
            };

            let normalized = if is_suffix {
                let labels = host_labels(&host);
                if !allowlist.suffixes.contains(&labels) {
                    allowlist.suffixes.push(labels);
                }
                format!(".{host}")
            } else {
                allowlist.exact_hosts.insert(host.clone());
                host
            };

            if !allowlist.entries.contains(&normalized) {
                allowlist.entries.push(normalized);
            }
        }
        allowlist
    }

    pub fn hint_for(&self, jurisdiction: Option<Jurisdiction>) -> Vec<String> {
        let mut hint = Vec::<String>::with_capacity(self.entries.len() + 1);
        if let Some(jurisdiction) = jurisdiction {
            let host = jurisdiction.gov_host().to_string();
            if self.classify_host(&host).is_trusted() {
                hint.push(host);
            }
        }
        for entry in &self.entries {
            if !hint.contains(entry) {
                hint.push(entry.clone());
            }
        }
        hint
    }

    pub fn classify_host(&self, host: &str) -> TrustDecision {
        let Some(host) = ascii_host(host) else {
            return TrustDecision::Untrusted;
        };
        if self.exact_hosts.contains(&host) {
            return TrustDecision::Exact(host);
        }

        let labels = host_labels(&host);
        for suffix in &self.suffixes {
            if labels.len() <= suffix.len() {
                continue;
            }
            let matched = labels
                .iter()
                .rev()
                .zip(suffix.iter().rev())
                .all(|(host_label, suffix_label)| host_label == suffix_label);
            if matched {
                return TrustDecision::Suffix(format!(".{}", suffix.join(".")));
            }
        }
        TrustDecision::Untrusted
    }

    pub fn classify(&self, url: &str) -> TrustDecision {
        match parse_host(url) {
            Some(host) => self.classify_host(&host),
            None => TrustDecision::Untrusted,
        }
    }
}

pub fn is_trusted(url: &str, allowlist: &Allowlist) -> bool {
    allowlist.classify(url).is_trusted()
}

pub fn parse_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    match parsed.host()? {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain.is_empty() { None } else { Some(domain) }
        }
        Host::Ipv4(_) | Host::Ipv6(_) => None,
    }
}

pub fn is_well_formed_source(url: &str) -> bool {
    !url.trim().is_empty() && parse_host(url).is_some()
}

pub fn matches_jurisdiction(url: &str, jurisdiction: Jurisdiction) -> bool {
    let Some(host) = parse_host(url) else {
        return false;
    };
    let portal = jurisdiction.gov_host();
    let labels = host_labels(&host);
    let portal_labels = host_labels(portal);
    labels.len() >= portal_labels.len()
        && labels
            .iter()
            .rev()
            .zip(portal_labels.iter().rev())
            .all(|(left, right)| left == right)
}

// Allowlist entries are compared against `Url` hosts, which are IDNA-encoded.
fn ascii_host(value: &str) -> Option<String> {
    let trimmed = value.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    match Host::parse(trimmed).ok()? {
        Host::Domain(domain) => Some(domain.to_ascii_lowercase()),
        Host::Ipv4(_) | Host::Ipv6(_) => None,
    }
}

fn host_labels(host: &str) -> Vec<String> {
    host.split('.')
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gov_allowlist() -> Allowlist {
        Allowlist::new(["gov.cn", ".gov.cn", "www.nea.gov.cn", ".sgcc.com.cn"])
    }

    #[test]
    fn suffix_entries_match_subdomains_on_label_boundaries() {
        let allowlist = gov_allowlist();
        assert!(is_trusted("https://gd.gov.cn/zwgk/index.html", &allowlist));
        assert!(is_trusted("http://drc.gd.gov.cn/a/b", &allowlist));
        assert!(is_trusted("https://www.sgcc.com.cn/html/x", &allowlist));
        assert!(!is_trusted("https://gov.cn.evil.com/x", &allowlist));
        assert!(!is_trusted("https://notgov.cn/x", &allowlist));
    }

    #[test]
    fn unicode_entries_match_punycode_hosts() {
        let allowlist = Allowlist::new([".政府.cn", "能源局.中国", "WWW.NEA.GOV.CN"]);
        assert!(is_trusted("https://www.政府.cn/a", &allowlist));
        assert!(is_trusted("https://能源局.中国/b", &allowlist));
        assert!(is_trusted("https://www.nea.gov.cn/c", &allowlist));
        assert!(!is_trusted("https://政府.cn/bare-suffix", &allowlist));

        let punycode = parse_host("https://www.政府.cn/").expect("host");
        assert!(punycode.starts_with("www.xn--"));
        assert!(is_trusted(&format!("https://{punycode}/d"), &allowlist));
        assert!(allowlist.hint_for(None).iter().all(|entry| entry.is_ascii()));
    }

    #[test]
    fn partial_label_matches_are_rejected() {
        let allowlist = Allowlist::new(["gd.gov.cn", ".gd.gov.cn"]);
        assert!(is_trusted("https://gd.gov.cn/", &allowlist));
        assert!(is_trusted("https://drc.gd.gov.cn/", &allowlist));
        assert!(!is_trusted("https://notgd.gov.cn/", &allowlist));
        assert!(!is_trusted("https://gd.gov.cn.example.com/", &allowlist));
    }

    #[test]
    fn bare_suffix_host_requires_exact_entry() {
        let allowlist = Allowlist::new([".sgcc.com.cn"]);
        assert!(!is_trusted("https://sgcc.com.cn/", &allowlist));
        assert!(is_trusted("https://ah.sgcc.com.cn/", &allowlist));
    }

    #[test]
    fn exact_match_is_reported_before_suffix_match() {
        let allowlist = gov_allowlist();
        assert_eq!(
            allowlist.classify("https://www.nea.gov.cn/policy"),
            TrustDecision::Exact("www.nea.gov.cn".to_string())
        );
        assert_eq!(
            allowlist.classify("https://zfxxgk.nea.gov.cn/policy"),
            TrustDecision::Suffix(".gov.cn".to_string())
        );
    }

    #[test]
    fn unparseable_and_non_http_urls_are_untrusted() {
        let allowlist = gov_allowlist();
        assert!(!is_trusted("not a url", &allowlist));
        assert!(!is_trusted("", &allowlist));
        assert!(!is_trusted("ftp://files.gov.cn/a.pdf", &allowlist));
        assert!(!is_trusted("https://10.0.0.1/gov.cn", &allowlist));
        assert!(!is_trusted("https://gd.gov.cn@evil.example.com/", &allowlist));
    }

    #[test]
    fn host_matching_is_case_insensitive_and_ignores_trailing_dot() {
        let allowlist = gov_allowlist();
        assert!(is_trusted("https://GD.GOV.CN./zwgk", &allowlist));
    }

    #[test]
    fn hint_puts_jurisdiction_portal_first() {
        let allowlist = gov_allowlist();
        let hint = allowlist.hint_for(Some(Jurisdiction::Gd));
        assert_eq!(hint.first().map(String::as_str), Some("gd.gov.cn"));
        assert!(hint.contains(&".gov.cn".to_string()));

        let untrusted_portal = Allowlist::new([".sgcc.com.cn"]).hint_for(Some(Jurisdiction::Gd));
        assert_eq!(untrusted_portal, vec![".sgcc.com.cn".to_string()]);
    }

    #[test]
    fn jurisdiction_matching_uses_portal_labels() {
        assert!(matches_jurisdiction("https://drc.gd.gov.cn/x", Jurisdiction::Gd));
        assert!(matches_jurisdiction("https://gd.gov.cn/x", Jurisdiction::Gd));
        assert!(!matches_jurisdiction("https://notgd.gov.cn/x", Jurisdiction::Gd));
        assert!(!matches_jurisdiction("https://www.gov.cn/x", Jurisdiction::Gd));
    }
}
