//! Classification of media references.
//!
//! Pure and synchronous: no I/O, no suspension.

use url::Url;

/// Host substrings of providers known to hand out short-lived URLs.
pub const DEFAULT_EPHEMERAL_HOSTS: &[&str] = &["firefly", "adobe.com", "adobeio-static.net"];

/// Query parameters that mark a signed or expiring URL (compared case-insensitively).
const SIGNATURE_MARKERS: &[&str] = &[
    "sig",
    "se",
    "signature",
    "expires",
    "x-amz-signature",
    "x-amz-expires",
    "x-amz-credential",
    "x-goog-signature",
    "x-goog-expires",
];

/// What kind of reference a URL is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlClass {
    /// Unsigned URL on a durable storage host; nothing to do
    Durable,
    /// Signed/expiring or known-provider URL; must be migrated
    Ephemeral,
    /// Anything else (`blob:`, `data:`, plain third-party URLs)
    Unrecognized,
}

#[derive(Debug, Clone)]
pub struct UrlClassifier {
    durable_hosts: Vec<String>,
    ephemeral_hosts: Vec<String>,
}

impl UrlClassifier {
    /// `durable_hosts` entries are `host` or `host:port`.
    pub fn new(durable_hosts: Vec<String>, ephemeral_hosts: Vec<String>) -> Self {
        Self {
            durable_hosts: durable_hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            ephemeral_hosts: ephemeral_hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    pub fn durable_hosts(&self) -> &[String] {
        &self.durable_hosts
    }

    pub fn classify(&self, raw: &str) -> UrlClass {
        let Ok(url) = Url::parse(raw.trim()) else {
            return UrlClass::Unrecognized;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return UrlClass::Unrecognized;
        }
        let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
            return UrlClass::Unrecognized;
        };

        let signed = url
            .query_pairs()
            .any(|(key, _)| SIGNATURE_MARKERS.contains(&key.to_ascii_lowercase().as_str()));

        if self.is_durable_host(&host, url.port_or_known_default()) {
            return if signed { UrlClass::Ephemeral } else { UrlClass::Durable };
        }

        if signed || self.ephemeral_hosts.iter().any(|pattern| host.contains(pattern.as_str())) {
            UrlClass::Ephemeral
        } else {
            UrlClass::Unrecognized
        }
    }

    fn is_durable_host(&self, host: &str, port: Option<u16>) -> bool {
        self.durable_hosts.iter().any(|entry| match entry.rsplit_once(':') {
            Some((entry_host, entry_port)) if entry_port.chars().all(|c| c.is_ascii_digit()) => {
                entry_host == host && port.map(|p| p.to_string()).as_deref() == Some(entry_port)
            }
            _ => entry == host,
        })
    }

    pub fn is_ephemeral(&self, raw: &str) -> bool {
        self.classify(raw) == UrlClass::Ephemeral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> UrlClassifier {
        UrlClassifier::new(
            vec!["acct.blob.core.windows.net".into(), "127.0.0.1:10000".into()],
            DEFAULT_EPHEMERAL_HOSTS.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_durable_host_without_signature() {
        let c = classifier();
        assert_eq!(c.classify("https://acct.blob.core.windows.net/assets/fox.png"), UrlClass::Durable);
        assert_eq!(c.classify("http://127.0.0.1:10000/assets/fox.png"), UrlClass::Durable);
    }

    #[test]
    fn test_durable_host_with_signature_is_ephemeral() {
        let c = classifier();
        assert_eq!(
            c.classify("https://acct.blob.core.windows.net/assets/fox.png?sv=2023&se=2024&sig=abc"),
            UrlClass::Ephemeral
        );
    }

    #[test]
    fn test_port_must_match() {
        let c = classifier();
        assert_eq!(c.classify("http://127.0.0.1:9999/assets/fox.png"), UrlClass::Unrecognized);
        assert_eq!(c.classify("http://127.0.0.1:9999/img?sig=abc"), UrlClass::Ephemeral);
    }

    #[test]
    fn test_signature_markers() {
        let c = classifier();
        assert!(c.is_ephemeral("https://ephemeral.example/img?sig=abc"));
        assert!(c.is_ephemeral("https://bucket.s3.amazonaws.com/x.png?X-Amz-Signature=ff&X-Amz-Expires=3600"));
        assert!(c.is_ephemeral("https://storage.googleapis.com/b/x.png?X-Goog-Signature=1"));
    }

    #[test]
    fn test_provider_hosts() {
        let c = classifier();
        assert!(c.is_ephemeral("https://pre-signed-firefly-prod.s3-accelerate.amazonaws.com/images/x.jpg"));
        assert!(c.is_ephemeral("https://cdn.adobe.com/images/x.jpg"));
    }

    #[test]
    fn test_unrecognized_references() {
        let c = classifier();
        assert_eq!(c.classify("blob:https://app.example/1234-5678"), UrlClass::Unrecognized);
        assert_eq!(c.classify("data:image/png;base64,iVBORw0KGgo="), UrlClass::Unrecognized);
        assert_eq!(c.classify("https://example.com/cat.png"), UrlClass::Unrecognized);
        assert_eq!(c.classify("not a url"), UrlClass::Unrecognized);
    }
}
