//! Allow-list for `next` redirect targets.
//!
//! Only absolute http(s) URLs whose origin is the broker's own base URL or one of
//! the configured frontend origins are accepted. The same origins drive the CORS
//! layer.

use url::Url;

#[derive(Clone, Debug, Default)]
pub struct RedirectPolicy {
    origins: Vec<String>,
}

impl RedirectPolicy {
    #[must_use]
    pub fn new(base_url: &Url) -> Self {
        Self {
            origins: vec![base_url.origin().ascii_serialization()],
        }
    }

    /// Add an allowed origin; values that are not absolute URLs are ignored.
    #[must_use]
    pub fn with_origin(mut self, origin: &str) -> Self {
        if let Ok(url) = Url::parse(origin.trim()) {
            let origin = url.origin();
            if origin.is_tuple() {
                let serialized = origin.ascii_serialization();
                if !self.origins.contains(&serialized) {
                    self.origins.push(serialized);
                }
            }
        }
        self
    }

    #[must_use]
    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    #[must_use]
    pub fn is_allowed(&self, target: &Url) -> bool {
        matches!(target.scheme(), "http" | "https")
            && self
                .origins
                .iter()
                .any(|origin| *origin == target.origin().ascii_serialization())
    }

    /// Parse and check a raw `next` value.
    #[must_use]
    pub fn allowed_target(&self, raw: &str) -> Option<Url> {
        Url::parse(raw).ok().filter(|url| self.is_allowed(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Result<RedirectPolicy, url::ParseError> {
        Ok(RedirectPolicy::new(&Url::parse("https://auth.example.nl")?)
            .with_origin("https://forms.example.nl/")
            .with_origin("not a url"))
    }

    #[test]
    fn allows_configured_origins() -> Result<(), url::ParseError> {
        let policy = policy()?;
        assert_eq!(policy.origins().len(), 2);
        assert!(policy.allowed_target("https://forms.example.nl/melding?step=1").is_some());
        assert!(policy.allowed_target("https://auth.example.nl/done").is_some());
        Ok(())
    }

    #[test]
    fn rejects_other_origins_and_schemes() -> Result<(), url::ParseError> {
        let policy = policy()?;
        assert!(policy.allowed_target("https://evil.example.com/").is_none());
        assert!(policy.allowed_target("http://forms.example.nl/").is_none());
        assert!(policy.allowed_target("https://forms.example.nl:8443/").is_none());
        assert!(policy.allowed_target("javascript:alert(1)").is_none());
        assert!(policy.allowed_target("/relative").is_none());
        Ok(())
    }
}
