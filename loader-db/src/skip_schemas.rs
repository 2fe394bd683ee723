/// A parsed `iglu:vendor/name/format/major-minor-patch` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgluUri {
    pub vendor: String,
    pub name: String,
    pub format: String,
    pub major: String,
    pub minor: String,
    pub patch: String,
}

impl IgluUri {
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("iglu:")?;
        let mut parts = rest.splitn(4, '/');
        let vendor = parts.next()?.to_string();
        let name = parts.next()?.to_string();
        let format = parts.next()?.to_string();
        let version = parts.next()?;

        let mut v = version.splitn(3, '-');
        let major = v.next()?.to_string();
        let minor = v.next()?.to_string();
        let patch = v.next()?.to_string();

        Some(Self {
            vendor,
            name,
            format,
            major,
            minor,
            patch,
        })
    }
}

/// One entry of `skipSchemas`: an Iglu URI pattern where any path segment
/// may be `*`.
#[derive(Debug, Clone)]
pub struct SkipPattern(String);

impl SkipPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn matches(&self, uri: &IgluUri) -> bool {
        let Some(pattern) = IgluUri::parse(&self.0) else {
            return false;
        };

        fn seg(pat: &str, val: &str) -> bool {
            pat == "*" || pat == val
        }

        seg(&pattern.vendor, &uri.vendor)
            && seg(&pattern.name, &uri.name)
            && seg(&pattern.format, &uri.format)
            && seg(&pattern.major, &uri.major)
            && seg(&pattern.minor, &uri.minor)
            && seg(&pattern.patch, &uri.patch)
    }
}

/// Drops self-describing entities whose URI matches any configured
/// pattern, before they ever reach column projection.
pub fn should_skip(patterns: &[SkipPattern], uri: &IgluUri) -> bool {
    patterns.iter().any(|p| p.matches(uri))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_any_version_segment() {
        let pattern = SkipPattern::new("iglu:com.acme/click/jsonschema/1-*-*");
        let uri = IgluUri::parse("iglu:com.acme/click/jsonschema/1-2-3").unwrap();
        assert!(pattern.matches(&uri));

        let other_major = IgluUri::parse("iglu:com.acme/click/jsonschema/2-2-3").unwrap();
        assert!(!pattern.matches(&other_major));
    }

    #[test]
    fn exact_pattern_requires_full_match() {
        let pattern = SkipPattern::new("iglu:com.acme/click/jsonschema/1-0-0");
        let uri = IgluUri::parse("iglu:com.acme/click/jsonschema/1-0-1").unwrap();
        assert!(!pattern.matches(&uri));
    }
}
