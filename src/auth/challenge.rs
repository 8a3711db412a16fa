//! WWW-Authenticate Bearer challenge parsing and serialization
//!
//! Registries advertise their token service through a `WWW-Authenticate:
//! Bearer` header. Only the `realm`, `service`, `scope` and `error`
//! directives are recognized; anything else is ignored.

use std::fmt;
use std::sync::OnceLock;

use regex_lite::Regex;

/// The recognized directives of a `WWW-Authenticate: Bearer` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: String,
    pub scope: String,
    pub error: String,
}

fn directive_regex() -> &'static Regex {
    static DIRECTIVE_REGEX: OnceLock<Regex> = OnceLock::new();
    DIRECTIVE_REGEX.get_or_init(|| {
        Regex::new(r#"(realm|service|scope|error)="([^"]+)""#)
            .expect("invalid challenge directive pattern")
    })
}

impl BearerChallenge {
    /// Parse a header value, returning `None` unless at least one
    /// recognized directive was found.
    pub fn parse(header_value: &str) -> Option<Self> {
        let mut challenge = BearerChallenge::default();
        let mut found = false;

        for caps in directive_regex().captures_iter(header_value) {
            let value = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
            match caps.get(1).map(|m| m.as_str()) {
                Some("realm") => challenge.realm = value,
                Some("service") => challenge.service = value,
                Some("scope") => challenge.scope = value,
                Some("error") => challenge.error = value,
                _ => continue,
            }
            found = true;
        }

        found.then_some(challenge)
    }
}

impl fmt::Display for BearerChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"Bearer realm="{}",service="{}",scope="{}""#,
            self.realm, self.service, self.scope
        )
    }
}
