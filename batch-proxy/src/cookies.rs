//! Forwarding of session cookies from the API to the caller.
//!
//! Only the call made against the session endpoint captures cookies. Those
//! cookies come back as values on that call's response and are re-issued to
//! the caller under a fixed policy.

use http::HeaderValue;
use http::header::InvalidHeaderValue;
use std::fmt::Write;
use std::time::{Duration, SystemTime};
use url::Url;

/// A Set-Cookie received from the API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub http_only: bool,
    pub max_age: Option<Duration>,
    pub expires: Option<SystemTime>,
}

impl CapturedCookie {
    /// Whether the cookie would be sent back to `url`. Host-only cookies
    /// always match the host that set them.
    pub fn applies_to(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        match self.domain.as_deref().map(|d| d.trim_start_matches('.')) {
            None | Some("") => true,
            Some(domain) => {
                host.eq_ignore_ascii_case(domain)
                    || host
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CookiePolicy {
    /// Mirrors whether the caller-facing site is served over https
    pub secure: bool,
}

/// A cookie to set on the caller-facing response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieWrite {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    /// Always off; the API decides cookie scope, not this proxy
    pub same_site: bool,
    pub max_age: Option<Duration>,
}

impl CookieWrite {
    pub fn to_header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={domain}");
        }
        if let Some(path) = &self.path {
            let _ = write!(out, "; Path={path}");
        }
        if let Some(max_age) = self.max_age {
            let _ = write!(out, "; Max-Age={}", max_age.as_secs());
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if self.secure {
            out.push_str("; Secure");
        }
        HeaderValue::from_str(&out)
    }
}

pub fn bridge_cookies(cookies: &[CapturedCookie], policy: CookiePolicy) -> Vec<CookieWrite> {
    let now = SystemTime::now();

    cookies
        .iter()
        .map(|cookie| CookieWrite {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            domain: cookie.domain.clone(),
            path: cookie.path.clone(),
            http_only: cookie.http_only,
            secure: policy.secure,
            same_site: false,
            // An expiry in the past saturates to zero, which deletes the cookie
            max_age: cookie.max_age.or_else(|| {
                cookie
                    .expires
                    .map(|expires| expires.duration_since(now).unwrap_or_default())
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: Option<&str>) -> CapturedCookie {
        CapturedCookie {
            name: name.to_string(),
            value: "abc".to_string(),
            domain: domain.map(str::to_string),
            path: Some("/".to_string()),
            http_only: true,
            max_age: None,
            expires: None,
        }
    }

    #[test]
    fn test_domain_matching() {
        let url = Url::parse("https://api.example.com/sessions").unwrap();

        assert!(cookie("sid", None).applies_to(&url));
        assert!(cookie("sid", Some("api.example.com")).applies_to(&url));
        assert!(cookie("sid", Some(".example.com")).applies_to(&url));
        assert!(cookie("sid", Some("EXAMPLE.com")).applies_to(&url));
        assert!(!cookie("sid", Some("other.com")).applies_to(&url));
        assert!(!cookie("sid", Some("ample.com")).applies_to(&url));
    }

    #[test]
    fn test_policy_applied() {
        let writes = bridge_cookies(
            &[cookie("sid", Some(".example.com"))],
            CookiePolicy { secure: true },
        );

        assert_eq!(
            writes,
            vec![CookieWrite {
                name: "sid".to_string(),
                value: "abc".to_string(),
                domain: Some(".example.com".to_string()),
                path: Some("/".to_string()),
                http_only: true,
                secure: true,
                same_site: false,
                max_age: None,
            }]
        );
        assert_eq!(
            writes[0].to_header_value().unwrap(),
            "sid=abc; Domain=.example.com; Path=/; HttpOnly; Secure"
        );
    }

    #[test]
    fn test_expiry_becomes_max_age() {
        let mut expiring = cookie("sid", None);
        expiring.expires = Some(SystemTime::now() + Duration::from_secs(3600));
        let mut expired = cookie("old", None);
        expired.expires = Some(SystemTime::UNIX_EPOCH);
        let mut explicit = cookie("ttl", None);
        explicit.max_age = Some(Duration::from_secs(60));

        let writes = bridge_cookies(&[expiring, expired, explicit], CookiePolicy::default());

        let remaining = writes[0].max_age.unwrap().as_secs();
        assert!(remaining > 3500 && remaining <= 3600);
        assert_eq!(writes[1].max_age, Some(Duration::ZERO));
        assert_eq!(writes[2].max_age, Some(Duration::from_secs(60)));
        assert!(!writes[2].secure);
        assert_eq!(
            writes[2].to_header_value().unwrap(),
            "ttl=abc; Path=/; Max-Age=60; HttpOnly"
        );
    }
}
