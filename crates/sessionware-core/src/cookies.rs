//! Session cookie reading, signing and construction.
//!
//! Signing uses the `cookie` crate's HMAC-SHA256 signed jar. Several keys may
//! be configured: the first signs, any of them verifies, which allows secrets
//! to be rotated without logging everybody out.

use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::{Cookie, CookieJar, Key};

use crate::options::{MaxAge, SessionOptions};

/// Cookies sent with the incoming request
#[derive(Debug, Default, Clone)]
pub struct RequestCookies {
    jar: CookieJar,
}

impl RequestCookies {
    /// Empty cookie set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `Cookie` header values. Malformed pairs are skipped.
    pub fn parse<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut jar = CookieJar::new();
        for header in headers {
            for cookie in Cookie::split_parse(header.to_owned()).flatten() {
                jar.add_original(cookie);
            }
        }
        Self { jar }
    }

    /// Read a cookie value.
    ///
    /// When `signed`, the value is returned only if one of `keys` verifies its
    /// signature; tampered or unsigned values read as absent.
    pub fn get(&self, name: &str, signed: bool, keys: &[Key]) -> Option<String> {
        if !signed {
            return self.jar.get(name).map(|c| c.value().to_string());
        }

        keys.iter()
            .find_map(|key| self.jar.signed(key).get(name))
            .map(|c| c.value().to_string())
    }

    /// Whether a cookie with this name was sent at all
    pub fn contains(&self, name: &str) -> bool {
        self.jar.get(name).is_some()
    }
}

/// Build the outgoing session cookie carrying `value`.
///
/// A session-scoped `max_age` omits both `Max-Age` and `Expires`.
pub fn session_cookie(options: &SessionOptions, value: String, max_age: MaxAge) -> Cookie<'static> {
    let mut cookie = base_cookie(options, value);

    if let Some(duration) = max_age.duration() {
        let duration = CookieDuration::try_from(duration).unwrap_or(CookieDuration::MAX);
        cookie.set_max_age(duration);
        if let Some(expires) = OffsetDateTime::now_utc().checked_add(duration) {
            cookie.set_expires(expires);
        }
    }

    if options.signed {
        sign(cookie, options.keys())
    } else {
        cookie
    }
}

/// Build a cookie that clears the session cookie in the browser
pub fn removal_cookie(options: &SessionOptions) -> Cookie<'static> {
    let mut cookie = base_cookie(options, String::new());
    cookie.make_removal();
    cookie
}

/// Sign a cookie with the first key; unchanged if no key is configured
pub fn sign(cookie: Cookie<'static>, keys: &[Key]) -> Cookie<'static> {
    let Some(key) = keys.first() else {
        return cookie;
    };

    let name = cookie.name().to_string();
    let mut jar = CookieJar::new();
    jar.signed_mut(key).add(cookie.clone());
    jar.get(&name).cloned().unwrap_or(cookie)
}

fn base_cookie(options: &SessionOptions, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(options.key.clone(), value);
    cookie.set_path(options.path.clone());
    if options.http_only {
        cookie.set_http_only(true);
    }
    if options.secure {
        cookie.set_secure(true);
    }
    if let Some(domain) = &options.domain {
        cookie.set_domain(domain.clone());
    }
    if let Some(same_site) = options.same_site {
        cookie.set_same_site(same_site);
    }
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookie::SameSite;
    use std::sync::Arc;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const OTHER_SECRET: &str = "fedcba9876543210fedcba9876543210";

    fn options() -> Arc<SessionOptions> {
        SessionOptions::new().with_secret(SECRET).build().unwrap()
    }

    #[test]
    fn test_parse_multiple_headers() {
        let cookies = RequestCookies::parse(["a=1; b=2", "c=3"]);
        assert_eq!(cookies.get("a", false, &[]), Some("1".to_string()));
        assert_eq!(cookies.get("b", false, &[]), Some("2".to_string()));
        assert_eq!(cookies.get("c", false, &[]), Some("3".to_string()));
        assert!(!cookies.contains("d"));
    }

    #[test]
    fn test_signed_round_trip() {
        let options = options();
        let cookie = session_cookie(&options, "payload".into(), options.max_age);
        assert_ne!(cookie.value(), "payload");

        let header = format!("{}={}", cookie.name(), cookie.value());
        let cookies = RequestCookies::parse([header.as_str()]);
        assert_eq!(
            cookies.get("session", true, options.keys()),
            Some("payload".to_string())
        );
    }

    #[test]
    fn test_unsigned_value_rejected_when_signed() {
        let options = options();
        let cookies = RequestCookies::parse(["session=payload"]);
        assert_eq!(cookies.get("session", true, options.keys()), None);
        assert!(cookies.contains("session"));
    }

    #[test]
    fn test_key_rotation() {
        let old = SessionOptions::new().with_secret(OTHER_SECRET).build().unwrap();
        let cookie = session_cookie(&old, "payload".into(), old.max_age);
        let header = format!("{}={}", cookie.name(), cookie.value());
        let cookies = RequestCookies::parse([header.as_str()]);

        let rotated = SessionOptions::new()
            .with_secrets([SECRET, OTHER_SECRET])
            .build()
            .unwrap();
        assert_eq!(
            cookies.get("session", true, rotated.keys()),
            Some("payload".to_string())
        );

        let dropped = options();
        assert_eq!(cookies.get("session", true, dropped.keys()), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let options = SessionOptions::new()
            .with_secret(SECRET)
            .with_domain("example.com")
            .with_secure(true)
            .with_same_site(SameSite::Strict)
            .build()
            .unwrap();
        let cookie = session_cookie(&options, "v".into(), MaxAge::from_millis(3_600_000));

        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.max_age(), Some(CookieDuration::hours(1)));
        assert!(cookie.expires_datetime().is_some());
    }

    #[test]
    fn test_session_scoped_cookie_has_no_expiry() {
        let options = options();
        let cookie = session_cookie(&options, "v".into(), MaxAge::Session);
        assert_eq!(cookie.max_age(), None);
        assert!(cookie.expires().is_none());
    }

    #[test]
    fn test_removal_cookie() {
        let options = options();
        let cookie = removal_cookie(&options);
        assert_eq!(cookie.name(), "session");
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(CookieDuration::ZERO));
    }
}
