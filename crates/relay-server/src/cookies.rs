use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use relay_core::{ClientIdentity, SameSitePolicy, TrackingConfiguration};
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// Read/create/propagate policy for the identity cookie.
#[derive(Clone, Debug)]
pub struct CookieManager {
    name: String,
    expires_seconds: u64,
    same_site: SameSitePolicy,
}

impl CookieManager {
    pub fn new(name: impl Into<String>, expires_seconds: u64, same_site: SameSitePolicy) -> Self {
        Self {
            name: name.into(),
            expires_seconds,
            same_site,
        }
    }

    pub fn from_config(config: &TrackingConfiguration) -> Self {
        Self::new(
            config.cookie_name.clone(),
            config.cookie_expires_seconds,
            config.cookie_samesite,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity carried by the request, if the cookie is present and non-empty.
    pub fn inbound(&self, jar: &CookieJar) -> Option<ClientIdentity> {
        ClientIdentity::from_cookie(jar.get(&self.name).map(Cookie::value))
    }

    /// The identity cookie issued by the collection endpoint, if any.
    pub fn candidate_from_response(&self, headers: &HeaderMap) -> Option<Cookie<'static>> {
        headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|raw| Cookie::parse(raw.to_owned()).ok())
            .find(|c| c.name() == self.name)
    }

    /// Mirror `candidate` onto the browser unless it already holds an identity.
    pub fn propagate(
        &self,
        jar: CookieJar,
        existing: Option<&ClientIdentity>,
        candidate: Option<Cookie<'static>>,
    ) -> CookieJar {
        if existing.is_some() {
            return jar;
        }
        let Some(candidate) = candidate else {
            return jar;
        };

        let max_age = Duration::seconds(i64::try_from(self.expires_seconds).unwrap_or(i64::MAX));
        let mut cookie = Cookie::build((candidate.name().to_owned(), candidate.value().to_owned()))
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(same_site(self.same_site))
            .max_age(max_age);
        if let Some(expires) = OffsetDateTime::now_utc().checked_add(max_age) {
            cookie = cookie.expires(expires);
        }
        if let Some(domain) = candidate.domain() {
            cookie = cookie.domain(domain.to_owned());
        }

        debug!(cookie = %self.name, "propagating identity cookie");
        jar.add(cookie)
    }
}

fn same_site(policy: SameSitePolicy) -> SameSite {
    match policy {
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::None => SameSite::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn manager() -> CookieManager {
        CookieManager::new("FPID", 3600, SameSitePolicy::Lax)
    }

    fn headers(values: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for v in values {
            map.append(SET_COOKIE, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn inbound_ignores_empty_value() {
        let jar = CookieJar::new().add(Cookie::new("FPID", ""));
        assert!(manager().inbound(&jar).is_none());

        let jar = CookieJar::new().add(Cookie::new("FPID", "FPID2.2.abc"));
        assert_eq!(manager().inbound(&jar).unwrap().as_str(), "FPID2.2.abc");
    }

    #[test]
    fn candidate_picks_configured_name() {
        let h = headers(&[
            "_ga=GA1.1.1; Path=/",
            "FPID=FPID2.2.xyz; Domain=.example.com; Path=/; HttpOnly",
        ]);
        let c = manager().candidate_from_response(&h).unwrap();
        assert_eq!(c.value(), "FPID2.2.xyz");
        assert_eq!(c.domain(), Some("example.com"));

        assert!(manager().candidate_from_response(&headers(&["_ga=1"])).is_none());
    }

    #[test]
    fn propagate_sets_hardened_cookie() {
        let candidate = Cookie::parse("FPID=v1; Domain=example.com".to_owned()).unwrap();
        let jar = manager().propagate(CookieJar::new(), None, Some(candidate));

        let cookie = jar.get("FPID").unwrap();
        assert_eq!(cookie.value(), "v1");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(Duration::seconds(3600)));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert!(cookie.expires_datetime().unwrap() > OffsetDateTime::now_utc());
    }

    #[test]
    fn existing_identity_is_never_overwritten() {
        let existing = ClientIdentity::from_cookie(Some("old")).unwrap();
        let candidate = Cookie::parse("FPID=new".to_owned()).unwrap();
        let jar = manager().propagate(CookieJar::new(), Some(&existing), Some(candidate));
        assert!(jar.get("FPID").is_none());
    }

    #[test]
    fn no_candidate_no_cookie() {
        let jar = manager().propagate(CookieJar::new(), None, None);
        assert!(jar.get("FPID").is_none());
    }
}
