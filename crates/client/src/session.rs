//! Login state and the bearer token.
//!
//! A [`Session`] is owned by one client instance and threaded by mutable
//! reference through every engine call. The token is refreshed before each
//! authenticated request instead of being cached with an expiry, so a
//! session invalidated on the server side is noticed on the next call.

use cookie::Cookie;
use time::OffsetDateTime;

use crate::config::Credentials;
use crate::error::DuneError;
use crate::transport::{HttpRequest, HttpResponse, RequestBody, Transport};

const CSRF_COOKIE: &str = "csrf";
const AUTH_REFRESH_COOKIE: &str = "auth-refresh";

/// A cookie held by a [`Session`], scoped to the host that set it or to
/// its `Domain` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredCookie {
    name: String,
    value: String,
    /// Domain attribute, without a leading dot. `None` means host-only.
    domain: Option<String>,
    host: String,
    path: String,
}

impl StoredCookie {
    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name
            && self.domain == other.domain
            && self.path == other.path
            && (self.domain.is_some() || self.host == other.host)
    }

    fn matches(&self, host: &str, path: &str) -> bool {
        let host_ok = match &self.domain {
            Some(domain) => host == domain || host.ends_with(&format!(".{}", domain)),
            None => host == self.host,
        };
        host_ok && path.starts_with(&self.path)
    }
}

/// Cookies, CSRF token and bearer token of one logged-in client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    cookies: Vec<StoredCookie>,
    csrf: Option<String>,
    auth_refresh: Option<String>,
    token: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn is_logged_in(&self) -> bool {
        self.auth_refresh.is_some()
    }

    pub fn csrf(&self) -> Option<&str> {
        self.csrf.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Value of the first stored cookie called `name`, whatever its scope.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Forget everything; the next call must log in again.
    pub fn reset(&mut self) {
        *self = Session::default();
    }

    /// Record the cookies `response` set for a request to `request_url`.
    ///
    /// A cookie whose `Max-Age` is zero or negative, or whose `Expires` lies
    /// in the past, removes the stored cookie of the same name and scope.
    pub fn absorb(&mut self, request_url: &str, response: &HttpResponse) {
        let Some((host, _)) = host_and_path(request_url) else {
            return;
        };
        let now = OffsetDateTime::now_utc();

        for raw in &response.set_cookies {
            let Ok(parsed) = Cookie::parse(raw.as_str()) else {
                tracing::debug!(cookie = %raw, "ignoring unparseable Set-Cookie");
                continue;
            };
            let expired = parsed.max_age().is_some_and(|age| age <= time::Duration::ZERO)
                || parsed.expires_datetime().is_some_and(|at| at <= now);

            let stored = StoredCookie {
                name: parsed.name().to_string(),
                value: parsed.value_trimmed().to_string(),
                domain: parsed
                    .domain()
                    .map(|d| d.trim_start_matches('.').to_ascii_lowercase())
                    .filter(|d| !d.is_empty()),
                host: host.clone(),
                path: parsed.path().unwrap_or("/").to_string(),
            };

            self.cookies.retain(|c| !c.same_slot(&stored));
            if !expired {
                self.cookies.push(stored);
            }
        }
    }

    /// `Cookie` header value for a request to `url`.
    pub fn cookie_header(&self, url: &str) -> Option<String> {
        let (host, path) = host_and_path(url)?;
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|c| c.matches(&host, &path))
            .map(|c| Cookie::new(c.name.as_str(), c.value.as_str()).to_string())
            .collect();
        if pairs.is_empty() {
            return None;
        }
        Some(pairs.join("; "))
    }

    /// Add browser headers, in-scope cookies and (if present) the bearer
    /// token.
    pub(crate) fn decorate(&self, mut request: HttpRequest, origin: &str) -> HttpRequest {
        request = request
            .header("origin", origin)
            .header("sec-ch-ua", "empty")
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-fetch-dest", "empty")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-site", "same-site")
            .header("dnt", "1");
        if let Some(cookies) = self.cookie_header(&request.url) {
            request = request.header("cookie", cookies);
        }
        if let Some(token) = &self.token {
            request = request.header("authorization", format!("Bearer {}", token));
        }
        request
    }
}

/// Lower-cased host and path of `url`.
fn host_and_path(url: &str) -> Option<(String, String)> {
    let uri: ureq::http::Uri = url.parse().ok()?;
    let host = uri.host()?.to_ascii_lowercase();
    let path = match uri.path() {
        "" => "/".to_string(),
        p => p.to_string(),
    };
    Some((host, path))
}

/// Performs login and token refresh against the service's auth endpoints.
#[derive(Debug, Clone)]
pub struct Authenticator {
    base_url: String,
    credentials: Credentials,
}

impl Authenticator {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Authenticator {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Establish a fresh session: load the login page, obtain the CSRF
    /// cookie, then post the credentials to receive the refresh cookie.
    pub fn login<T: Transport + ?Sized>(
        &self,
        transport: &T,
        session: &mut Session,
    ) -> Result<(), DuneError> {
        session.reset();

        let login_page = HttpRequest::get(format!("{}/auth/login", self.base_url));
        self.send(transport, session, login_page)?;

        let csrf_request =
            HttpRequest::post(format!("{}/api/auth/csrf", self.base_url), RequestBody::Empty);
        self.send(transport, session, csrf_request)?;
        let csrf = session
            .cookie(CSRF_COOKIE)
            .map(str::to_string)
            .ok_or_else(|| DuneError::Auth("no csrf cookie in response".to_string()))?;
        session.csrf = Some(csrf.clone());

        let form = vec![
            ("action".to_string(), "login".to_string()),
            ("username".to_string(), self.credentials.username.clone()),
            ("password".to_string(), self.credentials.password.clone()),
            ("csrf".to_string(), csrf),
            ("next".to_string(), self.base_url.clone()),
        ];
        let auth_request =
            HttpRequest::post(format!("{}/api/auth", self.base_url), RequestBody::Form(form));
        self.send(transport, session, auth_request)?;

        let refresh = session.cookie(AUTH_REFRESH_COOKIE).map(str::to_string).ok_or_else(|| {
            DuneError::Auth(format!(
                "login rejected for user '{}'",
                self.credentials.username
            ))
        })?;
        session.auth_refresh = Some(refresh);
        tracing::debug!(user = %self.credentials.username, "logged in");
        Ok(())
    }

    /// Fetch a new bearer token with the current session cookies.
    pub fn refresh_token<T: Transport + ?Sized>(
        &self,
        transport: &T,
        session: &mut Session,
    ) -> Result<(), DuneError> {
        let request = HttpRequest::post(
            format!("{}/api/auth/session", self.base_url),
            RequestBody::Empty,
        );
        let response = self.send(transport, session, request)?;
        if response.status != 200 {
            return Err(DuneError::Auth(format!(
                "token refresh returned status {}",
                response.status
            )));
        }
        let token = response
            .json()
            .and_then(|body| body.get("token").and_then(|t| t.as_str()).map(str::to_string))
            .ok_or_else(|| DuneError::Auth("token refresh response has no token".to_string()))?;
        session.token = Some(token);
        Ok(())
    }

    fn send<T: Transport + ?Sized>(
        &self,
        transport: &T,
        session: &mut Session,
        request: HttpRequest,
    ) -> Result<HttpResponse, DuneError> {
        let request = session.decorate(request, &self.base_url);
        let response = transport
            .send(&request)
            .map_err(|e| DuneError::Auth(e.to_string()))?;
        session.absorb(&request.url, &response);
        Ok(response)
    }
}
