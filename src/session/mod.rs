//! Authentication state: credentials, the cookie jar, and the form-login
//! state machine.
//!
//! The jar is mutated only by `login`/`logout`; during a scan it is lent
//! out read-only (request modifiers receive clones of the cookie list).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use url::{form_urlencoded, Url};

use crate::errors::{Result, ScanError};
use crate::http::client::HttpClient;
use crate::http::request::HttpRequest;
use crate::http::response::SetCookie;

/// One cookie in the session jar, keyed by (name, domain, path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

impl Cookie {
    pub fn pair(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: String::new(),
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Form {
        login_url: String,
        username: String,
        password: String,
        extra_fields: HashMap<String, String>,
        success_marker: Option<String>,
        failure_marker: Option<String>,
    },
    Basic {
        username: String,
        password: String,
    },
    Cookies(HashMap<String, String>),
    Bearer(String),
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        match self {
            Credentials::Form { login_url, .. } if login_url.trim().is_empty() => Err(
                ScanError::Config("form login requires a login url".to_string()),
            ),
            Credentials::Form { login_url, .. } => {
                Url::parse(login_url)
                    .map_err(|e| ScanError::Config(format!("invalid login url: {e}")))?;
                Ok(())
            }
            Credentials::Cookies(map) if map.is_empty() => Err(ScanError::Config(
                "cookie auth requires at least one cookie".to_string(),
            )),
            Credentials::Bearer(token) if token.trim().is_empty() => {
                Err(ScanError::Config("bearer auth requires a token".to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Outcome of the form-login oracle, in decision order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    SuccessMarker,
    FailureMarker,
    StillOnLoginForm,
    CookieHeuristic,
    Rejected(u16),
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoginOutcome::SuccessMarker | LoginOutcome::CookieHeuristic)
    }
}

/// Apply the success/failure oracle to a login response. First rule that
/// fires decides.
pub fn judge_login(
    body: &str,
    status: u16,
    cookie_count: usize,
    success_marker: Option<&str>,
    failure_marker: Option<&str>,
) -> LoginOutcome {
    if let Some(marker) = success_marker {
        if !marker.is_empty() && body.contains(marker) {
            return LoginOutcome::SuccessMarker;
        }
    }
    if let Some(marker) = failure_marker {
        if !marker.is_empty() && body.contains(marker) {
            return LoginOutcome::FailureMarker;
        }
    }
    if looks_like_login_form(body) {
        return LoginOutcome::StillOnLoginForm;
    }
    if cookie_count > 0 && status < 400 {
        return LoginOutcome::CookieHeuristic;
    }
    LoginOutcome::Rejected(status)
}

/// Heuristic: the response is still a login page.
fn looks_like_login_form(body: &str) -> bool {
    if body.contains("name=\"login\"") || body.contains("name='login'") {
        return true;
    }
    // <title>... Login ...</title>
    if let Some(start) = body.find("<title") {
        if let Some(open_end) = body[start..].find('>') {
            let after = &body[start + open_end + 1..];
            if let Some(close) = after.find("</title>") {
                return after[..close].to_ascii_lowercase().contains("login");
            }
        }
    }
    false
}

pub struct SessionManager {
    credentials: Credentials,
    cookies: Vec<Cookie>,
    logged_in: bool,
    login_time: Option<Instant>,
}

impl SessionManager {
    pub fn new(credentials: Credentials) -> Result<Self> {
        credentials.validate()?;
        Ok(Self {
            credentials,
            cookies: Vec::new(),
            logged_in: false,
            login_time: None,
        })
    }

    pub async fn login(&mut self, client: &HttpClient) -> Result<()> {
        match self.credentials.clone() {
            Credentials::Form {
                login_url,
                username,
                password,
                extra_fields,
                success_marker,
                failure_marker,
            } => {
                self.login_with_form(
                    client,
                    &login_url,
                    &username,
                    &password,
                    &extra_fields,
                    success_marker.as_deref(),
                    failure_marker.as_deref(),
                )
                .await
            }
            // Basic and Bearer carry their proof on every request; no
            // pre-login round trip is needed.
            Credentials::Basic { .. } | Credentials::Bearer(_) => {
                self.mark_logged_in();
                Ok(())
            }
            Credentials::Cookies(map) => {
                self.cookies = map
                    .iter()
                    .map(|(name, value)| Cookie::pair(name, value))
                    .collect();
                self.mark_logged_in();
                Ok(())
            }
        }
    }

    /// Two-step form login: GET the login page to harvest pre-session
    /// cookies, then POST the form with those cookies attached.
    #[allow(clippy::too_many_arguments)]
    async fn login_with_form(
        &mut self,
        client: &HttpClient,
        login_url: &str,
        username: &str,
        password: &str,
        extra_fields: &HashMap<String, String>,
        success_marker: Option<&str>,
        failure_marker: Option<&str>,
    ) -> Result<()> {
        let url = Url::parse(login_url)
            .map_err(|e| ScanError::Config(format!("invalid login url: {e}")))?;
        let host = url.host_str().unwrap_or_default().to_string();

        // Re-login always starts from a fresh jar.
        self.cookies.clear();
        self.logged_in = false;

        let initial = client.get(url.clone()).await?;
        let initial_cookies = initial.set_cookies.clone();
        tracing::debug!(
            count = initial_cookies.len(),
            "harvested pre-session cookies from login page"
        );

        let mut form: Vec<(String, String)> = Vec::new();
        if !username.is_empty() {
            form.push(("login".to_string(), username.to_string()));
        }
        if !password.is_empty() {
            form.push(("password".to_string(), password.to_string()));
        }
        for (key, value) in extra_fields {
            form.push((key.clone(), value.clone()));
        }
        let body = encode_form(&form);

        let mut request = HttpRequest::post_form(url.clone(), body);
        if !initial_cookies.is_empty() {
            request.set_header("Cookie", &render_cookie_pairs(&initial_cookies));
        }

        let response = client.execute(request).await?;
        let merged = merge_cookies(&initial_cookies, &response.set_cookies, &host);
        self.cookies = merged;

        if is_legacy_test_app(login_url) {
            self.insert_cookie(Cookie {
                name: "security_level".to_string(),
                value: "0".to_string(),
                domain: host.clone(),
                path: "/".to_string(),
            });
            tracing::debug!("legacy test app detected, forcing security_level=0");
        }

        let body_text = response.body_text();
        let outcome = judge_login(
            &body_text,
            response.status,
            self.cookies.len(),
            success_marker,
            failure_marker,
        );

        match outcome {
            LoginOutcome::SuccessMarker | LoginOutcome::CookieHeuristic => {
                self.mark_logged_in();
                tracing::info!(session_id = %self.session_id().unwrap_or_default(), "login succeeded");
                Ok(())
            }
            LoginOutcome::FailureMarker => {
                Err(ScanError::Auth("failure marker found in response".to_string()))
            }
            LoginOutcome::StillOnLoginForm => {
                Err(ScanError::Auth("response is still the login page".to_string()))
            }
            LoginOutcome::Rejected(status) => {
                Err(ScanError::Auth(format!("login rejected with status {status}")))
            }
        }
    }

    pub fn logout(&mut self) {
        self.logged_in = false;
        self.cookies.clear();
        self.login_time = None;
    }

    /// Attach the session's proof of identity to an outbound request.
    /// Idempotent; called on every request of an authenticated scan.
    pub fn apply_auth(&self, request: &mut HttpRequest) {
        if !self.logged_in {
            return;
        }
        match &self.credentials {
            Credentials::Basic { username, password } => {
                let encoded = BASE64.encode(format!("{username}:{password}"));
                request.set_header("Authorization", &format!("Basic {encoded}"));
            }
            Credentials::Bearer(token) => {
                request.set_header("Authorization", &format!("Bearer {token}"));
            }
            Credentials::Form { .. } | Credentials::Cookies(_) => {
                if !self.cookies.is_empty() {
                    request.set_header("Cookie", &self.cookie_string());
                }
            }
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// Value of the first cookie that looks like a session id.
    pub fn session_id(&self) -> Option<String> {
        self.cookies
            .iter()
            .find(|c| {
                let name = c.name.to_ascii_lowercase();
                name.contains("session") || name.contains("phpsessid") || name.contains("jsessionid")
            })
            .map(|c| c.value.clone())
    }

    /// `name=value; name2=value2` for UI and logging.
    pub fn cookie_string(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn login_duration(&self) -> Duration {
        match (self.logged_in, self.login_time) {
            (true, Some(at)) => at.elapsed(),
            _ => Duration::ZERO,
        }
    }

    fn mark_logged_in(&mut self) {
        self.logged_in = true;
        self.login_time = Some(Instant::now());
    }

    /// Insert preserving the (name, domain, path) uniqueness invariant.
    fn insert_cookie(&mut self, cookie: Cookie) {
        if let Some(existing) = self.cookies.iter_mut().find(|c| {
            c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
        }) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }
}

/// Union of pre-session and login-response cookies; the login response
/// wins on a name collision. Cookies without Domain get the login host,
/// without Path get `/`.
pub fn merge_cookies(initial: &[SetCookie], login: &[SetCookie], host: &str) -> Vec<Cookie> {
    let mut merged: Vec<SetCookie> = initial.to_vec();
    for cookie in login {
        if let Some(existing) = merged.iter_mut().find(|c| c.name == cookie.name) {
            *existing = cookie.clone();
        } else {
            merged.push(cookie.clone());
        }
    }

    merged
        .into_iter()
        .map(|c| Cookie {
            name: c.name,
            value: c.value,
            domain: c.domain.unwrap_or_else(|| host.to_string()),
            path: c.path.unwrap_or_else(|| "/".to_string()),
        })
        .collect()
}

/// Fingerprint for the legacy deliberately-vulnerable test app whose
/// difficulty is cookie-driven. Matches on the loopback address or the
/// app name in the login URL; a plain "localhost" deployment is not
/// assumed to be it.
fn is_legacy_test_app(login_url: &str) -> bool {
    let lower = login_url.to_ascii_lowercase();
    lower.contains("127.0.0.1") || lower.contains("bwapp")
}

fn render_cookie_pairs(cookies: &[SetCookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

fn encode_form(pairs: &[(String, String)]) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        out.append_pair(key, value);
    }
    out.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::ClientOptions;
    use crate::testutil::{TestResponse, TestServer};

    fn sc(name: &str, value: &str) -> SetCookie {
        SetCookie {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }

    #[test]
    fn form_credentials_require_login_url() {
        let creds = Credentials::Form {
            login_url: String::new(),
            username: "bee".into(),
            password: "bug".into(),
            extra_fields: HashMap::new(),
            success_marker: None,
            failure_marker: None,
        };
        assert!(matches!(creds.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn oracle_order_success_marker_first() {
        // Both markers present: success wins because it is checked first.
        let outcome = judge_login(
            "welcome! but also Invalid credentials",
            200,
            1,
            Some("welcome!"),
            Some("Invalid credentials"),
        );
        assert_eq!(outcome, LoginOutcome::SuccessMarker);
    }

    #[test]
    fn oracle_failure_marker_beats_cookie_heuristic() {
        let outcome = judge_login(
            "Invalid credentials",
            200,
            3,
            Some("not present"),
            Some("Invalid credentials"),
        );
        assert_eq!(outcome, LoginOutcome::FailureMarker);
        assert!(!outcome.is_success());
    }

    #[test]
    fn oracle_detects_login_form_by_title_and_input() {
        let by_title = judge_login("<title>bWAPP - Login</title>", 200, 1, None, None);
        assert_eq!(by_title, LoginOutcome::StillOnLoginForm);

        let by_input = judge_login("<input name=\"login\" type=\"text\">", 200, 1, None, None);
        assert_eq!(by_input, LoginOutcome::StillOnLoginForm);
    }

    #[test]
    fn oracle_cookie_heuristic_requires_cookie_and_status() {
        assert_eq!(
            judge_login("<p>portal</p>", 302, 1, None, None),
            LoginOutcome::CookieHeuristic
        );
        assert_eq!(
            judge_login("<p>portal</p>", 200, 0, None, None),
            LoginOutcome::Rejected(200)
        );
        assert_eq!(
            judge_login("<p>portal</p>", 403, 1, None, None),
            LoginOutcome::Rejected(403)
        );
    }

    #[test]
    fn merge_prefers_login_response_and_fills_defaults() {
        let initial = vec![sc("PHPSESSID", "old"), sc("lang", "en")];
        let login = vec![
            SetCookie {
                name: "PHPSESSID".into(),
                value: "fresh".into(),
                domain: Some("app.test".into()),
                path: Some("/app".into()),
            },
            sc("role", "user"),
        ];

        let merged = merge_cookies(&initial, &login, "127.0.0.1");
        assert_eq!(merged.len(), 3);

        let sess = merged.iter().find(|c| c.name == "PHPSESSID").unwrap();
        assert_eq!(sess.value, "fresh");
        assert_eq!(sess.domain, "app.test");
        assert_eq!(sess.path, "/app");

        let lang = merged.iter().find(|c| c.name == "lang").unwrap();
        assert_eq!(lang.domain, "127.0.0.1");
        assert_eq!(lang.path, "/");
    }

    #[test]
    fn legacy_test_app_fingerprint_is_narrow() {
        assert!(is_legacy_test_app("http://127.0.0.1/login.php"));
        assert!(is_legacy_test_app("http://bwapp.lab/login.php"));
        // A localhost deployment of some other app must not get the
        // synthetic difficulty cookie.
        assert!(!is_legacy_test_app("http://localhost:8080/login"));
        assert!(!is_legacy_test_app("http://app.test/login"));
    }

    #[test]
    fn session_id_picks_session_like_cookie() {
        let mut manager = SessionManager::new(Credentials::Cookies(HashMap::from([(
            "theme".to_string(),
            "dark".to_string(),
        )])))
        .unwrap();
        manager.cookies = vec![
            Cookie::pair("theme", "dark"),
            Cookie::pair("JSESSIONID", "j-123"),
        ];
        assert_eq!(manager.session_id().as_deref(), Some("j-123"));
    }

    #[tokio::test]
    async fn basic_auth_is_logged_in_immediately_and_sets_header() {
        let client = HttpClient::new(ClientOptions::default()).unwrap();
        let mut manager = SessionManager::new(Credentials::Basic {
            username: "admin".into(),
            password: "secret".into(),
        })
        .unwrap();
        manager.login(&client).await.unwrap();
        assert!(manager.is_logged_in());

        let mut req = HttpRequest::get(Url::parse("http://app.test/").unwrap());
        manager.apply_auth(&mut req);
        let auth = req.header("Authorization").unwrap();
        assert_eq!(auth, format!("Basic {}", BASE64.encode("admin:secret")));
    }

    #[tokio::test]
    async fn form_login_against_legacy_app() {
        // GET issues a session cookie; POST with valid creds shows the
        // success marker.
        let server = TestServer::spawn(|req| {
            if req.method == "GET" {
                TestResponse::html("<title>bWAPP - Login</title><input name=\"login\">")
                    .with_header("Set-Cookie", "PHPSESSID=sess-42; Path=/")
            } else if req.body.contains("login=bee") && req.body.contains("password=bug") {
                TestResponse::html("<h1>Choose your bug</h1>")
            } else {
                TestResponse::html("<title>bWAPP - Login</title>Invalid credentials")
            }
        })
        .await;

        let client = HttpClient::new(ClientOptions::default()).unwrap();
        let mut manager = SessionManager::new(Credentials::Form {
            login_url: server.url("/login.php"),
            username: "bee".into(),
            password: "bug".into(),
            extra_fields: HashMap::from([("form".to_string(), "submit".to_string())]),
            success_marker: Some("Choose your bug".into()),
            failure_marker: None,
        })
        .unwrap();

        manager.login(&client).await.unwrap();
        assert!(manager.is_logged_in());

        let jar = manager.cookie_string();
        assert!(jar.contains("PHPSESSID=sess-42"));
        assert!(jar.contains("security_level=0"));
        assert_eq!(manager.session_id().as_deref(), Some("sess-42"));
    }

    #[tokio::test]
    async fn login_twice_is_idempotent() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static LOGINS: AtomicUsize = AtomicUsize::new(0);

        let server = TestServer::spawn(|req| {
            if req.method == "GET" {
                let n = LOGINS.fetch_add(1, Ordering::SeqCst);
                TestResponse::html("login page")
                    .with_header("Set-Cookie", &format!("PHPSESSID=round-{n}; Path=/"))
            } else {
                TestResponse::html("<h1>Choose your bug</h1>")
            }
        })
        .await;

        let client = HttpClient::new(ClientOptions::default()).unwrap();
        let mut manager = SessionManager::new(Credentials::Form {
            login_url: server.url("/login.php"),
            username: "bee".into(),
            password: "bug".into(),
            extra_fields: HashMap::new(),
            success_marker: Some("Choose your bug".into()),
            failure_marker: None,
        })
        .unwrap();

        manager.login(&client).await.unwrap();
        manager.login(&client).await.unwrap();
        assert!(manager.is_logged_in());

        // The jar reflects the second login only: one session cookie (plus
        // the injected security_level), no stale duplicates.
        let sessions: Vec<_> = manager
            .cookies()
            .iter()
            .filter(|c| c.name == "PHPSESSID")
            .collect();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].value, "round-1");
    }

    #[test]
    fn logout_clears_the_jar() {
        let mut manager = SessionManager::new(Credentials::Cookies(HashMap::from([(
            "sid".to_string(),
            "1".to_string(),
        )])))
        .unwrap();
        manager.cookies = vec![Cookie::pair("sid", "1")];
        manager.logged_in = true;
        manager.logout();
        assert!(!manager.is_logged_in());
        assert!(manager.cookies().is_empty());
        assert_eq!(manager.login_duration(), Duration::ZERO);
    }
}
