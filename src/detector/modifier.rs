//! Request mutation: rewrite exactly one injection point of a target with
//! a payload, preserving everything else including session state.
//!
//! `build_request` is pure so the cookie-precedence invariant can be
//! checked without touching the network; `send` adds transport and
//! cancellation.

use url::form_urlencoded;

use crate::core::cancel::CancelToken;
use crate::detector::extract::{InjectionPoint, Position};
use crate::detector::ScanTarget;
use crate::errors::{Result, ScanError};
use crate::http::client::HttpClient;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::session::Cookie;

pub struct RequestModifier {
    session_cookies: Vec<Cookie>,
}

impl RequestModifier {
    pub fn new() -> Self {
        Self {
            session_cookies: Vec::new(),
        }
    }

    /// Lend the session jar. Session cookies override target cookies of
    /// the same name on every request built afterwards.
    pub fn set_session_cookies(&mut self, cookies: &[Cookie]) {
        self.session_cookies = cookies.to_vec();
    }

    pub fn session_cookies(&self) -> &[Cookie] {
        &self.session_cookies
    }

    /// Build the mutated request for `point` ← `payload`.
    pub fn build_request(
        &self,
        target: &ScanTarget,
        point: &InjectionPoint,
        payload: &str,
    ) -> Result<HttpRequest> {
        let mut request = match point.position {
            Position::Query => self.with_query(target, &point.name, payload)?,
            Position::Body => self.with_body_field(target, &point.name, payload)?,
            Position::Header => self.with_header(target, &point.name, payload),
            Position::Cookie => {
                let mut req = self.base_request(target);
                req.set_header(
                    "Cookie",
                    &self.cookie_header(target, Some((&point.name, payload))),
                );
                return Ok(req);
            }
        };

        let cookie_header = self.cookie_header(target, None);
        if !cookie_header.is_empty() {
            request.set_header("Cookie", &cookie_header);
        }
        Ok(request)
    }

    /// Build and execute under the caller's cancellation token.
    pub async fn send(
        &self,
        cancel: &CancelToken,
        client: &HttpClient,
        target: &ScanTarget,
        point: &InjectionPoint,
        payload: &str,
    ) -> Result<HttpResponse> {
        let request = self.build_request(target, point, payload)?;
        tokio::select! {
            resp = client.execute(request) => resp,
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
        }
    }

    /// Replace (not append) the named query parameter.
    fn with_query(&self, target: &ScanTarget, name: &str, payload: &str) -> Result<HttpRequest> {
        let mut url = target.url.clone();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        {
            let mut editor = url.query_pairs_mut();
            editor.clear();
            let mut replaced = false;
            for (key, value) in &pairs {
                if key == name {
                    if !replaced {
                        editor.append_pair(key, payload);
                        replaced = true;
                    }
                } else {
                    editor.append_pair(key, value);
                }
            }
            if !replaced {
                editor.append_pair(name, payload);
            }
        }

        let mut request = HttpRequest::new(
            HttpClient::method_from_str(&target.method),
            url,
        );
        self.copy_headers(target, &mut request);
        Ok(request)
    }

    /// Re-parse the form body, set the field, re-encode.
    fn with_body_field(&self, target: &ScanTarget, name: &str, payload: &str) -> Result<HttpRequest> {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(target.body.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut encoder = form_urlencoded::Serializer::new(String::new());
        let mut replaced = false;
        for (key, value) in &pairs {
            if key == name {
                if !replaced {
                    encoder.append_pair(key, payload);
                    replaced = true;
                }
            } else {
                encoder.append_pair(key, value);
            }
        }
        if !replaced {
            encoder.append_pair(name, payload);
        }

        let mut request = HttpRequest::new(
            HttpClient::method_from_str(&target.method),
            target.url.clone(),
        );
        self.copy_headers(target, &mut request);
        request.set_header("Content-Type", "application/x-www-form-urlencoded");
        request.set_body(encoder.finish());
        Ok(request)
    }

    /// Override the named header.
    fn with_header(&self, target: &ScanTarget, name: &str, payload: &str) -> HttpRequest {
        let mut request = self.base_request(target);
        request.set_header(name, payload);
        request
    }

    fn base_request(&self, target: &ScanTarget) -> HttpRequest {
        let mut request = HttpRequest::new(
            HttpClient::method_from_str(&target.method),
            target.url.clone(),
        );
        self.copy_headers(target, &mut request);
        if !target.body.is_empty() {
            request.set_body(target.body.clone());
        }
        request
    }

    fn copy_headers(&self, target: &ScanTarget, request: &mut HttpRequest) {
        for (name, value) in &target.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            request.set_header(name, value);
        }
    }

    /// Assemble the Cookie header: target cookies first, session cookies
    /// after, with the session winning any name collision. `override_pair`
    /// mutates one target cookie (for Cookie-position injection) without
    /// touching the session's.
    fn cookie_header(&self, target: &ScanTarget, override_pair: Option<(&str, &str)>) -> String {
        let mut pairs: Vec<(String, String)> = Vec::new();

        for (name, value) in &target.cookies {
            if self.session_cookies.iter().any(|c| &c.name == name) {
                continue;
            }
            let value = match override_pair {
                Some((target_name, payload)) if target_name == name => payload.to_string(),
                _ => value.clone(),
            };
            pairs.push((name.clone(), value));
        }

        for cookie in &self.session_cookies {
            pairs.push((cookie.name.clone(), cookie.value.clone()));
        }

        pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for RequestModifier {
    fn default() -> Self {
        Self::new()
    }
}
