//! Injection point enumeration.
//!
//! Walks a [`ScanTarget`] and emits every named slot a detector may
//! overwrite: query pairs, urlencoded body fields, non-auth cookies, and
//! a fixed allowlist of interesting request headers.

use url::form_urlencoded;

use crate::detector::ScanTarget;

/// Cookies that carry authentication or CSRF state and must never be
/// mutated by a probe.
const AUTH_COOKIE_DENYLIST: &[&str] = &[
    "PHPSESSID",
    "JSESSIONID",
    "ASP.NET_SessionId",
    "security_level",
    "_token",
    "csrf_token",
];

/// Request headers servers commonly reflect or log.
const PROBE_HEADERS: &[&str] = &["X-Forwarded-For", "X-Real-IP", "User-Agent", "Referer"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Query,
    Body,
    Header,
    Cookie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Numeric,
    Boolean,
    Email,
    Url,
}

#[derive(Debug, Clone)]
pub struct InjectionPoint {
    pub name: String,
    pub value: String,
    pub position: Position,
    pub param_type: ParamType,
}

pub struct ParameterExtractor;

impl ParameterExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, target: &ScanTarget) -> Vec<InjectionPoint> {
        let mut points = Vec::new();

        for (name, values) in &target.parameters {
            for value in values {
                points.push(InjectionPoint {
                    name: name.clone(),
                    value: value.clone(),
                    position: Position::Query,
                    param_type: infer_type(value),
                });
            }
        }

        if target.method.eq_ignore_ascii_case("POST")
            && target
                .headers
                .iter()
                .any(|(k, v)| {
                    k.eq_ignore_ascii_case("content-type")
                        && v.contains("application/x-www-form-urlencoded")
                })
        {
            for (name, value) in form_urlencoded::parse(target.body.as_bytes()) {
                points.push(InjectionPoint {
                    name: name.to_string(),
                    value: value.to_string(),
                    position: Position::Body,
                    param_type: infer_type(&value),
                });
            }
        }

        for (name, value) in &target.cookies {
            let is_auth = AUTH_COOKIE_DENYLIST
                .iter()
                .any(|denied| denied.eq_ignore_ascii_case(name));
            if is_auth {
                continue;
            }
            points.push(InjectionPoint {
                name: name.clone(),
                value: value.clone(),
                position: Position::Cookie,
                param_type: infer_type(value),
            });
        }

        for header in PROBE_HEADERS {
            if let Some((name, value)) = target
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(header))
            {
                points.push(InjectionPoint {
                    name: name.clone(),
                    value: value.clone(),
                    position: Position::Header,
                    param_type: ParamType::String,
                });
            }
        }

        points
    }
}

impl Default for ParameterExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Type inference, first match wins.
pub fn infer_type(value: &str) -> ParamType {
    let trimmed = value.trim();
    // 0 and 1 are claimed here before the Boolean rule runs.
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return ParamType::Numeric;
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower == "true" || lower == "false" || lower == "0" || lower == "1" {
        return ParamType::Boolean;
    }
    if trimmed.contains('@') && trimmed.contains('.') {
        return ParamType::Email;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return ParamType::Url;
    }
    ParamType::String
}
