use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST with an urlencoded form body.
    pub fn post_form(url: Url, body: String) -> Self {
        let mut req = Self::new(Method::POST, url);
        req.set_header("Content-Type", "application/x-www-form-urlencoded");
        req.body = Some(body.into_bytes());
        req
    }

    pub fn set_body(&mut self, body: String) {
        self.body = Some(body.into_bytes());
    }

    /// Set a header, silently dropping names/values reqwest cannot carry.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
            if let Ok(header_value) = HeaderValue::from_str(value) {
                self.headers.insert(header_name, header_value);
            }
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
