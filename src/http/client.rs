//! HTTP transport: a single pooled client shared by every component.
//!
//! The scanner talks to deliberately broken applications, so TLS
//! verification is skipped by default and redirects are capped rather than
//! followed forever. Bodies are read to completion inside `execute` so the
//! pooled connection is always released before the caller resumes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::header::{self, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};
use url::Url;

use crate::errors::{Result, ScanError};
use crate::http::request::HttpRequest;
use crate::http::response::{decode_body, parse_set_cookie, HttpResponse};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub insecure_skip_tls: bool,
    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,
    pub default_headers: HashMap<String, String>,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub keep_alive: bool,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 5,
            insecure_skip_tls: true,
            user_agent: "Lancet/0.1 Security Scanner".to_string(),
            proxy: None,
            default_headers: HashMap::new(),
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
            keep_alive: true,
        }
    }
}

pub struct HttpClient {
    client: Client,
    options: ClientOptions,
}

impl HttpClient {
    pub fn new(options: ClientOptions) -> Result<Self> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(options.insecure_skip_tls)
            .redirect(Policy::limited(options.max_redirects))
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .pool_idle_timeout(options.idle_timeout)
            .pool_max_idle_per_host(if options.keep_alive {
                options.max_idle_per_host
            } else {
                0
            });

        if let Some(proxy) = &options.proxy {
            let mut proxy_cfg = reqwest::Proxy::all(&proxy.address)
                .map_err(|e| ScanError::Config(format!("invalid proxy address: {e}")))?;
            if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
                proxy_cfg = proxy_cfg.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy_cfg);
        }

        let client = builder
            .build()
            .map_err(|e| ScanError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn get(&self, url: Url) -> Result<HttpResponse> {
        self.execute(HttpRequest::get(url)).await
    }

    pub async fn execute(&self, req: HttpRequest) -> Result<HttpResponse> {
        let start = Instant::now();

        let mut headers = req.headers.clone();
        self.apply_default_headers(&mut headers);

        let mut builder = self
            .client
            .request(req.method.clone(), req.url.clone())
            .headers(headers);
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            ScanError::from_transport(e, self.options.timeout, self.options.max_redirects)
        })?;

        let status = response.status().as_u16();

        let mut header_map = HashMap::new();
        let mut set_cookies = Vec::new();
        for (name, value) in response.headers() {
            let text = value.to_str().unwrap_or("").to_string();
            if *name == header::SET_COOKIE {
                if let Some(cookie) = parse_set_cookie(&text) {
                    set_cookies.push(cookie);
                }
            }
            header_map.entry(name.as_str().to_string()).or_insert(text);
        }

        let content_encoding = header_map.get("content-encoding").cloned();
        let raw = response.bytes().await.map_err(|e| {
            ScanError::from_transport(e, self.options.timeout, self.options.max_redirects)
        })?;
        let body = decode_body(content_encoding.as_deref(), raw.to_vec())?;

        Ok(HttpResponse {
            status,
            headers: header_map,
            set_cookies,
            body,
            elapsed: start.elapsed(),
        })
    }

    /// Browser-like defaults, applied only when the caller did not set the
    /// header itself.
    fn apply_default_headers(&self, headers: &mut header::HeaderMap) {
        let defaults: [(&HeaderName, &str); 4] = [
            (
                &header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            (&header::ACCEPT_LANGUAGE, "en-US,en;q=0.9"),
            (&header::ACCEPT_ENCODING, "gzip, deflate"),
            (&header::CONNECTION, "keep-alive"),
        ];

        for (name, value) in defaults {
            if *name == header::CONNECTION && !self.options.keep_alive {
                continue;
            }
            if !headers.contains_key(name) {
                if let Ok(v) = HeaderValue::from_str(value) {
                    headers.insert(name.clone(), v);
                }
            }
        }

        if !headers.contains_key(header::USER_AGENT) {
            if let Ok(v) = HeaderValue::from_str(&self.options.user_agent) {
                headers.insert(header::USER_AGENT, v);
            }
        }

        for (name, value) in &self.options.default_headers {
            if let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) {
                if !headers.contains_key(&header_name) {
                    if let Ok(v) = HeaderValue::from_str(value) {
                        headers.insert(header_name, v);
                    }
                }
            }
        }
    }

    /// Convenience wrapper building a GET from a string target.
    pub async fn get_str(&self, target: &str) -> Result<HttpResponse> {
        let url =
            Url::parse(target).map_err(|e| ScanError::Config(format!("invalid url {target}: {e}")))?;
        self.get(url).await
    }

    pub async fn post_form(&self, url: Url, body: String) -> Result<HttpResponse> {
        self.execute(HttpRequest::post_form(url, body)).await
    }

    pub fn method_from_str(method: &str) -> Method {
        Method::from_bytes(method.as_bytes()).unwrap_or(Method::GET)
    }
}
