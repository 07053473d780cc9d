//! Hybrid coordinator: picks an auth/crawl/detect strategy per phase and
//! merges traditional discoveries with those of an external browser
//! collaborator.
//!
//! The collaborator's whole contract is `BrowserDriver`: given
//! credentials and a target it returns a cookie jar, and it can enumerate
//! function points from a rendered DOM. The coordinator runs fine without
//! one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::core::cancel::CancelToken;
use crate::core::engine::ScanEngine;
use crate::crawler::{Crawler, CrawlerConfig, CrawlResult};
use crate::detector::ScanTarget;
use crate::errors::{Result, ScanError};
use crate::report::model::{ScanResult, TargetResult, TargetStatus};
use crate::session::{Cookie, Credentials};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    Traditional,
    Browser,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStrategy {
    Traditional,
    Browser,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    Active,
    Passive,
    Hybrid,
}

/// A concrete (method, URL, parameter set) tuple suitable as detector
/// input.
#[derive(Debug, Clone)]
pub struct FunctionPoint {
    pub method: String,
    pub url: String,
    /// Discovery kind: "link", "form", "api", ...
    pub kind: String,
    pub parameters: HashMap<String, ParameterInfo>,
}

#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub default_value: String,
    pub injectable: bool,
}

#[derive(Debug, Clone)]
pub struct BrowserAuth {
    pub success: bool,
    pub cookies: Vec<Cookie>,
}

/// Narrow contract of the external browser-automation collaborator.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials, target: &str) -> Result<BrowserAuth>;
    async fn discover(&self, target: &str) -> Result<Vec<FunctionPoint>>;
}

#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub auth_strategy: AuthStrategy,
    pub crawl_strategy: CrawlStrategy,
    pub detection_mode: DetectionMode,
    pub auto_fallback: bool,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            auth_strategy: AuthStrategy::Traditional,
            crawl_strategy: CrawlStrategy::Traditional,
            detection_mode: DetectionMode::Active,
            auto_fallback: true,
        }
    }
}

pub struct HybridScanner {
    engine: Arc<ScanEngine>,
    browser: Option<Box<dyn BrowserDriver>>,
    config: HybridConfig,
    crawler_config: CrawlerConfig,
    client: Arc<crate::http::client::HttpClient>,
}

impl HybridScanner {
    pub fn new(
        engine: Arc<ScanEngine>,
        client: Arc<crate::http::client::HttpClient>,
        browser: Option<Box<dyn BrowserDriver>>,
        config: HybridConfig,
        crawler_config: CrawlerConfig,
    ) -> Self {
        Self {
            engine,
            browser,
            config,
            crawler_config,
            client,
        }
    }

    pub async fn scan_url(
        &self,
        cancel: &CancelToken,
        target: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Arc<ScanResult>> {
        // Authentication phase.
        let auth_cookies = match credentials {
            Some(credentials) => self.authenticate(cancel, target, credentials).await?,
            None => Vec::new(),
        };

        // Discovery phase.
        let function_points = self.discover(cancel, target, &auth_cookies).await;
        tracing::info!(points = function_points.len(), "function point discovery finished");

        // Detection phase. A jar established outside the engine (browser
        // auth) is handed to the plugins explicitly.
        if !auth_cookies.is_empty() {
            self.engine.adopt_session_cookies(&auth_cookies).await;
        }
        match self.config.detection_mode {
            DetectionMode::Passive => {
                tracing::info!("passive mode: no active probes sent");
                let result = Arc::new(ScanResult::with_generated_id());
                result.set_completed();
                Ok(result)
            }
            DetectionMode::Active | DetectionMode::Hybrid => {
                self.detect(cancel, target, &auth_cookies, function_points).await
            }
        }
    }

    async fn authenticate(
        &self,
        _cancel: &CancelToken,
        target: &str,
        credentials: &Credentials,
    ) -> Result<Vec<Cookie>> {
        let effective = if self.browser.is_none() {
            AuthStrategy::Traditional
        } else {
            self.config.auth_strategy
        };

        match effective {
            AuthStrategy::Traditional => self.traditional_auth().await,
            AuthStrategy::Browser => self.browser_auth(credentials, target).await,
            AuthStrategy::Hybrid => match self.traditional_auth().await {
                Ok(cookies) => Ok(cookies),
                Err(err) if self.config.auto_fallback => {
                    tracing::info!(%err, "traditional auth failed, falling back to browser");
                    self.browser_auth(credentials, target).await
                }
                Err(err) => Err(err),
            },
        }
    }

    async fn traditional_auth(&self) -> Result<Vec<Cookie>> {
        self.engine.login().await?;
        let jar = self.engine.session_cookie_string().await;
        Ok(parse_cookie_string(&jar))
    }

    async fn browser_auth(&self, credentials: &Credentials, target: &str) -> Result<Vec<Cookie>> {
        let Some(browser) = &self.browser else {
            return Err(ScanError::Auth("browser collaborator not available".to_string()));
        };
        let auth = browser.authenticate(credentials, target).await?;
        if !auth.success {
            return Err(ScanError::Auth("browser authentication failed".to_string()));
        }
        Ok(auth.cookies)
    }

    async fn discover(
        &self,
        cancel: &CancelToken,
        target: &str,
        auth_cookies: &[Cookie],
    ) -> Vec<FunctionPoint> {
        let effective = if self.browser.is_none() {
            CrawlStrategy::Traditional
        } else {
            self.config.crawl_strategy
        };

        match effective {
            CrawlStrategy::Traditional => self.traditional_discover(cancel, target, auth_cookies).await,
            CrawlStrategy::Browser => self.browser_discover(target).await,
            CrawlStrategy::Hybrid => {
                let traditional = self.traditional_discover(cancel, target, auth_cookies).await;
                let browser = self.browser_discover(target).await;
                merge_function_points(traditional, browser)
            }
        }
    }

    async fn traditional_discover(
        &self,
        cancel: &CancelToken,
        target: &str,
        auth_cookies: &[Cookie],
    ) -> Vec<FunctionPoint> {
        let Ok(start) = Url::parse(target) else {
            return Vec::new();
        };

        let mut crawler = Crawler::new(Arc::clone(&self.client), self.crawler_config.clone());
        if !auth_cookies.is_empty() {
            let header = auth_cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            crawler.set_cookie_header(Some(header));
        }

        match crawler.crawl(start, cancel).await {
            Ok(pages) => pages.iter().flat_map(crawl_result_to_points).collect(),
            Err(err) => {
                tracing::debug!(%err, "traditional discovery failed");
                Vec::new()
            }
        }
    }

    async fn browser_discover(&self, target: &str) -> Vec<FunctionPoint> {
        let Some(browser) = &self.browser else {
            return Vec::new();
        };
        match browser.discover(target).await {
            Ok(points) => points,
            Err(err) => {
                tracing::debug!(%err, "browser discovery failed");
                Vec::new()
            }
        }
    }

    async fn detect(
        &self,
        cancel: &CancelToken,
        seed: &str,
        auth_cookies: &[Cookie],
        function_points: Vec<FunctionPoint>,
    ) -> Result<Arc<ScanResult>> {
        let targets: Vec<String> = function_points
            .iter()
            .filter_map(function_point_url)
            .collect();

        if targets.is_empty() {
            // Mandatory fallback: a seed with only its own query
            // parameters is still a scannable surface.
            tracing::info!("no function points discovered, scanning the seed directly");
            return self.detect_seed_directly(cancel, seed, auth_cookies).await;
        }

        self.engine.scan_urls(cancel, &targets).await
    }

    /// Fallback detection: build a scan target straight from the seed
    /// URL and the authenticated jar, and run the plugin catalog on it
    /// without any discovery round trips.
    async fn detect_seed_directly(
        &self,
        cancel: &CancelToken,
        seed: &str,
        auth_cookies: &[Cookie],
    ) -> Result<Arc<ScanResult>> {
        let target = synthesize_target(seed, auth_cookies)?;

        let result = Arc::new(ScanResult::with_generated_id());
        result.set_running();
        result.upsert_target(TargetResult {
            status: TargetStatus::Scanning,
            ..TargetResult::pending(seed)
        });

        match self.engine.scan_target(cancel, &target).await {
            Ok(vulnerabilities) => {
                for vulnerability in vulnerabilities {
                    result.add_vulnerability(vulnerability);
                }
                result.update_target_status(seed, TargetStatus::Completed);
                result.set_completed();
            }
            Err(ScanError::Cancelled) => {
                result.update_target_status(seed, TargetStatus::Skipped);
                result.set_cancelled();
            }
            Err(err) => {
                result.upsert_target(TargetResult {
                    status: TargetStatus::Failed,
                    errors: vec![err.to_string()],
                    ..TargetResult::pending(seed)
                });
                result.set_completed();
            }
        }

        Ok(result)
    }
}

/// Convert a crawl result into function points: one per parameterised
/// page URL, one per form.
pub fn crawl_result_to_points(page: &CrawlResult) -> Vec<FunctionPoint> {
    let mut points = Vec::new();

    if page.url.query().is_some() {
        let mut parameters = HashMap::new();
        for (name, value) in page.url.query_pairs() {
            parameters.insert(
                name.to_string(),
                ParameterInfo {
                    default_value: value.to_string(),
                    injectable: true,
                },
            );
        }
        points.push(FunctionPoint {
            method: "GET".to_string(),
            url: page.url.to_string(),
            kind: "link".to_string(),
            parameters,
        });
    }

    for form in &page.forms {
        let mut parameters = HashMap::new();
        for input in &form.inputs {
            if input.name.is_empty() {
                continue;
            }
            parameters.insert(
                input.name.clone(),
                ParameterInfo {
                    default_value: input.value.clone(),
                    injectable: input.input_type != "hidden" && input.input_type != "submit",
                },
            );
        }
        points.push(FunctionPoint {
            method: form.method.clone(),
            url: form.action.to_string(),
            kind: "form".to_string(),
            parameters,
        });
    }

    points
}

/// Deduplicate by (method, url, kind); on conflict the parameter maps are
/// unioned.
pub fn merge_function_points(
    traditional: Vec<FunctionPoint>,
    browser: Vec<FunctionPoint>,
) -> Vec<FunctionPoint> {
    let mut merged: Vec<FunctionPoint> = Vec::new();
    let mut index: HashMap<(String, String, String), usize> = HashMap::new();

    for point in traditional.into_iter().chain(browser) {
        let key = (point.method.clone(), point.url.clone(), point.kind.clone());
        match index.get(&key) {
            Some(&i) => {
                for (name, info) in point.parameters {
                    merged[i].parameters.entry(name).or_insert(info);
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(point);
            }
        }
    }

    merged
}

/// A scannable URL for a function point: GET points with parameters get
/// their defaults applied.
fn function_point_url(point: &FunctionPoint) -> Option<String> {
    let mut url = Url::parse(&point.url).ok()?;
    if !point.method.eq_ignore_ascii_case("GET") {
        return None;
    }
    if point.parameters.is_empty() {
        return url.query().is_some().then(|| url.to_string());
    }

    let mut names: Vec<&String> = point.parameters.keys().collect();
    names.sort();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for name in names {
            let info = &point.parameters[name];
            if !info.injectable {
                continue;
            }
            let value = if info.default_value.is_empty() {
                "test"
            } else {
                &info.default_value
            };
            pairs.append_pair(name, value);
        }
    }
    Some(url.to_string())
}

/// Build a detector-ready target straight from a seed URL and cookies,
/// bypassing discovery. Used by the fallback path and by callers that
/// already know the surface.
pub fn synthesize_target(seed: &str, cookies: &[Cookie]) -> Result<ScanTarget> {
    let url = Url::parse(seed).map_err(|e| ScanError::Config(format!("invalid seed url: {e}")))?;
    let mut target = ScanTarget::new(url);
    for cookie in cookies {
        target.cookies.insert(cookie.name.clone(), cookie.value.clone());
    }
    Ok(target)
}

fn parse_cookie_string(raw: &str) -> Vec<Cookie> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some(Cookie::pair(name, value))
        })
        .collect()
}
