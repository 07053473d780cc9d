//! Scan engine: composes transport, session, crawler, scheduler, and the
//! plugin registry into the per-target pipeline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use url::Url;

use crate::core::cancel::CancelToken;
use crate::core::scheduler::{Priority, SchedulerConfig, Task, TaskScheduler, TaskType};
use crate::crawler::{Crawler, CrawlerConfig, InputField};
use crate::detector::sqli::SqliDetector;
use crate::detector::{BaselineResponse, Plugin, ScanTarget};
use crate::errors::{Result, ScanError};
use crate::http::client::{ClientOptions, HttpClient, ProxyConfig};
use crate::http::request::HttpRequest;
use crate::report::model::{
    ScanResult, Severity, TargetResult, TargetStatus, Vulnerability,
};
use crate::session::{Credentials, SessionManager};

/// Baseline response headers worth carrying into the scan target.
/// `Set-Cookie`, `Server`, and `Date` are never copied.
const COPY_HEADERS: &[&str] = &["content-type"];

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,
    pub enabled_plugins: Vec<String>,
    pub disabled_plugins: Vec<String>,
    pub risk_levels: Vec<Severity>,
    pub credentials: Option<Credentials>,
    pub enable_crawler: bool,
    pub crawl_depth: usize,
    pub crawl_pages: usize,
    pub crawl_delay: Duration,
    pub retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            request_timeout: Duration::from_secs(30),
            max_redirects: 5,
            user_agent: "Lancet/0.1 Security Scanner".to_string(),
            proxy: None,
            enabled_plugins: Vec::new(),
            disabled_plugins: Vec::new(),
            risk_levels: vec![
                Severity::Low,
                Severity::Medium,
                Severity::High,
                Severity::Critical,
            ],
            credentials: None,
            enable_crawler: true,
            crawl_depth: 2,
            crawl_pages: 50,
            crawl_delay: Duration::from_millis(100),
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct ScanEngine {
    client: Arc<HttpClient>,
    config: EngineConfig,
    scheduler: TaskScheduler,
    plugins: RwLock<Vec<Box<dyn Plugin>>>,
    session: Option<Mutex<SessionManager>>,
}

impl ScanEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let client = Arc::new(HttpClient::new(ClientOptions {
            timeout: config.request_timeout,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
            proxy: config.proxy.clone(),
            ..Default::default()
        })?);

        let scheduler = TaskScheduler::new(SchedulerConfig {
            max_workers: config.max_concurrency.clamp(1, 100),
            queue_size: 1000,
            retry_attempts: 3,
            retry_delay: config.retry_delay,
            ..Default::default()
        });

        let session = match &config.credentials {
            Some(credentials) => Some(Mutex::new(SessionManager::new(credentials.clone())?)),
            None => None,
        };

        let mut engine = Self {
            client: Arc::clone(&client),
            config,
            scheduler,
            plugins: RwLock::new(Vec::new()),
            session,
        };

        engine.register_plugin(Box::new(SqliDetector::new(client)))?;
        Ok(engine)
    }

    /// Registration-time filtering: disabled names win over the enabled
    /// list, then the severity allowlist applies. Filtered plugins are
    /// skipped silently.
    pub fn register_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if name.is_empty() {
            return Err(ScanError::Config("plugin name must not be empty".to_string()));
        }

        if self.config.disabled_plugins.iter().any(|d| d == &name) {
            tracing::debug!(plugin = %name, "disabled, not registered");
            return Ok(());
        }
        if !self.config.enabled_plugins.is_empty()
            && !self.config.enabled_plugins.iter().any(|e| e == &name)
        {
            tracing::debug!(plugin = %name, "not on the enabled list, not registered");
            return Ok(());
        }
        if !self.config.risk_levels.contains(&plugin.severity()) {
            tracing::debug!(plugin = %name, severity = %plugin.severity(), "severity filtered");
            return Ok(());
        }

        tracing::info!(plugin = %name, "registered");
        self.plugins.get_mut().push(plugin);
        Ok(())
    }

    pub async fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .read()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Explicit login; call once before `scan_urls` when credentials are
    /// configured. Auth errors are fatal to an authenticated scan.
    pub async fn login(&self) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(ScanError::Config("no credentials configured".to_string()));
        };
        session.lock().await.login(&self.client).await
    }

    pub async fn is_authenticated(&self) -> bool {
        match &self.session {
            Some(session) => session.lock().await.is_logged_in(),
            None => false,
        }
    }

    pub async fn session_cookie_string(&self) -> String {
        match &self.session {
            Some(session) => session.lock().await.cookie_string(),
            None => String::new(),
        }
    }

    /// Hand a cookie jar to every session-aware plugin. Used for jars
    /// established outside the engine's own session manager, e.g. by a
    /// browser collaborator.
    pub async fn adopt_session_cookies(&self, cookies: &[crate::session::Cookie]) {
        let mut plugins = self.plugins.write().await;
        for plugin in plugins.iter_mut() {
            if let Some(aware) = plugin.session_support() {
                aware.accept_session_cookies(cookies);
            }
        }
    }

    /// Run every enabled plugin against an already-prepared scan target,
    /// bypassing baseline fetching and scheduling. Plugin failures are
    /// logged and skipped; only cancellation aborts the run.
    pub async fn scan_target(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
    ) -> Result<Vec<Vulnerability>> {
        let mut vulnerabilities = Vec::new();
        let plugins = self.plugins.read().await;
        for plugin in plugins.iter() {
            if !plugin.is_enabled() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            match plugin.execute(&cancel.child(), target).await {
                Ok(detection) => vulnerabilities.extend(detection.vulnerabilities),
                Err(err) => {
                    tracing::warn!(plugin = plugin.name(), %err, "plugin failed, continuing");
                }
            }
        }
        Ok(vulnerabilities)
    }

    pub async fn scan_url(self: &Arc<Self>, cancel: &CancelToken, url: &str) -> Result<Arc<ScanResult>> {
        self.scan_urls(cancel, &[url.to_string()]).await
    }

    pub async fn scan_urls(
        self: &Arc<Self>,
        cancel: &CancelToken,
        urls: &[String],
    ) -> Result<Arc<ScanResult>> {
        if urls.is_empty() {
            return Err(ScanError::Config("no target urls".to_string()));
        }

        let result = Arc::new(ScanResult::with_generated_id());
        result.set_running();

        // Hand the session jar to session-aware plugins once, before any
        // task runs; the registry is read-only from here on.
        let session_cookies = match &self.session {
            Some(session) => {
                let guard = session.lock().await;
                guard.is_logged_in().then(|| guard.cookies().to_vec())
            }
            None => None,
        };
        if let Some(cookies) = &session_cookies {
            self.adopt_session_cookies(cookies).await;
        }

        let targets = if self.config.enable_crawler {
            self.expand_targets(cancel, urls).await
        } else {
            dedupe(urls.to_vec())
        };
        tracing::info!(targets = targets.len(), "starting scan");

        self.scheduler.start(cancel)?;
        let before = self.scheduler.status();
        let baseline_settled = before.completed_tasks + before.failed_tasks;

        let (vuln_tx, mut vuln_rx) = mpsc::channel::<Vulnerability>(100);
        let collector = {
            let result = Arc::clone(&result);
            tokio::spawn(async move {
                while let Some(vuln) = vuln_rx.recv().await {
                    tracing::warn!(
                        severity = %vuln.severity,
                        title = %vuln.title,
                        parameter = %vuln.parameter,
                        "vulnerability found"
                    );
                    result.add_vulnerability(vuln);
                }
            })
        };

        let mut submitted = 0usize;
        for target_url in &targets {
            result.upsert_target(TargetResult::pending(target_url.clone()));

            let engine = Arc::clone(self);
            let result_handle = Arc::clone(&result);
            let tx = vuln_tx.clone();
            let url = target_url.clone();
            let task = Task::new(TaskType::Scan, Priority::Normal).with_payload("url", target_url);

            let submission = self.scheduler.submit(
                task,
                Arc::new(move |task_cancel, _task| {
                    let engine = Arc::clone(&engine);
                    let result = Arc::clone(&result_handle);
                    let tx = tx.clone();
                    let url = url.clone();
                    Box::pin(async move {
                        engine.scan_single_target(&task_cancel, &url, &result, &tx).await
                    })
                }),
            );

            match submission {
                Ok(()) => submitted += 1,
                Err(err) => {
                    tracing::warn!(target = %target_url, %err, "task submission failed");
                    result.upsert_target(TargetResult {
                        status: TargetStatus::Skipped,
                        errors: vec![err.to_string()],
                        ..TargetResult::pending(target_url.clone())
                    });
                }
            }
        }
        drop(vuln_tx);

        // Scheduler counters settle exactly once per task.
        loop {
            let status = self.scheduler.status();
            if status.completed_tasks + status.failed_tasks >= baseline_settled + submitted {
                break;
            }
            if cancel.is_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let _ = collector.await;
        self.scheduler.stop().await;

        if cancel.is_cancelled() {
            result.set_cancelled();
        } else {
            result.set_completed();
        }
        tracing::info!(
            vulnerabilities = result.vulnerability_count(),
            "scan finished"
        );
        Ok(result)
    }

    /// Per-target pipeline: baseline -> scan target -> plugins in order.
    async fn scan_single_target(
        &self,
        cancel: &CancelToken,
        target_url: &str,
        result: &ScanResult,
        vuln_tx: &mpsc::Sender<Vulnerability>,
    ) -> Result<()> {
        let url = match Url::parse(target_url) {
            Ok(url) => url,
            Err(err) => {
                // Retrying cannot fix a malformed URL.
                result.upsert_target(TargetResult {
                    status: TargetStatus::Failed,
                    errors: vec![format!("invalid url: {err}")],
                    ..TargetResult::pending(target_url)
                });
                return Ok(());
            }
        };

        result.update_target_status(target_url, TargetStatus::Scanning);

        let mut baseline_req = HttpRequest::get(url.clone());
        if let Some(session) = &self.session {
            session.lock().await.apply_auth(&mut baseline_req);
        }

        let baseline = tokio::select! {
            resp = self.client.execute(baseline_req) => resp,
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
        };
        let baseline = match baseline {
            Ok(resp) => resp,
            Err(err) => {
                result.upsert_target(TargetResult {
                    status: TargetStatus::Failed,
                    errors: vec![err.to_string()],
                    ..TargetResult::pending(target_url)
                });
                return Err(err);
            }
        };

        let mut target = ScanTarget::new(url);
        for cookie in &baseline.set_cookies {
            target
                .cookies
                .insert(cookie.name.clone(), cookie.value.clone());
        }
        for name in COPY_HEADERS {
            if let Some(value) = baseline.header(name) {
                target.headers.insert((*name).to_string(), value.to_string());
            }
        }
        target.baseline = Some(BaselineResponse {
            status: baseline.status,
            headers: baseline.headers.clone(),
            body: baseline.body.clone(),
        });

        let plugins = self.plugins.read().await;
        for plugin in plugins.iter() {
            if !plugin.is_enabled() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            tracing::debug!(plugin = plugin.name(), target = %target_url, "executing plugin");
            let plugin_cancel = cancel.child();
            match plugin.execute(&plugin_cancel, &target).await {
                Ok(detection) => {
                    for vuln in detection.vulnerabilities {
                        if vuln_tx.send(vuln).await.is_err() {
                            return Err(ScanError::Cancelled);
                        }
                    }
                }
                Err(err) => {
                    // Plugin errors never abort the target.
                    tracing::warn!(plugin = plugin.name(), %err, "plugin failed, continuing");
                }
            }
        }

        result.upsert_target(TargetResult {
            status: TargetStatus::Completed,
            response_time: baseline.elapsed,
            status_code: Some(baseline.status),
            content_type: Some(baseline.content_type().to_string()),
            content_size: Some(baseline.body_len()),
            errors: Vec::new(),
            ..TargetResult::pending(target_url)
        });
        Ok(())
    }

    /// Crawl each seed and grow the target list with parameterised pages
    /// and synthetic GET-form URLs.
    async fn expand_targets(&self, cancel: &CancelToken, seeds: &[String]) -> Vec<String> {
        let cookie_header = match &self.session {
            Some(session) => {
                let guard = session.lock().await;
                (guard.is_logged_in() && !guard.cookies().is_empty())
                    .then(|| guard.cookie_string())
            }
            None => None,
        };

        let mut crawler = Crawler::new(
            Arc::clone(&self.client),
            CrawlerConfig {
                max_depth: self.config.crawl_depth,
                max_pages: self.config.crawl_pages,
                delay: self.config.crawl_delay,
                ..Default::default()
            },
        );
        crawler.set_cookie_header(cookie_header);

        let mut targets = Vec::new();
        for seed in seeds {
            targets.push(seed.clone());

            let Ok(start) = Url::parse(seed) else {
                continue;
            };
            let results = match crawler.crawl(start, cancel).await {
                Ok(results) => results,
                Err(err) => {
                    tracing::debug!(%seed, %err, "crawl failed, scanning the seed only");
                    continue;
                }
            };
            tracing::info!(%seed, pages = results.len(), "crawl finished");

            for page in results {
                if page.url.query().is_some() {
                    targets.push(page.url.to_string());
                }
                for form in &page.forms {
                    if form.method == "GET" {
                        if let Some(synthetic) = form_test_url(form) {
                            targets.push(synthetic);
                        }
                    }
                }
            }
        }

        dedupe(targets)
    }
}

/// Build a GET URL for a form by filling each visible input with a
/// plausible test value.
fn form_test_url(form: &crate::crawler::FormInfo) -> Option<String> {
    let mut url = form.action.clone();
    let mut any = false;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for input in &form.inputs {
            if input.name.is_empty() || input.input_type == "hidden" || input.input_type == "submit"
            {
                continue;
            }
            pairs.append_pair(&input.name, test_value_for_input(input));
            any = true;
        }
    }
    any.then(|| url.to_string())
}

fn test_value_for_input(input: &InputField) -> &'static str {
    let name = input.name.to_ascii_lowercase();
    if name.contains("search") || name.contains("query") || name.contains("keyword") {
        return "test";
    }
    if name.contains("id") || name.contains("uid") {
        return "1";
    }
    if name.contains("email") {
        return "test@example.com";
    }
    if name.contains("url") || name.contains("link") {
        return "http://example.com";
    }
    if name.contains("file") {
        return "test.txt";
    }
    match input.input_type.as_str() {
        "number" => "1",
        "email" => "test@example.com",
        "url" => "http://example.com",
        _ => "test",
    }
}

fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectionResult, PluginType};
    use crate::report::model::{Category, ScanStatus};
    use crate::testutil::{TestResponse, TestServer};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct DummyPlugin {
        name: &'static str,
        severity: Severity,
        enabled: bool,
    }

    #[async_trait]
    impl Plugin for DummyPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "dummy"
        }
        fn version(&self) -> &str {
            "0.0.0"
        }
        fn plugin_type(&self) -> PluginType {
            PluginType::Active
        }
        fn category(&self) -> Category {
            Category::Injection
        }
        fn severity(&self) -> Severity {
            self.severity
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
        fn set_enabled(&mut self, enabled: bool) {
            self.enabled = enabled;
        }
        async fn execute(&self, _: &CancelToken, _: &ScanTarget) -> Result<DetectionResult> {
            Ok(DetectionResult::default())
        }
    }

    fn dummy(name: &'static str, severity: Severity) -> Box<dyn Plugin> {
        Box::new(DummyPlugin {
            name,
            severity,
            enabled: true,
        })
    }

    #[tokio::test]
    async fn disabled_list_beats_enabled_list() {
        let mut engine = ScanEngine::new(EngineConfig {
            enabled_plugins: vec!["x".into()],
            disabled_plugins: vec!["x".into(), "sqli-detector".into()],
            ..Default::default()
        })
        .unwrap();
        engine.register_plugin(dummy("x", Severity::High)).unwrap();
        assert!(engine.plugin_names().await.is_empty());
    }

    #[tokio::test]
    async fn enabled_list_is_exclusive() {
        let mut engine = ScanEngine::new(EngineConfig {
            enabled_plugins: vec!["only-this".into()],
            ..Default::default()
        })
        .unwrap();
        engine.register_plugin(dummy("only-this", Severity::High)).unwrap();
        engine.register_plugin(dummy("other", Severity::High)).unwrap();
        assert_eq!(engine.plugin_names().await, vec!["only-this".to_string()]);
    }

    #[tokio::test]
    async fn severity_allowlist_filters_registration() {
        let mut engine = ScanEngine::new(EngineConfig {
            risk_levels: vec![Severity::Critical],
            ..Default::default()
        })
        .unwrap();
        // The default sqli plugin (High) is filtered too.
        engine.register_plugin(dummy("low-risk", Severity::Low)).unwrap();
        engine.register_plugin(dummy("critical-risk", Severity::Critical)).unwrap();
        assert_eq!(engine.plugin_names().await, vec!["critical-risk".to_string()]);
    }

    #[tokio::test]
    async fn scan_finds_error_based_sqli_end_to_end() {
        let server = TestServer::spawn(|req| {
            if req.decoded_path().contains('\'') {
                TestResponse::html("You have an error in your SQL syntax")
            } else {
                TestResponse::html("<html>item</html>")
            }
        })
        .await;

        let engine = Arc::new(
            ScanEngine::new(EngineConfig {
                enable_crawler: false,
                retry_delay: Duration::from_millis(10),
                ..Default::default()
            })
            .unwrap(),
        );

        let result = engine
            .scan_url(&CancelToken::new(), &server.url("/item?id=1"))
            .await
            .unwrap();

        assert_eq!(result.status(), ScanStatus::Completed);
        assert!(result.has_vulnerabilities());
        let snapshot = result.snapshot();
        assert_eq!(snapshot.vulnerabilities.len(), 1);
        assert_eq!(snapshot.vulnerabilities[0].parameter, "id");
        assert_eq!(snapshot.targets.len(), 1);
        assert_eq!(snapshot.targets[0].status, TargetStatus::Completed);
    }

    #[tokio::test]
    async fn unreachable_target_is_recorded_not_fatal() {
        let engine = Arc::new(
            ScanEngine::new(EngineConfig {
                enable_crawler: false,
                request_timeout: Duration::from_millis(300),
                retry_delay: Duration::from_millis(10),
                ..Default::default()
            })
            .unwrap(),
        );

        // Nothing listens on this port.
        let result = engine
            .scan_url(&CancelToken::new(), "http://127.0.0.1:9/")
            .await
            .unwrap();

        assert_eq!(result.status(), ScanStatus::Completed);
        assert!(!result.has_vulnerabilities());
        let snapshot = result.snapshot();
        assert_eq!(snapshot.targets.len(), 1);
        assert_eq!(snapshot.targets[0].status, TargetStatus::Failed);
        assert!(!snapshot.targets[0].errors.is_empty());
    }

    #[tokio::test]
    async fn authenticated_scan_sends_session_cookies_on_probes() {
        // S4: the vulnerable page only misbehaves for an authenticated
        // session with security_level=0, so a finding proves the Cookie
        // header carried both.
        let server = TestServer::spawn(|req| {
            match req.path.split('?').next().unwrap_or("") {
                "/login.php" => {
                    if req.method == "GET" {
                        TestResponse::html("<title>bWAPP - Login</title>")
                            .with_header("Set-Cookie", "PHPSESSID=deadbeef; Path=/")
                    } else {
                        TestResponse::html("Welcome Bee, Choose your bug")
                    }
                }
                "/sqli_1.php" => {
                    let cookie = req.header("cookie").unwrap_or_default();
                    let authed =
                        cookie.contains("PHPSESSID=deadbeef") && cookie.contains("security_level=0");
                    if authed && req.decoded_path().contains('\'') {
                        TestResponse::html("You have an error in your SQL syntax")
                    } else {
                        TestResponse::html("<html>movie search</html>")
                    }
                }
                _ => TestResponse::new(404, "not found"),
            }
        })
        .await;

        let engine = Arc::new(
            ScanEngine::new(EngineConfig {
                enable_crawler: false,
                retry_delay: Duration::from_millis(10),
                credentials: Some(Credentials::Form {
                    login_url: server.url("/login.php"),
                    username: "bee".into(),
                    password: "bug".into(),
                    extra_fields: HashMap::new(),
                    success_marker: Some("Choose your bug".into()),
                    failure_marker: None,
                }),
                ..Default::default()
            })
            .unwrap(),
        );

        engine.login().await.unwrap();
        assert!(engine.is_authenticated().await);
        let jar = engine.session_cookie_string().await;
        assert!(jar.contains("PHPSESSID=deadbeef"));
        assert!(jar.contains("security_level=0"));

        let result = engine
            .scan_url(&CancelToken::new(), &server.url("/sqli_1.php?title=1"))
            .await
            .unwrap();

        assert!(result.has_vulnerabilities());
        let snapshot = result.snapshot();
        assert_eq!(snapshot.vulnerabilities[0].parameter, "title");
    }

    #[tokio::test]
    async fn crawl_expansion_reaches_form_targets() {
        let server = TestServer::spawn(|req| {
            match req.path.split('?').next().unwrap_or("") {
                "/" => TestResponse::html(
                    r#"<form action="/search.php" method="get">
                         <input name="q" type="text">
                       </form>"#,
                ),
                "/search.php" => {
                    if req.decoded_path().contains('\'') {
                        TestResponse::html("You have an error in your SQL syntax")
                    } else {
                        TestResponse::html("results for q")
                    }
                }
                _ => TestResponse::new(404, "nope"),
            }
        })
        .await;

        let engine = Arc::new(
            ScanEngine::new(EngineConfig {
                enable_crawler: true,
                crawl_delay: Duration::ZERO,
                retry_delay: Duration::from_millis(10),
                ..Default::default()
            })
            .unwrap(),
        );

        let result = engine
            .scan_url(&CancelToken::new(), &server.url("/"))
            .await
            .unwrap();

        let snapshot = result.snapshot();
        assert!(
            snapshot.vulnerabilities.iter().any(|v| v.parameter == "q"),
            "form-derived target was not probed: {:?}",
            snapshot.targets.iter().map(|t| &t.url).collect::<Vec<_>>()
        );
    }

    #[test]
    fn form_test_values() {
        let input = |name: &str, ty: &str| InputField {
            name: name.into(),
            input_type: ty.into(),
            value: String::new(),
            placeholder: String::new(),
            required: false,
        };
        assert_eq!(test_value_for_input(&input("search_term", "text")), "test");
        assert_eq!(test_value_for_input(&input("user_id", "text")), "1");
        assert_eq!(test_value_for_input(&input("email", "text")), "test@example.com");
        assert_eq!(test_value_for_input(&input("website_url", "text")), "http://example.com");
        assert_eq!(test_value_for_input(&input("anything", "number")), "1");
        assert_eq!(test_value_for_input(&input("anything", "text")), "test");
    }
}
