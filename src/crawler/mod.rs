//! Same-origin breadth-first crawler.
//!
//! Worker tasks drain a shared frontier and publish results to an mpsc
//! channel; the stream closes when every worker has exited, which happens
//! once the frontier is empty, the page budget is spent, or the scan is
//! cancelled.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use tokio::sync::mpsc;
use url::Url;

use crate::core::cancel::CancelToken;
use crate::errors::Result;
use crate::http::client::HttpClient;
use crate::http::request::HttpRequest;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub max_depth: usize,
    pub max_pages: usize,
    pub delay: Duration,
    pub workers: usize,
    pub exclude_exts: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            max_pages: 50,
            delay: Duration::from_millis(100),
            workers: 4,
            exclude_exts: [
                "jpg", "jpeg", "png", "gif", "css", "js", "ico", "svg", "woff", "ttf", "pdf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub url: Url,
    pub title: String,
    pub status_code: u16,
    pub content_type: String,
    pub content_size: usize,
    pub response_time: Duration,
    pub depth: usize,
    pub links: Vec<Url>,
    pub forms: Vec<FormInfo>,
    pub inputs: Vec<InputField>,
    pub timestamp: DateTime<Utc>,
    // Post-crawl annotation; drives prioritisation only.
    pub function_type: String,
    pub risk_level: String,
    pub suggested_plugins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FormInfo {
    pub action: Url,
    pub method: String,
    pub enctype: String,
    pub inputs: Vec<InputField>,
    pub has_upload: bool,
    pub has_hidden: bool,
    pub is_login: bool,
    pub is_search: bool,
}

#[derive(Debug, Clone)]
pub struct InputField {
    pub name: String,
    pub input_type: String,
    pub value: String,
    pub placeholder: String,
    pub required: bool,
}

struct Frontier {
    queue: VecDeque<(Url, usize)>,
    visited: HashSet<String>,
    claimed: usize,
    in_flight: usize,
    done: bool,
}

pub struct Crawler {
    client: Arc<HttpClient>,
    config: CrawlerConfig,
    /// Cookie header attached to every crawl request when scanning
    /// authenticated surface.
    cookie_header: Option<String>,
}

impl Crawler {
    pub fn new(client: Arc<HttpClient>, config: CrawlerConfig) -> Self {
        Self {
            client,
            config,
            cookie_header: None,
        }
    }

    pub fn set_cookie_header(&mut self, header: Option<String>) {
        self.cookie_header = header;
    }

    /// Crawl and collect every result. See `crawl_stream` for the channel
    /// variant.
    pub async fn crawl(&self, start: Url, cancel: &CancelToken) -> Result<Vec<CrawlResult>> {
        let mut rx = self.crawl_stream(start, cancel);
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        Ok(results)
    }

    /// Spawn the worker pool and return the result channel. The channel
    /// closes deterministically when the crawl terminates.
    pub fn crawl_stream(&self, start: Url, cancel: &CancelToken) -> mpsc::Receiver<CrawlResult> {
        let (tx, rx) = mpsc::channel(64);

        let mut visited = HashSet::new();
        visited.insert(start.as_str().to_string());
        let frontier = Arc::new(Mutex::new(Frontier {
            queue: VecDeque::from([(start.clone(), 0)]),
            visited,
            claimed: 0,
            in_flight: 0,
            done: false,
        }));

        let origin = start.host_str().unwrap_or_default().to_string();

        for worker_id in 0..self.config.workers.max(1) {
            let client = Arc::clone(&self.client);
            let config = self.config.clone();
            let cookie_header = self.cookie_header.clone();
            let frontier = Arc::clone(&frontier);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let origin = origin.clone();

            tokio::spawn(async move {
                crawl_worker(
                    worker_id,
                    client,
                    config,
                    cookie_header,
                    origin,
                    frontier,
                    tx,
                    cancel,
                )
                .await;
            });
        }

        rx
    }
}

#[allow(clippy::too_many_arguments)]
async fn crawl_worker(
    worker_id: usize,
    client: Arc<HttpClient>,
    config: CrawlerConfig,
    cookie_header: Option<String>,
    origin: String,
    frontier: Arc<Mutex<Frontier>>,
    tx: mpsc::Sender<CrawlResult>,
    cancel: CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            frontier.lock().unwrap().done = true;
            break;
        }

        let job = {
            let mut state = frontier.lock().unwrap();
            if state.done {
                break;
            }
            if state.claimed >= config.max_pages {
                state.done = true;
                break;
            }
            match state.queue.pop_front() {
                Some(item) => {
                    state.claimed += 1;
                    state.in_flight += 1;
                    Some(item)
                }
                None if state.in_flight == 0 => {
                    state.done = true;
                    break;
                }
                None => None,
            }
        };

        let Some((url, depth)) = job else {
            tokio::time::sleep(Duration::from_millis(10)).await;
            continue;
        };

        if !config.delay.is_zero() {
            tokio::time::sleep(config.delay).await;
        }

        let mut request = HttpRequest::get(url.clone());
        if let Some(header) = &cookie_header {
            request.set_header("Cookie", header);
        }

        let response = tokio::select! {
            resp = client.execute(request) => resp,
            _ = cancel.cancelled() => {
                let mut state = frontier.lock().unwrap();
                state.in_flight -= 1;
                state.done = true;
                break;
            }
        };

        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                tracing::debug!(worker = worker_id, %url, %err, "crawl fetch failed, skipping");
                let mut state = frontier.lock().unwrap();
                state.in_flight -= 1;
                // A failed fetch does not consume page budget.
                state.claimed -= 1;
                continue;
            }
        };

        let mut result = CrawlResult {
            url: url.clone(),
            title: String::new(),
            status_code: response.status,
            content_type: response.content_type().to_string(),
            content_size: response.body_len(),
            response_time: response.elapsed,
            depth,
            links: Vec::new(),
            forms: Vec::new(),
            inputs: Vec::new(),
            timestamp: Utc::now(),
            function_type: String::new(),
            risk_level: String::new(),
            suggested_plugins: Vec::new(),
        };

        if result.content_type.contains("text/html") {
            let page = parse_page(&url, &response.body_text());
            result.title = page.title;
            result.links = page.links;
            result.forms = page.forms;
            result.inputs = page.inputs;
        }

        annotate(&mut result);

        {
            let mut state = frontier.lock().unwrap();
            if depth < config.max_depth {
                for link in &result.links {
                    if link.host_str() != Some(origin.as_str()) {
                        continue;
                    }
                    if has_excluded_extension(link, &config.exclude_exts) {
                        continue;
                    }
                    if state.visited.insert(link.as_str().to_string()) {
                        state.queue.push_back((link.clone(), depth + 1));
                    }
                }
            }
            state.in_flight -= 1;
        }

        if tx.send(result).await.is_err() {
            frontier.lock().unwrap().done = true;
            break;
        }
    }
}

struct PageContent {
    title: String,
    links: Vec<Url>,
    forms: Vec<FormInfo>,
    inputs: Vec<InputField>,
}

/// Extract title, same-document links, forms, and inputs from an HTML
/// body. Pure; unparseable markup degrades to empty extraction.
fn parse_page(base: &Url, body: &str) -> PageContent {
    let document = Html::parse_document(body);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default();

    let mut links = Vec::new();
    if let Ok(sel) = Selector::parse("a[href]") {
        for el in document.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                let href = href.trim();
                if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                    continue;
                }
                if let Ok(mut resolved) = base.join(href) {
                    resolved.set_fragment(None);
                    links.push(resolved);
                }
            }
        }
    }

    let mut forms = Vec::new();
    if let Ok(form_sel) = Selector::parse("form") {
        for form_el in document.select(&form_sel) {
            let action_attr = form_el.value().attr("action").unwrap_or("");
            let action = if action_attr.is_empty() {
                base.clone()
            } else {
                match base.join(action_attr) {
                    Ok(u) => u,
                    Err(_) => continue,
                }
            };

            let method = form_el
                .value()
                .attr("method")
                .unwrap_or("GET")
                .to_ascii_uppercase();
            let enctype = form_el
                .value()
                .attr("enctype")
                .unwrap_or("application/x-www-form-urlencoded")
                .to_string();

            let inputs = extract_inputs(&form_el);

            let form_html = form_el.html().to_ascii_lowercase();
            let has_upload = inputs.iter().any(|i| i.input_type == "file")
                || enctype.contains("multipart/form-data");
            let has_hidden = inputs.iter().any(|i| i.input_type == "hidden");
            let is_login = (form_html.contains("password") || form_html.contains("login"))
                && (form_html.contains("username")
                    || form_html.contains("user")
                    || form_html.contains("email")
                    || form_html.contains("login"));
            let is_search = form_html.contains("search")
                || form_html.contains("query")
                || form_html.contains("keyword");

            forms.push(FormInfo {
                action,
                method,
                enctype,
                inputs,
                has_upload,
                has_hidden,
                is_login,
                is_search,
            });
        }
    }

    let mut inputs = Vec::new();
    let root = document.root_element();
    inputs.extend(extract_inputs(&root));

    PageContent {
        title,
        links,
        forms,
        inputs,
    }
}

fn extract_inputs(scope: &scraper::ElementRef) -> Vec<InputField> {
    let mut out = Vec::new();

    if let Ok(sel) = Selector::parse("input[name]") {
        for el in scope.select(&sel) {
            let value = el.value();
            out.push(InputField {
                name: value.attr("name").unwrap_or_default().to_string(),
                input_type: value.attr("type").unwrap_or("text").to_string(),
                value: value.attr("value").unwrap_or_default().to_string(),
                placeholder: value.attr("placeholder").unwrap_or_default().to_string(),
                required: value.attr("required").is_some(),
            });
        }
    }

    // textarea and select become inputs with synthetic types.
    if let Ok(sel) = Selector::parse("textarea[name]") {
        for el in scope.select(&sel) {
            out.push(InputField {
                name: el.value().attr("name").unwrap_or_default().to_string(),
                input_type: "textarea".to_string(),
                value: el.text().collect::<String>().trim().to_string(),
                placeholder: String::new(),
                required: el.value().attr("required").is_some(),
            });
        }
    }
    if let Ok(sel) = Selector::parse("select[name]") {
        for el in scope.select(&sel) {
            out.push(InputField {
                name: el.value().attr("name").unwrap_or_default().to_string(),
                input_type: "select".to_string(),
                value: String::new(),
                placeholder: String::new(),
                required: el.value().attr("required").is_some(),
            });
        }
    }

    out
}

fn has_excluded_extension(url: &Url, exts: &[String]) -> bool {
    let path = url.path().to_ascii_lowercase();
    exts.iter().any(|ext| path.ends_with(&format!(".{ext}")))
}

const FUNCTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("login", &["login", "signin", "sign_in", "auth"]),
    ("search", &["search", "query", "find"]),
    ("upload", &["upload", "file"]),
    ("admin", &["admin", "administration"]),
    ("profile", &["profile", "account", "user"]),
    ("comment", &["comment", "feedback", "message"]),
    ("blog", &["blog", "post", "article"]),
    ("register", &["register", "signup", "sign_up"]),
    ("contact", &["contact", "about"]),
    ("cart", &["cart", "shop", "order"]),
];

/// Tag the page with a function type and derive a suggested plugin list
/// and risk level. These annotations prioritise work; they make no
/// vulnerability claims.
fn annotate(result: &mut CrawlResult) {
    let url = result.url.as_str().to_ascii_lowercase();
    let title = result.title.to_ascii_lowercase();

    for (kind, keywords) in FUNCTION_KEYWORDS {
        if keywords.iter().any(|k| url.contains(k) || title.contains(k)) {
            result.function_type = kind.to_string();
            break;
        }
    }

    // Form features override keyword guesses.
    for form in &result.forms {
        if form.is_login {
            result.function_type = "login".to_string();
        } else if form.is_search && result.function_type.is_empty() {
            result.function_type = "search".to_string();
        } else if form.has_upload && result.function_type.is_empty() {
            result.function_type = "upload".to_string();
        }
    }

    if result.function_type.is_empty() {
        result.function_type = if !result.forms.is_empty() || !result.inputs.is_empty() {
            "form".to_string()
        } else {
            "static".to_string()
        };
    }

    let (mut plugins, mut risk): (Vec<&str>, &str) = match result.function_type.as_str() {
        "login" => (vec!["sqli-detector", "auth-bypass", "brute-force"], "high"),
        "search" => (vec!["sqli-detector", "xss-detector", "nosql-injection"], "high"),
        "upload" => (vec!["file-upload", "path-traversal"], "critical"),
        "admin" => (
            vec!["sqli-detector", "xss-detector", "auth-bypass", "privilege-escalation"],
            "critical",
        ),
        "comment" | "blog" => (vec!["xss-detector", "sqli-detector", "csrf-detector"], "medium"),
        "form" => (vec!["sqli-detector", "xss-detector", "csrf-detector"], "medium"),
        _ => (Vec::new(), "low"),
    };

    for input in &result.inputs {
        let name = input.name.to_ascii_lowercase();
        if name.contains("file") {
            plugins.push("file-upload");
            risk = "high";
        }
        if name.contains("url") || name.contains("link") {
            plugins.push("ssrf-detector");
            plugins.push("open-redirect");
        }
        if name.contains("cmd") || name.contains("command") {
            plugins.push("command-injection");
            risk = "critical";
        }
    }

    if !result.inputs.is_empty() || result.url.query().is_some() {
        plugins.push("sqli-detector");
        plugins.push("xss-detector");
    }

    let mut seen = HashSet::new();
    result.suggested_plugins = plugins
        .into_iter()
        .filter(|p| seen.insert(*p))
        .map(|p| p.to_string())
        .collect();
    result.risk_level = risk.to_string();
}
