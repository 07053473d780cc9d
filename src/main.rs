mod cli;
mod core;
mod crawler;
mod detector;
mod errors;
mod http;
mod report;
mod session;
#[cfg(test)]
mod testutil;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;

use crate::cli::args::{AuthMethod, Cli, Mode, Strategy};
use crate::core::cancel::CancelToken;
use crate::core::engine::{EngineConfig, ScanEngine};
use crate::core::hybrid::{
    AuthStrategy, CrawlStrategy, DetectionMode, HybridConfig, HybridScanner,
};
use crate::crawler::CrawlerConfig;
use crate::errors::ScanError;
use crate::http::client::{ClientOptions, HttpClient};
use crate::report::model::{ScanResult, Severity};
use crate::session::Credentials;

const BANNER: &str = r#"
    __                      __
   / /___ _____  ________  / /_
  / / __ `/ __ \/ ___/ _ \/ __/
 / / /_/ / / / / /__/  __/ /_
/_/\__,_/_/ /_/\___/\___/\__/   web application scanner
"#;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        "lancet=debug"
    } else if cli.verbose {
        "lancet=info"
    } else {
        "lancet=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    if cli.verbose || cli.debug {
        println!("{BANNER}");
    }

    match run(cli).await {
        Ok(found_vulnerabilities) => {
            if found_vulnerabilities {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("lancet: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let targets = load_targets(&cli)?;
    let credentials = build_credentials(&cli)?;
    let config = build_engine_config(&cli, credentials.clone())?;

    let engine = Arc::new(ScanEngine::new(config).context("engine setup failed")?);
    let cancel = CancelToken::new();

    // Ctrl-C cancels the scan; a second Ctrl-C kills the process.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling scan");
                cancel.cancel();
            }
        });
    }

    // Login is explicit and fatal to an authenticated scan.
    if credentials.is_some() {
        engine.login().await.context("login failed")?;
        tracing::info!(
            cookies = %engine.session_cookie_string().await,
            "authenticated"
        );
    }

    let result = if cli.enable_stagehand {
        // No browser collaborator ships with the core; the coordinator
        // runs with traditional fallbacks until one is registered.
        tracing::warn!("no browser collaborator registered, using traditional strategies");
        let client = Arc::new(
            HttpClient::new(ClientOptions {
                timeout: Duration::from_secs(cli.timeout),
                ..Default::default()
            })
            .map_err(anyhow::Error::from)?,
        );
        let hybrid = HybridScanner::new(
            Arc::clone(&engine),
            client,
            None,
            HybridConfig {
                auth_strategy: strategy_to_auth(cli.auth_strategy),
                crawl_strategy: strategy_to_crawl(cli.crawl_strategy),
                detection_mode: mode_to_detection(cli.detection_mode),
                auto_fallback: cli.auto_fallback,
            },
            CrawlerConfig {
                max_depth: cli.crawl_depth,
                max_pages: cli.crawl_pages,
                ..Default::default()
            },
        );
        let seed = targets
            .first()
            .ok_or_else(|| anyhow::anyhow!("no targets"))?;
        hybrid
            .scan_url(&cancel, seed, credentials.as_ref())
            .await?
    } else {
        engine.scan_urls(&cancel, &targets).await?
    };

    write_reports(&cli, &result)?;
    print_summary(&result);

    Ok(result.has_vulnerabilities())
}

fn load_targets(cli: &Cli) -> anyhow::Result<Vec<String>> {
    if let Some(url) = &cli.url {
        return Ok(vec![url.clone()]);
    }
    let Some(path) = &cli.file else {
        anyhow::bail!("either -u <url> or -f <file> is required");
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read targets file {path}"))?;
    let targets: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if targets.is_empty() {
        anyhow::bail!("targets file {path} contains no urls");
    }
    Ok(targets)
}

fn build_credentials(cli: &Cli) -> anyhow::Result<Option<Credentials>> {
    let Some(method) = cli.auth_method else {
        return Ok(None);
    };

    let credentials = match method {
        AuthMethod::Form => Credentials::Form {
            login_url: cli.login_url.clone().unwrap_or_default(),
            username: cli.username.clone().unwrap_or_default(),
            password: cli.password.clone().unwrap_or_default(),
            extra_fields: Cli::pair_list(&cli.login_data).into_iter().collect(),
            success_marker: cli.success_marker.clone(),
            failure_marker: cli.failure_marker.clone(),
        },
        AuthMethod::Basic => Credentials::Basic {
            username: cli.username.clone().unwrap_or_default(),
            password: cli.password.clone().unwrap_or_default(),
        },
        AuthMethod::Cookie => {
            let map: HashMap<String, String> = Cli::pair_list(&cli.cookies).into_iter().collect();
            Credentials::Cookies(map)
        }
        AuthMethod::Bearer => Credentials::Bearer(cli.token.clone().unwrap_or_default()),
    };

    credentials.validate().map_err(anyhow::Error::from)?;
    Ok(Some(credentials))
}

fn build_engine_config(cli: &Cli, credentials: Option<Credentials>) -> anyhow::Result<EngineConfig> {
    let risk_levels = Cli::comma_list(&cli.risk)
        .iter()
        .map(|level| level.parse::<Severity>())
        .collect::<Result<Vec<_>, ScanError>>()
        .map_err(anyhow::Error::from)?;

    Ok(EngineConfig {
        max_concurrency: cli.concurrency as usize,
        request_timeout: Duration::from_secs(cli.timeout),
        enabled_plugins: cli.plugins.as_deref().map(Cli::comma_list).unwrap_or_default(),
        disabled_plugins: cli.disable.as_deref().map(Cli::comma_list).unwrap_or_default(),
        risk_levels,
        credentials,
        enable_crawler: cli.crawl,
        crawl_depth: cli.crawl_depth,
        crawl_pages: cli.crawl_pages,
        ..Default::default()
    })
}

fn write_reports(cli: &Cli, result: &ScanResult) -> anyhow::Result<()> {
    let formats = Cli::comma_list(&cli.format);
    if formats.is_empty() {
        return Ok(());
    }

    let out_dir = PathBuf::from(&cli.output);
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("cannot create output directory {}", out_dir.display()))?;

    let snapshot = result.snapshot();
    for format in formats {
        let (name, contents) = match format.as_str() {
            "json" => (
                format!("{}.json", snapshot.id),
                report::json::render(&snapshot).map_err(anyhow::Error::from)?,
            ),
            "html" => (format!("{}.html", snapshot.id), report::html::render(&snapshot)),
            "markdown" | "md" => {
                (format!("{}.md", snapshot.id), report::markdown::render(&snapshot))
            }
            other => anyhow::bail!("unknown report format: {other}"),
        };
        let path = out_dir.join(name);
        write_report_file(&path, &contents)?;
        println!("report written to {}", path.display());
    }
    Ok(())
}

fn write_report_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("cannot write {}", path.display()))
}

fn print_summary(result: &ScanResult) {
    let snapshot = result.snapshot();
    println!(
        "\nscan {} {:?}: {} targets, {} findings",
        snapshot.id,
        snapshot.status,
        snapshot.statistics.targets_scanned,
        snapshot.statistics.total_vulnerabilities,
    );
    for vuln in &snapshot.vulnerabilities {
        println!(
            "  [{}] {} {} parameter={} confidence={:.0}%",
            vuln.severity, vuln.title, vuln.url, vuln.parameter, vuln.confidence * 100.0
        );
    }
}

fn strategy_to_auth(strategy: Strategy) -> AuthStrategy {
    match strategy {
        Strategy::Traditional => AuthStrategy::Traditional,
        Strategy::Browser => AuthStrategy::Browser,
        Strategy::Hybrid => AuthStrategy::Hybrid,
    }
}

fn strategy_to_crawl(strategy: Strategy) -> CrawlStrategy {
    match strategy {
        Strategy::Traditional => CrawlStrategy::Traditional,
        Strategy::Browser => CrawlStrategy::Browser,
        Strategy::Hybrid => CrawlStrategy::Hybrid,
    }
}

fn mode_to_detection(mode: Mode) -> DetectionMode {
    match mode {
        Mode::Active => DetectionMode::Active,
        Mode::Passive => DetectionMode::Passive,
        Mode::Hybrid => DetectionMode::Hybrid,
    }
}
