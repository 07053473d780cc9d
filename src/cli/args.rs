use clap::{ArgAction, Parser, ValueEnum};

/// Lancet – black-box web application vulnerability scanner
#[derive(Parser, Debug)]
#[command(
    name = "lancet",
    version,
    about = "Black-box web application vulnerability scanner",
    after_help = "EXAMPLES:\n  lancet -u http://target.test/item?id=1\n  lancet -f targets.txt -c 20 --risk high,critical\n  lancet -u http://127.0.0.1/login.php --auth-method form \\\n      --login-url http://127.0.0.1/login.php --username bee --password bug"
)]
pub struct Cli {
    /// Single target URL
    #[arg(short = 'u', long = "url", conflicts_with = "file")]
    pub url: Option<String>,

    /// Targets file, one URL per line (# comments)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    // ═══════════════════════════════════════════════════════════════════
    // OUTPUT
    // ═══════════════════════════════════════════════════════════════════
    /// Output directory for reports
    #[arg(short = 'o', long = "output", default_value = "./reports", help_heading = "OUTPUT")]
    pub output: String,

    /// Report formats, comma separated (html, json, markdown)
    #[arg(long, default_value = "html,json", help_heading = "OUTPUT")]
    pub format: String,

    /// Verbose output
    #[arg(short = 'v', long, help_heading = "OUTPUT")]
    pub verbose: bool,

    /// Debug output (implies verbose)
    #[arg(long, help_heading = "OUTPUT")]
    pub debug: bool,

    // ═══════════════════════════════════════════════════════════════════
    // PERFORMANCE
    // ═══════════════════════════════════════════════════════════════════
    /// Concurrent scan workers
    #[arg(
        short = 'c',
        long = "concurrency",
        default_value_t = 10,
        value_parser = clap::value_parser!(u16).range(1..=100),
        help_heading = "PERFORMANCE"
    )]
    pub concurrency: u16,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30, help_heading = "PERFORMANCE")]
    pub timeout: u64,

    // ═══════════════════════════════════════════════════════════════════
    // PLUGINS
    // ═══════════════════════════════════════════════════════════════════
    /// Only run these plugins (comma separated)
    #[arg(long, help_heading = "PLUGINS")]
    pub plugins: Option<String>,

    /// Never run these plugins (comma separated, wins over --plugins)
    #[arg(long, help_heading = "PLUGINS")]
    pub disable: Option<String>,

    /// Severity allowlist (info,low,medium,high,critical)
    #[arg(long, default_value = "low,medium,high,critical", help_heading = "PLUGINS")]
    pub risk: String,

    // ═══════════════════════════════════════════════════════════════════
    // AUTHENTICATION
    // ═══════════════════════════════════════════════════════════════════
    /// Authentication method
    #[arg(long = "auth-method", value_enum, help_heading = "AUTHENTICATION")]
    pub auth_method: Option<AuthMethod>,

    /// Login form URL (form auth)
    #[arg(long = "login-url", help_heading = "AUTHENTICATION")]
    pub login_url: Option<String>,

    /// Username (form/basic auth)
    #[arg(long, help_heading = "AUTHENTICATION")]
    pub username: Option<String>,

    /// Password (form/basic auth)
    #[arg(long, help_heading = "AUTHENTICATION")]
    pub password: Option<String>,

    /// Extra login form field, key=value (repeatable)
    #[arg(long = "login-data", help_heading = "AUTHENTICATION")]
    pub login_data: Vec<String>,

    /// Marker proving a successful login
    #[arg(long = "success-marker", help_heading = "AUTHENTICATION")]
    pub success_marker: Option<String>,

    /// Marker proving a failed login
    #[arg(long = "failure-marker", help_heading = "AUTHENTICATION")]
    pub failure_marker: Option<String>,

    /// Session cookie, key=value (repeatable, cookie auth)
    #[arg(long = "cookie", help_heading = "AUTHENTICATION")]
    pub cookies: Vec<String>,

    /// Bearer token (bearer auth)
    #[arg(long, help_heading = "AUTHENTICATION")]
    pub token: Option<String>,

    // ═══════════════════════════════════════════════════════════════════
    // CRAWLING
    // ═══════════════════════════════════════════════════════════════════
    /// Crawl targets before scanning (pass `--crawl false` to disable)
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true",
        help_heading = "CRAWLING"
    )]
    pub crawl: bool,

    /// Maximum crawl depth
    #[arg(long = "crawl-depth", default_value_t = 2, help_heading = "CRAWLING")]
    pub crawl_depth: usize,

    /// Maximum pages per crawl
    #[arg(long = "crawl-pages", default_value_t = 50, help_heading = "CRAWLING")]
    pub crawl_pages: usize,

    // ═══════════════════════════════════════════════════════════════════
    // BROWSER COLLABORATOR
    // ═══════════════════════════════════════════════════════════════════
    /// Engage the external browser-automation collaborator
    #[arg(long = "enable-stagehand", help_heading = "BROWSER")]
    pub enable_stagehand: bool,

    /// Authentication strategy (traditional, browser, hybrid)
    #[arg(long = "auth-strategy", value_enum, default_value = "traditional", help_heading = "BROWSER")]
    pub auth_strategy: Strategy,

    /// Crawl strategy (traditional, browser, hybrid)
    #[arg(long = "crawl-strategy", value_enum, default_value = "traditional", help_heading = "BROWSER")]
    pub crawl_strategy: Strategy,

    /// Detection mode (active, passive, hybrid)
    #[arg(long = "detection-mode", value_enum, default_value = "active", help_heading = "BROWSER")]
    pub detection_mode: Mode,

    /// Fall back to the other strategy when the primary fails
    #[arg(long = "auto-fallback", default_value_t = true, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true", help_heading = "BROWSER")]
    pub auto_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMethod {
    Form,
    Basic,
    Cookie,
    Bearer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    Traditional,
    Browser,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Active,
    Passive,
    Hybrid,
}

impl Cli {
    pub fn comma_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// key=value pairs from repeatable flags.
    pub fn pair_list(raw: &[String]) -> Vec<(String, String)> {
        raw.iter()
            .filter_map(|entry| {
                let (key, value) = entry.split_once('=')?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["lancet", "-u", "http://app.test/"]);
        assert_eq!(cli.url.as_deref(), Some("http://app.test/"));
        assert_eq!(cli.output, "./reports");
        assert_eq!(cli.format, "html,json");
        assert_eq!(cli.concurrency, 10);
        assert!(cli.crawl);
        assert!(!cli.enable_stagehand);
    }

    #[test]
    fn url_and_file_are_mutually_exclusive() {
        let parsed = Cli::try_parse_from(["lancet", "-u", "http://a/", "-f", "targets.txt"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn concurrency_is_bounded() {
        assert!(Cli::try_parse_from(["lancet", "-u", "http://a/", "-c", "0"]).is_err());
        assert!(Cli::try_parse_from(["lancet", "-u", "http://a/", "-c", "101"]).is_err());
        assert!(Cli::try_parse_from(["lancet", "-u", "http://a/", "-c", "100"]).is_ok());
    }

    #[test]
    fn crawl_can_be_disabled() {
        let cli = Cli::parse_from(["lancet", "-u", "http://a/", "--crawl", "false"]);
        assert!(!cli.crawl);
    }

    #[test]
    fn list_helpers() {
        assert_eq!(
            Cli::comma_list("high, critical ,"),
            vec!["high".to_string(), "critical".to_string()]
        );
        assert_eq!(
            Cli::pair_list(&["form=submit".to_string(), "broken".to_string()]),
            vec![("form".to_string(), "submit".to_string())]
        );
    }
}
