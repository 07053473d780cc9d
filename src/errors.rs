//! Error taxonomy for the scanner core.
//!
//! Transport failures carry distinct kinds so per-target handlers can skip
//! a target without aborting the scan, while Config and Auth errors are
//! fatal before/at scan start.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Invalid target URL, conflicting flags, bad credentials. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// TCP connect failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Request deadline exceeded.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// TLS handshake or certificate failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// The redirect ceiling was hit.
    #[error("redirect limit of {0} exceeded")]
    RedirectOverflow(usize),

    /// Any other transport-level failure (bad gzip body, protocol error).
    #[error("transport error: {0}")]
    Transport(String),

    /// Login failed. Fatal to an authenticated scan.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A detector raised; logged and the next plugin continues.
    #[error("plugin {plugin}: {message}")]
    Plugin { plugin: String, message: String },

    /// The bounded task queue rejected a submission.
    #[error("task queue is full")]
    QueueFull,

    /// Submit was called on a scheduler that is not running.
    #[error("scheduler is not running")]
    SchedulerStopped,

    /// The surrounding context was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Unparseable HTML or form body. Downgraded to "no points" upstream.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ScanError {
    /// Classify a reqwest failure into the transport taxonomy.
    pub fn from_transport(err: reqwest::Error, timeout: Duration, max_redirects: usize) -> Self {
        if err.is_timeout() {
            return ScanError::Timeout(timeout);
        }
        if err.is_redirect() {
            return ScanError::RedirectOverflow(max_redirects);
        }
        if err.is_connect() {
            let text = err.to_string();
            let lower = text.to_lowercase();
            if lower.contains("tls") || lower.contains("certificate") || lower.contains("ssl") {
                return ScanError::Tls(text);
            }
            return ScanError::Connect(text);
        }
        ScanError::Transport(err.to_string())
    }

    /// Transport-class errors are recovered per target; everything else
    /// propagates.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ScanError::Connect(_)
                | ScanError::Timeout(_)
                | ScanError::Tls(_)
                | ScanError::RedirectOverflow(_)
                | ScanError::Transport(_)
        )
    }
}
