//! Detector plugin surface.
//!
//! A plugin is anything implementing [`Plugin`]; plugins that understand
//! authenticated scans additionally expose [`SessionAware`] through
//! `session_support`, which the engine probes before a scan starts.

pub mod analyzer;
pub mod extract;
pub mod modifier;
pub mod payloads;
pub mod sqli;

use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;

use crate::core::cancel::CancelToken;
use crate::errors::Result;
use crate::report::model::{Category, Severity, Vulnerability};
use crate::session::Cookie;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Active,
    Passive,
    Hybrid,
}

/// Per-request scan context handed to every plugin.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub url: Url,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Multi-valued parameters, query or form.
    pub parameters: HashMap<String, Vec<String>>,
    pub cookies: HashMap<String, String>,
    pub baseline: Option<BaselineResponse>,
}

/// The response to the unmutated target; reference for difference- and
/// timing-based oracles.
#[derive(Debug, Clone)]
pub struct BaselineResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ScanTarget {
    pub fn new(url: Url) -> Self {
        let mut parameters: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url.query_pairs() {
            parameters
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
        Self {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: String::new(),
            parameters,
            cookies: HashMap::new(),
            baseline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    Response,
    Error,
    Difference,
    Pattern,
    Timing,
    StatusCode,
}

#[derive(Debug, Clone)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub description: String,
    pub confidence: f64,
}

#[derive(Debug, Default)]
pub struct DetectionResult {
    pub is_vulnerable: bool,
    pub vulnerabilities: Vec<Vulnerability>,
    pub evidence: Vec<Evidence>,
    pub tested_parameters: usize,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn version(&self) -> &str;
    fn plugin_type(&self) -> PluginType;
    fn category(&self) -> Category;
    fn severity(&self) -> Severity;

    fn is_enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);

    async fn execute(&self, cancel: &CancelToken, target: &ScanTarget) -> Result<DetectionResult>;

    /// Capability probe: plugins that honour session cookies return their
    /// [`SessionAware`] surface here.
    fn session_support(&mut self) -> Option<&mut dyn SessionAware> {
        None
    }
}

pub trait SessionAware {
    fn accept_session_cookies(&mut self, cookies: &[Cookie]);
}
