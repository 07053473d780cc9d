//! Findings and scan-result model.
//!
//! `ScanResult` is shared between worker tasks and the coordinator; all
//! mutation goes through one internal lock and statistics are recomputed
//! on every write so readers always see a consistent snapshot.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::detector::extract;
use crate::errors::ScanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Severity {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(ScanError::Config(format!("unknown severity: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Injection,
    Authentication,
    Exposure,
    Misconfiguration,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Injection => "injection",
            Category::Authentication => "authentication",
            Category::Exposure => "exposure",
            Category::Misconfiguration => "misconfiguration",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnType {
    Sqli,
    Xss,
    Csrf,
    Other,
}

impl fmt::Display for VulnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VulnType::Sqli => "sqli",
            VulnType::Xss => "xss",
            VulnType::Csrf => "csrf",
            VulnType::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Where the payload was injected, in report vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Get,
    Post,
    Header,
    Cookie,
}

impl From<extract::Position> for Position {
    fn from(position: extract::Position) -> Self {
        match position {
            extract::Position::Query => Position::Get,
            extract::Position::Body => Position::Post,
            extract::Position::Header => Position::Header,
            extract::Position::Cookie => Position::Cookie,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Vulnerability {
    pub id: String,
    #[serde(rename = "type")]
    pub vuln_type: VulnType,
    pub category: Category,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub url: String,
    pub method: String,
    pub parameter: String,
    pub position: Position,
    pub payload: String,
    pub evidence: String,
    pub confidence: f64,
    pub plugin: String,
    pub cwe: String,
    pub cvss: f64,
    pub solution: String,
    pub references: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Vulnerability {
    pub fn builder() -> VulnerabilityBuilder {
        VulnerabilityBuilder::default()
    }
}

/// Write-once builder; `build` validates that severity and confidence
/// were provided.
#[derive(Debug, Default)]
pub struct VulnerabilityBuilder {
    vuln_type: Option<VulnType>,
    category: Option<Category>,
    severity: Option<Severity>,
    title: String,
    description: String,
    url: String,
    method: String,
    parameter: String,
    position: Option<Position>,
    payload: String,
    evidence: String,
    confidence: Option<f64>,
    plugin: String,
    cwe: String,
    cvss: f64,
    solution: String,
    references: Vec<String>,
}

impl VulnerabilityBuilder {
    pub fn vuln_type(mut self, value: VulnType) -> Self {
        self.vuln_type = Some(value);
        self
    }
    pub fn category(mut self, value: Category) -> Self {
        self.category = Some(value);
        self
    }
    pub fn severity(mut self, value: Severity) -> Self {
        self.severity = Some(value);
        self
    }
    pub fn title(mut self, value: impl Into<String>) -> Self {
        self.title = value.into();
        self
    }
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = value.into();
        self
    }
    pub fn url(mut self, value: impl Into<String>) -> Self {
        self.url = value.into();
        self
    }
    pub fn method(mut self, value: impl Into<String>) -> Self {
        self.method = value.into();
        self
    }
    pub fn parameter(mut self, name: impl Into<String>, position: Position) -> Self {
        self.parameter = name.into();
        self.position = Some(position);
        self
    }
    pub fn payload(mut self, value: impl Into<String>) -> Self {
        self.payload = value.into();
        self
    }
    pub fn evidence(mut self, value: impl Into<String>) -> Self {
        self.evidence = value.into();
        self
    }
    pub fn confidence(mut self, value: f64) -> Self {
        self.confidence = Some(value);
        self
    }
    pub fn plugin(mut self, value: impl Into<String>) -> Self {
        self.plugin = value.into();
        self
    }
    pub fn cwe(mut self, value: impl Into<String>) -> Self {
        self.cwe = value.into();
        self
    }
    pub fn cvss(mut self, value: f64) -> Self {
        self.cvss = value;
        self
    }
    pub fn solution(mut self, value: impl Into<String>) -> Self {
        self.solution = value.into();
        self
    }
    pub fn references(mut self, value: Vec<String>) -> Self {
        self.references = value;
        self
    }

    pub fn build(self) -> Result<Vulnerability, ScanError> {
        let severity = self
            .severity
            .ok_or_else(|| ScanError::Config("vulnerability requires a severity".to_string()))?;
        let confidence = self
            .confidence
            .ok_or_else(|| ScanError::Config("vulnerability requires a confidence".to_string()))?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ScanError::Config(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        Ok(Vulnerability {
            id: Uuid::new_v4().to_string(),
            vuln_type: self.vuln_type.unwrap_or(VulnType::Other),
            category: self.category.unwrap_or(Category::Misconfiguration),
            severity,
            title: self.title,
            description: self.description,
            url: self.url,
            method: self.method,
            parameter: self.parameter,
            position: self.position.unwrap_or(Position::Get),
            payload: self.payload,
            evidence: self.evidence,
            confidence,
            plugin: self.plugin,
            cwe: self.cwe,
            cvss: self.cvss,
            solution: self.solution,
            references: self.references,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Pending,
    Scanning,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    pub url: String,
    pub status: TargetStatus,
    #[serde(with = "duration_ns")]
    pub response_time: Duration,
    pub status_code: Option<u16>,
    pub content_type: Option<String>,
    pub content_size: Option<usize>,
    pub errors: Vec<String>,
}

impl TargetResult {
    pub fn pending(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: TargetStatus::Pending,
            response_time: Duration::ZERO,
            status_code: None,
            content_type: None,
            content_size: None,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStatistics {
    pub total_vulnerabilities: usize,
    pub vulns_by_severity: HashMap<String, usize>,
    pub vulns_by_category: HashMap<String, usize>,
    pub vulns_by_type: HashMap<String, usize>,
    pub targets_scanned: usize,
    pub targets_with_vulns: usize,
    pub avg_response_time_ns: u128,
    pub coverage_score: f64,
}

/// Aggregate scan state. Concurrent writers append through `&self`; the
/// coordinator reads snapshots.
pub struct ScanResult {
    inner: Mutex<ScanInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSnapshot {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "duration_ns")]
    pub duration: Duration,
    pub status: ScanStatus,
    pub targets: Vec<TargetResult>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub statistics: ScanStatistics,
}

#[derive(Debug)]
struct ScanInner {
    id: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: ScanStatus,
    targets: Vec<TargetResult>,
    vulnerabilities: Vec<Vulnerability>,
    statistics: ScanStatistics,
}

impl ScanResult {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(ScanInner {
                id: id.into(),
                start_time: Utc::now(),
                end_time: None,
                status: ScanStatus::Pending,
                targets: Vec::new(),
                vulnerabilities: Vec::new(),
                statistics: ScanStatistics::default(),
            }),
        }
    }

    pub fn with_generated_id() -> Self {
        Self::new(format!("scan_{}", Uuid::new_v4()))
    }

    pub fn id(&self) -> String {
        self.inner.lock().unwrap().id.clone()
    }

    pub fn set_running(&self) {
        self.inner.lock().unwrap().status = ScanStatus::Running;
    }

    pub fn set_completed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.end_time = Some(Utc::now());
        inner.status = ScanStatus::Completed;
        inner.recompute();
    }

    pub fn set_failed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.end_time = Some(Utc::now());
        inner.status = ScanStatus::Failed;
    }

    pub fn set_cancelled(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.end_time = Some(Utc::now());
        inner.status = ScanStatus::Cancelled;
    }

    pub fn add_vulnerability(&self, vulnerability: Vulnerability) {
        let mut inner = self.inner.lock().unwrap();
        inner.vulnerabilities.push(vulnerability);
        inner.recompute();
    }

    /// Insert or replace the record for `target.url`.
    pub fn upsert_target(&self, target: TargetResult) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.targets.iter_mut().find(|t| t.url == target.url) {
            *existing = target;
        } else {
            inner.targets.push(target);
        }
        inner.recompute();
    }

    pub fn update_target_status(&self, url: &str, status: TargetStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(target) = inner.targets.iter_mut().find(|t| t.url == url) {
            target.status = status;
        }
        inner.recompute();
    }

    pub fn vulnerability_count(&self) -> usize {
        self.inner.lock().unwrap().vulnerabilities.len()
    }

    pub fn has_vulnerabilities(&self) -> bool {
        self.vulnerability_count() > 0
    }

    pub fn status(&self) -> ScanStatus {
        self.inner.lock().unwrap().status
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        let inner = self.inner.lock().unwrap();
        let duration = match inner.end_time {
            Some(end) => (end - inner.start_time).to_std().unwrap_or(Duration::ZERO),
            None => (Utc::now() - inner.start_time).to_std().unwrap_or(Duration::ZERO),
        };
        ScanSnapshot {
            id: inner.id.clone(),
            start_time: inner.start_time,
            end_time: inner.end_time,
            duration,
            status: inner.status,
            targets: inner.targets.clone(),
            vulnerabilities: inner.vulnerabilities.clone(),
            statistics: inner.statistics.clone(),
        }
    }
}

impl ScanInner {
    fn recompute(&mut self) {
        let stats = &mut self.statistics;
        stats.total_vulnerabilities = self.vulnerabilities.len();

        stats.vulns_by_severity.clear();
        stats.vulns_by_category.clear();
        stats.vulns_by_type.clear();
        for vuln in &self.vulnerabilities {
            *stats
                .vulns_by_severity
                .entry(vuln.severity.to_string())
                .or_default() += 1;
            *stats
                .vulns_by_category
                .entry(vuln.category.to_string())
                .or_default() += 1;
            *stats
                .vulns_by_type
                .entry(vuln.vuln_type.to_string())
                .or_default() += 1;
        }

        stats.targets_scanned = self.targets.len();
        let vuln_urls: std::collections::HashSet<&str> = self
            .vulnerabilities
            .iter()
            .map(|v| v.url.as_str())
            .collect();
        stats.targets_with_vulns = vuln_urls.len();

        let completed: Vec<&TargetResult> = self
            .targets
            .iter()
            .filter(|t| t.status == TargetStatus::Completed && !t.response_time.is_zero())
            .collect();
        stats.avg_response_time_ns = if completed.is_empty() {
            0
        } else {
            completed
                .iter()
                .map(|t| t.response_time.as_nanos())
                .sum::<u128>()
                / completed.len() as u128
        };

        stats.coverage_score = if stats.targets_scanned == 0 {
            0.0
        } else {
            ((stats.targets_with_vulns as f64 / stats.targets_scanned as f64) * 100.0).min(100.0)
        };
    }
}

mod duration_ns {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(value.as_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_vuln(url: &str) -> Vulnerability {
        Vulnerability::builder()
            .vuln_type(VulnType::Sqli)
            .category(Category::Injection)
            .severity(Severity::High)
            .title("SQL injection")
            .url(url)
            .method("GET")
            .parameter("id", Position::Get)
            .payload("1'")
            .confidence(0.95)
            .build()
            .unwrap()
    }

    #[test]
    fn builder_requires_severity_and_confidence() {
        let missing_severity = Vulnerability::builder().confidence(0.9).build();
        assert!(matches!(missing_severity, Err(ScanError::Config(_))));

        let missing_confidence = Vulnerability::builder().severity(Severity::High).build();
        assert!(matches!(missing_confidence, Err(ScanError::Config(_))));

        let out_of_range = Vulnerability::builder()
            .severity(Severity::High)
            .confidence(1.5)
            .build();
        assert!(matches!(out_of_range, Err(ScanError::Config(_))));
    }

    #[test]
    fn severity_round_trips_from_str() {
        for name in ["info", "low", "medium", "high", "critical"] {
            let severity: Severity = name.parse().unwrap();
            assert_eq!(severity.to_string(), name);
        }
        assert!("extreme".parse::<Severity>().is_err());
    }

    #[test]
    fn statistics_recompute_on_mutation() {
        let result = ScanResult::new("scan_test");
        result.upsert_target(TargetResult {
            status: TargetStatus::Completed,
            response_time: Duration::from_millis(100),
            ..TargetResult::pending("http://a.test/")
        });
        result.upsert_target(TargetResult {
            status: TargetStatus::Completed,
            response_time: Duration::from_millis(300),
            ..TargetResult::pending("http://b.test/")
        });
        result.add_vulnerability(sample_vuln("http://a.test/"));
        result.add_vulnerability(sample_vuln("http://a.test/"));

        let snapshot = result.snapshot();
        let stats = &snapshot.statistics;
        assert_eq!(stats.total_vulnerabilities, 2);
        assert_eq!(stats.vulns_by_severity["high"], 2);
        assert_eq!(stats.vulns_by_type["sqli"], 2);
        assert_eq!(stats.targets_scanned, 2);
        assert_eq!(stats.targets_with_vulns, 1);
        assert_eq!(stats.avg_response_time_ns, Duration::from_millis(200).as_nanos());
        assert_eq!(stats.coverage_score, 50.0);
    }

    #[test]
    fn upsert_replaces_by_url() {
        let result = ScanResult::new("scan_test");
        result.upsert_target(TargetResult::pending("http://a.test/"));
        result.upsert_target(TargetResult {
            status: TargetStatus::Failed,
            errors: vec!["connect refused".into()],
            ..TargetResult::pending("http://a.test/")
        });

        let snapshot = result.snapshot();
        assert_eq!(snapshot.targets.len(), 1);
        assert_eq!(snapshot.targets[0].status, TargetStatus::Failed);
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_recorded() {
        let result = Arc::new(ScanResult::new("scan_concurrent"));
        let mut handles = Vec::new();
        for i in 0..8 {
            let result = Arc::clone(&result);
            handles.push(tokio::spawn(async move {
                for j in 0..25 {
                    result.add_vulnerability(sample_vuln(&format!("http://t{i}.test/{j}")));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(result.vulnerability_count(), 200);
        assert_eq!(result.snapshot().statistics.total_vulnerabilities, 200);
    }

    #[test]
    fn lifecycle_status_transitions() {
        let result = ScanResult::with_generated_id();
        assert_eq!(result.status(), ScanStatus::Pending);
        result.set_running();
        assert_eq!(result.status(), ScanStatus::Running);
        result.set_completed();
        let snapshot = result.snapshot();
        assert_eq!(snapshot.status, ScanStatus::Completed);
        assert!(snapshot.end_time.is_some());
    }
}
