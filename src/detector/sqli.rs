//! SQL injection detector.
//!
//! Strategies run in a fixed order per injection point (error-based,
//! boolean-blind, UNION, time-blind) so cheap high-confidence oracles
//! shortcut the expensive ones. The first confirmed finding on a point
//! also stops probing the remaining points of the target.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::cancel::CancelToken;
use crate::detector::analyzer;
use crate::detector::extract::{InjectionPoint, ParameterExtractor, ParamType};
use crate::detector::modifier::RequestModifier;
use crate::detector::payloads::{self, Payload};
use crate::detector::{
    DetectionResult, Evidence, EvidenceKind, Plugin, PluginType, ScanTarget, SessionAware,
};
use crate::errors::Result;
use crate::http::client::HttpClient;
use crate::report::model::{Category, Severity, Vulnerability, VulnType};
use crate::session::Cookie;

const PLUGIN_NAME: &str = "sqli-detector";
const SOLUTION: &str =
    "Use parameterised queries (prepared statements), validate input, and run the application \
     under a least-privilege database account.";
const REFERENCES: &[&str] = &[
    "https://owasp.org/www-community/attacks/SQL_Injection",
    "https://cheatsheetseries.owasp.org/cheatsheets/SQL_Injection_Prevention_Cheat_Sheet.html",
];

/// Per-point reference response: the unmutated request sent through the
/// same modifier path the probes use.
struct PointBaseline {
    status: u16,
    body: Vec<u8>,
    elapsed: Duration,
}

pub struct SqliDetector {
    client: Arc<HttpClient>,
    modifier: RequestModifier,
    extractor: ParameterExtractor,
    enabled: bool,
}

impl SqliDetector {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            client,
            modifier: RequestModifier::new(),
            extractor: ParameterExtractor::new(),
            enabled: true,
        }
    }

    async fn fetch_baseline(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
        point: &InjectionPoint,
    ) -> Result<PointBaseline> {
        let response = self
            .modifier
            .send(cancel, &self.client, target, point, &point.value)
            .await?;
        Ok(PointBaseline {
            status: response.status,
            elapsed: response.elapsed,
            body: response.body,
        })
    }

    async fn probe_point(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
        point: &InjectionPoint,
        baseline: &PointBaseline,
        evidence: &mut Vec<Evidence>,
    ) -> Option<Vulnerability> {
        if let Some(vuln) = self.error_based(cancel, target, point, baseline, evidence).await {
            return Some(vuln);
        }
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(vuln) = self.boolean_blind(cancel, target, point, baseline, evidence).await {
            return Some(vuln);
        }
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(vuln) = self.union_based(cancel, target, point, evidence).await {
            return Some(vuln);
        }
        if cancel.is_cancelled() {
            return None;
        }
        self.time_blind(cancel, target, point, baseline, evidence).await
    }

    /// §1: syntax-breaking payloads, judged by status flip, DBMS error
    /// signatures, or a gross error-page length change.
    async fn error_based(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
        point: &InjectionPoint,
        baseline: &PointBaseline,
        evidence: &mut Vec<Evidence>,
    ) -> Option<Vulnerability> {
        for payload in payloads::error_payloads(point.param_type) {
            if cancel.is_cancelled() {
                return None;
            }
            let assembled = payloads::assemble(point.param_type, &point.value, payload.value);
            let response = match self
                .modifier
                .send(cancel, &self.client, target, point, &assembled)
                .await
            {
                Ok(resp) => resp,
                Err(_) => continue,
            };

            if response.status >= 500 && baseline.status < 500 {
                evidence.push(Evidence {
                    kind: EvidenceKind::StatusCode,
                    description: format!(
                        "status flipped {} -> {}",
                        baseline.status, response.status
                    ),
                    confidence: 0.90,
                });
                return self.finding(
                    target,
                    point,
                    "SQL error-based injection (status flip)",
                    &assembled,
                    format!(
                        "HTTP status changed from {} to {} under a syntax-breaking payload",
                        baseline.status, response.status
                    ),
                    0.90,
                );
            }

            let body_text = response.body_text();
            if let Some(pattern) = analyzer::matches_sql_error(&body_text) {
                evidence.push(Evidence {
                    kind: EvidenceKind::Pattern,
                    description: format!("matched error signature: {pattern}"),
                    confidence: 0.95,
                });
                return self.finding(
                    target,
                    point,
                    "SQL error-based injection",
                    &assembled,
                    format!("DBMS error signature in response: {pattern}"),
                    0.95,
                );
            }

            let baseline_len = baseline.body.len();
            let delta = baseline_len.abs_diff(response.body_len());
            if delta > 1000 && delta * 4 > baseline_len {
                let (indicated, hits) = analyzer::contains_error_patterns(
                    &response.body,
                    payloads::ERROR_INDICATOR_WORDS,
                );
                if indicated {
                    evidence.push(Evidence {
                        kind: EvidenceKind::Difference,
                        description: format!("length delta {delta} with indicators {hits:?}"),
                        confidence: 0.75,
                    });
                    return self.finding(
                        target,
                        point,
                        "SQL error-based injection (response change)",
                        &assembled,
                        format!(
                            "response length changed by {delta} bytes and contains error \
                             indicators {hits:?}"
                        ),
                        0.75,
                    );
                }
            }
        }
        None
    }

    /// §2: TRUE/FALSE payload pairs compared against the point baseline.
    async fn boolean_blind(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
        point: &InjectionPoint,
        baseline: &PointBaseline,
        evidence: &mut Vec<Evidence>,
    ) -> Option<Vulnerability> {
        for pair in payloads::boolean_pairs(point.param_type) {
            if cancel.is_cancelled() {
                return None;
            }
            let true_payload = payloads::assemble(point.param_type, &point.value, pair.true_payload);
            let false_payload =
                payloads::assemble(point.param_type, &point.value, pair.false_payload);

            let true_resp = match self
                .modifier
                .send(cancel, &self.client, target, point, &true_payload)
                .await
            {
                Ok(resp) => resp,
                Err(_) => continue,
            };
            let false_resp = match self
                .modifier
                .send(cancel, &self.client, target, point, &false_payload)
                .await
            {
                Ok(resp) => resp,
                Err(_) => continue,
            };

            if let Some(reason) =
                boolean_divergence(&baseline.body, &true_resp.body, &false_resp.body)
            {
                evidence.push(Evidence {
                    kind: EvidenceKind::Difference,
                    description: reason.clone(),
                    confidence: 0.85,
                });
                return self.finding(
                    target,
                    point,
                    "SQL boolean-based blind injection",
                    &format!("TRUE: {true_payload} / FALSE: {false_payload}"),
                    format!("{} ({reason})", pair.description),
                    0.85,
                );
            }
        }
        None
    }

    /// §3: walk `ORDER BY k` until the column count overflows, then probe
    /// a marker UNION SELECT with k-1 columns.
    async fn union_based(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
        point: &InjectionPoint,
        evidence: &mut Vec<Evidence>,
    ) -> Option<Vulnerability> {
        for k in 1..=10usize {
            if cancel.is_cancelled() {
                return None;
            }
            let probe = payloads::union_order_by(point.param_type, &point.value, k);
            let response = match self
                .modifier
                .send(cancel, &self.client, target, point, &probe)
                .await
            {
                Ok(resp) => resp,
                Err(_) => continue,
            };

            let overflowed = response.status >= 500
                || analyzer::contains_error_patterns(
                    &response.body,
                    payloads::ERROR_INDICATOR_WORDS,
                )
                .0;
            if !overflowed {
                continue;
            }
            if k <= 1 {
                break;
            }

            let columns = k - 1;
            let union_payload = payloads::union_select(point.param_type, &point.value, columns);
            let union_resp = match self
                .modifier
                .send(cancel, &self.client, target, point, &union_payload)
                .await
            {
                Ok(resp) => resp,
                Err(_) => break,
            };

            if union_resp.body_text().contains(payloads::UNION_MARKER) {
                evidence.push(Evidence {
                    kind: EvidenceKind::Response,
                    description: format!("union marker reflected with {columns} columns"),
                    confidence: 0.95,
                });
                return self.finding(
                    target,
                    point,
                    "SQL UNION-based injection",
                    &union_payload,
                    format!("UNION SELECT executed with {columns} columns; marker reflected"),
                    0.95,
                );
            }
            break;
        }
        None
    }

    /// §4: delay payloads against a per-point reference round trip.
    async fn time_blind(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
        point: &InjectionPoint,
        baseline: &PointBaseline,
        evidence: &mut Vec<Evidence>,
    ) -> Option<Vulnerability> {
        let catalog = payloads::time_payloads(point.param_type);
        self.time_blind_with(cancel, target, point, baseline.elapsed, &catalog, evidence)
            .await
    }

    /// Timing oracle, catalog-injected so the threshold logic is testable
    /// with short delays.
    async fn time_blind_with(
        &self,
        cancel: &CancelToken,
        target: &ScanTarget,
        point: &InjectionPoint,
        baseline_time: Duration,
        catalog: &[Payload],
        evidence: &mut Vec<Evidence>,
    ) -> Option<Vulnerability> {
        for payload in catalog {
            if cancel.is_cancelled() {
                return None;
            }
            let Some(expected) = payload.expected_delay else {
                continue;
            };
            let assembled = payloads::assemble(point.param_type, &point.value, payload.value);
            let response = match self
                .modifier
                .send(cancel, &self.client, target, point, &assembled)
                .await
            {
                Ok(resp) => resp,
                Err(_) => continue,
            };

            let delay = response.elapsed.saturating_sub(baseline_time);
            if delay >= expected.mul_f64(0.8) && response.elapsed >= Duration::from_secs(3) {
                evidence.push(Evidence {
                    kind: EvidenceKind::Timing,
                    description: format!(
                        "elapsed {:?} vs baseline {:?} (expected delay {:?})",
                        response.elapsed, baseline_time, expected
                    ),
                    confidence: 0.80,
                });
                return self.finding(
                    target,
                    point,
                    "SQL time-based blind injection",
                    &assembled,
                    format!(
                        "response took {:?} against a {:?} baseline (expected delay {:?})",
                        response.elapsed, baseline_time, expected
                    ),
                    0.80,
                );
            }
        }
        None
    }

    fn finding(
        &self,
        target: &ScanTarget,
        point: &InjectionPoint,
        title: &str,
        payload: &str,
        evidence: String,
        confidence: f64,
    ) -> Option<Vulnerability> {
        let built = Vulnerability::builder()
            .vuln_type(VulnType::Sqli)
            .category(Category::Injection)
            .severity(Severity::High)
            .title(title)
            .description(format!(
                "Parameter `{}` of {} is injectable: {}",
                point.name, target.url, title
            ))
            .url(target.url.to_string())
            .method(target.method.clone())
            .parameter(point.name.clone(), point.position.into())
            .payload(payload)
            .evidence(evidence)
            .confidence(confidence)
            .plugin(PLUGIN_NAME)
            .cwe("CWE-89")
            .cvss(9.0)
            .solution(SOLUTION)
            .references(REFERENCES.iter().map(|r| r.to_string()).collect())
            .build();

        match built {
            Ok(vuln) => Some(vuln),
            Err(err) => {
                tracing::warn!(%err, "dropping malformed finding");
                None
            }
        }
    }
}

/// Boolean-blind decision: any one of the four divergence signals fires.
fn boolean_divergence(baseline: &[u8], true_body: &[u8], false_body: &[u8]) -> Option<String> {
    let baseline_len = baseline.len();
    let true_len = true_body.len();
    let false_len = false_body.len();

    if true_len.abs_diff(baseline_len) < 100 && false_len.abs_diff(baseline_len) > 500 {
        return Some(format!(
            "TRUE tracks baseline ({true_len} vs {baseline_len} bytes) while FALSE diverges \
             ({false_len} bytes)"
        ));
    }

    if true_len.abs_diff(false_len) > 200 {
        return Some(format!(
            "TRUE/FALSE responses differ by {} bytes",
            true_len.abs_diff(false_len)
        ));
    }

    let (true_sim, _) = analyzer::difference(baseline, true_body);
    let (false_sim, _) = analyzer::difference(baseline, false_body);
    if true_sim > 0.95 && false_sim < 0.85 {
        return Some(format!(
            "similarity split: TRUE {true_sim:.2} vs FALSE {false_sim:.2}"
        ));
    }

    let histogram = analyzer::word_histogram_diff(
        &String::from_utf8_lossy(true_body),
        &String::from_utf8_lossy(false_body),
    );
    if histogram > 0.1 {
        return Some(format!(
            "word histogram divergence {:.0}% between TRUE and FALSE",
            histogram * 100.0
        ));
    }

    None
}

#[async_trait]
impl Plugin for SqliDetector {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn description(&self) -> &str {
        "Detects SQL injection via error-based, boolean-blind, UNION, and time-blind strategies"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Active
    }

    fn category(&self) -> Category {
        Category::Injection
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    async fn execute(&self, cancel: &CancelToken, target: &ScanTarget) -> Result<DetectionResult> {
        let mut result = DetectionResult::default();

        let points = self.extractor.extract(target);
        result.tested_parameters = points.len();
        if points.is_empty() {
            tracing::debug!(url = %target.url, "no injectable parameters");
            return Ok(result);
        }

        for point in &points {
            if cancel.is_cancelled() {
                break;
            }
            tracing::debug!(
                parameter = %point.name,
                position = ?point.position,
                "probing injection point"
            );

            let baseline = match self.fetch_baseline(cancel, target, point).await {
                Ok(b) => b,
                Err(err) => {
                    tracing::debug!(parameter = %point.name, %err, "baseline fetch failed");
                    continue;
                }
            };

            if let Some(vuln) = self
                .probe_point(cancel, target, point, &baseline, &mut result.evidence)
                .await
            {
                tracing::info!(
                    parameter = %point.name,
                    confidence = vuln.confidence,
                    "sql injection confirmed"
                );
                result.is_vulnerable = true;
                result.vulnerabilities.push(vuln);
                // One confirmed point is enough; avoid redundant traffic
                // against the same target.
                break;
            }
        }

        Ok(result)
    }

    fn session_support(&mut self) -> Option<&mut dyn SessionAware> {
        Some(self)
    }
}

impl SessionAware for SqliDetector {
    fn accept_session_cookies(&mut self, cookies: &[Cookie]) {
        self.modifier.set_session_cookies(cookies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::client::ClientOptions;
    use crate::testutil::{TestResponse, TestServer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn detector_for(server_url: &str) -> (SqliDetector, ScanTarget) {
        let client = Arc::new(HttpClient::new(ClientOptions::default()).unwrap());
        let detector = SqliDetector::new(client);
        let target = ScanTarget::new(Url::parse(server_url).unwrap());
        (detector, target)
    }

    #[test]
    fn boolean_divergence_signals() {
        let baseline = vec![b'a'; 20_000];
        let truthy = vec![b'a'; 20_000];
        let falsy = vec![b'b'; 2_000];
        assert!(boolean_divergence(&baseline, &truthy, &falsy).is_some());

        // No divergence: all three match.
        assert!(boolean_divergence(&baseline, &truthy, &truthy.clone()).is_none());
    }

    #[tokio::test]
    async fn error_based_finding_on_numeric_parameter() {
        // S1: quoting `id` yields a MySQL syntax error in a 200 page.
        let server = TestServer::spawn(|req| {
            let path = req.decoded_path();
            if path.contains('\'') {
                TestResponse::html(
                    "You have an error in your SQL syntax; check the manual that corresponds",
                )
            } else {
                TestResponse::html("<html><body>item page</body></html>")
            }
        })
        .await;

        let (detector, target) = detector_for(&server.url("/item?id=1"));
        let result = detector
            .execute(&CancelToken::new(), &target)
            .await
            .unwrap();

        assert!(result.is_vulnerable);
        assert_eq!(result.vulnerabilities.len(), 1);
        let vuln = &result.vulnerabilities[0];
        assert_eq!(vuln.parameter, "id");
        assert_eq!(vuln.position, crate::report::model::Position::Get);
        assert_eq!(vuln.payload, "1'");
        assert_eq!(vuln.confidence, 0.95);
        assert_eq!(vuln.vuln_type, VulnType::Sqli);
        assert_eq!(vuln.severity, Severity::High);
        assert_eq!(vuln.cwe, "CWE-89");
    }

    #[tokio::test]
    async fn boolean_blind_finding_on_string_parameter() {
        // S2: falsy expressions return a small page, everything else a
        // large one with no error vocabulary.
        let big = "results ".repeat(2500);
        let small = "none".to_string();
        let server = TestServer::spawn(move |req| {
            let path = req.decoded_path();
            let falsy = path.contains("'1'='2")
                || path.contains("\"1\"=\"2")
                || path.contains("'a'='b")
                || path.contains("1=2");
            if falsy {
                TestResponse::html(&small)
            } else {
                TestResponse::html(&big)
            }
        })
        .await;

        let (detector, target) = detector_for(&server.url("/search?q=apple"));
        let result = detector
            .execute(&CancelToken::new(), &target)
            .await
            .unwrap();

        assert!(result.is_vulnerable);
        let vuln = &result.vulnerabilities[0];
        assert_eq!(vuln.confidence, 0.85);
        assert!(vuln.payload.contains("TRUE: apple' AND '1'='1"));
        assert!(vuln.payload.contains("FALSE: apple' AND '1'='2"));
    }

    #[tokio::test]
    async fn union_marker_confirms_union_injection() {
        let server = TestServer::spawn(|req| {
            let path = req.decoded_path();
            if path.contains("UNION SELECT") {
                TestResponse::html("row: UNION_TEST_0 | COL_1")
            } else if path.contains("ORDER BY") {
                // Column overflow from 3 columns up.
                let k: usize = path
                    .split("ORDER BY ")
                    .nth(1)
                    .and_then(|s| s.split("--").next())
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(1);
                if k >= 3 {
                    TestResponse::new(500, "Unknown column '3' in 'order clause'")
                } else {
                    TestResponse::html("ordered fine")
                }
            } else if path.contains('\'') || path.contains('"') {
                // Quiet failures: same page, no error text, so the error
                // and boolean strategies stay silent.
                TestResponse::html("item page")
            } else {
                TestResponse::html("item page")
            }
        })
        .await;

        let (detector, target) = detector_for(&server.url("/item?id=1"));
        let result = detector
            .execute(&CancelToken::new(), &target)
            .await
            .unwrap();

        assert!(result.is_vulnerable);
        let vuln = &result.vulnerabilities[0];
        assert_eq!(vuln.confidence, 0.95);
        assert!(vuln.title.contains("UNION"));
        assert!(vuln.payload.contains("UNION SELECT"));
    }

    #[tokio::test]
    async fn short_circuit_stops_probing_after_first_finding() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        let server = TestServer::spawn(|req| {
            HITS.fetch_add(1, Ordering::SeqCst);
            let path = req.decoded_path();
            if path.contains('\'') {
                TestResponse::html("You have an error in your SQL syntax")
            } else {
                TestResponse::html("page")
            }
        })
        .await;

        // Two parameters; the first confirmed point must stop the scan of
        // the second entirely.
        let (detector, target) = detector_for(&server.url("/item?id=1&page=2"));
        let result = detector
            .execute(&CancelToken::new(), &target)
            .await
            .unwrap();

        assert_eq!(result.vulnerabilities.len(), 1);
        assert_eq!(result.tested_parameters, 2);
        // Baseline + first error payload for one point only.
        assert_eq!(HITS.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn time_blind_threshold_on_injected_catalog() {
        // S3-style: the delay payload stalls the server past the 3s floor.
        let server = TestServer::spawn(|req| {
            if req.decoded_path().contains("SLEEP") {
                TestResponse::html("slow page").with_delay(Duration::from_millis(3300))
            } else {
                TestResponse::html("fast page")
            }
        })
        .await;

        let (detector, target) = detector_for(&server.url("/item?id=1"));
        let point = InjectionPoint {
            name: "id".into(),
            value: "1".into(),
            position: crate::detector::extract::Position::Query,
            param_type: ParamType::Numeric,
        };
        let catalog = [Payload {
            value: "' AND SLEEP(3)--",
            description: "test sleep",
            expected_delay: Some(Duration::from_secs(3)),
        }];

        let mut evidence = Vec::new();
        let vuln = detector
            .time_blind_with(
                &CancelToken::new(),
                &target,
                &point,
                Duration::from_millis(120),
                &catalog,
                &mut evidence,
            )
            .await
            .expect("expected a time-blind finding");

        assert_eq!(vuln.confidence, 0.80);
        // Numeric point: the leading quote is stripped.
        assert_eq!(vuln.payload, "1 AND SLEEP(3)--");
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].kind, EvidenceKind::Timing);
    }

    #[tokio::test]
    async fn clean_target_produces_no_findings() {
        let server = TestServer::spawn(|_req| TestResponse::html("immaculate page")).await;
        let (detector, target) = detector_for(&server.url("/item?id=1"));
        let result = detector
            .execute(&CancelToken::new(), &target)
            .await
            .unwrap();
        assert!(!result.is_vulnerable);
        assert!(result.vulnerabilities.is_empty());
    }
}
