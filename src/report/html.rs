//! Self-contained HTML report.

use std::fmt::Write as _;

use crate::report::model::{ScanSnapshot, Severity};

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; margin: 2rem auto; max-width: 70rem; color: #1c2330; }
h1 { border-bottom: 2px solid #d33; padding-bottom: .4rem; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border: 1px solid #cfd6e0; padding: .45rem .6rem; text-align: left; font-size: .92rem; }
th { background: #f2f5f9; }
.sev { padding: .1rem .5rem; border-radius: .6rem; color: #fff; font-size: .8rem; }
.sev-critical { background: #8b1a1a; }
.sev-high { background: #d33; }
.sev-medium { background: #d98324; }
.sev-low { background: #2b7a3f; }
.sev-info { background: #5a6b82; }
.finding { border: 1px solid #cfd6e0; border-radius: .4rem; padding: 1rem; margin: 1rem 0; }
code { background: #f2f5f9; padding: .1rem .3rem; border-radius: .2rem; }
.meta { color: #5a6b82; font-size: .9rem; }
"#;

fn severity_class(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "sev sev-critical",
        Severity::High => "sev sev-high",
        Severity::Medium => "sev sev-medium",
        Severity::Low => "sev sev-low",
        Severity::Info => "sev sev-info",
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render(snapshot: &ScanSnapshot) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Lancet Report {id}</title><style>{STYLE}</style></head><body>",
        id = escape(&snapshot.id)
    );

    let _ = write!(out, "<h1>Lancet Scan Report</h1>");
    let _ = write!(
        out,
        "<p class=\"meta\">Scan <code>{}</code> &middot; {:?} &middot; started {} &middot; {:.1}s \
         &middot; {} targets &middot; {} findings</p>",
        escape(&snapshot.id),
        snapshot.status,
        snapshot.start_time.to_rfc3339(),
        snapshot.duration.as_secs_f64(),
        snapshot.statistics.targets_scanned,
        snapshot.statistics.total_vulnerabilities,
    );

    if snapshot.vulnerabilities.is_empty() {
        let _ = write!(out, "<p>No vulnerabilities were detected.</p></body></html>");
        return out;
    }

    let _ = write!(
        out,
        "<table><tr><th>Severity</th><th>Title</th><th>URL</th><th>Parameter</th><th>Confidence</th></tr>"
    );
    for vuln in &snapshot.vulnerabilities {
        let _ = write!(
            out,
            "<tr><td><span class=\"{}\">{}</span></td><td>{}</td><td><code>{}</code></td><td><code>{}</code></td><td>{:.0}%</td></tr>",
            severity_class(vuln.severity),
            vuln.severity,
            escape(&vuln.title),
            escape(&vuln.url),
            escape(&vuln.parameter),
            vuln.confidence * 100.0,
        );
    }
    let _ = write!(out, "</table>");

    for vuln in &snapshot.vulnerabilities {
        let _ = write!(out, "<div class=\"finding\">");
        let _ = write!(
            out,
            "<h3><span class=\"{}\">{}</span> {}</h3>",
            severity_class(vuln.severity),
            vuln.severity,
            escape(&vuln.title)
        );
        let _ = write!(out, "<p>{}</p>", escape(&vuln.description));
        let _ = write!(
            out,
            "<p><strong>Request:</strong> {} <code>{}</code> &middot; parameter \
             <code>{}</code> ({:?})</p>",
            escape(&vuln.method),
            escape(&vuln.url),
            escape(&vuln.parameter),
            vuln.position,
        );
        let _ = write!(
            out,
            "<p><strong>Payload:</strong> <code>{}</code></p>",
            escape(&vuln.payload)
        );
        let _ = write!(
            out,
            "<p><strong>Evidence:</strong> {}</p>",
            escape(&vuln.evidence)
        );
        let _ = write!(
            out,
            "<p><strong>{}</strong> &middot; CVSS {:.1} &middot; confidence {:.0}%</p>",
            escape(&vuln.cwe),
            vuln.cvss,
            vuln.confidence * 100.0
        );
        let _ = write!(
            out,
            "<p><strong>Remediation:</strong> {}</p>",
            escape(&vuln.solution)
        );
        if !vuln.references.is_empty() {
            let _ = write!(out, "<ul>");
            for reference in &vuln.references {
                let href = escape(reference);
                let _ = write!(out, "<li><a href=\"{href}\">{href}</a></li>");
            }
            let _ = write!(out, "</ul>");
        }
        let _ = write!(out, "</div>");
    }

    let _ = write!(out, "</body></html>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::model::{Category, Position, ScanResult, VulnType, Vulnerability};

    #[test]
    fn findings_are_escaped() {
        let result = ScanResult::new("scan_html");
        result.add_vulnerability(
            Vulnerability::builder()
                .vuln_type(VulnType::Sqli)
                .category(Category::Injection)
                .severity(Severity::High)
                .title("SQL injection")
                .url("http://app.test/item?id=1")
                .method("GET")
                .parameter("id", Position::Get)
                .payload("1' OR '1'='1 <script>")
                .confidence(0.95)
                .build()
                .unwrap(),
        );
        result.set_completed();

        let html = render(&result.snapshot());
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("sev-high"));
    }

    #[test]
    fn clean_report_renders() {
        let result = ScanResult::new("scan_html_clean");
        result.set_completed();
        let html = render(&result.snapshot());
        assert!(html.contains("No vulnerabilities were detected."));
    }
}
