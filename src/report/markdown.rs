//! Markdown report rendering.

use std::fmt::Write as _;

use crate::report::model::ScanSnapshot;

pub fn render(snapshot: &ScanSnapshot) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Lancet Scan Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- **Scan id:** `{}`", snapshot.id);
    let _ = writeln!(out, "- **Status:** {:?}", snapshot.status);
    let _ = writeln!(out, "- **Started:** {}", snapshot.start_time.to_rfc3339());
    let _ = writeln!(out, "- **Duration:** {:.1}s", snapshot.duration.as_secs_f64());
    let _ = writeln!(out, "- **Targets scanned:** {}", snapshot.statistics.targets_scanned);
    let _ = writeln!(
        out,
        "- **Findings:** {}",
        snapshot.statistics.total_vulnerabilities
    );
    let _ = writeln!(out);

    if snapshot.vulnerabilities.is_empty() {
        let _ = writeln!(out, "No vulnerabilities were detected.");
        return out;
    }

    let _ = writeln!(out, "## Findings");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Severity | Title | URL | Parameter | Confidence |");
    let _ = writeln!(out, "|----------|-------|-----|-----------|------------|");
    for vuln in &snapshot.vulnerabilities {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {:.0}% |",
            vuln.severity,
            vuln.title,
            vuln.url,
            vuln.parameter,
            vuln.confidence * 100.0
        );
    }
    let _ = writeln!(out);

    for (index, vuln) in snapshot.vulnerabilities.iter().enumerate() {
        let _ = writeln!(out, "### {}. {}", index + 1, vuln.title);
        let _ = writeln!(out);
        let _ = writeln!(out, "- **Severity:** {}", vuln.severity);
        let _ = writeln!(out, "- **URL:** `{}`", vuln.url);
        let _ = writeln!(out, "- **Method / position:** {} / {:?}", vuln.method, vuln.position);
        let _ = writeln!(out, "- **Parameter:** `{}`", vuln.parameter);
        let _ = writeln!(out, "- **Payload:** `{}`", vuln.payload);
        let _ = writeln!(out, "- **Evidence:** {}", vuln.evidence);
        let _ = writeln!(out, "- **CWE:** {} (CVSS {:.1})", vuln.cwe, vuln.cvss);
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", vuln.description);
        let _ = writeln!(out);
        let _ = writeln!(out, "**Remediation:** {}", vuln.solution);
        if !vuln.references.is_empty() {
            let _ = writeln!(out);
            for reference in &vuln.references {
                let _ = writeln!(out, "- <{reference}>");
            }
        }
        let _ = writeln!(out);
    }

    out
}
