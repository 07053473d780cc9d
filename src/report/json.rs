//! JSON report with a stable key layout.

use std::collections::HashMap;

use serde::Serialize;

use crate::errors::{Result, ScanError};
use crate::report::model::{
    Category, ScanSnapshot, ScanStatistics, TargetResult, VulnType, Vulnerability,
};

#[derive(Serialize)]
struct Report<'a> {
    id: &'a str,
    scan_info: ScanInfo,
    targets: &'a [TargetResult],
    vulnerabilities: &'a [Vulnerability],
    statistics: &'a ScanStatistics,
    recommendations: Vec<Recommendation>,
}

#[derive(Serialize)]
struct ScanInfo {
    start_time: String,
    end_time: Option<String>,
    duration: f64,
    status: String,
}

pub fn render(snapshot: &ScanSnapshot) -> Result<String> {
    let report = Report {
        id: &snapshot.id,
        scan_info: ScanInfo {
            start_time: snapshot.start_time.to_rfc3339(),
            end_time: snapshot.end_time.map(|t| t.to_rfc3339()),
            duration: snapshot.duration.as_secs_f64(),
            status: format!("{:?}", snapshot.status).to_lowercase(),
        },
        targets: &snapshot.targets,
        vulnerabilities: &snapshot.vulnerabilities,
        statistics: &snapshot.statistics,
        recommendations: recommendations(&snapshot.vulnerabilities),
    };

    serde_json::to_string_pretty(&report)
        .map_err(|e| ScanError::Parse(format!("report serialization failed: {e}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub id: String,
    pub title: String,
    pub priority: String,
    pub category: Category,
    pub vulnerability_types: Vec<VulnType>,
    pub description: String,
    pub solution: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    pub effort: String,
    pub impact: String,
}

/// One recommendation per vulnerability category, highest priority
/// first.
fn recommendations(vulnerabilities: &[Vulnerability]) -> Vec<Recommendation> {
    let mut by_category: HashMap<Category, Vec<VulnType>> = HashMap::new();
    for vuln in vulnerabilities {
        by_category.entry(vuln.category).or_default().push(vuln.vuln_type);
    }

    let mut out: Vec<Recommendation> = by_category
        .into_iter()
        .map(|(category, types)| category_recommendation(category, &types))
        .collect();

    // Priority descending; category name breaks ties so the output is
    // stable.
    out.sort_by(|a, b| {
        priority_rank(&b.priority)
            .cmp(&priority_rank(&a.priority))
            .then_with(|| a.category.to_string().cmp(&b.category.to_string()))
    });
    out
}

fn priority_rank(priority: &str) -> u8 {
    match priority {
        "Critical" => 4,
        "High" => 3,
        "Medium" => 2,
        "Low" => 1,
        _ => 0,
    }
}

fn category_recommendation(category: Category, types: &[VulnType]) -> Recommendation {
    let mut unique_types: Vec<VulnType> = Vec::new();
    for vuln_type in types {
        if !unique_types.contains(vuln_type) {
            unique_types.push(*vuln_type);
        }
    }
    let count = types.len();

    match category {
        Category::Injection => Recommendation {
            id: format!("rec_{category}_1"),
            title: "Fix injection vulnerabilities".to_string(),
            priority: "Critical".to_string(),
            category,
            vulnerability_types: unique_types,
            description: format!("Found {count} {category} vulnerabilities that need attention"),
            solution: "Implement input validation, use parameterised queries, and apply \
                       least-privilege principles"
                .to_string(),
            references: vec![
                "https://owasp.org/www-community/attacks/SQL_Injection".to_string(),
                "https://cheatsheetseries.owasp.org/cheatsheets/Input_Validation_Cheat_Sheet.html"
                    .to_string(),
            ],
            effort: "Medium".to_string(),
            impact: "Critical".to_string(),
        },
        Category::Authentication => Recommendation {
            id: format!("rec_{category}_1"),
            title: "Strengthen authentication controls".to_string(),
            priority: "High".to_string(),
            category,
            vulnerability_types: unique_types,
            description: format!("Found {count} authentication-related vulnerabilities"),
            solution: "Implement proper authentication mechanisms, session management, and \
                       access controls"
                .to_string(),
            references: vec![
                "https://owasp.org/www-project-top-ten/2017/A2_2017-Broken_Authentication"
                    .to_string(),
            ],
            effort: "High".to_string(),
            impact: "High".to_string(),
        },
        Category::Exposure | Category::Misconfiguration => Recommendation {
            id: format!("rec_{category}_1"),
            title: format!("Address {category} issues"),
            priority: "Medium".to_string(),
            category,
            vulnerability_types: unique_types,
            description: format!("Found {count} {category} related issues"),
            solution: "Review and remediate the identified issues according to security best \
                       practices"
                .to_string(),
            references: Vec::new(),
            effort: "Low".to_string(),
            impact: "Medium".to_string(),
        },
    }
}
