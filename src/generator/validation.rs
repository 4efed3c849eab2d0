//! Output validation for generated policy queries.

use super::PolicyQueryResult;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::{info, warn};

pub const SELECT_CORRECTION: &str = "Please create a SELECT query for policy data";
pub const READ_ONLY_CORRECTION: &str =
    "Return exactly one read-only SELECT statement; data-modifying statements are not allowed";
pub const MALFORMED_CORRECTION: &str = "Respond with a single JSON object containing sql_query, explanation and business_context";

const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "ALTER", "DROP", "CREATE", "TRUNCATE", "MERGE", "GRANT",
];

/// A prompt topic that requires a table to appear in the generated SQL
#[derive(Debug, Clone, Copy)]
pub struct DomainRule {
    pub keywords: &'static [&'static str],
    pub table: &'static str,
    pub correction: &'static str,
    /// Warn-only rules never trigger a retry
    pub retry: bool,
}

pub const DOMAIN_RULES: &[DomainRule] = &[
    DomainRule {
        keywords: &["policy", "premium", "insured"],
        table: "policy",
        correction: "Policy-related queries should reference the policy table",
        retry: true,
    },
    DomainRule {
        keywords: &["endorsement"],
        table: "endorsement",
        correction: "Endorsement queries should reference the endorsement table",
        retry: true,
    },
    DomainRule {
        keywords: &["opportunity", "brokerage", "sales"],
        table: "opportunity",
        correction: "Opportunity, brokerage and sales queries should reference the opportunity table",
        retry: true,
    },
    DomainRule {
        keywords: &["company", "organization"],
        table: "company",
        correction: "Company-related query might need a company table join",
        retry: false,
    },
];

/// Result of validating one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Cleaned success result
    Accept(PolicyQueryResult),
    /// Corrective instruction for the next attempt
    Retry(String),
    /// The model's own failure, passed through unchanged
    Reject(PolicyQueryResult),
}

/// Strip literal backslashes and surrounding whitespace
pub fn clean_sql(raw: &str) -> String {
    raw.replace('\\', "").trim().to_string()
}

fn starts_with_select(sql: &str) -> bool {
    let first: String = sql.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    first.eq_ignore_ascii_case("SELECT")
}

/// Reject statement lists and anything that is not a plain read-only query.
///
/// `SELECT ... INTO`, row locks and data-modifying set expressions (including inside
/// CTEs and subqueries) are rejected even though they parse as queries.
pub fn check_read_only(sql: &str) -> Result<(), String> {
    match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        Ok(statements) => {
            if statements.len() != 1 {
                return Err(format!("expected one statement, found {}", statements.len()));
            }
            match &statements[0] {
                Statement::Query(query) => match query_side_effect(query) {
                    Some(reason) => Err(reason),
                    None => Ok(()),
                },
                other => Err(format!("statement is not a query: {}", other)),
            }
        }
        Err(e) => {
            // Parser gaps (vendor functions etc.) fall back to a keyword scan per statement.
            warn!("SQL parsing failed: {}, using keyword fallback", e);
            keyword_fallback(sql)
        }
    }
}

fn query_side_effect(query: &Query) -> Option<String> {
    if !query.locks.is_empty() {
        return Some("query takes row locks".to_string());
    }
    if let Some(with) = &query.with {
        if let Some(reason) = with.cte_tables.iter().find_map(|cte| query_side_effect(&cte.query)) {
            return Some(reason);
        }
    }
    set_expr_side_effect(&query.body)
}

fn set_expr_side_effect(body: &SetExpr) -> Option<String> {
    match body {
        SetExpr::Select(select) => select
            .into
            .as_ref()
            .map(|into| format!("SELECT INTO creates table {}", into.name)),
        SetExpr::Query(query) => query_side_effect(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_side_effect(left).or_else(|| set_expr_side_effect(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => None,
        other => Some(format!("data-modifying expression: {}", other)),
    }
}

fn keyword_fallback(sql: &str) -> Result<(), String> {
    let mut segments = sql.split(';');
    let first = segments.next().unwrap_or_default().to_uppercase();
    if first
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| word == "INTO")
    {
        return Err("found INTO clause in the query".to_string());
    }
    for segment in segments {
        let head: String = segment
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_uppercase();
        if MUTATING_KEYWORDS.contains(&head.as_str()) {
            return Err(format!("found {} statement after the query", head));
        }
    }
    Ok(())
}

/// Validate one generation against the user prompt.
pub fn validate_output(prompt: &str, output: PolicyQueryResult) -> Verdict {
    let (sql_query, explanation, business_context) = match output {
        PolicyQueryResult::Failure { .. } => {
            info!("Invalid policy request detected");
            return Verdict::Reject(output);
        }
        PolicyQueryResult::Success {
            sql_query,
            explanation,
            business_context,
        } => (sql_query, explanation, business_context),
    };

    let sql = clean_sql(&sql_query);
    if !starts_with_select(&sql) {
        warn!("Query is not a SELECT");
        return Verdict::Retry(SELECT_CORRECTION.to_string());
    }

    if let Err(reason) = check_read_only(&sql) {
        warn!("Query is not read-only: {}", reason);
        return Verdict::Retry(READ_ONLY_CORRECTION.to_string());
    }

    let sql_lower = sql.to_lowercase();
    let prompt_lower = prompt.to_lowercase();
    for rule in DOMAIN_RULES {
        let mentioned = rule.keywords.iter().any(|k| prompt_lower.contains(k));
        if !mentioned || sql_lower.contains(rule.table) {
            continue;
        }
        warn!("{}", rule.correction);
        if rule.retry {
            return Verdict::Retry(rule.correction.to_string());
        }
    }

    info!("Policy query validation passed");
    Verdict::Accept(PolicyQueryResult::Success {
        sql_query: sql,
        explanation,
        business_context,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(sql: &str) -> PolicyQueryResult {
        PolicyQueryResult::success(sql, "explanation", "context")
    }

    #[test]
    fn test_clean_sql() {
        assert_eq!(clean_sql("  SELECT * FROM \\\"policy\\\"\n"), "SELECT * FROM \"policy\"");
    }

    #[test]
    fn test_failure_passes_through() {
        let failure = PolicyQueryResult::failure("ambiguous", "add a table name");
        assert_eq!(
            validate_output("anything", failure.clone()),
            Verdict::Reject(failure)
        );
    }

    #[test]
    fn test_non_select_is_retried() {
        assert_eq!(
            validate_output("fix things", success("UPDATE policy SET x=1")),
            Verdict::Retry(SELECT_CORRECTION.to_string())
        );
        assert_eq!(
            validate_output("fix things", success("SELECTED nonsense")),
            Verdict::Retry(SELECT_CORRECTION.to_string())
        );
    }

    #[test]
    fn test_smuggled_statement_is_retried() {
        assert_eq!(
            validate_output("list policy", success("SELECT * FROM policy; DROP TABLE policy")),
            Verdict::Retry(READ_ONLY_CORRECTION.to_string())
        );
    }

    #[test]
    fn test_accepts_and_cleans() {
        let verdict = validate_output("list rows", success(" select id from policy;\\ "));
        assert_eq!(verdict, Verdict::Accept(success("select id from policy;")));
    }

    #[test]
    fn test_domain_table_rules() {
        assert_eq!(
            validate_output("total premium this year", success("SELECT SUM(x) FROM company")),
            Verdict::Retry(DOMAIN_RULES[0].correction.to_string())
        );
        assert_eq!(
            validate_output("recent endorsement count", success("SELECT COUNT(*) FROM policy")),
            Verdict::Retry(DOMAIN_RULES[1].correction.to_string())
        );
        assert_eq!(
            validate_output("estimated brokerage", success("SELECT 1 FROM policy")),
            Verdict::Retry(DOMAIN_RULES[2].correction.to_string())
        );
    }

    #[test]
    fn test_company_rule_is_warning_only() {
        let verdict = validate_output("which organization pays most", success("SELECT * FROM policy"));
        assert!(matches!(verdict, Verdict::Accept(_)));
    }

    #[test]
    fn test_read_only_check() {
        assert!(check_read_only("SELECT 1").is_ok());
        assert!(check_read_only("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
        assert!(check_read_only("DELETE FROM policy").is_err());
        assert!(check_read_only("SELECT 1; SELECT 2").is_err());
        assert!(check_read_only("SELECT * INTO policy_backup FROM policy").is_err());
        assert!(check_read_only("SELECT * FROM policy FOR UPDATE").is_err());
        assert!(check_read_only("WITH t AS (SELECT * INTO x FROM policy) SELECT 1").is_err());
        assert!(check_read_only("SELECT id FROM policy UNION SELECT id INTO y FROM endorsement").is_err());
    }

    #[test]
    fn test_select_into_is_retried() {
        assert_eq!(
            validate_output("copy policy rows", success("SELECT * INTO policy_backup FROM policy")),
            Verdict::Retry(READ_ONLY_CORRECTION.to_string())
        );
    }
}
