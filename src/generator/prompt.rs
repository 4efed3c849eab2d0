//! System prompt for policy SQL generation.

use super::GenerationRequest;
use chrono::NaiveDate;

pub const SECURITY_RULES: &str = r#"## SECURITY RESTRICTIONS
**ONLY SELECT STATEMENTS ALLOWED** - Never generate DELETE, UPDATE, INSERT, ALTER, DROP, CREATE or TRUNCATE commands.
Return exactly one statement."#;

pub const BUSINESS_ENTITIES: &str = r#"## KEY BUSINESS ENTITIES
- **policy**: Insurance contracts with coverage terms and premiums
- **company**: Policyholders (corporations, businesses, individuals)
- **opportunity**: Sales pipeline and brokerage tracking
- **endorsement**: Policy modifications and amendments, linked via `policy_id`
- **caution_deposit**, **caution_deposit_transaction**, **caution_deposit_policy_mapping**: Security deposits, their transactions and the policies they cover
- **lookup_data**: Central reference table for all enum values"#;

pub const LOOKUP_RULES: &str = r#"## LOOKUP TABLE RULES
- Any column ending with `_lid` references `lookup_data.id` (e.g. `policy_type_lid`, `status_lid`, `approval_status_lid`)
- When the user gives a text value for such a column (e.g. "active", "motor"), JOIN `lookup_data` and match on `lookup_data.value`
- Only search free-text columns (remarks, sales_pitch, source, description) when no lookup column applies

Example:
```sql
SELECT p.policy_name, p.premium_at_inception, ld.value AS status
FROM policy p
JOIN lookup_data ld ON p.status_lid = ld.id
WHERE ld.value ILIKE '%active%'
LIMIT 100
```"#;

pub const QUERY_RULES: &str = r#"## QUERY RULES
1. **Text matching**: ALWAYS use ILIKE with % wildcards instead of = for user-provided text
2. **NULL handling**: Use COALESCE() in aggregations and IS NOT NULL on critical joins
3. **Row limiting**: Add LIMIT 100 unless the user explicitly asks for all rows or the result is an aggregate
4. **Aliases**: p=policy, c=company, o=opportunity, e=endorsement, ld=lookup_data
5. **Dates**: `policy_from`/`policy_to` define the coverage period, `created_at` is the creation time
6. **Amounts**: `sum_insured` is coverage, `premium_at_inception` the initial premium, `gross_premium_amount` includes charges, `net_premium_amount` is after deductions
7. Never ask for more information: interpret the request and produce a working query"#;

pub const OUTPUT_FORMAT: &str = r#"## OUTPUT FORMAT
Respond with a single JSON object and nothing else:
{"sql_query": "<complete SELECT query>", "explanation": "<step-by-step breakdown>", "business_context": "<why this matters for insurance operations>"}

Only if the request has nothing to do with this database, respond instead with:
{"error_message": "<why no query can be written>", "suggestion": "<how to rephrase>"}"#;

/// Assemble the system prompt for one request.
pub fn build_system_prompt(request: &GenerationRequest, today: NaiveDate) -> String {
    let focus = if request.focus_tables.is_empty() {
        "All available tables".to_string()
    } else {
        request.focus_tables.join(", ")
    };

    let parts = [
        "You are a highly specialized SQL query generator for an enterprise insurance policy management system. Generate production-ready PostgreSQL SELECT queries that fully answer the user's question.".to_string(),
        SECURITY_RULES.to_string(),
        format!("## PRIORITY FOCUS\n**Primary Analysis Focus**: {}", focus),
        BUSINESS_ENTITIES.to_string(),
        LOOKUP_RULES.to_string(),
        QUERY_RULES.to_string(),
        format!("## DATABASE SCHEMA\n{}", request.schema.trim_end()),
        format!("## CURRENT DATE\n{}", today.format("%Y-%m-%d")),
        OUTPUT_FORMAT.to_string(),
    ];
    parts.join("\n\n")
}

/// Append the corrections collected so far to the base instructions.
pub fn amend_instructions(base: &str, corrections: &[String]) -> String {
    if corrections.is_empty() {
        return base.to_string();
    }
    let mut amended = String::from(base);
    amended.push_str("\n\n## CORRECTIONS FROM PREVIOUS ATTEMPTS\n");
    amended.push_str("Your previous answer was rejected. Fix the following before answering again:\n");
    for (i, correction) in corrections.iter().enumerate() {
        amended.push_str(&format!("{}. {}\n", i + 1, correction));
    }
    amended
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(focus: &[&str]) -> GenerationRequest {
        GenerationRequest {
            prompt: "How many active policies do we have?".to_string(),
            focus_tables: focus.iter().map(|s| s.to_string()).collect(),
            schema: "Table: policy\n  id BIGINT\n".to_string(),
        }
    }

    #[test]
    fn test_prompt_contains_focus_schema_and_date() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let prompt = build_system_prompt(&request(&["policy", "lookup_data"]), today);
        assert!(prompt.contains("ONLY SELECT STATEMENTS ALLOWED"));
        assert!(prompt.contains("**Primary Analysis Focus**: policy, lookup_data"));
        assert!(prompt.contains("Table: policy\n  id BIGINT"));
        assert!(prompt.contains("2025-03-01"));
        assert!(prompt.contains("ILIKE"));
    }

    #[test]
    fn test_empty_focus_means_all_tables() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let prompt = build_system_prompt(&request(&[]), today);
        assert!(prompt.contains("All available tables"));
    }

    #[test]
    fn test_amend_instructions() {
        assert_eq!(amend_instructions("base", &[]), "base");
        let amended = amend_instructions("base", &["first".to_string(), "second".to_string()]);
        assert!(amended.starts_with("base\n\n## CORRECTIONS"));
        assert!(amended.contains("1. first\n2. second\n"));
    }
}
