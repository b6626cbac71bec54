use sqlgate_contracts::{LimitInfo, Violation, ViolationCode};

use crate::lexer::{Scan, TokenKind, strip_trailing_semicolons};

const WRITE_KEYWORDS: [&str; 10] = [
    "delete", "update", "insert", "drop", "truncate", "alter", "create", "merge", "grant",
    "revoke",
];

/// Statements a `WITH` block may wrap to modify data.
const CTE_WRITE_KEYWORDS: [&str; 4] = ["INSERT", "UPDATE", "DELETE", "MERGE"];

/// Row-returning statement forms that accept a trailing LIMIT.
const LIMITABLE_STATEMENTS: [&str; 4] = ["SELECT", "WITH", "TABLE", "VALUES"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorPolicy {
    pub default_limit: u64,
    pub max_limit: u64,
    pub policy_id: String,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            default_limit: 1000,
            max_limit: 10_000,
            policy_id: "default-row-limit".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub executable: bool,
    pub rewritten_sql: String,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub limit_info: Option<LimitInfo>,
    /// Leading statement keyword, uppercased (`SELECT`, `WITH`, `DELETE`, ...).
    pub statement: Option<String>,
}

impl ValidationReport {
    pub fn summary(&self) -> String {
        if !self.executable {
            let codes = self
                .violations
                .iter()
                .filter(|v| v.blocking)
                .map(|v| v.code.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return format!("blocked: {}", codes);
        }
        match self.warnings.len() {
            0 => "ok".to_string(),
            1 => "ok with 1 warning".to_string(),
            n => format!("ok with {} warnings", n),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    policy: ValidatorPolicy,
}

impl SqlValidator {
    pub fn new(policy: ValidatorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidatorPolicy {
        &self.policy
    }

    pub fn validate(&self, sql: &str) -> ValidationReport {
        let trimmed = strip_trailing_semicolons(sql);
        let mut report = ValidationReport {
            executable: true,
            rewritten_sql: trimmed.to_string(),
            violations: Vec::new(),
            warnings: Vec::new(),
            limit_info: None,
            statement: None,
        };

        if trimmed.is_empty() {
            report.violations.push(Violation {
                code: ViolationCode::EmptySql,
                message: "SQL text is empty".to_string(),
                blocking: true,
            });
            report.executable = false;
            return report;
        }

        let scan = Scan::new(trimmed);
        let lead = leading_keyword_index(&scan);
        let statement = scan
            .tokens()
            .get(lead)
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| scan.text(t).to_ascii_uppercase());
        report.statement = statement.clone();

        if let Some(keyword) = effective_write_keyword(&scan, lead) {
            report.violations.push(Violation {
                code: ViolationCode::WriteBlocked,
                message: format!("write statements are not allowed: {}", keyword),
                blocking: true,
            });
        }

        if !scan.top_level_symbols(';').is_empty() {
            report.violations.push(Violation {
                code: ViolationCode::MultiStatement,
                message: "only a single statement may be submitted".to_string(),
                blocking: true,
            });
        }

        report.executable = !report.violations.iter().any(|v| v.blocking);
        if !report.executable {
            return report;
        }

        if statement
            .as_deref()
            .is_some_and(|s| LIMITABLE_STATEMENTS.contains(&s))
        {
            self.enforce_limit(&scan, &mut report);
        }

        report
    }

    fn enforce_limit(&self, scan: &Scan<'_>, report: &mut ValidationReport) {
        let sql = scan.sql();
        let tokens = scan.tokens();
        let policy = &self.policy;

        let limits: Vec<usize> = (0..tokens.len())
            .filter(|&idx| scan.keyword_at(idx, &["LIMIT"]))
            .collect();

        let Some(&limit_kw) = limits.last() else {
            // Row-lock clauses must follow LIMIT.
            let at = scan
                .find_any_top_level(
                    &[
                        &["FOR", "UPDATE"],
                        &["FOR", "SHARE"],
                        &["FOR", "NO"],
                        &["FOR", "KEY"],
                    ],
                    1,
                )
                .map(|idx| tokens[idx - 1].end)
                .or_else(|| tokens.last().map(|t| t.end))
                .unwrap_or(sql.len());
            let mut rewritten = sql.to_string();
            rewritten.insert_str(at, &format!(" LIMIT {}", policy.default_limit));
            report.rewritten_sql = rewritten;
            report.warnings.push(format!(
                "no LIMIT clause; applied default LIMIT {}",
                policy.default_limit
            ));
            report.limit_info = Some(LimitInfo {
                applied: true,
                limit: policy.default_limit,
                requested: None,
                policy_id: policy.policy_id.clone(),
            });
            return;
        };

        // `LIMIT offset, count` keeps the row count in the second position.
        let mut value_idx = limit_kw + 1;
        if scan.is_symbol(value_idx + 1, ',') && value_idx + 2 < tokens.len() {
            value_idx += 2;
        }
        if value_idx >= tokens.len() {
            report
                .warnings
                .push("LIMIT clause has no value".to_string());
            return;
        }
        let clause_end = scan
            .find_any_top_level(&[&["OFFSET"], &["FETCH"], &["FOR"]], value_idx + 1)
            .unwrap_or(tokens.len());
        let value_span = tokens[value_idx].start..tokens[clause_end - 1].end;
        let raw_value = &sql[value_span.clone()];

        // Digits that overflow u64 are over any ceiling; anything else (ALL, expressions,
        // parameters) cannot be checked and is replaced by the ceiling.
        let is_count = raw_value.bytes().all(|b| b.is_ascii_digit());
        let requested = if is_count {
            raw_value.parse::<u64>().ok()
        } else {
            None
        };

        if let Some(n) = requested.filter(|n| *n <= policy.max_limit) {
            report.limit_info = Some(LimitInfo {
                applied: false,
                limit: n,
                requested: Some(n),
                policy_id: policy.policy_id.clone(),
            });
            return;
        }

        let mut rewritten = sql.to_string();
        rewritten.replace_range(value_span, &policy.max_limit.to_string());
        report.rewritten_sql = rewritten;
        report.warnings.push(if is_count || raw_value.eq_ignore_ascii_case("ALL") {
            format!(
                "LIMIT {} exceeds the maximum of {}; clamped",
                raw_value, policy.max_limit
            )
        } else {
            format!(
                "LIMIT `{}` cannot be checked; replaced with the maximum of {}",
                raw_value, policy.max_limit
            )
        });
        report.limit_info = Some(LimitInfo {
            applied: true,
            limit: policy.max_limit,
            requested,
            policy_id: policy.policy_id.clone(),
        });
    }
}

/// Index of the first token after any opening parentheses.
fn leading_keyword_index(scan: &Scan<'_>) -> usize {
    (0..scan.tokens().len())
        .find(|&idx| !scan.is_symbol(idx, '('))
        .unwrap_or(scan.tokens().len())
}

/// The write keyword that decides the statement. Under a leading `WITH`, a data-modifying
/// statement anywhere in the block counts; `FOR UPDATE` row locks do not.
fn effective_write_keyword(scan: &Scan<'_>, lead: usize) -> Option<String> {
    let tokens = scan.tokens();
    let first = tokens.get(lead).filter(|t| t.kind == TokenKind::Word)?;
    let leading = scan.text(first).to_ascii_lowercase();
    if WRITE_KEYWORDS.contains(&leading.as_str()) {
        return Some(leading.to_ascii_uppercase());
    }
    if leading != "with" {
        return None;
    }
    (lead + 1..tokens.len()).find_map(|idx| {
        if tokens[idx].kind != TokenKind::Word {
            return None;
        }
        let word = scan.text(&tokens[idx]).to_ascii_uppercase();
        let row_lock = scan.is_word(idx - 1, "FOR") || scan.is_word(idx - 1, "KEY");
        (CTE_WRITE_KEYWORDS.contains(&word.as_str()) && !row_lock).then_some(word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        SqlValidator::default()
    }

    #[test]
    fn select_without_limit_gets_the_default() {
        let report = validator().validate("select * from orders");
        assert!(report.executable);
        assert!(
            report
                .rewritten_sql
                .to_ascii_lowercase()
                .contains("limit 1000")
        );
        assert!(!report.warnings.is_empty());
        let info = report.limit_info.as_ref().expect("limit info");
        assert!(info.applied);
        assert_eq!(info.limit, 1000);
        assert_eq!(info.requested, None);
        assert_eq!(report.summary(), "ok with 1 warning");
    }

    #[test]
    fn delete_is_blocked() {
        let report = validator().validate("delete from orders");
        assert!(!report.executable);
        assert!(
            report
                .violations
                .iter()
                .any(|v| v.code == ViolationCode::WriteBlocked && v.blocking)
        );
        assert_eq!(report.rewritten_sql, "delete from orders");
        assert_eq!(report.summary(), "blocked: WRITE_BLOCKED");
    }

    #[test]
    fn every_write_keyword_is_blocked_case_insensitively() {
        for keyword in WRITE_KEYWORDS {
            let sql = format!("  {} something", keyword.to_ascii_uppercase());
            assert!(!validator().validate(&sql).executable, "{sql}");
        }
        let cte_write =
            validator().validate("WITH old AS (SELECT id FROM t) DELETE FROM t WHERE id IN (SELECT id FROM old)");
        assert!(!cte_write.executable);
    }

    #[test]
    fn blank_sql_is_blocked() {
        let report = validator().validate("  ;; ");
        assert!(!report.executable);
        assert_eq!(report.violations[0].code, ViolationCode::EmptySql);
    }

    #[test]
    fn stacked_statements_are_blocked() {
        let report = validator().validate("select 1; drop table orders");
        assert!(!report.executable);
        let codes: Vec<_> = report.violations.iter().map(|v| v.code).collect();
        assert_eq!(codes, vec![ViolationCode::MultiStatement]);
        assert!(validator().validate("select ';' as semi;").executable);
    }

    #[test]
    fn explicit_limit_within_ceiling_is_kept() {
        let report = validator().validate("SELECT id FROM t ORDER BY id LIMIT 50;");
        assert_eq!(report.rewritten_sql, "SELECT id FROM t ORDER BY id LIMIT 50");
        assert!(report.warnings.is_empty());
        let info = report.limit_info.expect("limit info");
        assert!(!info.applied);
        assert_eq!(info.requested, Some(50));
    }

    #[test]
    fn oversized_limit_is_clamped() {
        let report = validator().validate("SELECT id FROM t LIMIT 10, 50000");
        assert_eq!(report.rewritten_sql, "SELECT id FROM t LIMIT 10, 10000");
        let info = report.limit_info.expect("limit info");
        assert!(info.applied);
        assert_eq!(info.requested, Some(50_000));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn nested_limit_does_not_count_for_the_outer_query() {
        let report = validator().validate("SELECT * FROM (SELECT id FROM t LIMIT 5) x -- tail");
        assert_eq!(
            report.rewritten_sql,
            "SELECT * FROM (SELECT id FROM t LIMIT 5) x LIMIT 1000 -- tail"
        );
    }

    #[test]
    fn non_query_reads_are_untouched() {
        let report = validator().validate("SHOW TABLES");
        assert!(report.executable);
        assert_eq!(report.rewritten_sql, "SHOW TABLES");
        assert!(report.limit_info.is_none());
    }

    #[test]
    fn data_modifying_cte_is_blocked() {
        let sql = "WITH gone AS (DELETE FROM orders RETURNING *) SELECT * FROM gone";
        let report = validator().validate(sql);
        assert!(!report.executable);
        assert_eq!(report.violations[0].code, ViolationCode::WriteBlocked);
        assert_eq!(report.rewritten_sql, sql);

        let locking =
            validator().validate("WITH o AS (SELECT id FROM orders) SELECT * FROM o FOR UPDATE");
        assert!(locking.executable);
        assert_eq!(
            locking.rewritten_sql,
            "WITH o AS (SELECT id FROM orders) SELECT * FROM o LIMIT 1000 FOR UPDATE"
        );
    }

    #[test]
    fn overflowing_limit_is_clamped() {
        let report = validator().validate("SELECT id FROM t LIMIT 99999999999999999999");
        assert_eq!(report.rewritten_sql, "SELECT id FROM t LIMIT 10000");
        let info = report.limit_info.expect("limit info");
        assert!(info.applied);
        assert_eq!(info.limit, 10_000);
        assert_eq!(info.requested, None);
    }

    #[test]
    fn unverifiable_limit_expression_is_replaced() {
        let report = validator().validate("SELECT id FROM t LIMIT (50000) OFFSET 5");
        assert!(report.executable);
        assert_eq!(report.rewritten_sql, "SELECT id FROM t LIMIT 10000 OFFSET 5");
        assert!(report.limit_info.as_ref().is_some_and(|l| l.applied));

        let report = validator().validate("SELECT id FROM t LIMIT 1e9");
        assert_eq!(report.rewritten_sql, "SELECT id FROM t LIMIT 10000");
    }

    #[test]
    fn parenthesized_and_table_queries_get_the_default_limit() {
        let report = validator().validate("(SELECT id FROM t)");
        assert_eq!(report.rewritten_sql, "(SELECT id FROM t) LIMIT 1000");
        assert_eq!(report.statement.as_deref(), Some("SELECT"));

        let report = validator().validate("TABLE t");
        assert_eq!(report.rewritten_sql, "TABLE t LIMIT 1000");
        assert!(report.limit_info.is_some_and(|l| l.applied));
    }
}
