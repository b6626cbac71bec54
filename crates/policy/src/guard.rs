use std::ops::Range;

use crate::access::{AccessChecker, Subject};
use crate::dataset::DatasetRef;
use crate::lexer::{Scan, TokenKind, strip_trailing_semicolons};
use crate::predicate::build_predicate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityGuardError {
    NoClassificationAccess,
    UnsupportedStatement(String),
    PredicateUnavailable,
}

impl SecurityGuardError {
    pub fn code(&self) -> &'static str {
        match self {
            SecurityGuardError::NoClassificationAccess => "ERR_CLASSIFICATION_DENIED",
            SecurityGuardError::UnsupportedStatement(_)
            | SecurityGuardError::PredicateUnavailable => "ERR_GUARD_UNSUPPORTED",
        }
    }
}

impl std::fmt::Display for SecurityGuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityGuardError::NoClassificationAccess => write!(
                f,
                "no accessible classification levels configured for the current account"
            ),
            SecurityGuardError::UnsupportedStatement(reason) => {
                write!(f, "statement cannot be classification-guarded: {}", reason)
            }
            SecurityGuardError::PredicateUnavailable => {
                write!(f, "unable to build a classification predicate for the dataset")
            }
        }
    }
}

impl std::error::Error for SecurityGuardError {}

/// Clause keywords that end a WHERE condition or a GROUP BY list.
const TRAILING_CLAUSES: &[&[&str]] = &[
    &["GROUP", "BY"],
    &["HAVING"],
    &["WINDOW"],
    &["QUALIFY"],
    &["ORDER", "BY"],
    &["SORT", "BY"],
    &["CLUSTER", "BY"],
    &["DISTRIBUTE", "BY"],
    &["LIMIT"],
    &["OFFSET"],
    &["FETCH"],
];

const SET_OPERATIONS: &[&[&str]] = &[&["UNION"], &["INTERSECT"], &["EXCEPT"], &["MINUS"]];

/// Rewrites dataset-bound queries so they only return rows the subject may see.
pub struct SqlGuard<A> {
    access: A,
}

impl<A: AccessChecker> SqlGuard<A> {
    pub fn new(access: A) -> Self {
        Self { access }
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn guard(
        &self,
        subject: &Subject,
        raw_sql: &str,
        dataset: Option<&DatasetRef>,
    ) -> Result<String, SecurityGuardError> {
        let sql = strip_trailing_semicolons(raw_sql);
        if sql.is_empty() {
            return Ok(String::new());
        }

        let Some(dataset) = dataset else {
            return Ok(sql.to_string());
        };
        let Some(quoted_column) = dataset.quoted_classification_column() else {
            tracing::debug!(
                dataset_id = %dataset.dataset_id,
                "dataset has no classification column; guard skipped"
            );
            return Ok(sql.to_string());
        };

        let levels = self.access.resolve_allowed_levels(subject);
        if levels.is_empty() {
            return Err(SecurityGuardError::NoClassificationAccess);
        }

        let predicate = build_predicate(&quoted_column, &levels)
            .ok_or(SecurityGuardError::PredicateUnavailable)?;
        let column = dataset
            .classification_column
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();

        rewrite(sql, column, &quoted_column, &predicate)
    }
}

fn unsupported(reason: &str) -> SecurityGuardError {
    SecurityGuardError::UnsupportedStatement(reason.to_string())
}

fn rewrite(
    sql: &str,
    column: &str,
    quoted_column: &str,
    predicate: &str,
) -> Result<String, SecurityGuardError> {
    let scan = Scan::new(sql);
    let tokens = scan.tokens();

    if !scan.top_level_symbols(';').is_empty() {
        return Err(unsupported("multiple statements"));
    }
    if !(scan.is_word(0, "SELECT") || scan.is_word(0, "WITH")) {
        return Err(unsupported("only SELECT queries can be guarded"));
    }
    if scan.find_any_top_level(SET_OPERATIONS, 0).is_some() {
        return Err(unsupported("set operations are not supported"));
    }

    let select = scan
        .find_top_level(&["SELECT"], 0)
        .ok_or_else(|| unsupported("missing SELECT"))?;
    let from = scan
        .find_top_level(&["FROM"], select + 1)
        .ok_or_else(|| unsupported("missing FROM"))?;
    if from == select + 1 {
        return Err(unsupported("empty projection"));
    }

    let tail = scan.find_any_top_level(TRAILING_CLAUSES, from + 1);
    let where_kw = scan.find_top_level(&["WHERE"], from + 1);
    if let (Some(where_kw), Some(tail)) = (where_kw, tail)
        && where_kw > tail
    {
        return Err(unsupported("WHERE after a trailing clause"));
    }

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();

    let projection = select + 1..from;
    let inject_column = !has_wildcard_item(&scan, projection.clone())
        && !scan.references_identifier(projection, column);
    if inject_column {
        let at = tokens[from - 1].end;
        edits.push((at..at, format!(", {}", quoted_column)));
    }

    match where_kw {
        Some(where_kw) => {
            let end = scan
                .find_any_top_level(TRAILING_CLAUSES, where_kw + 1)
                .unwrap_or(tokens.len());
            if end == where_kw + 1 {
                return Err(unsupported("empty WHERE condition"));
            }
            let cond = tokens[where_kw + 1].start..tokens[end - 1].end;
            let has_or = (where_kw + 1..end).any(|idx| scan.keyword_at(idx, &["OR"]));
            if has_or {
                let merged = format!("({}) AND {}", &sql[cond.clone()], predicate);
                edits.push((cond, merged));
            } else {
                edits.push((cond.end..cond.end, format!(" AND {}", predicate)));
            }
        }
        None => {
            let at = match tail {
                Some(tail) => tokens[tail - 1].end,
                None => tokens[tokens.len() - 1].end,
            };
            edits.push((at..at, format!(" WHERE {}", predicate)));
        }
    }

    if inject_column && let Some(group) = scan.find_top_level(&["GROUP", "BY"], from + 1) {
        let body_start = group + 2;
        let end = scan
            .find_any_top_level(&TRAILING_CLAUSES[1..], body_start)
            .unwrap_or(tokens.len());
        if end == body_start {
            return Err(unsupported("empty GROUP BY"));
        }
        if !scan.references_identifier(body_start..end, column) {
            let at = tokens[end - 1].end;
            edits.push((at..at, format!(", {}", quoted_column)));
        }
    }

    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = sql.to_string();
    for (range, text) in edits {
        out.replace_range(range, &text);
    }
    Ok(out)
}

/// True when a projection item is `*`, `t.*` or `DISTINCT *`.
fn has_wildcard_item(scan: &Scan<'_>, projection: Range<usize>) -> bool {
    let tokens = scan.tokens();
    let mut item_start = projection.start;
    for idx in projection.clone() {
        let closes_item = idx + 1 == projection.end
            || (tokens[idx + 1].depth == 0 && scan.is_symbol(idx + 1, ','));
        if tokens[idx].depth == 0 && scan.is_symbol(idx, ',') {
            item_start = idx + 1;
            continue;
        }
        if !closes_item || !scan.is_symbol(idx, '*') || tokens[idx].depth != 0 {
            continue;
        }
        if idx == item_start
            || scan.is_symbol(idx - 1, '.')
            || (tokens[idx - 1].kind == TokenKind::Word
                && (scan.is_word(idx - 1, "DISTINCT") || scan.is_word(idx - 1, "ALL")))
        {
            return true;
        }
    }
    false
}
