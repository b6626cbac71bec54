use crate::level::ClassificationLevel;

/// Builds `UPPER(TRIM(expr)) IN (...)` over every token a permitted level may be stored as.
///
/// Returns `None` for a blank expression or an empty level set. Levels are visited lowest
/// rank first; bare legacy tokens come before canonical tokens, which come before synonyms
/// and `-`/`_` spellings.
pub fn build_predicate(column_expression: &str, levels: &[ClassificationLevel]) -> Option<String> {
    let column_expression = column_expression.trim();
    if column_expression.is_empty() || levels.is_empty() {
        return None;
    }

    let mut ordered = levels.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut tokens: Vec<String> = Vec::new();
    let mut push = |token: String| {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    };

    for level in &ordered {
        push(level.legacy_token().to_string());
    }
    for level in &ordered {
        push(level.as_str().to_string());
    }
    for level in &ordered {
        let mut variants: Vec<&str> = vec![level.legacy_token(), level.as_str()];
        variants.extend_from_slice(level.synonyms());
        for variant in variants {
            push(variant.to_string());
            if variant.contains('_') {
                push(variant.replace('_', "-"));
            }
            if variant.contains('-') {
                push(variant.replace('-', "_"));
            }
        }
    }

    let list = tokens
        .iter()
        .map(|token| format!("'{}'", token.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",");

    Some(format!("UPPER(TRIM({column_expression})) IN ({list})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_expression_or_empty_levels_yield_none() {
        assert_eq!(build_predicate("  ", &[ClassificationLevel::Secret]), None);
        assert_eq!(build_predicate("`data_level`", &[]), None);
    }

    #[test]
    fn legacy_tokens_lead_and_output_is_deterministic() {
        let predicate = build_predicate(
            "`data_level`",
            &[ClassificationLevel::TopSecret, ClassificationLevel::Secret],
        )
        .expect("predicate should build");
        assert!(predicate.starts_with(
            "UPPER(TRIM(`data_level`)) IN ('SECRET','TOP_SECRET','DATA_SECRET','DATA_TOP_SECRET',"
        ));
        assert!(predicate.contains("'TOP-SECRET'"));
        assert!(predicate.contains("'CONFIDENTIAL'"));
        assert!(!predicate.contains("'PUBLIC'"));

        let reordered = build_predicate(
            "`data_level`",
            &[
                ClassificationLevel::Secret,
                ClassificationLevel::TopSecret,
                ClassificationLevel::Secret,
            ],
        )
        .expect("predicate should build");
        assert_eq!(predicate, reordered);
    }

    #[test]
    fn tokens_are_not_repeated() {
        let predicate = build_predicate("lvl", &[ClassificationLevel::Public])
            .expect("predicate should build");
        let list = predicate
            .split_once(" IN (")
            .map(|(_, rest)| rest.trim_end_matches(')'))
            .expect("in list");
        let tokens: Vec<&str> = list.split(',').collect();
        let mut deduped = tokens.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(tokens.len(), deduped.len());
        assert_eq!(tokens[0], "'PUBLIC'");
        assert_eq!(tokens[1], "'DATA_PUBLIC'");
    }
}
