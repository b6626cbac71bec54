use crate::lexer::{Scan, TokenKind, strip_trailing_semicolons};

/// Output column labels of the outermost SELECT, in order.
///
/// Aliases win over expressions; a plain or dotted column reference yields its last segment
/// and anything else is labelled with its trimmed source text. Returns an empty list when the
/// statement has no recognizable projection.
pub fn projection_columns(sql: &str) -> Vec<String> {
    let sql = strip_trailing_semicolons(sql);
    let scan = Scan::new(sql);

    let Some(select) = scan.find_top_level(&["SELECT"], 0) else {
        return Vec::new();
    };
    let end = scan
        .find_top_level(&["FROM"], select + 1)
        .unwrap_or(scan.tokens().len());

    let mut start = select + 1;
    if start < end && (scan.is_word(start, "DISTINCT") || scan.is_word(start, "ALL")) {
        start += 1;
    }
    if start >= end {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut item_start = start;
    for idx in start..end {
        if scan.tokens()[idx].depth == 0 && scan.is_symbol(idx, ',') {
            items.push(item_start..idx);
            item_start = idx + 1;
        }
    }
    items.push(item_start..end);

    items
        .into_iter()
        .filter(|range| !range.is_empty())
        .map(|range| item_label(&scan, range))
        .collect()
}

fn item_label(scan: &Scan<'_>, range: std::ops::Range<usize>) -> String {
    let tokens = scan.tokens();
    let last = range.end - 1;
    let is_ident = |idx: usize| {
        matches!(
            tokens[idx].kind,
            TokenKind::Word | TokenKind::QuotedIdent
        )
    };

    if range.len() >= 2 && is_ident(last) && !scan.is_word(last, "END") {
        let prev = last - 1;
        let aliased = scan.is_word(prev, "AS")
            || is_ident(prev)
            || (scan.is_symbol(prev, ')') && tokens[prev].depth == 0);
        let dotted = scan.is_symbol(prev, '.') && is_dotted_path(scan, range.clone());
        if (aliased || dotted)
            && let Some(label) = scan.identifier(&tokens[last])
        {
            return label;
        }
    }

    if range.len() == 1
        && is_ident(last)
        && let Some(label) = scan.identifier(&tokens[last])
    {
        return label;
    }

    scan.sql()[tokens[range.start].start..tokens[last].end].to_string()
}

fn is_dotted_path(scan: &Scan<'_>, range: std::ops::Range<usize>) -> bool {
    range.enumerate().all(|(offset, idx)| {
        if offset % 2 == 0 {
            matches!(
                scan.tokens()[idx].kind,
                TokenKind::Word | TokenKind::QuotedIdent
            )
        } else {
            scan.is_symbol(idx, '.')
        }
    })
}
