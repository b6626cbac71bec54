use hex::ToHex;
use sha2::Digest;
use unicode_normalization::UnicodeNormalization;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(bytes);
    hasher.finalize().encode_hex::<String>()
}

/// NFC-normalizes the text and collapses every whitespace run to a single space.
///
/// Runs inside string literals are collapsed too, so `'a  b'` and `'a b'` canonicalize
/// alike. The result identifies a query for correlation only; it is never executed.
pub fn canonicalize_sql_text(input: &str) -> String {
    let normalized = input.nfc().collect::<String>();
    let mut out = String::with_capacity(normalized.len());
    for word in normalized.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

pub fn query_hash(sql: &str) -> String {
    sha256_hex(canonicalize_sql_text(sql).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_sha256_hex(s: &str) -> bool {
        s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    #[test]
    fn sql_text_collapses_whitespace_and_normalizes_unicode() {
        let input = "  SELECT\r\n  id,\tname\n FROM  t WHERE note = 'e\u{0301}'  ";
        assert_eq!(
            canonicalize_sql_text(input),
            "SELECT id, name FROM t WHERE note = '\u{00e9}'"
        );
    }

    #[test]
    fn query_hash_ignores_layout_differences() {
        let a = query_hash("SELECT id FROM orders");
        let b = query_hash("SELECT   id\nFROM orders\n");
        assert_eq!(a, b);
        assert!(is_sha256_hex(&a));
        assert_ne!(a, query_hash("SELECT id FROM customers"));
    }

    #[test]
    fn sha256_hex_is_lowercase_and_valid() {
        let h = sha256_hex(b"abc");
        assert!(is_sha256_hex(&h));
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn whitespace_inside_literals_is_collapsed() {
        assert_eq!(
            canonicalize_sql_text("SELECT 'a  b'"),
            canonicalize_sql_text("SELECT 'a b'")
        );
    }
}
