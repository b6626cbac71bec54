use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Sensitivity tiers, ordered from least to most restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassificationLevel {
    #[serde(rename = "DATA_PUBLIC")]
    Public,
    #[serde(rename = "DATA_INTERNAL")]
    Internal,
    #[serde(rename = "DATA_SECRET")]
    Secret,
    #[serde(rename = "DATA_TOP_SECRET")]
    TopSecret,
}

pub const ALL_LEVELS: [ClassificationLevel; 4] = [
    ClassificationLevel::Public,
    ClassificationLevel::Internal,
    ClassificationLevel::Secret,
    ClassificationLevel::TopSecret,
];

impl ClassificationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassificationLevel::Public => "DATA_PUBLIC",
            ClassificationLevel::Internal => "DATA_INTERNAL",
            ClassificationLevel::Secret => "DATA_SECRET",
            ClassificationLevel::TopSecret => "DATA_TOP_SECRET",
        }
    }

    /// Bare token used by older tables, e.g. `SECRET` for `DATA_SECRET`.
    pub fn legacy_token(self) -> &'static str {
        match self {
            ClassificationLevel::Public => "PUBLIC",
            ClassificationLevel::Internal => "INTERNAL",
            ClassificationLevel::Secret => "SECRET",
            ClassificationLevel::TopSecret => "TOP_SECRET",
        }
    }

    /// Extra values seen in classification columns that mean the same tier.
    pub fn synonyms(self) -> &'static [&'static str] {
        match self {
            ClassificationLevel::Public => &["NON_SECRET"],
            ClassificationLevel::Internal => &["GENERAL"],
            ClassificationLevel::Secret => &[],
            ClassificationLevel::TopSecret => &["CONFIDENTIAL", "DATA_CONFIDENTIAL"],
        }
    }

    pub fn rank(self) -> u8 {
        match self {
            ClassificationLevel::Public => 0,
            ClassificationLevel::Internal => 1,
            ClassificationLevel::Secret => 2,
            ClassificationLevel::TopSecret => 3,
        }
    }

    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let canonical = trimmed.to_ascii_uppercase().replace(['-', ' '], "_");
        ALL_LEVELS.into_iter().find(|level| {
            level.as_str() == canonical
                || level.legacy_token() == canonical
                || level.synonyms().contains(&canonical.as_str())
        })
    }

    /// Every level at or below `max`, lowest first.
    pub fn permitted_up_to(max: ClassificationLevel) -> Vec<ClassificationLevel> {
        ALL_LEVELS
            .into_iter()
            .filter(|level| level.rank() <= max.rank())
            .collect()
    }
}

impl std::fmt::Display for ClassificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for ClassificationLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClassificationLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Orders two possibly-unknown levels; an absent level sorts lowest.
pub fn compare(a: Option<ClassificationLevel>, b: Option<ClassificationLevel>) -> Ordering {
    a.cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_canonical_legacy_and_synonym_forms() {
        assert_eq!(
            ClassificationLevel::normalize(" data_secret "),
            Some(ClassificationLevel::Secret)
        );
        assert_eq!(
            ClassificationLevel::normalize("top-secret"),
            Some(ClassificationLevel::TopSecret)
        );
        assert_eq!(
            ClassificationLevel::normalize("Top Secret"),
            Some(ClassificationLevel::TopSecret)
        );
        assert_eq!(
            ClassificationLevel::normalize("confidential"),
            Some(ClassificationLevel::TopSecret)
        );
        assert_eq!(
            ClassificationLevel::normalize("non-secret"),
            Some(ClassificationLevel::Public)
        );
        assert_eq!(
            ClassificationLevel::normalize("general"),
            Some(ClassificationLevel::Internal)
        );
        assert_eq!(ClassificationLevel::normalize("restricted"), None);
        assert_eq!(ClassificationLevel::normalize("   "), None);
    }

    #[test]
    fn normalize_is_idempotent_through_display() {
        for level in ALL_LEVELS {
            let once = ClassificationLevel::normalize(level.as_str()).expect("canonical token");
            let twice = ClassificationLevel::normalize(&once.to_string()).expect("display token");
            assert_eq!(once, level);
            assert_eq!(twice, once);
            assert_eq!(
                ClassificationLevel::normalize(level.legacy_token()),
                Some(level)
            );
        }
    }

    #[test]
    fn compare_follows_rank_and_absent_sorts_lowest() {
        for a in ALL_LEVELS {
            for b in ALL_LEVELS {
                assert_eq!(compare(Some(a), Some(b)), a.rank().cmp(&b.rank()));
            }
            assert_eq!(compare(None, Some(a)), Ordering::Less);
            assert_eq!(compare(Some(a), None), Ordering::Greater);
        }
        assert_eq!(compare(None, None), Ordering::Equal);
    }

    #[test]
    fn permitted_up_to_includes_every_lower_tier() {
        assert_eq!(
            ClassificationLevel::permitted_up_to(ClassificationLevel::Internal),
            vec![ClassificationLevel::Public, ClassificationLevel::Internal]
        );
        assert_eq!(
            ClassificationLevel::permitted_up_to(ClassificationLevel::TopSecret).len(),
            4
        );
    }

    #[test]
    fn serde_uses_canonical_tokens() {
        let encoded =
            serde_json::to_value(ClassificationLevel::TopSecret).expect("level should serialize");
        assert_eq!(encoded, serde_json::json!("DATA_TOP_SECRET"));
    }
}
