use std::sync::Arc;

use crate::level::ClassificationLevel;

/// The caller a query runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub principal_id: String,
    pub roles: Vec<String>,
}

impl Subject {
    pub fn new(principal_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            principal_id: principal_id.into(),
            roles,
        }
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        self.roles
            .iter()
            .any(|held| roles.iter().any(|r| r.eq_ignore_ascii_case(held)))
    }
}

/// Resolves which classification levels a subject may read. Called on every guard
/// invocation; implementations must not assume results are cached.
pub trait AccessChecker: Send + Sync {
    fn resolve_allowed_levels(&self, subject: &Subject) -> Vec<ClassificationLevel>;
}

impl<T: AccessChecker + ?Sized> AccessChecker for Arc<T> {
    fn resolve_allowed_levels(&self, subject: &Subject) -> Vec<ClassificationLevel> {
        (**self).resolve_allowed_levels(subject)
    }
}

/// Grants every level up to the highest one implied by the subject's roles.
#[derive(Debug, Clone, Default)]
pub struct RoleAccessChecker {
    default_level: Option<ClassificationLevel>,
}

impl RoleAccessChecker {
    pub fn new(default_level: Option<ClassificationLevel>) -> Self {
        Self { default_level }
    }

    pub fn max_level_for_roles(&self, roles: &[String]) -> Option<ClassificationLevel> {
        roles
            .iter()
            .filter_map(|role| role_level(role))
            .max()
            .or(self.default_level)
    }
}

fn role_level(role: &str) -> Option<ClassificationLevel> {
    let role = role.trim().to_ascii_uppercase();
    let bare = role.strip_prefix("ROLE_").unwrap_or(&role);
    match bare {
        "TOP_SECRET" | "CONFIDENTIAL" => Some(ClassificationLevel::TopSecret),
        "SECRET" => Some(ClassificationLevel::Secret),
        "INTERNAL" => Some(ClassificationLevel::Internal),
        "PUBLIC" => Some(ClassificationLevel::Public),
        _ => None,
    }
}

impl AccessChecker for RoleAccessChecker {
    fn resolve_allowed_levels(&self, subject: &Subject) -> Vec<ClassificationLevel> {
        self.max_level_for_roles(&subject.roles)
            .map(ClassificationLevel::permitted_up_to)
            .unwrap_or_default()
    }
}
