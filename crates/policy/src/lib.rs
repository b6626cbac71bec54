pub mod access;
pub mod dataset;
pub mod guard;
pub mod level;
pub mod lexer;
pub mod predicate;
pub mod projection;
pub mod validator;

pub use access::{AccessChecker, RoleAccessChecker, Subject};
pub use dataset::{
    CLASSIFICATION_COLUMN_CANDIDATES, DatasetMetadataResolver, DatasetRef, SqlDialect,
    resolve_classification_column,
};
pub use guard::{SecurityGuardError, SqlGuard};
pub use level::{ALL_LEVELS, ClassificationLevel, compare};
pub use predicate::build_predicate;
pub use projection::projection_columns;
pub use validator::{SqlValidator, ValidationReport, ValidatorPolicy};
