//! Failure classification
//!
//! Maps backend-specific failure signals onto the classes the retry engine
//! acts on.

use serde::{Deserialize, Serialize};

use crate::resource::OperationError;

/// How the retry engine treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Resource unreachable or broken; retried, and the resource is discarded
    /// without rollback
    Connection,

    /// Serialization failure, deadlock or other forced rollback; retried
    Rollback,

    /// Unique-constraint violation; retried since a new attempt draws new keys
    UniqueViolation,

    /// Retrying cannot help
    NonTransient,

    /// The pool is shutting down
    Cancelled,
}

impl FailureClass {
    /// Whether a new attempt may succeed
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Connection | Self::Rollback | Self::UniqueViolation
        )
    }

    /// Whether the resource must be discarded without rollback
    pub fn is_connection(self) -> bool {
        self == Self::Connection
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Rollback => write!(f, "rollback"),
            Self::UniqueViolation => write!(f, "unique_violation"),
            Self::NonTransient => write!(f, "non_transient"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Decides the [`FailureClass`] of an error
///
/// Any `Fn(&OperationError) -> FailureClass` is a classifier.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, error: &OperationError) -> FailureClass;
}

impl<F> FailureClassifier for F
where
    F: Fn(&OperationError) -> FailureClass + Send + Sync,
{
    fn classify(&self, error: &OperationError) -> FailureClass {
        self(error)
    }
}

/// Classifier for SQL backends keyed on SQLSTATE
///
/// | SQLSTATE       | Class            |
/// |----------------|------------------|
/// | `08xxx`        | connection       |
/// | `40xxx`        | rollback         |
/// | `23505`        | unique violation |
/// | `57P01..57P03` | connection       |
/// | anything else  | non-transient    |
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlStateClassifier;

impl SqlStateClassifier {
    pub const UNIQUE_VIOLATION: &'static str = "23505";

    fn classify_code(code: &str) -> FailureClass {
        if code.starts_with("08") {
            return FailureClass::Connection;
        }
        if code.starts_with("40") {
            return FailureClass::Rollback;
        }
        // admin shutdown, crash shutdown, cannot connect now
        if matches!(code, "57P01" | "57P02" | "57P03") {
            return FailureClass::Connection;
        }
        if code == Self::UNIQUE_VIOLATION {
            return FailureClass::UniqueViolation;
        }
        FailureClass::NonTransient
    }
}

impl FailureClassifier for SqlStateClassifier {
    fn classify(&self, error: &OperationError) -> FailureClass {
        match error {
            OperationError::Connection(_) => FailureClass::Connection,
            OperationError::Cancelled => FailureClass::Cancelled,
            OperationError::Backend { code, .. } => Self::classify_code(code),
            OperationError::Fatal(_) | OperationError::Other(_) => FailureClass::NonTransient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classes() {
        let c = SqlStateClassifier;
        let class = |code: &str| c.classify(&OperationError::backend(code, "x"));

        assert_eq!(class("08006"), FailureClass::Connection);
        assert_eq!(class("08001"), FailureClass::Connection);
        assert_eq!(class("40001"), FailureClass::Rollback);
        assert_eq!(class("40P01"), FailureClass::Rollback);
        assert_eq!(class("23505"), FailureClass::UniqueViolation);
        assert_eq!(class("57P01"), FailureClass::Connection);
        assert_eq!(class("23503"), FailureClass::NonTransient);
        assert_eq!(class("42601"), FailureClass::NonTransient);
        assert_eq!(class(""), FailureClass::NonTransient);
    }

    #[test]
    fn test_error_variants() {
        let c = SqlStateClassifier;
        assert_eq!(
            c.classify(&OperationError::Connection("reset".into())),
            FailureClass::Connection
        );
        assert_eq!(c.classify(&OperationError::Cancelled), FailureClass::Cancelled);
        assert_eq!(
            c.classify(&OperationError::Other(anyhow::anyhow!("boom"))),
            FailureClass::NonTransient
        );
    }

    #[test]
    fn test_transience() {
        assert!(FailureClass::Connection.is_transient());
        assert!(FailureClass::Rollback.is_transient());
        assert!(FailureClass::UniqueViolation.is_transient());
        assert!(!FailureClass::NonTransient.is_transient());
        assert!(!FailureClass::Cancelled.is_transient());
        assert!(FailureClass::Connection.is_connection());
        assert!(!FailureClass::Rollback.is_connection());
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |e: &OperationError| {
            if e.to_string().contains("refused") {
                FailureClass::Connection
            } else {
                FailureClass::NonTransient
            }
        };
        let err = OperationError::Other(anyhow::anyhow!("connection refused"));
        assert_eq!(classifier.classify(&err), FailureClass::Connection);
    }
}
