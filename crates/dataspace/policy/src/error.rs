use thiserror::Error;

/// Errors raised while building or validating a usage policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("rule {rule} has an empty target")]
    EmptyTarget { rule: usize },

    #[error("rule {rule} has an empty {predicate} predicate")]
    EmptyPredicate { rule: usize, predicate: &'static str },

    #[error("rule {rule} carries an empty custom duty")]
    EmptyDuty { rule: usize },

    #[error("rule {rule} has a validity window that ends before it starts")]
    EmptyValidityWindow { rule: usize },
}
