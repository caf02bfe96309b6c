use std::collections::BTreeMap;

use crate::store::RepositoryError;
use crate::suite::phase::TestPhase;

/// An unexpected repository failure with the context needed to diagnose it
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{operation} failed while {description}: {source}")]
pub struct OperationFault {
    pub operation: String,
    pub description: String,
    pub parameters: BTreeMap<String, String>,
    pub source: RepositoryError,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    OperationFault(#[from] OperationFault),
    #[error("assertion {assertion_id} failed: {message} [{profile_id} / {requirement_id}]")]
    AssertionFailed {
        assertion_id: String,
        message: String,
        profile_id: String,
        requirement_id: String,
    },
    #[error("test case {test_case} cannot enter {phase} after {from}")]
    PhaseOrder {
        test_case: String,
        phase: TestPhase,
        from: String,
    },
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("workpad: {0}")]
    Workpad(String),
    #[error("cannot serialise instance: {0}")]
    Serialization(String),
    #[error("configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::Serialization(e.to_string())
    }
}

impl HarnessError {
    pub fn is_assertion(&self) -> bool {
        matches!(self, HarnessError::AssertionFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_failures_abort_rather_than_fail() {
        let e = serde_json::from_str::<u32>("not a number").unwrap_err();
        let error = HarnessError::from(e);
        assert!(matches!(error, HarnessError::Serialization(_)));
        assert!(!error.is_assertion());
        assert!(error.to_string().starts_with("cannot serialise instance"));
    }
}
