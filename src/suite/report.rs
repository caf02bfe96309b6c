//! Assertion ledger: every outcome a conformance run produces, aggregated per
//! (profile, requirement) for the final report.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::suite::error::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    NotSupported,
}

/// Whether a failed check stops the test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Failure aborts the remaining steps
    Assert,
    /// Failure is recorded and the test case continues
    Verify,
}

/// Repository call an assertion was measured against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationTiming {
    pub operation: String,
    pub elapsed_ms: u64,
}

/// The profile and requirement an assertion provides evidence for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Requirement {
    pub profile: &'static str,
    pub requirement: &'static str,
}

impl Requirement {
    pub const ENTITY_PROPERTY_SEARCH: Requirement = Requirement {
        profile: "entity-search",
        requirement: "entity-property-search",
    };
    pub const ENTITY_VALUE_SEARCH: Requirement = Requirement {
        profile: "entity-search",
        requirement: "entity-value-search",
    };
    pub const RELATIONSHIP_PROPERTY_SEARCH: Requirement = Requirement {
        profile: "relationship-search",
        requirement: "relationship-property-search",
    };
    pub const RELATIONSHIP_VALUE_SEARCH: Requirement = Requirement {
        profile: "relationship-search",
        requirement: "relationship-value-search",
    };
    pub const ENTITY_PROXIES: Requirement = Requirement {
        profile: "entity-proxies",
        requirement: "entity-proxy-lifecycle",
    };
    pub const REFERENCE_COPY_LIFECYCLE: Requirement = Requirement {
        profile: "reference-copies",
        requirement: "reference-copy-lifecycle",
    };
    pub const REFERENCE_COPY_LOCKING: Requirement = Requirement {
        profile: "reference-copies",
        requirement: "reference-copy-locking",
    };
    pub const RE_HOME: Requirement = Requirement {
        profile: "reference-copies",
        requirement: "re-home",
    };
    pub const METADATA_SHARING: Requirement = Requirement {
        profile: "metadata-sharing",
        requirement: "instance-maintenance",
    };
}

/// Numbered assertion ids under a fixed prefix, e.g. `repository-entity-proxy-03`
#[derive(Debug, Clone)]
pub struct AssertionIds {
    prefix: String,
    count: usize,
}

impl AssertionIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            count: 0,
        }
    }

    pub fn next(&mut self) -> String {
        self.count += 1;
        format!("{}-{:02}", self.prefix, self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionRecord {
    pub test_case: String,
    pub assertion_id: String,
    pub message: String,
    pub outcome: Outcome,
    pub severity: Severity,
    pub profile: &'static str,
    pub requirement: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<OperationTiming>,
}

/// A test case phase that stopped on an error other than a failed assertion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbortRecord {
    pub test_case: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequirementSummary {
    pub profile: &'static str,
    pub requirement: &'static str,
    pub passed: usize,
    pub failed: usize,
    pub not_supported: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConformanceReport {
    pub records: Vec<AssertionRecord>,
    pub aborts: Vec<AbortRecord>,
    #[serde(skip)]
    current_test_case: String,
}

impl ConformanceReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute subsequent records to `test_case`
    pub fn begin_test_case(&mut self, test_case: impl Into<String>) {
        self.current_test_case = test_case.into();
    }

    pub fn current_test_case(&self) -> &str {
        &self.current_test_case
    }

    /// Hard check: a failure is recorded and returned as an error so the caller
    /// can abort the remaining steps with `?`
    pub fn assert_condition(
        &mut self,
        condition: bool,
        assertion_id: &str,
        message: impl Into<String>,
        requirement: Requirement,
        timing: Option<OperationTiming>,
    ) -> Result<(), HarnessError> {
        let message = message.into();
        self.record(condition, Severity::Assert, assertion_id, message.clone(), requirement, timing);
        if condition {
            Ok(())
        } else {
            Err(HarnessError::AssertionFailed {
                assertion_id: assertion_id.to_string(),
                message,
                profile_id: requirement.profile.to_string(),
                requirement_id: requirement.requirement.to_string(),
            })
        }
    }

    /// Soft check: the outcome is recorded and returned, the test case continues
    pub fn verify_condition(
        &mut self,
        condition: bool,
        assertion_id: &str,
        message: impl Into<String>,
        requirement: Requirement,
        timing: Option<OperationTiming>,
    ) -> bool {
        self.record(condition, Severity::Verify, assertion_id, message.into(), requirement, timing);
        condition
    }

    pub fn add_not_supported(&mut self, assertion_id: &str, message: impl Into<String>, requirement: Requirement) {
        let message = message.into();
        log::info!("{}: not supported ({})", assertion_id, message);
        self.records.push(AssertionRecord {
            test_case: self.current_test_case.clone(),
            assertion_id: assertion_id.to_string(),
            message,
            outcome: Outcome::NotSupported,
            severity: Severity::Verify,
            profile: requirement.profile,
            requirement: requirement.requirement,
            timing: None,
        });
    }

    /// Note a phase that stopped early. Failed assertions are already in the
    /// ledger and are not recorded twice.
    pub fn record_abort(&mut self, error: &HarnessError) {
        if error.is_assertion() {
            return;
        }
        self.aborts.push(AbortRecord {
            test_case: self.current_test_case.clone(),
            error: error.to_string(),
        });
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.records.iter().filter(|record| record.outcome == outcome).count()
    }

    pub fn all_passed(&self) -> bool {
        self.count(Outcome::Failed) == 0 && self.aborts.is_empty()
    }

    pub fn by_requirement(&self) -> Vec<RequirementSummary> {
        let mut summaries: BTreeMap<(&'static str, &'static str), RequirementSummary> = BTreeMap::new();
        for record in &self.records {
            let summary = summaries
                .entry((record.profile, record.requirement))
                .or_insert_with(|| RequirementSummary {
                    profile: record.profile,
                    requirement: record.requirement,
                    ..RequirementSummary::default()
                });
            match record.outcome {
                Outcome::Passed => summary.passed += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::NotSupported => summary.not_supported += 1,
            }
        }
        summaries.into_values().collect()
    }

    /// The report as JSON, with the per-requirement summary alongside the records
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "passed": self.count(Outcome::Passed),
            "failed": self.count(Outcome::Failed),
            "not_supported": self.count(Outcome::NotSupported),
            "aborted": self.aborts.len(),
            "requirements": self.by_requirement(),
            "records": self.records,
            "aborts": self.aborts,
        })
    }

    fn record(
        &mut self,
        condition: bool,
        severity: Severity,
        assertion_id: &str,
        message: String,
        requirement: Requirement,
        timing: Option<OperationTiming>,
    ) {
        let outcome = if condition { Outcome::Passed } else { Outcome::Failed };
        if !condition {
            log::warn!("{} failed: {}", assertion_id, message);
        }
        self.records.push(AssertionRecord {
            test_case: self.current_test_case.clone(),
            assertion_id: assertion_id.to_string(),
            message,
            outcome,
            severity,
            profile: requirement.profile,
            requirement: requirement.requirement,
            timing,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_failure_is_recorded_and_returned() {
        let mut report = ConformanceReport::new();
        report.begin_test_case("search-Asset");
        assert!(report
            .assert_condition(true, "search-01", "size", Requirement::ENTITY_PROPERTY_SEARCH, None)
            .is_ok());
        let err = report
            .assert_condition(false, "search-02", "content", Requirement::ENTITY_PROPERTY_SEARCH, None)
            .unwrap_err();

        assert!(err.is_assertion());
        assert_eq!(report.count(Outcome::Passed), 1);
        assert_eq!(report.count(Outcome::Failed), 1);
        assert_eq!(report.records[1].test_case, "search-Asset");
        assert!(!report.all_passed());
    }

    #[test]
    fn test_aggregates_per_requirement() {
        let mut report = ConformanceReport::new();
        report.verify_condition(true, "a", "ok", Requirement::ENTITY_PROXIES, None);
        report.verify_condition(false, "b", "bad", Requirement::ENTITY_PROXIES, None);
        report.add_not_supported("c", "no proxies", Requirement::ENTITY_PROXIES);
        report.verify_condition(true, "d", "ok", Requirement::RE_HOME, None);

        let summaries = report.by_requirement();
        assert_eq!(summaries.len(), 2);
        let proxies = summaries
            .iter()
            .find(|summary| summary.profile == "entity-proxies")
            .unwrap();
        assert_eq!((proxies.passed, proxies.failed, proxies.not_supported), (1, 1, 1));
    }

    #[test]
    fn test_assertion_ids_are_numbered() {
        let mut ids = AssertionIds::new("repository-entity-proxy");
        assert_eq!(ids.next(), "repository-entity-proxy-01");
        assert_eq!(ids.next(), "repository-entity-proxy-02");
    }

    #[test]
    fn test_not_supported_is_not_a_failure() {
        let mut report = ConformanceReport::new();
        report.add_not_supported("proxy-01", "addEntityProxy", Requirement::ENTITY_PROXIES);
        assert!(report.all_passed());
        assert_eq!(report.to_json()["not_supported"], 1);
    }

    #[test]
    fn test_abort_is_a_failure_but_assertions_are_not_duplicated() {
        let mut report = ConformanceReport::new();
        let assertion = report
            .assert_condition(false, "x", "y", Requirement::RE_HOME, None)
            .unwrap_err();
        report.record_abort(&assertion);
        assert!(report.aborts.is_empty());

        report.record_abort(&HarnessError::Workpad("missing set".into()));
        assert_eq!(report.aborts.len(), 1);
        assert!(!report.all_passed());
    }
}
