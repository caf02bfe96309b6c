use serde::Serialize;
use std::fmt;

use crate::suite::error::HarnessError;
use crate::suite::workpad::Workpad;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestPhase {
    /// Gather what the test case needs from the workpad before touching a repository
    Seed,
    Create,
    Execute,
    /// Remove everything the test case created; always allowed
    Clean,
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TestPhase::Seed => "SEED",
            TestPhase::Create => "CREATE",
            TestPhase::Execute => "EXECUTE",
            TestPhase::Clean => "CLEAN",
        };
        f.write_str(label)
    }
}

/// A conformance test case driven one phase at a time
#[async_trait::async_trait]
pub trait ConformanceTestCase: Send {
    fn test_case_id(&self) -> &str;

    async fn run(&mut self, phase: TestPhase, workpad: &mut Workpad) -> Result<(), HarnessError>;
}

/// Enforces SEED -> CREATE -> EXECUTE ordering; CLEAN may follow any phase
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    /// Most recently entered phase
    current: Option<TestPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, test_case: &str, phase: TestPhase) -> Result<(), HarnessError> {
        let allowed = match phase {
            TestPhase::Seed => self.current.is_none(),
            TestPhase::Create => self.current == Some(TestPhase::Seed),
            TestPhase::Execute => self.current == Some(TestPhase::Create),
            TestPhase::Clean => true,
        };
        if !allowed {
            return Err(HarnessError::PhaseOrder {
                test_case: test_case.to_string(),
                phase,
                from: self
                    .current
                    .map(|current| current.to_string())
                    .unwrap_or_else(|| "start".to_string()),
            });
        }
        log::info!("{}: {}", test_case, phase);
        self.current = Some(phase);
        Ok(())
    }

    pub fn current(&self) -> Option<TestPhase> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_run_in_order() {
        let mut tracker = PhaseTracker::new();
        assert!(tracker.enter("case", TestPhase::Create).is_err());
        tracker.enter("case", TestPhase::Seed).unwrap();
        tracker.enter("case", TestPhase::Create).unwrap();
        assert!(matches!(
            tracker.enter("case", TestPhase::Seed),
            Err(HarnessError::PhaseOrder { .. })
        ));
        tracker.enter("case", TestPhase::Execute).unwrap();
        tracker.enter("case", TestPhase::Clean).unwrap();
        assert_eq!(tracker.current(), Some(TestPhase::Clean));
    }

    #[test]
    fn test_clean_is_always_allowed() {
        let mut tracker = PhaseTracker::new();
        tracker.enter("case", TestPhase::Clean).unwrap();
        let mut tracker = PhaseTracker::new();
        tracker.enter("case", TestPhase::Seed).unwrap();
        tracker.enter("case", TestPhase::Clean).unwrap();
    }
}
