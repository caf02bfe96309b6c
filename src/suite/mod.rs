pub mod error;
pub mod operations;
pub mod phase;
pub mod property_search;
pub mod proxy;
pub mod reference_copy;
pub mod report;
pub mod runner;
pub mod workpad;

pub use error::{HarnessError, OperationFault};
pub use phase::{ConformanceTestCase, PhaseTracker, TestPhase};
pub use property_search::PropertySearchTestCase;
pub use proxy::EntityProxyTestCase;
pub use reference_copy::{ReferenceCopyTestCase, Stage};
pub use report::{
    AbortRecord, AssertionRecord, ConformanceReport, Outcome, Requirement, RequirementSummary, Severity,
};
pub use runner::ConformanceRunner;
pub use workpad::{RunSettings, Side, Workpad};
