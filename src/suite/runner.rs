use std::sync::Arc;

use crate::model::{TypeDef, TypeDefCategory};
use crate::store::MetadataCollection;
use crate::suite::error::HarnessError;
use crate::suite::operations::OperationContext;
use crate::suite::phase::{ConformanceTestCase, TestPhase};
use crate::suite::property_search::PropertySearchTestCase;
use crate::suite::proxy::EntityProxyTestCase;
use crate::suite::reference_copy::ReferenceCopyTestCase;
use crate::suite::report::{AssertionIds, ConformanceReport, Outcome, Requirement};
use crate::suite::workpad::{RunSettings, Workpad};

const DISCOVERY_TEST_CASE: &str = "repository-type-discovery";

/// Drives every applicable test case for every type the repository under test
/// reports, one at a time
pub struct ConformanceRunner {
    workpad: Workpad,
}

impl ConformanceRunner {
    pub fn new(tut: Arc<dyn MetadataCollection>, cts: Arc<dyn MetadataCollection>, settings: RunSettings) -> Self {
        Self {
            workpad: Workpad::new(tut, cts, settings),
        }
    }

    pub fn workpad(&self) -> &Workpad {
        &self.workpad
    }

    /// Discover types, then run SEED, CREATE, EXECUTE and CLEAN for each test
    /// case. CLEAN runs even when an earlier phase stopped.
    pub async fn run(mut self) -> Result<ConformanceReport, HarnessError> {
        self.discover_types().await?;

        let mut test_cases = self.test_cases();
        log::info!(
            "running {} test cases against {}",
            test_cases.len(),
            self.workpad.tut_metadata_collection_id()
        );
        for test_case in test_cases.iter_mut() {
            self.run_test_case(test_case.as_mut()).await;
        }

        let report = self.workpad.report;
        log::info!(
            "conformance run finished: {} passed, {} failed, {} not supported, {} aborted",
            report.count(Outcome::Passed),
            report.count(Outcome::Failed),
            report.count(Outcome::NotSupported),
            report.aborts.len()
        );
        Ok(report)
    }

    async fn discover_types(&mut self) -> Result<(), HarnessError> {
        self.workpad.report.begin_test_case(DISCOVERY_TEST_CASE);
        let tut = self.workpad.tut().clone();
        let context = OperationContext::new("getAllTypeDefs", "discovering the types to test")
            .param("metadataCollectionId", tut.metadata_collection_id());
        let type_defs = context.check(tut.get_all_type_defs(self.workpad.user_id()).await)?;

        let mut ids = AssertionIds::new(DISCOVERY_TEST_CASE);
        self.workpad.report.verify_condition(
            !type_defs.is_empty(),
            &ids.next(),
            format!("{} reported {} type definitions", tut.metadata_collection_id(), type_defs.len()),
            Requirement::METADATA_SHARING,
            Some(context.timing()),
        );
        self.workpad.register_types(type_defs);
        Ok(())
    }

    fn selected(&self, type_def: &TypeDef) -> bool {
        match &self.workpad.settings.type_filter {
            Some(names) => names.iter().any(|name| name == &type_def.name),
            None => true,
        }
    }

    fn test_cases(&self) -> Vec<Box<dyn ConformanceTestCase>> {
        let mut test_cases: Vec<Box<dyn ConformanceTestCase>> = Vec::new();
        for type_def in self.workpad.types.all().filter(|type_def| self.selected(type_def)) {
            let name = type_def.name.clone();
            test_cases.push(Box::new(PropertySearchTestCase::new(type_def.category, name.clone())));
            if type_def.category == TypeDefCategory::Entity {
                test_cases.push(Box::new(EntityProxyTestCase::new(name.clone())));
            }
            test_cases.push(Box::new(ReferenceCopyTestCase::new(type_def.category, name)));
        }
        test_cases
    }

    async fn run_test_case(&mut self, test_case: &mut dyn ConformanceTestCase) {
        self.workpad.report.begin_test_case(test_case.test_case_id());
        for phase in [TestPhase::Seed, TestPhase::Create, TestPhase::Execute] {
            if let Err(e) = test_case.run(phase, &mut self.workpad).await {
                log::warn!("{}: {} stopped: {}", test_case.test_case_id(), phase, e);
                self.workpad.report.record_abort(&e);
                break;
            }
        }
        if let Err(e) = test_case.run(TestPhase::Clean, &mut self.workpad).await {
            log::error!("{}: {} failed: {}", test_case.test_case_id(), TestPhase::Clean, e);
            self.workpad.report.record_abort(&e);
        }
    }
}
