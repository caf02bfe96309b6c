use crate::logic::populate;
use crate::model::{generate_id, EntityProxy, Id, InstanceHeader, InstanceSnapshot, TypeDef, TypeDefCategory};
use crate::store::ErrorClass;
use crate::suite::error::HarnessError;
use crate::suite::operations::{self, MutationTarget, OperationContext};
use crate::suite::phase::{ConformanceTestCase, PhaseTracker, TestPhase};
use crate::suite::report::{AssertionIds, Requirement};
use crate::suite::workpad::{Side, Workpad};

const REQUIREMENT: Requirement = Requirement::ENTITY_PROXIES;

/// Entity proxy lifecycle at the repository under test: a proxy homed at the
/// reference repository is added, must be readable only as a summary, must
/// refuse every change, and is finally purged as a reference copy.
pub struct EntityProxyTestCase {
    test_case_id: String,
    type_name: String,
    tracker: PhaseTracker,
    type_def: Option<TypeDef>,
    proxy: Option<EntityProxy>,
    /// The proxy was accepted and must be removed in CLEAN
    added: bool,
    assertion_ids: AssertionIds,
}

impl EntityProxyTestCase {
    pub fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            test_case_id: format!("repository-entity-proxy-lifecycle-{}", type_name),
            type_name,
            tracker: PhaseTracker::new(),
            type_def: None,
            proxy: None,
            added: false,
            assertion_ids: AssertionIds::new("repository-entity-proxy"),
        }
    }

    fn seed(&mut self, workpad: &Workpad) -> Result<(), HarnessError> {
        let type_def = workpad.type_def(&self.type_name)?.clone();
        let unique_attributes: Vec<_> = workpad
            .types
            .all_attributes(&type_def.name)
            .into_iter()
            .filter(|attribute| attribute.unique)
            .collect();

        self.proxy = Some(EntityProxy {
            header: InstanceHeader::new(
                generate_id(),
                type_def.guid.clone(),
                type_def.name.clone(),
                workpad.metadata_collection_id(Side::Cts).clone(),
                workpad.user_id(),
            ),
            unique_properties: populate(&unique_attributes, "0").unwrap_or_default(),
        });
        self.type_def = Some(type_def);
        Ok(())
    }

    fn proxy(&self) -> Result<&EntityProxy, HarnessError> {
        self.proxy
            .as_ref()
            .ok_or_else(|| HarnessError::Workpad(format!("{} was not seeded", self.test_case_id)))
    }

    async fn create(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        let tut = workpad.tut().clone();
        let user_id = workpad.user_id().to_string();
        let proxy = self.proxy()?.clone();
        let context = OperationContext::new("addEntityProxy", "adding a proxy homed at the reference repository")
            .param("guid", &proxy.header.guid)
            .param("typeGUID", &proxy.header.type_guid)
            .param("homeMetadataCollectionId", &proxy.header.metadata_collection_id);

        match tut.add_entity_proxy(&user_id, &proxy).await {
            Ok(()) => {
                self.added = true;
                Ok(())
            }
            Err(e) if e.class() == ErrorClass::CapabilityGap => {
                workpad
                    .report
                    .add_not_supported(&self.assertion_ids.next(), e.to_string(), REQUIREMENT);
                Ok(())
            }
            Err(e) => Err(context.fault(e)),
        }
    }

    async fn execute(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        if !self.added {
            return Ok(());
        }
        let tut = workpad.tut().clone();
        let user_id = workpad.user_id().to_string();
        let proxy = self.proxy()?.clone();
        let guid = proxy.header.guid.clone();
        let cts_id = workpad.metadata_collection_id(Side::Cts).clone();

        let before = self.summary(workpad, &guid).await?;
        workpad.report.assert_condition(
            before.header.metadata_collection_id == cts_id && before.header.type_guid == proxy.header.type_guid,
            &self.assertion_ids.next(),
            format!(
                "summary of proxy {} reports home {} and type {}",
                guid, before.header.metadata_collection_id, before.header.type_name
            ),
            REQUIREMENT,
            None,
        )?;

        let context = OperationContext::new("getEntityDetail", "reading detail of a proxy").param("guid", &guid);
        let detail = tut.get_entity_detail(&user_id, &guid).await;
        let proxy_only = matches!(&detail, Err(e) if e.class() == ErrorClass::ProxyOnly);
        workpad.report.assert_condition(
            proxy_only,
            &self.assertion_ids.next(),
            match &detail {
                Ok(_) => format!("detail was returned for proxy {}", guid),
                Err(e) => format!("detail request for proxy {} answered: {}", guid, e),
            },
            REQUIREMENT,
            Some(context.timing()),
        )?;

        let context = OperationContext::new("isEntityKnown", "checking a proxy is not a known entity").param("guid", &guid);
        let known = context.check(tut.is_entity_known(&user_id, &guid).await)?;
        workpad.report.assert_condition(
            known.is_none(),
            &self.assertion_ids.next(),
            format!("isEntityKnown for proxy {} returned no detail", guid),
            REQUIREMENT,
            Some(context.timing()),
        )?;

        let type_def = self
            .type_def
            .clone()
            .ok_or_else(|| HarnessError::Workpad(format!("{} was not seeded", self.test_case_id)))?;
        let attributes = workpad.types.all_attributes(&type_def.name);
        let properties = populate(&attributes, "1").unwrap_or_default();
        let new_type_guid = workpad.alternative_type_guid(&type_def, &proxy.unique_properties);
        let target = MutationTarget {
            category: TypeDefCategory::Entity,
            guid: &guid,
            properties: &properties,
            new_type_guid: new_type_guid.as_ref(),
            kind: "proxy",
        };
        operations::verify_mutations_rejected(
            tut.as_ref(),
            &user_id,
            &target,
            &mut workpad.report,
            &mut self.assertion_ids,
            REQUIREMENT,
        )
        .await?;

        let after = self.summary(workpad, &guid).await?;
        let unchanged = after.fingerprint()? == before.fingerprint()?;
        workpad.report.assert_condition(
            unchanged,
            &self.assertion_ids.next(),
            format!("proxy {} is unchanged after refused mutations", guid),
            REQUIREMENT,
            None,
        )?;
        Ok(())
    }

    async fn summary(&self, workpad: &Workpad, guid: &Id) -> Result<InstanceSnapshot, HarnessError> {
        let context = OperationContext::new("getEntitySummary", "reading the summary of a proxy").param("guid", guid);
        let summary = context.check(workpad.tut().get_entity_summary(workpad.user_id(), guid).await)?;
        Ok(InstanceSnapshot::from(summary))
    }

    async fn clean(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        if !self.added {
            return Ok(());
        }
        let tut = workpad.tut().clone();
        let user_id = workpad.user_id().to_string();
        let guid = self.proxy()?.header.guid.clone();
        let home = workpad.metadata_collection_id(Side::Cts).clone();

        let context = OperationContext::new("purgeEntityReferenceCopy", "removing the proxy")
            .param("guid", &guid)
            .param("homeMetadataCollectionId", &home);
        match operations::purge_reference_copy(tut.as_ref(), &user_id, TypeDefCategory::Entity, &guid, &home).await {
            Ok(()) => {}
            Err(e) if e.class() == ErrorClass::NotKnown => {}
            Err(e) if e.class() == ErrorClass::CapabilityGap => {
                workpad
                    .report
                    .add_not_supported(&self.assertion_ids.next(), e.to_string(), REQUIREMENT);
                return Ok(());
            }
            Err(e) => return Err(context.fault(e)),
        }
        self.added = false;

        let context = OperationContext::new("getEntitySummary", "checking the proxy was purged").param("guid", &guid);
        let remaining = tut.get_entity_summary(&user_id, &guid).await;
        let gone = matches!(&remaining, Err(e) if e.class() == ErrorClass::NotKnown);
        workpad.report.verify_condition(
            gone,
            &self.assertion_ids.next(),
            format!("proxy {} is no longer known after purge", guid),
            REQUIREMENT,
            Some(context.timing()),
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConformanceTestCase for EntityProxyTestCase {
    fn test_case_id(&self) -> &str {
        &self.test_case_id
    }

    async fn run(&mut self, phase: TestPhase, workpad: &mut Workpad) -> Result<(), HarnessError> {
        self.tracker.enter(&self.test_case_id, phase)?;
        match phase {
            TestPhase::Seed => self.seed(workpad),
            TestPhase::Create => self.create(workpad).await,
            TestPhase::Execute => self.execute(workpad).await,
            TestPhase::Clean => self.clean(workpad).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PrimitiveCategory, TypedAttribute};
    use crate::store::{Capabilities, Defects, InMemoryRepository};
    use crate::suite::report::Outcome;
    use crate::suite::workpad::RunSettings;
    use std::sync::Arc;

    fn type_defs() -> Vec<TypeDef> {
        vec![
            TypeDef::entity("t-asset", "Asset")
                .with_attribute(TypedAttribute::new("qualifiedName", PrimitiveCategory::String).unique())
                .with_attribute(TypedAttribute::new("count", PrimitiveCategory::Int)),
            TypeDef::entity("t-table", "Table").with_super_type("Asset"),
        ]
    }

    fn workpad(capabilities: Capabilities) -> (Workpad, Arc<InMemoryRepository>) {
        workpad_with(capabilities, Defects::default())
    }

    fn workpad_with(capabilities: Capabilities, defects: Defects) -> (Workpad, Arc<InMemoryRepository>) {
        let tut = Arc::new(
            InMemoryRepository::new("tut", "tut", type_defs())
                .with_capabilities(capabilities)
                .with_defects(defects),
        );
        let cts = Arc::new(InMemoryRepository::new("cts", "cts", type_defs()));
        let mut workpad = Workpad::new(tut.clone(), cts, RunSettings::default());
        workpad.register_types(type_defs());
        (workpad, tut)
    }

    async fn run_all(case: &mut EntityProxyTestCase, workpad: &mut Workpad) {
        for phase in [TestPhase::Seed, TestPhase::Create, TestPhase::Execute, TestPhase::Clean] {
            case.run(phase, workpad).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_proxy_lifecycle_passes() {
        let (mut workpad, tut) = workpad(Capabilities::default());
        let mut case = EntityProxyTestCase::new("Asset");
        run_all(&mut case, &mut workpad).await;

        assert!(workpad.report.all_passed(), "{:?}", workpad.report.records);
        // summary, detail, known, four mutations, fingerprint, purge
        assert_eq!(workpad.report.count(Outcome::Passed), 9);
        assert_eq!(tut.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_proxy_carries_only_unique_properties() {
        let (mut workpad, _) = workpad(Capabilities::default());
        let mut case = EntityProxyTestCase::new("Asset");
        case.run(TestPhase::Seed, &mut workpad).await.unwrap();
        let proxy = case.proxy().unwrap();
        assert_eq!(proxy.unique_properties.len(), 1);
        assert!(proxy.unique_properties.contains_key("qualifiedName"));
        assert_eq!(proxy.header.metadata_collection_id, "cts");
    }

    #[tokio::test]
    async fn test_missing_proxy_support_is_not_a_failure() {
        let (mut workpad, _) = workpad(Capabilities {
            entity_proxies: false,
            ..Capabilities::default()
        });
        let mut case = EntityProxyTestCase::new("Asset");
        run_all(&mut case, &mut workpad).await;

        assert!(workpad.report.all_passed());
        assert_eq!(workpad.report.count(Outcome::NotSupported), 1);
        assert_eq!(workpad.report.count(Outcome::Passed), 0);
    }

    #[tokio::test]
    async fn test_changeable_proxy_fails_the_lifecycle() {
        let (mut workpad, tut) = workpad_with(
            Capabilities::default(),
            Defects {
                mutable_copies: true,
                ..Defects::default()
            },
        );
        let mut case = EntityProxyTestCase::new("Asset");
        for phase in [TestPhase::Seed, TestPhase::Create] {
            case.run(phase, &mut workpad).await.unwrap();
        }
        let err = case.run(TestPhase::Execute, &mut workpad).await.unwrap_err();
        assert!(err.is_assertion(), "{}", err);

        let failed: Vec<_> = workpad
            .report
            .records
            .iter()
            .filter(|record| record.outcome == Outcome::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].requirement, "entity-proxy-lifecycle");
        assert!(failed[0].message.contains("changed proxy"), "{}", failed[0].message);
        assert!(!workpad.report.all_passed());

        case.run(TestPhase::Clean, &mut workpad).await.unwrap();
        assert_eq!(tut.entity_count(), 0);
    }
}
