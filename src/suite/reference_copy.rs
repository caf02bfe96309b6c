//! Reference copy lifecycle for one entity or relationship type.
//!
//! A master is created at the reference repository and must surface at the
//! repository under test as a read-only copy. The copy has to match its master,
//! refuse every change, and disappear once the master is deleted and purged.
//! Re-homing runs last because it leaves the two repositories disagreeing about
//! ownership until cleanup has run against the new home.

use crate::logic::{populate, retry, PollPolicy};
use crate::model::{Id, InstanceProperties, InstanceSnapshot, TypeDef, TypeDefCategory};
use crate::store::{ErrorClass, MetadataCollection, RepositoryError, RepositoryResult};
use crate::suite::error::HarnessError;
use crate::suite::operations::{self, capitalised, MutationTarget, OperationContext};
use crate::suite::phase::{ConformanceTestCase, PhaseTracker, TestPhase};
use crate::suite::report::{AssertionIds, Requirement};
use crate::suite::workpad::{Side, Workpad};

/// Steps of the lifecycle, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreateMaster,
    WaitForReplica,
    VerifyReplicaReadable,
    VerifyReplicaImmutable,
    DeleteMaster,
    WaitForReplicaRemoval,
    VerifyRemoved,
    ReHome,
    Cleanup,
    Done,
}

pub struct ReferenceCopyTestCase {
    test_case_id: String,
    category: TypeDefCategory,
    type_name: String,
    tracker: PhaseTracker,
    stage: Stage,
    type_def: Option<TypeDef>,
    properties: InstanceProperties,
    end_types: Option<(TypeDef, TypeDef)>,
    ends: Option<(Id, Id)>,
    master: Option<InstanceSnapshot>,
    replica: Option<InstanceSnapshot>,
    /// Every instance the test created, with the side currently mastering it
    placements: Vec<(Side, InstanceSnapshot)>,
    /// A reference copy was observed, so its removal must be confirmed in CLEAN
    replicated: bool,
    assertion_ids: AssertionIds,
}

impl ReferenceCopyTestCase {
    pub fn new(category: TypeDefCategory, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            test_case_id: format!("repository-{}-reference-copy-lifecycle-{}", category.as_str(), type_name),
            category,
            type_name,
            tracker: PhaseTracker::new(),
            stage: Stage::CreateMaster,
            type_def: None,
            properties: InstanceProperties::new(),
            end_types: None,
            ends: None,
            master: None,
            replica: None,
            placements: Vec::new(),
            replicated: false,
            assertion_ids: AssertionIds::new(format!("repository-{}-reference-copy", category.as_str())),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn type_def(&self) -> Result<&TypeDef, HarnessError> {
        self.type_def
            .as_ref()
            .ok_or_else(|| HarnessError::Workpad(format!("{} was not seeded", self.test_case_id)))
    }

    fn master(&self) -> Result<&InstanceSnapshot, HarnessError> {
        self.master
            .as_ref()
            .ok_or_else(|| HarnessError::Workpad(format!("{} has no master instance", self.test_case_id)))
    }

    fn replica(&self) -> Result<&InstanceSnapshot, HarnessError> {
        self.replica
            .as_ref()
            .ok_or_else(|| HarnessError::Workpad(format!("{} has no reference copy", self.test_case_id)))
    }

    fn seed(&mut self, workpad: &Workpad) -> Result<(), HarnessError> {
        let type_def = workpad.type_def(&self.type_name)?.clone();
        let attributes = workpad.types.all_attributes(&type_def.name);
        self.properties = populate(&attributes, "0").unwrap_or_default();
        if type_def.category == TypeDefCategory::Relationship {
            self.end_types = Some(workpad.end_types(&type_def)?);
        }
        self.type_def = Some(type_def);
        Ok(())
    }

    async fn create(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        let cts = workpad.cts().clone();
        let user_id = workpad.user_id().to_string();

        if let Some((end_one, end_two)) = self.end_types.clone() {
            let context = OperationContext::new("addEntity", "creating relationship end entities at the reference repository")
                .param("endOneType", &end_one.name)
                .param("endTwoType", &end_two.name);
            let (one, two) =
                context.check(operations::add_end_entities(cts.as_ref(), &user_id, &end_one, &end_two).await)?;
            self.ends = Some((one.header.guid.clone(), two.header.guid.clone()));
            self.placements.push((Side::Cts, one));
            self.placements.push((Side::Cts, two));
        }

        self.master = Some(self.create_master(cts.as_ref(), &user_id).await?);
        self.stage = Stage::WaitForReplica;
        Ok(())
    }

    async fn create_master(
        &mut self,
        cts: &dyn MetadataCollection,
        user_id: &str,
    ) -> Result<InstanceSnapshot, HarnessError> {
        let type_def = self.type_def()?.clone();
        let context = OperationContext::new(
            format!("add{}", capitalised(self.category.as_str())),
            "creating a master instance at the reference repository",
        )
        .param("typeGUID", &type_def.guid)
        .param("metadataCollectionId", cts.metadata_collection_id());
        let ends = self.ends.as_ref().map(|(one, two)| (one, two));
        let master = context.check(
            operations::add_instance(cts, user_id, &type_def, Some(self.properties.clone()), ends).await,
        )?;
        self.placements.push((Side::Cts, master.clone()));
        Ok(master)
    }

    async fn execute(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        while !matches!(self.stage, Stage::Cleanup | Stage::Done) {
            log::debug!("{}: {:?}", self.test_case_id, self.stage);
            self.stage = match self.stage {
                Stage::WaitForReplica => self.wait_for_replica(workpad).await?,
                Stage::VerifyReplicaReadable => self.verify_replica_readable(workpad).await?,
                Stage::VerifyReplicaImmutable => self.verify_replica_immutable(workpad).await?,
                Stage::DeleteMaster => self.delete_master(workpad).await?,
                Stage::WaitForReplicaRemoval => self.wait_for_replica_removal(workpad).await?,
                Stage::VerifyRemoved => self.verify_removed(workpad).await?,
                Stage::ReHome => self.re_home(workpad).await?,
                Stage::CreateMaster | Stage::Cleanup | Stage::Done => Stage::Cleanup,
            };
        }
        Ok(())
    }

    async fn wait_for_replica(&mut self, workpad: &mut Workpad) -> Result<Stage, HarnessError> {
        let (cts, tut) = (workpad.cts().clone(), workpad.tut().clone());
        let user_id = workpad.user_id().to_string();
        let guid = self.master()?.header.guid.clone();
        let context = OperationContext::new(
            format!("is{}Known", capitalised(self.category.as_str())),
            "waiting for the reference copy to arrive",
        )
        .param("guid", &guid)
        .param("metadataCollectionId", tut.metadata_collection_id());

        let mut replica = context.check(
            wait_for(tut.as_ref(), &user_id, self.category, &guid, &workpad.poll(), |_| true).await,
        )?;
        if replica.is_none() {
            // Nothing was replicated; store the copy directly
            match operations::save_reference_copy(cts.as_ref(), tut.as_ref(), &user_id, self.category, &guid).await {
                Ok(()) => {
                    replica = context.check(operations::is_known(tut.as_ref(), &user_id, self.category, &guid).await)?
                }
                Err(e) if e.class() == ErrorClass::CapabilityGap => {
                    workpad.report.add_not_supported(
                        &self.assertion_ids.next(),
                        e.to_string(),
                        Requirement::REFERENCE_COPY_LIFECYCLE,
                    );
                    return Ok(Stage::Cleanup);
                }
                Err(e) => return Err(context.fault(e)),
            }
        }

        workpad.report.assert_condition(
            replica.is_some(),
            &self.assertion_ids.next(),
            format!("reference copy of {} {} is known at {}", self.category.as_str(), guid, tut.metadata_collection_id()),
            Requirement::REFERENCE_COPY_LIFECYCLE,
            Some(context.timing()),
        )?;
        self.replicated = true;
        self.replica = replica;
        Ok(Stage::VerifyReplicaReadable)
    }

    async fn verify_replica_readable(&mut self, workpad: &mut Workpad) -> Result<Stage, HarnessError> {
        let (cts, tut) = (workpad.cts().clone(), workpad.tut().clone());
        let user_id = workpad.user_id().to_string();
        let guid = self.master()?.header.guid.clone();

        let master = self.fetch(cts.as_ref(), &user_id, &guid, "reading the master").await?;
        let context = OperationContext::new(self.get_operation(), "reading the reference copy")
            .param("guid", &guid)
            .param("metadataCollectionId", tut.metadata_collection_id());
        let replica = context.check(operations::get_instance(tut.as_ref(), &user_id, self.category, &guid).await)?;

        let matches = replica.fingerprint()? == master.fingerprint()?;
        workpad.report.assert_condition(
            matches,
            &self.assertion_ids.next(),
            format!("reference copy of {} matches its master", guid),
            Requirement::REFERENCE_COPY_LIFECYCLE,
            Some(context.timing()),
        )?;
        let cts_id = workpad.metadata_collection_id(Side::Cts).clone();
        workpad.report.assert_condition(
            replica.header.metadata_collection_id == cts_id,
            &self.assertion_ids.next(),
            format!(
                "reference copy of {} names {} as its home, expected {}",
                guid, replica.header.metadata_collection_id, cts_id
            ),
            Requirement::REFERENCE_COPY_LIFECYCLE,
            None,
        )?;
        self.replica = Some(replica);
        Ok(Stage::VerifyReplicaImmutable)
    }

    async fn verify_replica_immutable(&mut self, workpad: &mut Workpad) -> Result<Stage, HarnessError> {
        let tut = workpad.tut().clone();
        let user_id = workpad.user_id().to_string();
        let type_def = self.type_def()?.clone();
        let before = self.replica()?.clone();
        let guid = before.header.guid.clone();

        let attributes = workpad.types.all_attributes(&type_def.name);
        let properties = populate(&attributes, "1").unwrap_or_default();
        let new_type_guid = workpad.alternative_type_guid(&type_def, &before.properties);
        let target = MutationTarget {
            category: self.category,
            guid: &guid,
            properties: &properties,
            new_type_guid: new_type_guid.as_ref(),
            kind: "reference copy",
        };
        operations::verify_mutations_rejected(
            tut.as_ref(),
            &user_id,
            &target,
            &mut workpad.report,
            &mut self.assertion_ids,
            Requirement::REFERENCE_COPY_LOCKING,
        )
        .await?;

        let after = self.fetch(tut.as_ref(), &user_id, &guid, "re-reading the reference copy").await?;
        let unchanged = after.fingerprint()? == before.fingerprint()?;
        workpad.report.assert_condition(
            unchanged,
            &self.assertion_ids.next(),
            format!("reference copy {} is unchanged after refused mutations", guid),
            Requirement::REFERENCE_COPY_LOCKING,
            None,
        )?;
        Ok(Stage::DeleteMaster)
    }

    async fn delete_master(&mut self, workpad: &mut Workpad) -> Result<Stage, HarnessError> {
        let cts = workpad.cts().clone();
        let guid = self.master()?.header.guid.clone();
        // Stays placed so CLEAN confirms the copy is gone as well
        operations::cleanup_master(cts.as_ref(), workpad.user_id(), self.category, &guid).await?;
        Ok(Stage::WaitForReplicaRemoval)
    }

    async fn wait_for_replica_removal(&mut self, workpad: &mut Workpad) -> Result<Stage, HarnessError> {
        let tut = workpad.tut().clone();
        let guid = self.master()?.header.guid.clone();
        let context = OperationContext::new(
            format!("is{}Known", capitalised(self.category.as_str())),
            "waiting for the reference copy to be removed",
        )
        .param("guid", &guid);
        // The outcome is decided by the next stage
        context.check(wait_for_removal(tut.as_ref(), workpad.user_id(), self.category, &guid, &workpad.poll()).await)?;
        Ok(Stage::VerifyRemoved)
    }

    async fn verify_removed(&mut self, workpad: &mut Workpad) -> Result<Stage, HarnessError> {
        let tut = workpad.tut().clone();
        let guid = self.master()?.header.guid.clone();
        let context = OperationContext::new(self.get_operation(), "reading a purged reference copy").param("guid", &guid);
        let result = operations::get_instance(tut.as_ref(), workpad.user_id(), self.category, &guid).await;
        let message = match &result {
            Ok(_) => format!("reference copy {} is still returned after its master was purged", guid),
            Err(e) if e.class() == ErrorClass::NotKnown => {
                format!("reference copy {} is not known after its master was purged", guid)
            }
            Err(e) => return Err(context.fault(e.clone())),
        };
        workpad.report.assert_condition(
            result.is_err(),
            &self.assertion_ids.next(),
            message,
            Requirement::REFERENCE_COPY_LIFECYCLE,
            Some(context.timing()),
        )?;
        self.replica = None;
        Ok(Stage::ReHome)
    }

    async fn re_home(&mut self, workpad: &mut Workpad) -> Result<Stage, HarnessError> {
        let (cts, tut) = (workpad.cts().clone(), workpad.tut().clone());
        let user_id = workpad.user_id().to_string();
        let cts_id = workpad.metadata_collection_id(Side::Cts).clone();
        let tut_id = workpad.metadata_collection_id(Side::Tut).clone();
        let policy = workpad.poll();

        let master = self.create_master(cts.as_ref(), &user_id).await?;
        let guid = master.header.guid.clone();
        self.master = Some(master);

        let context = OperationContext::new(
            format!("is{}Known", capitalised(self.category.as_str())),
            "waiting for a reference copy to re-home",
        )
        .param("guid", &guid);
        let replica = context.check(wait_for(tut.as_ref(), &user_id, self.category, &guid, &policy, |_| true).await)?;
        workpad.report.assert_condition(
            replica.is_some(),
            &self.assertion_ids.next(),
            format!("reference copy of {} is known at {} before re-homing", guid, tut_id),
            Requirement::RE_HOME,
            Some(context.timing()),
        )?;
        self.replicated = true;

        let context = OperationContext::new(
            format!("reHome{}", capitalised(self.category.as_str())),
            "taking ownership of a reference copy",
        )
        .param("guid", &guid)
        .param("homeMetadataCollectionId", &cts_id);
        let rehomed = match operations::re_home(tut.as_ref(), &user_id, self.category, &guid, &cts_id).await {
            Ok(rehomed) => rehomed,
            Err(e) if e.class() == ErrorClass::CapabilityGap => {
                workpad
                    .report
                    .add_not_supported(&self.assertion_ids.next(), e.to_string(), Requirement::RE_HOME);
                return Ok(Stage::Cleanup);
            }
            Err(e) => return Err(context.fault(e)),
        };
        // The repository under test now holds the master
        for (side, placed) in self.placements.iter_mut() {
            if placed.header.guid == guid {
                *side = Side::Tut;
            }
        }
        workpad.report.assert_condition(
            rehomed.header.metadata_collection_id == tut_id,
            &self.assertion_ids.next(),
            format!("{} {} is homed at {} after re-home", self.category.as_str(), guid, rehomed.header.metadata_collection_id),
            Requirement::RE_HOME,
            Some(context.timing()),
        )?;

        let context = OperationContext::new(
            format!("is{}Known", capitalised(self.category.as_str())),
            "waiting for the former home to see the new owner",
        )
        .param("guid", &guid)
        .param("metadataCollectionId", &cts_id);
        let seen = context.check(
            wait_for(cts.as_ref(), &user_id, self.category, &guid, &policy, |snapshot| {
                snapshot.header.metadata_collection_id == tut_id
            })
            .await,
        )?;
        workpad.report.verify_condition(
            seen.is_some(),
            &self.assertion_ids.next(),
            format!("{} sees {} as the home of {}", cts_id, tut_id, guid),
            Requirement::RE_HOME,
            Some(context.timing()),
        );
        Ok(Stage::Cleanup)
    }

    async fn clean(&mut self, workpad: &mut Workpad) -> Result<(), HarnessError> {
        let user_id = workpad.user_id().to_string();
        let policy = workpad.poll();
        let mut first_error = None;
        let mut removed = Vec::new();

        while let Some((side, placed)) = self.placements.pop() {
            let repository = workpad.repository(side).clone();
            match operations::cleanup_master(repository.as_ref(), &user_id, placed.category, &placed.header.guid).await {
                Ok(()) => removed.push((side, placed)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        let mut left_behind = Vec::new();
        for (side, placed) in &removed {
            let other = workpad.repository(side.other()).clone();
            let gone = match wait_for_removal(other.as_ref(), &user_id, placed.category, &placed.header.guid, &policy).await {
                Ok(gone) => gone,
                Err(e) => {
                    log::warn!("could not confirm removal of {} at {}: {}", placed.header.guid, other.metadata_collection_id(), e);
                    false
                }
            };
            if !gone {
                log::warn!("{} is still known at {}", placed.header.guid, other.metadata_collection_id());
                if placed.category == self.category {
                    left_behind.push(format!("{} at {}", placed.header.guid, other.metadata_collection_id()));
                }
            }
        }
        if self.replicated {
            workpad.report.verify_condition(
                left_behind.is_empty(),
                &self.assertion_ids.next(),
                format!(
                    "reference copies of {} instances remaining after cleanup: {:?}",
                    self.type_name, left_behind
                ),
                Requirement::REFERENCE_COPY_LIFECYCLE,
                None,
            );
        }

        self.stage = Stage::Done;
        first_error.map_or(Ok(()), Err)
    }

    async fn fetch(
        &self,
        repository: &dyn MetadataCollection,
        user_id: &str,
        guid: &Id,
        description: &str,
    ) -> Result<InstanceSnapshot, HarnessError> {
        let context = OperationContext::new(self.get_operation(), description)
            .param("guid", guid)
            .param("metadataCollectionId", repository.metadata_collection_id());
        context.check(operations::get_instance(repository, user_id, self.category, guid).await)
    }

    fn get_operation(&self) -> &'static str {
        match self.category {
            TypeDefCategory::Entity => "getEntityDetail",
            TypeDefCategory::Relationship => "getRelationship",
        }
    }
}

/// Poll until `repository` knows `guid` in a state `accept` approves of
async fn wait_for<P>(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    policy: &PollPolicy,
    accept: P,
) -> RepositoryResult<Option<InstanceSnapshot>>
where
    P: Fn(&InstanceSnapshot) -> bool,
{
    let accept = &accept;
    let waiting_for = format!("{} {} at {}", category.as_str(), guid, repository.metadata_collection_id());
    retry(policy, &waiting_for, || async move {
        let known = operations::is_known(repository, user_id, category, guid).await?;
        Ok::<_, RepositoryError>(known.filter(|snapshot| accept(snapshot)))
    })
    .await
}

/// Poll until `repository` no longer knows `guid`; false when the budget ran out
async fn wait_for_removal(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    policy: &PollPolicy,
) -> RepositoryResult<bool> {
    let waiting_for = format!("removal of {} {} at {}", category.as_str(), guid, repository.metadata_collection_id());
    let removed = retry(policy, &waiting_for, || async move {
        let known = operations::is_known(repository, user_id, category, guid).await?;
        Ok::<_, RepositoryError>(if known.is_none() { Some(()) } else { None })
    })
    .await?;
    Ok(removed.is_some())
}

#[async_trait::async_trait]
impl ConformanceTestCase for ReferenceCopyTestCase {
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
    use std::time::Duration;

    fn type_defs() -> Vec<TypeDef> {
        vec![
            TypeDef::entity("t-asset", "Asset")
                .with_attribute(TypedAttribute::new("qualifiedName", PrimitiveCategory::String).unique())
                .with_attribute(TypedAttribute::new("count", PrimitiveCategory::Int)),
            TypeDef::entity("t-table", "Table").with_super_type("Asset"),
            TypeDef::relationship("t-link", "AssetLink", "Asset", "Asset")
                .with_attribute(TypedAttribute::new("label", PrimitiveCategory::String)),
            TypeDef::relationship("t-strong-link", "StrongLink", "Asset", "Asset").with_super_type("AssetLink"),
        ]
    }

    fn linked(capabilities: Capabilities) -> (Workpad, Arc<InMemoryRepository>, Arc<InMemoryRepository>) {
        linked_with(capabilities, Defects::default())
    }

    fn linked_with(
        capabilities: Capabilities,
        defects: Defects,
    ) -> (Workpad, Arc<InMemoryRepository>, Arc<InMemoryRepository>) {
        let tut = Arc::new(
            InMemoryRepository::new("tut", "tut", type_defs())
                .with_capabilities(capabilities)
                .with_defects(defects),
        );
        let cts = Arc::new(InMemoryRepository::new("cts", "cts", type_defs()));
        InMemoryRepository::link_peers(&cts, &tut);
        let settings = RunSettings {
            poll: PollPolicy::new(Duration::from_millis(100), 2).unwrap(),
            ..RunSettings::default()
        };
        let mut workpad = Workpad::new(tut.clone(), cts.clone(), settings);
        workpad.register_types(type_defs());
        (workpad, cts, tut)
    }

    async fn run_all(case: &mut ReferenceCopyTestCase, workpad: &mut Workpad) {
        for phase in [TestPhase::Seed, TestPhase::Create, TestPhase::Execute, TestPhase::Clean] {
            case.run(phase, workpad).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_entity_lifecycle_with_re_home() {
        let (mut workpad, cts, tut) = linked(Capabilities::default());
        let mut case = ReferenceCopyTestCase::new(TypeDefCategory::Entity, "Asset");
        run_all(&mut case, &mut workpad).await;

        assert!(workpad.report.all_passed(), "{:?}", workpad.report.records);
        // known, matches, home, four refusals, unchanged, removed,
        // re-home: known, new home, seen by cts, then cleanup
        assert_eq!(workpad.report.count(Outcome::Passed), 13);
        assert_eq!(case.stage(), Stage::Done);
        assert_eq!(cts.entity_count(), 0);
        assert_eq!(tut.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_relationship_lifecycle_cleans_both_sides() {
        let (mut workpad, cts, tut) = linked(Capabilities::default());
        let mut case = ReferenceCopyTestCase::new(TypeDefCategory::Relationship, "AssetLink");
        run_all(&mut case, &mut workpad).await;

        assert!(workpad.report.all_passed(), "{:?}", workpad.report.records);
        assert_eq!(workpad.report.count(Outcome::Passed), 13);
        assert_eq!(cts.relationship_count() + tut.relationship_count(), 0);
        assert_eq!(cts.entity_count() + tut.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_reference_copies_skip_to_cleanup() {
        let (mut workpad, cts, _) = linked(Capabilities {
            reference_copies: false,
            ..Capabilities::default()
        });
        let mut case = ReferenceCopyTestCase::new(TypeDefCategory::Entity, "Asset");
        run_all(&mut case, &mut workpad).await;

        assert!(workpad.report.all_passed());
        assert_eq!(workpad.report.count(Outcome::NotSupported), 1);
        assert_eq!(workpad.report.count(Outcome::Failed), 0);
        assert_eq!(cts.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_re_home_is_not_a_failure() {
        let (mut workpad, cts, tut) = linked(Capabilities {
            re_home: false,
            ..Capabilities::default()
        });
        let mut case = ReferenceCopyTestCase::new(TypeDefCategory::Entity, "Asset");
        run_all(&mut case, &mut workpad).await;

        assert!(workpad.report.all_passed());
        assert_eq!(workpad.report.count(Outcome::NotSupported), 1);
        assert_eq!(workpad.report.count(Outcome::Passed), 11);
        assert_eq!(cts.entity_count() + tut.entity_count(), 0);
    }

    fn failed(workpad: &Workpad) -> Vec<&crate::suite::report::AssertionRecord> {
        workpad
            .report
            .records
            .iter()
            .filter(|record| record.outcome == Outcome::Failed)
            .collect()
    }

    #[tokio::test]
    async fn test_changeable_copy_fails_locking() {
        let (mut workpad, cts, tut) = linked_with(
            Capabilities::default(),
            Defects {
                mutable_copies: true,
                ..Defects::default()
            },
        );
        let mut case = ReferenceCopyTestCase::new(TypeDefCategory::Entity, "Asset");
        for phase in [TestPhase::Seed, TestPhase::Create] {
            case.run(phase, &mut workpad).await.unwrap();
        }
        let err = case.run(TestPhase::Execute, &mut workpad).await.unwrap_err();
        assert!(err.is_assertion(), "{}", err);
        assert_eq!(case.stage(), Stage::VerifyReplicaImmutable);

        let failures = failed(&workpad);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].requirement, "reference-copy-locking");
        assert!(failures[0].message.contains("changed reference copy"), "{}", failures[0].message);
        assert!(!workpad.report.all_passed());

        case.run(TestPhase::Clean, &mut workpad).await.unwrap();
        assert_eq!(cts.entity_count() + tut.entity_count(), 0);
    }

    #[tokio::test]
    async fn test_copy_kept_after_purge_fails_lifecycle() {
        let (mut workpad, _, tut) = linked_with(
            Capabilities::default(),
            Defects {
                retained_copies: true,
                ..Defects::default()
            },
        );
        let mut case = ReferenceCopyTestCase::new(TypeDefCategory::Entity, "Asset");
        for phase in [TestPhase::Seed, TestPhase::Create] {
            case.run(phase, &mut workpad).await.unwrap();
        }
        let err = case.run(TestPhase::Execute, &mut workpad).await.unwrap_err();
        assert!(err.is_assertion(), "{}", err);
        assert_eq!(case.stage(), Stage::VerifyRemoved);

        let failures = failed(&workpad);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].requirement, "reference-copy-lifecycle");
        assert!(failures[0].message.contains("still returned"), "{}", failures[0].message);

        // The copy outlives cleanup too, which CLEAN reports without aborting
        case.run(TestPhase::Clean, &mut workpad).await.unwrap();
        let failures = failed(&workpad);
        assert_eq!(failures.len(), 2);
        assert!(failures[1].message.contains("remaining after cleanup"), "{}", failures[1].message);
        assert_eq!(failures[1].requirement, "reference-copy-lifecycle");
        assert_eq!(tut.entity_count(), 1);
    }

    #[tokio::test]
    async fn test_clean_runs_after_aborted_create() {
        let (mut workpad, _, _) = linked(Capabilities::default());
        let mut case = ReferenceCopyTestCase::new(TypeDefCategory::Entity, "Missing");
        assert!(case.run(TestPhase::Seed, &mut workpad).await.is_err());
        case.run(TestPhase::Clean, &mut workpad).await.unwrap();
        assert_eq!(case.stage(), Stage::Done);
        assert!(workpad.report.records.is_empty());
    }
}
