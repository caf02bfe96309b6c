//! Repository calls dispatched on instance category, returning category-neutral
//! snapshots, plus the diagnostic context wrapped around every call.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Instant;

use crate::model::{
    generate_id, Id, InstanceProperties, InstanceSnapshot, InstanceStatus, MatchCriteria, PageRequest,
    TypeDef, TypeDefCategory,
};
use crate::store::{ErrorClass, MetadataCollection, RepositoryError, RepositoryResult};
use crate::suite::error::{HarnessError, OperationFault};
use crate::suite::report::{AssertionIds, ConformanceReport, OperationTiming, Requirement};

/// Name, purpose and parameters of one repository call, kept for diagnostics
#[derive(Debug, Clone)]
pub struct OperationContext {
    operation: String,
    description: String,
    parameters: BTreeMap<String, String>,
    started: Instant,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            started: Instant::now(),
        }
    }

    pub fn param(mut self, name: &str, value: impl Display) -> Self {
        self.parameters.insert(name.to_string(), value.to_string());
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Wrap an unexpected repository error into a fault that aborts the test case
    pub fn fault(&self, source: RepositoryError) -> HarnessError {
        log::error!(
            "{} failed while {} with {:?}: {}",
            self.operation,
            self.description,
            self.parameters,
            source
        );
        HarnessError::OperationFault(OperationFault {
            operation: self.operation.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            source,
        })
    }

    /// Time elapsed since the context was created
    pub fn timing(&self) -> OperationTiming {
        OperationTiming {
            operation: self.operation.clone(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Treat any error as a fault
    pub fn check<T>(&self, result: RepositoryResult<T>) -> Result<T, HarnessError> {
        result.map_err(|e| self.fault(e))
    }
}

/// `entity` -> `Entity`, for building operation names
pub fn capitalised(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Changes a reference copy or proxy must refuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Status,
    Properties,
    ReType,
    ReIdentify,
}

impl Mutation {
    pub const EVERY: [Mutation; 4] = [
        Mutation::Status,
        Mutation::Properties,
        Mutation::ReType,
        Mutation::ReIdentify,
    ];

    pub fn operation(self, category: TypeDefCategory) -> String {
        let noun = capitalised(category.as_str());
        match self {
            Mutation::Status => format!("update{}Status", noun),
            Mutation::Properties => format!("update{}Properties", noun),
            Mutation::ReType => format!("reType{}", noun),
            Mutation::ReIdentify => format!("reIdentify{}", noun),
        }
    }
}

/// How a repository answered a request it was expected to refuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Refused with an invalid-parameter class error
    Rejected,
    NotSupported,
    /// The request succeeded
    Accepted,
}

/// Classify the answer to a request that should be refused. Only an
/// `InvalidParameter` refusal counts; type and property validation failures
/// say nothing about locking and are faults like any other error.
pub fn expect_rejection<T>(context: &OperationContext, result: RepositoryResult<T>) -> Result<Rejection, HarnessError> {
    match result {
        Ok(_) => Ok(Rejection::Accepted),
        Err(e @ RepositoryError::InvalidParameter { .. }) => {
            log::debug!("{} rejected as expected: {}", context.operation(), e);
            Ok(Rejection::Rejected)
        }
        Err(e) if e.class() == ErrorClass::CapabilityGap => Ok(Rejection::NotSupported),
        Err(e) => Err(context.fault(e)),
    }
}

pub async fn add_instance(
    repository: &dyn MetadataCollection,
    user_id: &str,
    type_def: &TypeDef,
    properties: Option<InstanceProperties>,
    ends: Option<(&Id, &Id)>,
) -> RepositoryResult<InstanceSnapshot> {
    match (type_def.category, ends) {
        (TypeDefCategory::Entity, _) => repository
            .add_entity(user_id, &type_def.guid, properties)
            .await
            .map(InstanceSnapshot::from),
        (TypeDefCategory::Relationship, Some((one, two))) => repository
            .add_relationship(user_id, &type_def.guid, properties, one, two)
            .await
            .map(InstanceSnapshot::from),
        (TypeDefCategory::Relationship, None) => Err(RepositoryError::invalid(
            "addRelationship",
            format!("relationship of type {} needs two end entities", type_def.name),
        )),
    }
}

/// Create one entity of each end type, to anchor relationships under test
pub async fn add_end_entities(
    repository: &dyn MetadataCollection,
    user_id: &str,
    end_one: &TypeDef,
    end_two: &TypeDef,
) -> RepositoryResult<(InstanceSnapshot, InstanceSnapshot)> {
    let one = add_instance(repository, user_id, end_one, None, None).await?;
    let two = add_instance(repository, user_id, end_two, None, None).await?;
    Ok((one, two))
}

pub async fn get_instance(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
) -> RepositoryResult<InstanceSnapshot> {
    match category {
        TypeDefCategory::Entity => repository
            .get_entity_detail(user_id, guid)
            .await
            .map(InstanceSnapshot::from),
        TypeDefCategory::Relationship => repository
            .get_relationship(user_id, guid)
            .await
            .map(InstanceSnapshot::from),
    }
}

pub async fn is_known(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
) -> RepositoryResult<Option<InstanceSnapshot>> {
    match category {
        TypeDefCategory::Entity => Ok(repository
            .is_entity_known(user_id, guid)
            .await?
            .map(InstanceSnapshot::from)),
        TypeDefCategory::Relationship => Ok(repository
            .is_relationship_known(user_id, guid)
            .await?
            .map(InstanceSnapshot::from)),
    }
}

pub async fn update_status(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    status: InstanceStatus,
) -> RepositoryResult<InstanceSnapshot> {
    match category {
        TypeDefCategory::Entity => repository
            .update_entity_status(user_id, guid, status)
            .await
            .map(InstanceSnapshot::from),
        TypeDefCategory::Relationship => repository
            .update_relationship_status(user_id, guid, status)
            .await
            .map(InstanceSnapshot::from),
    }
}

pub async fn update_properties(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    properties: InstanceProperties,
) -> RepositoryResult<InstanceSnapshot> {
    match category {
        TypeDefCategory::Entity => repository
            .update_entity_properties(user_id, guid, properties)
            .await
            .map(InstanceSnapshot::from),
        TypeDefCategory::Relationship => repository
            .update_relationship_properties(user_id, guid, properties)
            .await
            .map(InstanceSnapshot::from),
    }
}

pub async fn re_type(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    new_type_guid: &Id,
) -> RepositoryResult<InstanceSnapshot> {
    match category {
        TypeDefCategory::Entity => repository
            .re_type_entity(user_id, guid, new_type_guid)
            .await
            .map(InstanceSnapshot::from),
        TypeDefCategory::Relationship => repository
            .re_type_relationship(user_id, guid, new_type_guid)
            .await
            .map(InstanceSnapshot::from),
    }
}

pub async fn re_identify(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    new_guid: &Id,
) -> RepositoryResult<InstanceSnapshot> {
    match category {
        TypeDefCategory::Entity => repository
            .re_identify_entity(user_id, guid, new_guid)
            .await
            .map(InstanceSnapshot::from),
        TypeDefCategory::Relationship => repository
            .re_identify_relationship(user_id, guid, new_guid)
            .await
            .map(InstanceSnapshot::from),
    }
}

pub async fn delete(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
) -> RepositoryResult<InstanceSnapshot> {
    match category {
        TypeDefCategory::Entity => repository
            .delete_entity(user_id, guid)
            .await
            .map(InstanceSnapshot::from),
        TypeDefCategory::Relationship => repository
            .delete_relationship(user_id, guid)
            .await
            .map(InstanceSnapshot::from),
    }
}

pub async fn purge(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
) -> RepositoryResult<()> {
    match category {
        TypeDefCategory::Entity => repository.purge_entity(user_id, guid).await,
        TypeDefCategory::Relationship => repository.purge_relationship(user_id, guid).await,
    }
}

pub async fn re_home(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    home_metadata_collection_id: &Id,
) -> RepositoryResult<InstanceSnapshot> {
    match category {
        TypeDefCategory::Entity => repository
            .re_home_entity(user_id, guid, home_metadata_collection_id)
            .await
            .map(InstanceSnapshot::from),
        TypeDefCategory::Relationship => repository
            .re_home_relationship(user_id, guid, home_metadata_collection_id)
            .await
            .map(InstanceSnapshot::from),
    }
}

/// Read the master from `source` and store it at `target` as a reference copy
pub async fn save_reference_copy(
    source: &dyn MetadataCollection,
    target: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
) -> RepositoryResult<()> {
    match category {
        TypeDefCategory::Entity => {
            let entity = source.get_entity_detail(user_id, guid).await?;
            target.save_entity_reference_copy(user_id, &entity).await
        }
        TypeDefCategory::Relationship => {
            let relationship = source.get_relationship(user_id, guid).await?;
            target.save_relationship_reference_copy(user_id, &relationship).await
        }
    }
}

pub async fn purge_reference_copy(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
    home_metadata_collection_id: &Id,
) -> RepositoryResult<()> {
    match category {
        TypeDefCategory::Entity => {
            repository
                .purge_entity_reference_copy(user_id, guid, home_metadata_collection_id)
                .await
        }
        TypeDefCategory::Relationship => {
            repository
                .purge_relationship_reference_copy(user_id, guid, home_metadata_collection_id)
                .await
        }
    }
}

pub async fn find_by_property(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    type_guid: Option<&Id>,
    match_properties: Option<&InstanceProperties>,
    criteria: MatchCriteria,
    page: PageRequest,
) -> RepositoryResult<Option<Vec<InstanceSnapshot>>> {
    let found = match category {
        TypeDefCategory::Entity => repository
            .find_entities_by_property(user_id, type_guid, match_properties, criteria, page)
            .await?
            .map(|hits| hits.into_iter().map(InstanceSnapshot::from).collect()),
        TypeDefCategory::Relationship => repository
            .find_relationships_by_property(user_id, type_guid, match_properties, criteria, page)
            .await?
            .map(|hits| hits.into_iter().map(InstanceSnapshot::from).collect()),
    };
    Ok(found)
}

pub async fn find_by_property_value(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    type_guid: Option<&Id>,
    search_criteria: &str,
    page: PageRequest,
) -> RepositoryResult<Option<Vec<InstanceSnapshot>>> {
    let found = match category {
        TypeDefCategory::Entity => repository
            .find_entities_by_property_value(user_id, type_guid, search_criteria, page)
            .await?
            .map(|hits| hits.into_iter().map(InstanceSnapshot::from).collect()),
        TypeDefCategory::Relationship => repository
            .find_relationships_by_property_value(user_id, type_guid, search_criteria, page)
            .await?
            .map(|hits| hits.into_iter().map(InstanceSnapshot::from).collect()),
    };
    Ok(found)
}

/// An instance that must refuse every [`Mutation`], with the arguments to try
pub struct MutationTarget<'a> {
    pub category: TypeDefCategory,
    pub guid: &'a Id,
    pub properties: &'a InstanceProperties,
    /// A type able to hold the instance; re-typing is not attempted without one
    pub new_type_guid: Option<&'a Id>,
    /// What the instance is, for messages: "proxy", "reference copy"
    pub kind: &'a str,
}

impl MutationTarget<'_> {
    /// The mutations worth attempting against this target
    pub fn mutations(&self) -> Vec<Mutation> {
        Mutation::EVERY
            .into_iter()
            .filter(|mutation| *mutation != Mutation::ReType || self.new_type_guid.is_some())
            .collect()
    }
}

pub async fn attempt_mutation(
    repository: &dyn MetadataCollection,
    user_id: &str,
    target: &MutationTarget<'_>,
    mutation: Mutation,
) -> RepositoryResult<InstanceSnapshot> {
    let (category, guid) = (target.category, target.guid);
    match mutation {
        Mutation::Status => update_status(repository, user_id, category, guid, InstanceStatus::Draft).await,
        Mutation::Properties => {
            update_properties(repository, user_id, category, guid, target.properties.clone()).await
        }
        Mutation::ReType => match target.new_type_guid {
            Some(new_type_guid) => re_type(repository, user_id, category, guid, new_type_guid).await,
            None => Err(RepositoryError::TypeError {
                message: format!("no type can take {} {}", target.kind, guid),
            }),
        },
        Mutation::ReIdentify => re_identify(repository, user_id, category, guid, &generate_id()).await,
    }
}

/// Try every mutation against `target` and record whether each was refused.
/// A mutation that succeeds fails the assertion and stops the remaining checks.
pub async fn verify_mutations_rejected(
    repository: &dyn MetadataCollection,
    user_id: &str,
    target: &MutationTarget<'_>,
    report: &mut ConformanceReport,
    ids: &mut AssertionIds,
    requirement: Requirement,
) -> Result<(), HarnessError> {
    if target.new_type_guid.is_none() {
        log::info!("no compatible type to re-type {} {} to; skipping re-type", target.kind, target.guid);
    }
    for mutation in target.mutations() {
        let context = OperationContext::new(
            mutation.operation(target.category),
            format!("attempting to change a {}", target.kind),
        )
        .param("guid", target.guid)
        .param("metadataCollectionId", repository.metadata_collection_id());
        let result = attempt_mutation(repository, user_id, target, mutation).await;
        match expect_rejection(&context, result)? {
            Rejection::Rejected => {
                report.assert_condition(
                    true,
                    &ids.next(),
                    format!("{} was refused for {} {}", context.operation(), target.kind, target.guid),
                    requirement,
                    Some(context.timing()),
                )?;
            }
            Rejection::NotSupported => {
                report.add_not_supported(&ids.next(), context.operation(), requirement);
            }
            Rejection::Accepted => {
                report.assert_condition(
                    false,
                    &ids.next(),
                    format!("{} changed {} {}", context.operation(), target.kind, target.guid),
                    requirement,
                    Some(context.timing()),
                )?;
            }
        }
    }
    Ok(())
}

/// Delete then purge a master instance, tolerating outcomes that mean it is
/// already gone or that soft delete is unavailable. Other errors are faults.
pub async fn cleanup_master(
    repository: &dyn MetadataCollection,
    user_id: &str,
    category: TypeDefCategory,
    guid: &Id,
) -> Result<(), HarnessError> {
    let context = OperationContext::new("deleteAndPurge", "removing an instance created by the test")
        .param("category", format!("{:?}", category))
        .param("guid", guid)
        .param("metadataCollectionId", repository.metadata_collection_id());

    match delete(repository, user_id, category, guid).await {
        Ok(_) => {}
        Err(e @ RepositoryError::NotSupported { .. }) | Err(e @ RepositoryError::AlreadyDeleted { .. }) => {
            log::debug!("tolerated during cleanup of {}: {}", guid, e);
        }
        Err(e) if e.class() == ErrorClass::NotKnown => {
            log::debug!("{} already gone before cleanup", guid);
            return Ok(());
        }
        Err(e) => return Err(context.fault(e)),
    }

    match purge(repository, user_id, category, guid).await {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.class(), ErrorClass::NotKnown | ErrorClass::CapabilityGap) => {
            log::debug!("tolerated during purge of {}: {}", guid, e);
            Ok(())
        }
        Err(e) => Err(context.fault(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PrimitiveCategory, TypedAttribute};
    use crate::store::{Capabilities, InMemoryRepository};
    use std::sync::Arc;

    const USER: &str = "tester";

    fn asset() -> TypeDef {
        TypeDef::entity("t-asset", "Asset").with_attribute(TypedAttribute::new("name", PrimitiveCategory::String))
    }

    fn link() -> TypeDef {
        TypeDef::relationship("t-link", "AssetLink", "Asset", "Asset")
    }

    fn repo(capabilities: Capabilities) -> Arc<InMemoryRepository> {
        Arc::new(InMemoryRepository::new("tut", "tut", vec![asset(), link()]).with_capabilities(capabilities))
    }

    #[tokio::test]
    async fn test_dispatch_by_category() {
        let repo = repo(Capabilities::default());
        let one = add_instance(repo.as_ref(), USER, &asset(), None, None).await.unwrap();
        let two = add_instance(repo.as_ref(), USER, &asset(), None, None).await.unwrap();
        let relationship = add_instance(
            repo.as_ref(),
            USER,
            &link(),
            None,
            Some((&one.header.guid, &two.header.guid)),
        )
        .await
        .unwrap();
        assert_eq!(relationship.category, TypeDefCategory::Relationship);
        assert_eq!(relationship.ends, Some((one.header.guid.clone(), two.header.guid.clone())));

        let fetched = get_instance(repo.as_ref(), USER, TypeDefCategory::Relationship, &relationship.header.guid)
            .await
            .unwrap();
        assert_eq!(fetched, relationship);

        let missing_ends = add_instance(repo.as_ref(), USER, &link(), None, None).await.unwrap_err();
        assert_eq!(missing_ends.class(), ErrorClass::InvalidParameter);
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_soft_delete() {
        let repo = repo(Capabilities {
            soft_delete: false,
            ..Capabilities::default()
        });
        let entity = add_instance(repo.as_ref(), USER, &asset(), None, None).await.unwrap();
        cleanup_master(repo.as_ref(), USER, TypeDefCategory::Entity, &entity.header.guid)
            .await
            .unwrap();
        assert_eq!(repo.entity_count(), 0);

        // A second cleanup finds nothing and still succeeds
        cleanup_master(repo.as_ref(), USER, TypeDefCategory::Entity, &entity.header.guid)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_after_delete() {
        let repo = repo(Capabilities::default());
        let entity = add_instance(repo.as_ref(), USER, &asset(), None, None).await.unwrap();
        delete(repo.as_ref(), USER, TypeDefCategory::Entity, &entity.header.guid)
            .await
            .unwrap();
        cleanup_master(repo.as_ref(), USER, TypeDefCategory::Entity, &entity.header.guid)
            .await
            .unwrap();
        assert_eq!(repo.entity_count(), 0);
    }

    #[test]
    fn test_rejection_classification() {
        let context = OperationContext::new("updateEntityStatus", "changing a proxy").param("guid", "e1");
        let rejected: RepositoryResult<()> = Err(RepositoryError::invalid("updateEntityStatus", "proxy"));
        assert_eq!(expect_rejection(&context, rejected).unwrap(), Rejection::Rejected);

        let gap: RepositoryResult<()> = Err(RepositoryError::NotSupported {
            operation: "updateEntityStatus".into(),
            metadata_collection_id: "tut".into(),
        });
        assert_eq!(expect_rejection(&context, gap).unwrap(), Rejection::NotSupported);
        assert_eq!(expect_rejection(&context, Ok(())).unwrap(), Rejection::Accepted);

        let invalid_property: RepositoryResult<()> = Err(RepositoryError::PropertyError {
            message: "property rows is not defined for type Asset".into(),
        });
        assert!(matches!(
            expect_rejection(&context, invalid_property),
            Err(HarnessError::OperationFault(_))
        ));

        let fault: RepositoryResult<()> = Err(RepositoryError::RepositoryFault { message: "down".into() });
        match expect_rejection(&context, fault).unwrap_err() {
            HarnessError::OperationFault(fault) => {
                assert_eq!(fault.operation, "updateEntityStatus");
                assert_eq!(fault.parameters["guid"], "e1");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_re_type_of_a_mutable_master_is_never_a_refusal() {
        let table = TypeDef::entity("t-table", "Table")
            .with_super_type("Asset")
            .with_attribute(TypedAttribute::new("rows", PrimitiveCategory::Long));
        let tag = TypeDef::entity("t-tag", "Tag").with_attribute(TypedAttribute::new("label", PrimitiveCategory::String));
        let repo = InMemoryRepository::new("tut", "tut", vec![asset(), table.clone(), tag.clone()]);

        let mut properties = InstanceProperties::new();
        properties.insert("rows".to_string(), crate::model::PrimitiveValue::Long(2000));
        let master = add_instance(&repo, USER, &table, Some(properties.clone()), None).await.unwrap();
        let guid = master.header.guid.clone();

        // The target type cannot hold the properties: a validation fault, not a lock
        let incompatible = tag.guid.clone();
        let target = MutationTarget {
            category: TypeDefCategory::Entity,
            guid: &guid,
            properties: &properties,
            new_type_guid: Some(&incompatible),
            kind: "master",
        };
        let context = OperationContext::new("reTypeEntity", "re-typing a master").param("guid", &guid);
        let result = attempt_mutation(&repo, USER, &target, Mutation::ReType).await;
        assert!(matches!(&result, Err(e) if e.class() == ErrorClass::Validation));
        assert!(matches!(
            expect_rejection(&context, result),
            Err(HarnessError::OperationFault(_))
        ));

        // A compatible type goes through on a master
        let compatible = asset().guid;
        let properties = InstanceProperties::new();
        let untyped = add_instance(&repo, USER, &table, None, None).await.unwrap();
        let target = MutationTarget {
            category: TypeDefCategory::Entity,
            guid: &untyped.header.guid,
            properties: &properties,
            new_type_guid: Some(&compatible),
            kind: "master",
        };
        let result = attempt_mutation(&repo, USER, &target, Mutation::ReType).await;
        assert_eq!(expect_rejection(&context, result).unwrap(), Rejection::Accepted);
    }

    #[test]
    fn test_re_type_is_skipped_without_a_compatible_type() {
        let guid = "e1".to_string();
        let properties = InstanceProperties::new();
        let target = MutationTarget {
            category: TypeDefCategory::Entity,
            guid: &guid,
            properties: &properties,
            new_type_guid: None,
            kind: "reference copy",
        };
        assert_eq!(
            target.mutations(),
            vec![Mutation::Status, Mutation::Properties, Mutation::ReIdentify]
        );
    }
}
