use crate::model::{
    EntityDetail, EntityProxy, EntitySummary, Id, InstanceProperties, InstanceStatus,
    MatchCriteria, PageRequest, Relationship, TypeDef,
};
use crate::store::error::RepositoryResult;

/// Identity of a metadata collection and the type definitions it supports
#[async_trait::async_trait]
pub trait TypeDefStore: Send + Sync {
    fn metadata_collection_id(&self) -> &str;
    async fn get_all_type_defs(&self, user_id: &str) -> RepositoryResult<Vec<TypeDef>>;
}

#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    async fn add_entity(
        &self,
        user_id: &str,
        type_guid: &Id,
        properties: Option<InstanceProperties>,
    ) -> RepositoryResult<EntityDetail>;
    async fn add_entity_proxy(&self, user_id: &str, proxy: &EntityProxy) -> RepositoryResult<()>;
    /// Fails with `EntityProxyOnly` when only a proxy is held
    async fn get_entity_detail(&self, user_id: &str, guid: &Id) -> RepositoryResult<EntityDetail>;
    /// Works for full entities and proxies alike
    async fn get_entity_summary(&self, user_id: &str, guid: &Id) -> RepositoryResult<EntitySummary>;
    /// Detail of a full entity, or `None` when unknown or held only as a proxy
    async fn is_entity_known(&self, user_id: &str, guid: &Id) -> RepositoryResult<Option<EntityDetail>>;
    async fn update_entity_status(
        &self,
        user_id: &str,
        guid: &Id,
        new_status: InstanceStatus,
    ) -> RepositoryResult<EntityDetail>;
    async fn update_entity_properties(
        &self,
        user_id: &str,
        guid: &Id,
        properties: InstanceProperties,
    ) -> RepositoryResult<EntityDetail>;
    async fn re_type_entity(
        &self,
        user_id: &str,
        guid: &Id,
        new_type_guid: &Id,
    ) -> RepositoryResult<EntityDetail>;
    async fn re_identify_entity(
        &self,
        user_id: &str,
        guid: &Id,
        new_guid: &Id,
    ) -> RepositoryResult<EntityDetail>;
    /// Soft delete; relationships attached to the entity are deleted with it
    async fn delete_entity(&self, user_id: &str, guid: &Id) -> RepositoryResult<EntityDetail>;
    /// Hard delete of a previously deleted entity
    async fn purge_entity(&self, user_id: &str, guid: &Id) -> RepositoryResult<()>;
    /// Take over ownership of a reference copy held here
    async fn re_home_entity(
        &self,
        user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<EntityDetail>;
}

#[async_trait::async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn add_relationship(
        &self,
        user_id: &str,
        type_guid: &Id,
        properties: Option<InstanceProperties>,
        entity_one_guid: &Id,
        entity_two_guid: &Id,
    ) -> RepositoryResult<Relationship>;
    async fn get_relationship(&self, user_id: &str, guid: &Id) -> RepositoryResult<Relationship>;
    async fn is_relationship_known(&self, user_id: &str, guid: &Id) -> RepositoryResult<Option<Relationship>>;
    async fn update_relationship_status(
        &self,
        user_id: &str,
        guid: &Id,
        new_status: InstanceStatus,
    ) -> RepositoryResult<Relationship>;
    async fn update_relationship_properties(
        &self,
        user_id: &str,
        guid: &Id,
        properties: InstanceProperties,
    ) -> RepositoryResult<Relationship>;
    async fn re_type_relationship(
        &self,
        user_id: &str,
        guid: &Id,
        new_type_guid: &Id,
    ) -> RepositoryResult<Relationship>;
    async fn re_identify_relationship(
        &self,
        user_id: &str,
        guid: &Id,
        new_guid: &Id,
    ) -> RepositoryResult<Relationship>;
    async fn delete_relationship(&self, user_id: &str, guid: &Id) -> RepositoryResult<Relationship>;
    async fn purge_relationship(&self, user_id: &str, guid: &Id) -> RepositoryResult<()>;
    async fn re_home_relationship(
        &self,
        user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<Relationship>;
}

/// Storage of instances mastered by another metadata collection
#[async_trait::async_trait]
pub trait ReferenceCopyStore: Send + Sync {
    async fn save_entity_reference_copy(&self, user_id: &str, entity: &EntityDetail) -> RepositoryResult<()>;
    /// Removes a reference copy or a proxy
    async fn purge_entity_reference_copy(
        &self,
        user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<()>;
    async fn save_relationship_reference_copy(
        &self,
        user_id: &str,
        relationship: &Relationship,
    ) -> RepositoryResult<()>;
    async fn purge_relationship_reference_copy(
        &self,
        user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<()>;
}

/// Property searches. A `None` type filter searches every type; an explicit
/// type guid covers that type and its subtypes. String match values and
/// search criteria are regular expressions that must match a whole value.
/// An empty result is reported as `None`.
#[async_trait::async_trait]
pub trait SearchStore: Send + Sync {
    async fn find_entities_by_property(
        &self,
        user_id: &str,
        type_guid: Option<&Id>,
        match_properties: Option<&InstanceProperties>,
        match_criteria: MatchCriteria,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<EntityDetail>>>;
    async fn find_entities_by_property_value(
        &self,
        user_id: &str,
        type_guid: Option<&Id>,
        search_criteria: &str,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<EntityDetail>>>;
    async fn find_relationships_by_property(
        &self,
        user_id: &str,
        type_guid: Option<&Id>,
        match_properties: Option<&InstanceProperties>,
        match_criteria: MatchCriteria,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<Relationship>>>;
    async fn find_relationships_by_property_value(
        &self,
        user_id: &str,
        type_guid: Option<&Id>,
        search_criteria: &str,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<Relationship>>>;
}

pub trait MetadataCollection:
    TypeDefStore + EntityStore + RelationshipStore + ReferenceCopyStore + SearchStore + Send + Sync
{
}

impl<T> MetadataCollection for T where
    T: TypeDefStore + EntityStore + RelationshipStore + ReferenceCopyStore + SearchStore + Send + Sync
{
}
