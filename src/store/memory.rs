use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use crate::logic::match_criteria::{full_match_regex, MatchEvaluator};
use crate::model::{
    generate_id, EntityDetail, EntityProxy, EntitySummary, Id, InstanceHeader, InstanceProperties,
    InstanceStatus, MatchCriteria, PageRequest, PrimitiveValue, Relationship, TypeDef,
    TypeDefCategory, TypeRegistry,
};
use crate::store::error::{RepositoryError, RepositoryResult};
use crate::store::traits::{EntityStore, ReferenceCopyStore, RelationshipStore, SearchStore, TypeDefStore};

/// Optional operations a repository may decline with `NotSupported`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub entity_proxies: bool,
    pub reference_copies: bool,
    pub re_home: bool,
    pub soft_delete: bool,
    pub status_updates: bool,
    pub property_updates: bool,
    pub re_type: bool,
    pub re_identify: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            entity_proxies: true,
            reference_copies: true,
            re_home: true,
            soft_delete: true,
            status_updates: true,
            property_updates: true,
            re_type: true,
            re_identify: true,
        }
    }
}

/// Deliberate contract violations, for checking that the harness reports them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Defects {
    /// Reference copies and proxies accept changes like masters do
    pub mutable_copies: bool,
    /// Purges announced by a master's home leave the local copy in place
    pub retained_copies: bool,
    /// Every property search is evaluated as ANY
    pub loose_match_criteria: bool,
}

#[derive(Debug, Clone)]
enum StoredEntity {
    Detail(EntityDetail),
    Proxy(EntityProxy),
}

impl StoredEntity {
    fn header(&self) -> &InstanceHeader {
        match self {
            StoredEntity::Detail(entity) => &entity.header,
            StoredEntity::Proxy(proxy) => &proxy.header,
        }
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    // BTreeMaps keep search paging stable across repeated queries
    entities: BTreeMap<Id, StoredEntity>,
    relationships: BTreeMap<Id, Relationship>,
}

/// Change to a master instance, delivered to linked replicas as a reference copy update
#[derive(Debug, Clone)]
enum ReplicaEvent {
    EntitySaved(EntityDetail),
    EntityPurged { guid: Id },
    RelationshipSaved(Relationship),
    RelationshipPurged { guid: Id },
}

/// In-memory metadata collection implementing the full repository contract.
///
/// Serves as the reference (CTS) repository and as a self-test subject.
/// Replica links deliver master changes synchronously to other in-memory
/// repositories, which hold them as reference copies.
#[derive(Debug)]
pub struct InMemoryRepository {
    metadata_collection_id: Id,
    metadata_collection_name: String,
    types: TypeRegistry,
    capabilities: Capabilities,
    defects: Defects,
    state: RwLock<RepositoryState>,
    replicas: RwLock<Vec<Weak<InMemoryRepository>>>,
}

impl InMemoryRepository {
    pub fn new(
        metadata_collection_id: impl Into<Id>,
        metadata_collection_name: impl Into<String>,
        type_defs: impl IntoIterator<Item = TypeDef>,
    ) -> Self {
        Self {
            metadata_collection_id: metadata_collection_id.into(),
            metadata_collection_name: metadata_collection_name.into(),
            types: TypeRegistry::new(type_defs),
            capabilities: Capabilities::default(),
            defects: Defects::default(),
            state: RwLock::new(RepositoryState::default()),
            replicas: RwLock::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_defects(mut self, defects: Defects) -> Self {
        self.defects = defects;
        self
    }

    pub fn metadata_collection_name(&self) -> &str {
        &self.metadata_collection_name
    }

    /// Deliver future master changes made here to `replica`
    pub fn link_replica(&self, replica: &Arc<InMemoryRepository>) {
        self.replicas.write().push(Arc::downgrade(replica));
    }

    /// Link two repositories in both directions
    pub fn link_peers(a: &Arc<InMemoryRepository>, b: &Arc<InMemoryRepository>) {
        a.link_replica(b);
        b.link_replica(a);
    }

    /// Number of entities (details and proxies) currently held
    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.state.read().relationships.len()
    }

    fn publish(&self, events: Vec<ReplicaEvent>) {
        let replicas: Vec<Arc<InMemoryRepository>> = self
            .replicas
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for replica in replicas {
            for event in &events {
                replica.receive(event.clone());
            }
        }
    }

    fn receive(&self, event: ReplicaEvent) {
        let mut state = self.state.write();
        match event {
            ReplicaEvent::EntitySaved(entity) => {
                if !self.capabilities.reference_copies
                    || entity.header.is_homed_in(&self.metadata_collection_id)
                {
                    return;
                }
                log::debug!(
                    "{} stores reference copy of entity {}",
                    self.metadata_collection_id,
                    entity.header.guid
                );
                state
                    .entities
                    .insert(entity.header.guid.clone(), StoredEntity::Detail(entity));
            }
            ReplicaEvent::EntityPurged { .. } | ReplicaEvent::RelationshipPurged { .. }
                if self.defects.retained_copies =>
            {
                log::debug!("{} ignores a purge notice", self.metadata_collection_id);
            }
            ReplicaEvent::EntityPurged { guid } => {
                let is_copy = state
                    .entities
                    .get(&guid)
                    .map(|stored| !stored.header().is_homed_in(&self.metadata_collection_id))
                    .unwrap_or(false);
                if is_copy {
                    state.entities.remove(&guid);
                    let mcid = &self.metadata_collection_id;
                    state.relationships.retain(|_, relationship| {
                        relationship.header.is_homed_in(mcid) || !Self::touches(relationship, &guid)
                    });
                }
            }
            ReplicaEvent::RelationshipSaved(relationship) => {
                if !self.capabilities.reference_copies
                    || relationship.header.is_homed_in(&self.metadata_collection_id)
                {
                    return;
                }
                for end in [&relationship.entity_one, &relationship.entity_two] {
                    state
                        .entities
                        .entry(end.header.guid.clone())
                        .or_insert_with(|| StoredEntity::Proxy(end.clone()));
                }
                state
                    .relationships
                    .insert(relationship.header.guid.clone(), relationship);
            }
            ReplicaEvent::RelationshipPurged { guid } => {
                let is_copy = state
                    .relationships
                    .get(&guid)
                    .map(|r| !r.header.is_homed_in(&self.metadata_collection_id))
                    .unwrap_or(false);
                if is_copy {
                    state.relationships.remove(&guid);
                }
            }
        }
    }

    fn touches(relationship: &Relationship, entity_guid: &str) -> bool {
        relationship.entity_one.header.guid == entity_guid
            || relationship.entity_two.header.guid == entity_guid
    }

    fn require(&self, enabled: bool, operation: &str) -> RepositoryResult<()> {
        if enabled {
            Ok(())
        } else {
            Err(RepositoryError::NotSupported {
                operation: operation.to_string(),
                metadata_collection_id: self.metadata_collection_id.clone(),
            })
        }
    }

    fn type_of_category(&self, type_guid: &Id, category: TypeDefCategory) -> RepositoryResult<&TypeDef> {
        match self.types.get_by_guid(type_guid) {
            Some(type_def) if type_def.category == category => Ok(type_def),
            Some(type_def) => Err(RepositoryError::TypeError {
                message: format!("type {} is not a {:?} type", type_def.name, category),
            }),
            None => Err(RepositoryError::TypeError {
                message: format!("type guid {} is not known", type_guid),
            }),
        }
    }

    fn validate_properties(&self, type_name: &str, properties: &InstanceProperties) -> RepositoryResult<()> {
        let attributes = self.types.all_attributes(type_name);
        for (name, value) in properties {
            match attributes.iter().find(|attribute| &attribute.name == name) {
                Some(attribute) if value.fits(attribute.category) => {}
                Some(attribute) => {
                    return Err(RepositoryError::PropertyError {
                        message: format!(
                            "property {} of type {} expects {:?} but got {:?}",
                            name,
                            type_name,
                            attribute.category,
                            value.category()
                        ),
                    })
                }
                None => {
                    return Err(RepositoryError::PropertyError {
                        message: format!("property {} is not defined for type {}", name, type_name),
                    })
                }
            }
        }
        Ok(())
    }

    fn unique_attributes(&self, type_name: &str) -> Vec<String> {
        self.types
            .all_attributes(type_name)
            .into_iter()
            .filter(|attribute| attribute.unique)
            .map(|attribute| attribute.name)
            .collect()
    }

    fn new_header(&self, type_def: &TypeDef, user_id: &str) -> InstanceHeader {
        InstanceHeader::new(
            generate_id(),
            type_def.guid.clone(),
            type_def.name.clone(),
            self.metadata_collection_id.clone(),
            user_id,
        )
    }

    /// Apply `change` to a locally mastered, live entity. The change works on a
    /// copy so a failed validation leaves the stored entity untouched.
    fn mutate_entity<F>(&self, operation: &str, user_id: &str, guid: &Id, change: F) -> RepositoryResult<EntityDetail>
    where
        F: FnOnce(&mut EntityDetail) -> RepositoryResult<()>,
    {
        let updated = {
            let mut state = self.state.write();
            let entity = match state.entities.get_mut(guid) {
                None => return Err(RepositoryError::EntityNotKnown { guid: guid.clone() }),
                Some(StoredEntity::Proxy(proxy)) if self.defects.mutable_copies => {
                    let mut candidate = EntityDetail {
                        header: proxy.header.clone(),
                        properties: proxy.unique_properties.clone(),
                    };
                    change(&mut candidate)?;
                    candidate.header.touch(user_id);
                    proxy.header = candidate.header.clone();
                    proxy.unique_properties = candidate.properties.clone();
                    return Ok(candidate);
                }
                Some(StoredEntity::Proxy(_)) => {
                    return Err(RepositoryError::invalid(
                        operation,
                        format!("entity {} is a proxy and cannot be changed", guid),
                    ))
                }
                Some(StoredEntity::Detail(entity)) => entity,
            };
            self.check_master(operation, &entity.header)?;

            let mut candidate = entity.clone();
            change(&mut candidate)?;
            candidate.header.touch(user_id);
            *entity = candidate.clone();
            candidate
        };
        self.publish(vec![ReplicaEvent::EntitySaved(updated.clone())]);
        Ok(updated)
    }

    fn mutate_relationship<F>(
        &self,
        operation: &str,
        user_id: &str,
        guid: &Id,
        change: F,
    ) -> RepositoryResult<Relationship>
    where
        F: FnOnce(&mut Relationship) -> RepositoryResult<()>,
    {
        let updated = {
            let mut state = self.state.write();
            let relationship = state
                .relationships
                .get_mut(guid)
                .ok_or_else(|| RepositoryError::RelationshipNotKnown { guid: guid.clone() })?;
            self.check_master(operation, &relationship.header)?;

            let mut candidate = relationship.clone();
            change(&mut candidate)?;
            candidate.header.touch(user_id);
            *relationship = candidate.clone();
            candidate
        };
        self.publish(vec![ReplicaEvent::RelationshipSaved(updated.clone())]);
        Ok(updated)
    }

    fn check_master(&self, operation: &str, header: &InstanceHeader) -> RepositoryResult<()> {
        if !header.is_homed_in(&self.metadata_collection_id) && !self.defects.mutable_copies {
            return Err(RepositoryError::invalid(
                operation,
                format!(
                    "instance {} is a reference copy; only its home {} may change it",
                    header.guid, header.metadata_collection_id
                ),
            ));
        }
        if header.status == InstanceStatus::Deleted {
            return Err(RepositoryError::invalid(
                operation,
                format!("instance {} is deleted", header.guid),
            ));
        }
        Ok(())
    }

    fn check_status(operation: &str, new_status: InstanceStatus) -> RepositoryResult<()> {
        if new_status == InstanceStatus::Deleted {
            return Err(RepositoryError::invalid(
                operation,
                "status DELETED can only be set through a delete request",
            ));
        }
        Ok(())
    }

    fn type_filter(&self, type_guid: Option<&Id>, category: TypeDefCategory) -> RepositoryResult<Option<Vec<String>>> {
        match type_guid {
            None => Ok(None),
            Some(guid) => {
                let type_def = self.type_of_category(guid, category)?;
                Ok(Some(self.types.subtypes_of(&type_def.name)))
            }
        }
    }

    fn compile_search(&self, operation: &str, pattern: &str) -> RepositoryResult<Regex> {
        full_match_regex(pattern).map_err(|e| {
            RepositoryError::invalid(operation, format!("search criteria {} is not a valid regex: {}", pattern, e))
        })
    }

    fn compile_match_properties(
        &self,
        operation: &str,
        match_properties: Option<&InstanceProperties>,
        allowed_types: Option<&[String]>,
    ) -> RepositoryResult<HashMap<String, Regex>> {
        let mut compiled = HashMap::new();
        let Some(match_properties) = match_properties else {
            return Ok(compiled);
        };

        // The first allowed type is the one named in the request
        if let Some(type_name) = allowed_types.and_then(|types| types.first()) {
            let attributes = self.types.all_attributes(type_name);
            for name in match_properties.keys() {
                if !attributes.iter().any(|attribute| &attribute.name == name) {
                    return Err(RepositoryError::PropertyError {
                        message: format!("property {} is not defined for type {}", name, type_name),
                    });
                }
            }
        }

        for value in match_properties.values() {
            if let PrimitiveValue::String(pattern) = value {
                let regex = self.compile_search(operation, pattern)?;
                compiled.insert(pattern.clone(), regex);
            }
        }
        Ok(compiled)
    }

    fn searchable(header: &InstanceHeader, allowed_types: Option<&[String]>) -> bool {
        header.status != InstanceStatus::Deleted
            && allowed_types
                .map(|types| types.contains(&header.type_name))
                .unwrap_or(true)
    }

    fn property_matches(
        properties: &InstanceProperties,
        match_properties: Option<&InstanceProperties>,
        criteria: MatchCriteria,
        regexes: &HashMap<String, Regex>,
    ) -> bool {
        MatchEvaluator::satisfies_with(properties, match_properties, criteria, |expected, actual| {
            match (expected, actual) {
                (PrimitiveValue::String(pattern), PrimitiveValue::String(value)) => regexes
                    .get(pattern)
                    .map(|regex| regex.is_match(value))
                    .unwrap_or(false),
                (expected, actual) => expected == actual,
            }
        })
    }

    fn effective_criteria(&self, requested: MatchCriteria) -> MatchCriteria {
        if self.defects.loose_match_criteria {
            MatchCriteria::Any
        } else {
            requested
        }
    }

    fn end_proxy(&self, state: &RepositoryState, guid: &Id) -> RepositoryResult<EntityProxy> {
        match state.entities.get(guid) {
            None => Err(RepositoryError::EntityNotKnown { guid: guid.clone() }),
            Some(stored) if stored.header().status == InstanceStatus::Deleted => Err(RepositoryError::invalid(
                "addRelationship",
                format!("end entity {} is deleted", guid),
            )),
            Some(StoredEntity::Proxy(proxy)) => Ok(proxy.clone()),
            Some(StoredEntity::Detail(entity)) => {
                Ok(entity.to_proxy(&self.unique_attributes(&entity.header.type_name)))
            }
        }
    }

    fn page_or_none<T>(page: PageRequest, items: Vec<T>) -> Option<Vec<T>> {
        let page = page.apply(items);
        if page.is_empty() {
            None
        } else {
            Some(page)
        }
    }
}

#[async_trait::async_trait]
impl TypeDefStore for InMemoryRepository {
    fn metadata_collection_id(&self) -> &str {
        &self.metadata_collection_id
    }

    async fn get_all_type_defs(&self, _user_id: &str) -> RepositoryResult<Vec<TypeDef>> {
        Ok(self.types.all().cloned().collect())
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryRepository {
    async fn add_entity(
        &self,
        user_id: &str,
        type_guid: &Id,
        properties: Option<InstanceProperties>,
    ) -> RepositoryResult<EntityDetail> {
        let type_def = self.type_of_category(type_guid, TypeDefCategory::Entity)?;
        let properties = properties.unwrap_or_default();
        self.validate_properties(&type_def.name, &properties)?;

        let entity = EntityDetail {
            header: self.new_header(type_def, user_id),
            properties,
        };
        self.state
            .write()
            .entities
            .insert(entity.header.guid.clone(), StoredEntity::Detail(entity.clone()));
        self.publish(vec![ReplicaEvent::EntitySaved(entity.clone())]);
        Ok(entity)
    }

    async fn add_entity_proxy(&self, _user_id: &str, proxy: &EntityProxy) -> RepositoryResult<()> {
        self.require(self.capabilities.entity_proxies, "addEntityProxy")?;
        if proxy.header.is_homed_in(&self.metadata_collection_id) {
            return Err(RepositoryError::invalid(
                "addEntityProxy",
                format!("entity {} is homed here and cannot be added as a proxy", proxy.header.guid),
            ));
        }
        self.type_of_category(&proxy.header.type_guid, TypeDefCategory::Entity)?;

        self.state
            .write()
            .entities
            .entry(proxy.header.guid.clone())
            .or_insert_with(|| StoredEntity::Proxy(proxy.clone()));
        Ok(())
    }

    async fn get_entity_detail(&self, _user_id: &str, guid: &Id) -> RepositoryResult<EntityDetail> {
        match self.state.read().entities.get(guid) {
            Some(StoredEntity::Detail(entity)) => Ok(entity.clone()),
            Some(StoredEntity::Proxy(_)) => Err(RepositoryError::EntityProxyOnly { guid: guid.clone() }),
            None => Err(RepositoryError::EntityNotKnown { guid: guid.clone() }),
        }
    }

    async fn get_entity_summary(&self, _user_id: &str, guid: &Id) -> RepositoryResult<EntitySummary> {
        self.state
            .read()
            .entities
            .get(guid)
            .map(|stored| EntitySummary {
                header: stored.header().clone(),
            })
            .ok_or_else(|| RepositoryError::EntityNotKnown { guid: guid.clone() })
    }

    async fn is_entity_known(&self, _user_id: &str, guid: &Id) -> RepositoryResult<Option<EntityDetail>> {
        match self.state.read().entities.get(guid) {
            Some(StoredEntity::Detail(entity)) => Ok(Some(entity.clone())),
            _ => Ok(None),
        }
    }

    async fn update_entity_status(
        &self,
        user_id: &str,
        guid: &Id,
        new_status: InstanceStatus,
    ) -> RepositoryResult<EntityDetail> {
        const OPERATION: &str = "updateEntityStatus";
        self.require(self.capabilities.status_updates, OPERATION)?;
        self.mutate_entity(OPERATION, user_id, guid, |entity| {
            Self::check_status(OPERATION, new_status)?;
            entity.header.status = new_status;
            Ok(())
        })
    }

    async fn update_entity_properties(
        &self,
        user_id: &str,
        guid: &Id,
        properties: InstanceProperties,
    ) -> RepositoryResult<EntityDetail> {
        const OPERATION: &str = "updateEntityProperties";
        self.require(self.capabilities.property_updates, OPERATION)?;
        self.mutate_entity(OPERATION, user_id, guid, |entity| {
            self.validate_properties(&entity.header.type_name, &properties)?;
            entity.properties = properties;
            Ok(())
        })
    }

    async fn re_type_entity(&self, user_id: &str, guid: &Id, new_type_guid: &Id) -> RepositoryResult<EntityDetail> {
        const OPERATION: &str = "reTypeEntity";
        self.require(self.capabilities.re_type, OPERATION)?;
        self.mutate_entity(OPERATION, user_id, guid, |entity| {
            let new_type = self.type_of_category(new_type_guid, TypeDefCategory::Entity)?;
            self.validate_properties(&new_type.name, &entity.properties)?;
            entity.header.type_guid = new_type.guid.clone();
            entity.header.type_name = new_type.name.clone();
            Ok(())
        })
    }

    async fn re_identify_entity(&self, user_id: &str, guid: &Id, new_guid: &Id) -> RepositoryResult<EntityDetail> {
        const OPERATION: &str = "reIdentifyEntity";
        self.require(self.capabilities.re_identify, OPERATION)?;
        if self.state.read().entities.contains_key(new_guid) {
            return Err(RepositoryError::invalid(
                OPERATION,
                format!("guid {} is already in use", new_guid),
            ));
        }
        let updated = self.mutate_entity(OPERATION, user_id, guid, |entity| {
            entity.header.guid = new_guid.clone();
            Ok(())
        })?;

        let mut events = vec![ReplicaEvent::EntityPurged { guid: guid.clone() }];
        {
            let mut state = self.state.write();
            if let Some(stored) = state.entities.remove(guid) {
                state.entities.insert(new_guid.clone(), stored);
            }
            let unique = self.unique_attributes(&updated.header.type_name);
            for relationship in state.relationships.values_mut() {
                let mut changed = false;
                for end in [&mut relationship.entity_one, &mut relationship.entity_two] {
                    if &end.header.guid == guid {
                        *end = updated.to_proxy(&unique);
                        changed = true;
                    }
                }
                if changed && relationship.header.is_homed_in(&self.metadata_collection_id) {
                    events.push(ReplicaEvent::RelationshipSaved(relationship.clone()));
                }
            }
        }
        events.push(ReplicaEvent::EntitySaved(updated.clone()));
        self.publish(events);
        Ok(updated)
    }

    async fn delete_entity(&self, user_id: &str, guid: &Id) -> RepositoryResult<EntityDetail> {
        const OPERATION: &str = "deleteEntity";
        self.require(self.capabilities.soft_delete, OPERATION)?;
        {
            let state = self.state.read();
            match state.entities.get(guid) {
                Some(stored) if stored.header().status == InstanceStatus::Deleted => {
                    return Err(RepositoryError::AlreadyDeleted { guid: guid.clone() })
                }
                Some(_) => {}
                None => return Err(RepositoryError::EntityNotKnown { guid: guid.clone() }),
            }
        }

        let deleted = self.mutate_entity(OPERATION, user_id, guid, |entity| {
            entity.header.status = InstanceStatus::Deleted;
            Ok(())
        })?;

        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            for relationship in state.relationships.values_mut() {
                if Self::touches(relationship, guid)
                    && relationship.header.is_homed_in(&self.metadata_collection_id)
                    && relationship.header.status != InstanceStatus::Deleted
                {
                    relationship.header.status = InstanceStatus::Deleted;
                    relationship.header.touch(user_id);
                    events.push(ReplicaEvent::RelationshipSaved(relationship.clone()));
                }
            }
        }
        self.publish(events);
        Ok(deleted)
    }

    async fn purge_entity(&self, _user_id: &str, guid: &Id) -> RepositoryResult<()> {
        const OPERATION: &str = "purgeEntity";
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            match state.entities.get(guid) {
                None => return Err(RepositoryError::EntityNotKnown { guid: guid.clone() }),
                Some(StoredEntity::Proxy(_)) => {
                    return Err(RepositoryError::invalid(
                        OPERATION,
                        format!("entity {} is a proxy; purge it as a reference copy", guid),
                    ))
                }
                Some(StoredEntity::Detail(entity)) => {
                    if !entity.header.is_homed_in(&self.metadata_collection_id) {
                        return Err(RepositoryError::invalid(
                            OPERATION,
                            format!("entity {} is a reference copy", guid),
                        ));
                    }
                    if self.capabilities.soft_delete && entity.header.status != InstanceStatus::Deleted {
                        return Err(RepositoryError::InstanceNotDeleted { guid: guid.clone() });
                    }
                }
            }

            state.entities.remove(guid);
            let attached: Vec<Id> = state
                .relationships
                .values()
                .filter(|relationship| Self::touches(relationship, guid))
                .map(|relationship| relationship.header.guid.clone())
                .collect();
            for relationship_guid in attached {
                if let Some(relationship) = state.relationships.remove(&relationship_guid) {
                    if relationship.header.is_homed_in(&self.metadata_collection_id) {
                        events.push(ReplicaEvent::RelationshipPurged { guid: relationship_guid });
                    }
                }
            }
        }
        events.push(ReplicaEvent::EntityPurged { guid: guid.clone() });
        self.publish(events);
        Ok(())
    }

    async fn re_home_entity(
        &self,
        user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<EntityDetail> {
        const OPERATION: &str = "reHomeEntity";
        self.require(self.capabilities.re_home, OPERATION)?;
        let rehomed = {
            let mut state = self.state.write();
            let entity = match state.entities.get_mut(guid) {
                None => return Err(RepositoryError::EntityNotKnown { guid: guid.clone() }),
                Some(StoredEntity::Proxy(_)) => {
                    return Err(RepositoryError::invalid(OPERATION, format!("entity {} is a proxy", guid)))
                }
                Some(StoredEntity::Detail(entity)) => entity,
            };
            if &entity.header.metadata_collection_id != home_metadata_collection_id
                || entity.header.is_homed_in(&self.metadata_collection_id)
            {
                return Err(RepositoryError::invalid(
                    OPERATION,
                    format!(
                        "entity {} is homed in {}, not in {}",
                        guid, entity.header.metadata_collection_id, home_metadata_collection_id
                    ),
                ));
            }
            entity.header.metadata_collection_id = self.metadata_collection_id.clone();
            entity.header.touch(user_id);
            entity.clone()
        };
        self.publish(vec![ReplicaEvent::EntitySaved(rehomed.clone())]);
        Ok(rehomed)
    }
}

#[async_trait::async_trait]
impl RelationshipStore for InMemoryRepository {
    async fn add_relationship(
        &self,
        user_id: &str,
        type_guid: &Id,
        properties: Option<InstanceProperties>,
        entity_one_guid: &Id,
        entity_two_guid: &Id,
    ) -> RepositoryResult<Relationship> {
        let type_def = self.type_of_category(type_guid, TypeDefCategory::Relationship)?;
        let properties = properties.unwrap_or_default();
        self.validate_properties(&type_def.name, &properties)?;

        let relationship = {
            let mut state = self.state.write();
            let entity_one = self.end_proxy(&state, entity_one_guid)?;
            let entity_two = self.end_proxy(&state, entity_two_guid)?;
            if let Some(ends) = &type_def.ends {
                for (end, allowed) in [(&entity_one, &ends.end_one_type), (&entity_two, &ends.end_two_type)] {
                    if !self.types.is_type_of(&end.header.type_name, allowed) {
                        return Err(RepositoryError::TypeError {
                            message: format!(
                                "entity {} of type {} cannot be an end of {} (expects {})",
                                end.header.guid, end.header.type_name, type_def.name, allowed
                            ),
                        });
                    }
                }
            }

            let relationship = Relationship {
                header: self.new_header(type_def, user_id),
                properties,
                entity_one,
                entity_two,
            };
            state
                .relationships
                .insert(relationship.header.guid.clone(), relationship.clone());
            relationship
        };
        self.publish(vec![ReplicaEvent::RelationshipSaved(relationship.clone())]);
        Ok(relationship)
    }

    async fn get_relationship(&self, _user_id: &str, guid: &Id) -> RepositoryResult<Relationship> {
        self.state
            .read()
            .relationships
            .get(guid)
            .cloned()
            .ok_or_else(|| RepositoryError::RelationshipNotKnown { guid: guid.clone() })
    }

    async fn is_relationship_known(&self, _user_id: &str, guid: &Id) -> RepositoryResult<Option<Relationship>> {
        Ok(self.state.read().relationships.get(guid).cloned())
    }

    async fn update_relationship_status(
        &self,
        user_id: &str,
        guid: &Id,
        new_status: InstanceStatus,
    ) -> RepositoryResult<Relationship> {
        const OPERATION: &str = "updateRelationshipStatus";
        self.require(self.capabilities.status_updates, OPERATION)?;
        self.mutate_relationship(OPERATION, user_id, guid, |relationship| {
            Self::check_status(OPERATION, new_status)?;
            relationship.header.status = new_status;
            Ok(())
        })
    }

    async fn update_relationship_properties(
        &self,
        user_id: &str,
        guid: &Id,
        properties: InstanceProperties,
    ) -> RepositoryResult<Relationship> {
        const OPERATION: &str = "updateRelationshipProperties";
        self.require(self.capabilities.property_updates, OPERATION)?;
        self.mutate_relationship(OPERATION, user_id, guid, |relationship| {
            self.validate_properties(&relationship.header.type_name, &properties)?;
            relationship.properties = properties;
            Ok(())
        })
    }

    async fn re_type_relationship(
        &self,
        user_id: &str,
        guid: &Id,
        new_type_guid: &Id,
    ) -> RepositoryResult<Relationship> {
        const OPERATION: &str = "reTypeRelationship";
        self.require(self.capabilities.re_type, OPERATION)?;
        self.mutate_relationship(OPERATION, user_id, guid, |relationship| {
            let new_type = self.type_of_category(new_type_guid, TypeDefCategory::Relationship)?;
            self.validate_properties(&new_type.name, &relationship.properties)?;
            relationship.header.type_guid = new_type.guid.clone();
            relationship.header.type_name = new_type.name.clone();
            Ok(())
        })
    }

    async fn re_identify_relationship(
        &self,
        user_id: &str,
        guid: &Id,
        new_guid: &Id,
    ) -> RepositoryResult<Relationship> {
        const OPERATION: &str = "reIdentifyRelationship";
        self.require(self.capabilities.re_identify, OPERATION)?;
        if self.state.read().relationships.contains_key(new_guid) {
            return Err(RepositoryError::invalid(
                OPERATION,
                format!("guid {} is already in use", new_guid),
            ));
        }
        let updated = self.mutate_relationship(OPERATION, user_id, guid, |relationship| {
            relationship.header.guid = new_guid.clone();
            Ok(())
        })?;
        {
            let mut state = self.state.write();
            if let Some(relationship) = state.relationships.remove(guid) {
                state.relationships.insert(new_guid.clone(), relationship);
            }
        }
        self.publish(vec![
            ReplicaEvent::RelationshipPurged { guid: guid.clone() },
            ReplicaEvent::RelationshipSaved(updated.clone()),
        ]);
        Ok(updated)
    }

    async fn delete_relationship(&self, user_id: &str, guid: &Id) -> RepositoryResult<Relationship> {
        const OPERATION: &str = "deleteRelationship";
        self.require(self.capabilities.soft_delete, OPERATION)?;
        match self.state.read().relationships.get(guid) {
            Some(relationship) if relationship.header.status == InstanceStatus::Deleted => {
                return Err(RepositoryError::AlreadyDeleted { guid: guid.clone() })
            }
            Some(_) => {}
            None => return Err(RepositoryError::RelationshipNotKnown { guid: guid.clone() }),
        }
        self.mutate_relationship(OPERATION, user_id, guid, |relationship| {
            relationship.header.status = InstanceStatus::Deleted;
            Ok(())
        })
    }

    async fn purge_relationship(&self, _user_id: &str, guid: &Id) -> RepositoryResult<()> {
        const OPERATION: &str = "purgeRelationship";
        {
            let mut state = self.state.write();
            let relationship = state
                .relationships
                .get(guid)
                .ok_or_else(|| RepositoryError::RelationshipNotKnown { guid: guid.clone() })?;
            if !relationship.header.is_homed_in(&self.metadata_collection_id) {
                return Err(RepositoryError::invalid(
                    OPERATION,
                    format!("relationship {} is a reference copy", guid),
                ));
            }
            if self.capabilities.soft_delete && relationship.header.status != InstanceStatus::Deleted {
                return Err(RepositoryError::InstanceNotDeleted { guid: guid.clone() });
            }
            state.relationships.remove(guid);
        }
        self.publish(vec![ReplicaEvent::RelationshipPurged { guid: guid.clone() }]);
        Ok(())
    }

    async fn re_home_relationship(
        &self,
        user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<Relationship> {
        const OPERATION: &str = "reHomeRelationship";
        self.require(self.capabilities.re_home, OPERATION)?;
        let rehomed = {
            let mut state = self.state.write();
            let relationship = state
                .relationships
                .get_mut(guid)
                .ok_or_else(|| RepositoryError::RelationshipNotKnown { guid: guid.clone() })?;
            if &relationship.header.metadata_collection_id != home_metadata_collection_id
                || relationship.header.is_homed_in(&self.metadata_collection_id)
            {
                return Err(RepositoryError::invalid(
                    OPERATION,
                    format!(
                        "relationship {} is homed in {}, not in {}",
                        guid, relationship.header.metadata_collection_id, home_metadata_collection_id
                    ),
                ));
            }
            relationship.header.metadata_collection_id = self.metadata_collection_id.clone();
            relationship.header.touch(user_id);
            relationship.clone()
        };
        self.publish(vec![ReplicaEvent::RelationshipSaved(rehomed.clone())]);
        Ok(rehomed)
    }
}

#[async_trait::async_trait]
impl ReferenceCopyStore for InMemoryRepository {
    async fn save_entity_reference_copy(&self, _user_id: &str, entity: &EntityDetail) -> RepositoryResult<()> {
        const OPERATION: &str = "saveEntityReferenceCopy";
        self.require(self.capabilities.reference_copies, OPERATION)?;
        if entity.header.is_homed_in(&self.metadata_collection_id) {
            return Err(RepositoryError::invalid(
                OPERATION,
                format!("entity {} is homed here and cannot be saved as a reference copy", entity.header.guid),
            ));
        }
        self.type_of_category(&entity.header.type_guid, TypeDefCategory::Entity)?;
        self.validate_properties(&entity.header.type_name, &entity.properties)?;
        self.receive(ReplicaEvent::EntitySaved(entity.clone()));
        Ok(())
    }

    async fn purge_entity_reference_copy(
        &self,
        _user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<()> {
        const OPERATION: &str = "purgeEntityReferenceCopy";
        self.require(self.capabilities.reference_copies, OPERATION)?;
        if home_metadata_collection_id == &self.metadata_collection_id {
            return Err(RepositoryError::invalid(
                OPERATION,
                format!("entity {} is homed here; purge it as a master", guid),
            ));
        }
        let mut state = self.state.write();
        match state.entities.get(guid) {
            None => Err(RepositoryError::EntityNotKnown { guid: guid.clone() }),
            Some(stored) if stored.header().is_homed_in(&self.metadata_collection_id) => Err(
                RepositoryError::invalid(OPERATION, format!("entity {} is homed here", guid)),
            ),
            Some(_) => {
                state.entities.remove(guid);
                let mcid = &self.metadata_collection_id;
                state.relationships.retain(|_, relationship| {
                    relationship.header.is_homed_in(mcid) || !Self::touches(relationship, guid)
                });
                Ok(())
            }
        }
    }

    async fn save_relationship_reference_copy(
        &self,
        _user_id: &str,
        relationship: &Relationship,
    ) -> RepositoryResult<()> {
        const OPERATION: &str = "saveRelationshipReferenceCopy";
        self.require(self.capabilities.reference_copies, OPERATION)?;
        if relationship.header.is_homed_in(&self.metadata_collection_id) {
            return Err(RepositoryError::invalid(
                OPERATION,
                format!(
                    "relationship {} is homed here and cannot be saved as a reference copy",
                    relationship.header.guid
                ),
            ));
        }
        self.type_of_category(&relationship.header.type_guid, TypeDefCategory::Relationship)?;
        self.validate_properties(&relationship.header.type_name, &relationship.properties)?;
        self.receive(ReplicaEvent::RelationshipSaved(relationship.clone()));
        Ok(())
    }

    async fn purge_relationship_reference_copy(
        &self,
        _user_id: &str,
        guid: &Id,
        home_metadata_collection_id: &Id,
    ) -> RepositoryResult<()> {
        const OPERATION: &str = "purgeRelationshipReferenceCopy";
        self.require(self.capabilities.reference_copies, OPERATION)?;
        if home_metadata_collection_id == &self.metadata_collection_id {
            return Err(RepositoryError::invalid(
                OPERATION,
                format!("relationship {} is homed here; purge it as a master", guid),
            ));
        }
        let mut state = self.state.write();
        match state.relationships.get(guid) {
            None => Err(RepositoryError::RelationshipNotKnown { guid: guid.clone() }),
            Some(relationship) if relationship.header.is_homed_in(&self.metadata_collection_id) => Err(
                RepositoryError::invalid(OPERATION, format!("relationship {} is homed here", guid)),
            ),
            Some(_) => {
                state.relationships.remove(guid);
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl SearchStore for InMemoryRepository {
    async fn find_entities_by_property(
        &self,
        _user_id: &str,
        type_guid: Option<&Id>,
        match_properties: Option<&InstanceProperties>,
        match_criteria: MatchCriteria,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<EntityDetail>>> {
        let allowed = self.type_filter(type_guid, TypeDefCategory::Entity)?;
        let regexes = self.compile_match_properties("findEntitiesByProperty", match_properties, allowed.as_deref())?;
        let match_criteria = self.effective_criteria(match_criteria);

        let state = self.state.read();
        let hits: Vec<EntityDetail> = state
            .entities
            .values()
            .filter_map(|stored| match stored {
                StoredEntity::Detail(entity) => Some(entity),
                StoredEntity::Proxy(_) => None,
            })
            .filter(|entity| Self::searchable(&entity.header, allowed.as_deref()))
            .filter(|entity| Self::property_matches(&entity.properties, match_properties, match_criteria, &regexes))
            .cloned()
            .collect();
        Ok(Self::page_or_none(page, hits))
    }

    async fn find_entities_by_property_value(
        &self,
        _user_id: &str,
        type_guid: Option<&Id>,
        search_criteria: &str,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<EntityDetail>>> {
        let allowed = self.type_filter(type_guid, TypeDefCategory::Entity)?;
        let regex = self.compile_search("findEntitiesByPropertyValue", search_criteria)?;

        let state = self.state.read();
        let hits: Vec<EntityDetail> = state
            .entities
            .values()
            .filter_map(|stored| match stored {
                StoredEntity::Detail(entity) => Some(entity),
                StoredEntity::Proxy(_) => None,
            })
            .filter(|entity| Self::searchable(&entity.header, allowed.as_deref()))
            .filter(|entity| MatchEvaluator::any_string_matches(&entity.properties, &regex))
            .cloned()
            .collect();
        Ok(Self::page_or_none(page, hits))
    }

    async fn find_relationships_by_property(
        &self,
        _user_id: &str,
        type_guid: Option<&Id>,
        match_properties: Option<&InstanceProperties>,
        match_criteria: MatchCriteria,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<Relationship>>> {
        let allowed = self.type_filter(type_guid, TypeDefCategory::Relationship)?;
        let regexes =
            self.compile_match_properties("findRelationshipsByProperty", match_properties, allowed.as_deref())?;
        let match_criteria = self.effective_criteria(match_criteria);

        let state = self.state.read();
        let hits: Vec<Relationship> = state
            .relationships
            .values()
            .filter(|relationship| Self::searchable(&relationship.header, allowed.as_deref()))
            .filter(|relationship| {
                Self::property_matches(&relationship.properties, match_properties, match_criteria, &regexes)
            })
            .cloned()
            .collect();
        Ok(Self::page_or_none(page, hits))
    }

    async fn find_relationships_by_property_value(
        &self,
        _user_id: &str,
        type_guid: Option<&Id>,
        search_criteria: &str,
        page: PageRequest,
    ) -> RepositoryResult<Option<Vec<Relationship>>> {
        let allowed = self.type_filter(type_guid, TypeDefCategory::Relationship)?;
        let regex = self.compile_search("findRelationshipsByPropertyValue", search_criteria)?;

        let state = self.state.read();
        let hits: Vec<Relationship> = state
            .relationships
            .values()
            .filter(|relationship| Self::searchable(&relationship.header, allowed.as_deref()))
            .filter(|relationship| MatchEvaluator::any_string_matches(&relationship.properties, &regex))
            .cloned()
            .collect();
        Ok(Self::page_or_none(page, hits))
    }
}
