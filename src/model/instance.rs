use crate::model::{Id, PrimitiveValue, TypeDefCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Property bag of an instance, keyed by attribute name
pub type InstanceProperties = BTreeMap<String, PrimitiveValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Draft,
    Active,
    Deleted,
}

/// Identity, type and provenance shared by every kind of instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHeader {
    pub guid: Id,
    pub type_guid: Id,
    pub type_name: String,
    /// Metadata collection that owns the master copy
    pub metadata_collection_id: Id,
    pub status: InstanceStatus,
    pub version: u64,
    pub created_by: String,
    pub create_time: DateTime<Utc>,
    pub updated_by: String,
    pub update_time: DateTime<Utc>,
}

impl InstanceHeader {
    pub fn new(
        guid: Id,
        type_guid: Id,
        type_name: String,
        metadata_collection_id: Id,
        user_id: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            guid,
            type_guid,
            type_name,
            metadata_collection_id,
            status: InstanceStatus::Active,
            version: 1,
            created_by: user_id.to_string(),
            create_time: now,
            updated_by: user_id.to_string(),
            update_time: now,
        }
    }

    /// Bump version and audit fields after a change
    pub fn touch(&mut self, user_id: &str) {
        self.version += 1;
        self.updated_by = user_id.to_string();
        self.update_time = Utc::now();
    }

    pub fn is_homed_in(&self, metadata_collection_id: &str) -> bool {
        self.metadata_collection_id == metadata_collection_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDetail {
    #[serde(flatten)]
    pub header: InstanceHeader,
    pub properties: InstanceProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    #[serde(flatten)]
    pub header: InstanceHeader,
}

/// Stub of an entity whose detail is held elsewhere: identity plus unique properties only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProxy {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub unique_properties: InstanceProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(flatten)]
    pub header: InstanceHeader,
    pub properties: InstanceProperties,
    pub entity_one: EntityProxy,
    pub entity_two: EntityProxy,
}

impl EntityDetail {
    pub fn summary(&self) -> EntitySummary {
        EntitySummary {
            header: self.header.clone(),
        }
    }

    pub fn to_proxy(&self, unique_attributes: &[String]) -> EntityProxy {
        EntityProxy {
            header: self.header.clone(),
            unique_properties: self
                .properties
                .iter()
                .filter(|(name, _)| unique_attributes.contains(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }
}

/// Read access used by search verification
pub trait SearchableInstance {
    fn guid(&self) -> &str;
    fn properties(&self) -> &InstanceProperties;
}

impl SearchableInstance for EntityDetail {
    fn guid(&self) -> &str {
        &self.header.guid
    }

    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

impl SearchableInstance for Relationship {
    fn guid(&self) -> &str {
        &self.header.guid
    }

    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

/// Category-neutral view of an entity or relationship as returned by a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub category: TypeDefCategory,
    #[serde(flatten)]
    pub header: InstanceHeader,
    pub properties: InstanceProperties,
    /// End entity guids, relationships only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends: Option<(Id, Id)>,
}

impl InstanceSnapshot {
    pub fn guid(&self) -> &str {
        &self.header.guid
    }

    /// SHA-256 over the canonical JSON form, hex encoded
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

impl SearchableInstance for InstanceSnapshot {
    fn guid(&self) -> &str {
        &self.header.guid
    }

    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

impl From<EntityDetail> for InstanceSnapshot {
    fn from(entity: EntityDetail) -> Self {
        Self {
            category: TypeDefCategory::Entity,
            header: entity.header,
            properties: entity.properties,
            ends: None,
        }
    }
}

impl From<EntitySummary> for InstanceSnapshot {
    fn from(summary: EntitySummary) -> Self {
        Self {
            category: TypeDefCategory::Entity,
            header: summary.header,
            properties: InstanceProperties::new(),
            ends: None,
        }
    }
}

impl From<EntityProxy> for InstanceSnapshot {
    fn from(proxy: EntityProxy) -> Self {
        Self {
            category: TypeDefCategory::Entity,
            header: proxy.header,
            properties: proxy.unique_properties,
            ends: None,
        }
    }
}

impl From<Relationship> for InstanceSnapshot {
    fn from(relationship: Relationship) -> Self {
        Self {
            category: TypeDefCategory::Relationship,
            ends: Some((
                relationship.entity_one.header.guid,
                relationship.entity_two.header.guid,
            )),
            header: relationship.header,
            properties: relationship.properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(name: &str) -> EntityDetail {
        let mut properties = InstanceProperties::new();
        properties.insert("name".to_string(), PrimitiveValue::String(name.to_string()));
        properties.insert("count".to_string(), PrimitiveValue::Int(42));
        EntityDetail {
            header: InstanceHeader::new(
                "e1".to_string(),
                "t-asset".to_string(),
                "Asset".to_string(),
                "mc-1".to_string(),
                "tester",
            ),
            properties,
        }
    }

    #[test]
    fn test_fingerprint_tracks_property_changes() {
        let original = InstanceSnapshot::from(detail("name.0"));
        let same = original.clone();
        let changed = InstanceSnapshot::from(detail("name.1"));

        let fingerprint = original.fingerprint().unwrap();
        assert_eq!(fingerprint, same.fingerprint().unwrap());
        assert_ne!(fingerprint, changed.fingerprint().unwrap());
        assert_eq!(fingerprint.len(), 64);
    }

    #[test]
    fn test_proxy_keeps_only_unique_properties() {
        let proxy = detail("name.0").to_proxy(&["name".to_string()]);
        assert_eq!(proxy.unique_properties.len(), 1);
        assert!(proxy.unique_properties.contains_key("name"));
    }
}
