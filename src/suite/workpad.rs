use std::collections::BTreeMap;
use std::sync::Arc;

use crate::logic::PollPolicy;
use crate::model::{Id, InstanceProperties, InstanceSnapshot, TypeDef, TypeDefCategory, TypeRegistry};
use crate::store::MetadataCollection;
use crate::suite::error::HarnessError;
use crate::suite::report::ConformanceReport;

/// Number of instance populations kept per type
pub const SET_COUNT: usize = 3;

/// Parameters shared by every test case in a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub user_id: String,
    /// Page size for every search; 0 means unlimited
    pub page_size: usize,
    pub instances_per_set: usize,
    pub poll: PollPolicy,
    /// Restrict the run to these type names
    pub type_filter: Option<Vec<String>>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            user_id: "cts-user".to_string(),
            page_size: 50,
            instances_per_set: 2,
            poll: PollPolicy::default(),
            type_filter: None,
        }
    }
}

/// Which repository a call goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The reference repository that masters test instances
    Cts,
    /// The technology under test
    Tut,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Cts => Side::Tut,
            Side::Tut => Side::Cts,
        }
    }
}

type InstanceSets = [Vec<InstanceSnapshot>; SET_COUNT];

/// Shared state for one conformance run, passed by reference to every test case
pub struct Workpad {
    tut: Arc<dyn MetadataCollection>,
    cts: Arc<dyn MetadataCollection>,
    tut_metadata_collection_id: Id,
    cts_metadata_collection_id: Id,
    pub settings: RunSettings,
    pub types: TypeRegistry,
    instance_sets: BTreeMap<(TypeDefCategory, String), InstanceSets>,
    pub report: ConformanceReport,
}

impl Workpad {
    pub fn new(tut: Arc<dyn MetadataCollection>, cts: Arc<dyn MetadataCollection>, settings: RunSettings) -> Self {
        let tut_metadata_collection_id = tut.metadata_collection_id().to_string();
        let cts_metadata_collection_id = cts.metadata_collection_id().to_string();
        Self {
            tut,
            cts,
            tut_metadata_collection_id,
            cts_metadata_collection_id,
            settings,
            types: TypeRegistry::default(),
            instance_sets: BTreeMap::new(),
            report: ConformanceReport::new(),
        }
    }

    pub fn repository(&self, side: Side) -> &Arc<dyn MetadataCollection> {
        match side {
            Side::Cts => &self.cts,
            Side::Tut => &self.tut,
        }
    }

    pub fn tut(&self) -> &Arc<dyn MetadataCollection> {
        &self.tut
    }

    pub fn cts(&self) -> &Arc<dyn MetadataCollection> {
        &self.cts
    }

    pub fn metadata_collection_id(&self, side: Side) -> &Id {
        match side {
            Side::Cts => &self.cts_metadata_collection_id,
            Side::Tut => &self.tut_metadata_collection_id,
        }
    }

    pub fn tut_metadata_collection_id(&self) -> &Id {
        &self.tut_metadata_collection_id
    }

    pub fn user_id(&self) -> &str {
        &self.settings.user_id
    }

    pub fn poll(&self) -> PollPolicy {
        self.settings.poll
    }

    /// Register the type definitions discovered from the repository under test
    pub fn register_types(&mut self, type_defs: Vec<TypeDef>) {
        for type_def in type_defs {
            self.types.register(type_def);
        }
    }

    pub fn type_def(&self, name: &str) -> Result<&TypeDef, HarnessError> {
        self.types
            .get(name)
            .ok_or_else(|| HarnessError::Workpad(format!("type {} was not discovered", name)))
    }

    /// Entity types to instantiate at each end of a relationship type
    pub fn end_types(&self, type_def: &TypeDef) -> Result<(TypeDef, TypeDef), HarnessError> {
        let ends = type_def
            .ends
            .as_ref()
            .ok_or_else(|| HarnessError::Workpad(format!("type {} declares no relationship ends", type_def.name)))?;
        Ok((
            self.type_def(&ends.end_one_type)?.clone(),
            self.type_def(&ends.end_two_type)?.clone(),
        ))
    }

    /// Guid of another type of the same category that can hold `properties`:
    /// the first subtype, otherwise the nearest supertype declaring every
    /// populated attribute. `None` when no such type exists.
    pub fn alternative_type_guid(&self, type_def: &TypeDef, properties: &InstanceProperties) -> Option<Id> {
        let same_category = |candidate: &&TypeDef| candidate.category == type_def.category;
        let subtype = self
            .types
            .subtypes_of(&type_def.name)
            .iter()
            .skip(1)
            .filter_map(|name| self.types.get(name))
            .find(same_category);
        let candidate = subtype.or_else(|| {
            self.types
                .super_types_of(&type_def.name)
                .into_iter()
                .filter(same_category)
                .find(|super_type| {
                    let declared = self.types.all_attributes(&super_type.name);
                    properties
                        .keys()
                        .all(|name| declared.iter().any(|attribute| &attribute.name == name))
                })
        });
        candidate.map(|candidate| candidate.guid.clone())
    }

    pub fn add_instance(&mut self, category: TypeDefCategory, type_name: &str, set: usize, instance: InstanceSnapshot) {
        if let Some(sets) = self.sets_mut(category, type_name, set) {
            sets[set].push(instance);
        }
    }

    pub fn instances(&self, category: TypeDefCategory, type_name: &str, set: usize) -> &[InstanceSnapshot] {
        self.instance_sets
            .get(&(category, type_name.to_string()))
            .and_then(|sets| sets.get(set))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every instance created for a type, set by set
    pub fn all_instances(&self, category: TypeDefCategory, type_name: &str) -> Vec<InstanceSnapshot> {
        self.instance_sets
            .get(&(category, type_name.to_string()))
            .map(|sets| sets.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Take every set of a type out of the workpad
    pub fn remove_instances(&mut self, category: TypeDefCategory, type_name: &str) -> Vec<InstanceSnapshot> {
        self.instance_sets
            .remove(&(category, type_name.to_string()))
            .map(|sets| sets.into_iter().flatten().collect())
            .unwrap_or_default()
    }

    fn sets_mut(&mut self, category: TypeDefCategory, type_name: &str, set: usize) -> Option<&mut InstanceSets> {
        if set >= SET_COUNT {
            log::error!("instance set {} is out of range for {}", set, type_name);
            return None;
        }
        Some(
            self.instance_sets
                .entry((category, type_name.to_string()))
                .or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityDetail, InstanceHeader, PrimitiveCategory, PrimitiveValue, TypedAttribute};
    use crate::store::InMemoryRepository;

    fn snapshot(guid: &str) -> InstanceSnapshot {
        InstanceSnapshot::from(EntityDetail {
            header: InstanceHeader::new(
                guid.to_string(),
                "t-asset".to_string(),
                "Asset".to_string(),
                "tut".to_string(),
                "tester",
            ),
            properties: InstanceProperties::new(),
        })
    }

    fn workpad() -> Workpad {
        let tut = Arc::new(InMemoryRepository::new("tut", "tut", Vec::new()));
        let cts = Arc::new(InMemoryRepository::new("cts", "cts", Vec::new()));
        Workpad::new(tut, cts, RunSettings::default())
    }

    #[test]
    fn test_instance_sets_by_type_and_index() {
        let mut workpad = workpad();
        workpad.add_instance(TypeDefCategory::Entity, "Asset", 0, snapshot("e1"));
        workpad.add_instance(TypeDefCategory::Entity, "Asset", 2, snapshot("e2"));
        workpad.add_instance(TypeDefCategory::Entity, "Asset", 3, snapshot("ignored"));

        assert_eq!(workpad.instances(TypeDefCategory::Entity, "Asset", 0).len(), 1);
        assert!(workpad.instances(TypeDefCategory::Entity, "Asset", 1).is_empty());
        assert!(workpad.instances(TypeDefCategory::Relationship, "Asset", 0).is_empty());
        assert_eq!(workpad.all_instances(TypeDefCategory::Entity, "Asset").len(), 2);

        let removed = workpad.remove_instances(TypeDefCategory::Entity, "Asset");
        assert_eq!(removed.len(), 2);
        assert!(workpad.all_instances(TypeDefCategory::Entity, "Asset").is_empty());
    }

    #[test]
    fn test_sides() {
        let workpad = workpad();
        assert_eq!(workpad.metadata_collection_id(Side::Tut), "tut");
        assert_eq!(workpad.metadata_collection_id(Side::Tut.other()), "cts");
        assert!(workpad.type_def("Asset").is_err());
    }

    #[test]
    fn test_alternative_type_can_hold_the_properties() {
        let mut workpad = workpad();
        workpad.register_types(vec![
            TypeDef::entity("t-asset", "Asset").with_attribute(TypedAttribute::new("name", PrimitiveCategory::String)),
            TypeDef::entity("t-table", "Table")
                .with_super_type("Asset")
                .with_attribute(TypedAttribute::new("rows", PrimitiveCategory::Long)),
            TypeDef::entity("t-tag", "Tag").with_attribute(TypedAttribute::new("label", PrimitiveCategory::String)),
            TypeDef::relationship("t-link", "AssetLink", "Asset", "Asset"),
        ]);
        let named = |name: &str| {
            let mut properties = InstanceProperties::new();
            properties.insert(name.to_string(), PrimitiveValue::String("x".to_string()));
            properties
        };
        let asset = workpad.type_def("Asset").unwrap().clone();
        let table = workpad.type_def("Table").unwrap().clone();
        let tag = workpad.type_def("Tag").unwrap().clone();

        // A subtype inherits everything
        assert_eq!(workpad.alternative_type_guid(&asset, &named("name")), Some("t-table".to_string()));
        // A supertype only when it declares every populated attribute
        assert_eq!(workpad.alternative_type_guid(&table, &named("name")), Some("t-asset".to_string()));
        assert_eq!(workpad.alternative_type_guid(&table, &named("rows")), None);
        // Unrelated types are never chosen
        assert_eq!(workpad.alternative_type_guid(&tag, &named("label")), None);
    }
}
