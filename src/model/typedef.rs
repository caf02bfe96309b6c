use crate::model::{Id, PrimitiveCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A primitive attribute declared by a type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedAttribute {
    pub name: String,
    pub category: PrimitiveCategory,
    #[serde(default)]
    pub unique: bool,
}

impl TypedAttribute {
    pub fn new(name: impl Into<String>, category: PrimitiveCategory) -> Self {
        Self {
            name: name.into(),
            category,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDefCategory {
    Entity,
    Relationship,
}

impl TypeDefCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeDefCategory::Entity => "entity",
            TypeDefCategory::Relationship => "relationship",
        }
    }
}

/// Entity types allowed at each end of a relationship type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEndDefs {
    pub end_one_type: String,
    pub end_two_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub guid: Id,
    pub name: String,
    pub category: TypeDefCategory,
    /// Name of the direct supertype, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_type: Option<String>,
    /// Attributes declared by this type only (inherited ones live on the supertypes)
    pub attributes: Vec<TypedAttribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends: Option<RelationshipEndDefs>,
}

impl TypeDef {
    pub fn entity(guid: impl Into<Id>, name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            category: TypeDefCategory::Entity,
            super_type: None,
            attributes: Vec::new(),
            ends: None,
        }
    }

    pub fn relationship(
        guid: impl Into<Id>,
        name: impl Into<String>,
        end_one_type: impl Into<String>,
        end_two_type: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            category: TypeDefCategory::Relationship,
            super_type: None,
            attributes: Vec::new(),
            ends: Some(RelationshipEndDefs {
                end_one_type: end_one_type.into(),
                end_two_type: end_two_type.into(),
            }),
        }
    }

    pub fn with_super_type(mut self, super_type: impl Into<String>) -> Self {
        self.super_type = Some(super_type.into());
        self
    }

    pub fn with_attribute(mut self, attribute: TypedAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }
}

/// Index over a set of type definitions, resolving inheritance in both directions
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    by_name: BTreeMap<String, TypeDef>,
    guid_to_name: BTreeMap<Id, String>,
    /// Direct subtypes keyed by supertype name
    subtypes: BTreeMap<String, Vec<String>>,
}

impl TypeRegistry {
    pub fn new(type_defs: impl IntoIterator<Item = TypeDef>) -> Self {
        let mut registry = Self::default();
        for type_def in type_defs {
            registry.register(type_def);
        }
        registry
    }

    pub fn register(&mut self, type_def: TypeDef) {
        if let Some(super_type) = &type_def.super_type {
            let children = self.subtypes.entry(super_type.clone()).or_default();
            if !children.contains(&type_def.name) {
                children.push(type_def.name.clone());
            }
        }
        self.guid_to_name
            .insert(type_def.guid.clone(), type_def.name.clone());
        self.by_name.insert(type_def.name.clone(), type_def);
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.by_name.get(name)
    }

    pub fn get_by_guid(&self, guid: &str) -> Option<&TypeDef> {
        self.guid_to_name
            .get(guid)
            .and_then(|name| self.by_name.get(name))
    }

    pub fn all(&self) -> impl Iterator<Item = &TypeDef> {
        self.by_name.values()
    }

    pub fn of_category(&self, category: TypeDefCategory) -> impl Iterator<Item = &TypeDef> {
        self.by_name
            .values()
            .filter(move |type_def| type_def.category == category)
    }

    /// The named type followed by its supertypes, nearest first
    fn lineage(&self, name: &str) -> Vec<&TypeDef> {
        let mut lineage: Vec<&TypeDef> = Vec::new();
        let mut current = self.by_name.get(name);
        while let Some(type_def) = current {
            // Guard against accidental supertype cycles
            if lineage.iter().any(|seen| seen.name == type_def.name) {
                break;
            }
            lineage.push(type_def);
            current = type_def
                .super_type
                .as_ref()
                .and_then(|super_type| self.by_name.get(super_type));
        }
        lineage
    }

    /// Own plus inherited attributes, root supertype first, then each subtype down to `name`
    pub fn all_attributes(&self, name: &str) -> Vec<TypedAttribute> {
        self.lineage(name)
            .iter()
            .rev()
            .flat_map(|type_def| type_def.attributes.iter().cloned())
            .collect()
    }

    /// Every transitive supertype of `name`, nearest first
    pub fn super_types_of(&self, name: &str) -> Vec<&TypeDef> {
        self.lineage(name).into_iter().skip(1).collect()
    }

    /// The named type plus every transitive subtype
    pub fn subtypes_of(&self, name: &str) -> Vec<String> {
        let mut result = vec![name.to_string()];
        let mut index = 0;
        while index < result.len() {
            if let Some(children) = self.subtypes.get(&result[index]) {
                for child in children {
                    if !result.contains(child) {
                        result.push(child.clone());
                    }
                }
            }
            index += 1;
        }
        result
    }

    /// Whether `candidate` is `ancestor` or one of its subtypes
    pub fn is_type_of(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = Some(candidate);
        let mut steps = 0;
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.by_name.len() {
                return false;
            }
            current = self
                .by_name
                .get(name)
                .and_then(|type_def| type_def.super_type.as_deref());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new(vec![
            TypeDef::entity("t-ref", "Referenceable").with_attribute(
                TypedAttribute::new("qualifiedName", PrimitiveCategory::String).unique(),
            ),
            TypeDef::entity("t-asset", "Asset")
                .with_super_type("Referenceable")
                .with_attribute(TypedAttribute::new("name", PrimitiveCategory::String))
                .with_attribute(TypedAttribute::new("count", PrimitiveCategory::Int)),
            TypeDef::entity("t-dataset", "DataSet").with_super_type("Asset"),
        ])
    }

    #[test]
    fn test_inherited_attributes_come_first() {
        let names: Vec<String> = registry()
            .all_attributes("DataSet")
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["qualifiedName", "name", "count"]);
    }

    #[test]
    fn test_subtypes_are_transitive() {
        let registry = registry();
        assert_eq!(
            registry.subtypes_of("Referenceable"),
            vec!["Referenceable", "Asset", "DataSet"]
        );
        assert_eq!(registry.subtypes_of("DataSet"), vec!["DataSet"]);
        assert!(registry.is_type_of("DataSet", "Referenceable"));
        assert!(!registry.is_type_of("Referenceable", "Asset"));
    }

    #[test]
    fn test_super_types_nearest_first() {
        let registry = registry();
        let names: Vec<&str> = registry
            .super_types_of("DataSet")
            .into_iter()
            .map(|type_def| type_def.name.as_str())
            .collect();
        assert_eq!(names, vec!["Asset", "Referenceable"]);
        assert!(registry.super_types_of("Referenceable").is_empty());
    }

    #[test]
    fn test_lookup_by_guid() {
        let registry = registry();
        assert_eq!(registry.get_by_guid("t-asset").map(|t| t.name.as_str()), Some("Asset"));
        assert!(registry.get_by_guid("missing").is_none());
    }
}
