//! Built-in type catalogue for self-test runs against in-memory repositories.
//!
//! Covers single- and multi-attribute entity types, a supertype chain, an
//! attribute-free type and relationship types with and without properties.

use crate::model::{PrimitiveCategory, TypeDef, TypedAttribute};

fn attribute(name: &str, category: PrimitiveCategory) -> TypedAttribute {
    TypedAttribute::new(name, category)
}

/// Every type in the catalogue, supertypes before their subtypes
pub fn type_catalogue() -> Vec<TypeDef> {
    let mut types = entity_types();
    types.extend(relationship_types());
    types
}

pub fn entity_types() -> Vec<TypeDef> {
    vec![
        TypeDef::entity("5c9f3a4e-0001-4d1e-9b7a-entity000001", "Referenceable")
            .with_attribute(attribute("qualifiedName", PrimitiveCategory::String).unique()),
        TypeDef::entity("5c9f3a4e-0002-4d1e-9b7a-entity000002", "Asset")
            .with_super_type("Referenceable")
            .with_attribute(attribute("name", PrimitiveCategory::String))
            .with_attribute(attribute("description", PrimitiveCategory::String))
            .with_attribute(attribute("owner", PrimitiveCategory::String)),
        TypeDef::entity("5c9f3a4e-0003-4d1e-9b7a-entity000003", "DataSet")
            .with_super_type("Asset")
            .with_attribute(attribute("recordCount", PrimitiveCategory::Long))
            .with_attribute(attribute("isPublic", PrimitiveCategory::Boolean)),
        TypeDef::entity("5c9f3a4e-0004-4d1e-9b7a-entity000004", "Process")
            .with_super_type("Asset")
            .with_attribute(attribute("formula", PrimitiveCategory::String))
            .with_attribute(attribute("createTime", PrimitiveCategory::Date)),
        TypeDef::entity("5c9f3a4e-0005-4d1e-9b7a-entity000005", "Measurement")
            .with_attribute(attribute("unit", PrimitiveCategory::String))
            .with_attribute(attribute("value", PrimitiveCategory::Double))
            .with_attribute(attribute("precision", PrimitiveCategory::Float))
            .with_attribute(attribute("samples", PrimitiveCategory::Int))
            .with_attribute(attribute("flags", PrimitiveCategory::Byte))
            .with_attribute(attribute("scale", PrimitiveCategory::Short))
            .with_attribute(attribute("grade", PrimitiveCategory::Char))
            .with_attribute(attribute("total", PrimitiveCategory::BigDecimal))
            .with_attribute(attribute("population", PrimitiveCategory::BigInteger)),
        TypeDef::entity("5c9f3a4e-0006-4d1e-9b7a-entity000006", "Tag")
            .with_attribute(attribute("tagName", PrimitiveCategory::String)),
        TypeDef::entity("5c9f3a4e-0007-4d1e-9b7a-entity000007", "Marker"),
    ]
}

pub fn relationship_types() -> Vec<TypeDef> {
    vec![
        TypeDef::relationship("5c9f3a4e-0101-4d1e-9b7a-relate000001", "ProcessInput", "Process", "DataSet")
            .with_attribute(attribute("label", PrimitiveCategory::String))
            .with_attribute(attribute("position", PrimitiveCategory::Int)),
        TypeDef::relationship("5c9f3a4e-0102-4d1e-9b7a-relate000002", "AttachedTag", "Referenceable", "Tag")
            .with_attribute(attribute("isPublic", PrimitiveCategory::Boolean)),
        TypeDef::relationship("5c9f3a4e-0103-4d1e-9b7a-relate000003", "RelatedAsset", "Asset", "Asset"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TypeDefCategory, TypeRegistry};

    #[test]
    fn test_catalogue_resolves() {
        let registry = TypeRegistry::new(type_catalogue());
        for type_def in registry.of_category(TypeDefCategory::Relationship) {
            let ends = type_def.ends.as_ref().unwrap();
            assert!(registry.get(&ends.end_one_type).is_some(), "{}", type_def.name);
            assert!(registry.get(&ends.end_two_type).is_some(), "{}", type_def.name);
        }
        let names: Vec<String> = registry
            .all_attributes("DataSet")
            .into_iter()
            .map(|attribute| attribute.name)
            .collect();
        assert_eq!(
            names,
            vec!["qualifiedName", "name", "description", "owner", "recordCount", "isPublic"]
        );
    }

    #[test]
    fn test_guids_are_unique() {
        let catalogue = type_catalogue();
        let mut guids: Vec<&str> = catalogue.iter().map(|type_def| type_def.guid.as_str()).collect();
        guids.sort();
        guids.dedup();
        assert_eq!(guids.len(), catalogue.len());
    }
}
