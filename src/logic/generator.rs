//! Deterministic property values for the three search populations.
//!
//! Set "0" is distinct from the other two on every attribute. Sets "1" and
//! "2" share the value of the first string attribute and differ elsewhere,
//! which gives searches a controlled overlap to reason about.

use crate::model::{InstanceProperties, PrimitiveCategory, PrimitiveValue, TypedAttribute};

/// Tokens identifying the three populations, by set index
pub const SET_TOKENS: [&str; 3] = ["0", "1", "2"];

/// Token shared by sets "1" and "2" on the overlap attribute
const OVERLAP_TOKEN: &str = "1";

/// Build the property bag for `set_token`, or `None` when the type has no attributes
pub fn populate(attributes: &[TypedAttribute], set_token: &str) -> Option<InstanceProperties> {
    if attributes.is_empty() {
        return None;
    }

    let overlap = overlap_attribute(attributes).map(|attribute| attribute.name.as_str());
    let mut properties = InstanceProperties::new();
    for attribute in attributes {
        let token = if Some(attribute.name.as_str()) == overlap && set_token != "0" {
            OVERLAP_TOKEN
        } else {
            set_token
        };
        if let Some(value) = value_for(attribute, token) {
            properties.insert(attribute.name.clone(), value);
        }
    }
    Some(properties)
}

/// The first string attribute in declaration order
pub fn overlap_attribute(attributes: &[TypedAttribute]) -> Option<&TypedAttribute> {
    attributes
        .iter()
        .find(|attribute| attribute.category.is_string())
}

/// Value an attribute takes for a token; unknown categories produce nothing
pub fn value_for(attribute: &TypedAttribute, token: &str) -> Option<PrimitiveValue> {
    let n = numeric(token);
    let value = match attribute.category {
        PrimitiveCategory::String => PrimitiveValue::String(format!("{}.{}", attribute.name, token)),
        PrimitiveCategory::Date => PrimitiveValue::Date(100 + i64::from(n)),
        PrimitiveCategory::Int => PrimitiveValue::Int(42 + n),
        PrimitiveCategory::Boolean => PrimitiveValue::Boolean(token != "0"),
        PrimitiveCategory::Short => PrimitiveValue::Short(n as i16),
        PrimitiveCategory::Byte => PrimitiveValue::Byte(n as i8),
        PrimitiveCategory::Char => PrimitiveValue::Char(token.chars().next()?),
        PrimitiveCategory::Long => PrimitiveValue::Long(2000 * i64::from(n)),
        PrimitiveCategory::Float => PrimitiveValue::Float(3.14159_f32 * n as f32),
        PrimitiveCategory::Double
        | PrimitiveCategory::BigDecimal
        | PrimitiveCategory::BigInteger => PrimitiveValue::Double(1_000_000.0 * f64::from(n)),
        PrimitiveCategory::Unknown => return None,
    };
    Some(value)
}

/// Non-numeric tokens count as zero
fn numeric(token: &str) -> i32 {
    token.parse().unwrap_or(0)
}
