use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type Id = String;

/// Category of a primitive attribute as declared by the type system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveCategory {
    String,
    Int,
    Boolean,
    Date,
    Long,
    Float,
    Double,
    Byte,
    Short,
    Char,
    BigDecimal,
    BigInteger,
    Unknown,
}

impl PrimitiveCategory {
    pub fn is_string(&self) -> bool {
        matches!(self, PrimitiveCategory::String)
    }
}

/// A typed primitive value held in an instance property bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", content = "value", rename_all = "snake_case")]
pub enum PrimitiveValue {
    String(String),
    Int(i32),
    Boolean(bool),
    /// Milliseconds since the epoch
    Date(i64),
    Long(i64),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Char(char),
}

impl PrimitiveValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PrimitiveValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn category(&self) -> PrimitiveCategory {
        match self {
            PrimitiveValue::String(_) => PrimitiveCategory::String,
            PrimitiveValue::Int(_) => PrimitiveCategory::Int,
            PrimitiveValue::Boolean(_) => PrimitiveCategory::Boolean,
            PrimitiveValue::Date(_) => PrimitiveCategory::Date,
            PrimitiveValue::Long(_) => PrimitiveCategory::Long,
            PrimitiveValue::Float(_) => PrimitiveCategory::Float,
            PrimitiveValue::Double(_) => PrimitiveCategory::Double,
            PrimitiveValue::Byte(_) => PrimitiveCategory::Byte,
            PrimitiveValue::Short(_) => PrimitiveCategory::Short,
            PrimitiveValue::Char(_) => PrimitiveCategory::Char,
        }
    }

    /// Whether a value of this kind may be stored in an attribute of `category`.
    /// Big decimals and big integers are carried as doubles.
    pub fn fits(&self, category: PrimitiveCategory) -> bool {
        match (self, category) {
            (PrimitiveValue::Double(_), PrimitiveCategory::BigDecimal)
            | (PrimitiveValue::Double(_), PrimitiveCategory::BigInteger) => true,
            (_, PrimitiveCategory::Unknown) => false,
            (value, category) => value.category() == category,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveValue::String(v) => write!(f, "{}", v),
            PrimitiveValue::Int(v) => write!(f, "{}", v),
            PrimitiveValue::Boolean(v) => write!(f, "{}", v),
            PrimitiveValue::Date(v) => write!(f, "{}", v),
            PrimitiveValue::Long(v) => write!(f, "{}", v),
            PrimitiveValue::Float(v) => write!(f, "{}", v),
            PrimitiveValue::Double(v) => write!(f, "{}", v),
            PrimitiveValue::Byte(v) => write!(f, "{}", v),
            PrimitiveValue::Short(v) => write!(f, "{}", v),
            PrimitiveValue::Char(v) => write!(f, "{}", v),
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}
