use crate::model::Id;

/// Coarse classification used by the harness to decide how to react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The repository legitimately does not offer the operation
    CapabilityGap,
    /// The request was refused as invalid for the target instance
    InvalidParameter,
    /// The request named a type or property the target cannot take
    Validation,
    NotKnown,
    /// Detail was requested for an instance held only as a proxy
    ProxyOnly,
    Fault,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{operation} is not supported by metadata collection {metadata_collection_id}")]
    NotSupported {
        operation: String,
        metadata_collection_id: Id,
    },
    #[error("entity {guid} is not known")]
    EntityNotKnown { guid: Id },
    #[error("relationship {guid} is not known")]
    RelationshipNotKnown { guid: Id },
    #[error("entity {guid} is only held as a proxy")]
    EntityProxyOnly { guid: Id },
    #[error("invalid parameter for {operation}: {message}")]
    InvalidParameter { operation: String, message: String },
    #[error("type error: {message}")]
    TypeError { message: String },
    #[error("property error: {message}")]
    PropertyError { message: String },
    #[error("instance {guid} must be deleted before it can be purged")]
    InstanceNotDeleted { guid: Id },
    #[error("instance {guid} is already deleted")]
    AlreadyDeleted { guid: Id },
    #[error("repository fault: {message}")]
    RepositoryFault { message: String },
}

impl RepositoryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RepositoryError::NotSupported { .. } => ErrorClass::CapabilityGap,
            RepositoryError::EntityNotKnown { .. } | RepositoryError::RelationshipNotKnown { .. } => {
                ErrorClass::NotKnown
            }
            RepositoryError::EntityProxyOnly { .. } => ErrorClass::ProxyOnly,
            RepositoryError::InvalidParameter { .. } => ErrorClass::InvalidParameter,
            RepositoryError::TypeError { .. } | RepositoryError::PropertyError { .. } => ErrorClass::Validation,
            RepositoryError::InstanceNotDeleted { .. }
            | RepositoryError::AlreadyDeleted { .. }
            | RepositoryError::RepositoryFault { .. } => ErrorClass::Fault,
        }
    }

    /// Short name of the variant, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            RepositoryError::NotSupported { .. } => "NotSupported",
            RepositoryError::EntityNotKnown { .. } => "EntityNotKnown",
            RepositoryError::RelationshipNotKnown { .. } => "RelationshipNotKnown",
            RepositoryError::EntityProxyOnly { .. } => "EntityProxyOnly",
            RepositoryError::InvalidParameter { .. } => "InvalidParameter",
            RepositoryError::TypeError { .. } => "TypeError",
            RepositoryError::PropertyError { .. } => "PropertyError",
            RepositoryError::InstanceNotDeleted { .. } => "InstanceNotDeleted",
            RepositoryError::AlreadyDeleted { .. } => "AlreadyDeleted",
            RepositoryError::RepositoryFault { .. } => "RepositoryFault",
        }
    }

    pub fn invalid(operation: &str, message: impl Into<String>) -> Self {
        RepositoryError::InvalidParameter {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let gap = RepositoryError::NotSupported {
            operation: "addEntityProxy".into(),
            metadata_collection_id: "tut".into(),
        };
        assert_eq!(gap.class(), ErrorClass::CapabilityGap);
        assert_eq!(
            RepositoryError::invalid("reTypeEntity", "reference copy").class(),
            ErrorClass::InvalidParameter
        );
        assert_eq!(
            RepositoryError::TypeError { message: "x".into() }.class(),
            ErrorClass::Validation
        );
        assert_eq!(
            RepositoryError::PropertyError { message: "x".into() }.class(),
            ErrorClass::Validation
        );
        assert_eq!(
            RepositoryError::EntityProxyOnly { guid: "e".into() }.class(),
            ErrorClass::ProxyOnly
        );
        assert_eq!(
            RepositoryError::RepositoryFault { message: "down".into() }.class(),
            ErrorClass::Fault
        );
        assert_eq!(gap.to_string(), "addEntityProxy is not supported by metadata collection tut");
    }
}
