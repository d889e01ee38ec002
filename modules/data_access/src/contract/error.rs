//! Contract error types for the data access service
//!
//! These errors are transport-agnostic and used for inter-module communication.
//! Validation and authorization failures are distinct kinds.

use std::collections::BTreeMap;

/// Data access domain errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAccessError {
    /// Payload or request validation failed
    Validation {
        /// field -> reason
        errors: BTreeMap<String, String>,
    },
    /// Filter or sort referenced a field the entity does not have
    InvalidField {
        /// Field name as supplied
        field: String,
    },
    /// Value kind not usable with the field or operator
    InvalidValueType {
        /// Field name as supplied
        field: String,
        /// Error details
        details: String,
    },
    /// Table or row not found
    NotFound {
        /// Resource type (table, row)
        resource: String,
        /// Resource identifier
        id: String,
    },
    /// A unique field already holds the supplied value
    DuplicateEntry {
        /// Offending fields
        fields: Vec<String>,
    },
    /// Identity lacks the permission for the operation
    Unauthorized {
        /// Denial reason
        reason: String,
    },
    /// Missing, unknown or expired session, or bad credentials
    Unauthenticated,
    /// Stored value could not be converted to the field type
    Conversion {
        /// Storage column
        column: String,
        /// Error details
        details: String,
    },
    /// Relational or session store failure
    Store {
        /// Error details
        message: String,
    },
}

impl DataAccessError {
    /// Single-field validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), reason.into());
        Self::Validation { errors }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

impl std::fmt::Display for DataAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { errors } => {
                let details: Vec<String> = errors
                    .iter()
                    .map(|(field, reason)| format!("{}: {}", field, reason))
                    .collect();
                write!(f, "Validation error: {}", details.join(", "))
            }
            Self::InvalidField { field } => {
                write!(f, "Invalid field name {}", field)
            }
            Self::InvalidValueType { field, details } => {
                write!(f, "Invalid value type for {}: {}", field, details)
            }
            Self::NotFound { resource, id } => {
                write!(f, "{} not found: {}", resource, id)
            }
            Self::DuplicateEntry { fields } => {
                write!(f, "Entry with mentioned data already exists ({})", fields.join(", "))
            }
            Self::Unauthorized { reason } => {
                write!(f, "Unauthorized: {}", reason)
            }
            Self::Unauthenticated => {
                write!(f, "Unauthenticated")
            }
            Self::Conversion { column, details } => {
                write!(f, "Unable to convert column {}: {}", column, details)
            }
            Self::Store { message } => {
                write!(f, "Store error: {}", message)
            }
        }
    }
}

impl std::error::Error for DataAccessError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_lists_fields_in_order() {
        let mut errors = BTreeMap::new();
        errors.insert("name".to_string(), "required".to_string());
        errors.insert("color".to_string(), "oneof".to_string());
        let err = DataAccessError::Validation { errors };
        assert_eq!(err.to_string(), "Validation error: color: oneof, name: required");
    }

    #[test]
    fn test_error_kinds_are_distinguishable() {
        let denied = DataAccessError::unauthorized("no create access to widget");
        let invalid = DataAccessError::validation("name", "required");
        assert!(denied.is_unauthorized());
        assert!(!invalid.is_unauthorized());
        assert_ne!(denied, invalid);
    }
}
