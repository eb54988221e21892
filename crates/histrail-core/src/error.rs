use crate::source::SourceError;
use std::fmt;

/// Machine-readable error codes for operators and automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    UnknownEntityType,
    UnknownField,
    InvalidRelatedField,
    DuplicateRegistration,
    MissingRetentionWindow,
    RecordNotFound,
    SourceReadFailed,
    UnresolvableRelation,
    StoreOpenFailed,
    StoreWriteFailed,
    ArchiveCopyFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::UnknownEntityType => "E1002",
            Self::UnknownField => "E1003",
            Self::InvalidRelatedField => "E1004",
            Self::DuplicateRegistration => "E1005",
            Self::MissingRetentionWindow => "E2001",
            Self::RecordNotFound => "E2002",
            Self::SourceReadFailed => "E3001",
            Self::UnresolvableRelation => "E3002",
            Self::StoreOpenFailed => "E5001",
            Self::StoreWriteFailed => "E5002",
            Self::ArchiveCopyFailed => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::UnknownEntityType => "Unknown entity type",
            Self::UnknownField => "Unknown field",
            Self::InvalidRelatedField => "Interested field is not a relation",
            Self::DuplicateRegistration => "Entity type registered twice",
            Self::MissingRetentionWindow => "Retention window missing",
            Self::RecordNotFound => "Historical record not found",
            Self::SourceReadFailed => "Entity source read failed",
            Self::UnresolvableRelation => "Relation target cannot be resolved",
            Self::StoreOpenFailed => "History store open failed",
            Self::StoreWriteFailed => "History store write failed",
            Self::ArchiveCopyFailed => "Archive copy failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .histrail/config.toml and retry."),
            Self::UnknownEntityType => {
                Some("Register only entity types the host exposes metadata for.")
            }
            Self::UnknownField | Self::InvalidRelatedField => {
                Some("List only relation fields declared on the entity type as interested.")
            }
            Self::DuplicateRegistration => Some("Track each entity type exactly once."),
            Self::MissingRetentionWindow => {
                Some("You must supply either the days or the weeks param")
            }
            Self::RecordNotFound | Self::SourceReadFailed => None,
            Self::UnresolvableRelation => {
                Some("Declare the relation's target type to the host or exclude the field.")
            }
            Self::StoreOpenFailed => Some("Check the --db path and its directory permissions."),
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::ArchiveCopyFailed => {
                Some("Re-run the archive job; already copied records are not duplicated.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Fatal registration-time failures. Raised once, at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("entity type '{0}' is not known to the host")]
    UnknownEntityType(String),

    #[error("'{field}' is not a field of '{entity_type}'")]
    UnknownField { entity_type: String, field: String },

    #[error("'{field}' on '{entity_type}' is not a relation field and cannot be interested")]
    InvalidRelatedField { entity_type: String, field: String },

    #[error("entity type '{0}' is already tracked")]
    DuplicateRegistration(String),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownEntityType(_) => ErrorCode::UnknownEntityType,
            Self::UnknownField { .. } => ErrorCode::UnknownField,
            Self::InvalidRelatedField { .. } => ErrorCode::InvalidRelatedField,
            Self::DuplicateRegistration(_) => ErrorCode::DuplicateRegistration,
        }
    }
}

/// Usage errors for retention-window arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RetentionError {
    #[error("You must supply either the days or the weeks param")]
    MissingWindow,
}

impl RetentionError {
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        match self {
            Self::MissingWindow => ErrorCode::MissingRetentionWindow,
        }
    }
}

/// Failure resolving one relation field during propagation. Never fatal:
/// the field is logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropagationError {
    #[error("'{field}' on '{entity_type}' targets '{target}', which the host does not know")]
    UnknownTarget {
        entity_type: String,
        field: String,
        target: String,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl PropagationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTarget { .. } => ErrorCode::UnresolvableRelation,
            Self::Source(_) => ErrorCode::SourceReadFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ErrorCode, PropagationError, RetentionError};
    use std::collections::HashSet;

    const ALL: [ErrorCode; 13] = [
        ErrorCode::ConfigParseError,
        ErrorCode::UnknownEntityType,
        ErrorCode::UnknownField,
        ErrorCode::InvalidRelatedField,
        ErrorCode::DuplicateRegistration,
        ErrorCode::MissingRetentionWindow,
        ErrorCode::RecordNotFound,
        ErrorCode::SourceReadFailed,
        ErrorCode::UnresolvableRelation,
        ErrorCode::StoreOpenFailed,
        ErrorCode::StoreWriteFailed,
        ErrorCode::ArchiveCopyFailed,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let raw = code.code();
            assert_eq!(raw.len(), 5);
            assert!(raw.starts_with('E'));
            assert!(raw[1..].chars().all(|c| c.is_ascii_digit()));
            assert!(!code.message().is_empty());
        }
    }

    #[test]
    fn typed_errors_map_to_codes() {
        let err = ConfigError::InvalidRelatedField {
            entity_type: "Episode".into(),
            field: "title".into(),
        };
        assert_eq!(err.code(), ErrorCode::InvalidRelatedField);
        assert!(err.to_string().contains("title"));

        assert_eq!(
            RetentionError::MissingWindow.to_string(),
            "You must supply either the days or the weeks param"
        );
        assert_eq!(
            RetentionError::MissingWindow.code().to_string(),
            "E2001"
        );

        let err = PropagationError::UnknownTarget {
            entity_type: "Episode".into(),
            field: "studio".into(),
            target: "Studio".into(),
        };
        assert_eq!(err.code().code(), "E3002");
    }
}
