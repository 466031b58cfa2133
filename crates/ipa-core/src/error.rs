//! Error types for directory operations.
//!
//! Every fault raised by the protocol layer is translated into one of the kinds below before it
//! reaches a caller, so callers never deal with raw LDAP result codes.

use thiserror::Error;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The requested entry (or object) does not exist
    #[error("Not found: {reason}")]
    NotFound {
        /// What was being looked up
        reason: String,
    },

    /// An entry with the same DN or unique attribute value already exists
    #[error("This entry already exists")]
    DuplicateEntry,

    /// Insufficient access, invalid credentials or inappropriate authentication
    #[error("Insufficient access: {info}")]
    AccessDenied {
        /// Diagnostic detail from the server
        info: String,
    },

    /// The entry was modified concurrently and the pending change is stale
    #[error("change collided with another change")]
    MidairCollision,

    /// A value does not conform to its attribute syntax
    #[error("{attr}: invalid syntax")]
    InvalidSyntax {
        /// Attribute (or server diagnostic naming it)
        attr: String,
    },

    /// The change violates an object class definition
    #[error("Object class violation: {info}")]
    ObjectClassViolation {
        /// Diagnostic detail from the server
        info: String,
    },

    /// An administrative, size or time limit was hit
    #[error("limits exceeded for this query")]
    LimitsExceeded,

    /// The attribute is part of the RDN and cannot be modified
    #[error("attribute {attr:?} not allowed to be modified")]
    NotAllowedOnRdn {
        /// Attribute (or server diagnostic naming it)
        attr: String,
    },

    /// The search filter is malformed
    #[error("Bad search filter {info}")]
    BadSearchFilter {
        /// Diagnostic detail from the server
        info: String,
    },

    /// A delete targeted an entry that still has children
    #[error("Not allowed on non-leaf entry")]
    NotAllowedOnNonLeaf,

    /// The directory server could not be reached
    #[error("cannot connect to '{uri}': {error}")]
    NetworkError {
        /// Server URI
        uri: String,
        /// Transport diagnostic
        error: String,
    },

    /// The operation timed out
    #[error("LDAP timeout")]
    DatabaseTimeout,

    /// Unexpected protocol fault
    #[error("{desc}: {info}")]
    DatabaseError {
        /// Short description of the fault
        desc: String,
        /// Raw diagnostic text
        info: String,
    },

    /// An update produced no changes
    #[error("no modifications to be performed")]
    EmptyModlist,

    /// A single-valued attribute was given more than one new value
    #[error("{attr}: Only one value allowed.")]
    OnlyOneValueAllowed {
        /// Attribute name
        attr: String,
    },

    /// A lookup that must match one entry matched several
    #[error("The search criteria was not specific enough. Expected 1 and found {found}.")]
    SingleMatchExpected {
        /// Number of entries found
        found: usize,
    },

    /// A wire value could not be decoded into its schema type
    #[error("unable to convert the attribute {attr:?} value {value:?}")]
    InvalidValue {
        /// Attribute name
        attr: String,
        /// Offending raw value (lossy text form)
        value: String,
    },

    /// A value of a kind that cannot be sent to the directory
    #[error("attempt to pass unsupported type to ldap: {0}")]
    UnsupportedValue(String),

    /// A single-valued read found several values
    #[error("{attr} has {count} values, one expected")]
    TooManyValues {
        /// Attribute name
        attr: String,
        /// Number of values present
        count: usize,
    },

    /// A distinguished name could not be parsed
    #[error("Invalid DN: {0}")]
    InvalidDn(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::NotFound`].
    #[must_use]
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DuplicateEntry => "DUPLICATE_ENTRY",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::MidairCollision => "MIDAIR_COLLISION",
            Self::InvalidSyntax { .. } => "INVALID_SYNTAX",
            Self::ObjectClassViolation { .. } => "OBJECTCLASS_VIOLATION",
            Self::LimitsExceeded => "LIMITS_EXCEEDED",
            Self::NotAllowedOnRdn { .. } => "NOT_ALLOWED_ON_RDN",
            Self::BadSearchFilter { .. } => "BAD_SEARCH_FILTER",
            Self::NotAllowedOnNonLeaf => "NOT_ALLOWED_ON_NON_LEAF",
            Self::NetworkError { .. } => "NETWORK_ERROR",
            Self::DatabaseTimeout => "DATABASE_TIMEOUT",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
            Self::EmptyModlist => "EMPTY_MODLIST",
            Self::OnlyOneValueAllowed { .. } => "ONLY_ONE_VALUE_ALLOWED",
            Self::SingleMatchExpected { .. } => "SINGLE_MATCH_EXPECTED",
            Self::InvalidValue { .. } => "INVALID_VALUE",
            Self::UnsupportedValue(_) => "UNSUPPORTED_VALUE",
            Self::TooManyValues { .. } => "TOO_MANY_VALUES",
            Self::InvalidDn(_) => "INVALID_DN",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError { .. }
                | Self::NetworkError { .. }
                | Self::ConfigError(_)
                | Self::InvalidValue { .. }
        )
    }

    /// Returns true for caller mistakes that will fail again unchanged.
    ///
    /// Nothing in this workspace retries; the classification is for callers.
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::OnlyOneValueAllowed { .. }
                | Self::EmptyModlist
                | Self::InvalidSyntax { .. }
                | Self::ObjectClassViolation { .. }
                | Self::NotAllowedOnRdn { .. }
                | Self::BadSearchFilter { .. }
                | Self::InvalidValue { .. }
                | Self::UnsupportedValue(_)
                | Self::InvalidDn(_)
        )
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid LDAP URI: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}
