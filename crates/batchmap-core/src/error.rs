//! Error types for batchmap operations.

use std::fmt;

/// The primary error type for all batchmap operations.
#[derive(Debug)]
pub enum Error {
    /// A record was requested by an identity that was never staged or loaded
    UnresolvedIdentity(UnresolvedIdentityError),
    /// An association was used in a way the engine does not support
    Association(AssociationError),
    /// A fetch was attempted on a query that already completed
    FrozenQuery(FrozenQueryError),
    /// An entity, association, scope, context or repository name did not resolve
    Schema(SchemaError),
    /// The identity map was touched outside its owning execution context
    Context(ContextError),
    /// Connection provider errors (checkout, release)
    Connection(ConnectionError),
    /// Backend fetch errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct UnresolvedIdentityError {
    pub entity: String,
    pub field: String,
    pub key: String,
}

#[derive(Debug)]
pub struct AssociationError {
    pub kind: AssociationErrorKind,
    pub entity: String,
    pub association: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationErrorKind {
    /// A filter was attached to a tracked to-one (or to-one-via-array) association
    FilteredToOne,
    /// The association kind has no staging support
    Unimplemented,
}

#[derive(Debug)]
pub struct FrozenQueryError {
    pub entity: String,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Entity type not declared
    UnknownEntity,
    /// Association not declared on the entity
    UnknownAssociation,
    /// Scope name not active
    UnknownScope,
    /// Context not declared on the entity
    UnknownContext,
    /// Repository not registered
    UnknownRepository,
    /// Field not present on a record
    UnknownField,
    /// Invalid schema definition
    Invalid,
}

#[derive(Debug)]
pub struct ContextError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to check out a connection
    Checkout,
    /// Failed to release a connection
    Release,
    /// The handle was not of the type the backend expected
    WrongHandle,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub entity: String,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// The backend cannot interpret the filter (e.g. a raw fragment)
    UnsupportedFilter,
    /// The backend returned a row that does not fit the entity
    MalformedRow,
    /// Other backend error
    Backend,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Is this a local-contract violation (a programming error in the caller)?
    ///
    /// Usage errors are never retried; they terminate the unit of work.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedIdentity(_)
                | Error::Association(_)
                | Error::FrozenQuery(_)
                | Error::Schema(_)
                | Error::Context(_)
        )
    }

    /// Get the schema error kind if this is a schema error.
    pub fn schema_kind(&self) -> Option<SchemaErrorKind> {
        match self {
            Error::Schema(e) => Some(e.kind),
            _ => None,
        }
    }

    pub(crate) fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for an unknown-entity error.
    pub fn unknown_entity(entity: &str) -> Self {
        Self::schema(
            SchemaErrorKind::UnknownEntity,
            format!("entity {entity:?} is not declared"),
        )
    }

    /// Shorthand for an unknown-association error.
    pub fn unknown_association(entity: &str, association: &str) -> Self {
        Self::schema(
            SchemaErrorKind::UnknownAssociation,
            format!("association {association:?} not found for {entity}"),
        )
    }

    /// Shorthand for a schema error of any kind.
    pub fn invalid_schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Self::schema(kind, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnresolvedIdentity(e) => write!(f, "Unresolved identity: {}", e),
            Error::Association(e) => write!(f, "Association error: {}", e),
            Error::FrozenQuery(e) => write!(f, "Query error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Context(e) => write!(f, "Context error: {}", e.message),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error on {}: {}", e.entity, e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for UnresolvedIdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "did not load {} with {} = {}",
            self.entity, self.field, self.key
        )
    }
}

impl fmt::Display for AssociationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for association {:?} of {}",
            self.message, self.association, self.entity
        )
    }
}

impl fmt::Display for FrozenQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can not reuse a frozen query for {}", self.entity)
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<UnresolvedIdentityError> for Error {
    fn from(err: UnresolvedIdentityError) -> Self {
        Error::UnresolvedIdentity(err)
    }
}

impl From<AssociationError> for Error {
    fn from(err: AssociationError) -> Self {
        Error::Association(err)
    }
}

impl From<FrozenQueryError> for Error {
    fn from(err: FrozenQueryError) -> Self {
        Error::FrozenQuery(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        Error::Context(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for batchmap operations.
pub type Result<T> = std::result::Result<T, Error>;
