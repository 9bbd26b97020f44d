//! Entity schema metadata.
//!
//! An [`EntitySchema`] describes one entity type: its identities, its
//! associations, the scopes it opts out of, fields that hold JSON text and
//! named contexts. Schemas are declared up front and resolved once through a
//! [`SchemaBuilder`], which checks association targets and fills in default
//! match fields.

use crate::error::{Error, SchemaErrorKind};
use crate::key::KeyField;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The type of association between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationKind {
    /// Local field holds the target's key.
    ToOne,
    /// Target field holds the local key.
    ToMany,
    /// Local field holds an array of target keys.
    ToOneViaArray,
    /// Target field holds an array of local keys.
    ToManyViaArray,
}

impl AssociationKind {
    /// Whether the association yields at most one record per key.
    #[must_use]
    pub const fn is_to_one(self) -> bool {
        matches!(self, AssociationKind::ToOne)
    }

    /// Whether the association resolves through an array-valued field.
    #[must_use]
    pub const fn is_via_array(self) -> bool {
        matches!(
            self,
            AssociationKind::ToOneViaArray | AssociationKind::ToManyViaArray
        )
    }

    /// Whether the association is declared on the local side.
    ///
    /// For these kinds the key field lives on the source record and the match
    /// field on the target.
    #[must_use]
    pub const fn is_local_keyed(self) -> bool {
        matches!(
            self,
            AssociationKind::ToOne | AssociationKind::ToOneViaArray
        )
    }

    /// Short name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AssociationKind::ToOne => "to-one",
            AssociationKind::ToMany => "to-many",
            AssociationKind::ToOneViaArray => "to-one-via-array",
            AssociationKind::ToManyViaArray => "to-many-via-array",
        }
    }
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named association from one entity to another.
///
/// `key` is the field that carries the reference: on the source for
/// [`ToOne`](AssociationKind::ToOne) and
/// [`ToOneViaArray`](AssociationKind::ToOneViaArray), on the target for the
/// to-many kinds. `primary_key` is the field it is matched against on the
/// other side. When not given, it defaults to the first identity of the
/// target (local-keyed kinds) or of the source (to-many kinds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    name: String,
    kind: AssociationKind,
    entity: String,
    key: KeyField,
    primary_key: Option<KeyField>,
}

impl Association {
    /// Create an association of the given kind.
    pub fn new(
        name: impl Into<String>,
        kind: AssociationKind,
        entity: impl Into<String>,
        key: impl Into<KeyField>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            entity: entity.into(),
            key: key.into(),
            primary_key: None,
        }
    }

    /// Local field `key` references `entity`.
    pub fn to_one(
        name: impl Into<String>,
        entity: impl Into<String>,
        key: impl Into<KeyField>,
    ) -> Self {
        Self::new(name, AssociationKind::ToOne, entity, key)
    }

    /// Field `key` on `entity` references this entity.
    pub fn to_many(
        name: impl Into<String>,
        entity: impl Into<String>,
        key: impl Into<KeyField>,
    ) -> Self {
        Self::new(name, AssociationKind::ToMany, entity, key)
    }

    /// Local array field `key` lists keys of `entity`.
    pub fn to_one_via_array(
        name: impl Into<String>,
        entity: impl Into<String>,
        key: impl Into<KeyField>,
    ) -> Self {
        Self::new(name, AssociationKind::ToOneViaArray, entity, key)
    }

    /// Array field `key` on `entity` lists keys of this entity.
    pub fn to_many_via_array(
        name: impl Into<String>,
        entity: impl Into<String>,
        key: impl Into<KeyField>,
    ) -> Self {
        Self::new(name, AssociationKind::ToManyViaArray, entity, key)
    }

    /// Set the match field explicitly.
    #[must_use]
    pub fn primary_key(mut self, field: impl Into<KeyField>) -> Self {
        self.primary_key = Some(field.into());
        self
    }

    /// Association name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Association kind.
    pub const fn kind(&self) -> AssociationKind {
        self.kind
    }

    /// Target entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The field carrying the reference.
    pub fn key(&self) -> &KeyField {
        &self.key
    }

    /// The field the reference is matched against.
    ///
    /// Always set once the schema has been built.
    pub fn match_key(&self) -> &KeyField {
        self.primary_key.as_ref().unwrap_or(&self.key)
    }
}

/// A named bundle of selected fields and tracked associations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Fields to select
    pub select: Vec<String>,
    /// Associations to track
    pub track: Vec<String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add selected fields.
    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add tracked associations.
    #[must_use]
    pub fn track<I, S>(mut self, associations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.track.extend(associations.into_iter().map(Into::into));
        self
    }
}

/// Metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    table: Option<String>,
    repository: String,
    identities: Vec<KeyField>,
    associations: Vec<Association>,
    excluded_scopes: Vec<String>,
    serialized_fields: Vec<String>,
    contexts: HashMap<String, Context>,
}

impl EntitySchema {
    /// Start describing an entity. It lives in the `default` repository
    /// until told otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            repository: "default".to_string(),
            identities: Vec::new(),
            associations: Vec::new(),
            excluded_scopes: Vec::new(),
            serialized_fields: Vec::new(),
            contexts: HashMap::new(),
        }
    }

    /// Set the backing table or collection name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Set the repository the entity is fetched from.
    #[must_use]
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    /// Declare an identity. The first one declared is the primary identity.
    #[must_use]
    pub fn identity(mut self, field: impl Into<KeyField>) -> Self {
        let field = field.into();
        if !self.identities.contains(&field) {
            self.identities.push(field);
        }
        self
    }

    /// Declare an association.
    #[must_use]
    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    /// Opt out of a named scope.
    #[must_use]
    pub fn exclude_scope(mut self, scope: impl Into<String>) -> Self {
        self.excluded_scopes.push(scope.into());
        self
    }

    /// Declare a field that holds JSON text.
    #[must_use]
    pub fn serialized(mut self, field: impl Into<String>) -> Self {
        self.serialized_fields.push(field.into());
        self
    }

    /// Declare a named context.
    #[must_use]
    pub fn context(mut self, name: impl Into<String>, context: Context) -> Self {
        self.contexts.insert(name.into(), context);
        self
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing table name, defaulting to the entity name.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Repository name.
    pub fn repository_name(&self) -> &str {
        &self.repository
    }

    /// All declared identities.
    pub fn identities(&self) -> &[KeyField] {
        &self.identities
    }

    /// The primary identity.
    pub fn primary_identity(&self) -> Option<&KeyField> {
        self.identities.first()
    }

    /// Whether `field` is one of the declared identities.
    pub fn is_identity(&self, field: &KeyField) -> bool {
        self.identities.contains(field)
    }

    /// Every field that participates in some identity, deduplicated in
    /// declaration order.
    pub fn identity_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for identity in &self.identities {
            for field in identity.fields() {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        fields
    }

    /// All declared associations.
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Look up an association by name.
    #[allow(clippy::result_large_err)]
    pub fn association_named(&self, name: &str) -> Result<&Association> {
        self.associations
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::unknown_association(&self.name, name))
    }

    /// Whether the entity opts out of the named scope.
    pub fn excludes_scope(&self, scope: &str) -> bool {
        self.excluded_scopes.iter().any(|s| s == scope)
    }

    /// Whether `field` holds JSON text.
    pub fn is_serialized(&self, field: &str) -> bool {
        self.serialized_fields.iter().any(|f| f == field)
    }

    /// Look up a context by name.
    #[allow(clippy::result_large_err)]
    pub fn context_named(&self, name: &str) -> Result<&Context> {
        self.contexts.get(name).ok_or_else(|| {
            Error::invalid_schema(
                SchemaErrorKind::UnknownContext,
                format!("context {name:?} is not defined for {}", self.name),
            )
        })
    }
}

/// The resolved set of entity schemas.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: HashMap<String, Arc<EntitySchema>>,
}

impl Schema {
    /// Start declaring a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Look up an entity by name.
    #[allow(clippy::result_large_err)]
    pub fn entity(&self, name: &str) -> Result<&Arc<EntitySchema>> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::unknown_entity(name))
    }

    /// Whether an entity is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Iterate over entity names, in no particular order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

/// Collects entity declarations and resolves them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntitySchema>,
}

impl SchemaBuilder {
    /// Add an entity.
    #[must_use]
    pub fn entity(mut self, entity: EntitySchema) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate declarations and fill in default match fields.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<Schema> {
        let mut primaries: HashMap<String, KeyField> = HashMap::new();
        for entity in &self.entities {
            let Some(primary) = entity.primary_identity() else {
                return Err(Error::invalid_schema(
                    SchemaErrorKind::Invalid,
                    format!("entity {} declares no identity", entity.name),
                ));
            };
            if primaries
                .insert(entity.name.clone(), primary.clone())
                .is_some()
            {
                return Err(Error::invalid_schema(
                    SchemaErrorKind::Invalid,
                    format!("entity {} is declared twice", entity.name),
                ));
            }
        }

        let mut entities = HashMap::with_capacity(self.entities.len());
        for mut entity in self.entities {
            let own_primary = primaries
                .get(&entity.name)
                .cloned()
                .ok_or_else(|| Error::unknown_entity(&entity.name))?;

            for association in &mut entity.associations {
                let target_primary = primaries
                    .get(&association.entity)
                    .ok_or_else(|| Error::unknown_entity(&association.entity))?;

                if association.primary_key.is_none() {
                    association.primary_key = Some(if association.kind.is_local_keyed() {
                        target_primary.clone()
                    } else {
                        own_primary.clone()
                    });
                }
            }

            for (context_name, context) in &entity.contexts {
                for tracked in &context.track {
                    if !entity.associations.iter().any(|a| &a.name == tracked) {
                        return Err(Error::invalid_schema(
                            SchemaErrorKind::UnknownAssociation,
                            format!(
                                "context {context_name:?} of {} tracks unknown association {tracked:?}",
                                entity.name
                            ),
                        ));
                    }
                }
            }

            entities.insert(entity.name.clone(), Arc::new(entity));
        }

        Ok(Schema { entities })
    }
}
