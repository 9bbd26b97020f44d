//! Named filter conditions applied to every query.

use crate::filter::Filter;
use batchmap_core::{EntitySchema, Value};

/// One named `(field, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeCondition {
    /// Scope name, e.g. `account`
    pub name: String,
    /// Field the condition applies to
    pub field: String,
    /// Required value; an array means any of its elements
    pub value: Value,
}

impl ScopeCondition {
    /// The condition as a filter.
    pub fn to_filter(&self) -> Filter {
        Filter::matching(self.field.clone(), self.value.clone())
    }
}

/// An ordered set of named conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    conditions: Vec<ScopeCondition>,
}

impl Scope {
    /// An empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition, builder style.
    #[must_use]
    pub fn with(
        mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.insert(name, field, value);
        self
    }

    /// Add a condition. A condition with the same name is replaced in place.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) {
        let condition = ScopeCondition {
            name: name.into(),
            field: field.into(),
            value: value.into(),
        };
        match self.conditions.iter_mut().find(|c| c.name == condition.name) {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    /// Remove a condition by name.
    pub fn remove(&mut self, name: &str) -> Option<ScopeCondition> {
        let index = self.conditions.iter().position(|c| c.name == name)?;
        Some(self.conditions.remove(index))
    }

    /// Look up a condition by name.
    pub fn get(&self, name: &str) -> Option<&ScopeCondition> {
        self.conditions.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScopeCondition> {
        self.conditions.iter()
    }

    /// Conditions that apply to `entity`, i.e. those it does not exclude.
    pub fn applicable<'a>(
        &'a self,
        entity: &'a EntitySchema,
    ) -> impl Iterator<Item = &'a ScopeCondition> + 'a {
        self.conditions
            .iter()
            .filter(move |c| !entity.excludes_scope(&c.name))
    }

    /// AND the applicable conditions into `filter`.
    pub fn merge(&self, entity: &EntitySchema, filter: Option<&Filter>) -> Option<Filter> {
        let mut merged = filter.cloned();
        for condition in self.applicable(entity) {
            let next = condition.to_filter();
            merged = Some(match merged {
                Some(current) => current.and(next),
                None => next,
            });
        }
        merged
    }
}
