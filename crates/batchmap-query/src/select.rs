//! Field selection.

use std::fmt;

/// One selected field, optionally aliased to a backend expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectField {
    /// Name the value is exposed under on the record
    pub name: String,
    /// Expression or column the value is read from, when it differs from `name`
    pub source: Option<String>,
}

impl SelectField {
    /// A plain field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
        }
    }

    /// A field read from `source` and exposed as `name`.
    pub fn aliased(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Some(source.into()),
        }
    }

    /// The column or expression to read.
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for SelectField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{source} AS {}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The set of fields a query selects.
///
/// Once the wildcard is selected it absorbs any further selections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every field.
    All,
    /// An explicit, ordered, duplicate-free list.
    Fields(Vec<SelectField>),
}

impl Selection {
    /// An explicit selection seeded with the given fields.
    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = Selection::Fields(Vec::new());
        for name in names {
            selection.add(SelectField::new(name));
        }
        selection
    }

    /// Add a field, replacing an existing entry of the same name.
    pub fn add(&mut self, field: SelectField) {
        let Selection::Fields(fields) = self else {
            return;
        };
        if field.name == "*" {
            *self = Selection::All;
            return;
        }
        match fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => fields.push(field),
        }
    }

    /// Whether every field is selected.
    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    /// Whether `name` is selected.
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Fields(fields) => fields.iter().any(|f| f.name == name),
        }
    }

    /// The explicit fields, or `None` for the wildcard.
    pub fn explicit(&self) -> Option<&[SelectField]> {
        match self {
            Selection::All => None,
            Selection::Fields(fields) => Some(fields),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => write!(f, "*"),
            Selection::Fields(fields) => {
                let parts: Vec<String> = fields.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}
