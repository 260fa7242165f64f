//! Schema collaborator used to validate permission bindings

use std::collections::{HashMap, HashSet};

/// Source of the valid (type, field) pairs of the guarded schema
pub trait SchemaCatalog: Send + Sync {
    fn has_type(&self, type_name: &str) -> bool;

    fn has_field(&self, type_name: &str, field_name: &str) -> bool;
}

/// In-memory schema description
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<String, HashSet<String>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type and its fields
    pub fn with_type<I, S>(mut self, type_name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_type(type_name, fields);
        self
    }

    /// Declare a type and its fields, merging with any earlier declaration
    pub fn add_type<I, S>(&mut self, type_name: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types
            .entry(type_name.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl SchemaCatalog for Schema {
    fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    fn has_field(&self, type_name: &str, field_name: &str) -> bool {
        self.types
            .get(type_name)
            .map(|fields| fields.contains(field_name))
            .unwrap_or(false)
    }
}
