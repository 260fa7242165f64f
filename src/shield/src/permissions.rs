//! Permission map: binds rules to schema fields

use crate::error::{Result, ShieldError};
use crate::rule::{validate_rule_name, Rule, RuleId};
use crate::schema::SchemaCatalog;
use crate::types::FieldLocator;
use std::collections::HashMap;
use tracing::info;

/// Process-wide, read-only binding of rules to fields
///
/// Lookup precedence: exact (type, field) binding, then the type's
/// fallback, then the global fallback. When none applies
/// [`resolve`](Self::resolve) returns `None` and the field is **not guarded**.
/// Bind a global [`deny`](crate::deny) fallback to invert that default.
pub struct PermissionMap {
    fields: HashMap<String, HashMap<String, Rule>>,
    types: HashMap<String, Rule>,
    default: Option<Rule>,
}

impl PermissionMap {
    pub fn builder() -> PermissionMapBuilder {
        PermissionMapBuilder::default()
    }

    /// Rule guarding a field, if any
    pub fn resolve(&self, type_name: &str, field_name: &str) -> Option<&Rule> {
        self.fields
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .or_else(|| self.types.get(type_name))
            .or(self.default.as_ref())
    }

    /// Rule guarding a field, if any
    pub fn resolve_locator(&self, locator: &FieldLocator) -> Option<&Rule> {
        self.resolve(&locator.type_name, &locator.field_name)
    }

    /// Number of exact field bindings
    pub fn field_bindings(&self) -> usize {
        self.fields.values().map(HashMap::len).sum()
    }

    /// Number of type fallbacks
    pub fn type_bindings(&self) -> usize {
        self.types.len()
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Collects bindings; validation happens in [`build`](Self::build)
#[derive(Default)]
pub struct PermissionMapBuilder {
    fields: Vec<(FieldLocator, Rule)>,
    types: Vec<(String, Rule)>,
    defaults: Vec<Rule>,
}

impl PermissionMapBuilder {
    /// Guard one field
    pub fn bind(
        mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        rule: Rule,
    ) -> Self {
        self.fields
            .push((FieldLocator::new(type_name, field_name), rule));
        self
    }

    /// Guard every field of a type that has no exact binding
    pub fn bind_type(mut self, type_name: impl Into<String>, rule: Rule) -> Self {
        self.types.push((type_name.into(), rule));
        self
    }

    /// Guard every field with no exact or type binding
    pub fn bind_default(mut self, rule: Rule) -> Self {
        self.defaults.push(rule);
        self
    }

    /// Validate against the schema and freeze the map
    ///
    /// # Errors
    ///
    /// - [`ShieldError::DuplicateBinding`], [`ShieldError::DuplicateTypeFallback`],
    ///   [`ShieldError::DuplicateDefault`] for repeated bindings
    /// - [`ShieldError::UnknownType`] / [`ShieldError::UnknownField`] for
    ///   bindings the schema does not define
    /// - [`ShieldError::ConflictingRuleName`] when two distinct rules share a
    ///   name
    /// - [`ShieldError::InvalidRuleName`] when a rule name could collide with
    ///   a composite id
    pub fn build(self, schema: &dyn SchemaCatalog) -> Result<PermissionMap> {
        for (locator, _) in &self.fields {
            if !schema.has_type(&locator.type_name) {
                return Err(ShieldError::UnknownType(locator.type_name.clone()));
            }
            if !schema.has_field(&locator.type_name, &locator.field_name) {
                return Err(ShieldError::UnknownField(locator.clone()));
            }
        }

        for (type_name, _) in &self.types {
            if !schema.has_type(type_name) {
                return Err(ShieldError::UnknownType(type_name.clone()));
            }
        }

        self.build_unchecked()
    }

    /// Freeze the map without consulting a schema; duplicate and name
    /// checks still apply
    pub fn build_unchecked(self) -> Result<PermissionMap> {
        self.check_rule_names()?;

        let mut fields: HashMap<String, HashMap<String, Rule>> = HashMap::new();
        for (locator, rule) in self.fields {
            let by_field = fields.entry(locator.type_name.clone()).or_default();
            if by_field.contains_key(&locator.field_name) {
                return Err(ShieldError::DuplicateBinding(locator));
            }
            by_field.insert(locator.field_name, rule);
        }

        let mut types = HashMap::new();
        for (type_name, rule) in self.types {
            if types.contains_key(&type_name) {
                return Err(ShieldError::DuplicateTypeFallback(type_name));
            }
            types.insert(type_name, rule);
        }

        let mut defaults = self.defaults.into_iter();
        let default = defaults.next();
        if defaults.next().is_some() {
            return Err(ShieldError::DuplicateDefault);
        }

        let map = PermissionMap {
            fields,
            types,
            default,
        };

        info!(
            "PermissionMap built with {} field bindings, {} type fallbacks, default={}",
            map.field_bindings(),
            map.type_bindings(),
            map.has_default()
        );

        Ok(map)
    }

    /// Distinct rules must not share a name, and no name may spell a
    /// composite id, or they would share cache entries within a request
    fn check_rule_names(&self) -> Result<()> {
        let mut seen: HashMap<RuleId, usize> = HashMap::new();
        let mut invalid = None;
        let mut conflict = None;

        let rules = self
            .fields
            .iter()
            .map(|(_, rule)| rule)
            .chain(self.types.iter().map(|(_, rule)| rule))
            .chain(self.defaults.iter());

        for rule in rules {
            rule.visit_named(&mut |id, ptr| {
                if invalid.is_none() && validate_rule_name(id).is_err() {
                    invalid = Some(id.clone());
                }
                if let Some(existing) = seen.insert(id.clone(), ptr) {
                    if existing != ptr && conflict.is_none() {
                        conflict = Some(id.clone());
                    }
                }
            });
        }

        if let Some(id) = invalid {
            return Err(ShieldError::InvalidRuleName(id.to_string()));
        }

        match conflict {
            Some(id) => Err(ShieldError::ConflictingRuleName(id.to_string())),
            None => Ok(()),
        }
    }
}
