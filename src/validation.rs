//! Rule-driven form validation.
//!
//! Each field carries up to five rules, checked in a fixed order: required,
//! min length, max length, pattern, custom. Only the first failure is
//! reported. The validator keeps the current values, the touched set and at
//! most one error per field.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::codec::StoredValue;
use crate::error::{Result, StateError};

pub type CustomRule = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A failed rule on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Built-in rules whose message can be overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rule {
    Required,
    MinLength,
    MaxLength,
    Pattern,
}

/// Rules for a single field.
#[derive(Clone, Default)]
pub struct FieldRules {
    label: Option<String>,
    required: bool,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
    custom: Option<CustomRule>,
    messages: BTreeMap<Rule, String>,
}

impl fmt::Debug for FieldRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRules")
            .field("label", &self.label)
            .field("required", &self.required)
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in default messages instead of the field key.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Compile `pattern` and use it as the pattern rule.
    pub fn pattern_str(self, pattern: &str) -> Result<Self> {
        let compiled = Regex::new(pattern)
            .map_err(|e| StateError::InvalidConfig(format!("bad pattern {pattern:?}: {e}")))?;
        Ok(self.pattern(compiled))
    }

    /// A check returning an error message, or `None` when the value passes.
    pub fn custom(mut self, f: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.custom = Some(Arc::new(f));
        self
    }

    pub fn message(mut self, rule: Rule, message: impl Into<String>) -> Self {
        self.messages.insert(rule, message.into());
        self
    }

    fn text(&self, rule: Rule, field: &str) -> String {
        if let Some(message) = self.messages.get(&rule) {
            return message.clone();
        }
        let label = self.label.as_deref().unwrap_or(field);
        match rule {
            Rule::Required => format!("{label} is required"),
            Rule::MinLength => format!(
                "{label} must be at least {} characters",
                self.min_length.unwrap_or_default()
            ),
            Rule::MaxLength => format!(
                "{label} must be no more than {} characters",
                self.max_length.unwrap_or_default()
            ),
            Rule::Pattern => format!("{label} format is invalid"),
        }
    }

    /// First failing rule's message.
    ///
    /// A blank value on an optional field skips the length and pattern
    /// rules; the custom rule always runs.
    pub fn check(&self, field: &str, value: &str) -> Option<String> {
        let blank = value.trim().is_empty();
        if self.required && blank {
            return Some(self.text(Rule::Required, field));
        }

        if !blank {
            let len = value.chars().count();
            if self.min_length.is_some_and(|min| len < min) {
                return Some(self.text(Rule::MinLength, field));
            }
            if self.max_length.is_some_and(|max| len > max) {
                return Some(self.text(Rule::MaxLength, field));
            }
            if let Some(pattern) = &self.pattern {
                if !pattern.is_match(value) {
                    return Some(self.text(Rule::Pattern, field));
                }
            }
        }

        self.custom.as_ref().and_then(|custom| custom(value))
    }
}

/// Field name to rules. Fixed for the lifetime of a validator.
#[derive(Debug, Clone, Default)]
pub struct FormValidationConfig {
    fields: BTreeMap<String, FieldRules>,
}

impl FormValidationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, rules: FieldRules) -> Self {
        self.fields.insert(name.into(), rules);
        self
    }

    pub fn rules(&self, name: &str) -> Option<&FieldRules> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Values, touched fields and errors of one form.
#[derive(Debug, Clone)]
pub struct FormValidator {
    config: Arc<FormValidationConfig>,
    values: BTreeMap<String, String>,
    touched: BTreeSet<String>,
    errors: Vec<ValidationError>,
}

impl FormValidator {
    pub fn new(config: FormValidationConfig, initial: BTreeMap<String, String>) -> Self {
        Self {
            config: Arc::new(config),
            values: initial,
            touched: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    /// Validate `value` against `name`'s rules. Unknown fields always pass.
    pub fn validate_field(&self, name: &str, value: &str) -> Option<String> {
        self.config.rules(name)?.check(name, value)
    }

    fn current(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or("")
    }

    fn revalidate(&mut self, name: &str) {
        self.errors.retain(|e| e.field != name);
        if let Some(message) = self.validate_field(name, self.current(name)) {
            self.errors.push(ValidationError {
                field: name.to_string(),
                message,
            });
        }
    }

    /// Validate every configured field, replacing all errors and touching
    /// every field. Returns whether the form is clean.
    pub fn validate_form(&mut self) -> bool {
        let names: Vec<String> = self.config.field_names().map(str::to_string).collect();
        self.errors = names
            .iter()
            .filter_map(|name| {
                self.validate_field(name, self.current(name))
                    .map(|message| ValidationError {
                        field: name.clone(),
                        message,
                    })
            })
            .collect();
        self.touched.extend(names);
        self.errors.is_empty()
    }

    /// Update a value; when `should_validate`, replace that field's error.
    pub fn set_value(&mut self, field: impl Into<String>, value: impl Into<String>, should_validate: bool) {
        let field = field.into();
        self.values.insert(field.clone(), value.into());
        if should_validate {
            self.revalidate(&field);
        }
    }

    /// Mark a field as interacted with and validate it.
    pub fn touch_field(&mut self, field: &str) {
        self.touched.insert(field.to_string());
        self.revalidate(field);
    }

    pub fn touch_all_fields(&mut self) {
        let names: Vec<String> = self.config.field_names().map(str::to_string).collect();
        for name in names {
            self.touch_field(&name);
        }
    }

    /// Recompute validity from the current values, ignoring cached errors.
    pub fn is_form_valid(&self) -> bool {
        self.config
            .field_names()
            .all(|name| self.validate_field(name, self.current(name)).is_none())
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn error(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// The field's error, but only once the field has been touched.
    pub fn visible_error(&self, field: &str) -> Option<&str> {
        if self.is_touched(field) {
            self.error(field)
        } else {
            None
        }
    }

    pub fn is_touched(&self, field: &str) -> bool {
        self.touched.contains(field)
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Replace the values and forget errors and touched state.
    pub fn reset(&mut self, values: BTreeMap<String, String>) {
        self.values = values;
        self.errors.clear();
        self.touched.clear();
    }

    /// Values as a storable object, for persisting a draft.
    pub fn stored_values(&self) -> BTreeMap<String, StoredValue> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), StoredValue::from(v.as_str())))
            .collect()
    }

    /// Adopt a persisted draft without validating it. Non-string scalars are
    /// rendered as text; nested values are skipped.
    pub fn restore_values(&mut self, stored: &BTreeMap<String, StoredValue>) {
        for (field, value) in stored {
            let text = match value {
                StoredValue::String(s) => s.clone(),
                StoredValue::Number(n) => n.to_string(),
                StoredValue::Bool(b) => b.to_string(),
                StoredValue::Null => String::new(),
                _ => continue,
            };
            self.values.insert(field.clone(), text);
        }
    }
}
