//! Named, typed actor parameters with explicit change events.

use crate::errors::ParameterError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Int(_) => "int",
            ParameterValue::Float(_) => "float",
            ParameterValue::Text(_) => "text",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Coerces `self` to the type of `declared`, accepting ints for floats.
    fn coerce_to(self, declared: &ParameterValue, name: &str) -> Result<Self, ParameterError> {
        match (declared, self) {
            (ParameterValue::Float(_), ParameterValue::Int(v)) => Ok(ParameterValue::Float(v as f64)),
            (declared, value) if declared.type_name() == value.type_name() => Ok(value),
            (declared, value) => Err(ParameterError::TypeMismatch {
                name: name.to_string(),
                expected: declared.type_name(),
                found: value.type_name(),
            }),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Bool(v) => write!(f, "{}", v),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        ParameterValue::Text(v)
    }
}

/// A parameter edit, delivered to the actor's `update` entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterChange {
    pub name: String,
    pub previous: ParameterValue,
    pub value: ParameterValue,
}

#[derive(Debug, Clone, Default)]
pub struct Parameters {
    owner: String,
    values: BTreeMap<String, ParameterValue>,
    pending: Vec<ParameterChange>,
}

impl Parameters {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    /// Declares a parameter with its default value, which also fixes its type.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        default: impl Into<ParameterValue>,
    ) -> Result<(), ParameterError> {
        let name = name.into();
        if self.values.contains_key(&name) {
            return Err(ParameterError::Duplicate { name });
        }
        self.values.insert(name, default.into());
        Ok(())
    }

    /// Sets a declared parameter and queues a [`ParameterChange`] when the
    /// value actually changes.
    pub fn set(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<(), ParameterError> {
        let current = self.values.get_mut(name).ok_or_else(|| ParameterError::Unknown {
            actor: self.owner.clone(),
            name: name.to_string(),
        })?;
        let value = value.into().coerce_to(current, name)?;
        if *current == value {
            return Ok(());
        }
        let previous = std::mem::replace(current, value.clone());
        self.pending.push(ParameterChange {
            name: name.to_string(),
            previous,
            value,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParameterValue::as_int)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParameterValue::as_text)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParameterValue::as_bool)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Drains the changes recorded since the last call, oldest first.
    pub fn take_changes(&mut self) -> Vec<ParameterChange> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_records_change() {
        let mut params = Parameters::new("counter");
        params.declare("start", 0i64).unwrap();
        params.set("start", 5i64).unwrap();

        assert_eq!(params.get_int("start"), Some(5));
        assert_eq!(
            params.take_changes(),
            vec![ParameterChange {
                name: "start".into(),
                previous: ParameterValue::Int(0),
                value: ParameterValue::Int(5),
            }]
        );
        assert!(!params.has_changes());

        // unchanged values produce no event
        params.set("start", 5i64).unwrap();
        assert!(!params.has_changes());
    }

    #[test]
    fn test_type_checking() {
        let mut params = Parameters::new("a");
        params.declare("rate", 1.5).unwrap();
        params.declare("label", "x").unwrap();

        params.set("rate", 2i64).unwrap();
        assert_eq!(params.get("rate"), Some(&ParameterValue::Float(2.0)));
        assert!(matches!(
            params.set("label", 3i64),
            Err(ParameterError::TypeMismatch { expected: "text", found: "int", .. })
        ));
        assert!(matches!(params.set("missing", true), Err(ParameterError::Unknown { .. })));
        assert!(matches!(params.declare("rate", 0.0), Err(ParameterError::Duplicate { .. })));
    }

    #[test]
    fn test_untagged_deserialization() {
        let values: Vec<ParameterValue> = serde_json::from_str(r#"[true, 3, 2.5, "hi"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                ParameterValue::Bool(true),
                ParameterValue::Int(3),
                ParameterValue::Float(2.5),
                ParameterValue::Text("hi".into()),
            ]
        );
    }
}
