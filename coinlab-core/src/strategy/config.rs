//! Strategy configuration as a typed value tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::StrategyError;

/// One configuration value. Nested lists and tables are allowed so that
/// TOML and JSON parameter blocks map onto it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
    Table(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "string",
            ParamValue::List(_) => "list",
            ParamValue::Table(_) => "table",
        }
    }

    /// Integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v:?}"),
            ParamValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ParamValue::Table(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Named strategy plus its parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl StrategyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    fn typed<T>(
        &self,
        key: &str,
        default: T,
        expected: &'static str,
        convert: impl Fn(&ParamValue) -> Option<T>,
    ) -> Result<T, StrategyError> {
        match self.params.get(key) {
            None => Ok(default),
            Some(value) => convert(value).ok_or_else(|| StrategyError::InvalidConfig {
                param: key.to_string(),
                message: format!("expected {expected}, found {}", value.kind()),
            }),
        }
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, StrategyError> {
        self.typed(key, default, "a number", ParamValue::as_f64)
    }

    /// Non-negative integer parameter.
    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize, StrategyError> {
        self.typed(key, default, "a non-negative integer", |v| {
            v.as_i64().and_then(|i| usize::try_from(i).ok())
        })
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, StrategyError> {
        self.typed(key, default, "a bool", ParamValue::as_bool)
    }

    pub fn str_or(&self, key: &str, default: &str) -> Result<String, StrategyError> {
        self.typed(key, default.to_string(), "a string", |v| {
            v.as_str().map(str::to_string)
        })
    }
}
