//! Parameter dictionaries.
//!
//! The host runtime configures a primitive with a dictionary of named, typed
//! values. Each primitive reads the keys it understands through a
//! [`ParamReader`], which rejects missing keys, values of the wrong type and
//! keys nobody asked for.

use std::collections::{BTreeSet, HashMap};

use snafu::{OptionExt, ensure};

use crate::error::{InvalidArgumentSnafu, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Str(_) => "string",
            ParamValue::Ints(_) => "int array",
            ParamValue::Floats(_) => "float array",
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(value: Vec<i64>) -> Self {
        ParamValue::Ints(value)
    }
}

impl From<&[i64]> for ParamValue {
    fn from(value: &[i64]) -> Self {
        ParamValue::Ints(value.to_vec())
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(value: Vec<f64>) -> Self {
        ParamValue::Floats(value)
    }
}

/// Parameter dictionary as passed across the host runtime boundary.
pub type Dictionary = HashMap<String, ParamValue>;

/// Typed, consuming view over a [`Dictionary`].
pub struct ParamReader<'a> {
    dict: &'a Dictionary,
    consumed: BTreeSet<&'a str>,
}

impl<'a> ParamReader<'a> {
    pub fn new(dict: &'a Dictionary) -> Self {
        Self { dict, consumed: BTreeSet::new() }
    }

    fn take(&mut self, key: &'a str) -> Option<&'a ParamValue> {
        self.consumed.insert(key);
        self.dict.get(key)
    }

    fn required(&mut self, key: &'a str) -> Result<&'a ParamValue> {
        self.take(key).context(InvalidArgumentSnafu { message: format!("missing required parameter '{key}'") })
    }

    pub fn int(&mut self, key: &'a str) -> Result<i64> {
        match self.required(key)? {
            ParamValue::Int(value) => Ok(*value),
            other => wrong_type(key, "int", other),
        }
    }

    pub fn float(&mut self, key: &'a str) -> Result<f64> {
        match self.required(key)? {
            ParamValue::Float(value) => Ok(*value),
            other => wrong_type(key, "float", other),
        }
    }

    pub fn string(&mut self, key: &'a str) -> Result<&'a str> {
        match self.required(key)? {
            ParamValue::Str(value) => Ok(value),
            other => wrong_type(key, "string", other),
        }
    }

    /// Int array of exactly `len` entries.
    pub fn ints(&mut self, key: &'a str, len: usize) -> Result<&'a [i64]> {
        match self.required(key)? {
            ParamValue::Ints(values) => check_len(key, values, len),
            other => wrong_type(key, "int array", other),
        }
    }

    pub fn optional_ints(&mut self, key: &'a str, len: usize) -> Result<Option<&'a [i64]>> {
        match self.take(key) {
            None => Ok(None),
            Some(ParamValue::Ints(values)) => check_len(key, values, len).map(Some),
            Some(other) => wrong_type(key, "int array", other),
        }
    }

    /// Fail if the dictionary holds keys that were never read.
    pub fn finish(self) -> Result<()> {
        let mut unknown: Vec<&str> =
            self.dict.keys().map(String::as_str).filter(|key| !self.consumed.contains(key)).collect();
        unknown.sort_unstable();
        ensure!(unknown.is_empty(), InvalidArgumentSnafu { message: format!("unknown parameters {unknown:?}") });
        Ok(())
    }
}

fn wrong_type<T>(key: &str, expected: &str, actual: &ParamValue) -> Result<T> {
    InvalidArgumentSnafu {
        message: format!("parameter '{key}' must be {expected}, got {}", actual.type_name()),
    }
    .fail()
}

fn check_len<'a>(key: &str, values: &'a [i64], len: usize) -> Result<&'a [i64]> {
    ensure!(
        values.len() == len,
        InvalidArgumentSnafu {
            message: format!("parameter '{key}' has {} entries, expected {len}", values.len())
        }
    );
    Ok(values)
}
