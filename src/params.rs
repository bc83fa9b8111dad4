//! Pipeline parameters.
//!
//! Parameters are read from TOML configuration files and stored in a flat map.
//! Keys inside a table are prefixed with the table name, so that
//!
//! ```text
//! [bowtie]
//! threads = 4
//! ```
//!
//! becomes parameter `bowtie_threads`.
//! Later files override earlier ones, which allows a pipeline to ship defaults that are refined by a file in the working directory.
//!
//! # Examples
//!
//! ```
//! use ngs_pipelines::Params;
//!
//! let params = Params::from_toml_str(r#"
//!     genome = "hg38"
//!     mappers = "bowtie,star"
//!     [bowtie]
//!     threads = 4
//! "#).unwrap();
//! assert_eq!(params.get_str("genome").unwrap(), "hg38");
//! assert_eq!(params.get_int("bowtie_threads").unwrap(), 4);
//! assert_eq!(params.as_list("mappers").unwrap(), vec!["bowtie", "star"]);
//! ```

use crate::utils;

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// A parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl Value {
    /// Returns the value as an integer, if it can be interpreted as one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Bool(value) => Some(*value as i64),
            Value::Str(value) => value.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Returns the value as a float, if it can be interpreted as one.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            Value::Str(value) => value.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Returns the value as a boolean, if it can be interpreted as one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            Value::Int(value) => Some(*value != 0),
            Value::Str(value) => match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn from_toml(value: &toml::Value) -> Option<Value> {
        match value {
            toml::Value::String(s) => Some(Value::Str(s.clone())),
            toml::Value::Integer(i) => Some(Value::Int(*i)),
            toml::Value::Float(f) => Some(Value::Float(*f)),
            toml::Value::Boolean(b) => Some(Value::Bool(*b)),
            toml::Value::Array(values) => {
                let items = values.iter().map(|x| match x {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                }).collect();
                Some(Value::List(items))
            },
            toml::Value::Datetime(d) => Some(Value::Str(d.to_string())),
            toml::Value::Table(_) => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(value) => write!(f, "{}", value),
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
            Value::Bool(value) => write!(f, "{}", *value as u8),
            Value::List(values) => write!(f, "{}", values.join(",")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

//-----------------------------------------------------------------------------

/// Pipeline parameters as a flat key-value map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

/// Loading the parameters.
impl Params {
    /// Name of the configuration file in a pipeline directory.
    pub const CONFIG_FILE: &'static str = "pipeline.toml";

    /// Returns an empty set of parameters.
    pub fn new() -> Self {
        Params::default()
    }

    /// Parses parameters from a TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let mut result = Params::new();
        result.update_from_toml_str(text)?;
        Ok(result)
    }

    /// Loads the parameters from the given files on top of the defaults.
    ///
    /// Files that do not exist are skipped.
    /// Values in later files override values in earlier files.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed, or if neither the defaults nor the files provide any parameters.
    pub fn load<P: AsRef<Path>>(files: &[P], defaults: &str) -> Result<Self, String> {
        let mut result = Params::from_toml_str(defaults)?;
        let mut found = 0;
        for filename in files {
            let filename = filename.as_ref();
            if !utils::file_exists(filename) {
                debug!("Configuration file {} does not exist", filename.display());
                continue;
            }
            info!("Reading configuration from {}", filename.display());
            let text = fs::read_to_string(filename).map_err(|x| {
                format!("Cannot read {}: {}", filename.display(), x)
            })?;
            result.update_from_toml_str(&text).map_err(|x| {
                format!("{}: {}", filename.display(), x)
            })?;
            found += 1;
        }
        if found == 0 && result.is_empty() {
            return Err(String::from("No configuration file found"));
        }
        Ok(result)
    }

    /// Returns the default list of configuration files relative to the working directory.
    pub fn default_files(workdir: &Path) -> Vec<PathBuf> {
        vec![
            workdir.join("..").join(Self::CONFIG_FILE),
            workdir.join(Self::CONFIG_FILE),
        ]
    }

    fn update_from_toml_str(&mut self, text: &str) -> Result<(), String> {
        let table: toml::Table = text.parse().map_err(|x: toml::de::Error| x.to_string())?;
        self.insert_table("", &table);
        Ok(())
    }

    fn insert_table(&mut self, prefix: &str, table: &toml::Table) {
        for (key, value) in table.iter() {
            let full_key = if prefix.is_empty() { key.clone() } else { format!("{}_{}", prefix, key) };
            match value {
                toml::Value::Table(inner) => self.insert_table(&full_key, inner),
                other => {
                    if let Some(value) = Value::from_toml(other) {
                        self.values.insert(full_key, value);
                    }
                },
            }
        }
    }

    /// Adds parameters from another pipeline's configuration with the given prefix.
    ///
    /// Reads `filename` in directory `dir`.
    /// Existing keys are not overridden.
    /// Returns the number of parameters added.
    pub fn peek<P: AsRef<Path>>(&mut self, dir: P, filename: &str, prefix: &str) -> Result<usize, String> {
        let path = dir.as_ref().join(filename);
        let text = fs::read_to_string(&path).map_err(|x| {
            format!("Cannot read {}: {}", path.display(), x)
        })?;
        let other = Params::from_toml_str(&text).map_err(|x| format!("{}: {}", path.display(), x))?;
        let mut added = 0;
        for (key, value) in other.values {
            let key = format!("{}{}", prefix, key);
            if !self.values.contains_key(&key) {
                self.values.insert(key, value);
                added += 1;
            }
        }
        Ok(added)
    }
}

//-----------------------------------------------------------------------------

/// Accessing the parameters.
impl Params {
    /// Returns the number of parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns `true` if the parameter exists.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Sets the value of the parameter.
    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Returns the value of the parameter, or [`None`] if it does not exist.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn require(&self, key: &str) -> Result<&Value, String> {
        self.values.get(key).ok_or_else(|| format!("Missing parameter: {}", key))
    }

    /// Returns the parameter as a string.
    pub fn get_str(&self, key: &str) -> Result<String, String> {
        Ok(self.require(key)?.to_string())
    }

    /// Returns the parameter as a string, or the default if the parameter does not exist.
    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.values.get(key).map(|x| x.to_string()).unwrap_or_else(|| default.to_string())
    }

    /// Returns the parameter as an integer.
    pub fn get_int(&self, key: &str) -> Result<i64, String> {
        let value = self.require(key)?;
        value.as_int().ok_or_else(|| format!("Parameter {} is not an integer: {}", key, value))
    }

    /// Returns the parameter as an integer, or the default if the parameter does not exist.
    pub fn get_int_or(&self, key: &str, default: i64) -> Result<i64, String> {
        if self.contains(key) { self.get_int(key) } else { Ok(default) }
    }

    /// Returns the parameter as a float.
    pub fn get_float(&self, key: &str) -> Result<f64, String> {
        let value = self.require(key)?;
        value.as_float().ok_or_else(|| format!("Parameter {} is not a number: {}", key, value))
    }

    /// Returns the parameter as a boolean.
    pub fn get_bool(&self, key: &str) -> Result<bool, String> {
        let value = self.require(key)?;
        value.as_bool().ok_or_else(|| format!("Parameter {} is not a boolean: {}", key, value))
    }

    /// Returns the parameter as a boolean, or `false` if the parameter does not exist.
    pub fn flag(&self, key: &str) -> Result<bool, String> {
        if self.contains(key) { self.get_bool(key) } else { Ok(false) }
    }

    /// Returns the parameter as a list of strings.
    ///
    /// String values are split at commas.
    pub fn as_list(&self, key: &str) -> Result<Vec<String>, String> {
        let value = self.require(key)?;
        let items = match value {
            Value::List(values) => values.clone(),
            other => other.to_string().split(',').map(|x| x.trim().to_string()).collect(),
        };
        Ok(items.into_iter().filter(|x| !x.is_empty()).collect())
    }

    /// Returns an iterator over the parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

//-----------------------------------------------------------------------------
