//! Node pool capabilities and unstructured descriptors
//!
//! A node pool arrives as an unstructured [`RawNodePool`] (a string-keyed JSON
//! object). Common processing operates on the raw form; each distribution then
//! decodes it into its own typed node pool. Both forms implement [`NodePool`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Well-known keys of raw node pool descriptors
pub mod keys {
    /// Node pool name
    pub const NAME: &str = "name";
    /// Machine/instance type
    pub const INSTANCE_TYPE: &str = "instanceType";
    /// Spot bid price; empty or zero means on-demand
    pub const SPOT_PRICE: &str = "spotPrice";
    /// Node labels
    pub const LABELS: &str = "labels";
}

/// Capabilities every node pool representation provides
pub trait NodePool {
    /// Node pool name, unique within a cluster
    fn name(&self) -> &str;

    /// Machine/instance type of the nodes
    fn instance_type(&self) -> &str;

    /// True if nodes are on-demand (not spot/preemptible)
    fn is_on_demand(&self) -> bool;

    /// Labels applied to the nodes
    fn labels(&self) -> BTreeMap<String, String>;
}

/// Returns true if a spot price string denotes on-demand capacity
pub fn spot_price_is_on_demand(spot_price: &str) -> bool {
    let trimmed = spot_price.trim();
    trimmed.is_empty() || trimmed.parse::<f64>().map(|p| p == 0.0).unwrap_or(false)
}

/// Merge label sets in order; on key conflicts the last set wins
pub fn merge_labels<I>(sources: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = BTreeMap<String, String>>,
{
    let mut merged = BTreeMap::new();
    for labels in sources {
        merged.extend(labels);
    }
    merged
}

/// Unstructured node pool creation descriptor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawNodePool(Map<String, Value>);

impl RawNodePool {
    /// Create an empty descriptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a descriptor from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::validation(format!(
                "node pool descriptor must be an object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Set a field and return self for chaining
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// True if the field is present
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Labels, failing if the field is not a string-to-string object
    pub fn try_labels(&self) -> Result<BTreeMap<String, String>> {
        labels_of(&self.0)
    }

    /// Replace the labels
    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        set_labels_of(&mut self.0, labels);
    }

    /// Decode into a typed node pool
    ///
    /// Decoding failures are reported as validation errors naming the kind.
    pub fn decode<T: DeserializeOwned>(&self, kind: &str) -> Result<T> {
        decode_map(&self.0, kind)
    }

    /// Borrow the underlying object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl NodePool for RawNodePool {
    fn name(&self) -> &str {
        self.get_str(keys::NAME).unwrap_or_default()
    }

    fn instance_type(&self) -> &str {
        self.get_str(keys::INSTANCE_TYPE).unwrap_or_default()
    }

    fn is_on_demand(&self) -> bool {
        match self.get(keys::SPOT_PRICE) {
            None | Some(Value::Null) => true,
            Some(Value::String(price)) => spot_price_is_on_demand(price),
            Some(Value::Number(price)) => price.as_f64().map(|p| p == 0.0).unwrap_or(false),
            Some(_) => false,
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        self.try_labels().unwrap_or_default()
    }
}

/// Unstructured partial node pool update; absent fields mean "no change"
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawNodePoolUpdate(Map<String, Value>);

impl RawNodePoolUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an update from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::validation(format!(
                "node pool update must be an object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Set a field and return self for chaining
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// True if the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode into a typed update
    pub fn decode<T: DeserializeOwned>(&self, kind: &str) -> Result<T> {
        decode_map(&self.0, kind)
    }
}

fn labels_of(map: &Map<String, Value>) -> Result<BTreeMap<String, String>> {
    match map.get(keys::LABELS) {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(labels)) => labels
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                other => Err(Error::validation(format!(
                    "label {k} must be a string, got {}",
                    json_type(other)
                ))),
            })
            .collect(),
        Some(other) => Err(Error::validation(format!(
            "labels must be an object, got {}",
            json_type(other)
        ))),
    }
}

fn set_labels_of(map: &mut Map<String, Value>, labels: BTreeMap<String, String>) {
    let labels: Map<String, Value> = labels
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    map.insert(keys::LABELS.to_string(), Value::Object(labels));
}

fn decode_map<T: DeserializeOwned>(map: &Map<String, Value>, kind: &str) -> Result<T> {
    serde_json::from_value(Value::Object(map.clone())).map_err(|e| {
        Error::validation_with(format!("invalid {kind} node pool"), vec![e.to_string()])
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
