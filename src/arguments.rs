use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Argument map passed to a tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(pub(crate) Map<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Insert a single key/value pair, returning the updated `Arguments`.
    pub fn set(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        let v = serde_json::to_value(value)?;
        self.0.insert(key.into(), v);
        Ok(self)
    }

    /// Get a typed value by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key)
    }

    /// Fetch a required coordinate-like parameter as text.
    ///
    /// Numbers are accepted and rendered as text. A missing key, `null`, or a
    /// blank string is reported as a missing parameter naming `key`.
    pub fn require_text(&self, key: &str) -> Result<String> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            None | Some(Value::Null) | Some(Value::String(_)) => Err(Error::InvalidParams(
                format!("Missing required parameter: {key}"),
            )),
            Some(_) => Err(Error::InvalidParams(format!(
                "Parameter {key} must be a string"
            ))),
        }
    }
}

impl From<Map<String, Value>> for Arguments {
    fn from(map: Map<String, Value>) -> Self {
        Arguments(map)
    }
}
