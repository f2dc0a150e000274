//! Configurations: points in a configuration space.

use std::collections::HashMap;

use crate::error::SpaceError;
use crate::param::Param;
use crate::value::Value;

/// A mapping from parameters to values.
///
/// A configuration is *complete* for a space when every parameter of that
/// space is bound to a value from its domain and all restrictions hold;
/// see [`ConfigSpace::is_valid`](crate::ConfigSpace::is_valid).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: HashMap<Param, Value>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn insert(&mut self, param: Param, value: impl Into<Value>) {
        self.values.insert(param, value.into());
    }

    pub fn get(&self, param: &Param) -> Option<&Value> {
        self.values.get(param)
    }

    /// Like [`get`](Config::get), but an unbound parameter is an error.
    pub fn at(&self, param: &Param) -> Result<&Value, SpaceError> {
        self.values
            .get(param)
            .ok_or_else(|| SpaceError::MissingParam(param.name().to_owned()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Param, &Value)> {
        self.values.iter()
    }

    /// JSON object keyed by parameter name.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (param, value) in &self.values {
            object.insert(param.name().to_owned(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ValueType;

    fn param(name: &str, values: Vec<Value>) -> Param {
        let default = values[0].clone();
        Param::new(name.to_owned(), ValueType::Int, values, default)
    }

    #[test]
    fn lookups_use_parameter_identity() {
        let x = param("x", vec![Value::from(1), Value::from(2)]);
        let y = param("y", vec![Value::from(1)]);
        let shadow = param("x", vec![Value::from(1), Value::from(2)]);

        let mut config = Config::new();
        assert!(config.is_empty());
        assert!(config.at(&x).is_err());

        config.insert(x.clone(), 1);
        config.insert(y.clone(), 1);

        assert_eq!(config.len(), 2);
        assert_eq!(config.get(&x), Some(&Value::from(1)));
        assert!(config.at(&shadow).is_err());
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let x = param("x", vec![Value::from(1)]);
        let y = param("y", vec![Value::from(2)]);

        let mut a = Config::new();
        a.insert(x.clone(), 1);
        a.insert(y.clone(), 2);

        let mut b = Config::new();
        b.insert(y.clone(), 2);
        b.insert(x.clone(), 1);

        assert_eq!(a, b);

        let mut c = Config::new();
        c.insert(x, 1);
        assert_ne!(a, c);
    }

    #[test]
    fn json_is_keyed_by_name() {
        let x = param("x", vec![Value::from(1)]);
        let mut config = Config::new();
        config.insert(x, 1);

        assert_eq!(config.to_json(), serde_json::json!({"x": 1}));
    }
}
