//! The configuration space: parameters plus restrictions.

use crate::config::Config;
use crate::error::SpaceError;
use crate::expr::{Expr, IntoExpr};
use crate::iterate::ConfigIterator;
use crate::param::{Param, ValueType};
use crate::value::Value;

/// Ordered parameters and the boolean restrictions over them.
///
/// Insertion order is stable and defines the canonical enumeration axes:
/// the first parameter is the least-significant digit of
/// [`get`](ConfigSpace::get)'s mixed-radix index decomposition.
#[derive(Debug, Clone, Default)]
pub struct ConfigSpace {
    params: Vec<Param>,
    restrictions: Vec<Expr>,
}

impl ConfigSpace {
    pub fn new() -> Self {
        ConfigSpace::default()
    }

    /// Add a tunable parameter whose default is the first listed value.
    pub fn tune<T: Into<Value>>(
        &mut self,
        name: &str,
        values: Vec<T>,
    ) -> Result<Param, SpaceError> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.add_param(name, values, None)
    }

    /// Add a tunable parameter with an explicit default value.
    pub fn tune_with_default<T: Into<Value>>(
        &mut self,
        name: &str,
        values: Vec<T>,
        default: impl Into<Value>,
    ) -> Result<Param, SpaceError> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.add_param(name, values, Some(default.into()))
    }

    fn add_param(
        &mut self,
        name: &str,
        values: Vec<Value>,
        default: Option<Value>,
    ) -> Result<Param, SpaceError> {
        if values.is_empty() {
            return Err(SpaceError::EmptyDomain(name.to_owned()));
        }
        if self.params.iter().any(|p| p.name() == name) {
            return Err(SpaceError::DuplicateParam(name.to_owned()));
        }

        let value_type = ValueType::of(&values[0]).ok_or_else(|| {
            SpaceError::InvalidConfig(format!("parameter `{name}` contains an empty value"))
        })?;
        if values.iter().any(|v| ValueType::of(v) != Some(value_type)) {
            return Err(SpaceError::InvalidConfig(format!(
                "parameter `{name}` mixes value types"
            )));
        }

        let default = default.unwrap_or_else(|| values[0].clone());
        if !values.contains(&default) {
            return Err(SpaceError::InvalidConfig(format!(
                "default value `{default}` of parameter `{name}` is not in its domain"
            )));
        }

        let param = Param::new(name.to_owned(), value_type, values, default);
        self.params.push(param.clone());
        Ok(param)
    }

    /// Append a boolean restriction; all restrictions are ANDed.
    pub fn restrict(&mut self, predicate: impl IntoExpr) -> &mut Self {
        self.restrictions.push(predicate.into_expr());
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn restrictions(&self) -> &[Expr] {
        &self.restrictions
    }

    pub fn at(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name() == name)
    }

    /// The cardinality of the Cartesian product of all domains.
    pub fn size(&self) -> Result<u64, SpaceError> {
        let mut size: u64 = 1;
        for param in &self.params {
            size = size
                .checked_mul(param.len() as u64)
                .ok_or(SpaceError::Overflow)?;
        }
        Ok(size)
    }

    /// Decompose `index` over the parameter domains (first parameter is the
    /// least-significant digit), bind the resulting values into `config`,
    /// and report whether the point satisfies every restriction.
    pub fn get(&self, index: u64, config: &mut Config) -> Result<bool, SpaceError> {
        let mut index = index;
        for param in &self.params {
            let radix = param.len() as u64;
            let digit = (index % radix) as usize;
            index /= radix;
            config.insert(param.clone(), param.values()[digit].clone());
        }
        self.satisfies(config)
    }

    fn satisfies(&self, config: &Config) -> Result<bool, SpaceError> {
        for restriction in &self.restrictions {
            if !restriction.eval(config)?.to::<bool>()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether `config` is a complete valid point of this space: every
    /// parameter bound to a value from its domain and every restriction
    /// satisfied.
    pub fn is_valid(&self, config: &Config) -> bool {
        if config.len() != self.params.len() {
            return false;
        }
        for param in &self.params {
            match config.get(param) {
                Some(value) if param.values().contains(value) => {}
                _ => return false,
            }
        }
        self.satisfies(config).unwrap_or(false)
    }

    /// The configuration binding every parameter to its default value.
    pub fn default_config(&self) -> Result<Config, SpaceError> {
        let mut config = Config::new();
        for param in &self.params {
            config.insert(param.clone(), param.default_value().clone());
        }
        if !self.satisfies(&config)? {
            return Err(SpaceError::InvalidConfig(
                "default configuration violates a restriction".to_owned(),
            ));
        }
        Ok(config)
    }

    /// A uniformly random valid configuration.
    pub fn random_config(&self) -> Result<Config, SpaceError> {
        self.iterate()?.next()?.ok_or_else(|| {
            SpaceError::InvalidConfig("space contains no valid configuration".to_owned())
        })
    }

    /// Enumerate every valid configuration exactly once, in a pseudo-random
    /// order reseeded per iterator.
    pub fn iterate(&self) -> Result<ConfigIterator, SpaceError> {
        ConfigIterator::new(self.clone())
    }

    /// Rebuild a configuration from its JSON object form. The key set must
    /// match the parameter names exactly; every value must lie in its
    /// parameter's domain and all restrictions must hold.
    pub fn load_config(&self, json: &serde_json::Value) -> Result<Config, SpaceError> {
        let object = json.as_object().ok_or_else(|| {
            SpaceError::InvalidConfig("expected a JSON object".to_owned())
        })?;

        for key in object.keys() {
            if self.at(key).is_none() {
                return Err(SpaceError::InvalidConfig(format!("unknown parameter `{key}`")));
            }
        }

        let mut config = Config::new();
        for param in &self.params {
            let json_value = object.get(param.name()).ok_or_else(|| {
                SpaceError::InvalidConfig(format!("missing parameter `{}`", param.name()))
            })?;
            let value = Value::from_json(json_value)?;
            if !param.values().contains(&value) {
                return Err(SpaceError::InvalidConfig(format!(
                    "value `{value}` is not in the domain of parameter `{}`",
                    param.name()
                )));
            }
            config.insert(param.clone(), value);
        }

        for restriction in &self.restrictions {
            if !restriction.eval(&config)?.to::<bool>()? {
                return Err(SpaceError::InvalidConfig(format!(
                    "configuration violates restriction `{restriction}`"
                )));
            }
        }

        Ok(config)
    }

    /// JSON description of the space: domains plus restrictions.
    pub fn to_json(&self) -> serde_json::Value {
        let mut parameters = serde_json::Map::new();
        for param in &self.params {
            let values: Vec<serde_json::Value> =
                param.values().iter().map(Value::to_json).collect();
            parameters.insert(param.name().to_owned(), serde_json::Value::from(values));
        }

        let restrictions: Vec<serde_json::Value> =
            self.restrictions.iter().map(Expr::to_json).collect();

        serde_json::json!({
            "parameters": parameters,
            "restrictions": restrictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangular_space() -> (ConfigSpace, Param, Param) {
        let mut space = ConfigSpace::new();
        let a = space.tune("a", vec![1, 2, 3]).unwrap();
        let b = space.tune("b", vec![1, 2, 3]).unwrap();
        space.restrict(a.expr().le(&b));
        (space, a, b)
    }

    #[test]
    fn size_and_valid_count() {
        let (space, a, b) = triangular_space();
        assert_eq!(space.size().unwrap(), 9);

        let mut valid = Vec::new();
        for index in 0..9 {
            let mut config = Config::new();
            if space.get(index, &mut config).unwrap() {
                let pair = (
                    config.at(&a).unwrap().to::<i64>().unwrap(),
                    config.at(&b).unwrap().to::<i64>().unwrap(),
                );
                valid.push(pair);
            }
        }
        valid.sort();
        assert_eq!(valid, vec![(1, 1), (1, 2), (1, 3), (2, 2), (2, 3), (3, 3)]);
    }

    #[test]
    fn default_config_binds_defaults() {
        let (space, a, b) = triangular_space();
        let config = space.default_config().unwrap();
        assert!(space.is_valid(&config));
        assert_eq!(config.at(&a).unwrap(), &Value::from(1));
        assert_eq!(config.at(&b).unwrap(), &Value::from(1));
    }

    #[test]
    fn default_config_must_satisfy_restrictions() {
        let mut space = ConfigSpace::new();
        let x = space.tune("x", vec![1, 2]).unwrap();
        space.restrict(x.expr().gt(1));
        assert!(space.default_config().is_err());
    }

    #[test]
    fn indexing_is_little_endian_over_insertion_order() {
        let mut space = ConfigSpace::new();
        let x = space.tune("x", vec![10, 20]).unwrap();
        let y = space.tune("y", vec![5, 6, 7]).unwrap();

        // index 3 decomposes as x-digit 1, y-digit 1
        let mut config = Config::new();
        assert!(space.get(3, &mut config).unwrap());
        assert_eq!(config.at(&x).unwrap(), &Value::from(20));
        assert_eq!(config.at(&y).unwrap(), &Value::from(6));
    }

    #[test]
    fn indexing_is_a_bijection() {
        let (space, a, b) = triangular_space();
        let mut seen = std::collections::HashSet::new();
        for index in 0..space.size().unwrap() {
            let mut config = Config::new();
            let _ = space.get(index, &mut config).unwrap();
            let pair = (
                config.at(&a).unwrap().to::<i64>().unwrap(),
                config.at(&b).unwrap().to::<i64>().unwrap(),
            );
            assert!(seen.insert(pair), "index {index} repeated {pair:?}");
        }
        assert_eq!(seen.len(), 9);
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut space = ConfigSpace::new();
        space.tune("x", vec![1]).unwrap();

        assert!(matches!(
            space.tune("x", vec![2]),
            Err(SpaceError::DuplicateParam(_))
        ));
        assert!(matches!(
            space.tune::<i32>("empty", vec![]),
            Err(SpaceError::EmptyDomain(_))
        ));
        assert!(space
            .tune_with_default("y", vec![1, 2], 3)
            .is_err());
    }

    #[test]
    fn is_valid_requires_completeness() {
        let (space, a, b) = triangular_space();

        assert!(!space.is_valid(&Config::new()));

        // violates a <= b
        let mut config = Config::new();
        config.insert(a.clone(), 2);
        config.insert(b.clone(), 1);
        assert!(!space.is_valid(&config));

        // out-of-domain value
        let mut config = Config::new();
        config.insert(a.clone(), 1);
        config.insert(b.clone(), 9);
        assert!(!space.is_valid(&config));

        let mut config = Config::new();
        config.insert(a, 1);
        config.insert(b, 2);
        assert!(space.is_valid(&config));
    }

    #[test]
    fn config_json_round_trip() {
        let (space, a, b) = triangular_space();

        let mut config = Config::new();
        config.insert(a, 2);
        config.insert(b, 3);

        let json = config.to_json();
        assert_eq!(space.load_config(&json).unwrap(), config);
    }

    #[test]
    fn load_config_rejects_bad_input() {
        let (space, _a, _b) = triangular_space();

        // missing key
        assert!(space.load_config(&serde_json::json!({"a": 1})).is_err());
        // extra key
        assert!(space
            .load_config(&serde_json::json!({"a": 1, "b": 1, "c": 1}))
            .is_err());
        // out-of-domain value
        assert!(space
            .load_config(&serde_json::json!({"a": 1, "b": 17}))
            .is_err());
        // restriction violated
        assert!(space
            .load_config(&serde_json::json!({"a": 3, "b": 1}))
            .is_err());
    }

    #[test]
    fn random_config_is_valid() {
        let (space, _a, _b) = triangular_space();
        for _ in 0..8 {
            let config = space.random_config().unwrap();
            assert!(space.is_valid(&config));
        }
    }
}
