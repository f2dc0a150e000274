//! Tunable parameters.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::value::Value;

/// Runtime type token for a parameter's value domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Double,
    Bool,
    Str,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Double => "double",
            ValueType::Bool => "bool",
            ValueType::Str => "string",
        }
    }

    /// The type of a non-empty value.
    pub fn of(value: &Value) -> Option<ValueType> {
        match value {
            Value::Empty => None,
            Value::Int(_) => Some(ValueType::Int),
            Value::Double(_) => Some(ValueType::Double),
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Str(_) => Some(ValueType::Str),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
struct ParamInner {
    name: String,
    value_type: ValueType,
    values: Vec<Value>,
    default: Value,
}

/// A shared handle to an immutable tunable parameter.
///
/// Identity is reference identity: two handles compare equal iff they refer
/// to the same record, regardless of name. Cloning the handle shares the
/// record; it is freed once no space, configuration or expression refers to
/// it.
#[derive(Debug, Clone)]
pub struct Param {
    inner: Arc<ParamInner>,
}

impl Param {
    pub(crate) fn new(
        name: String,
        value_type: ValueType,
        values: Vec<Value>,
        default: Value,
    ) -> Self {
        Param {
            inner: Arc::new(ParamInner {
                name,
                value_type,
                values,
                default,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn value_type(&self) -> ValueType {
        self.inner.value_type
    }

    pub fn values(&self) -> &[Value] {
        &self.inner.values
    }

    pub fn default_value(&self) -> &Value {
        &self.inner.default
    }

    pub fn at(&self, index: usize) -> Option<&Value> {
        self.inner.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.inner.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values.is_empty()
    }

    /// An expression node referencing this parameter.
    pub fn expr(&self) -> crate::expr::Expr {
        crate::expr::Expr::Param(self.clone())
    }
}

impl PartialEq for Param {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Param {}

impl Hash for Param {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.inner) as usize).hash(state);
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_param(name: &str) -> Param {
        Param::new(
            name.to_owned(),
            ValueType::Int,
            vec![Value::from(1), Value::from(2), Value::from(3)],
            Value::from(1),
        )
    }

    #[test]
    fn identity_is_by_handle_not_name() {
        let foo = int_param("foo");
        let also_foo = int_param("foo");

        assert_eq!(foo, foo.clone());
        assert_ne!(foo, also_foo);
        assert_eq!(foo.name(), also_foo.name());
    }

    #[test]
    fn attributes() {
        let param = int_param("foo");
        assert_eq!(param.name(), "foo");
        assert_eq!(param.value_type(), ValueType::Int);
        assert_eq!(param.default_value(), &Value::from(1));
        assert_eq!(param.len(), 3);
        assert_eq!(param.at(1), Some(&Value::from(2)));
        assert_eq!(param.at(100), None);
    }
}
