//! Dynamic values carried by tunable parameters.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::error::{CastError, SpaceError};
use crate::param::ValueType;

/// A string deduplicated through the process-wide intern pool.
///
/// Equality and hashing compare pointers, not contents; two `InternedStr`s
/// made from the same text always share one allocation. The pool lives for
/// the whole process and never evicts.
#[derive(Debug, Clone, Copy)]
pub struct InternedStr(&'static str);

impl InternedStr {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl PartialEq for InternedStr {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for InternedStr {}

impl PartialOrd for InternedStr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternedStr {
    fn cmp(&self, other: &Self) -> Ordering {
        // content order; consistent with pointer equality because equal
        // contents intern to the same pointer
        self.0.cmp(other.0)
    }
}

impl Hash for InternedStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0.as_ptr() as usize).hash(state);
    }
}

impl fmt::Display for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

fn pool() -> &'static RwLock<HashSet<&'static str>> {
    static POOL: OnceLock<RwLock<HashSet<&'static str>>> = OnceLock::new();
    POOL.get_or_init(|| RwLock::new(HashSet::new()))
}

/// Intern `text` into the process-wide pool.
pub fn intern(text: &str) -> InternedStr {
    {
        let table = pool().read().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = table.get(text) {
            return InternedStr(existing);
        }
    }

    let mut table = pool().write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = table.get(text) {
        return InternedStr(existing);
    }
    let leaked: &'static str = Box::leak(text.to_owned().into_boxed_str());
    table.insert(leaked);
    InternedStr(leaked)
}

/// A tagged dynamic value: empty, 64-bit integer, double, interned string,
/// or boolean.
///
/// Values of different variants are never equal and order by variant tag
/// (`Empty < Int < Double < Str < Bool`). Doubles compare and hash by bit
/// pattern so that `Value` can serve as a hash-map key.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Empty,
    Int(i64),
    Double(f64),
    Str(InternedStr),
    Bool(bool),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Whether this value converts losslessly to `T`.
    pub fn is<T: FromValue>(&self) -> bool {
        T::try_from_value(self).is_some()
    }

    /// Narrow to `T`, failing when the conversion would lose information.
    pub fn to<T: FromValue>(&self) -> Result<T, CastError> {
        T::try_from_value(self).ok_or_else(|| CastError::new(self, T::TYPE_NAME))
    }

    /// Cast through a runtime type token. Integers widen to doubles; the
    /// string cast renders any non-empty value.
    pub fn cast_to(&self, ty: ValueType) -> Result<Value, CastError> {
        match ty {
            ValueType::Int => self.to::<i64>().map(Value::Int),
            ValueType::Double => match self {
                Value::Double(d) => Ok(Value::Double(*d)),
                Value::Int(i) => Ok(Value::Double(*i as f64)),
                Value::Bool(b) => Ok(Value::Double(u8::from(*b) as f64)),
                _ => Err(CastError::new(self, "double")),
            },
            ValueType::Bool => self.to::<bool>().map(Value::Bool),
            ValueType::Str => {
                if self.is_empty() {
                    Err(CastError::new(self, "string"))
                } else {
                    Ok(Value::Str(intern(&self.to_string())))
                }
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Empty => serde_json::Value::Null,
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::from(s.as_str()),
            Value::Bool(b) => serde_json::Value::from(*b),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Value, SpaceError> {
        match json {
            serde_json::Value::Null => Ok(Value::Empty),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::String(s) => Ok(Value::Str(intern(s))),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Double(f))
                } else {
                    Err(SpaceError::InvalidConfig(format!(
                        "number {n} does not fit a 64-bit value"
                    )))
                }
            }
            other => Err(SpaceError::InvalidConfig(format!(
                "unsupported JSON value: {other}"
            ))),
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Empty => 0,
            Value::Int(_) => 1,
            Value::Double(_) => 2,
            Value::Str(_) => 3,
            Value::Bool(_) => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Empty, Value::Empty) => Ordering::Equal,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            Value::Empty => {}
            Value::Int(i) => i.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bool(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Str(s) => f.write_str(s.as_str()),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Int(value as i64)
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, isize, u8, u16, u32);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Double(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(intern(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(intern(&value))
    }
}

impl From<InternedStr> for Value {
    fn from(value: InternedStr) -> Self {
        Value::Str(value)
    }
}

impl From<ValueType> for Value {
    fn from(ty: ValueType) -> Self {
        Value::Str(intern(ty.name()))
    }
}

/// Lossless extraction of a host type from a [`Value`].
pub trait FromValue: Sized {
    const TYPE_NAME: &'static str;

    fn try_from_value(value: &Value) -> Option<Self>;
}

macro_rules! from_value_int {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const TYPE_NAME: &'static str = $name;

                fn try_from_value(value: &Value) -> Option<Self> {
                    match *value {
                        Value::Int(i) => <$ty>::try_from(i).ok(),
                        Value::Bool(b) => Some(if b { 1 as $ty } else { 0 as $ty }),
                        _ => None,
                    }
                }
            }
        )*
    };
}

from_value_int!(
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    isize => "isize",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    usize => "usize",
);

impl FromValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn try_from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::Bool(b) => Some(b),
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn try_from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::Double(d) => Some(d),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn try_from_value(value: &Value) -> Option<Self> {
        match *value {
            Value::Double(d) => Some(d as f32),
            _ => None,
        }
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "string";

    fn try_from_value(value: &Value) -> Option<Self> {
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

impl FromValue for Value {
    const TYPE_NAME: &'static str = "value";

    fn try_from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}
