//! C type tokens and template arguments for kernel signatures.

use std::fmt;

use gridtune_space::Value;

use crate::error::CompileError;

/// The C-side spelling of a kernel parameter type, e.g. `float*` or
/// `const int*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CType(String);

impl CType {
    pub fn new(name: impl Into<String>) -> Self {
        CType(name.into())
    }

    pub fn of<T: CTypeOf>() -> Self {
        T::ctype()
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host types with a canonical C spelling.
pub trait CTypeOf {
    fn ctype() -> CType;
}

macro_rules! ctype_of {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl CTypeOf for $ty {
                fn ctype() -> CType {
                    CType::new($name)
                }
            }
        )*
    };
}

ctype_of!(
    bool => "bool",
    i8 => "char",
    u8 => "unsigned char",
    i16 => "short",
    u16 => "unsigned short",
    i32 => "int",
    u32 => "unsigned int",
    i64 => "long long",
    u64 => "unsigned long long",
    f32 => "float",
    f64 => "double",
);

impl<T: CTypeOf> CTypeOf for *mut T {
    fn ctype() -> CType {
        CType::new(format!("{}*", T::ctype()))
    }
}

impl<T: CTypeOf> CTypeOf for *const T {
    fn ctype() -> CType {
        CType::new(format!("const {}*", T::ctype()))
    }
}

/// A rendered C++ template argument.
///
/// Integer and boolean arguments carry an explicit cast (`(int)4`,
/// `(bool)true`) so the compiler instantiates the intended specialization;
/// type arguments render as the bare type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateArg(String);

impl TemplateArg {
    pub fn from_type<T: CTypeOf>() -> Self {
        TemplateArg(T::ctype().name().to_owned())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        TemplateArg(text.into())
    }

    /// Render a dynamic value as a template argument.
    pub fn from_value(value: &Value) -> Result<Self, CompileError> {
        match value {
            Value::Int(i) => Ok(TemplateArg(format!("(int){i}"))),
            Value::Double(d) => Ok(TemplateArg(format!("(double){d}"))),
            Value::Bool(b) => Ok(TemplateArg(format!("(bool){b}"))),
            Value::Str(s) => Ok(TemplateArg(s.as_str().to_owned())),
            Value::Empty => Err(CompileError::BadTemplateArg("empty value".to_owned())),
        }
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CType> for TemplateArg {
    fn from(ty: CType) -> Self {
        TemplateArg(ty.name().to_owned())
    }
}

impl From<i32> for TemplateArg {
    fn from(value: i32) -> Self {
        TemplateArg(format!("(int){value}"))
    }
}

impl From<u32> for TemplateArg {
    fn from(value: u32) -> Self {
        TemplateArg(format!("(unsigned int){value}"))
    }
}

impl From<i64> for TemplateArg {
    fn from(value: i64) -> Self {
        TemplateArg(format!("(long long){value}"))
    }
}

impl From<bool> for TemplateArg {
    fn from(value: bool) -> Self {
        TemplateArg(format!("(bool){value}"))
    }
}
