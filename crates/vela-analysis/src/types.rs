//! Resolved Vela types.

use std::fmt;
use std::rc::Rc;

/// A resolved type. Composite types share their payloads; the code
/// generator only ever reads them.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Byte,
    Bool,
    String,
    Slice(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Struct(Rc<StructType>),
    Func(Rc<Signature>),
    Pointer(Box<Type>),
    Named(Rc<NamedType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructType {
    pub fields: Vec<Field>,
    /// Interop-package structs are syscall handles with identity semantics;
    /// the emitter must not value-copy them at call boundaries.
    pub interop: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub results: Vec<Type>,
    pub variadic: bool,
}

/// A user-declared named type; `name` is the qualified display name the
/// resolver assigns (`pkg.Name` for foreign packages).
#[derive(Debug, Clone, PartialEq)]
pub struct NamedType {
    pub name: String,
    pub underlying: Type,
}

impl Type {
    /// Unwrap named types down to their underlying type.
    pub fn underlying(&self) -> &Type {
        let mut t = self;
        while let Type::Named(n) = t {
            t = &n.underlying;
        }
        t
    }

    pub fn is_number(&self) -> bool {
        matches!(self.underlying(), Type::Int | Type::Byte)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.underlying(), Type::String)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.underlying(), Type::Bool)
    }

    pub fn is_byte_slice(&self) -> bool {
        match self.underlying() {
            Type::Slice(elem) => matches!(elem.underlying(), Type::Byte),
            _ => false,
        }
    }

    /// The struct behind this type, looking through names and one pointer.
    pub fn struct_type(&self) -> Option<&StructType> {
        match self.underlying() {
            Type::Struct(s) => Some(s),
            Type::Pointer(inner) => match inner.underlying() {
                Type::Struct(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self.underlying() {
            Type::Func(sig) => Some(sig),
            _ => None,
        }
    }
}

impl StructType {
    /// Index of a field by name.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Byte => write!(f, "byte"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Slice(elem) => write!(f, "[]{}", elem),
            Type::Map(k, v) => write!(f, "map[{}]{}", k, v),
            Type::Struct(_) => write!(f, "struct"),
            Type::Func(sig) => {
                write!(f, "func(")?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ")")
            }
            Type::Pointer(inner) => write!(f, "*{}", inner),
            Type::Named(n) => write!(f, "{}", n.name),
        }
    }
}

/// A type together with the resolver's folded constant, when the expression
/// is constant.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAndValue {
    pub ty: Type,
    pub value: Option<Value>,
}

impl TypeAndValue {
    pub fn plain(ty: Type) -> Self {
        Self { ty, value: None }
    }

    pub fn constant(ty: Type, value: Value) -> Self {
        Self { ty, value: Some(value) }
    }
}

/// A folded constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
}
