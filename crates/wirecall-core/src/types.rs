//! Type descriptors for action parameters, return values and pending calls.
//!
//! A descriptor is the explicit stand-in for runtime type inspection: it names
//! the Rust type and records the wire shape the value codec must produce.

use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Wire shape of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Anything; no conversion is applied.
    Any,
    /// No value (void return). Any payload converts to `null`.
    Unit,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ValueKind {
    /// Kind of an existing JSON value.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Unit,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) if n.is_f64() => ValueKind::Float,
            Value::Number(_) => ValueKind::Integer,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueKind::Any => "any",
            ValueKind::Unit => "unit",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

/// Describes one parameter, return or expected result type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    name: Cow<'static, str>,
    kind: ValueKind,
    nullable: bool,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<Cow<'static, str>>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    /// Descriptor of `T` taken from its [`Describe`] impl.
    pub fn of<T: Describe + ?Sized>() -> Self {
        T::descriptor()
    }

    /// The void descriptor used by fire-and-forget actions.
    pub fn unit() -> Self {
        Self::new("()", ValueKind::Unit)
    }

    /// Same descriptor, additionally accepting `null`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unit(&self) -> bool {
        self.kind == ValueKind::Unit
    }
}

impl std::fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.nullable {
            write!(f, "{}?", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Types that can describe their own wire shape.
///
/// Domain types usually only need `impl Describe for MyType {}`; the default
/// descriptor accepts any shape and leaves validation to deserialization.
pub trait Describe {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new(std::any::type_name::<Self>(), ValueKind::Any)
    }
}

macro_rules! describe_as {
    ($kind:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl Describe for $ty {
                fn descriptor() -> TypeDescriptor {
                    TypeDescriptor::new(stringify!($ty), $kind)
                }
            }
        )+
    };
}

describe_as!(ValueKind::Bool => bool);
describe_as!(ValueKind::Integer => i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);
describe_as!(ValueKind::Float => f32, f64);
describe_as!(ValueKind::String => String, str, char);
describe_as!(ValueKind::Any => Value);

impl Describe for () {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::unit()
    }
}

impl<T: Describe> Describe for Option<T> {
    fn descriptor() -> TypeDescriptor {
        T::descriptor().nullable()
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new(format!("Vec<{}>", T::descriptor()), ValueKind::Array)
    }
}

impl<T: Describe> Describe for [T] {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new(format!("[{}]", T::descriptor()), ValueKind::Array)
    }
}

impl<V: Describe, S> Describe for HashMap<String, V, S> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new(format!("Map<String, {}>", V::descriptor()), ValueKind::Object)
    }
}

impl<V: Describe> Describe for BTreeMap<String, V> {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::new(format!("Map<String, {}>", V::descriptor()), ValueKind::Object)
    }
}
