//! Runtime values.
//!
//! A [`Value`] is a small copyable tagged union. Reference semantics come
//! from the pointed-to heap object: `str`, `native`, and `struct` values
//! carry an [`ObjRef`] into their owning thread's heap, so copying a value
//! never copies the object behind it.

use std::any::Any;
use std::ffi::c_void;

use tinyc_util::define_idx;

define_idx!(
    /// Handle to a heap object in one thread's heap. Only meaningful to the
    /// thread that allocated it.
    ObjRef
);

/// A runtime value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    Int(i32),
    Float(f32),

    /// A GC-tracked string object wrapping a pooled string.
    Str(ObjRef),

    /// A raw host pointer the collector does not track.
    LightNative(*mut c_void),

    /// A GC-tracked host object.
    Native(ObjRef),

    /// A GC-tracked record of field values.
    Struct(ObjRef),
}

impl Value {
    pub fn is_null(self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_char(self) -> Option<char> {
        match self {
            Value::Char(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_float(self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_light_native(self) -> Option<*mut c_void> {
        match self {
            Value::LightNative(p) => Some(p),
            _ => None,
        }
    }

    /// The heap object behind a reference-carrying value, if any.
    pub(crate) fn obj(self) -> Option<ObjRef> {
        match self {
            Value::Str(r) | Value::Native(r) | Value::Struct(r) => Some(r),
            _ => None,
        }
    }
}

/// Properties of one kind of native object.
///
/// Statically allocate one of these per native type the host exposes; the
/// collector uses it to find the roots a native object keeps alive and to
/// finalize the object when it is swept.
pub struct NativeProp {
    /// Type name, used by hosts to recognize their own natives.
    pub name: &'static str,

    /// Report every value this object keeps alive by appending to the
    /// vector.
    pub protect: Option<fn(&dyn Any, &mut Vec<Value>)>,

    /// Called with the object's data when it is swept.
    pub finalize: Option<fn(Box<dyn Any>)>,
}
