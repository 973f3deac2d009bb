//! The instruction set.
//!
//! Each opcode is one byte. Multibyte immediates follow their opcode
//! little-endian and 4-byte aligned; the emitter pads up to the alignment
//! boundary with [`Op::MisalignedInstruction`] bytes, which the execution
//! loop must never reach. This file is the single source of truth for the
//! encoding: the emitter in this crate and the dispatch loop in the VM crate
//! both follow the operand layout documented on each variant.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Alignment of multibyte immediates.
pub const IMM_ALIGN: usize = 4;

/// One bytecode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Op {
    /// Grow the stack by N null slots; `u8` count. Reserves local slots at
    /// function entry.
    AddSp,

    // Value pushing.
    PushNull,
    PushTrue,
    PushFalse,
    /// Aligned `u32` code point.
    PushChar,
    /// Aligned `i32` immediate.
    PushInt,
    PushInt0,
    /// Aligned `u32` index into the float pool.
    PushFloat,
    /// `u8` index into the float pool, for the first 256 pooled floats.
    PushFloatFF,
    PushFloat0,
    /// Aligned `u32` string pool handle.
    PushString,

    // Integer ops.
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    ModInt,
    OrInt,
    AndInt,

    Add1Int,
    Sub1Int,

    LtInt,
    LteInt,
    GtInt,
    GteInt,

    // Float ops.
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,

    LtFloat,
    LteFloat,
    GtFloat,
    GteFloat,

    // Equality ops, one per comparable value type.
    EquBool,
    EquChar,
    EquInt,
    EquFloat,
    EquString,

    // Bool ops.
    LogAnd,
    LogOr,
    LogNot,

    // Variable access.
    /// Aligned `u32` global slot.
    GetGlobal,
    /// Aligned `u32` global slot.
    SetGlobal,
    /// Aligned `i32` offset from the frame pointer (negative for
    /// arguments).
    GetLocal,
    /// Aligned `i32` offset from the frame pointer.
    SetLocal,

    // Jumps; aligned `i32` absolute offset into the code buffer.
    Goto,
    GotoFalse,

    /// `u8` argument count, then aligned `i32` destination offset.
    Call,
    /// `u8` argument count, then aligned `u32` foreign function index.
    CallForeign,

    // Returns.
    Ret,
    RetVal,
    GetRetval,

    // Struct ops.
    /// `u8` field count; pops the fields and pushes the new object.
    PushStruct,
    /// `u8` field index; pops the struct, pushes the field.
    StructGet,
    /// `u8` field index; pops a value and a struct, stores the value.
    StructSet,

    Halt,

    // Source position tracking.
    /// Aligned `u32` string pool handle of the module name.
    File,
    /// Aligned `u32` line number.
    Line,

    /// Alignment padding. Never executed.
    MisalignedInstruction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_u8() {
        for byte in 0..=u8::MAX {
            if let Ok(op) = Op::try_from(byte) {
                assert_eq!(u8::from(op), byte);
            }
        }
    }

    #[test]
    fn test_known_encodings_are_stable() {
        assert_eq!(u8::from(Op::AddSp), 0);
        assert!(Op::try_from(u8::from(Op::Halt)).is_ok());
        assert!(Op::try_from(0xff).is_err());
    }
}
