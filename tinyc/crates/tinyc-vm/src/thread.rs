//! The execution engine: one thread of execution over a compiled program.
//!
//! A thread owns everything mutable at runtime: the typed operand stack,
//! the call frame stack, the global slots, the return-value register, and
//! the GC heap. The program, the string pool, and the foreign function
//! registry are borrowed from the state that compiled them.
//!
//! Dispatch is strictly typed: the compiler guarantees the operand types
//! each opcode finds on the stack, and the engine surfaces any violation as
//! a runtime error rather than trusting the bytecode. Runtime errors halt
//! the thread (the program counter moves to the done sentinel and the
//! formatted message is recorded) and propagate to the caller.
//!
//! Thread lifecycle: created bound to a state; `start` (or the first
//! `call_function`) allocates globals and makes it runnable; `execute_cycle`
//! steps one instruction and is the only suspension point; `halt` or an
//! error makes it done; `call_function` may re-enter a done thread; dropping
//! it tears down the heap and releases every string it retained.

use std::any::Any;
use std::cell::RefCell;

use thiserror::Error;
use tinyc_gen::{Op, Program, IMM_ALIGN};
use tinyc_util::{Str, StringPool};

use crate::heap::{Heap, ObjKind};
use crate::value::{NativeProp, Value};

/// Fixed operand stack capacity, in values.
pub const STACK_SIZE: usize = 256;

/// Fixed call frame capacity.
pub const MAX_CALL_DEPTH: usize = 64;

/// Program counter sentinel for a thread that is not running.
const PC_DONE: usize = usize::MAX;

/// A host function callable from scripts.
///
/// Receives the calling thread and a snapshot of the arguments (still
/// rooted on the operand stack for the duration of the call); its result
/// lands in the thread's retval slot.
pub type ForeignFn =
    Box<dyn for<'s> Fn(&mut Thread<'s>, &[Value]) -> Result<Value, VmError>>;

/// Runtime errors. Any of these halts the thread that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("operand stack overflow")]
    StackOverflow,

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("call depth exceeded")]
    CallDepthExceeded,

    #[error("return with no active frame")]
    FrameUnderflow,

    #[error("call to unbound foreign function {index}")]
    UnboundForeign { index: u32 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid opcode byte {byte:#04x}")]
    BadOpcode { byte: u8 },

    #[error("executed alignment padding")]
    MisalignedInstruction,

    #[error("program counter out of bounds")]
    PcOutOfBounds,

    #[error("malformed {what} operand")]
    BadImmediate { what: &'static str },

    #[error("expected {expected} value on the stack")]
    TypeMismatch { expected: &'static str },

    #[error("call arity mismatch: expected {expected} argument(s), got {got}")]
    ArityMismatch { expected: u8, got: usize },
}

/// One call record.
#[derive(Clone, Copy, Debug)]
struct Frame {
    /// Where to resume after the callee returns.
    ret_pc: usize,

    /// The caller's frame pointer.
    prev_fp: usize,

    /// Argument slots to release on return.
    nargs: u8,
}

/// A thread of execution bound to a compiled state.
pub struct Thread<'s> {
    program: &'s Program,
    pool: &'s RefCell<StringPool>,
    foreigns: &'s [ForeignFn],

    pc: usize,
    fp: usize,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Vec<Value>,
    retval: Value,
    heap: Heap,

    /// Module and line of the instruction at the current pc, maintained by
    /// the `file`/`line` pseudo-ops.
    file: Option<Str>,
    line: u32,

    /// Message of the runtime error that halted the thread, if any.
    error: Option<String>,

    /// Host scratch pointer; the VM never touches it.
    userdata: Option<Box<dyn Any>>,
}

impl<'s> Thread<'s> {
    /// Bind a new thread to a compiled program.
    pub fn new(
        program: &'s Program,
        pool: &'s RefCell<StringPool>,
        foreigns: &'s [ForeignFn],
    ) -> Self {
        Self {
            program,
            pool,
            foreigns,
            pc: PC_DONE,
            fp: 0,
            stack: Vec::with_capacity(STACK_SIZE),
            frames: Vec::with_capacity(MAX_CALL_DEPTH),
            globals: Vec::new(),
            retval: Value::Null,
            heap: Heap::new(),
            file: None,
            line: 0,
            error: None,
            userdata: None,
        }
    }

    /// Allocate globals and point the thread at the program entry.
    pub fn start(&mut self) {
        self.ensure_globals();
        self.pc = if self.program.code.is_empty() {
            PC_DONE
        } else {
            0
        };
    }

    /// True once the thread has halted (or before it was started).
    pub fn is_done(&self) -> bool {
        self.pc == PC_DONE
    }

    /// The message of the runtime error that halted this thread, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The last value returned through the retval slot.
    pub fn retval(&self) -> Value {
        self.retval
    }

    /// Source module of the currently executing code, if known.
    pub fn current_file(&self) -> Option<String> {
        let file = self.file?;
        Some(self.pool.borrow().get(file).to_string())
    }

    /// Source line of the currently executing code.
    pub fn current_line(&self) -> u32 {
        self.line
    }

    /// Current operand stack depth.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Current call frame depth.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of live heap objects.
    pub fn num_objects(&self) -> usize {
        self.heap.len()
    }

    /// Read a global slot. `None` if the slot does not exist or globals
    /// have not been allocated yet.
    pub fn get_global(&self, index: usize) -> Option<Value> {
        self.globals.get(index).copied()
    }

    /// Write a global slot.
    pub fn set_global(&mut self, index: usize, value: Value) -> bool {
        match self.globals.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn set_userdata(&mut self, data: Option<Box<dyn Any>>) {
        self.userdata = data;
    }

    pub fn userdata(&self) -> Option<&dyn Any> {
        self.userdata.as_deref()
    }

    pub fn userdata_mut(&mut self) -> Option<&mut (dyn Any + 'static)> {
        self.userdata.as_deref_mut()
    }

    // =========================================================================
    // Value construction and inspection for hosts and foreign functions
    // =========================================================================

    /// Allocate a new GC-tracked string value. The bytes are interned and
    /// the pool entry retained for the object's lifetime.
    pub fn new_string(&mut self, text: &str) -> Value {
        let handle = {
            let mut pool = self.pool.borrow_mut();
            let handle = pool.insert(text);
            pool.retain(handle);
            handle
        };

        Value::Str(self.heap.alloc(ObjKind::Str(handle)))
    }

    /// Allocate a new GC-tracked native value.
    pub fn new_native(&mut self, data: Box<dyn Any>, prop: Option<&'static NativeProp>) -> Value {
        Value::Native(self.heap.alloc(ObjKind::Native { data, prop }))
    }

    /// The text of a string value.
    pub fn string_value(&self, value: Value) -> Option<String> {
        let handle = self.string_handle(value)?;
        Some(self.pool.borrow().get(handle).to_string())
    }

    /// The pool identity of a string value. Two string values are equal
    /// exactly when their handles are.
    pub fn string_handle(&self, value: Value) -> Option<Str> {
        match value {
            Value::Str(r) => match self.heap.get(r)? {
                ObjKind::Str(handle) => Some(*handle),
                _ => None,
            },
            _ => None,
        }
    }

    /// Borrow the data of a native value.
    pub fn native_data(&self, value: Value) -> Option<&dyn Any> {
        match value {
            Value::Native(r) => match self.heap.get(r)? {
                ObjKind::Native { data, .. } => Some(data.as_ref()),
                _ => None,
            },
            _ => None,
        }
    }

    /// The properties a native value was created with.
    pub fn native_prop(&self, value: Value) -> Option<&'static NativeProp> {
        match value {
            Value::Native(r) => match self.heap.get(r)? {
                ObjKind::Native { prop, .. } => *prop,
                _ => None,
            },
            _ => None,
        }
    }

    /// Read field `index` of a struct value.
    pub fn get_field(&self, value: Value, index: usize) -> Option<Value> {
        match value {
            Value::Struct(r) => match self.heap.get(r)? {
                ObjKind::Struct(fields) => fields.get(index).copied(),
                _ => None,
            },
            _ => None,
        }
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run one instruction. Returns whether an instruction executed; a
    /// done thread returns `Ok(false)`. May trigger a collection at the end
    /// of the cycle.
    pub fn execute_cycle(&mut self) -> Result<bool, VmError> {
        if self.pc == PC_DONE {
            return Ok(false);
        }

        match self.step() {
            Ok(()) => {
                if self.heap.should_collect() {
                    self.collect_garbage();
                }
                Ok(true)
            }
            Err(err) => {
                self.error = Some(format!(
                    "{}:{}: {}",
                    self.current_file().unwrap_or_default(),
                    self.line,
                    err
                ));
                self.pc = PC_DONE;
                Err(err)
            }
        }
    }

    /// Run until the thread halts.
    pub fn run(&mut self) -> Result<(), VmError> {
        while self.execute_cycle()? {}
        Ok(())
    }

    /// Call a script function by index, running until it returns, and
    /// produce its return value.
    ///
    /// Safe to invoke from a foreign function: the interpreter state active
    /// before the call is saved and restored. Allocates globals if the
    /// thread was never started (the thread stays done afterwards in that
    /// case).
    pub fn call_function(&mut self, index: usize, args: &[Value]) -> Result<Value, VmError> {
        let func = *self
            .program
            .functions
            .get(index)
            .ok_or(VmError::BadImmediate {
                what: "function index",
            })?;

        if args.len() != func.nargs as usize {
            return Err(VmError::ArityMismatch {
                expected: func.nargs,
                got: args.len(),
            });
        }

        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded);
        }

        self.ensure_globals();

        let saved_pc = self.pc;
        let saved_fp = self.fp;
        let base = self.stack.len();
        let depth = self.frames.len();

        for &arg in args {
            self.push(arg)?;
        }

        self.frames.push(Frame {
            ret_pc: PC_DONE,
            prev_fp: saved_fp,
            nargs: args.len() as u8,
        });
        self.fp = self.stack.len();
        self.pc = func.pc as usize;

        while self.frames.len() > depth && self.pc != PC_DONE {
            self.execute_cycle()?;
        }

        if self.frames.len() > depth {
            // The script halted mid-call; unwind to the pre-call state but
            // leave the thread done.
            self.frames.truncate(depth);
            self.stack.truncate(base);
            self.fp = saved_fp;
        } else {
            self.pc = saved_pc;
        }

        Ok(self.retval)
    }

    fn ensure_globals(&mut self) {
        let needed = self.program.num_globals as usize;
        if self.globals.len() < needed {
            self.globals.resize(needed, Value::Null);
        }
    }

    fn collect_garbage(&mut self) {
        let Thread {
            heap,
            stack,
            globals,
            retval,
            pool,
            ..
        } = self;

        let roots = stack
            .iter()
            .copied()
            .chain(globals.iter().copied())
            .chain(std::iter::once(*retval));

        heap.collect(roots, &mut pool.borrow_mut());
    }

    // =========================================================================
    // Decode helpers
    // =========================================================================

    fn fetch_op(&mut self) -> Result<Op, VmError> {
        let byte = *self
            .program
            .code
            .get(self.pc)
            .ok_or(VmError::PcOutOfBounds)?;
        self.pc += 1;
        Op::try_from(byte).map_err(|_| VmError::BadOpcode { byte })
    }

    fn read_u8(&mut self) -> Result<u8, VmError> {
        let byte = *self
            .program
            .code
            .get(self.pc)
            .ok_or(VmError::PcOutOfBounds)?;
        self.pc += 1;
        Ok(byte)
    }

    fn read_u32(&mut self) -> Result<u32, VmError> {
        self.pc = (self.pc + IMM_ALIGN - 1) & !(IMM_ALIGN - 1);

        let bytes = self
            .program
            .code
            .get(self.pc..self.pc + 4)
            .ok_or(VmError::PcOutOfBounds)?;
        self.pc += 4;

        Ok(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
    }

    fn read_i32(&mut self) -> Result<i32, VmError> {
        Ok(self.read_u32()? as i32)
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.stack.len() >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_int(&mut self) -> Result<i32, VmError> {
        self.pop()?
            .as_int()
            .ok_or(VmError::TypeMismatch { expected: "int" })
    }

    fn pop_float(&mut self) -> Result<f32, VmError> {
        self.pop()?
            .as_float()
            .ok_or(VmError::TypeMismatch { expected: "float" })
    }

    fn pop_bool(&mut self) -> Result<bool, VmError> {
        self.pop()?
            .as_bool()
            .ok_or(VmError::TypeMismatch { expected: "bool" })
    }

    fn pop_char(&mut self) -> Result<char, VmError> {
        self.pop()?
            .as_char()
            .ok_or(VmError::TypeMismatch { expected: "char" })
    }

    fn pop_string_handle(&mut self) -> Result<Str, VmError> {
        let value = self.pop()?;
        self.string_handle(value)
            .ok_or(VmError::TypeMismatch { expected: "str" })
    }

    fn pop_struct(&mut self) -> Result<Value, VmError> {
        let value = self.pop()?;
        match value {
            Value::Struct(_) => Ok(value),
            _ => Err(VmError::TypeMismatch { expected: "struct" }),
        }
    }

    fn local_slot(&self, offset: i32) -> Result<usize, VmError> {
        usize::try_from(self.fp as i64 + offset as i64).map_err(|_| VmError::BadImmediate {
            what: "local slot",
        })
    }

    fn pop_frame(&mut self) -> Result<(), VmError> {
        let frame = self.frames.pop().ok_or(VmError::FrameUnderflow)?;

        self.stack.truncate(self.fp);
        self.fp = frame.prev_fp;

        let remaining = self
            .stack
            .len()
            .checked_sub(frame.nargs as usize)
            .ok_or(VmError::StackUnderflow)?;
        self.stack.truncate(remaining);

        self.pc = frame.ret_pc;
        Ok(())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn step(&mut self) -> Result<(), VmError> {
        let op = self.fetch_op()?;

        match op {
            Op::AddSp => {
                let count = self.read_u8()?;
                for _ in 0..count {
                    self.push(Value::Null)?;
                }
            }

            Op::PushNull => self.push(Value::Null)?,
            Op::PushTrue => self.push(Value::Bool(true))?,
            Op::PushFalse => self.push(Value::Bool(false))?,

            Op::PushChar => {
                let code = self.read_u32()?;
                let ch = char::from_u32(code).ok_or(VmError::BadImmediate {
                    what: "code point",
                })?;
                self.push(Value::Char(ch))?;
            }

            Op::PushInt => {
                let value = self.read_i32()?;
                self.push(Value::Int(value))?;
            }

            Op::PushInt0 => self.push(Value::Int(0))?,

            Op::PushFloat => {
                let index = self.read_u32()? as usize;
                let value = *self
                    .program
                    .floats
                    .get(index)
                    .ok_or(VmError::BadImmediate {
                        what: "float pool index",
                    })?;
                self.push(Value::Float(value))?;
            }

            Op::PushFloatFF => {
                let index = self.read_u8()? as usize;
                let value = *self
                    .program
                    .floats
                    .get(index)
                    .ok_or(VmError::BadImmediate {
                        what: "float pool index",
                    })?;
                self.push(Value::Float(value))?;
            }

            Op::PushFloat0 => self.push(Value::Float(0.0))?,

            Op::PushString => {
                let handle = Str(self.read_u32()?);

                // Pushing a string allocates a heap object that keeps the
                // pool entry retained until the object is swept.
                self.pool.borrow_mut().retain(handle);
                let obj = self.heap.alloc(ObjKind::Str(handle));
                self.push(Value::Str(obj))?;
            }

            // Integer arithmetic.
            Op::AddInt => self.int_binop(|a, b| Ok(a.wrapping_add(b)))?,
            Op::SubInt => self.int_binop(|a, b| Ok(a.wrapping_sub(b)))?,
            Op::MulInt => self.int_binop(|a, b| Ok(a.wrapping_mul(b)))?,
            Op::DivInt => self.int_binop(|a, b| {
                if b == 0 {
                    Err(VmError::DivisionByZero)
                } else {
                    Ok(a.wrapping_div(b))
                }
            })?,
            Op::ModInt => self.int_binop(|a, b| {
                if b == 0 {
                    Err(VmError::DivisionByZero)
                } else {
                    Ok(a.wrapping_rem(b))
                }
            })?,
            Op::OrInt => self.int_binop(|a, b| Ok(a | b))?,
            Op::AndInt => self.int_binop(|a, b| Ok(a & b))?,

            Op::Add1Int => {
                let value = self.pop_int()?;
                self.push(Value::Int(value.wrapping_add(1)))?;
            }

            Op::Sub1Int => {
                let value = self.pop_int()?;
                self.push(Value::Int(value.wrapping_sub(1)))?;
            }

            // Integer comparison.
            Op::LtInt => self.int_cmp(|a, b| a < b)?,
            Op::LteInt => self.int_cmp(|a, b| a <= b)?,
            Op::GtInt => self.int_cmp(|a, b| a > b)?,
            Op::GteInt => self.int_cmp(|a, b| a >= b)?,

            // Float arithmetic.
            Op::AddFloat => self.float_binop(|a, b| a + b)?,
            Op::SubFloat => self.float_binop(|a, b| a - b)?,
            Op::MulFloat => self.float_binop(|a, b| a * b)?,
            Op::DivFloat => self.float_binop(|a, b| a / b)?,

            // Float comparison.
            Op::LtFloat => self.float_cmp(|a, b| a < b)?,
            Op::LteFloat => self.float_cmp(|a, b| a <= b)?,
            Op::GtFloat => self.float_cmp(|a, b| a > b)?,
            Op::GteFloat => self.float_cmp(|a, b| a >= b)?,

            // Equality.
            Op::EquBool => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(Value::Bool(a == b))?;
            }
            Op::EquChar => {
                let b = self.pop_char()?;
                let a = self.pop_char()?;
                self.push(Value::Bool(a == b))?;
            }
            Op::EquInt => {
                let b = self.pop_int()?;
                let a = self.pop_int()?;
                self.push(Value::Bool(a == b))?;
            }
            Op::EquFloat => {
                let b = self.pop_float()?;
                let a = self.pop_float()?;
                self.push(Value::Bool(a == b))?;
            }
            Op::EquString => {
                // Pool identity: equal bytes imply the same handle.
                let b = self.pop_string_handle()?;
                let a = self.pop_string_handle()?;
                self.push(Value::Bool(a == b))?;
            }

            // Boolean ops.
            Op::LogAnd => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(Value::Bool(a && b))?;
            }
            Op::LogOr => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(Value::Bool(a || b))?;
            }
            Op::LogNot => {
                let value = self.pop_bool()?;
                self.push(Value::Bool(!value))?;
            }

            // Variables.
            Op::GetGlobal => {
                let index = self.read_u32()? as usize;
                let value = *self.globals.get(index).ok_or(VmError::BadImmediate {
                    what: "global slot",
                })?;
                self.push(value)?;
            }

            Op::SetGlobal => {
                let index = self.read_u32()? as usize;
                let value = self.pop()?;
                let slot = self.globals.get_mut(index).ok_or(VmError::BadImmediate {
                    what: "global slot",
                })?;
                *slot = value;
            }

            Op::GetLocal => {
                let offset = self.read_i32()?;
                let slot = self.local_slot(offset)?;
                let value = *self.stack.get(slot).ok_or(VmError::BadImmediate {
                    what: "local slot",
                })?;
                self.push(value)?;
            }

            Op::SetLocal => {
                let offset = self.read_i32()?;
                let value = self.pop()?;
                let slot = self.local_slot(offset)?;
                let target = self.stack.get_mut(slot).ok_or(VmError::BadImmediate {
                    what: "local slot",
                })?;
                *target = value;
            }

            // Control flow.
            Op::Goto => {
                let dest = self.read_i32()?;
                self.pc = dest as usize;
            }

            Op::GotoFalse => {
                let dest = self.read_i32()?;
                let cond = self.pop_bool()?;
                if !cond {
                    self.pc = dest as usize;
                }
            }

            Op::Call => {
                let nargs = self.read_u8()?;
                let dest = self.read_i32()?;

                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(VmError::CallDepthExceeded);
                }

                self.frames.push(Frame {
                    ret_pc: self.pc,
                    prev_fp: self.fp,
                    nargs,
                });
                self.fp = self.stack.len();
                self.pc = dest as usize;
            }

            Op::CallForeign => {
                let nargs = self.read_u8()? as usize;
                let index = self.read_u32()?;
                self.call_foreign(index, nargs)?;
            }

            Op::Ret => self.pop_frame()?,

            Op::RetVal => {
                self.retval = self.pop()?;
                self.pop_frame()?;
            }

            Op::GetRetval => self.push(self.retval)?,

            // Structs.
            Op::PushStruct => {
                let count = self.read_u8()? as usize;

                let split = self
                    .stack
                    .len()
                    .checked_sub(count)
                    .ok_or(VmError::StackUnderflow)?;
                let fields = self.stack.split_off(split);

                let obj = self.heap.alloc(ObjKind::Struct(fields));
                self.push(Value::Struct(obj))?;
            }

            Op::StructGet => {
                let index = self.read_u8()? as usize;
                let value = self.pop_struct()?;
                let field = self.get_field(value, index).ok_or(VmError::BadImmediate {
                    what: "field index",
                })?;
                self.push(field)?;
            }

            Op::StructSet => {
                let index = self.read_u8()? as usize;
                let value = self.pop()?;
                let target = self.pop_struct()?;

                let fields = match target {
                    Value::Struct(r) => match self.heap.get_mut(r) {
                        Some(ObjKind::Struct(fields)) => fields,
                        _ => return Err(VmError::TypeMismatch { expected: "struct" }),
                    },
                    _ => return Err(VmError::TypeMismatch { expected: "struct" }),
                };

                let slot = fields.get_mut(index).ok_or(VmError::BadImmediate {
                    what: "field index",
                })?;
                *slot = value;
            }

            Op::Halt => {
                self.pc = PC_DONE;
            }

            Op::File => {
                let handle = Str(self.read_u32()?);
                self.file = Some(handle);
            }

            Op::Line => {
                self.line = self.read_u32()?;
            }

            Op::MisalignedInstruction => return Err(VmError::MisalignedInstruction),
        }

        Ok(())
    }

    fn int_binop(
        &mut self,
        f: impl FnOnce(i32, i32) -> Result<i32, VmError>,
    ) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = f(a, b)?;
        self.push(Value::Int(result))
    }

    fn int_cmp(&mut self, f: impl FnOnce(i32, i32) -> bool) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        self.push(Value::Bool(f(a, b)))
    }

    fn float_binop(&mut self, f: impl FnOnce(f32, f32) -> f32) -> Result<(), VmError> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::Float(f(a, b)))
    }

    fn float_cmp(&mut self, f: impl FnOnce(f32, f32) -> bool) -> Result<(), VmError> {
        let b = self.pop_float()?;
        let a = self.pop_float()?;
        self.push(Value::Bool(f(a, b)))
    }

    /// Invoke a foreign function: snapshot the top `nargs` values (left to
    /// right), call the host, store its result in the retval slot, then
    /// release the argument slots. The arguments stay on the stack during
    /// the call so the collector sees them as roots if the host re-enters
    /// the interpreter.
    fn call_foreign(&mut self, index: u32, nargs: usize) -> Result<(), VmError> {
        let foreigns = self.foreigns;
        let func = foreigns
            .get(index as usize)
            .ok_or(VmError::UnboundForeign { index })?;

        let split = self
            .stack
            .len()
            .checked_sub(nargs)
            .ok_or(VmError::StackUnderflow)?;
        let args: Vec<Value> = self.stack[split..].to_vec();

        let result = func(self, &args)?;

        self.stack.truncate(split);
        self.retval = result;

        Ok(())
    }
}

impl Drop for Thread<'_> {
    fn drop(&mut self) {
        self.heap.teardown(&mut self.pool.borrow_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use tinyc_gen::{compile_module, Program};
    use tinyc_par::parse_module;
    use tinyc_sem::{check_module, types, Symbols, TagPool};

    struct Host {
        program: Program,
        pool: RefCell<StringPool>,
        foreigns: Vec<ForeignFn>,
        syms_globals: Vec<(String, u32)>,
        functions: Vec<(String, usize)>,
    }

    impl Host {
        fn thread(&self) -> Thread<'_> {
            Thread::new(&self.program, &self.pool, &self.foreigns)
        }

        fn global_index(&self, name: &str) -> usize {
            self.syms_globals
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, i)| *i as usize)
                .expect("unknown global")
        }

        fn function_index(&self, name: &str) -> usize {
            self.functions
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, i)| *i)
                .expect("unknown function")
        }
    }

    /// Compile a script, optionally binding foreign functions first.
    /// Each binding is (signature name, arg tags, ret, varargs, callback).
    fn compile(src: &str) -> Host {
        compile_with(src, Vec::new())
    }

    type TestForeign = (&'static str, Vec<&'static str>, bool, ForeignFn);

    fn compile_with(src: &str, foreigns: Vec<TestForeign>) -> Host {
        let mut pool = StringPool::new();
        let mut tags = TagPool::new();
        let mut syms = Symbols::new(&mut pool, &tags);

        let mut callbacks = Vec::new();

        for (name, arg_names, varargs, callback) in foreigns {
            let arg_tags = arg_names
                .iter()
                .map(|n| {
                    let handle = pool.insert(n);
                    let sym = syms.find_type(handle).expect("known type");
                    match &syms.sym(sym).kind {
                        tinyc_sem::SymKind::Type { tag } => *tag,
                        _ => panic!("not a type"),
                    }
                })
                .collect();

            let tag = tags.intern_func(arg_tags, types::VOID, varargs);
            let handle = pool.insert(name);
            syms.bind_foreign(&pool, handle, tag).expect("bind foreign");
            callbacks.push(callback);
        }

        let ast = parse_module(src, &mut pool).expect("parse error");
        let info = check_module(&ast, &pool, &mut tags, &mut syms).expect("check error");

        let mut program = Program::new();
        compile_module("test", &ast, &info, &syms, &mut pool, &mut program).expect("gen error");

        // Record name -> index maps before the pool moves into the host.
        let mut syms_globals = Vec::new();
        let mut functions = Vec::new();

        for (index, func) in program.functions.iter().enumerate() {
            functions.push((pool.get(func.name).to_string(), index));
        }

        for name in ["x", "y", "z", "q", "s", "t", "p", "i", "n", "total"] {
            if let Some(handle) = pool.find(name) {
                if let Some(index) = syms.global_index(handle) {
                    syms_globals.push((name.to_string(), index));
                }
            }
        }

        Host {
            program,
            pool: RefCell::new(pool),
            foreigns: callbacks,
            syms_globals,
            functions,
        }
    }

    #[test]
    fn test_globals_after_run() {
        let host = compile("x := 10\ny := 20");
        let mut thread = host.thread();

        thread.start();
        thread.run().expect("run error");

        assert!(thread.is_done());
        assert_eq!(
            thread.get_global(host.global_index("x")),
            Some(Value::Int(10))
        );
        assert_eq!(
            thread.get_global(host.global_index("y")),
            Some(Value::Int(20))
        );
    }

    #[test]
    fn test_execute_cycle_on_done_thread() {
        let host = compile("x := 1");
        let mut thread = host.thread();

        // Never started: no progress.
        assert_eq!(thread.execute_cycle().unwrap(), false);

        thread.start();
        thread.run().unwrap();
        assert_eq!(thread.execute_cycle().unwrap(), false);
    }

    #[test]
    fn test_call_function_returns_value() {
        let host = compile("func add(a: int, b: int): int { return a + b }");
        let mut thread = host.thread();

        let result = thread
            .call_function(host.function_index("add"), &[Value::Int(3), Value::Int(4)])
            .expect("call error");

        assert_eq!(result, Value::Int(7));
        assert_eq!(thread.stack_depth(), 0);
        assert_eq!(thread.frame_depth(), 0);
    }

    #[test]
    fn test_call_function_arity_mismatch() {
        let host = compile("func f(a: int) { }");
        let mut thread = host.thread();

        let err = thread
            .call_function(host.function_index("f"), &[])
            .unwrap_err();
        assert!(matches!(err, VmError::ArityMismatch { expected: 1, got: 0 }));
    }

    #[test]
    fn test_string_literals_share_pool_identity() {
        let host = compile("s := \"he\"\nt := \"he\"");
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        let s = thread.get_global(host.global_index("s")).unwrap();
        let t = thread.get_global(host.global_index("t")).unwrap();

        // Distinct heap objects, same pooled string.
        assert_ne!(s, t);
        assert_eq!(thread.string_handle(s), thread.string_handle(t));
        assert_eq!(thread.string_value(s).as_deref(), Some("he"));
    }

    #[test]
    fn test_struct_field_arithmetic() {
        let host = compile("struct P { x: int y: int }\np := new P{1, 2}\nq := p.x + p.y");
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("q")),
            Some(Value::Int(3))
        );

        let p = thread.get_global(host.global_index("p")).unwrap();
        assert_eq!(thread.get_field(p, 0), Some(Value::Int(1)));
        assert_eq!(thread.get_field(p, 1), Some(Value::Int(2)));
    }

    #[test]
    fn test_struct_reference_semantics() {
        let host = compile(
            "struct P { x: int }\n\
             func bump(p: P) { p.x = p.x + 10 }\n\
             p := new P{1}\n\
             bump(p)\n\
             q := p.x",
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("q")),
            Some(Value::Int(11))
        );
    }

    #[test]
    fn test_for_loop_to_thousand() {
        let host = compile(
            "n := 0\n\
             func count(): int {\n\
                 i := 0\n\
                 for i = 0; i < 1000; i = i + 1 { }\n\
                 return i\n\
             }\n\
             n = count()",
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("n")),
            Some(Value::Int(1000))
        );
        assert_eq!(thread.frame_depth(), 0);
        assert_eq!(thread.stack_depth(), 0);
    }

    #[test]
    fn test_while_with_break_continue() {
        let host = compile(
            "x := 0\n\
             i := 0\n\
             while true {\n\
                 i = i + 1\n\
                 if i % 2 == 0 { continue }\n\
                 if i > 9 { break }\n\
                 x = x + i\n\
             }",
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        // 1 + 3 + 5 + 7 + 9
        assert_eq!(
            thread.get_global(host.global_index("x")),
            Some(Value::Int(25))
        );
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        let host = compile(
            "a := 0 - 7\n\
             x := a / 2\n\
             y := a % 2\n\
             z := 7 / 2",
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("x")),
            Some(Value::Int(-3))
        );
        assert_eq!(
            thread.get_global(host.global_index("y")),
            Some(Value::Int(-1))
        );
        assert_eq!(
            thread.get_global(host.global_index("z")),
            Some(Value::Int(3))
        );
    }

    #[test]
    fn test_division_by_zero_halts_thread() {
        let host = compile("x := 1 / 0");
        let mut thread = host.thread();

        thread.start();
        let err = thread.run().unwrap_err();

        assert_eq!(err, VmError::DivisionByZero);
        assert!(thread.is_done());
        assert!(thread.error().unwrap().contains("division by zero"));
    }

    #[test]
    fn test_operand_stack_overflow() {
        // Each frame reserves 100 local slots, so the third recursive call
        // pushes the operand stack past its fixed capacity before the call
        // depth limit is reached.
        let mut body = String::new();
        for i in 0..100 {
            body.push_str(&format!("l{i} := 0\n"));
        }
        let src = format!("func f() {{\n{body}f()\n}}\nf()");

        let host = compile(&src);
        let mut thread = host.thread();

        thread.start();
        let err = thread.run().unwrap_err();

        assert_eq!(err, VmError::StackOverflow);
        assert!(thread.is_done());
    }

    #[test]
    fn test_unbounded_recursion_overflows_call_depth() {
        let host = compile("func f() { f() }\nf()");
        let mut thread = host.thread();

        thread.start();
        let err = thread.run().unwrap_err();

        assert_eq!(err, VmError::CallDepthExceeded);
        assert!(thread.is_done());
    }

    #[test]
    fn test_garbage_is_collected_during_run() {
        let host = compile(
            "struct P { x: int }\n\
             p := new P{0}\n\
             for i := 0; i < 100; i = i + 1 { p = new P{i} }",
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        // 101 allocations happened; only the live tail (plus slack below
        // the doubled threshold) remains.
        assert!(thread.num_objects() < 100);
        let p = thread.get_global(host.global_index("p")).unwrap();
        assert_eq!(thread.get_field(p, 0), Some(Value::Int(99)));
    }

    #[test]
    fn test_foreign_call_receives_typed_args() {
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_in = Rc::clone(&seen);

        let print: ForeignFn = Box::new(move |thread: &mut Thread, args: &[Value]| {
            let mut seen = seen_in.borrow_mut();
            for &arg in args {
                let text = match arg {
                    Value::Int(i) => format!("int:{i}"),
                    Value::Bool(b) => format!("bool:{b}"),
                    Value::Str(_) => {
                        format!("str:{}", thread.string_value(arg).expect("string arg"))
                    }
                    other => format!("{other:?}"),
                };
                seen.push(text);
            }
            Ok(Value::Null)
        });

        let host = compile_with(
            "print(1, \"a\", true)",
            vec![("print", vec![], true, print)],
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![
                "int:1".to_string(),
                "str:a".to_string(),
                "bool:true".to_string()
            ]
        );
        assert_eq!(thread.stack_depth(), 0);
    }

    #[test]
    fn test_foreign_reentrancy_via_call_function() {
        let doubler: ForeignFn = Box::new(|thread: &mut Thread, args: &[Value]| {
            // Re-enter the interpreter from inside a foreign call.
            let double = thread.call_function(0, &[args[0]])?;
            Ok(double)
        });

        let host = compile_with(
            "func twice(a: int): int { return a + a }\n\
             x := 0\n\
             host_double(21)\n\
             x = retget()",
            vec![
                ("host_double", vec!["int"], false, doubler),
                (
                    "retget",
                    vec![],
                    false,
                    Box::new(|thread: &mut Thread, _: &[Value]| Ok(thread.retval())),
                ),
            ],
        );

        let mut thread = host.thread();
        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("x")),
            Some(Value::Int(42))
        );
    }

    #[test]
    fn test_call_function_without_start() {
        let host = compile("x := 5\nfunc get(): int { return x }");
        let mut thread = host.thread();

        // Globals are allocated but top-level code has not run, so x is
        // still null-initialized... calling a function that returns it
        // yields null.
        let result = thread
            .call_function(host.function_index("get"), &[])
            .expect("call error");
        assert_eq!(result, Value::Null);
        assert!(thread.is_done());
    }

    #[test]
    fn test_call_function_after_run_is_reentrant() {
        let host = compile("x := 5\nfunc get(): int { return x }");
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        let first = thread.call_function(host.function_index("get"), &[]).unwrap();
        assert_eq!(first, Value::Int(5));

        thread.set_global(host.global_index("x"), Value::Int(9));
        let second = thread.call_function(host.function_index("get"), &[]).unwrap();
        assert_eq!(second, Value::Int(9));
        assert!(thread.is_done());
    }

    #[test]
    fn test_file_and_line_tracking() {
        let host = compile("x := 1\ny := 2");
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(thread.current_file().as_deref(), Some("test"));
        assert_eq!(thread.current_line(), 2);
    }

    #[test]
    fn test_new_string_and_native() {
        let host = compile("x := 1");
        let mut thread = host.thread();
        thread.start();

        let s = thread.new_string("made by host");
        assert_eq!(thread.string_value(s).as_deref(), Some("made by host"));

        let n = thread.new_native(Box::new(1234u64), None);
        let data = thread.native_data(n).expect("native data");
        assert_eq!(data.downcast_ref::<u64>(), Some(&1234));
    }

    #[test]
    fn test_userdata_roundtrip() {
        let host = compile("x := 1");
        let mut thread = host.thread();

        assert!(thread.userdata().is_none());
        thread.set_userdata(Some(Box::new("context".to_string())));
        assert_eq!(
            thread.userdata().unwrap().downcast_ref::<String>().unwrap(),
            "context"
        );
    }

    #[test]
    fn test_compound_and_bitwise_ops() {
        let host = compile(
            "x := 12\n\
             x |= 3\n\
             y := 12 & 10\n\
             z := 7 % 3",
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("x")),
            Some(Value::Int(15))
        );
        assert_eq!(
            thread.get_global(host.global_index("y")),
            Some(Value::Int(8))
        );
        assert_eq!(
            thread.get_global(host.global_index("z")),
            Some(Value::Int(1))
        );
    }

    #[test]
    fn test_float_arithmetic() {
        let host = compile("x := 1.5 + 2.25\ny := 10.0 / 4.0\nz := x < y");
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("x")),
            Some(Value::Float(3.75))
        );
        assert_eq!(
            thread.get_global(host.global_index("y")),
            Some(Value::Float(2.5))
        );
        assert_eq!(
            thread.get_global(host.global_index("z")),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn test_string_equality_is_pool_identity() {
        let host = compile("x := \"abc\" == \"abc\"\ny := \"abc\" == \"abd\"");
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        assert_eq!(
            thread.get_global(host.global_index("x")),
            Some(Value::Bool(true))
        );
        assert_eq!(
            thread.get_global(host.global_index("y")),
            Some(Value::Bool(false))
        );
    }

    #[test]
    fn test_any_values_carry_runtime_tags() {
        let host = compile(
            "x : any = 1\n\
             x = \"now a string\"\n\
             y : any = cast(5, any)",
        );
        let mut thread = host.thread();

        thread.start();
        thread.run().unwrap();

        let x = thread.get_global(host.global_index("x")).unwrap();
        assert!(matches!(x, Value::Str(_)));

        let y = thread.get_global(host.global_index("y")).unwrap();
        assert_eq!(y, Value::Int(5));
    }
}
