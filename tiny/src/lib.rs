//! tiny - An embeddable, statically typed scripting language.
//!
//! A host program builds a [`State`] (compiling one or more script modules
//! and binding foreign functions, constants, and opaque types into it) and
//! then runs the compiled program in one or more [`Thread`]s of execution:
//!
//! ```
//! use tiny::{State, Value};
//!
//! let mut state = State::new();
//!
//! state
//!     .bind_function("double(int): int", |_thread: &mut tiny::Thread, args: &[tiny::Value]| {
//!         let n = args[0].as_int().unwrap_or(0);
//!         Ok(Value::Int(n * 2))
//!     })
//!     .unwrap();
//!
//! state
//!     .compile_string("demo", "x := double(21)")
//!     .unwrap();
//!
//! let mut thread = state.spawn_thread();
//! thread.start();
//! thread.run().unwrap();
//!
//! let x = state.get_global_index("x").unwrap();
//! assert_eq!(thread.get_global(x), Some(Value::Int(42)));
//! ```
//!
//! The state owns the compiled bytecode, the interned string pool, the
//! symbol and type tables, and the foreign function registry. Threads
//! borrow the state, so the borrow checker enforces the real contract:
//! compilation (`&mut State`) cannot run while any thread (`&State`) is
//! alive, and the state outlives every thread it backs. One state's pool is
//! single-threaded; threads sharing it must execute on one OS thread.

mod sig;

use std::cell::RefCell;

use thiserror::Error;

use tinyc_gen::{compile_module, GenError, Program};
use tinyc_par::{parse_module, ParseError};
use tinyc_sem::{check_module, ConstValue, SemError, Symbols, TagPool, TypeTag};
use tinyc_util::StringPool;

pub use tinyc_vm::{
    ForeignFn, NativeProp, ObjRef, Thread, Value, VmError, MAX_CALL_DEPTH, STACK_SIZE,
};

/// Errors surfaced while building a state: lexing, parsing, checking, code
/// generation, or a malformed binding.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Sem(#[from] SemError),

    #[error(transparent)]
    Gen(#[from] GenError),

    #[error("invalid binding signature: {0}")]
    Signature(String),
}

/// A compiled program plus its symbol, type, string, and constant tables,
/// ready to back threads of execution.
pub struct State {
    pool: RefCell<StringPool>,
    tags: TagPool,
    syms: Symbols,
    program: Program,
    foreigns: Vec<ForeignFn>,
}

impl State {
    /// Create an empty state.
    pub fn new() -> Self {
        let mut pool = StringPool::new();
        let tags = TagPool::new();
        let syms = Symbols::new(&mut pool, &tags);

        Self {
            pool: RefCell::new(pool),
            tags,
            syms,
            program: Program::new(),
            foreigns: Vec::new(),
        }
    }

    /// Expose an opaque named type to scripts. Registering the same name
    /// again is a no-op.
    pub fn register_type(&mut self, name: &str) {
        let handle = self.pool.get_mut().insert(name);
        let tag = self.tags.intern_name(handle);
        self.syms.register_type(handle, tag);
    }

    /// Bind a host function under a signature of the form
    /// `name(T[,T]*[,...])[:R]`. A missing `:R` means the function returns
    /// `void`; the literal `...` suffix accepts any further arguments,
    /// widened to `any`.
    pub fn bind_function<F>(&mut self, signature: &str, func: F) -> Result<(), CompileError>
    where
        F: for<'s> Fn(&mut Thread<'s>, &[Value]) -> Result<Value, VmError> + 'static,
    {
        let parsed = sig::parse_signature(signature).map_err(CompileError::Signature)?;

        let arg_tags = parsed
            .args
            .iter()
            .map(|name| self.resolve_type_name(name))
            .collect::<Result<Vec<_>, _>>()?;

        let ret = match &parsed.ret {
            Some(name) => self.resolve_type_name(name)?,
            None => tinyc_sem::types::VOID,
        };

        let tag = self.tags.intern_func(arg_tags, ret, parsed.varargs);

        let pool = self.pool.get_mut();
        let name = pool.insert(&parsed.name);
        self.syms.bind_foreign(pool, name, tag)?;

        self.foreigns.push(Box::new(func));
        Ok(())
    }

    /// Bind a compile-time boolean constant.
    pub fn bind_const_bool(&mut self, name: &str, value: bool) -> Result<(), CompileError> {
        self.bind_const(name, tinyc_sem::types::BOOL, ConstValue::Bool(value))
    }

    /// Bind a compile-time integer constant.
    pub fn bind_const_int(&mut self, name: &str, value: i32) -> Result<(), CompileError> {
        self.bind_const(name, tinyc_sem::types::INT, ConstValue::Int(value))
    }

    /// Bind a compile-time float constant.
    pub fn bind_const_float(&mut self, name: &str, value: f32) -> Result<(), CompileError> {
        self.bind_const(name, tinyc_sem::types::FLOAT, ConstValue::Float(value))
    }

    /// Bind a compile-time string constant.
    pub fn bind_const_string(&mut self, name: &str, value: &str) -> Result<(), CompileError> {
        let handle = self.pool.get_mut().insert(value);
        self.bind_const(name, tinyc_sem::types::STR, ConstValue::Str(handle))
    }

    fn bind_const(
        &mut self,
        name: &str,
        tag: TypeTag,
        value: ConstValue,
    ) -> Result<(), CompileError> {
        let pool = self.pool.get_mut();
        let name = pool.insert(name);
        self.syms
            .declare_const(pool, name, tinyc_util::Pos::DUMMY, tag, value)?;
        Ok(())
    }

    /// Compile a module, appending its code, floats, and symbols to the
    /// state.
    ///
    /// On error the state may hold partial symbols and pooled strings from
    /// the failed unit; the safe response is to discard the state.
    pub fn compile_string(&mut self, module_name: &str, src: &str) -> Result<(), CompileError> {
        let State {
            pool,
            tags,
            syms,
            program,
            ..
        } = self;
        let pool = pool.get_mut();

        let ast = parse_module(src, pool)?;
        let info = check_module(&ast, pool, tags, syms)?;
        compile_module(module_name, &ast, &info, syms, pool, program)?;

        Ok(())
    }

    /// Slot index of a global variable, for [`Thread::get_global`] /
    /// [`Thread::set_global`]. `None` for unknown names and for constants
    /// (which are inlined at use sites and have no slot).
    pub fn get_global_index(&self, name: &str) -> Option<usize> {
        let handle = self.pool.borrow().find(name)?;
        self.syms.global_index(handle).map(|i| i as usize)
    }

    /// Index of a script function, for [`Thread::call_function`].
    pub fn get_function_index(&self, name: &str) -> Option<usize> {
        let handle = self.pool.borrow().find(name)?;
        self.syms.function_index(handle).map(|i| i as usize)
    }

    /// Create a thread of execution backed by this state.
    pub fn spawn_thread(&self) -> Thread<'_> {
        Thread::new(&self.program, &self.pool, &self.foreigns)
    }

    /// The compiled program (read-only).
    pub fn program(&self) -> &Program {
        &self.program
    }

    fn resolve_type_name(&self, name: &str) -> Result<TypeTag, CompileError> {
        let handle = self
            .pool
            .borrow()
            .find(name)
            .ok_or_else(|| CompileError::Signature(format!("unknown type name '{name}'")))?;

        let sym = self
            .syms
            .find_type(handle)
            .ok_or_else(|| CompileError::Signature(format!("unknown type name '{name}'")))?;

        match &self.syms.sym(sym).kind {
            tinyc_sem::SymKind::Type { tag } => Ok(*tag),
            _ => Err(CompileError::Signature(format!(
                "'{name}' is not a type name"
            ))),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}
