//! tinyc-vm - The bytecode virtual machine.
//!
//! Executes programs produced by `tinyc-gen`:
//!
//! - [`value`]: the typed runtime [`Value`] and native-object properties.
//! - [`heap`]: the per-thread mark-and-sweep heap cooperating with the
//!   interned string pool (strings are retained on push and released on
//!   sweep).
//! - [`thread`]: the [`Thread`] execution engine - operand stack, call
//!   frames, globals, foreign-call protocol, and the cooperative
//!   `execute_cycle` loop.

pub mod heap;
pub mod thread;
pub mod value;

pub use heap::{Heap, ObjKind, INIT_GC_THRESHOLD};
pub use thread::{ForeignFn, Thread, VmError, MAX_CALL_DEPTH, STACK_SIZE};
pub use value::{NativeProp, ObjRef, Value};
