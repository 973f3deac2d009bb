//! tinyc-sem - Semantic analysis for Tiny.
//!
//! Three pieces:
//!
//! - [`types`]: the hash-consed type tag pool. Every type in a program is a
//!   [`types::TypeTag`] handle; equal handles mean equal types.
//! - [`symbols`]: the scoped symbol table over variables, constants, script
//!   and foreign functions, type names, and imported modules.
//! - [`check`]: the post-parse pass that declares symbols, resolves deferred
//!   type names, checks every expression, and records the annotations code
//!   generation consumes.

pub mod check;
pub mod symbols;
pub mod types;

pub use check::{check_module, CheckInfo};
pub use symbols::{ConstValue, SemError, Sym, SymId, SymKind, Symbols};
pub use types::{TagKind, TagPool, TypeTag};
