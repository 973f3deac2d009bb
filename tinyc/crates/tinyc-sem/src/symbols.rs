//! The symbol table.
//!
//! Four ordered namespaces (types, globals, functions, modules), the
//! function currently being checked, and a scope depth. Scopes are not a
//! tree: leaving a scope marks the locals it declared as unreachable but
//! keeps them in their function's local list, because slot assignment and
//! code generation still need to see every local a function ever declares.

use indexmap::IndexMap;
use thiserror::Error;
use tinyc_util::{define_idx, IndexVec, Pos, Str, StringPool};

use crate::types::{TagPool, TypeTag, PRIMITIVE_NAMES};

define_idx!(
    /// Handle to a symbol.
    SymId
);

/// A semantic error, with the source position it was detected at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{pos}: {message}")]
pub struct SemError {
    pub message: String,
    pub pos: Pos,
}

impl SemError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

/// A compile-time constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Char(char),
    Int(i32),
    Float(f32),
    Str(Str),
}

/// What a symbol is.
#[derive(Debug)]
pub enum SymKind {
    /// A global, local, or argument variable.
    Var {
        /// Scope depth the variable was declared at.
        scope: u32,
        /// Slot index: global slot, argument position, or local position.
        index: u32,
        /// True for function arguments (their slots sit below the frame
        /// pointer).
        is_arg: bool,
        /// The function owning this variable, or `None` for globals.
        func: Option<SymId>,
        /// False once the declaring scope has been left.
        reachable: bool,
        tag: TypeTag,
    },

    /// A compile-time constant, inlined at use sites.
    Const { tag: TypeTag, value: ConstValue },

    /// A script function.
    Func {
        index: u32,
        args: Vec<SymId>,
        locals: Vec<SymId>,
        /// Filled in once the signature has been resolved.
        tag: Option<TypeTag>,
    },

    /// A host-bound foreign function.
    ForeignFunc { index: u32, tag: TypeTag },

    /// A named type.
    Type { tag: TypeTag },

    /// An imported module.
    Module,
}

/// One symbol: kind, pooled name, declaration position.
#[derive(Debug)]
pub struct Sym {
    pub kind: SymKind,
    pub name: Str,
    pub pos: Pos,
}

/// The symbol table.
#[derive(Debug)]
pub struct Symbols {
    syms: IndexVec<SymId, Sym>,

    types: IndexMap<Str, SymId>,
    globals: IndexMap<Str, SymId>,
    functions: IndexMap<Str, SymId>,
    modules: IndexMap<Str, SymId>,

    /// The function whose body is being checked, if any.
    pub cur_func: Option<SymId>,

    /// Current scope depth; 0 is global scope.
    scope: u32,

    num_global_vars: u32,
    num_script_funcs: u32,
    num_foreign_funcs: u32,
}

impl Symbols {
    /// Create a table with the seven primitive type names pre-registered.
    pub fn new(pool: &mut StringPool, tags: &TagPool) -> Self {
        let mut table = Self {
            syms: IndexVec::new(),
            types: IndexMap::new(),
            globals: IndexMap::new(),
            functions: IndexMap::new(),
            modules: IndexMap::new(),
            cur_func: None,
            scope: 0,
            num_global_vars: 0,
            num_script_funcs: 0,
            num_foreign_funcs: 0,
        };

        debug_assert!(tags.len() >= PRIMITIVE_NAMES.len());

        for (i, name) in PRIMITIVE_NAMES.iter().enumerate() {
            let name = pool.insert(name);
            let id = table.alloc(
                SymKind::Type {
                    tag: TypeTag(i as u32),
                },
                name,
                Pos::DUMMY,
            );
            table.types.insert(name, id);
        }

        table
    }

    fn alloc(&mut self, kind: SymKind, name: Str, pos: Pos) -> SymId {
        self.syms.push(Sym { kind, name, pos })
    }

    pub fn sym(&self, id: SymId) -> &Sym {
        &self.syms[id]
    }

    pub fn sym_mut(&mut self, id: SymId) -> &mut Sym {
        &mut self.syms[id]
    }

    /// Number of global variable slots declared so far.
    pub fn num_globals(&self) -> u32 {
        self.num_global_vars
    }

    /// Number of script functions declared so far.
    pub fn num_functions(&self) -> u32 {
        self.num_script_funcs
    }

    // =========================================================================
    // Scopes
    // =========================================================================

    pub fn push_scope(&mut self) {
        self.scope += 1;
    }

    /// Leave the current scope, marking every local declared in it as
    /// unreachable. The locals stay in their function's list for slot
    /// accounting.
    pub fn pop_scope(&mut self) {
        if let Some(func_id) = self.cur_func {
            let locals = match &self.syms[func_id].kind {
                SymKind::Func { locals, .. } => locals.clone(),
                _ => Vec::new(),
            };

            for local in locals {
                if let SymKind::Var {
                    scope, reachable, ..
                } = &mut self.syms[local].kind
                {
                    if *scope == self.scope {
                        *reachable = false;
                    }
                }
            }
        }

        self.scope -= 1;
    }

    // =========================================================================
    // Variables and constants
    // =========================================================================

    /// Resolve a name to a variable, constant, or module symbol.
    ///
    /// Resolution order: current function locals (reachable only), then its
    /// arguments, then globals and constants, then modules.
    pub fn reference_var(&self, name: Str) -> Option<SymId> {
        if let Some(func_id) = self.cur_func {
            if let SymKind::Func { args, locals, .. } = &self.syms[func_id].kind {
                for &local in locals {
                    if let SymKind::Var { reachable, .. } = &self.syms[local].kind {
                        if *reachable && self.syms[local].name == name {
                            return Some(local);
                        }
                    }
                }

                for &arg in args {
                    if self.syms[arg].name == name {
                        return Some(arg);
                    }
                }
            }
        }

        if let Some(&id) = self.globals.get(&name) {
            return Some(id);
        }

        self.modules.get(&name).copied()
    }

    /// Declare a variable in the current scope.
    ///
    /// Shadowing within the same function is forbidden; a local may shadow a
    /// global.
    pub fn declare_var(
        &mut self,
        pool: &StringPool,
        name: Str,
        pos: Pos,
        is_arg: bool,
        tag: TypeTag,
    ) -> Result<SymId, SemError> {
        if let Some(existing) = self.reference_var(name) {
            if let SymKind::Var { func, .. } = &self.syms[existing].kind {
                if *func == self.cur_func {
                    return Err(SemError::new(
                        format!(
                            "Attempted to declare a variable '{}' with the same name as another \
                             variable in the same scope.",
                            pool.get(name)
                        ),
                        pos,
                    ));
                }
            }
        }

        let func = self.cur_func;

        let index = match func {
            Some(func_id) => match &self.syms[func_id].kind {
                SymKind::Func { args, locals, .. } => {
                    if is_arg {
                        args.len() as u32
                    } else {
                        locals.len() as u32
                    }
                }
                _ => unreachable!("cur_func is not a function symbol"),
            },
            None => {
                let index = self.num_global_vars;
                self.num_global_vars += 1;
                index
            }
        };

        let id = self.alloc(
            SymKind::Var {
                scope: self.scope,
                index,
                is_arg,
                func,
                reachable: true,
                tag,
            },
            name,
            pos,
        );

        match func {
            Some(func_id) => {
                if let SymKind::Func { args, locals, .. } = &mut self.syms[func_id].kind {
                    if is_arg {
                        args.push(id);
                    } else {
                        locals.push(id);
                    }
                }
            }
            None => {
                self.globals.insert(name, id);
            }
        }

        Ok(id)
    }

    /// Declare a compile-time constant. Only allowed at global scope, and
    /// the name must not collide with another value.
    pub fn declare_const(
        &mut self,
        pool: &StringPool,
        name: Str,
        pos: Pos,
        tag: TypeTag,
        value: ConstValue,
    ) -> Result<SymId, SemError> {
        if self.cur_func.is_some() {
            return Err(SemError::new(
                format!(
                    "Attempted to declare a constant '{}' inside of a function.",
                    pool.get(name)
                ),
                pos,
            ));
        }

        if self.globals.contains_key(&name) {
            return Err(SemError::new(
                format!(
                    "Attempted to define a constant with the same name '{}' as another value.",
                    pool.get(name)
                ),
                pos,
            ));
        }

        let id = self.alloc(SymKind::Const { tag, value }, name, pos);
        self.globals.insert(name, id);

        Ok(id)
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Resolve a name to a script or foreign function.
    pub fn reference_func(&self, name: Str) -> Option<SymId> {
        self.functions.get(&name).copied()
    }

    /// Declare a script function. The name must not already be bound to a
    /// script or foreign function.
    pub fn declare_func(
        &mut self,
        pool: &StringPool,
        name: Str,
        pos: Pos,
    ) -> Result<SymId, SemError> {
        if self.functions.contains_key(&name) {
            return Err(SemError::new(
                format!(
                    "There is already a function bound to the name '{}'.",
                    pool.get(name)
                ),
                pos,
            ));
        }

        let index = self.num_script_funcs;
        self.num_script_funcs += 1;

        let id = self.alloc(
            SymKind::Func {
                index,
                args: Vec::new(),
                locals: Vec::new(),
                tag: None,
            },
            name,
            pos,
        );
        self.functions.insert(name, id);

        Ok(id)
    }

    /// Register a host foreign function.
    pub fn bind_foreign(
        &mut self,
        pool: &StringPool,
        name: Str,
        tag: TypeTag,
    ) -> Result<SymId, SemError> {
        if self.functions.contains_key(&name) {
            return Err(SemError::new(
                format!(
                    "There is already a function bound to the name '{}'.",
                    pool.get(name)
                ),
                Pos::DUMMY,
            ));
        }

        let index = self.num_foreign_funcs;
        self.num_foreign_funcs += 1;

        let id = self.alloc(SymKind::ForeignFunc { index, tag }, name, Pos::DUMMY);
        self.functions.insert(name, id);

        Ok(id)
    }

    // =========================================================================
    // Types and modules
    // =========================================================================

    pub fn find_type(&self, name: Str) -> Option<SymId> {
        self.types.get(&name).copied()
    }

    /// Define a named type. Duplicate definitions are an error.
    pub fn define_type(
        &mut self,
        pool: &StringPool,
        name: Str,
        pos: Pos,
        tag: TypeTag,
    ) -> Result<SymId, SemError> {
        if self.types.contains_key(&name) {
            return Err(SemError::new(
                format!(
                    "Type name '{}' is the same as a previously defined type.",
                    pool.get(name)
                ),
                pos,
            ));
        }

        let id = self.alloc(SymKind::Type { tag }, name, pos);
        self.types.insert(name, id);

        Ok(id)
    }

    /// Register an opaque host type. Re-registering the same name returns
    /// the existing symbol.
    pub fn register_type(&mut self, name: Str, tag: TypeTag) -> SymId {
        if let Some(&id) = self.types.get(&name) {
            return id;
        }

        let id = self.alloc(SymKind::Type { tag }, name, Pos::DUMMY);
        self.types.insert(name, id);
        id
    }

    /// Reverse lookup: the declared name of a type tag, if any.
    pub fn type_name(&self, tag: TypeTag) -> Option<Str> {
        for (&name, &id) in &self.types {
            if let SymKind::Type { tag: t } = &self.syms[id].kind {
                if *t == tag {
                    return Some(name);
                }
            }
        }
        None
    }

    pub fn find_module(&self, name: Str) -> Option<SymId> {
        self.modules.get(&name).copied()
    }

    /// Define a module symbol for an import. Duplicate imports are an
    /// error.
    pub fn define_module(
        &mut self,
        pool: &StringPool,
        name: Str,
        pos: Pos,
    ) -> Result<SymId, SemError> {
        if self.modules.contains_key(&name) {
            return Err(SemError::new(
                format!(
                    "You have already imported a module with the name '{}'.",
                    pool.get(name)
                ),
                pos,
            ));
        }

        let id = self.alloc(SymKind::Module, name, pos);
        self.modules.insert(name, id);

        Ok(id)
    }

    // =========================================================================
    // Host queries
    // =========================================================================

    /// Slot index of a global variable, or `None` for constants (inlined at
    /// use sites, so they have no slot) and unknown names.
    pub fn global_index(&self, name: Str) -> Option<u32> {
        let id = self.globals.get(&name)?;
        match &self.syms[*id].kind {
            SymKind::Var { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Index of a script function, or `None`.
    pub fn function_index(&self, name: Str) -> Option<u32> {
        let id = self.functions.get(&name)?;
        match &self.syms[*id].kind {
            SymKind::Func { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;

    fn setup() -> (StringPool, TagPool, Symbols) {
        let mut pool = StringPool::new();
        let tags = TagPool::new();
        let syms = Symbols::new(&mut pool, &tags);
        (pool, tags, syms)
    }

    #[test]
    fn test_primitive_types_registered() {
        let (mut pool, _, syms) = setup();
        for name in PRIMITIVE_NAMES {
            let handle = pool.insert(name);
            assert!(syms.find_type(handle).is_some(), "missing type {name}");
        }
    }

    #[test]
    fn test_declare_global_var() {
        let (mut pool, _, mut syms) = setup();
        let x = pool.insert("x");
        let id = syms.declare_var(&pool, x, Pos::line(1), false, types::INT).unwrap();
        assert_eq!(syms.reference_var(x), Some(id));
        assert_eq!(syms.global_index(x), Some(0));
        assert_eq!(syms.num_globals(), 1);
    }

    #[test]
    fn test_duplicate_global_rejected() {
        let (mut pool, _, mut syms) = setup();
        let x = pool.insert("x");
        syms.declare_var(&pool, x, Pos::line(1), false, types::INT).unwrap();
        let err = syms
            .declare_var(&pool, x, Pos::line(2), false, types::INT)
            .unwrap_err();
        assert!(err.message.contains("same name"));
    }

    #[test]
    fn test_local_shadows_global() {
        let (mut pool, _, mut syms) = setup();
        let x = pool.insert("x");
        let f = pool.insert("f");

        let global = syms.declare_var(&pool, x, Pos::line(1), false, types::INT).unwrap();

        let func = syms.declare_func(&pool, f, Pos::line(2)).unwrap();
        syms.cur_func = Some(func);
        syms.push_scope();

        let local = syms
            .declare_var(&pool, x, Pos::line(3), false, types::FLOAT)
            .unwrap();
        assert_ne!(local, global);
        assert_eq!(syms.reference_var(x), Some(local));

        syms.pop_scope();
        syms.cur_func = None;

        assert_eq!(syms.reference_var(x), Some(global));
    }

    #[test]
    fn test_pop_scope_marks_unreachable() {
        let (mut pool, _, mut syms) = setup();
        let f = pool.insert("f");
        let v = pool.insert("v");

        let func = syms.declare_func(&pool, f, Pos::line(1)).unwrap();
        syms.cur_func = Some(func);

        syms.push_scope();
        let local = syms.declare_var(&pool, v, Pos::line(2), false, types::INT).unwrap();
        assert_eq!(syms.reference_var(v), Some(local));
        syms.pop_scope();

        // Out of scope: no longer resolvable, but still in the local list
        // for slot accounting.
        assert_eq!(syms.reference_var(v), None);
        match &syms.sym(func).kind {
            SymKind::Func { locals, .. } => assert_eq!(locals.len(), 1),
            _ => panic!("expected function symbol"),
        }
    }

    #[test]
    fn test_sibling_scopes_get_distinct_slots() {
        let (mut pool, _, mut syms) = setup();
        let f = pool.insert("f");
        let a = pool.insert("a");
        let b = pool.insert("b");

        let func = syms.declare_func(&pool, f, Pos::line(1)).unwrap();
        syms.cur_func = Some(func);

        syms.push_scope();
        syms.declare_var(&pool, a, Pos::line(2), false, types::INT).unwrap();
        syms.pop_scope();

        syms.push_scope();
        let second = syms.declare_var(&pool, b, Pos::line(3), false, types::INT).unwrap();
        syms.pop_scope();

        match &syms.sym(second).kind {
            SymKind::Var { index, .. } => assert_eq!(*index, 1),
            _ => panic!("expected variable symbol"),
        }
    }

    #[test]
    fn test_args_resolve_after_locals() {
        let (mut pool, _, mut syms) = setup();
        let f = pool.insert("f");
        let a = pool.insert("a");

        let func = syms.declare_func(&pool, f, Pos::line(1)).unwrap();
        syms.cur_func = Some(func);

        let arg = syms.declare_var(&pool, a, Pos::line(1), true, types::INT).unwrap();
        assert_eq!(syms.reference_var(a), Some(arg));
    }

    #[test]
    fn test_arg_and_local_may_not_collide() {
        let (mut pool, _, mut syms) = setup();
        let f = pool.insert("f");
        let a = pool.insert("a");

        let func = syms.declare_func(&pool, f, Pos::line(1)).unwrap();
        syms.cur_func = Some(func);

        syms.declare_var(&pool, a, Pos::line(1), true, types::INT).unwrap();
        syms.push_scope();
        assert!(syms
            .declare_var(&pool, a, Pos::line(2), false, types::INT)
            .is_err());
    }

    #[test]
    fn test_const_inside_function_rejected() {
        let (mut pool, _, mut syms) = setup();
        let f = pool.insert("f");
        let c = pool.insert("c");

        let func = syms.declare_func(&pool, f, Pos::line(1)).unwrap();
        syms.cur_func = Some(func);

        let err = syms
            .declare_const(&pool, c, Pos::line(2), types::INT, ConstValue::Int(1))
            .unwrap_err();
        assert!(err.message.contains("inside of a function"));
    }

    #[test]
    fn test_const_collision_rejected() {
        let (mut pool, _, mut syms) = setup();
        let x = pool.insert("x");

        syms.declare_var(&pool, x, Pos::line(1), false, types::INT).unwrap();
        let err = syms
            .declare_const(&pool, x, Pos::line(2), types::INT, ConstValue::Int(1))
            .unwrap_err();
        assert!(err.message.contains("same name"));
    }

    #[test]
    fn test_const_has_no_global_index() {
        let (mut pool, _, mut syms) = setup();
        let c = pool.insert("c");
        syms.declare_const(&pool, c, Pos::line(1), types::INT, ConstValue::Int(5))
            .unwrap();
        assert_eq!(syms.global_index(c), None);
    }

    #[test]
    fn test_function_redeclaration_rejected() {
        let (mut pool, tags, mut syms) = setup();
        let f = pool.insert("f");
        let mut tags = tags;

        syms.declare_func(&pool, f, Pos::line(1)).unwrap();
        assert!(syms.declare_func(&pool, f, Pos::line(2)).is_err());

        let tag = tags.intern_func(vec![], types::VOID, false);
        assert!(syms.bind_foreign(&pool, f, tag).is_err());
    }

    #[test]
    fn test_foreign_then_script_clash() {
        let (mut pool, mut tags, mut syms) = setup();
        let f = pool.insert("g");

        let tag = tags.intern_func(vec![], types::VOID, false);
        syms.bind_foreign(&pool, f, tag).unwrap();
        assert!(syms.declare_func(&pool, f, Pos::line(1)).is_err());
    }

    #[test]
    fn test_duplicate_import_rejected() {
        let (mut pool, _, mut syms) = setup();
        let m = pool.insert("math");
        syms.define_module(&pool, m, Pos::line(1)).unwrap();
        assert!(syms.define_module(&pool, m, Pos::line(2)).is_err());
    }

    #[test]
    fn test_register_type_idempotent() {
        let (mut pool, mut tags, mut syms) = setup();
        let name = pool.insert("file");
        let tag = tags.intern_name(name);

        let a = syms.register_type(name, tag);
        let b = syms.register_type(name, tag);
        assert_eq!(a, b);
    }

    #[test]
    fn test_function_index_assignment() {
        let (mut pool, _, mut syms) = setup();
        let f = pool.insert("first");
        let g = pool.insert("second");

        syms.declare_func(&pool, f, Pos::line(1)).unwrap();
        syms.declare_func(&pool, g, Pos::line(2)).unwrap();

        assert_eq!(syms.function_index(f), Some(0));
        assert_eq!(syms.function_index(g), Some(1));
    }
}
