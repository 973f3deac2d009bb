//! Declaration, name resolution, and type checking.
//!
//! A single post-parse pass over a module's AST. It runs in two phases so
//! forward references within a compilation unit work:
//!
//! 1. **Collect**: struct declarations define their type symbols (with
//!    unresolved name tags standing in for forward-referenced field types,
//!    patched once every struct is known), imports define module symbols,
//!    and function signatures are resolved and interned.
//! 2. **Check**: function bodies and top-level statements are walked in
//!    source order. Variables are declared with the scope discipline of the
//!    symbol table, every expression's type tag is computed bottom-up, and
//!    implicit widening into `any` is validated at call sites.
//!
//! The pass does not mutate the AST; everything later stages need (the tag
//!    of each expression, resolved symbols, cached struct field indices) is
//! recorded in [`CheckInfo`] side tables keyed by node id.

use tinyc_par::{
    Ast, BinOp, ExprId, ExprKind, FuncDecl, Item, StmtId, StmtKind, TypeSpec, UnOp,
};
use tinyc_util::{FxHashMap, Pos, Str, StringPool};

use crate::symbols::{ConstValue, SemError, SymId, SymKind, Symbols};
use crate::types::{self, TagKind, TagPool, TypeTag};

/// Results of checking a module, keyed by AST node id.
#[derive(Debug, Default)]
pub struct CheckInfo {
    /// The resolved type of every expression.
    pub expr_tags: FxHashMap<ExprId, TypeTag>,

    /// The symbol behind every `Id` expression.
    pub expr_syms: FxHashMap<ExprId, SymId>,

    /// The callee symbol of every `Call` expression.
    pub call_targets: FxHashMap<ExprId, SymId>,

    /// The field index of every `Dot` expression.
    pub dot_fields: FxHashMap<ExprId, u8>,

    /// The variable symbol declared by every `Declare` statement.
    pub decl_syms: FxHashMap<StmtId, SymId>,
}

/// Check one module. On success the symbol table contains every declaration
/// and the returned [`CheckInfo`] annotates every node code generation will
/// visit.
pub fn check_module(
    ast: &Ast,
    pool: &StringPool,
    tags: &mut TagPool,
    syms: &mut Symbols,
) -> Result<CheckInfo, SemError> {
    let mut checker = Checker {
        ast,
        pool,
        tags,
        syms,
        info: CheckInfo::default(),
        loop_depth: 0,
    };

    checker.collect()?;
    checker.check()?;

    Ok(checker.info)
}

struct Checker<'a> {
    ast: &'a Ast,
    pool: &'a StringPool,
    tags: &'a mut TagPool,
    syms: &'a mut Symbols,
    info: CheckInfo,
    loop_depth: u32,
}

impl<'a> Checker<'a> {
    // =========================================================================
    // Phase 1: collect declarations
    // =========================================================================

    fn collect(&mut self) -> Result<(), SemError> {
        // Struct names first, with self-referential name tags as
        // placeholders, so structs can mention each other in any order.
        for item in &self.ast.items {
            if let Item::Struct(decl) = item {
                let placeholder = self.tags.intern_name(decl.name);
                self.syms
                    .define_type(self.pool, decl.name, decl.pos, placeholder)?;
            }
        }

        // Build each struct tag. Field types naming a struct that has no
        // tag yet resolve to a name tag, patched below.
        for item in &self.ast.items {
            if let Item::Struct(decl) = item {
                let names: Vec<Str> = decl.fields.iter().map(|f| f.name).collect();

                let mut field_tags = Vec::with_capacity(decl.fields.len());
                for field in &decl.fields {
                    let tag = match self.syms.find_type(field.ty.name) {
                        Some(sym) => self.type_sym_tag(sym),
                        None => self.tags.intern_name(field.ty.name),
                    };
                    field_tags.push(tag);
                }

                let struct_tag = self.tags.intern_struct(names, field_tags);

                let sym = self
                    .syms
                    .find_type(decl.name)
                    .expect("struct type defined above");
                match &mut self.syms.sym_mut(sym).kind {
                    SymKind::Type { tag } => *tag = struct_tag,
                    _ => unreachable!("struct name bound to non-type symbol"),
                }
            }
        }

        // Patch name tags left inside struct fields now that every type is
        // known; a name that still resolves nowhere is an error.
        for item in &self.ast.items {
            if let Item::Struct(decl) = item {
                let sym = self
                    .syms
                    .find_type(decl.name)
                    .expect("struct type defined above");
                let struct_tag = self.type_sym_tag(sym);

                for (i, field) in decl.fields.iter().enumerate() {
                    let field_tag = match self.tags.kind(struct_tag) {
                        TagKind::Struct { fields, .. } => fields[i],
                        _ => unreachable!("struct symbol carries non-struct tag"),
                    };

                    if let TagKind::Name(name) = *self.tags.kind(field_tag) {
                        let resolved = match self.syms.find_type(name) {
                            Some(target) => self.type_sym_tag(target),
                            None => {
                                return Err(SemError::new(
                                    format!(
                                        "Could not resolve type name '{}'.",
                                        self.pool.get(name)
                                    ),
                                    field.ty.pos,
                                ));
                            }
                        };

                        self.tags.set_struct_field(struct_tag, i, resolved);
                    }
                }
            }
        }

        for item in &self.ast.items {
            match item {
                Item::Import(decl) => {
                    self.syms.define_module(self.pool, decl.module, decl.pos)?;
                }

                Item::Func(decl) => {
                    let func = self.syms.declare_func(self.pool, decl.name, decl.pos)?;

                    let mut arg_tags = Vec::with_capacity(decl.params.len());
                    for param in &decl.params {
                        arg_tags.push(self.resolve_type(&param.ty)?);
                    }

                    let ret = match &decl.ret {
                        Some(spec) => self.resolve_type(spec)?,
                        None => types::VOID,
                    };

                    let func_tag = self.tags.intern_func(arg_tags, ret, false);

                    match &mut self.syms.sym_mut(func).kind {
                        SymKind::Func { tag, .. } => *tag = Some(func_tag),
                        _ => unreachable!("declared function is not a function symbol"),
                    }
                }

                _ => {}
            }
        }

        Ok(())
    }

    // =========================================================================
    // Phase 2: check bodies and top-level statements
    // =========================================================================

    fn check(&mut self) -> Result<(), SemError> {
        for item in &self.ast.items {
            match item {
                Item::Func(decl) => self.check_func(decl)?,
                Item::Stmt(id) => self.check_stmt(*id)?,
                Item::Struct(_) | Item::Import(_) => {}
            }
        }

        Ok(())
    }

    fn check_func(&mut self, decl: &FuncDecl) -> Result<(), SemError> {
        let func = self
            .syms
            .reference_func(decl.name)
            .expect("function declared during collection");

        self.syms.cur_func = Some(func);
        self.syms.push_scope();

        for param in &decl.params {
            let tag = self.resolve_type(&param.ty)?;
            self.syms
                .declare_var(self.pool, param.name, param.pos, true, tag)?;
        }

        self.check_stmt(decl.body)?;

        self.syms.pop_scope();
        self.syms.cur_func = None;

        Ok(())
    }

    fn check_stmt(&mut self, id: StmtId) -> Result<(), SemError> {
        let stmt = self.ast.stmt(id);
        let pos = stmt.pos;

        match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.syms.push_scope();
                for &s in stmts {
                    self.check_stmt(s)?;
                }
                self.syms.pop_scope();
                Ok(())
            }

            StmtKind::Expr(expr) => {
                self.check_expr(*expr)?;
                Ok(())
            }

            StmtKind::Declare { name, ty, init } => {
                let init_tag = self.check_expr(*init)?;

                if init_tag == types::VOID {
                    return Err(SemError::new(
                        format!(
                            "Attempted to initialize variable '{}' with a void value.",
                            self.pool.get(*name)
                        ),
                        pos,
                    ));
                }

                let declared = match ty {
                    Some(spec) => self.resolve_type(spec)?,
                    None => init_tag,
                };

                if !self.tags.assignable(init_tag, declared) {
                    return Err(SemError::new(
                        format!(
                            "Attempted to initialize variable '{}' of type '{}' with a value of \
                             type '{}'.",
                            self.pool.get(*name),
                            self.tag_desc(declared),
                            self.tag_desc(init_tag)
                        ),
                        pos,
                    ));
                }

                let sym = self.syms.declare_var(self.pool, *name, pos, false, declared)?;
                self.info.decl_syms.insert(id, sym);
                Ok(())
            }

            StmtKind::DeclareConst { name, value } => {
                let value_expr = self.ast.expr(*value);

                let (tag, value) = match value_expr.kind {
                    ExprKind::Bool(b) => (types::BOOL, ConstValue::Bool(b)),
                    ExprKind::Char(c) => (types::CHAR, ConstValue::Char(c)),
                    ExprKind::Int(i) => (types::INT, ConstValue::Int(i)),
                    ExprKind::Float(f) => (types::FLOAT, ConstValue::Float(f)),
                    ExprKind::Str(s) => (types::STR, ConstValue::Str(s)),
                    _ => {
                        return Err(SemError::new(
                            format!(
                                "Expected bool, char, int, float, or string literal as right hand \
                                 side for constant '{}'.",
                                self.pool.get(*name)
                            ),
                            pos,
                        ));
                    }
                };

                self.syms.declare_const(self.pool, *name, pos, tag, value)?;
                Ok(())
            }

            StmtKind::Assign { target, op, value } => {
                let target_tag = self.check_assign_target(*target)?;
                let value_tag = self.check_expr(*value)?;

                let effective = match op {
                    Some(op) => self.binary_result(*op, target_tag, value_tag, pos)?,
                    None => value_tag,
                };

                if !self.tags.assignable(effective, target_tag) {
                    return Err(SemError::new(
                        format!(
                            "Attempted to assign a value of type '{}' to a target of type '{}'.",
                            self.tag_desc(effective),
                            self.tag_desc(target_tag)
                        ),
                        pos,
                    ));
                }

                Ok(())
            }

            StmtKind::If { cond, body, alt } => {
                let cond_tag = self.check_expr(*cond)?;
                if cond_tag != types::BOOL {
                    return Err(SemError::new("If condition must be a bool.", pos));
                }

                self.syms.push_scope();
                self.check_stmt(*body)?;
                self.syms.pop_scope();

                if let Some(alt) = alt {
                    self.syms.push_scope();
                    self.check_stmt(*alt)?;
                    self.syms.pop_scope();
                }

                Ok(())
            }

            StmtKind::While { cond, body } => {
                let cond_tag = self.check_expr(*cond)?;
                if cond_tag != types::BOOL {
                    return Err(SemError::new("While condition must be a bool.", pos));
                }

                self.syms.push_scope();
                self.loop_depth += 1;
                self.check_stmt(*body)?;
                self.loop_depth -= 1;
                self.syms.pop_scope();

                Ok(())
            }

            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.syms.push_scope();

                self.check_stmt(*init)?;

                let cond_tag = self.check_expr(*cond)?;
                if cond_tag != types::BOOL {
                    self.syms.pop_scope();
                    return Err(SemError::new("For condition must be a bool.", pos));
                }

                self.check_stmt(*step)?;

                self.loop_depth += 1;
                let body_result = self.check_stmt(*body);
                self.loop_depth -= 1;

                self.syms.pop_scope();
                body_result
            }

            StmtKind::Return { value } => {
                let func = match self.syms.cur_func {
                    Some(func) => func,
                    None => {
                        return Err(SemError::new(
                            "Attempted to return from outside a function.",
                            pos,
                        ));
                    }
                };

                let ret = self.func_ret_tag(func);

                match value {
                    Some(value) => {
                        if ret == types::VOID {
                            return Err(SemError::new(
                                "Attempted to return a value from a function which returns \
                                 nothing (void).",
                                pos,
                            ));
                        }

                        let value_tag = self.check_expr(*value)?;
                        if !self.tags.assignable(value_tag, ret) {
                            return Err(SemError::new(
                                format!(
                                    "Attempted to return a value of type '{}' from a function \
                                     which returns '{}'.",
                                    self.tag_desc(value_tag),
                                    self.tag_desc(ret)
                                ),
                                pos,
                            ));
                        }

                        Ok(())
                    }
                    None => Ok(()),
                }
            }

            StmtKind::Break => {
                if self.loop_depth == 0 {
                    return Err(SemError::new("Attempted to break outside of a loop.", pos));
                }
                Ok(())
            }

            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(SemError::new(
                        "Attempted to continue outside of a loop.",
                        pos,
                    ));
                }
                Ok(())
            }
        }
    }

    /// Check an assignment target: a variable reference or a dotted field
    /// chain.
    fn check_assign_target(&mut self, id: ExprId) -> Result<TypeTag, SemError> {
        let expr = self.ast.expr(id);

        match &expr.kind {
            ExprKind::Id(name) => {
                let sym = match self.syms.reference_var(*name) {
                    Some(sym) => sym,
                    None => {
                        return Err(SemError::new(
                            format!(
                                "Referenced undeclared identifier '{}'.",
                                self.pool.get(*name)
                            ),
                            expr.pos,
                        ));
                    }
                };

                let tag = match &self.syms.sym(sym).kind {
                    SymKind::Var { tag, .. } => *tag,
                    SymKind::Const { .. } => {
                        return Err(SemError::new(
                            format!("Cannot assign to constant '{}'.", self.pool.get(*name)),
                            expr.pos,
                        ));
                    }
                    _ => {
                        return Err(SemError::new(
                            format!("Cannot assign to '{}'.", self.pool.get(*name)),
                            expr.pos,
                        ));
                    }
                };

                self.info.expr_syms.insert(id, sym);
                self.info.expr_tags.insert(id, tag);
                Ok(tag)
            }

            ExprKind::Dot { .. } => self.check_expr(id),

            _ => Err(SemError::new(
                "Left hand side of assignment is not assignable.",
                expr.pos,
            )),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn check_expr(&mut self, id: ExprId) -> Result<TypeTag, SemError> {
        let expr = self.ast.expr(id);
        let pos = expr.pos;

        let tag = match &expr.kind {
            ExprKind::Null => types::ANY,
            ExprKind::Bool(_) => types::BOOL,
            ExprKind::Char(_) => types::CHAR,
            ExprKind::Int(_) => types::INT,
            ExprKind::Float(_) => types::FLOAT,
            ExprKind::Str(_) => types::STR,

            ExprKind::Id(name) => {
                let sym = match self.syms.reference_var(*name) {
                    Some(sym) => sym,
                    None => {
                        return Err(SemError::new(
                            format!(
                                "Referenced undeclared identifier '{}'.",
                                self.pool.get(*name)
                            ),
                            pos,
                        ));
                    }
                };

                let tag = match &self.syms.sym(sym).kind {
                    SymKind::Var { tag, .. } => *tag,
                    SymKind::Const { tag, .. } => *tag,
                    SymKind::Module => {
                        return Err(SemError::new(
                            format!("Cannot use module '{}' as a value.", self.pool.get(*name)),
                            pos,
                        ));
                    }
                    _ => {
                        return Err(SemError::new(
                            format!("Cannot use '{}' as a value.", self.pool.get(*name)),
                            pos,
                        ));
                    }
                };

                self.info.expr_syms.insert(id, sym);
                tag
            }

            ExprKind::Call { callee, args } => self.check_call(id, *callee, args, pos)?,

            ExprKind::Paren(inner) => self.check_expr(*inner)?,

            ExprKind::Unary { op, operand } => {
                let operand_tag = self.check_expr(*operand)?;

                match op {
                    UnOp::Neg => {
                        if operand_tag != types::INT && operand_tag != types::FLOAT {
                            return Err(SemError::new(
                                "Unary '-' requires an int or float operand.",
                                pos,
                            ));
                        }
                        operand_tag
                    }
                    UnOp::Not => {
                        if operand_tag != types::BOOL {
                            return Err(SemError::new("Unary '!' requires a bool operand.", pos));
                        }
                        types::BOOL
                    }
                }
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let lhs_tag = self.check_expr(*lhs)?;
                let rhs_tag = self.check_expr(*rhs)?;
                self.binary_result(*op, lhs_tag, rhs_tag, pos)?
            }

            ExprKind::Dot { lhs, field } => {
                let lhs_tag = self.check_expr(*lhs)?;

                let (names_desc, index) = match self.tags.kind(lhs_tag) {
                    TagKind::Struct { names, .. } => {
                        let index = names.iter().position(|&n| n == *field);
                        (self.tag_desc(lhs_tag), index)
                    }
                    _ => {
                        return Err(SemError::new(
                            format!("Value of type '{}' has no fields.", self.tag_desc(lhs_tag)),
                            pos,
                        ));
                    }
                };

                let index = match index {
                    Some(index) => index,
                    None => {
                        return Err(SemError::new(
                            format!(
                                "Struct '{}' has no field named '{}'.",
                                names_desc,
                                self.pool.get(*field)
                            ),
                            pos,
                        ));
                    }
                };

                self.info.dot_fields.insert(id, index as u8);

                match self.tags.kind(lhs_tag) {
                    TagKind::Struct { fields, .. } => fields[index],
                    _ => unreachable!("struct tag changed during checking"),
                }
            }

            ExprKind::Constructor { ty, args } => {
                let struct_tag = self.resolve_type(ty)?;

                let (names, fields) = match self.tags.kind(struct_tag) {
                    TagKind::Struct { names, fields } => (names.clone(), fields.clone()),
                    _ => {
                        return Err(SemError::new(
                            format!("'{}' is not a struct type.", self.pool.get(ty.name)),
                            pos,
                        ));
                    }
                };

                if args.len() != fields.len() {
                    return Err(SemError::new(
                        format!(
                            "Struct '{}' expects {} field(s) but got {}.",
                            self.pool.get(ty.name),
                            fields.len(),
                            args.len()
                        ),
                        pos,
                    ));
                }

                for (i, &arg) in args.iter().enumerate() {
                    let arg_tag = self.check_expr(arg)?;
                    if !self.tags.assignable(arg_tag, fields[i]) {
                        return Err(SemError::new(
                            format!(
                                "Field '{}' of struct '{}' has type '{}' but the initializer has \
                                 type '{}'.",
                                self.pool.get(names[i]),
                                self.pool.get(ty.name),
                                self.tag_desc(fields[i]),
                                self.tag_desc(arg_tag)
                            ),
                            self.ast.expr(arg).pos,
                        ));
                    }
                }

                struct_tag
            }

            ExprKind::Cast { value, ty } => {
                let value_tag = self.check_expr(*value)?;
                let target = self.resolve_type(ty)?;

                if !self.tags.is_primitive(value_tag) {
                    return Err(SemError::new(
                        format!(
                            "Cannot cast a non-primitive value of type '{}'.",
                            self.tag_desc(value_tag)
                        ),
                        pos,
                    ));
                }

                if target != types::ANY && target != value_tag {
                    return Err(SemError::new(
                        format!(
                            "Cannot cast a value of type '{}' to '{}'.",
                            self.tag_desc(value_tag),
                            self.tag_desc(target)
                        ),
                        pos,
                    ));
                }

                target
            }
        };

        self.info.expr_tags.insert(id, tag);
        Ok(tag)
    }

    fn check_call(
        &mut self,
        id: ExprId,
        callee: Str,
        args: &[ExprId],
        pos: Pos,
    ) -> Result<TypeTag, SemError> {
        let target = match self.syms.reference_func(callee) {
            Some(target) => target,
            None => {
                return Err(SemError::new(
                    format!(
                        "Attempted to call undeclared function '{}'.",
                        self.pool.get(callee)
                    ),
                    pos,
                ));
            }
        };

        let func_tag = match &self.syms.sym(target).kind {
            SymKind::Func { tag, .. } => {
                (*tag).expect("function signature resolved in collection")
            }
            SymKind::ForeignFunc { tag, .. } => *tag,
            _ => unreachable!("function namespace holds non-function symbol"),
        };

        let (params, ret, varargs) = match self.tags.kind(func_tag) {
            TagKind::Func { args, ret, varargs } => (args.clone(), *ret, *varargs),
            _ => unreachable!("function symbol carries non-function tag"),
        };

        let arity_ok = if varargs {
            args.len() >= params.len()
        } else {
            args.len() == params.len()
        };

        if !arity_ok {
            return Err(SemError::new(
                format!(
                    "Function '{}' expects {}{} argument(s) but got {}.",
                    self.pool.get(callee),
                    if varargs { "at least " } else { "" },
                    params.len(),
                    args.len()
                ),
                pos,
            ));
        }

        for (i, &arg) in args.iter().enumerate() {
            let arg_tag = self.check_expr(arg)?;
            let arg_pos = self.ast.expr(arg).pos;

            if let Some(&param) = params.get(i) {
                if !self.tags.assignable(arg_tag, param) {
                    return Err(SemError::new(
                        format!(
                            "Argument {} of call to '{}' has type '{}' but '{}' was expected.",
                            i + 1,
                            self.pool.get(callee),
                            self.tag_desc(arg_tag),
                            self.tag_desc(param)
                        ),
                        arg_pos,
                    ));
                }
            } else if arg_tag == types::VOID {
                // A vararg tail value widens implicitly to any, which a void
                // value cannot.
                return Err(SemError::new(
                    format!(
                        "Cannot pass a void value to function '{}'.",
                        self.pool.get(callee)
                    ),
                    arg_pos,
                ));
            }
        }

        self.info.call_targets.insert(id, target);
        Ok(ret)
    }

    fn binary_result(
        &self,
        op: BinOp,
        lhs: TypeTag,
        rhs: TypeTag,
        pos: Pos,
    ) -> Result<TypeTag, SemError> {
        use types::{BOOL, CHAR, FLOAT, INT, STR};

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                if lhs == INT && rhs == INT {
                    Ok(INT)
                } else if lhs == FLOAT && rhs == FLOAT {
                    Ok(FLOAT)
                } else {
                    Err(SemError::new(
                        format!(
                            "Binary '{}' requires matching int or float operands, got '{}' and \
                             '{}'.",
                            op_str(op),
                            self.tag_desc(lhs),
                            self.tag_desc(rhs)
                        ),
                        pos,
                    ))
                }
            }

            BinOp::Mod | BinOp::BitAnd | BinOp::BitOr => {
                if lhs == INT && rhs == INT {
                    Ok(INT)
                } else {
                    Err(SemError::new(
                        format!(
                            "Binary '{}' requires int operands, got '{}' and '{}'.",
                            op_str(op),
                            self.tag_desc(lhs),
                            self.tag_desc(rhs)
                        ),
                        pos,
                    ))
                }
            }

            BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte => {
                if (lhs == INT && rhs == INT) || (lhs == FLOAT && rhs == FLOAT) {
                    Ok(BOOL)
                } else {
                    Err(SemError::new(
                        format!(
                            "Binary '{}' requires matching int or float operands, got '{}' and \
                             '{}'.",
                            op_str(op),
                            self.tag_desc(lhs),
                            self.tag_desc(rhs)
                        ),
                        pos,
                    ))
                }
            }

            BinOp::Eq | BinOp::Ne => {
                let comparable = lhs == rhs
                    && matches!(lhs, t if t == BOOL || t == CHAR || t == INT || t == FLOAT || t == STR);

                if comparable {
                    Ok(BOOL)
                } else {
                    Err(SemError::new(
                        format!(
                            "Cannot compare values of type '{}' and '{}'.",
                            self.tag_desc(lhs),
                            self.tag_desc(rhs)
                        ),
                        pos,
                    ))
                }
            }

            BinOp::LogAnd | BinOp::LogOr => {
                if lhs == BOOL && rhs == BOOL {
                    Ok(BOOL)
                } else {
                    Err(SemError::new(
                        format!("Binary '{}' requires bool operands.", op_str(op)),
                        pos,
                    ))
                }
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn resolve_type(&mut self, spec: &TypeSpec) -> Result<TypeTag, SemError> {
        match self.syms.find_type(spec.name) {
            Some(sym) => Ok(self.type_sym_tag(sym)),
            None => Err(SemError::new(
                format!(
                    "Could not resolve type name '{}'.",
                    self.pool.get(spec.name)
                ),
                spec.pos,
            )),
        }
    }

    fn type_sym_tag(&self, sym: SymId) -> TypeTag {
        match &self.syms.sym(sym).kind {
            SymKind::Type { tag } => *tag,
            _ => unreachable!("type namespace holds non-type symbol"),
        }
    }

    fn func_ret_tag(&self, func: SymId) -> TypeTag {
        let tag = match &self.syms.sym(func).kind {
            SymKind::Func { tag, .. } => {
                (*tag).expect("function signature resolved in collection")
            }
            SymKind::ForeignFunc { tag, .. } => *tag,
            _ => unreachable!("expected function symbol"),
        };

        match self.tags.kind(tag) {
            TagKind::Func { ret, .. } => *ret,
            _ => unreachable!("function symbol carries non-function tag"),
        }
    }

    /// Human-readable type description for diagnostics: the declared name
    /// where one exists, else a structural description.
    fn tag_desc(&self, tag: TypeTag) -> String {
        match self.syms.type_name(tag) {
            Some(name) => self.pool.get(name).to_string(),
            None => self.tags.describe(tag).to_string(),
        }
    }
}

fn op_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::Lt => "<",
        BinOp::Lte => "<=",
        BinOp::Gt => ">",
        BinOp::Gte => ">=",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::LogAnd => "&&",
        BinOp::LogOr => "||",
    }
}
