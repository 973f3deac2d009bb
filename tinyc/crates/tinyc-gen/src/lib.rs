//! tinyc-gen - Bytecode emission.
//!
//! Lowers a checked AST into the linear byte stream the VM executes. The
//! emitter is a single walk over the module's items:
//!
//! - Top-level statements compile in place; threads run them from offset 0.
//! - Function bodies compile into the same stream behind an unconditional
//!   jump, and the function table records their entry offsets.
//! - Forward calls emit a placeholder destination and are back-patched at
//!   the end of the unit, when every function's offset is known. Jumps
//!   emitted for control flow are back-patched the same way.
//!
//! Multibyte immediates are aligned (padded with `misaligned_instruction`
//! bytes) and little-endian. Specialized encodings are chosen where they
//! apply: zero int/float pushes, one-byte float pool indices, and the
//! increment/decrement ops for `x = x + 1` / `x = x - 1` on ints.

pub mod opcodes;
pub mod program;

pub use opcodes::{Op, IMM_ALIGN};
pub use program::{FuncInfo, Program};

use log::{debug, trace};
use thiserror::Error;
use tinyc_par::{Ast, BinOp, ExprId, ExprKind, FuncDecl, Item, StmtId, StmtKind, UnOp};
use tinyc_sem::{
    types, CheckInfo, ConstValue, SymId, SymKind, Symbols, TypeTag,
};
use tinyc_util::{Pos, StringPool};

/// Errors produced during code generation. These are capacity limits; a
/// checked AST is otherwise always emittable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenError {
    #[error("{pos}: function has too many arguments")]
    TooManyArgs { pos: Pos },

    #[error("{pos}: function has too many local variables")]
    TooManyLocals { pos: Pos },

    #[error("{pos}: call has too many arguments")]
    TooManyCallArgs { pos: Pos },
}

/// Compile one checked module, appending to `program`.
///
/// A trailing `halt` left by a previous unit is removed first so successive
/// units execute in sequence, and a fresh `halt` terminates the stream.
pub fn compile_module(
    module_name: &str,
    ast: &Ast,
    info: &CheckInfo,
    syms: &Symbols,
    pool: &mut StringPool,
    program: &mut Program,
) -> Result<(), GenError> {
    // The previous unit's trailing halt is always the final byte.
    if program.code.last() == Some(&u8::from(Op::Halt)) {
        program.code.pop();
    }

    let mut compiler = Compiler {
        ast,
        info,
        syms,
        program,
        call_patches: Vec::new(),
        loops: Vec::new(),
        cur_line: 0,
    };

    let file = pool.insert(module_name);
    compiler.emit_op(Op::File);
    compiler.emit_u32(file.0);

    for item in &ast.items {
        match item {
            Item::Struct(_) | Item::Import(_) => {}
            Item::Func(decl) => compiler.compile_func(decl)?,
            Item::Stmt(id) => compiler.compile_stmt(*id)?,
        }
    }

    compiler.emit_op(Op::Halt);

    // Every called function has an entry by now; resolve forward calls.
    for (at, index) in std::mem::take(&mut compiler.call_patches) {
        let pc = compiler.program.functions[index as usize].pc;
        compiler.patch_i32(at, pc as i32);
    }

    compiler.program.num_globals = syms.num_globals();

    debug!(
        "compiled module '{}': {} bytes of code, {} floats, {} functions",
        module_name,
        compiler.program.code.len(),
        compiler.program.floats.len(),
        compiler.program.functions.len()
    );

    Ok(())
}

/// Patch targets collected while a loop body compiles.
#[derive(Default)]
struct LoopCtx {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

struct Compiler<'a> {
    ast: &'a Ast,
    info: &'a CheckInfo,
    syms: &'a Symbols,
    program: &'a mut Program,

    /// Call sites waiting for a function entry offset: (patch site,
    /// function index).
    call_patches: Vec<(usize, u32)>,

    /// Enclosing loops, innermost last.
    loops: Vec<LoopCtx>,

    /// Line of the most recent `line` op.
    cur_line: u32,
}

impl<'a> Compiler<'a> {
    // =========================================================================
    // Emission primitives
    // =========================================================================

    fn here(&self) -> usize {
        self.program.code.len()
    }

    fn emit_op(&mut self, op: Op) {
        self.program.code.push(op.into());
    }

    fn emit_u8(&mut self, value: u8) {
        self.program.code.push(value);
    }

    /// Pad to the immediate alignment boundary.
    fn align(&mut self) {
        while self.program.code.len() % IMM_ALIGN != 0 {
            self.emit_op(Op::MisalignedInstruction);
        }
    }

    fn emit_u32(&mut self, value: u32) {
        self.align();
        self.program.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_i32(&mut self, value: i32) {
        self.align();
        self.program.code.extend_from_slice(&value.to_le_bytes());
    }

    /// Reserve an aligned i32 slot for back-patching; returns its offset.
    fn reserve_i32(&mut self) -> usize {
        self.align();
        let at = self.program.code.len();
        self.program.code.extend_from_slice(&[0; 4]);
        at
    }

    fn patch_i32(&mut self, at: usize, value: i32) {
        self.program.code[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    // =========================================================================
    // Items
    // =========================================================================

    fn compile_func(&mut self, decl: &FuncDecl) -> Result<(), GenError> {
        let func = self
            .syms
            .reference_func(decl.name)
            .expect("function declared during checking");

        let (index, nargs, nlocals) = match &self.syms.sym(func).kind {
            SymKind::Func {
                index, args, locals, ..
            } => (*index, args.len(), locals.len()),
            _ => unreachable!("function item bound to non-function symbol"),
        };

        if nargs > u8::MAX as usize {
            return Err(GenError::TooManyArgs { pos: decl.pos });
        }

        if nlocals > u8::MAX as usize {
            return Err(GenError::TooManyLocals { pos: decl.pos });
        }

        // Straight-line execution jumps over the body.
        self.emit_op(Op::Goto);
        let skip = self.reserve_i32();

        let pc = self.here() as u32;
        debug_assert_eq!(index as usize, self.program.functions.len());
        self.program.functions.push(FuncInfo {
            name: decl.name,
            pc,
            nargs: nargs as u8,
        });

        trace!("function {} at offset {}", index, pc);

        if nlocals > 0 {
            self.emit_op(Op::AddSp);
            self.emit_u8(nlocals as u8);
        }

        self.compile_stmt(decl.body)?;

        // Falling off the end returns without a value.
        self.emit_op(Op::Ret);

        let end = self.here() as i32;
        self.patch_i32(skip, end);

        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_stmt(&mut self, id: StmtId) -> Result<(), GenError> {
        let stmt = self.ast.stmt(id);

        if stmt.pos.line != 0 && stmt.pos.line != self.cur_line {
            self.cur_line = stmt.pos.line;
            self.emit_op(Op::Line);
            self.emit_u32(stmt.pos.line);
        }

        match &stmt.kind {
            StmtKind::Block(stmts) => {
                for &s in stmts {
                    self.compile_stmt(s)?;
                }
                Ok(())
            }

            StmtKind::Expr(expr) => {
                // Statement calls leave their result in the retval slot, so
                // there is nothing to pop. The parser admits only calls
                // here.
                match &self.ast.expr(*expr).kind {
                    ExprKind::Call { .. } => self.compile_call(*expr),
                    _ => unreachable!("non-call expression in statement position"),
                }
            }

            StmtKind::Declare { init, .. } => {
                let sym = *self
                    .info
                    .decl_syms
                    .get(&id)
                    .expect("declaration resolved during checking");

                self.compile_expr(*init)?;
                self.emit_var_set(sym);
                Ok(())
            }

            StmtKind::DeclareConst { .. } => Ok(()),

            StmtKind::Assign { target, op, value } => self.compile_assign(*target, *op, *value),

            StmtKind::If { cond, body, alt } => {
                self.compile_expr(*cond)?;

                self.emit_op(Op::GotoFalse);
                let skip_body = self.reserve_i32();

                self.compile_stmt(*body)?;

                match alt {
                    Some(alt) => {
                        self.emit_op(Op::Goto);
                        let skip_alt = self.reserve_i32();

                        let alt_pc = self.here() as i32;
                        self.patch_i32(skip_body, alt_pc);

                        self.compile_stmt(*alt)?;

                        let end = self.here() as i32;
                        self.patch_i32(skip_alt, end);
                    }
                    None => {
                        let end = self.here() as i32;
                        self.patch_i32(skip_body, end);
                    }
                }

                Ok(())
            }

            StmtKind::While { cond, body } => {
                let start = self.here() as i32;

                self.compile_expr(*cond)?;

                self.emit_op(Op::GotoFalse);
                let exit = self.reserve_i32();

                self.loops.push(LoopCtx::default());
                self.compile_stmt(*body)?;
                let ctx = self.loops.pop().expect("loop context pushed above");

                self.emit_op(Op::Goto);
                self.emit_i32(start);

                let end = self.here() as i32;
                self.patch_i32(exit, end);

                for at in ctx.break_patches {
                    self.patch_i32(at, end);
                }
                for at in ctx.continue_patches {
                    self.patch_i32(at, start);
                }

                Ok(())
            }

            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.compile_stmt(*init)?;

                let start = self.here() as i32;

                self.compile_expr(*cond)?;

                self.emit_op(Op::GotoFalse);
                let exit = self.reserve_i32();

                self.loops.push(LoopCtx::default());
                self.compile_stmt(*body)?;
                let ctx = self.loops.pop().expect("loop context pushed above");

                // Continue lands on the step.
                let step_pc = self.here() as i32;
                self.compile_stmt(*step)?;

                self.emit_op(Op::Goto);
                self.emit_i32(start);

                let end = self.here() as i32;
                self.patch_i32(exit, end);

                for at in ctx.break_patches {
                    self.patch_i32(at, end);
                }
                for at in ctx.continue_patches {
                    self.patch_i32(at, step_pc);
                }

                Ok(())
            }

            StmtKind::Return { value } => {
                match value {
                    Some(value) => {
                        self.compile_expr(*value)?;
                        self.emit_op(Op::RetVal);
                    }
                    None => {
                        self.emit_op(Op::Ret);
                    }
                }
                Ok(())
            }

            StmtKind::Break => {
                self.emit_op(Op::Goto);
                let at = self.reserve_i32();
                self.loops
                    .last_mut()
                    .expect("break validated inside a loop")
                    .break_patches
                    .push(at);
                Ok(())
            }

            StmtKind::Continue => {
                self.emit_op(Op::Goto);
                let at = self.reserve_i32();
                self.loops
                    .last_mut()
                    .expect("continue validated inside a loop")
                    .continue_patches
                    .push(at);
                Ok(())
            }
        }
    }

    fn compile_assign(
        &mut self,
        target: ExprId,
        op: Option<BinOp>,
        value: ExprId,
    ) -> Result<(), GenError> {
        match &self.ast.expr(target).kind {
            ExprKind::Id(_) => {
                let sym = *self
                    .info
                    .expr_syms
                    .get(&target)
                    .expect("assignment target resolved during checking");

                if let Some(spec) = self.incdec_op(sym, op, value) {
                    self.emit_var_get(sym);
                    self.emit_op(spec);
                    self.emit_var_set(sym);
                    return Ok(());
                }

                match op {
                    None => {
                        self.compile_expr(value)?;
                        self.emit_var_set(sym);
                    }
                    Some(op) => {
                        let tag = self.expr_tag(target);
                        self.emit_var_get(sym);
                        self.compile_expr(value)?;
                        self.emit_binary(op, tag);
                        self.emit_var_set(sym);
                    }
                }

                Ok(())
            }

            ExprKind::Dot { lhs, .. } => {
                let field = *self
                    .info
                    .dot_fields
                    .get(&target)
                    .expect("field access resolved during checking");

                match op {
                    None => {
                        self.compile_expr(*lhs)?;
                        self.compile_expr(value)?;
                        self.emit_op(Op::StructSet);
                        self.emit_u8(field);
                    }
                    Some(op) => {
                        let tag = self.expr_tag(target);

                        // The base chain is a side-effect-free lvalue, so it
                        // is evaluated once for the store and once for the
                        // load.
                        self.compile_expr(*lhs)?;
                        self.compile_expr(*lhs)?;
                        self.emit_op(Op::StructGet);
                        self.emit_u8(field);

                        self.compile_expr(value)?;
                        self.emit_binary(op, tag);

                        self.emit_op(Op::StructSet);
                        self.emit_u8(field);
                    }
                }

                Ok(())
            }

            _ => unreachable!("assignment target is neither variable nor field"),
        }
    }

    /// The increment/decrement specialization, when the assignment is
    /// `x = x + 1`, `x = x - 1`, `x += 1`, or `x -= 1` on an int variable.
    fn incdec_op(&self, target_sym: SymId, op: Option<BinOp>, value: ExprId) -> Option<Op> {
        match &self.syms.sym(target_sym).kind {
            SymKind::Var { tag, .. } if *tag == types::INT => {}
            _ => return None,
        }

        match op {
            Some(BinOp::Add) => match self.ast.expr(value).kind {
                ExprKind::Int(1) => Some(Op::Add1Int),
                _ => None,
            },
            Some(BinOp::Sub) => match self.ast.expr(value).kind {
                ExprKind::Int(1) => Some(Op::Sub1Int),
                _ => None,
            },
            None => match &self.ast.expr(value).kind {
                ExprKind::Binary { op, lhs, rhs } => {
                    let same_var = self.info.expr_syms.get(lhs) == Some(&target_sym);
                    let one = matches!(self.ast.expr(*rhs).kind, ExprKind::Int(1));

                    match op {
                        BinOp::Add if same_var && one => Some(Op::Add1Int),
                        BinOp::Sub if same_var && one => Some(Op::Sub1Int),
                        _ => None,
                    }
                }
                _ => None,
            },
            _ => None,
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, id: ExprId) -> Result<(), GenError> {
        match &self.ast.expr(id).kind {
            ExprKind::Null => {
                self.emit_op(Op::PushNull);
                Ok(())
            }

            ExprKind::Bool(value) => {
                self.emit_op(if *value { Op::PushTrue } else { Op::PushFalse });
                Ok(())
            }

            ExprKind::Char(value) => {
                self.emit_op(Op::PushChar);
                self.emit_u32(*value as u32);
                Ok(())
            }

            ExprKind::Int(value) => {
                self.emit_int(*value);
                Ok(())
            }

            ExprKind::Float(value) => {
                self.emit_float(*value);
                Ok(())
            }

            ExprKind::Str(value) => {
                self.emit_op(Op::PushString);
                self.emit_u32(value.0);
                Ok(())
            }

            ExprKind::Id(_) => {
                let sym = *self
                    .info
                    .expr_syms
                    .get(&id)
                    .expect("identifier resolved during checking");

                match &self.syms.sym(sym).kind {
                    SymKind::Var { .. } => self.emit_var_get(sym),
                    SymKind::Const { value, .. } => {
                        let value = *value;
                        self.emit_const(value);
                    }
                    _ => unreachable!("identifier bound to non-value symbol"),
                }

                Ok(())
            }

            ExprKind::Call { .. } => {
                self.compile_call(id)?;
                self.emit_op(Op::GetRetval);
                Ok(())
            }

            ExprKind::Paren(inner) => self.compile_expr(*inner),

            ExprKind::Unary { op, operand } => match op {
                UnOp::Neg => {
                    // There is no negate op: fold literals, otherwise
                    // compute 0 - operand.
                    match self.ast.expr(*operand).kind {
                        ExprKind::Int(value) => {
                            self.emit_int(value.wrapping_neg());
                            Ok(())
                        }
                        ExprKind::Float(value) => {
                            self.emit_float(-value);
                            Ok(())
                        }
                        _ => {
                            let tag = self.expr_tag(*operand);
                            if tag == types::INT {
                                self.emit_op(Op::PushInt0);
                                self.compile_expr(*operand)?;
                                self.emit_op(Op::SubInt);
                            } else {
                                self.emit_op(Op::PushFloat0);
                                self.compile_expr(*operand)?;
                                self.emit_op(Op::SubFloat);
                            }
                            Ok(())
                        }
                    }
                }
                UnOp::Not => {
                    self.compile_expr(*operand)?;
                    self.emit_op(Op::LogNot);
                    Ok(())
                }
            },

            ExprKind::Binary { op, lhs, rhs } => {
                let tag = self.expr_tag(*lhs);
                self.compile_expr(*lhs)?;
                self.compile_expr(*rhs)?;
                self.emit_binary(*op, tag);
                Ok(())
            }

            ExprKind::Dot { lhs, .. } => {
                let field = *self
                    .info
                    .dot_fields
                    .get(&id)
                    .expect("field access resolved during checking");

                self.compile_expr(*lhs)?;
                self.emit_op(Op::StructGet);
                self.emit_u8(field);
                Ok(())
            }

            ExprKind::Constructor { args, .. } => {
                for &arg in args {
                    self.compile_expr(arg)?;
                }

                // Field count fits: the parser bounds struct fields at 255.
                self.emit_op(Op::PushStruct);
                self.emit_u8(args.len() as u8);
                Ok(())
            }

            ExprKind::Cast { value, .. } => {
                // Casts reinterpret the static type only; the runtime value
                // representation is unchanged.
                self.compile_expr(*value)
            }
        }
    }

    /// Compile a call, leaving the result in the thread's retval slot.
    fn compile_call(&mut self, id: ExprId) -> Result<(), GenError> {
        let (args, pos) = match &self.ast.expr(id).kind {
            ExprKind::Call { args, .. } => (args.clone(), self.ast.expr(id).pos),
            _ => unreachable!("compile_call on non-call expression"),
        };

        if args.len() > u8::MAX as usize {
            return Err(GenError::TooManyCallArgs { pos });
        }

        for &arg in &args {
            self.compile_expr(arg)?;
        }

        let target = *self
            .info
            .call_targets
            .get(&id)
            .expect("call target resolved during checking");

        match &self.syms.sym(target).kind {
            SymKind::Func { index, .. } => {
                let index = *index;
                self.emit_op(Op::Call);
                self.emit_u8(args.len() as u8);
                let at = self.reserve_i32();
                self.call_patches.push((at, index));
            }
            SymKind::ForeignFunc { index, .. } => {
                let index = *index;
                self.emit_op(Op::CallForeign);
                self.emit_u8(args.len() as u8);
                self.emit_u32(index);
            }
            _ => unreachable!("call target is not a function"),
        }

        Ok(())
    }

    // =========================================================================
    // Value and variable helpers
    // =========================================================================

    fn emit_int(&mut self, value: i32) {
        if value == 0 {
            self.emit_op(Op::PushInt0);
        } else {
            self.emit_op(Op::PushInt);
            self.emit_i32(value);
        }
    }

    fn emit_float(&mut self, value: f32) {
        if value.to_bits() == 0 {
            self.emit_op(Op::PushFloat0);
            return;
        }

        let index = self.program.intern_float(value);

        if index <= u8::MAX as u32 {
            self.emit_op(Op::PushFloatFF);
            self.emit_u8(index as u8);
        } else {
            self.emit_op(Op::PushFloat);
            self.emit_u32(index);
        }
    }

    fn emit_const(&mut self, value: ConstValue) {
        match value {
            ConstValue::Bool(b) => self.emit_op(if b { Op::PushTrue } else { Op::PushFalse }),
            ConstValue::Char(c) => {
                self.emit_op(Op::PushChar);
                self.emit_u32(c as u32);
            }
            ConstValue::Int(i) => self.emit_int(i),
            ConstValue::Float(f) => self.emit_float(f),
            ConstValue::Str(s) => {
                self.emit_op(Op::PushString);
                self.emit_u32(s.0);
            }
        }
    }

    /// The frame-pointer-relative offset of a function-scoped variable:
    /// arguments sit below the frame pointer, locals above.
    fn local_offset(&self, index: u32, is_arg: bool, func: SymId) -> i32 {
        if is_arg {
            let nargs = match &self.syms.sym(func).kind {
                SymKind::Func { args, .. } => args.len() as i32,
                _ => unreachable!("variable owned by non-function symbol"),
            };
            index as i32 - nargs
        } else {
            index as i32
        }
    }

    fn emit_var_get(&mut self, sym: SymId) {
        match &self.syms.sym(sym).kind {
            SymKind::Var {
                index,
                is_arg,
                func: Some(func),
                ..
            } => {
                let offset = self.local_offset(*index, *is_arg, *func);
                self.emit_op(Op::GetLocal);
                self.emit_i32(offset);
            }
            SymKind::Var {
                index, func: None, ..
            } => {
                let index = *index;
                self.emit_op(Op::GetGlobal);
                self.emit_u32(index);
            }
            _ => unreachable!("variable access on non-variable symbol"),
        }
    }

    fn emit_var_set(&mut self, sym: SymId) {
        match &self.syms.sym(sym).kind {
            SymKind::Var {
                index,
                is_arg,
                func: Some(func),
                ..
            } => {
                let offset = self.local_offset(*index, *is_arg, *func);
                self.emit_op(Op::SetLocal);
                self.emit_i32(offset);
            }
            SymKind::Var {
                index, func: None, ..
            } => {
                let index = *index;
                self.emit_op(Op::SetGlobal);
                self.emit_u32(index);
            }
            _ => unreachable!("variable access on non-variable symbol"),
        }
    }

    fn expr_tag(&self, id: ExprId) -> TypeTag {
        *self
            .info
            .expr_tags
            .get(&id)
            .expect("expression tagged during checking")
    }

    /// Emit the typed opcode for a binary operation whose operands have
    /// type `tag`.
    fn emit_binary(&mut self, op: BinOp, tag: TypeTag) {
        let is_float = tag == types::FLOAT;

        let opcode = match op {
            BinOp::Add => {
                if is_float {
                    Op::AddFloat
                } else {
                    Op::AddInt
                }
            }
            BinOp::Sub => {
                if is_float {
                    Op::SubFloat
                } else {
                    Op::SubInt
                }
            }
            BinOp::Mul => {
                if is_float {
                    Op::MulFloat
                } else {
                    Op::MulInt
                }
            }
            BinOp::Div => {
                if is_float {
                    Op::DivFloat
                } else {
                    Op::DivInt
                }
            }
            BinOp::Mod => Op::ModInt,
            BinOp::BitAnd => Op::AndInt,
            BinOp::BitOr => Op::OrInt,

            BinOp::Lt => {
                if is_float {
                    Op::LtFloat
                } else {
                    Op::LtInt
                }
            }
            BinOp::Lte => {
                if is_float {
                    Op::LteFloat
                } else {
                    Op::LteInt
                }
            }
            BinOp::Gt => {
                if is_float {
                    Op::GtFloat
                } else {
                    Op::GtInt
                }
            }
            BinOp::Gte => {
                if is_float {
                    Op::GteFloat
                } else {
                    Op::GteInt
                }
            }

            BinOp::Eq | BinOp::Ne => {
                let eq = if tag == types::BOOL {
                    Op::EquBool
                } else if tag == types::CHAR {
                    Op::EquChar
                } else if tag == types::FLOAT {
                    Op::EquFloat
                } else if tag == types::STR {
                    Op::EquString
                } else {
                    Op::EquInt
                };

                self.emit_op(eq);
                if op == BinOp::Ne {
                    self.emit_op(Op::LogNot);
                }
                return;
            }

            BinOp::LogAnd => Op::LogAnd,
            BinOp::LogOr => Op::LogOr,
        };

        self.emit_op(opcode);
    }
}
