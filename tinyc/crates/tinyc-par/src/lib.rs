//! tinyc-par - Parser for Tiny source code.
//!
//! A recursive-descent parser with precedence climbing for binary
//! expressions. Statement dispatch:
//!
//! - `{`            → block
//! - `func`         → function definition (top level only)
//! - `struct`       → struct declaration (top level only)
//! - `import`       → module import (top level only)
//! - `if` / `while` / `for` / `return` / `break` / `continue` → structured
//! - identifier     → call statement, assignment, or declaration
//!   (`:=` inferred, `: T =` explicit, `::` compile-time constant)
//!
//! The binary operator precedence table:
//!
//! | Prec | Operators            |
//! |------|----------------------|
//! | 5    | `* / % & \|`         |
//! | 4    | `+ -`                |
//! | 3    | `< <= > >= == !=`    |
//! | 2    | `&& \|\|`            |
//!
//! The parser builds a pure AST and interns every identifier and string
//! literal into the state's string pool; symbol declaration and type
//! checking happen in a separate pass so forward references within a module
//! work. Errors propagate as `Result` up to [`parse_module`], which is the
//! single error boundary; a failed parse leaves only pool entries behind,
//! and the whole compilation unit is expected to be discarded.

pub mod ast;

pub use ast::*;

use thiserror::Error;
use tinyc_lex::{LexError, Lexer, TokenKind};
use tinyc_util::{Pos, Str, StringPool};

/// Errors produced while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The lexer rejected the input.
    #[error(transparent)]
    Lex(#[from] LexError),

    /// The token stream did not match the grammar.
    #[error("{pos}: {message}")]
    Unexpected { message: String, pos: Pos },
}

impl ParseError {
    fn new(message: impl Into<String>, pos: Pos) -> Self {
        ParseError::Unexpected {
            message: message.into(),
            pos,
        }
    }
}

/// Parse one module's source text into an [`Ast`].
///
/// Identifiers and string literals are interned into `pool` as they are
/// seen.
pub fn parse_module(src: &str, pool: &mut StringPool) -> Result<Ast, ParseError> {
    let mut parser = Parser::new(src, pool)?;
    parser.parse()?;
    Ok(parser.ast)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    pool: &'a mut StringPool,
    cur: TokenKind,
    ast: Ast,
}

/// Precedence of a binary operator token; -1 for non-operators.
fn token_prec(tok: TokenKind) -> i32 {
    match tok {
        TokenKind::Star
        | TokenKind::Slash
        | TokenKind::Percent
        | TokenKind::And
        | TokenKind::Or => 5,

        TokenKind::Plus | TokenKind::Minus => 4,

        TokenKind::Lt
        | TokenKind::Gt
        | TokenKind::Lte
        | TokenKind::Gte
        | TokenKind::Equals
        | TokenKind::NotEquals => 3,

        TokenKind::LogAnd | TokenKind::LogOr => 2,

        _ => -1,
    }
}

/// The operator a binary token denotes. Only called for tokens
/// `token_prec` accepts.
fn token_binop(tok: TokenKind) -> BinOp {
    match tok {
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Percent => BinOp::Mod,
        TokenKind::And => BinOp::BitAnd,
        TokenKind::Or => BinOp::BitOr,
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::Lte => BinOp::Lte,
        TokenKind::Gte => BinOp::Gte,
        TokenKind::Equals => BinOp::Eq,
        TokenKind::NotEquals => BinOp::Ne,
        TokenKind::LogAnd => BinOp::LogAnd,
        TokenKind::LogOr => BinOp::LogOr,
        _ => unreachable!("not a binary operator token"),
    }
}

/// The operator of a compound assignment token, if it is one.
fn compound_assign_op(tok: TokenKind) -> Option<BinOp> {
    Some(match tok {
        TokenKind::PlusEqual => BinOp::Add,
        TokenKind::MinusEqual => BinOp::Sub,
        TokenKind::StarEqual => BinOp::Mul,
        TokenKind::SlashEqual => BinOp::Div,
        TokenKind::PercentEqual => BinOp::Mod,
        TokenKind::OrEqual => BinOp::BitOr,
        TokenKind::AndEqual => BinOp::BitAnd,
        _ => return None,
    })
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, pool: &'a mut StringPool) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(src);
        let cur = lexer.next_token()?;

        Ok(Self {
            lexer,
            pool,
            cur,
            ast: Ast::new(),
        })
    }

    fn parse(&mut self) -> Result<(), ParseError> {
        while self.cur != TokenKind::Eof {
            let item = match self.cur {
                TokenKind::Struct => Item::Struct(self.parse_struct()?),
                TokenKind::Import => Item::Import(self.parse_import()?),
                TokenKind::Func => Item::Func(self.parse_func()?),
                _ => Item::Stmt(self.parse_statement()?),
            };

            self.ast.items.push(item);
        }

        Ok(())
    }

    // =========================================================================
    // Token plumbing
    // =========================================================================

    fn pos(&self) -> Pos {
        self.lexer.pos()
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.cur = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&self, kind: TokenKind, message: &str) -> Result<(), ParseError> {
        if self.cur != kind {
            return Err(ParseError::new(message, self.pos()));
        }
        Ok(())
    }

    fn eat(&mut self, kind: TokenKind, message: &str) -> Result<(), ParseError> {
        self.expect(kind, message)?;
        self.advance()
    }

    /// Intern the current lexeme.
    fn intern_lexeme(&mut self) -> Str {
        self.pool.insert(self.lexer.lexeme())
    }

    fn add_expr(&mut self, kind: ExprKind, pos: Pos) -> ExprId {
        self.ast.exprs.push(Expr { kind, pos })
    }

    fn add_stmt(&mut self, kind: StmtKind, pos: Pos) -> StmtId {
        self.ast.stmts.push(Stmt { kind, pos })
    }

    // =========================================================================
    // Items
    // =========================================================================

    fn parse_type(&mut self) -> Result<TypeSpec, ParseError> {
        self.expect(TokenKind::Ident, "Expected identifier for typename.")?;

        let spec = TypeSpec {
            name: self.intern_lexeme(),
            pos: self.pos(),
        };

        self.advance()?;
        Ok(spec)
    }

    fn parse_struct(&mut self) -> Result<StructDecl, ParseError> {
        let pos = self.pos();
        self.advance()?;

        self.expect(TokenKind::Ident, "Expected identifier after 'struct'.")?;
        let name = self.intern_lexeme();
        self.advance()?;

        self.eat(TokenKind::OpenCurly, "Expected '{' after struct name.")?;

        let mut fields: Vec<FieldDecl> = Vec::new();

        while self.cur != TokenKind::CloseCurly {
            self.expect(TokenKind::Ident, "Expected identifier in struct fields.")?;

            if fields.len() >= u8::MAX as usize {
                return Err(ParseError::new("Too many fields in struct.", self.pos()));
            }

            let field_name = self.intern_lexeme();
            let field_pos = self.pos();

            if fields.iter().any(|f| f.name == field_name) {
                return Err(ParseError::new(
                    format!(
                        "Declared multiple fields with the same name '{}'.",
                        self.pool.get(field_name)
                    ),
                    field_pos,
                ));
            }

            self.advance()?;
            self.eat(TokenKind::Colon, "Expected ':' after field name.")?;

            let ty = self.parse_type()?;
            fields.push(FieldDecl {
                name: field_name,
                ty,
            });
        }

        self.advance()?;

        Ok(StructDecl { name, fields, pos })
    }

    fn parse_import(&mut self) -> Result<ImportDecl, ParseError> {
        let pos = self.pos();
        self.advance()?;

        self.expect(TokenKind::Ident, "Expected identifier after 'import'.")?;
        let module = self.intern_lexeme();
        self.advance()?;

        Ok(ImportDecl { module, pos })
    }

    fn parse_func(&mut self) -> Result<FuncDecl, ParseError> {
        let pos = self.pos();
        self.advance()?;

        self.expect(TokenKind::Ident, "Function name must be an identifier.")?;
        let name = self.intern_lexeme();
        self.advance()?;

        self.eat(TokenKind::OpenParen, "Expected '(' after function name.")?;

        let mut params = Vec::new();

        while self.cur != TokenKind::CloseParen {
            self.expect(
                TokenKind::Ident,
                "Expected identifier in function parameter list.",
            )?;

            let param_name = self.intern_lexeme();
            let param_pos = self.pos();
            self.advance()?;

            self.eat(TokenKind::Colon, "Expected ':' after parameter name.")?;

            let ty = self.parse_type()?;

            params.push(Param {
                name: param_name,
                ty,
                pos: param_pos,
            });

            if self.cur != TokenKind::CloseParen && self.cur != TokenKind::Comma {
                return Err(ParseError::new(
                    "Expected ')' or ',' after parameter type in function parameter list.",
                    self.pos(),
                ));
            }

            if self.cur == TokenKind::Comma {
                self.advance()?;
            }
        }

        self.advance()?;

        let ret = if self.cur == TokenKind::Colon {
            self.advance()?;
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_statement()?;

        Ok(FuncDecl {
            name,
            params,
            ret,
            body,
            pos,
        })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Result<StmtId, ParseError> {
        match self.cur {
            TokenKind::OpenCurly => self.parse_block(),
            TokenKind::Ident => self.parse_ident_statement(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),

            TokenKind::Break => {
                let pos = self.pos();
                self.advance()?;
                Ok(self.add_stmt(StmtKind::Break, pos))
            }

            TokenKind::Continue => {
                let pos = self.pos();
                self.advance()?;
                Ok(self.add_stmt(StmtKind::Continue, pos))
            }

            TokenKind::Func => Err(ParseError::new(
                "Attempted to define a function inside of a function.",
                self.pos(),
            )),

            TokenKind::Struct => Err(ParseError::new(
                "Struct declarations are only allowed at the top level.",
                self.pos(),
            )),

            TokenKind::Import => Err(ParseError::new(
                "Imports are only allowed at the top level.",
                self.pos(),
            )),

            _ => Err(ParseError::new(
                format!("Unexpected token {}.", self.cur),
                self.pos(),
            )),
        }
    }

    fn parse_block(&mut self) -> Result<StmtId, ParseError> {
        let pos = self.pos();
        self.advance()?;

        let mut stmts = Vec::new();

        while self.cur != TokenKind::CloseCurly {
            if self.cur == TokenKind::Eof {
                return Err(ParseError::new("Expected '}' to close block.", self.pos()));
            }

            stmts.push(self.parse_statement()?);
        }

        self.advance()?;

        Ok(self.add_stmt(StmtKind::Block(stmts), pos))
    }

    /// Call statement, assignment, or declaration. All begin with an
    /// identifier.
    fn parse_ident_statement(&mut self) -> Result<StmtId, ParseError> {
        let name = self.intern_lexeme();
        let pos = self.pos();
        self.advance()?;

        if self.cur == TokenKind::OpenParen {
            let call = self.parse_call(name, pos)?;
            return Ok(self.add_stmt(StmtKind::Expr(call), pos));
        }

        // An lvalue: a plain identifier or a dotted reference chain.
        let mut target = self.add_expr(ExprKind::Id(name), pos);
        let has_dots = self.cur == TokenKind::Dot;
        target = self.parse_dot_chain(target)?;

        match self.cur {
            TokenKind::Declare => {
                if has_dots {
                    return Err(ParseError::new(
                        "Left hand side of a declaration must be an identifier.",
                        pos,
                    ));
                }

                self.advance()?;
                let init = self.parse_expr()?;
                Ok(self.add_stmt(
                    StmtKind::Declare {
                        name,
                        ty: None,
                        init,
                    },
                    pos,
                ))
            }

            TokenKind::Colon => {
                if has_dots {
                    return Err(ParseError::new(
                        "Left hand side of a declaration must be an identifier.",
                        pos,
                    ));
                }

                self.advance()?;
                let ty = self.parse_type()?;

                self.eat(TokenKind::Equal, "Expected '=' after typename.")?;
                let init = self.parse_expr()?;

                Ok(self.add_stmt(
                    StmtKind::Declare {
                        name,
                        ty: Some(ty),
                        init,
                    },
                    pos,
                ))
            }

            TokenKind::DeclareConst => {
                if has_dots {
                    return Err(ParseError::new(
                        "Left hand side of a declaration must be an identifier.",
                        pos,
                    ));
                }

                self.advance()?;
                let value = self.parse_expr()?;
                Ok(self.add_stmt(StmtKind::DeclareConst { name, value }, pos))
            }

            TokenKind::Equal => {
                self.advance()?;
                let value = self.parse_expr()?;
                Ok(self.add_stmt(
                    StmtKind::Assign {
                        target,
                        op: None,
                        value,
                    },
                    pos,
                ))
            }

            tok => {
                if let Some(op) = compound_assign_op(tok) {
                    self.advance()?;
                    let value = self.parse_expr()?;
                    return Ok(self.add_stmt(
                        StmtKind::Assign {
                            target,
                            op: Some(op),
                            value,
                        },
                        pos,
                    ));
                }

                Err(ParseError::new("Expected assignment statement.", self.pos()))
            }
        }
    }

    fn parse_if(&mut self) -> Result<StmtId, ParseError> {
        let pos = self.pos();
        self.advance()?;

        let cond = self.parse_expr()?;
        let body = self.parse_statement()?;

        let alt = if self.cur == TokenKind::Else {
            self.advance()?;
            Some(self.parse_statement()?)
        } else {
            None
        };

        Ok(self.add_stmt(StmtKind::If { cond, body, alt }, pos))
    }

    fn parse_while(&mut self) -> Result<StmtId, ParseError> {
        let pos = self.pos();
        self.advance()?;

        let cond = self.parse_expr()?;
        let body = self.parse_statement()?;

        Ok(self.add_stmt(StmtKind::While { cond, body }, pos))
    }

    fn parse_for(&mut self) -> Result<StmtId, ParseError> {
        let pos = self.pos();
        self.advance()?;

        let init = self.parse_statement()?;
        self.eat(TokenKind::Semi, "Expected ';' after for initializer.")?;

        let cond = self.parse_expr()?;
        self.eat(TokenKind::Semi, "Expected ';' after for condition.")?;

        let step = self.parse_statement()?;
        let body = self.parse_statement()?;

        Ok(self.add_stmt(
            StmtKind::For {
                init,
                cond,
                step,
                body,
            },
            pos,
        ))
    }

    fn parse_return(&mut self) -> Result<StmtId, ParseError> {
        let pos = self.pos();
        self.advance()?;

        // `return ;` returns no value.
        if self.cur == TokenKind::Semi {
            self.advance()?;
            return Ok(self.add_stmt(StmtKind::Return { value: None }, pos));
        }

        let value = self.parse_expr()?;
        Ok(self.add_stmt(
            StmtKind::Return {
                value: Some(value),
            },
            pos,
        ))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn parse_expr(&mut self) -> Result<ExprId, ParseError> {
        let factor = self.parse_factor()?;
        self.parse_bin_rhs(factor, 0)
    }

    fn parse_bin_rhs(&mut self, mut lhs: ExprId, min_prec: i32) -> Result<ExprId, ParseError> {
        loop {
            let prec = token_prec(self.cur);

            if prec < min_prec {
                return Ok(lhs);
            }

            let op = token_binop(self.cur);
            let pos = self.pos();
            self.advance()?;

            let mut rhs = self.parse_factor()?;

            // If the next operator binds tighter, it takes the rhs first.
            let next_prec = token_prec(self.cur);
            if prec < next_prec {
                rhs = self.parse_bin_rhs(rhs, prec + 1)?;
            }

            lhs = self.add_expr(ExprKind::Binary { op, lhs, rhs }, pos);
        }
    }

    fn parse_factor(&mut self) -> Result<ExprId, ParseError> {
        let pos = self.pos();

        match self.cur {
            TokenKind::Null => {
                self.advance()?;
                Ok(self.add_expr(ExprKind::Null, pos))
            }

            TokenKind::Bool => {
                let value = self.lexer.bool_value();
                self.advance()?;
                Ok(self.add_expr(ExprKind::Bool(value), pos))
            }

            TokenKind::Char => {
                let value = self.lexer.char_value();
                self.advance()?;
                Ok(self.add_expr(ExprKind::Char(value), pos))
            }

            TokenKind::Int => {
                let value = self.lexer.int_value();
                self.advance()?;
                Ok(self.add_expr(ExprKind::Int(value), pos))
            }

            TokenKind::Float => {
                let value = self.lexer.float_value();
                self.advance()?;
                Ok(self.add_expr(ExprKind::Float(value), pos))
            }

            TokenKind::String => {
                let value = self.intern_lexeme();
                self.advance()?;
                Ok(self.add_expr(ExprKind::Str(value), pos))
            }

            TokenKind::Ident => {
                let name = self.intern_lexeme();
                self.advance()?;

                if self.cur == TokenKind::OpenParen {
                    return self.parse_call(name, pos);
                }

                let id = self.add_expr(ExprKind::Id(name), pos);
                self.parse_dot_chain(id)
            }

            TokenKind::Minus | TokenKind::Bang => {
                let op = if self.cur == TokenKind::Minus {
                    UnOp::Neg
                } else {
                    UnOp::Not
                };

                self.advance()?;
                let operand = self.parse_factor()?;
                Ok(self.add_expr(ExprKind::Unary { op, operand }, pos))
            }

            TokenKind::OpenParen => {
                self.advance()?;
                let inner = self.parse_expr()?;
                self.eat(TokenKind::CloseParen, "Expected ')' to match previous '('.")?;
                Ok(self.add_expr(ExprKind::Paren(inner), pos))
            }

            TokenKind::New => {
                self.advance()?;
                let ty = self.parse_type()?;

                self.eat(TokenKind::OpenCurly, "Expected '{' after type name in new.")?;

                let mut args = Vec::new();

                while self.cur != TokenKind::CloseCurly {
                    args.push(self.parse_expr()?);

                    if self.cur == TokenKind::Comma {
                        self.advance()?;
                    } else if self.cur != TokenKind::CloseCurly {
                        return Err(ParseError::new(
                            "Expected '}' or ',' in constructor arg list.",
                            self.pos(),
                        ));
                    }
                }

                self.advance()?;

                Ok(self.add_expr(ExprKind::Constructor { ty, args }, pos))
            }

            TokenKind::Cast => {
                self.advance()?;

                self.eat(TokenKind::OpenParen, "Expected '(' after 'cast'.")?;
                let value = self.parse_expr()?;

                self.eat(TokenKind::Comma, "Expected ',' after cast value.")?;
                let ty = self.parse_type()?;

                self.eat(
                    TokenKind::CloseParen,
                    "Expected ')' to match previous '(' after cast.",
                )?;

                Ok(self.add_expr(ExprKind::Cast { value, ty }, pos))
            }

            tok => Err(ParseError::new(format!("Unexpected token {}.", tok), pos)),
        }
    }

    fn parse_call(&mut self, callee: Str, pos: Pos) -> Result<ExprId, ParseError> {
        self.advance()?;

        let mut args = Vec::new();

        while self.cur != TokenKind::CloseParen {
            args.push(self.parse_expr()?);

            if self.cur == TokenKind::Comma {
                self.advance()?;
            } else if self.cur != TokenKind::CloseParen {
                return Err(ParseError::new("Expected ')' after call.", self.pos()));
            }
        }

        self.advance()?;

        Ok(self.add_expr(ExprKind::Call { callee, args }, pos))
    }

    /// Extend `lhs` with any `.field` accesses.
    fn parse_dot_chain(&mut self, mut lhs: ExprId) -> Result<ExprId, ParseError> {
        while self.cur == TokenKind::Dot {
            let pos = self.pos();
            self.advance()?;

            self.expect(TokenKind::Ident, "Expected identifier after '.'.")?;
            let field = self.intern_lexeme();
            self.advance()?;

            lhs = self.add_expr(ExprKind::Dot { lhs, field }, pos);
        }

        Ok(lhs)
    }
}
