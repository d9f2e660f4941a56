//! Parser for the supported C99 subset
//!
//! A hand-written tokenizer and recursive-descent parser. Only the subset
//! the PIGS VM can carry is accepted: `int` objects and functions, `void`
//! functions, enums, the structured statements, and `asm()`. Everything
//! else in C is recognised just far enough to be rejected with a precise
//! diagnostic instead of a generic parse error.

use crate::ast::{
    AsmOperand, BinaryOp, Declarator, EnumDef, Enumerator, Expr, FunctionDef, NodeId, ParamDecl,
    Prototype, SourceFile, SourceLocation, Stmt, TopDecl, UnaryOp, VarDecl,
};
use crate::error::{CompileError, ErrorKind};
use std::path::PathBuf;

/// A token with its source line (0-indexed).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    Ident(String),
    Int(i32),
    Str(String),
    Punct(&'static str),
}

impl TokKind {
    fn describe(&self) -> String {
        match self {
            TokKind::Ident(name) => format!("'{}'", name),
            TokKind::Int(value) => format!("'{}'", value),
            TokKind::Str(_) => "string literal".to_string(),
            TokKind::Punct(p) => format!("'{}'", p),
        }
    }
}

/// Keywords whose constructs fall outside the supported subset. They are
/// rejected by name so the diagnostic says what was attempted.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "switch", "case", "default", "goto", "struct", "union", "typedef", "static", "register",
    "auto", "const", "volatile", "restrict", "inline", "sizeof", "float", "double", "char",
    "short", "long", "unsigned", "signed",
];

fn is_unsupported_keyword(name: &str) -> bool {
    UNSUPPORTED_KEYWORDS.contains(&name)
}

/// Parse one source file into its top-level declarations.
///
/// `file` is the index this file will occupy in the translation unit;
/// `next_id` is the unit-wide node id counter shared between files.
pub fn parse_source(
    text: &str,
    path: PathBuf,
    file: usize,
    next_id: &mut NodeId,
) -> Result<(SourceFile, Vec<TopDecl>), CompileError> {
    let tokens = tokenize(text, &path)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file,
        path: path.clone(),
        next_id,
    };
    let decls = parser.parse_unit()?;
    let source = SourceFile {
        path,
        lines: text.lines().map(str::to_string).collect(),
    };
    Ok((source, decls))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    file: usize,
    path: PathBuf,
    next_id: &'a mut NodeId,
}

impl Parser<'_> {
    // ---- token plumbing -------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn current_line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(0)
    }

    fn loc(&self) -> SourceLocation {
        SourceLocation {
            file: self.file,
            line: self.current_line(),
        }
    }

    fn loc_string(&self, line: usize) -> String {
        format!("{}:{}", self.path.display(), line + 1)
    }

    fn here(&self) -> String {
        self.loc_string(self.current_line())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokKind::Punct(p), .. }) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.check_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), CompileError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            let found = match self.peek() {
                Some(token) => token.kind.describe(),
                None => "end of file".to_string(),
            };
            Err(CompileError::unsupported(
                format!("expected '{}', found {}", punct, found),
                self.here(),
            ))
        }
    }

    fn check_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokKind::Ident(id), .. }) if id == name)
    }

    fn eat_ident(&mut self, name: &str) -> bool {
        if self.check_ident(name) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<(String, usize), CompileError> {
        match self.advance() {
            Some(Token {
                kind: TokKind::Ident(name),
                line,
            }) => Ok((name, line)),
            Some(token) => Err(CompileError::unsupported(
                format!("expected identifier, found {}", token.kind.describe()),
                self.loc_string(token.line),
            )),
            None => Err(CompileError::unsupported(
                "expected identifier, found end of file",
                self.here(),
            )),
        }
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = *self.next_id;
        *self.next_id += 1;
        id
    }

    fn reject_unsupported_keyword(&self, name: &str, line: usize) -> Result<(), CompileError> {
        if is_unsupported_keyword(name) {
            return Err(CompileError::unsupported(
                format!("'{}' is outside the supported C subset", name),
                self.loc_string(line),
            ));
        }
        Ok(())
    }

    // ---- top level ------------------------------------------------------

    fn parse_unit(&mut self) -> Result<Vec<TopDecl>, CompileError> {
        let mut decls = Vec::new();
        while !self.is_at_end() {
            if self.check_ident("enum") {
                let def = self.parse_enum_def()?;
                self.expect_punct(";")?;
                decls.push(TopDecl::Enum(def));
                continue;
            }
            decls.push(self.parse_declaration()?);
        }
        Ok(decls)
    }

    /// Parse a top-level declaration: function definition, prototype, or
    /// one `int` variable declaration.
    fn parse_declaration(&mut self) -> Result<TopDecl, CompileError> {
        let loc = self.loc();
        let is_extern = self.eat_ident("extern");
        let returns_value = self.parse_type()?;
        let (name, name_line) = self.expect_ident()?;
        self.reject_unsupported_keyword(&name, name_line)?;

        if self.check_punct("(") {
            self.pos += 1;
            let params = self.parse_params()?;
            if self.check_punct("{") {
                if is_extern {
                    return Err(CompileError::unsupported(
                        format!("'extern' on a function definition ('{}')", name),
                        self.loc_string(name_line),
                    ));
                }
                let body = self.parse_block()?;
                return Ok(TopDecl::Function(FunctionDef {
                    name,
                    returns_value,
                    params,
                    body,
                    loc,
                }));
            }
            self.expect_punct(";")?;
            return Ok(TopDecl::Prototype(Prototype {
                name,
                is_extern,
                returns_value,
                params,
                loc,
            }));
        }

        if !returns_value {
            return Err(CompileError::ty(
                format!("variable '{}' declared void; only int objects exist", name),
                self.loc_string(name_line),
            ));
        }
        let vars = self.parse_declarators(name, name_line)?;
        Ok(TopDecl::Variables(VarDecl {
            is_extern,
            vars,
            loc,
        }))
    }

    /// Parse the type of a declaration. Returns true for `int`, false for
    /// `void`; anything else is rejected.
    fn parse_type(&mut self) -> Result<bool, CompileError> {
        let (name, line) = self.expect_ident()?;
        let returns_value = match name.as_str() {
            "int" => true,
            "void" => false,
            other => {
                self.reject_unsupported_keyword(other, line)?;
                return Err(CompileError::unsupported(
                    format!("expected 'int' or 'void', found '{}'", other),
                    self.loc_string(line),
                ));
            }
        };
        if self.check_punct("*") {
            return Err(CompileError::unsupported(
                "pointer types are not supported",
                self.here(),
            ));
        }
        Ok(returns_value)
    }

    /// Parse a parameter list; the opening '(' has been consumed.
    fn parse_params(&mut self) -> Result<Vec<ParamDecl>, CompileError> {
        let mut params = Vec::new();
        if self.eat_punct(")") {
            return Ok(params);
        }
        if self.check_ident("void") {
            // `(void)` only; `void x` is caught below.
            let save = self.pos;
            self.pos += 1;
            if self.eat_punct(")") {
                return Ok(params);
            }
            self.pos = save;
        }
        loop {
            if self.check_punct("...") {
                return Err(CompileError::unsupported(
                    "variadic functions are not supported",
                    self.here(),
                ));
            }
            let loc = self.loc();
            if !self.parse_type()? {
                return Err(CompileError::ty(
                    "void parameter; parameters must be int",
                    self.here(),
                ));
            }
            let name = match self.peek() {
                Some(Token {
                    kind: TokKind::Ident(_),
                    ..
                }) => {
                    let (name, line) = self.expect_ident()?;
                    self.reject_unsupported_keyword(&name, line)?;
                    Some(name)
                }
                _ => None,
            };
            params.push(ParamDecl {
                name,
                id: self.fresh_id(),
                loc,
            });
            if self.eat_punct(")") {
                break;
            }
            self.expect_punct(",")?;
        }
        Ok(params)
    }

    /// Parse declarators after the first name; the `int` and first name have
    /// been consumed.
    fn parse_declarators(
        &mut self,
        first_name: String,
        first_line: usize,
    ) -> Result<Vec<Declarator>, CompileError> {
        let mut vars = Vec::new();
        let mut name = first_name;
        let mut line = first_line;
        loop {
            if self.check_punct("[") {
                return Err(CompileError::unsupported(
                    "array types are not supported",
                    self.here(),
                ));
            }
            let init = if self.eat_punct("=") {
                Some(self.parse_assign()?)
            } else {
                None
            };
            vars.push(Declarator {
                name,
                id: self.fresh_id(),
                init,
                loc: SourceLocation {
                    file: self.file,
                    line,
                },
            });
            if self.eat_punct(";") {
                break;
            }
            self.expect_punct(",")?;
            if self.check_punct("*") {
                return Err(CompileError::unsupported(
                    "pointer types are not supported",
                    self.here(),
                ));
            }
            let (next_name, next_line) = self.expect_ident()?;
            self.reject_unsupported_keyword(&next_name, next_line)?;
            name = next_name;
            line = next_line;
        }
        Ok(vars)
    }

    fn parse_enum_def(&mut self) -> Result<EnumDef, CompileError> {
        let loc = self.loc();
        self.eat_ident("enum");
        // Optional tag name; enum types are all just int, so it is ignored.
        if let Some(Token {
            kind: TokKind::Ident(_),
            ..
        }) = self.peek()
        {
            let (name, line) = self.expect_ident()?;
            self.reject_unsupported_keyword(&name, line)?;
        }
        self.expect_punct("{")?;
        let mut enumerators = Vec::new();
        loop {
            let (name, line) = self.expect_ident()?;
            self.reject_unsupported_keyword(&name, line)?;
            let value = if self.eat_punct("=") {
                Some(self.parse_assign()?)
            } else {
                None
            };
            enumerators.push(Enumerator {
                name,
                id: self.fresh_id(),
                value,
                loc: SourceLocation {
                    file: self.file,
                    line,
                },
            });
            if self.eat_punct(",") {
                if self.eat_punct("}") {
                    break; // trailing comma
                }
                continue;
            }
            self.expect_punct("}")?;
            break;
        }
        if enumerators.is_empty() {
            return Err(CompileError::unsupported(
                "enum must declare at least one enumerator",
                self.here(),
            ));
        }
        Ok(EnumDef { enumerators, loc })
    }

    // ---- statements -----------------------------------------------------

    fn parse_block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.eat_punct("}") {
            if self.is_at_end() {
                return Err(CompileError::unsupported(
                    "unexpected end of file inside a block",
                    self.here(),
                ));
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        let loc = self.loc();
        if self.check_punct("{") {
            let body = self.parse_block()?;
            return Ok(Stmt::Compound(body, loc));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if let Some(Token {
            kind: TokKind::Ident(name),
            line,
        }) = self.peek().cloned()
        {
            match name.as_str() {
                "if" => return self.parse_if(loc),
                "while" => return self.parse_while(loc),
                "do" => return self.parse_do_while(loc),
                "for" => return self.parse_for(loc),
                "break" => {
                    self.pos += 1;
                    self.expect_punct(";")?;
                    return Ok(Stmt::Break(loc));
                }
                "continue" => {
                    self.pos += 1;
                    self.expect_punct(";")?;
                    return Ok(Stmt::Continue(loc));
                }
                "return" => {
                    self.pos += 1;
                    let value = if self.check_punct(";") {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.expect_punct(";")?;
                    return Ok(Stmt::Return { value, loc });
                }
                "int" => {
                    self.pos += 1;
                    if self.check_punct("*") {
                        return Err(CompileError::unsupported(
                            "pointer types are not supported",
                            self.here(),
                        ));
                    }
                    let (first, first_line) = self.expect_ident()?;
                    self.reject_unsupported_keyword(&first, first_line)?;
                    let vars = self.parse_declarators(first, first_line)?;
                    return Ok(Stmt::Decl(VarDecl {
                        is_extern: false,
                        vars,
                        loc,
                    }));
                }
                "enum" => {
                    let def = self.parse_enum_def()?;
                    self.expect_punct(";")?;
                    return Ok(Stmt::Enum(def));
                }
                "void" => {
                    return Err(CompileError::ty(
                        "void is only valid as a function return type",
                        self.loc_string(line),
                    ));
                }
                "extern" => {
                    return Err(CompileError::unsupported(
                        "extern declarations are only allowed at file scope",
                        self.loc_string(line),
                    ));
                }
                "asm" => {
                    // Only `asm(...)` is special; a plain identifier named
                    // asm cannot exist since asm is reserved here.
                    return self.parse_asm(loc);
                }
                other => self.reject_unsupported_keyword(other, line)?,
            }
        }
        let expr = self.parse_expr()?;
        self.expect_punct(";")?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_if(&mut self, loc: SourceLocation) -> Result<Stmt, CompileError> {
        self.eat_ident("if");
        self.expect_punct("(")?;
        let cond = self.parse_expr()?;
        self.expect_punct(")")?;
        let then_branch = Box::new(self.parse_stmt()?);
        let else_branch = if self.eat_ident("else") {
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            loc,
        })
    }

    fn parse_while(&mut self, loc: SourceLocation) -> Result<Stmt, CompileError> {
        self.eat_ident("while");
        self.expect_punct("(")?;
        let cond = self.parse_expr()?;
        self.expect_punct(")")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { cond, body, loc })
    }

    fn parse_do_while(&mut self, loc: SourceLocation) -> Result<Stmt, CompileError> {
        self.eat_ident("do");
        let body = Box::new(self.parse_stmt()?);
        if !self.eat_ident("while") {
            return Err(CompileError::unsupported(
                "expected 'while' after do-body",
                self.here(),
            ));
        }
        self.expect_punct("(")?;
        let cond = self.parse_expr()?;
        self.expect_punct(")")?;
        self.expect_punct(";")?;
        Ok(Stmt::DoWhile { body, cond, loc })
    }

    fn parse_for(&mut self, loc: SourceLocation) -> Result<Stmt, CompileError> {
        self.eat_ident("for");
        self.expect_punct("(")?;
        let init = if self.eat_punct(";") {
            None
        } else if self.check_ident("int") {
            // C99 for-scope declaration; parse_stmt consumes the ';'.
            Some(Box::new(self.parse_stmt()?))
        } else {
            let expr = self.parse_expr()?;
            self.expect_punct(";")?;
            Some(Box::new(Stmt::Expr(expr)))
        };
        let cond = if self.check_punct(";") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(";")?;
        let step = if self.check_punct(")") {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
            loc,
        })
    }

    fn parse_asm(&mut self, loc: SourceLocation) -> Result<Stmt, CompileError> {
        self.eat_ident("asm");
        self.expect_punct("(")?;
        let mnemonic = match self.advance() {
            Some(Token {
                kind: TokKind::Str(text),
                line,
            }) => {
                if text.is_empty()
                    || !text
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(CompileError::asm(
                        format!("'{}' is not a valid mnemonic", text),
                        self.loc_string(line),
                    ));
                }
                text
            }
            Some(token) => {
                return Err(CompileError::asm(
                    format!(
                        "first asm() argument must be a mnemonic string, found {}",
                        token.kind.describe()
                    ),
                    self.loc_string(token.line),
                ));
            }
            None => {
                return Err(CompileError::asm(
                    "unterminated asm() statement",
                    self.here(),
                ));
            }
        };
        let operand = if self.eat_punct(",") {
            Some(self.parse_asm_operand()?)
        } else {
            None
        };
        self.expect_punct(")")?;
        self.expect_punct(";")?;
        Ok(Stmt::Asm {
            mnemonic,
            operand,
            loc,
        })
    }

    fn parse_asm_operand(&mut self) -> Result<AsmOperand, CompileError> {
        let negative = self.eat_punct("-");
        match self.advance() {
            Some(Token {
                kind: TokKind::Int(value),
                ..
            }) => Ok(AsmOperand::Int(if negative {
                value.wrapping_neg()
            } else {
                value
            })),
            Some(Token {
                kind: TokKind::Str(text),
                ..
            }) if !negative => Ok(AsmOperand::Str(text)),
            Some(Token {
                kind: TokKind::Ident(name),
                line,
            }) if !negative => {
                self.reject_unsupported_keyword(&name, line)?;
                let id = self.fresh_id();
                Ok(AsmOperand::Ident { name, id })
            }
            other => {
                let found = match other {
                    Some(token) => token.kind.describe(),
                    None => "end of file".to_string(),
                };
                Err(CompileError::asm(
                    format!(
                        "asm() operand must be a string, integer, or identifier, found {}",
                        found
                    ),
                    self.here(),
                ))
            }
        }
    }

    // ---- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.parse_logical_or()?;
        if self.check_punct("?") {
            return Err(CompileError::unsupported(
                "the conditional operator '?:' is not supported",
                self.here(),
            ));
        }
        let op = match self.peek() {
            Some(Token {
                kind: TokKind::Punct(p),
                ..
            }) => match *p {
                "=" => None,
                "+=" => Some(BinaryOp::Add),
                "-=" => Some(BinaryOp::Sub),
                "*=" => Some(BinaryOp::Mul),
                "/=" => Some(BinaryOp::Div),
                "%=" => Some(BinaryOp::Mod),
                "&=" => Some(BinaryOp::BitAnd),
                "|=" => Some(BinaryOp::BitOr),
                "^=" => Some(BinaryOp::BitXor),
                "<<=" => Some(BinaryOp::Shl),
                ">>=" => Some(BinaryOp::Shr),
                _ => return Ok(lhs),
            },
            _ => return Ok(lhs),
        };
        let loc = self.loc();
        self.pos += 1; // the assignment operator
        let (target, target_id) = match lhs {
            Expr::Ident { name, id, .. } => (name, id),
            other => {
                return Err(CompileError::unsupported(
                    "assignment target must be a plain variable",
                    self.loc_string(other.loc().line),
                ));
            }
        };
        let value = Box::new(self.parse_assign()?);
        Ok(Expr::Assign {
            op,
            target,
            target_id,
            value,
            loc,
        })
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, CompileError>,
    ) -> Result<Expr, CompileError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.check_punct(punct) {
                    let loc = self.loc();
                    self.pos += 1;
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        loc,
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_logical_or(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(&[("||", BinaryOp::LogOr)], Self::parse_logical_and)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(&[("&&", BinaryOp::LogAnd)], Self::parse_bit_or)
    }

    fn parse_bit_or(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(&[("|", BinaryOp::BitOr)], Self::parse_bit_xor)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(&[("^", BinaryOp::BitXor)], Self::parse_bit_and)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(&[("&", BinaryOp::BitAnd)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(
            &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(
            &[("<<", BinaryOp::Shl), (">>", BinaryOp::Shr)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Mod),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let loc = self.loc();
        if self.eat_punct("-") {
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand,
                loc,
            });
        }
        if self.eat_punct("+") {
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expr::Unary {
                op: UnaryOp::Plus,
                operand,
                loc,
            });
        }
        if self.eat_punct("~") {
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expr::Unary {
                op: UnaryOp::BitNot,
                operand,
                loc,
            });
        }
        if self.eat_punct("!") {
            let operand = Box::new(self.parse_unary()?);
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand,
                loc,
            });
        }
        if self.check_punct("++") || self.check_punct("--") {
            let increment = self.check_punct("++");
            self.pos += 1;
            let operand = self.parse_unary()?;
            return match operand {
                Expr::Ident { name, id, .. } => Ok(Expr::IncDec {
                    target: name,
                    target_id: id,
                    increment,
                    prefix: true,
                    loc,
                }),
                _ => Err(CompileError::unsupported(
                    format!(
                        "'{}' target must be a plain variable",
                        if increment { "++" } else { "--" }
                    ),
                    self.loc_string(loc.line),
                )),
            };
        }
        if self.check_punct("*") {
            return Err(CompileError::unsupported(
                "pointer indirection is not supported",
                self.here(),
            ));
        }
        if self.check_punct("&") {
            return Err(CompileError::unsupported(
                "address-of is not supported",
                self.here(),
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check_punct("++") || self.check_punct("--") {
                let increment = self.check_punct("++");
                let loc = self.loc();
                self.pos += 1;
                expr = match expr {
                    Expr::Ident { name, id, .. } => Expr::IncDec {
                        target: name,
                        target_id: id,
                        increment,
                        prefix: false,
                        loc,
                    },
                    _ => {
                        return Err(CompileError::unsupported(
                            format!(
                                "'{}' target must be a plain variable",
                                if increment { "++" } else { "--" }
                            ),
                            self.loc_string(loc.line),
                        ));
                    }
                };
                continue;
            }
            if self.check_punct("(") {
                let loc = self.loc();
                self.pos += 1;
                let (callee, callee_id) = match expr {
                    Expr::Ident { name, id, .. } => {
                        if name == "asm" {
                            return Err(CompileError::asm(
                                "asm() is only allowed in statement position",
                                self.loc_string(loc.line),
                            ));
                        }
                        (name, id)
                    }
                    _ => {
                        return Err(CompileError::unsupported(
                            "called object must be a function name",
                            self.loc_string(loc.line),
                        ));
                    }
                };
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.parse_assign()?);
                        if self.eat_punct(")") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                expr = Expr::Call {
                    callee,
                    callee_id,
                    args,
                    loc,
                };
                continue;
            }
            if self.check_punct("[") {
                return Err(CompileError::unsupported(
                    "array subscripting is not supported",
                    self.here(),
                ));
            }
            if self.check_punct(".") || self.check_punct("->") {
                return Err(CompileError::unsupported(
                    "member access is not supported",
                    self.here(),
                ));
            }
            return Ok(expr);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let loc = self.loc();
        match self.advance() {
            Some(Token {
                kind: TokKind::Int(value),
                ..
            }) => Ok(Expr::IntLit { value, loc }),
            Some(Token {
                kind: TokKind::Str(_),
                line,
            }) => Err(CompileError::unsupported(
                "string literals are only valid inside asm()",
                self.loc_string(line),
            )),
            Some(Token {
                kind: TokKind::Ident(name),
                line,
            }) => {
                self.reject_unsupported_keyword(&name, line)?;
                if name == "int" || name == "void" {
                    return Err(CompileError::unsupported(
                        format!("unexpected '{}' in expression", name),
                        self.loc_string(line),
                    ));
                }
                let id = self.fresh_id();
                Ok(Expr::Ident { name, id, loc })
            }
            Some(Token {
                kind: TokKind::Punct("("),
                ..
            }) => {
                if let Some(Token {
                    kind: TokKind::Ident(name),
                    ..
                }) = self.peek()
                    && (name == "int"
                        || name == "void"
                        || is_unsupported_keyword(name))
                {
                    return Err(CompileError::unsupported(
                        "cast expressions are not supported",
                        self.here(),
                    ));
                }
                let expr = self.parse_expr()?;
                if self.check_punct(",") {
                    return Err(CompileError::unsupported(
                        "the comma operator is not supported",
                        self.here(),
                    ));
                }
                self.expect_punct(")")?;
                Ok(expr)
            }
            Some(token) => Err(CompileError::unsupported(
                format!("unexpected {} in expression", token.kind.describe()),
                self.loc_string(token.line),
            )),
            None => Err(CompileError::unsupported(
                "unexpected end of file in expression",
                self.here(),
            )),
        }
    }
}

// ---- tokenizer ----------------------------------------------------------

/// Multi-character punctuators, longest first for maximal munch.
const PUNCT3: &[&str] = &["<<=", ">>=", "..."];
const PUNCT2: &[&str] = &[
    "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=", "*=", "/=",
    "%=", "&=", "|=", "^=",
];
const PUNCT1: &[&str] = &[
    "+", "-", "*", "/", "%", "&", "|", "^", "~", "!", "<", ">", "=", "(", ")", "{", "}", "[",
    "]", ";", ",", "?", ":", ".",
];

fn tokenize(source: &str, path: &std::path::Path) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 0;
    let err = |line: usize, msg: String| {
        CompileError::at(
            ErrorKind::SyntaxUnsupported,
            msg,
            format!("{}:{}", path.display(), line + 1),
        )
    };

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // Line comment
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        // Block comment
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            loop {
                if i + 1 >= chars.len() {
                    return Err(err(line, "unterminated block comment".to_string()));
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    i += 2;
                    break;
                }
                i += 1;
            }
            continue;
        }
        // Preprocessor lines are outside the subset (no preprocessor).
        if c == '#' {
            return Err(err(
                line,
                "preprocessor directives are not supported".to_string(),
            ));
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token {
                kind: TokKind::Ident(text),
                line,
            });
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = parse_int_literal(&text).ok_or_else(|| {
                err(line, format!("bad integer literal '{}'", text))
            })?;
            tokens.push(Token {
                kind: TokKind::Int(value),
                line,
            });
            continue;
        }
        if c == '\'' {
            let (value, next) = parse_char_literal(&chars, i)
                .ok_or_else(|| err(line, "bad character literal".to_string()))?;
            tokens.push(Token {
                kind: TokKind::Int(value),
                line,
            });
            i = next;
            continue;
        }
        if c == '"' {
            let mut text = String::new();
            let mut j = i + 1;
            loop {
                match chars.get(j) {
                    None | Some('\n') => {
                        return Err(err(line, "unclosed string literal".to_string()));
                    }
                    Some('"') => break,
                    Some('\\') => {
                        let escaped = chars.get(j + 1).copied().ok_or_else(|| {
                            err(line, "unclosed string literal".to_string())
                        })?;
                        text.push(unescape(escaped).ok_or_else(|| {
                            err(line, format!("unknown escape '\\{}'", escaped))
                        })?);
                        j += 2;
                    }
                    Some(&ch) => {
                        text.push(ch);
                        j += 1;
                    }
                }
            }
            tokens.push(Token {
                kind: TokKind::Str(text),
                line,
            });
            i = j + 1;
            continue;
        }
        // Punctuation, longest first.
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        let mut matched = None;
        for p in PUNCT3 {
            if rest.starts_with(p) {
                matched = Some(*p);
                break;
            }
        }
        if matched.is_none() {
            for p in PUNCT2 {
                if rest.starts_with(p) {
                    matched = Some(*p);
                    break;
                }
            }
        }
        if matched.is_none() {
            for p in PUNCT1 {
                if rest.starts_with(p) {
                    matched = Some(*p);
                    break;
                }
            }
        }
        match matched {
            Some(p) => {
                tokens.push(Token {
                    kind: TokKind::Punct(p),
                    line,
                });
                i += p.len();
            }
            None => {
                return Err(err(line, format!("unexpected character '{}'", c)));
            }
        }
    }
    Ok(tokens)
}

/// Decimal, hex (0x), and octal (leading 0) literals. Suffixes are not
/// accepted. Values are wrapped into the 32-bit signed range the VM uses.
fn parse_int_literal(text: &str) -> Option<i32> {
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if text.len() > 1 && text.starts_with('0') {
        i64::from_str_radix(&text[1..], 8).ok()?
    } else {
        text.parse::<i64>().ok()?
    };
    if !(0..=u32::MAX as i64).contains(&value) {
        return None;
    }
    Some(value as u32 as i32)
}

fn parse_char_literal(chars: &[char], start: usize) -> Option<(i32, usize)> {
    // chars[start] == '\''
    let mut i = start + 1;
    let value = match chars.get(i)? {
        '\\' => {
            i += 1;
            unescape(*chars.get(i)?)? as i32
        }
        '\'' | '\n' => return None,
        &ch => ch as i32,
    };
    i += 1;
    if chars.get(i) != Some(&'\'') {
        return None;
    }
    Some((value, i + 1))
}

fn unescape(c: char) -> Option<char> {
    match c {
        'n' => Some('\n'),
        't' => Some('\t'),
        'r' => Some('\r'),
        '0' => Some('\0'),
        '\\' => Some('\\'),
        '\'' => Some('\''),
        '"' => Some('"'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TopDecl;

    fn parse(text: &str) -> Result<Vec<TopDecl>, CompileError> {
        let mut next_id = 0;
        parse_source(text, PathBuf::from("test.c"), 0, &mut next_id).map(|(_, decls)| decls)
    }

    fn parse_err(text: &str) -> CompileError {
        parse(text).expect_err("expected a parse error")
    }

    #[test]
    fn test_parse_function_with_params() {
        let decls = parse("int add(int a, int b) { return a + b; }").unwrap();
        assert_eq!(decls.len(), 1);
        match &decls[0] {
            TopDecl::Function(f) => {
                assert_eq!(f.name, "add");
                assert!(f.returns_value);
                assert_eq!(f.params.len(), 2);
                assert_eq!(f.params[0].name.as_deref(), Some("a"));
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_void_function_and_prototype() {
        let decls = parse("void blink(int pin);\nvoid blink(int pin) { }").unwrap();
        assert_eq!(decls.len(), 2);
        assert!(matches!(&decls[0], TopDecl::Prototype(p) if !p.returns_value));
    }

    #[test]
    fn test_parse_globals_with_initialisers() {
        let decls = parse("int a = 1, b, c = -2;").unwrap();
        match &decls[0] {
            TopDecl::Variables(d) => {
                assert_eq!(d.vars.len(), 3);
                assert!(d.vars[0].init.is_some());
                assert!(d.vars[1].init.is_none());
            }
            other => panic!("expected variables, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_extern_parameter() {
        let decls = parse("extern int p0;").unwrap();
        assert!(matches!(&decls[0], TopDecl::Variables(d) if d.is_extern));
    }

    #[test]
    fn test_parse_enum_with_values() {
        let decls = parse("enum { RED, GREEN = 5, BLUE };").unwrap();
        match &decls[0] {
            TopDecl::Enum(e) => {
                assert_eq!(e.enumerators.len(), 3);
                assert!(e.enumerators[1].value.is_some());
            }
            other => panic!("expected enum, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_shape() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let decls = parse("int main() { return 1 + 2 * 3; }").unwrap();
        let f = match &decls[0] {
            TopDecl::Function(f) => f,
            _ => panic!(),
        };
        let value = match &f.body[0] {
            Stmt::Return { value: Some(v), .. } => v,
            _ => panic!(),
        };
        match value {
            Expr::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => {
                assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("expected addition at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_hex_octal_char_literals() {
        let decls = parse("int a = 0x10; int b = 010; int c = 'A';").unwrap();
        let values: Vec<i32> = decls
            .iter()
            .map(|d| match d {
                TopDecl::Variables(v) => match &v.vars[0].init {
                    Some(Expr::IntLit { value, .. }) => *value,
                    other => panic!("expected int literal, got {:?}", other),
                },
                _ => panic!(),
            })
            .collect();
        assert_eq!(values, vec![16, 8, 65]);
    }

    #[test]
    fn test_large_hex_wraps_to_signed() {
        let decls = parse("int a = 0xFFFFFFFF;").unwrap();
        match &decls[0] {
            TopDecl::Variables(v) => match &v.vars[0].init {
                Some(Expr::IntLit { value, .. }) => assert_eq!(*value, -1),
                other => panic!("unexpected {:?}", other),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn test_asm_forms() {
        let decls = parse(
            "void f() { asm(\"Tag\", \"L\"); asm(\"jmp\", \"L\"); asm(\"lda\", 5); asm(\"sta\", x); asm(\"ret\"); }",
        )
        .unwrap();
        let f = match &decls[0] {
            TopDecl::Function(f) => f,
            _ => panic!(),
        };
        assert_eq!(f.body.len(), 5);
        assert!(matches!(
            &f.body[0],
            Stmt::Asm { mnemonic, operand: Some(AsmOperand::Str(s)), .. }
                if mnemonic == "Tag" && s == "L"
        ));
        assert!(matches!(
            &f.body[2],
            Stmt::Asm { operand: Some(AsmOperand::Int(5)), .. }
        ));
        assert!(matches!(&f.body[4], Stmt::Asm { operand: None, .. }));
    }

    #[test]
    fn test_for_with_declaration() {
        let decls = parse("int main() { for (int i = 0; i < 4; ++i) { } return 0; }").unwrap();
        let f = match &decls[0] {
            TopDecl::Function(f) => f,
            _ => panic!(),
        };
        assert!(matches!(
            &f.body[0],
            Stmt::For { init: Some(init), cond: Some(_), step: Some(_), .. }
                if matches!(**init, Stmt::Decl(_))
        ));
    }

    #[test]
    fn test_rejects_pointer() {
        let err = parse_err("int *p;");
        assert_eq!(err.kind, ErrorKind::SyntaxUnsupported);
    }

    #[test]
    fn test_rejects_array() {
        let err = parse_err("int a[4];");
        assert_eq!(err.kind, ErrorKind::SyntaxUnsupported);
    }

    #[test]
    fn test_rejects_struct_switch_goto_cast_ternary_comma() {
        for src in [
            "struct point { int x; };",
            "int main() { switch (1) { } }",
            "int main() { goto done; }",
            "int main() { return (int)1; }",
            "int main() { return 1 ? 2 : 3; }",
            "int main() { return (1, 2); }",
        ] {
            let err = parse_err(src);
            assert_eq!(err.kind, ErrorKind::SyntaxUnsupported, "source: {}", src);
        }
    }

    #[test]
    fn test_rejects_float_type() {
        let err = parse_err("float x;");
        assert_eq!(err.kind, ErrorKind::SyntaxUnsupported);
        assert!(err.message.contains("float"));
    }

    #[test]
    fn test_rejects_preprocessor() {
        let err = parse_err("#include <stdio.h>\nint main() { }");
        assert!(err.message.contains("preprocessor"));
    }

    #[test]
    fn test_rejects_asm_in_expression() {
        let err = parse_err("int main() { int x = asm(\"lda\", 1); }");
        assert_eq!(err.kind, ErrorKind::Asm);
    }

    #[test]
    fn test_rejects_bad_asm_mnemonic() {
        let err = parse_err("int main() { asm(\"no good\", 1); }");
        assert_eq!(err.kind, ErrorKind::Asm);
    }

    #[test]
    fn test_error_carries_location() {
        let err = parse_err("int a;\nint b[3];\n");
        assert_eq!(err.location.as_deref(), Some("test.c:2"));
    }

    #[test]
    fn test_assignment_right_associative() {
        let decls = parse("int main() { int a; int b; a = b = 3; return a; }").unwrap();
        let f = match &decls[0] {
            TopDecl::Function(f) => f,
            _ => panic!(),
        };
        match &f.body[2] {
            Stmt::Expr(Expr::Assign { target, value, .. }) => {
                assert_eq!(target, "a");
                assert!(matches!(**value, Expr::Assign { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
