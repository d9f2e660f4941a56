//! Abstract syntax tree for the supported C subset
//!
//! The parser produces one [`TranslationUnit`] covering the embedded API
//! header plus every user source file, in order. Identifier uses and
//! declarators carry parser-assigned [`NodeId`]s; the resolver maps those
//! ids to declarations so later passes never re-do name lookup.

use std::path::PathBuf;

/// Unique id for an AST node that declares or references a name.
pub type NodeId = usize;

/// A position in one of the unit's source files (line is 0-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: usize,
    pub line: usize,
}

/// One parsed source file: its path and its raw lines (kept for the
/// emitter's `-c` comment interleaving and for diagnostics).
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub files: Vec<SourceFile>,
    pub decls: Vec<TopDecl>,
}

impl TranslationUnit {
    pub fn new() -> Self {
        TranslationUnit::default()
    }

    /// Format a location as `file:line` for diagnostics (1-indexed line).
    pub fn loc_string(&self, loc: SourceLocation) -> String {
        match self.files.get(loc.file) {
            Some(file) => format!("{}:{}", file.path.display(), loc.line + 1),
            None => format!("<unknown>:{}", loc.line + 1),
        }
    }

    /// The raw text of the line at `loc`, or empty if out of range.
    pub fn line_text(&self, loc: SourceLocation) -> &str {
        self.files
            .get(loc.file)
            .and_then(|f| f.lines.get(loc.line))
            .map(String::as_str)
            .unwrap_or("")
    }
}

#[derive(Debug, Clone)]
pub enum TopDecl {
    Function(FunctionDef),
    Prototype(Prototype),
    Variables(VarDecl),
    Enum(EnumDef),
}

#[derive(Debug, Clone)]
pub struct Prototype {
    pub name: String,
    pub is_extern: bool,
    /// False for `void` return.
    pub returns_value: bool,
    pub params: Vec<ParamDecl>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub returns_value: bool,
    pub params: Vec<ParamDecl>,
    pub body: Vec<Stmt>,
    pub loc: SourceLocation,
}

/// A function parameter; the name may be absent in prototypes.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: Option<String>,
    pub id: NodeId,
    pub loc: SourceLocation,
}

/// One `int` declaration, possibly with several declarators.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub is_extern: bool,
    pub vars: Vec<Declarator>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: String,
    pub id: NodeId,
    pub init: Option<Expr>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub enumerators: Vec<Enumerator>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct Enumerator {
    pub name: String,
    pub id: NodeId,
    /// Explicit value expression; absent means previous + 1.
    pub value: Option<Expr>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Compound(Vec<Stmt>, SourceLocation),
    Expr(Expr),
    Decl(VarDecl),
    Enum(EnumDef),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        loc: SourceLocation,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
        loc: SourceLocation,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
        loc: SourceLocation,
    },
    For {
        /// Either a declaration or an expression statement.
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
        loc: SourceLocation,
    },
    Break(SourceLocation),
    Continue(SourceLocation),
    Return {
        value: Option<Expr>,
        loc: SourceLocation,
    },
    /// `asm("mnemonic")` or `asm("mnemonic", operand)`.
    Asm {
        mnemonic: String,
        operand: Option<AsmOperand>,
        loc: SourceLocation,
    },
    Empty,
}

impl Stmt {
    pub fn loc(&self) -> Option<SourceLocation> {
        match self {
            Stmt::Compound(_, loc) => Some(*loc),
            Stmt::Expr(e) => Some(e.loc()),
            Stmt::Decl(d) => Some(d.loc),
            Stmt::Enum(e) => Some(e.loc),
            Stmt::If { loc, .. }
            | Stmt::While { loc, .. }
            | Stmt::DoWhile { loc, .. }
            | Stmt::For { loc, .. }
            | Stmt::Return { loc, .. }
            | Stmt::Asm { loc, .. } => Some(*loc),
            Stmt::Break(loc) | Stmt::Continue(loc) => Some(*loc),
            Stmt::Empty => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AsmOperand {
    /// Copied verbatim into the instruction stream.
    Str(String),
    Int(i32),
    /// Emitted as the identifier's VM slot or parameter name.
    Ident { name: String, id: NodeId },
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit {
        value: i32,
        loc: SourceLocation,
    },
    Ident {
        name: String,
        id: NodeId,
        loc: SourceLocation,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        loc: SourceLocation,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: SourceLocation,
    },
    /// Simple (`op` None) or compound (`op` Some) assignment. The target is
    /// restricted to a plain identifier by the parser.
    Assign {
        op: Option<BinaryOp>,
        target: String,
        target_id: NodeId,
        value: Box<Expr>,
        loc: SourceLocation,
    },
    IncDec {
        target: String,
        target_id: NodeId,
        increment: bool,
        prefix: bool,
        loc: SourceLocation,
    },
    Call {
        callee: String,
        callee_id: NodeId,
        args: Vec<Expr>,
        loc: SourceLocation,
    },
}

impl Expr {
    pub fn loc(&self) -> SourceLocation {
        match self {
            Expr::IntLit { loc, .. }
            | Expr::Ident { loc, .. }
            | Expr::Unary { loc, .. }
            | Expr::Binary { loc, .. }
            | Expr::Assign { loc, .. }
            | Expr::IncDec { loc, .. }
            | Expr::Call { loc, .. } => *loc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    LogAnd,
    LogOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogAnd | BinaryOp::LogOr)
    }
}
