//! Symbol and scope resolution
//!
//! Walks the merged translation unit, classifies every declaration as
//! {VM variable, VM parameter, VM API function, user function, enum
//! constant}, and maps every identifier use to its declaration. Also
//! enforces the `int` type wall: every expression is an int, functions
//! return int or void, and void never appears in a value context.
//!
//! Top-level names have whole-unit visibility (the unit is formed by
//! concatenating all inputs), so functions may call forward without a
//! prototype. Inside functions, scoping is strict and block-structured:
//! each compound statement opens a scope, `for` headers open a scope
//! enclosing their body, and inner declarations shadow outer ones.

use crate::ast::{
    AsmOperand, EnumDef, Expr, FunctionDef, NodeId, Prototype, SourceLocation, Stmt, TopDecl,
    TranslationUnit, VarDecl,
};
use crate::builtins::ApiTable;
use crate::consteval;
use crate::error::{CompileError, ErrorKind};
use std::collections::{HashMap, HashSet};

pub type DeclId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclKind {
    /// File-scope variable with an optional constant-folded initialiser.
    Global { init: Option<i32> },
    /// Block-scope variable.
    Local,
    /// Function parameter, positionally indexed within its function.
    FuncParam { func: DeclId, index: usize },
    /// `extern int pN`-style binding to a VM parameter.
    ParamVar { index: u8 },
    Function {
        returns_value: bool,
        arity: usize,
        defined: bool,
    },
    /// VM API function resolved from the opcode table.
    Api {
        opcode: String,
        arity: usize,
        returns_value: bool,
    },
    EnumConst { value: i32 },
}

impl DeclKind {
    /// Object declarations that read/write storage (slot or parameter).
    pub fn is_object(&self) -> bool {
        matches!(
            self,
            DeclKind::Global { .. }
                | DeclKind::Local
                | DeclKind::FuncParam { .. }
                | DeclKind::ParamVar { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub name: String,
    pub kind: DeclKind,
    pub loc: SourceLocation,
}

/// The resolver's output, consumed by the allocator and code generator.
#[derive(Debug)]
pub struct Resolved {
    pub decls: Vec<Decl>,
    /// Identifier-use node → declaration.
    pub uses: HashMap<NodeId, DeclId>,
    /// Declarator/parameter/enumerator node → declaration.
    pub def_ids: HashMap<NodeId, DeclId>,
    /// Function declaration → its parameter declarations, in order.
    pub fn_params: HashMap<DeclId, Vec<DeclId>>,
    /// Function definitions in source order: (decl, index into unit.decls).
    pub functions: Vec<(DeclId, usize)>,
    pub main: DeclId,
}

impl Resolved {
    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id]
    }

    /// Declaration for an identifier-use node. Missing entries are compiler
    /// bugs, not user errors.
    pub fn use_of(&self, node: NodeId) -> Result<DeclId, CompileError> {
        self.uses.get(&node).copied().ok_or_else(|| {
            CompileError::internal(format!("identifier node {} was never resolved", node))
        })
    }
}

/// Extract the VM parameter index from an extern variable name.
///
/// The name must contain exactly one `_`-separated segment of the form
/// `p<digit>` (the whole name counts as one segment). `Err(())` marks an
/// ambiguous name with several such segments.
fn parameter_index(name: &str) -> Result<Option<u8>, ()> {
    let mut found = None;
    for segment in name.split('_') {
        let bytes = segment.as_bytes();
        if bytes.len() == 2 && bytes[0] == b'p' && bytes[1].is_ascii_digit() {
            if found.is_some() {
                return Err(());
            }
            found = Some(bytes[1] - b'0');
        }
    }
    Ok(found)
}

pub fn resolve(unit: &TranslationUnit, api: &ApiTable) -> Result<Resolved, CompileError> {
    let mut resolver = Resolver {
        unit,
        api,
        decls: Vec::new(),
        uses: HashMap::new(),
        def_ids: HashMap::new(),
        fn_params: HashMap::new(),
        functions: Vec::new(),
        scopes: vec![HashMap::new()],
        loop_depth: 0,
        returns_value: false,
    };
    resolver.run()
}

struct Resolver<'a> {
    unit: &'a TranslationUnit,
    api: &'a ApiTable,
    decls: Vec<Decl>,
    uses: HashMap<NodeId, DeclId>,
    def_ids: HashMap<NodeId, DeclId>,
    fn_params: HashMap<DeclId, Vec<DeclId>>,
    functions: Vec<(DeclId, usize)>,
    scopes: Vec<HashMap<String, DeclId>>,
    loop_depth: usize,
    /// Return kind of the function currently being walked.
    returns_value: bool,
}

impl<'a> Resolver<'a> {
    fn run(mut self) -> Result<Resolved, CompileError> {
        // Pass A: collect all top-level declarations so bodies can call
        // forward without prototypes.
        for (index, decl) in self.unit.decls.iter().enumerate() {
            match decl {
                TopDecl::Enum(def) => self.resolve_enum(def)?,
                TopDecl::Variables(vd) => self.resolve_top_variables(vd)?,
                TopDecl::Prototype(p) => self.resolve_prototype(p)?,
                TopDecl::Function(f) => self.declare_function(f, index)?,
            }
        }

        // Pass B: walk function bodies.
        for (decl_id, index) in self.functions.clone() {
            let TopDecl::Function(f) = &self.unit.decls[index] else {
                return Err(CompileError::internal("function index out of sync"));
            };
            self.walk_function(decl_id, f)?;
        }

        // A call needs the callee's tag and parameter slots, so every
        // called function must have a body somewhere in the unit.
        let used: HashSet<DeclId> = self.uses.values().copied().collect();
        for (id, decl) in self.decls.iter().enumerate() {
            if matches!(decl.kind, DeclKind::Function { defined: false, .. })
                && used.contains(&id)
            {
                return Err(CompileError::scope(
                    format!("function '{}' is declared but never defined", decl.name),
                    self.loc_string(decl.loc),
                ));
            }
        }

        let main = self.check_main()?;
        Ok(Resolved {
            decls: self.decls,
            uses: self.uses,
            def_ids: self.def_ids,
            fn_params: self.fn_params,
            functions: self.functions,
            main,
        })
    }

    // ---- scope plumbing -------------------------------------------------

    fn loc_string(&self, loc: SourceLocation) -> String {
        self.unit.loc_string(loc)
    }

    fn lookup(&self, name: &str) -> Option<DeclId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn declare(
        &mut self,
        name: &str,
        kind: DeclKind,
        loc: SourceLocation,
    ) -> Result<DeclId, CompileError> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(CompileError::internal("scope stack underflow"));
        };
        if scope.contains_key(name) {
            return Err(CompileError::scope(
                format!("redeclaration of '{}'", name),
                self.unit.loc_string(loc),
            ));
        }
        let id = self.decls.len();
        scope.insert(name.to_string(), id);
        self.decls.push(Decl {
            name: name.to_string(),
            kind,
            loc,
        });
        Ok(id)
    }

    // ---- top-level declarations -----------------------------------------

    fn resolve_enum(&mut self, def: &EnumDef) -> Result<(), CompileError> {
        let mut next = 0i32;
        for enumerator in &def.enumerators {
            let value = match &enumerator.value {
                Some(expr) => self.fold_const(expr)?,
                None => next,
            };
            let id = self.declare(
                &enumerator.name,
                DeclKind::EnumConst { value },
                enumerator.loc,
            )?;
            self.def_ids.insert(enumerator.id, id);
            next = value.wrapping_add(1);
        }
        Ok(())
    }

    fn fold_const(&self, expr: &Expr) -> Result<i32, CompileError> {
        let scopes = &self.scopes;
        let decls = &self.decls;
        let env = move |name: &str| -> Option<i32> {
            let id = scopes.iter().rev().find_map(|s| s.get(name).copied())?;
            match &decls[id].kind {
                DeclKind::EnumConst { value } => Some(*value),
                _ => None,
            }
        };
        consteval::fold(expr, &env, &|e| self.unit.loc_string(e.loc()))
    }

    fn resolve_top_variables(&mut self, vd: &VarDecl) -> Result<(), CompileError> {
        for declarator in &vd.vars {
            if vd.is_extern {
                let index = match parameter_index(&declarator.name) {
                    Ok(Some(index)) => index,
                    Ok(None) => {
                        return Err(CompileError::scope(
                            format!(
                                "extern variable '{}' does not match the pN parameter pattern",
                                declarator.name
                            ),
                            self.loc_string(declarator.loc),
                        ));
                    }
                    Err(()) => {
                        return Err(CompileError::scope(
                            format!(
                                "extern variable '{}' names more than one VM parameter",
                                declarator.name
                            ),
                            self.loc_string(declarator.loc),
                        ));
                    }
                };
                if declarator.init.is_some() {
                    return Err(CompileError::scope(
                        format!(
                            "extern parameter '{}' cannot have an initialiser",
                            declarator.name
                        ),
                        self.loc_string(declarator.loc),
                    ));
                }
                // Agreeing re-externs (user copies of the header) collapse.
                if let Some(existing) = self.lookup(&declarator.name)
                    && self.decls[existing].kind == (DeclKind::ParamVar { index })
                {
                    self.def_ids.insert(declarator.id, existing);
                    continue;
                }
                let id = self.declare(
                    &declarator.name,
                    DeclKind::ParamVar { index },
                    declarator.loc,
                )?;
                self.def_ids.insert(declarator.id, id);
            } else {
                let init = match &declarator.init {
                    Some(expr) => Some(self.fold_const(expr)?),
                    None => None,
                };
                let id =
                    self.declare(&declarator.name, DeclKind::Global { init }, declarator.loc)?;
                self.def_ids.insert(declarator.id, id);
            }
        }
        Ok(())
    }

    fn resolve_prototype(&mut self, p: &Prototype) -> Result<(), CompileError> {
        if p.is_extern {
            let Some(api_fn) = self.api.get(&p.name) else {
                return Err(CompileError::scope(
                    format!(
                        "unknown VM API function '{}'; extern functions must name an API opcode",
                        p.name
                    ),
                    self.loc_string(p.loc),
                ));
            };
            if api_fn.arity != p.params.len() || api_fn.returns_value != p.returns_value {
                return Err(CompileError::scope(
                    format!(
                        "prototype for '{}' does not match the VM API ({} parameter(s), {})",
                        p.name,
                        api_fn.arity,
                        if api_fn.returns_value { "returns int" } else { "returns void" }
                    ),
                    self.loc_string(p.loc),
                ));
            }
            let kind = DeclKind::Api {
                opcode: api_fn.opcode.clone(),
                arity: api_fn.arity,
                returns_value: api_fn.returns_value,
            };
            if let Some(existing) = self.lookup(&p.name) {
                if self.decls[existing].kind == kind {
                    return Ok(()); // agreeing duplicate, collapse
                }
                return Err(CompileError::scope(
                    format!("redeclaration of '{}'", p.name),
                    self.loc_string(p.loc),
                ));
            }
            self.declare(&p.name, kind, p.loc)?;
            return Ok(());
        }

        match self.lookup(&p.name) {
            Some(existing) => match &self.decls[existing].kind {
                DeclKind::Function {
                    returns_value,
                    arity,
                    ..
                } => {
                    if *returns_value != p.returns_value || *arity != p.params.len() {
                        return Err(CompileError::scope(
                            format!("conflicting prototype for '{}'", p.name),
                            self.loc_string(p.loc),
                        ));
                    }
                    Ok(()) // agreeing prototype, collapse
                }
                _ => Err(CompileError::scope(
                    format!("redeclaration of '{}'", p.name),
                    self.loc_string(p.loc),
                )),
            },
            None => {
                self.declare(
                    &p.name,
                    DeclKind::Function {
                        returns_value: p.returns_value,
                        arity: p.params.len(),
                        defined: false,
                    },
                    p.loc,
                )?;
                Ok(())
            }
        }
    }

    fn declare_function(&mut self, f: &FunctionDef, index: usize) -> Result<(), CompileError> {
        if self.api.get(&f.name).is_some() {
            return Err(CompileError::scope(
                format!("'{}' conflicts with a VM API function", f.name),
                self.loc_string(f.loc),
            ));
        }
        let decl_id = match self.lookup(&f.name) {
            Some(existing) => match self.decls[existing].kind.clone() {
                DeclKind::Function {
                    returns_value,
                    arity,
                    defined,
                } => {
                    if defined {
                        return Err(CompileError::scope(
                            format!("redefinition of '{}'", f.name),
                            self.loc_string(f.loc),
                        ));
                    }
                    if returns_value != f.returns_value || arity != f.params.len() {
                        return Err(CompileError::scope(
                            format!("definition of '{}' conflicts with its prototype", f.name),
                            self.loc_string(f.loc),
                        ));
                    }
                    self.decls[existing].kind = DeclKind::Function {
                        returns_value,
                        arity,
                        defined: true,
                    };
                    existing
                }
                _ => {
                    return Err(CompileError::scope(
                        format!("redeclaration of '{}'", f.name),
                        self.loc_string(f.loc),
                    ));
                }
            },
            None => self.declare(
                &f.name,
                DeclKind::Function {
                    returns_value: f.returns_value,
                    arity: f.params.len(),
                    defined: true,
                },
                f.loc,
            )?,
        };
        self.functions.push((decl_id, index));
        Ok(())
    }

    // ---- function bodies ------------------------------------------------

    fn walk_function(&mut self, decl_id: DeclId, f: &FunctionDef) -> Result<(), CompileError> {
        self.returns_value = f.returns_value;
        // Parameters share the outermost block scope of the body.
        self.scopes.push(HashMap::new());
        let mut param_ids = Vec::with_capacity(f.params.len());
        for (index, param) in f.params.iter().enumerate() {
            let Some(name) = &param.name else {
                return Err(CompileError::scope(
                    format!("unnamed parameter in definition of '{}'", f.name),
                    self.loc_string(param.loc),
                ));
            };
            let id = self.declare(
                name,
                DeclKind::FuncParam {
                    func: decl_id,
                    index,
                },
                param.loc,
            )?;
            self.def_ids.insert(param.id, id);
            param_ids.push(id);
        }
        self.fn_params.insert(decl_id, param_ids);
        for stmt in &f.body {
            self.walk_stmt(stmt)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn walk_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Compound(stmts, _) => {
                self.scopes.push(HashMap::new());
                for s in stmts {
                    self.walk_stmt(s)?;
                }
                self.scopes.pop();
                Ok(())
            }
            Stmt::Expr(expr) => self.resolve_expr(expr, false),
            Stmt::Decl(vd) => {
                for declarator in &vd.vars {
                    // The declarator is in scope before its own initialiser.
                    let id = self.declare(&declarator.name, DeclKind::Local, declarator.loc)?;
                    self.def_ids.insert(declarator.id, id);
                    if let Some(init) = &declarator.init {
                        self.resolve_expr(init, true)?;
                    }
                }
                Ok(())
            }
            Stmt::Enum(def) => self.resolve_enum(def),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(cond, true)?;
                self.walk_stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.walk_stmt(else_branch)?;
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                self.resolve_expr(cond, true)?;
                self.loop_depth += 1;
                self.walk_stmt(body)?;
                self.loop_depth -= 1;
                Ok(())
            }
            Stmt::DoWhile { body, cond, .. } => {
                self.loop_depth += 1;
                self.walk_stmt(body)?;
                self.loop_depth -= 1;
                self.resolve_expr(cond, true)
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
                ..
            } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.walk_stmt(init)?;
                }
                if let Some(cond) = cond {
                    self.resolve_expr(cond, true)?;
                }
                if let Some(step) = step {
                    self.resolve_expr(step, false)?;
                }
                self.loop_depth += 1;
                self.walk_stmt(body)?;
                self.loop_depth -= 1;
                self.scopes.pop();
                Ok(())
            }
            Stmt::Break(loc) | Stmt::Continue(loc) => {
                if self.loop_depth == 0 {
                    let which = if matches!(stmt, Stmt::Break(_)) {
                        "break"
                    } else {
                        "continue"
                    };
                    return Err(CompileError::scope(
                        format!("'{}' outside of a loop", which),
                        self.loc_string(*loc),
                    ));
                }
                Ok(())
            }
            Stmt::Return { value, loc } => match value {
                Some(expr) => {
                    if !self.returns_value {
                        return Err(CompileError::ty(
                            "void function returns a value",
                            self.loc_string(*loc),
                        ));
                    }
                    self.resolve_expr(expr, true)
                }
                None => {
                    if self.returns_value {
                        return Err(CompileError::ty(
                            "non-void function must return a value",
                            self.loc_string(*loc),
                        ));
                    }
                    Ok(())
                }
            },
            Stmt::Asm { operand, loc, .. } => {
                if let Some(AsmOperand::Ident { name, id }) = operand {
                    let Some(decl_id) = self.lookup(name) else {
                        return Err(CompileError::scope(
                            format!("undeclared identifier '{}' in asm operand", name),
                            self.loc_string(*loc),
                        ));
                    };
                    match &self.decls[decl_id].kind {
                        DeclKind::Function { .. } | DeclKind::Api { .. } => {
                            return Err(CompileError::asm(
                                format!("'{}' cannot be an asm operand", name),
                                self.loc_string(*loc),
                            ));
                        }
                        _ => {}
                    }
                    self.uses.insert(*id, decl_id);
                }
                Ok(())
            }
            Stmt::Empty => Ok(()),
        }
    }

    /// Resolve an expression. `value_needed` is false only where C discards
    /// the value (expression statements and `for` steps), which is the one
    /// place a void call is legal.
    fn resolve_expr(&mut self, expr: &Expr, value_needed: bool) -> Result<(), CompileError> {
        match expr {
            Expr::IntLit { .. } => Ok(()),
            Expr::Ident { name, id, loc } => {
                let Some(decl_id) = self.lookup(name) else {
                    return Err(CompileError::scope(
                        format!("undeclared identifier '{}'", name),
                        self.loc_string(*loc),
                    ));
                };
                match &self.decls[decl_id].kind {
                    DeclKind::Function { .. } | DeclKind::Api { .. } => {
                        return Err(CompileError::ty(
                            format!("function '{}' used as a value", name),
                            self.loc_string(*loc),
                        ));
                    }
                    _ => {}
                }
                self.uses.insert(*id, decl_id);
                Ok(())
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand, true),
            Expr::Binary { lhs, rhs, .. } => {
                self.resolve_expr(lhs, true)?;
                self.resolve_expr(rhs, true)
            }
            Expr::Assign {
                target,
                target_id,
                value,
                loc,
                ..
            } => {
                self.resolve_assign_target(target, *target_id, *loc)?;
                self.resolve_expr(value, true)
            }
            Expr::IncDec {
                target,
                target_id,
                loc,
                ..
            } => self.resolve_assign_target(target, *target_id, *loc),
            Expr::Call {
                callee,
                callee_id,
                args,
                loc,
            } => {
                let Some(decl_id) = self.lookup(callee) else {
                    return Err(CompileError::scope(
                        format!("call to undeclared function '{}'", callee),
                        self.loc_string(*loc),
                    ));
                };
                let (arity, returns_value) = match &self.decls[decl_id].kind {
                    DeclKind::Function {
                        arity,
                        returns_value,
                        ..
                    }
                    | DeclKind::Api {
                        arity,
                        returns_value,
                        ..
                    } => (*arity, *returns_value),
                    _ => {
                        return Err(CompileError::ty(
                            format!("'{}' is not a function", callee),
                            self.loc_string(*loc),
                        ));
                    }
                };
                if args.len() != arity {
                    return Err(CompileError::ty(
                        format!(
                            "call to '{}' with {} argument(s), expected {}",
                            callee,
                            args.len(),
                            arity
                        ),
                        self.loc_string(*loc),
                    ));
                }
                if value_needed && !returns_value {
                    return Err(CompileError::ty(
                        format!("void function '{}' used in a value context", callee),
                        self.loc_string(*loc),
                    ));
                }
                self.uses.insert(*callee_id, decl_id);
                for arg in args {
                    self.resolve_expr(arg, true)?;
                }
                Ok(())
            }
        }
    }

    fn resolve_assign_target(
        &mut self,
        name: &str,
        node: NodeId,
        loc: SourceLocation,
    ) -> Result<(), CompileError> {
        let Some(decl_id) = self.lookup(name) else {
            return Err(CompileError::scope(
                format!("undeclared identifier '{}'", name),
                self.loc_string(loc),
            ));
        };
        match &self.decls[decl_id].kind {
            DeclKind::EnumConst { .. } => {
                return Err(CompileError::ty(
                    format!("cannot assign to enum constant '{}'", name),
                    self.loc_string(loc),
                ));
            }
            DeclKind::Function { .. } | DeclKind::Api { .. } => {
                return Err(CompileError::ty(
                    format!("cannot assign to function '{}'", name),
                    self.loc_string(loc),
                ));
            }
            _ => {}
        }
        self.uses.insert(node, decl_id);
        Ok(())
    }

    fn check_main(&self) -> Result<DeclId, CompileError> {
        let Some(&id) = self.scopes[0].get("main") else {
            return Err(CompileError::new(
                ErrorKind::Scope,
                "no main function defined",
            ));
        };
        match &self.decls[id].kind {
            DeclKind::Function { defined, arity, .. } => {
                if !defined {
                    return Err(CompileError::new(
                        ErrorKind::Scope,
                        "main is declared but never defined",
                    ));
                }
                if *arity != 0 {
                    return Err(CompileError::scope(
                        "main must take no parameters",
                        self.loc_string(self.decls[id].loc),
                    ));
                }
                Ok(id)
            }
            _ => Err(CompileError::scope(
                "main must be a function",
                self.loc_string(self.decls[id].loc),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use std::path::PathBuf;

    fn resolve_src(source: &str) -> Result<Resolved, CompileError> {
        let mut next_id = 0;
        let (file, decls) =
            parse_source(source, PathBuf::from("test.c"), 0, &mut next_id).expect("parse failed");
        let unit = TranslationUnit {
            files: vec![file],
            decls,
        };
        resolve(&unit, &ApiTable::standard())
    }

    fn resolve_err(source: &str) -> CompileError {
        resolve_src(source).expect_err("expected a resolve error")
    }

    #[test]
    fn test_shadowing_allowed() {
        resolve_src("int a; int main() { int a = 1; { int a = 2; a = 3; } a = 4; return a; }")
            .unwrap();
    }

    #[test]
    fn test_redeclaration_in_same_scope() {
        let err = resolve_err("int main() { int a; int a; return 0; }");
        assert_eq!(err.kind, ErrorKind::Scope);
        assert!(err.message.contains("redeclaration"));
    }

    #[test]
    fn test_undeclared_identifier() {
        let err = resolve_err("int main() { return nope; }");
        assert_eq!(err.kind, ErrorKind::Scope);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_sibling_scopes_do_not_leak() {
        let err = resolve_err("int main() { { int a = 1; } return a; }");
        assert_eq!(err.kind, ErrorKind::Scope);
    }

    #[test]
    fn test_extern_parameter_binding() {
        let resolved =
            resolve_src("extern int p3; extern int motor_p2; extern int led_p0_mode; int main() { return 0; }")
                .unwrap();
        let kinds: Vec<_> = resolved
            .decls
            .iter()
            .filter_map(|d| match d.kind {
                DeclKind::ParamVar { index } => Some((d.name.clone(), index)),
                _ => None,
            })
            .collect();
        assert!(kinds.contains(&("p3".to_string(), 3)));
        assert!(kinds.contains(&("motor_p2".to_string(), 2)));
        assert!(kinds.contains(&("led_p0_mode".to_string(), 0)));
    }

    #[test]
    fn test_extern_variable_without_pattern() {
        let err = resolve_err("extern int counter; int main() { return 0; }");
        assert_eq!(err.kind, ErrorKind::Scope);
        assert!(err.message.contains("pN"));
    }

    #[test]
    fn test_extern_variable_ambiguous_pattern() {
        let err = resolve_err("extern int a_p1_p2; int main() { return 0; }");
        assert!(err.message.contains("more than one"));
    }

    #[test]
    fn test_extern_parameter_reextern_collapses() {
        resolve_src("extern int p0; extern int p0; int main() { p0 = 1; return 0; }").unwrap();
    }

    #[test]
    fn test_extern_parameter_with_initialiser() {
        let err = resolve_err("extern int p0 = 1; int main() { return 0; }");
        assert!(err.message.contains("initialiser"));
    }

    #[test]
    fn test_api_prototype_binds_opcode() {
        let resolved =
            resolve_src("extern int gpioWrite(int gpio, int level); int main() { return gpioWrite(4, 1); }")
                .unwrap();
        assert!(resolved.decls.iter().any(|d| matches!(
            &d.kind,
            DeclKind::Api { opcode, arity: 2, returns_value: true } if opcode == "WRITE"
        )));
    }

    #[test]
    fn test_unknown_api_function() {
        let err = resolve_err("extern int gpioBogus(int x); int main() { return 0; }");
        assert!(err.message.contains("gpioBogus"));
    }

    #[test]
    fn test_api_prototype_arity_mismatch() {
        let err = resolve_err("extern int gpioWrite(int gpio); int main() { return 0; }");
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_prototypes_collapse_and_conflict() {
        resolve_src("int f(int a); int f(int b); int f(int c) { return c; } int main() { return f(1); }")
            .unwrap();
        let err = resolve_err("int f(int a); int f(int a, int b); int main() { return 0; }");
        assert!(err.message.contains("conflicting prototype"));
    }

    #[test]
    fn test_redefinition_of_function() {
        let err = resolve_err("int f() { return 1; } int f() { return 2; } int main() { return 0; }");
        assert!(err.message.contains("redefinition"));
    }

    #[test]
    fn test_forward_call_without_prototype() {
        resolve_src("int main() { return helper(); } int helper() { return 3; }").unwrap();
    }

    #[test]
    fn test_call_arity_checked() {
        let err = resolve_err("int f(int a) { return a; } int main() { return f(1, 2); }");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("expected 1"));
    }

    #[test]
    fn test_void_call_in_value_context() {
        let err = resolve_err("void f() { } int main() { return f(); }");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("value context"));
    }

    #[test]
    fn test_void_call_as_statement_ok() {
        resolve_src("void f() { } int main() { f(); return 0; }").unwrap();
    }

    #[test]
    fn test_function_used_as_value() {
        let err = resolve_err("int f() { return 1; } int main() { return f + 1; }");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_assignment_to_enum_constant() {
        let err = resolve_err("enum { RED = 1 }; int main() { RED = 2; return 0; }");
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("enum constant"));
    }

    #[test]
    fn test_enum_values_fold_with_references() {
        let resolved =
            resolve_src("enum { A = 2, B, C = A + B }; int main() { return C; }").unwrap();
        let value_of = |name: &str| {
            resolved
                .decls
                .iter()
                .find(|d| d.name == name)
                .and_then(|d| match d.kind {
                    DeclKind::EnumConst { value } => Some(value),
                    _ => None,
                })
                .unwrap()
        };
        assert_eq!(value_of("A"), 2);
        assert_eq!(value_of("B"), 3);
        assert_eq!(value_of("C"), 5);
    }

    #[test]
    fn test_break_outside_loop() {
        let err = resolve_err("int main() { break; return 0; }");
        assert!(err.message.contains("break"));
    }

    #[test]
    fn test_return_value_in_void_function() {
        let err = resolve_err("void f() { return 1; } int main() { return 0; }");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_bare_return_in_int_function() {
        let err = resolve_err("int main() { return; }");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_missing_main() {
        let err = resolve_err("int helper() { return 1; }");
        assert!(err.message.contains("main"));
    }

    #[test]
    fn test_main_with_parameters() {
        let err = resolve_err("int main(int argc) { return 0; }");
        assert!(err.message.contains("no parameters"));
    }

    #[test]
    fn test_user_function_conflicting_with_api() {
        let err = resolve_err("int gpioWrite(int a, int b) { return 0; } int main() { return 0; }");
        assert!(err.message.contains("VM API"));
    }

    #[test]
    fn test_global_initialiser_must_be_constant() {
        let err = resolve_err("int g = f(); int f() { return 1; } int main() { return 0; }");
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn test_asm_operand_resolution() {
        resolve_src("int main() { int x = 1; asm(\"sta\", x); return 0; }").unwrap();
        let err = resolve_err("int main() { asm(\"sta\", nothere); return 0; }");
        assert_eq!(err.kind, ErrorKind::Scope);
    }

    #[test]
    fn test_asm_operand_cannot_be_function() {
        let err = resolve_err("int f() { return 1; } int main() { asm(\"call\", f); return 0; }");
        assert_eq!(err.kind, ErrorKind::Asm);
    }
}
