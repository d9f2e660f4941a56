//! Call graph analysis for the recursion ban
//!
//! The calling convention writes arguments into the callee's parameter
//! slots in place, so a function re-entering itself would overwrite its
//! caller's activation. This module builds the static call graph, finds
//! strongly connected components (Tarjan), and rejects any recursive
//! cycle — unless every function in the cycle carries inline-asm
//! PUSH/POP annotations, the documented escape hatch for programmers who
//! save the argument slots themselves.
//!
//! The same graph drives frame layout: [`CallGraph::topo_order`] yields
//! callers before callees so the allocator can stack frames along call
//! chains.

use crate::ast::{Expr, Stmt, TopDecl, TranslationUnit};
use crate::error::{CompileError, ErrorKind};
use crate::resolver::{DeclId, DeclKind, Resolved};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct CallGraph {
    /// Map from function to the set of user functions it calls.
    edges: HashMap<DeclId, HashSet<DeclId>>,
    /// All function-definition decl ids.
    nodes: Vec<DeclId>,
    /// SCCs that represent recursion (multi-member, or self-calling).
    recursive_sccs: Vec<HashSet<DeclId>>,
}

impl CallGraph {
    /// Build the graph from the resolved unit.
    pub fn build(unit: &TranslationUnit, resolved: &Resolved) -> Result<Self, CompileError> {
        let mut edges: HashMap<DeclId, HashSet<DeclId>> = HashMap::new();
        let mut nodes = Vec::with_capacity(resolved.functions.len());

        for &(decl_id, index) in &resolved.functions {
            let TopDecl::Function(f) = &unit.decls[index] else {
                return Err(CompileError::internal("function index out of sync"));
            };
            let mut callees = HashSet::new();
            for stmt in &f.body {
                collect_calls_stmt(stmt, resolved, &mut callees)?;
            }
            edges.insert(decl_id, callees);
            nodes.push(decl_id);
        }

        let mut graph = CallGraph {
            edges,
            nodes,
            recursive_sccs: Vec::new(),
        };
        graph.recursive_sccs = graph.find_sccs();
        Ok(graph)
    }

    pub fn is_recursive(&self, function: DeclId) -> bool {
        self.recursive_sccs.iter().any(|scc| scc.contains(&function))
    }

    pub fn recursive_cycles(&self) -> &[HashSet<DeclId>] {
        &self.recursive_sccs
    }

    pub fn callees(&self, function: DeclId) -> Option<&HashSet<DeclId>> {
        self.edges.get(&function)
    }

    /// Reject recursive cycles that lack the inline-asm save/restore
    /// annotation on every member.
    pub fn check_recursion(
        &self,
        unit: &TranslationUnit,
        resolved: &Resolved,
    ) -> Result<(), CompileError> {
        for scc in &self.recursive_sccs {
            let waived = scc
                .iter()
                .all(|&id| function_has_push_pop(unit, resolved, id));
            if waived {
                continue;
            }
            let mut names: Vec<&str> = scc
                .iter()
                .map(|&id| resolved.decl(id).name.as_str())
                .collect();
            names.sort_unstable();
            let loc = scc
                .iter()
                .map(|&id| resolved.decl(id).loc)
                .min_by_key(|loc| (loc.file, loc.line));
            let message = if names.len() == 1 {
                format!(
                    "function '{}' calls itself; recursion is not supported \
                     (annotate with asm PUSH/POP to take responsibility)",
                    names[0]
                )
            } else {
                format!(
                    "functions {} are mutually recursive; recursion is not supported \
                     (annotate each with asm PUSH/POP to take responsibility)",
                    names
                        .iter()
                        .map(|n| format!("'{}'", n))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            };
            return Err(match loc {
                Some(loc) => CompileError::at(
                    ErrorKind::Recursion,
                    message,
                    unit.loc_string(loc),
                ),
                None => CompileError::new(ErrorKind::Recursion, message),
            });
        }
        Ok(())
    }

    /// Topological order with callers before callees. Only valid once
    /// [`check_recursion`] passed (waived cycles are broken arbitrarily,
    /// which is fine: the annotated functions manage their own slots).
    pub fn topo_order(&self) -> Vec<DeclId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        for &node in &self.nodes {
            self.visit(node, &mut visited, &mut postorder);
        }
        postorder.reverse();
        postorder
    }

    fn visit(&self, node: DeclId, visited: &mut HashSet<DeclId>, postorder: &mut Vec<DeclId>) {
        if !visited.insert(node) {
            return;
        }
        if let Some(callees) = self.edges.get(&node) {
            let mut callees: Vec<DeclId> = callees.iter().copied().collect();
            callees.sort_unstable(); // deterministic layout
            for callee in callees {
                self.visit(callee, visited, postorder);
            }
        }
        postorder.push(node);
    }

    /// Tarjan's algorithm, keeping only SCCs that represent recursion.
    fn find_sccs(&self) -> Vec<HashSet<DeclId>> {
        let mut index_counter = 0usize;
        let mut stack: Vec<DeclId> = Vec::new();
        let mut on_stack: HashSet<DeclId> = HashSet::new();
        let mut indices: HashMap<DeclId, usize> = HashMap::new();
        let mut lowlinks: HashMap<DeclId, usize> = HashMap::new();
        let mut sccs: Vec<HashSet<DeclId>> = Vec::new();

        for &node in &self.nodes {
            if !indices.contains_key(&node) {
                self.tarjan_visit(
                    node,
                    &mut index_counter,
                    &mut stack,
                    &mut on_stack,
                    &mut indices,
                    &mut lowlinks,
                    &mut sccs,
                );
            }
        }

        sccs.into_iter()
            .filter(|scc| {
                if scc.len() > 1 {
                    return true;
                }
                scc.iter().next().is_some_and(|&node| {
                    self.edges
                        .get(&node)
                        .is_some_and(|callees| callees.contains(&node))
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn tarjan_visit(
        &self,
        node: DeclId,
        index_counter: &mut usize,
        stack: &mut Vec<DeclId>,
        on_stack: &mut HashSet<DeclId>,
        indices: &mut HashMap<DeclId, usize>,
        lowlinks: &mut HashMap<DeclId, usize>,
        sccs: &mut Vec<HashSet<DeclId>>,
    ) {
        let index = *index_counter;
        *index_counter += 1;
        indices.insert(node, index);
        lowlinks.insert(node, index);
        stack.push(node);
        on_stack.insert(node);

        if let Some(callees) = self.edges.get(&node) {
            for &callee in callees {
                if !indices.contains_key(&callee) {
                    self.tarjan_visit(
                        callee,
                        index_counter,
                        stack,
                        on_stack,
                        indices,
                        lowlinks,
                        sccs,
                    );
                    let callee_lowlink = lowlinks[&callee];
                    if let Some(lowlink) = lowlinks.get_mut(&node) {
                        *lowlink = (*lowlink).min(callee_lowlink);
                    }
                } else if on_stack.contains(&callee) {
                    let callee_index = indices[&callee];
                    if let Some(lowlink) = lowlinks.get_mut(&node) {
                        *lowlink = (*lowlink).min(callee_index);
                    }
                }
            }
        }

        if lowlinks.get(&node) == indices.get(&node) {
            let mut scc = HashSet::new();
            while let Some(popped) = stack.pop() {
                on_stack.remove(&popped);
                scc.insert(popped);
                if popped == node {
                    break;
                }
            }
            sccs.push(scc);
        }
    }
}

/// Does this function body contain both a PUSH-family and a POP-family
/// inline-asm statement? That is the recursion waiver.
fn function_has_push_pop(unit: &TranslationUnit, resolved: &Resolved, function: DeclId) -> bool {
    let Some(&(_, index)) = resolved.functions.iter().find(|(id, _)| *id == function) else {
        return false;
    };
    let TopDecl::Function(f) = &unit.decls[index] else {
        return false;
    };
    let mut has_push = false;
    let mut has_pop = false;
    for stmt in &f.body {
        scan_push_pop(stmt, &mut has_push, &mut has_pop);
    }
    has_push && has_pop
}

fn scan_push_pop(stmt: &Stmt, has_push: &mut bool, has_pop: &mut bool) {
    match stmt {
        Stmt::Asm { mnemonic, .. } => {
            let upper = mnemonic.to_ascii_uppercase();
            if upper == "PUSH" || upper == "PUSHA" {
                *has_push = true;
            }
            if upper == "POP" || upper == "POPA" {
                *has_pop = true;
            }
        }
        Stmt::Compound(stmts, _) => {
            for s in stmts {
                scan_push_pop(s, has_push, has_pop);
            }
        }
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => {
            scan_push_pop(then_branch, has_push, has_pop);
            if let Some(else_branch) = else_branch {
                scan_push_pop(else_branch, has_push, has_pop);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
            scan_push_pop(body, has_push, has_pop);
        }
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                scan_push_pop(init, has_push, has_pop);
            }
            scan_push_pop(body, has_push, has_pop);
        }
        _ => {}
    }
}

fn collect_calls_stmt(
    stmt: &Stmt,
    resolved: &Resolved,
    callees: &mut HashSet<DeclId>,
) -> Result<(), CompileError> {
    match stmt {
        Stmt::Compound(stmts, _) => {
            for s in stmts {
                collect_calls_stmt(s, resolved, callees)?;
            }
        }
        Stmt::Expr(expr) => collect_calls_expr(expr, resolved, callees)?,
        Stmt::Decl(vd) => {
            for declarator in &vd.vars {
                if let Some(init) = &declarator.init {
                    collect_calls_expr(init, resolved, callees)?;
                }
            }
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            collect_calls_expr(cond, resolved, callees)?;
            collect_calls_stmt(then_branch, resolved, callees)?;
            if let Some(else_branch) = else_branch {
                collect_calls_stmt(else_branch, resolved, callees)?;
            }
        }
        Stmt::While { cond, body, .. } => {
            collect_calls_expr(cond, resolved, callees)?;
            collect_calls_stmt(body, resolved, callees)?;
        }
        Stmt::DoWhile { body, cond, .. } => {
            collect_calls_stmt(body, resolved, callees)?;
            collect_calls_expr(cond, resolved, callees)?;
        }
        Stmt::For {
            init,
            cond,
            step,
            body,
            ..
        } => {
            if let Some(init) = init {
                collect_calls_stmt(init, resolved, callees)?;
            }
            if let Some(cond) = cond {
                collect_calls_expr(cond, resolved, callees)?;
            }
            if let Some(step) = step {
                collect_calls_expr(step, resolved, callees)?;
            }
            collect_calls_stmt(body, resolved, callees)?;
        }
        Stmt::Return {
            value: Some(expr), ..
        } => collect_calls_expr(expr, resolved, callees)?,
        _ => {}
    }
    Ok(())
}

fn collect_calls_expr(
    expr: &Expr,
    resolved: &Resolved,
    callees: &mut HashSet<DeclId>,
) -> Result<(), CompileError> {
    match expr {
        Expr::Call {
            callee_id, args, ..
        } => {
            let decl_id = resolved.use_of(*callee_id)?;
            // API calls are opcodes, not edges.
            if matches!(resolved.decl(decl_id).kind, DeclKind::Function { .. }) {
                callees.insert(decl_id);
            }
            for arg in args {
                collect_calls_expr(arg, resolved, callees)?;
            }
        }
        Expr::Unary { operand, .. } => collect_calls_expr(operand, resolved, callees)?,
        Expr::Binary { lhs, rhs, .. } => {
            collect_calls_expr(lhs, resolved, callees)?;
            collect_calls_expr(rhs, resolved, callees)?;
        }
        Expr::Assign { value, .. } => collect_calls_expr(value, resolved, callees)?,
        Expr::IntLit { .. } | Expr::Ident { .. } | Expr::IncDec { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::ApiTable;
    use crate::parser::parse_source;
    use crate::resolver::resolve;
    use std::path::PathBuf;

    fn analyze(source: &str) -> (TranslationUnit, Resolved, CallGraph) {
        let mut next_id = 0;
        let (file, decls) =
            parse_source(source, PathBuf::from("test.c"), 0, &mut next_id).expect("parse failed");
        let unit = TranslationUnit {
            files: vec![file],
            decls,
        };
        let resolved = resolve(&unit, &ApiTable::standard()).expect("resolve failed");
        let graph = CallGraph::build(&unit, &resolved).expect("graph failed");
        (unit, resolved, graph)
    }

    #[test]
    fn test_no_recursion() {
        let (unit, resolved, graph) =
            analyze("int leaf() { return 1; } int mid() { return leaf(); } int main() { return mid(); }");
        assert!(graph.recursive_cycles().is_empty());
        graph.check_recursion(&unit, &resolved).unwrap();
    }

    #[test]
    fn test_direct_recursion_rejected() {
        let (unit, resolved, graph) =
            analyze("int fact(int n) { return n * fact(n - 1); } int main() { return fact(5); }");
        assert_eq!(graph.recursive_cycles().len(), 1);
        let err = graph.check_recursion(&unit, &resolved).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Recursion);
        assert!(err.message.contains("fact"));
    }

    #[test]
    fn test_mutual_recursion_rejected() {
        let (unit, resolved, graph) = analyze(
            "int is_odd(int n);\n\
             int is_even(int n) { return is_odd(n - 1); }\n\
             int is_odd(int n) { return is_even(n - 1); }\n\
             int main() { return is_even(4); }",
        );
        assert_eq!(graph.recursive_cycles().len(), 1);
        let err = graph.check_recursion(&unit, &resolved).unwrap_err();
        assert!(err.message.contains("is_even"));
        assert!(err.message.contains("is_odd"));
    }

    #[test]
    fn test_push_pop_annotation_waives_the_ban() {
        let (unit, resolved, graph) = analyze(
            "int depth(int n) {\n\
               asm(\"push\");\n\
               if (n > 0) { depth(n - 1); }\n\
               asm(\"pop\");\n\
               return n;\n\
             }\n\
             int main() { return depth(3); }",
        );
        assert_eq!(graph.recursive_cycles().len(), 1);
        graph.check_recursion(&unit, &resolved).unwrap();
    }

    #[test]
    fn test_push_alone_does_not_waive() {
        let (unit, resolved, graph) = analyze(
            "int depth(int n) { asm(\"push\"); if (n > 0) { depth(n - 1); } return n; }\n\
             int main() { return depth(3); }",
        );
        assert!(graph.check_recursion(&unit, &resolved).is_err());
    }

    #[test]
    fn test_api_calls_are_not_edges() {
        let (_, resolved, graph) = analyze(
            "extern int gpioRead(int gpio);\n\
             int main() { return gpioRead(4); }",
        );
        let main_id = resolved.main;
        assert!(graph.callees(main_id).unwrap().is_empty());
    }

    #[test]
    fn test_topo_order_callers_first() {
        let (_, resolved, graph) = analyze(
            "int leaf() { return 1; } int mid() { return leaf(); } int main() { return mid(); }",
        );
        let order = graph.topo_order();
        let position = |name: &str| {
            order
                .iter()
                .position(|&id| resolved.decl(id).name == name)
                .unwrap()
        };
        assert!(position("main") < position("mid"));
        assert!(position("mid") < position("leaf"));
    }
}
